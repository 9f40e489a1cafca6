//! Binary artifacts tied to a variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AssetId, VariantId};
use crate::variant::{AssetFormat, Locale};

/// Role of an asset within a variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetRole {
    /// Thumbnail/social image.
    Preview,
    /// Full-size printable rendition.
    Print,
}

impl AssetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetRole::Preview => "preview",
            AssetRole::Print => "print",
        }
    }
}

impl core::fmt::Display for AssetRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic storage key for an asset.
///
/// Format: `assets/{item_slug}/{locale}_{role}.{format}`. The same logical
/// asset always maps to the same key, which is what makes re-entrant uploads
/// idempotent.
pub fn storage_key(item_slug: &str, locale: Locale, role: AssetRole, format: AssetFormat) -> String {
    format!(
        "assets/{}/{}_{}.{}",
        item_slug,
        locale.as_str(),
        role.as_str(),
        format.as_str()
    )
}

/// A stored binary artifact (image or document).
///
/// The checksum is globally unique and acts as a content-addressed dedup key:
/// uploading identical bytes twice must return the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub variant_id: VariantId,
    pub storage_key: String,
    pub storage_url: String,
    pub mime_type: String,
    pub file_size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// sha-256 of the content, hex-encoded.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_deterministic() {
        let key = storage_key("lew-na-sawannie", Locale::Pl, AssetRole::Preview, AssetFormat::Png);
        assert_eq!(key, "assets/lew-na-sawannie/pl_preview.png");
        assert_eq!(
            key,
            storage_key("lew-na-sawannie", Locale::Pl, AssetRole::Preview, AssetFormat::Png)
        );
    }

    #[test]
    fn storage_key_varies_by_role_and_locale() {
        let a = storage_key("cat", Locale::Pl, AssetRole::Preview, AssetFormat::Png);
        let b = storage_key("cat", Locale::Pl, AssetRole::Print, AssetFormat::Png);
        let c = storage_key("cat", Locale::En, AssetRole::Preview, AssetFormat::Png);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
