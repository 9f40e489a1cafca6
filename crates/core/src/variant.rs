//! Locale/format variants of a catalog item and their SEO text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ItemId, VariantId};

/// Supported content locales.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    Pl,
    En,
}

impl Locale {
    /// Both locales, in the order a generation run produces them.
    pub const ALL: [Locale; 2] = [Locale::Pl, Locale::En];

    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Pl => "pl",
            Locale::En => "en",
        }
    }

    /// Minimum SEO description length for this locale, in characters.
    pub fn min_description_len(&self) -> usize {
        match self {
            Locale::Pl => 100,
            Locale::En => 80,
        }
    }
}

impl core::fmt::Display for Locale {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Locale {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pl" => Ok(Locale::Pl),
            "en" => Ok(Locale::En),
            other => Err(crate::error::DomainError::validation(format!("unknown locale: {other}"))),
        }
    }
}

/// Rendering format of a variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Svg,
    Png,
    Html,
}

impl AssetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetFormat::Svg => "svg",
            AssetFormat::Png => "png",
            AssetFormat::Html => "html",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AssetFormat::Svg => "image/svg+xml",
            AssetFormat::Png => "image/png",
            AssetFormat::Html => "text/html",
        }
    }
}

impl core::fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AssetFormat {
    type Err = crate::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "svg" => Ok(AssetFormat::Svg),
            "png" => Ok(AssetFormat::Png),
            "html" => Ok(AssetFormat::Html),
            other => {
                Err(crate::error::DomainError::validation(format!("unknown asset format: {other}")))
            }
        }
    }
}

/// A locale+format rendering of an item with its SEO fields.
///
/// Created by the text-generation step. A `generate` run produces exactly one
/// variant per locale; `regenerate` supersedes the existing row in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub item_id: ItemId,
    pub locale: Locale,
    pub format: AssetFormat,
    pub title: String,
    pub description: String,
    pub canonical_url: String,
    /// Meta title, at most 70 characters.
    pub meta_title: Option<String>,
    /// Meta description, at most 160 characters.
    pub meta_description: Option<String>,
    /// Public URL of the social/preview image, set by the upload step.
    pub og_image: Option<String>,
    /// sha-256 of title+description, used for duplicate detection.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Canonical URL for an item's page in a given locale.
    pub fn canonical_url_for(slug: &str, locale: Locale) -> String {
        format!("/kolorowanki/{}/{}", slug, locale.as_str())
    }
}
