//! Catalog items and their moderation/publication state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{CategoryId, ItemId};

/// Moderation outcome for an item's text content.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    /// Not yet checked.
    Pending,
    /// Explicitly cleared by the moderation provider.
    Approved,
    /// Rejected by a human.
    Rejected,
    /// Flagged (or the check itself failed); requires human review.
    NeedsReview,
}

impl ModerationStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, ModerationStatus::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
            ModerationStatus::NeedsReview => "needs_review",
        }
    }
}

impl core::fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ModerationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ModerationStatus::Pending),
            "approved" => Ok(ModerationStatus::Approved),
            "rejected" => Ok(ModerationStatus::Rejected),
            "needs_review" => Ok(ModerationStatus::NeedsReview),
            other => Err(DomainError::validation(format!("unknown moderation status: {other}"))),
        }
    }
}

/// A content unit: one coloring-page topic.
///
/// Created by catalog seeding; the pipeline mutates only the moderation
/// fields (moderation step) and the publication flag (publish job). Items are
/// never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub slug: String,
    pub title_pl: String,
    pub title_en: String,
    pub category_id: CategoryId,
    /// Generation prompt for the image step.
    pub prompt: Option<String>,
    pub keywords: Vec<String>,
    pub age_min: i32,
    pub age_max: i32,
    /// Difficulty on a 1–3 scale.
    pub difficulty: i32,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub moderation_status: ModerationStatus,
    pub moderation_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// All text subject to moderation, concatenated.
    pub fn moderation_text(&self) -> String {
        let mut parts = vec![self.title_pl.as_str(), self.title_en.as_str()];
        if let Some(prompt) = self.prompt.as_deref() {
            parts.push(prompt);
        }
        parts
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mark the item as cleared by moderation.
    pub fn approve(&mut self, now: DateTime<Utc>) {
        self.moderation_status = ModerationStatus::Approved;
        self.moderation_note = None;
        self.updated_at = now;
    }

    /// Route the item to human review. Never transitions back to `approved`.
    pub fn flag(&mut self, note: impl Into<String>, now: DateTime<Utc>) {
        self.moderation_status = ModerationStatus::NeedsReview;
        self.moderation_note = Some(note.into());
        self.updated_at = now;
    }

    /// Publish the item.
    ///
    /// Invariant: a published item must be moderation-approved.
    pub fn publish(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.moderation_status.is_approved() {
            return Err(DomainError::invariant(format!(
                "cannot publish item {} with moderation status {}",
                self.id, self.moderation_status
            )));
        }
        self.is_published = true;
        self.published_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_item(status: ModerationStatus) -> Item {
        let now = Utc::now();
        Item {
            id: ItemId::new(),
            slug: "lew-na-sawannie".to_string(),
            title_pl: "Lew na sawannie".to_string(),
            title_en: "Lion on the savanna".to_string(),
            category_id: CategoryId::new(),
            prompt: Some("a friendly lion".to_string()),
            keywords: vec!["lion".to_string()],
            age_min: 3,
            age_max: 10,
            difficulty: 1,
            is_published: false,
            published_at: None,
            moderation_status: status,
            moderation_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn publish_requires_approval() {
        let mut item = test_item(ModerationStatus::Pending);
        assert!(item.publish(Utc::now()).is_err());
        assert!(!item.is_published);

        item.approve(Utc::now());
        item.publish(Utc::now()).unwrap();
        assert!(item.is_published);
        assert!(item.published_at.is_some());
    }

    #[test]
    fn flag_overwrites_note_and_status() {
        let mut item = test_item(ModerationStatus::Pending);
        item.flag("flagged by provider", Utc::now());
        assert_eq!(item.moderation_status, ModerationStatus::NeedsReview);
        assert_eq!(item.moderation_note.as_deref(), Some("flagged by provider"));
    }

    #[test]
    fn moderation_text_joins_non_empty_parts() {
        let mut item = test_item(ModerationStatus::Pending);
        item.prompt = None;
        assert_eq!(item.moderation_text(), "Lew na sawannie Lion on the savanna");
    }
}
