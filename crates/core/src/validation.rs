//! Validation of AI-generated page text.
//!
//! Generated content is untrusted input: the provider may return malformed
//! shapes, undersized text, or content that violates the site's child-safety
//! policy. Everything is checked here before anything is persisted.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::variant::Locale;

/// Content policy patterns. Matching text is never publishable.
static FORBIDDEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Violence
        r"(?i)blood|gore|knife|gun|weapon|shooting|murder|kill",
        // Adult content
        r"(?i)nude|naked|erotic|sexy|adult",
        // Drugs
        r"(?i)drug|cocaine|heroin|marijuana|cigarette|alcohol|weed",
        // Political/religious themes
        r"(?i)politics|religion|church|mosque|temple",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("forbidden pattern must compile"))
    .collect()
});

pub const MAX_TITLE_LEN: usize = 255;
pub const MIN_TITLE_LEN: usize = 10;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MIN_KEYWORDS: usize = 3;
pub const MAX_KEYWORDS: usize = 10;
pub const MAX_KEYWORD_LEN: usize = 50;
pub const MAX_META_TITLE_LEN: usize = 70;
pub const MAX_META_DESCRIPTION_LEN: usize = 160;

/// SEO text for one locale, as parsed from the provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
}

/// Machine-readable validation failure class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationCode {
    SchemaError,
    ForbiddenContent,
    TooShort,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::SchemaError => "SCHEMA_ERROR",
            ValidationCode::ForbiddenContent => "FORBIDDEN_CONTENT",
            ValidationCode::TooShort => "TOO_SHORT",
        }
    }
}

impl core::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: ValidationCode,
}

impl ValidationIssue {
    fn new(field: &str, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// True if any error carries the given code.
    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// One-line summary for `last_error` persistence (no content leaked).
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn contains_forbidden(text: &str) -> bool {
    FORBIDDEN_PATTERNS.iter().any(|p| p.is_match(text))
}

/// Validate generated page text against the content policy and SEO budgets.
pub fn validate_page_text(text: &PageText, locale: Locale) -> ValidationReport {
    let mut errors = Vec::new();

    let title_len = text.title.chars().count();
    if title_len < MIN_TITLE_LEN {
        errors.push(ValidationIssue::new(
            "title",
            format!("title too short: {} chars (min: {})", title_len, MIN_TITLE_LEN),
            ValidationCode::TooShort,
        ));
    } else if title_len > MAX_TITLE_LEN {
        errors.push(ValidationIssue::new(
            "title",
            format!("title too long: {} chars (max: {})", title_len, MAX_TITLE_LEN),
            ValidationCode::SchemaError,
        ));
    }

    let desc_len = text.description.chars().count();
    let min_desc = locale.min_description_len();
    if desc_len < min_desc {
        errors.push(ValidationIssue::new(
            "description",
            format!("description too short: {} chars (min: {})", desc_len, min_desc),
            ValidationCode::TooShort,
        ));
    } else if desc_len > MAX_DESCRIPTION_LEN {
        errors.push(ValidationIssue::new(
            "description",
            format!("description too long: {} chars (max: {})", desc_len, MAX_DESCRIPTION_LEN),
            ValidationCode::SchemaError,
        ));
    }

    if text.keywords.len() < MIN_KEYWORDS {
        errors.push(ValidationIssue::new(
            "keywords",
            format!("{} keywords (min: {})", text.keywords.len(), MIN_KEYWORDS),
            ValidationCode::SchemaError,
        ));
    } else if text.keywords.len() > MAX_KEYWORDS {
        errors.push(ValidationIssue::new(
            "keywords",
            format!("{} keywords (max: {})", text.keywords.len(), MAX_KEYWORDS),
            ValidationCode::SchemaError,
        ));
    }
    if text.keywords.iter().any(|k| k.chars().count() > MAX_KEYWORD_LEN) {
        errors.push(ValidationIssue::new(
            "keywords",
            format!("keyword exceeds {} chars", MAX_KEYWORD_LEN),
            ValidationCode::SchemaError,
        ));
    }

    if let Some(meta_title) = &text.meta_title
        && meta_title.chars().count() > MAX_META_TITLE_LEN
    {
        errors.push(ValidationIssue::new(
            "meta_title",
            format!(
                "meta title too long: {} chars (max: {})",
                meta_title.chars().count(),
                MAX_META_TITLE_LEN
            ),
            ValidationCode::SchemaError,
        ));
    }
    if let Some(meta_description) = &text.meta_description
        && meta_description.chars().count() > MAX_META_DESCRIPTION_LEN
    {
        errors.push(ValidationIssue::new(
            "meta_description",
            format!(
                "meta description too long: {} chars (max: {})",
                meta_description.chars().count(),
                MAX_META_DESCRIPTION_LEN
            ),
            ValidationCode::SchemaError,
        ));
    }

    if contains_forbidden(&text.title) {
        errors.push(ValidationIssue::new(
            "title",
            "title contains forbidden content",
            ValidationCode::ForbiddenContent,
        ));
    }
    if contains_forbidden(&text.description) {
        errors.push(ValidationIssue::new(
            "description",
            "description contains forbidden content",
            ValidationCode::ForbiddenContent,
        ));
    }

    ValidationReport { errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_text() -> PageText {
        PageText {
            title: "Lion on the savanna coloring page".to_string(),
            description: "A friendly lion resting under an acacia tree, drawn with bold \
                          simple outlines that are easy for small hands to color in."
                .to_string(),
            keywords: vec![
                "lion".to_string(),
                "savanna".to_string(),
                "animals".to_string(),
            ],
            meta_title: Some("Lion coloring page".to_string()),
            meta_description: Some("Print and color a friendly lion.".to_string()),
        }
    }

    #[test]
    fn accepts_valid_text() {
        let report = validate_page_text(&valid_text(), Locale::En);
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
    }

    #[test]
    fn forbidden_word_is_flagged() {
        let mut text = valid_text();
        text.title = "Lion with a gun coloring page".to_string();
        let report = validate_page_text(&text, Locale::En);
        assert!(!report.is_valid());
        assert!(report.has_code(ValidationCode::ForbiddenContent));
    }

    #[test]
    fn short_description_is_too_short() {
        let mut text = valid_text();
        text.description = "Too short.".to_string();
        let report = validate_page_text(&text, Locale::En);
        assert!(report.has_code(ValidationCode::TooShort));
    }

    #[test]
    fn locale_minimum_differs() {
        let mut text = valid_text();
        // 90 chars: long enough for en (80), too short for pl (100).
        text.description = "x".repeat(90);
        assert!(validate_page_text(&text, Locale::En).is_valid());
        assert!(validate_page_text(&text, Locale::Pl).has_code(ValidationCode::TooShort));
    }

    #[test]
    fn keyword_count_is_enforced() {
        let mut text = valid_text();
        text.keywords.truncate(2);
        let report = validate_page_text(&text, Locale::En);
        assert!(report.has_code(ValidationCode::SchemaError));
    }

    #[test]
    fn meta_budgets_are_enforced() {
        let mut text = valid_text();
        text.meta_title = Some("x".repeat(71));
        text.meta_description = Some("y".repeat(161));
        let report = validate_page_text(&text, Locale::En);
        assert_eq!(
            report
                .errors
                .iter()
                .filter(|e| e.code == ValidationCode::SchemaError)
                .count(),
            2
        );
    }

    #[test]
    fn summary_names_fields_and_codes() {
        let mut text = valid_text();
        text.title = "gun".to_string();
        let report = validate_page_text(&text, Locale::En);
        let summary = report.summary();
        assert!(summary.contains("title: TOO_SHORT"));
        assert!(summary.contains("title: FORBIDDEN_CONTENT"));
    }
}
