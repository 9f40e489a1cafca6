//! Text-generation step.
//!
//! Gated on approved moderation. Generates SEO text for both locales,
//! validates each against the content policy, dedupes by content hash, and
//! only then writes the variant pair in a single transaction, so a failure
//! on either locale leaves no partial rows behind.

use serde_json::json;
use tracing::{debug, info};

use colorforge_ai::{AiClient, ChatRequest};
use colorforge_core::{
    AssetFormat, Locale, PageText, Variant, content_hash, validate_page_text,
};
use colorforge_retry::with_retry;
use colorforge_store::{NewVariant, VariantStore, VariantText};

use crate::context::StepContext;
use crate::error::StepError;

/// Generate (or supersede, for regeneration jobs) the item's variant pair.
///
/// Returns the checkpoint payload recorded in `job_steps`.
pub async fn run(
    ctx: &mut StepContext<'_>,
    supersede: bool,
) -> Result<serde_json::Value, StepError> {
    if !ctx.item.moderation_status.is_approved() {
        return Err(StepError::NotApproved);
    }

    let existing = ctx.services.store.variants_for_item(ctx.item.id).await?;

    // Idempotent re-entry: a plain generate run that already has its pair
    // keeps the existing rows.
    if !supersede
        && Locale::ALL
            .iter()
            .all(|locale| existing.iter().any(|v| v.locale == *locale))
    {
        debug!(item_id = %ctx.item.id, "variants already exist, reusing");
        ctx.variants = existing;
        return Ok(json!({
            "reused": true,
            "variant_ids": ctx.variants.iter().map(|v| v.id).collect::<Vec<_>>(),
        }));
    }

    let existing_hashes: Vec<String> =
        existing.iter().map(|v| v.content_hash.clone()).collect();

    let mut generated = Vec::with_capacity(Locale::ALL.len());
    for locale in Locale::ALL {
        let text = generate_for_locale(ctx, locale, &existing_hashes).await?;
        generated.push((locale, text));
    }

    if supersede && !existing.is_empty() {
        // Regeneration supersedes in place: same rows, new text, so
        // canonical URLs and asset references stay valid.
        for (locale, text) in &generated {
            let current = existing
                .iter()
                .find(|v| v.locale == *locale)
                .ok_or(StepError::MissingVariant)?;
            let hash = content_hash(format!("{}{}", text.title, text.description));
            ctx.services
                .store
                .update_variant_text(
                    current.id,
                    &VariantText {
                        title: text.title.clone(),
                        description: text.description.clone(),
                        meta_title: text.meta_title.clone(),
                        meta_description: text.meta_description.clone(),
                        content_hash: hash,
                    },
                )
                .await?;
        }
        ctx.load_variants().await?;
        info!(item_id = %ctx.item.id, "variants superseded");
        return Ok(json!({
            "superseded": true,
            "variant_ids": ctx.variants.iter().map(|v| v.id).collect::<Vec<_>>(),
        }));
    }

    let new_variants: Vec<NewVariant> = generated
        .iter()
        .map(|(locale, text)| NewVariant {
            item_id: ctx.item.id,
            locale: *locale,
            format: AssetFormat::Png,
            title: text.title.clone(),
            description: text.description.clone(),
            canonical_url: Variant::canonical_url_for(&ctx.item.slug, *locale),
            meta_title: text.meta_title.clone(),
            meta_description: text.meta_description.clone(),
            content_hash: content_hash(format!("{}{}", text.title, text.description)),
        })
        .collect();

    ctx.variants = ctx.services.store.insert_variants(&new_variants).await?;
    info!(item_id = %ctx.item.id, count = ctx.variants.len(), "variants created");

    Ok(json!({
        "variant_ids": ctx.variants.iter().map(|v| v.id).collect::<Vec<_>>(),
    }))
}

/// Generate and validate text for one locale, regenerating (bounded) when
/// the content hash collides with an existing variant.
async fn generate_for_locale(
    ctx: &StepContext<'_>,
    locale: Locale,
    existing_hashes: &[String],
) -> Result<PageText, StepError> {
    let title = match locale {
        Locale::Pl => &ctx.item.title_pl,
        Locale::En => &ctx.item.title_en,
    };
    let prompt = build_prompt(title, &ctx.item.keywords, locale);
    let regen_budget = ctx.services.config.text_regen_attempts;

    let mut regen_attempts = 0;
    loop {
        let response = with_retry(&ctx.services.config.retry, "ai.chat", || {
            ctx.services.ai.chat(
                ChatRequest::new(prompt.clone())
                    .with_max_tokens(ctx.services.config.max_text_tokens),
            )
        })
        .await
        .map_err(|e| StepError::Ai(e.to_string()))?;

        let text: PageText = serde_json::from_str(&response.content)
            .map_err(|e| StepError::Validation(format!("malformed provider JSON: {e}")))?;

        let report = validate_page_text(&text, locale);
        if !report.is_valid() {
            return Err(StepError::Validation(report.summary()));
        }

        let hash = content_hash(format!("{}{}", text.title, text.description));
        if existing_hashes.contains(&hash) {
            regen_attempts += 1;
            info!(
                item_id = %ctx.item.id,
                locale = %locale,
                attempt = regen_attempts,
                "duplicate content detected, regenerating"
            );
            if regen_attempts > regen_budget {
                return Err(StepError::DuplicateContent(regen_attempts));
            }
            continue;
        }

        return Ok(text);
    }
}

fn build_prompt(title: &str, keywords: &[String], locale: Locale) -> String {
    let language = match locale {
        Locale::Pl => "Polish",
        Locale::En => "English",
    };
    let style = match locale {
        Locale::Pl => "Naturalny, rodzinny, zachecajacy. Unikaj powtorzen.",
        Locale::En => "Simple, engaging, family-friendly. Avoid repetition.",
    };
    let keyword_list = if keywords.is_empty() {
        "coloring, drawing, kids".to_string()
    } else {
        keywords.join(", ")
    };

    format!(
        "You are a SEO content writer for a Polish coloring pages website.\n\n\
         Generate SEO content for a coloring page in {language}.\n\n\
         ## Input\n\
         - Title: {title}\n\
         - Category: coloring page\n\
         - Keywords: {keyword_list}\n\n\
         ## Requirements\n\
         1. title: 10-255 characters, engaging\n\
         2. description: 100-300 characters, describes the coloring page\n\
         3. meta_title: max 70 characters\n\
         4. meta_description: max 160 characters\n\
         5. keywords: 3-10 relevant keywords\n\
         6. Language: {language}\n\n\
         ## Style\n\
         - {style}\n\n\
         ## Output\n\
         Return JSON:\n\
         {{\"title\": \"string\", \"description\": \"string\", \"meta_title\": \"string\", \
         \"meta_description\": \"string\", \"keywords\": [\"string\"]}}"
    )
}
