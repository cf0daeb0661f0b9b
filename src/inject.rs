//! The inject module fills a locked layout with content for one keyword and
//! checks that the returned page kept the layout's structure.

use std::collections::BTreeSet;

use llm::chat::ChatMessage;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::completion::{CompletionContext, complete};
use crate::constants::{
    CONTENT_PROMPT, DEFAULT_DRIFT_TOLERANCE, DEFAULT_WORD_TARGET, JSON_LD_BLOCK, MIN_PAGE_LENGTH,
    SCHEMA_FORBIDDEN_RULE, SCHEMA_REQUIRED_RULE,
};
use crate::error::{Error, Result};
use crate::keywords::KeywordRecord;
use crate::layout::LayoutDocument;
use crate::skeleton::{Skeleton, detect_drift};
use crate::{Language, SeoMode};

static JSON_LD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(JSON_LD_BLOCK).expect("Failed to compile JSON_LD_BLOCK regex"));

static LEFTOVER_PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{[A-Z0-9_]+\}\}").expect("Failed to compile placeholder regex")
});

const UNKNOWN_LOCATION: &str = "not specified";

/// Content parameters shared by every page of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentSettings {
    pub language: Language,
    pub seo_mode: SeoMode,
    pub country: Option<String>,
    /// Run-level city, used for records without their own city.
    pub city: Option<String>,
    /// Approximate number of words of body copy.
    pub word_target: u32,
    /// Share of layout landmarks a page may lose before it is rejected.
    pub drift_tolerance: f64,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            language: Language::default(),
            seo_mode: SeoMode::default(),
            country: None,
            city: None,
            word_target: DEFAULT_WORD_TARGET,
            drift_tolerance: DEFAULT_DRIFT_TOLERANCE,
        }
    }
}

/// A layout together with its precomputed skeleton.
#[derive(Clone, Debug)]
pub struct LockedLayout {
    document: LayoutDocument,
    skeleton: Skeleton,
    /// Trimmed bodies of the JSON-LD blocks the layout ships with.
    json_ld: BTreeSet<String>,
}

impl LockedLayout {
    pub fn new(document: LayoutDocument) -> Self {
        let skeleton = Skeleton::of(document.as_str());
        let json_ld = json_ld_bodies(document.as_str())
            .map(str::to_owned)
            .collect();
        Self {
            document,
            skeleton,
            json_ld,
        }
    }

    /// Whether `body` is one of the layout's own JSON-LD blocks.
    fn owns_json_ld(&self, body: &str) -> bool {
        self.json_ld.contains(body.trim())
    }

    pub fn document(&self) -> &LayoutDocument {
        &self.document
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// Whether pages of this layout carry structured data.
    pub fn has_faq(&self) -> bool {
        self.skeleton.has_faq
    }
}

/// Generates the page for one keyword record.
///
/// # Errors
///
/// Returns [`Error::Authentication`] if the provider rejects the credential
/// or request, and [`Error::PageGeneration`] if the call fails or the page
/// does not pass validation.
pub async fn inject(
    layout: &LockedLayout,
    record: &KeywordRecord,
    settings: &ContentSettings,
    ctx: &CompletionContext<'_>,
) -> Result<String> {
    let prompt = build_prompt(layout, record, settings);
    let messages = vec![ChatMessage::user().content(prompt).build()];

    debug!("Generating page for {}", record.label());

    let response = complete(&messages, ctx).await.map_err(|failure| {
        if failure.fatal {
            Error::Authentication(failure.message)
        } else {
            page_error(record, failure.message)
        }
    })?;

    validate_page(layout, record, &response, settings.drift_tolerance)
}

/// Builds the content instruction for one record: the full layout followed
/// by the constraints and the page parameters.
pub fn build_prompt(layout: &LockedLayout, record: &KeywordRecord, settings: &ContentSettings) -> String {
    let city = record.effective_city(settings.city.as_deref());
    let country = settings
        .country
        .as_deref()
        .map(str::trim)
        .filter(|country| !country.is_empty());

    let h1_city = match city {
        Some(city) if settings.seo_mode != SeoMode::Global => format!(" and the city \"{city}\""),
        _ => String::new(),
    };

    let schema_rule = if layout.has_faq() {
        SCHEMA_REQUIRED_RULE
    } else {
        SCHEMA_FORBIDDEN_RULE
    };

    let instructions = CONTENT_PROMPT
        .replace("{h1_city}", &h1_city)
        .replace("{seo_rule}", &seo_rule(settings.seo_mode, city, country))
        .replace("{schema_rule}", schema_rule)
        .replace("{words}", &settings.word_target.to_string())
        .replace("{language}", &settings.language.to_string())
        .replace("{country}", country.unwrap_or(UNKNOWN_LOCATION))
        .replace("{city}", city.unwrap_or(UNKNOWN_LOCATION))
        .replace("{keyword}", &record.keyword);

    format!("{}{instructions}", layout.document().as_str())
}

fn seo_rule(mode: SeoMode, city: Option<&str>, country: Option<&str>) -> String {
    let place = match (city, country) {
        (Some(city), Some(country)) => format!("{city}, {country}"),
        (Some(place), None) | (None, Some(place)) => place.to_owned(),
        (None, None) => "the target area".to_owned(),
    };

    match mode {
        SeoMode::Local => format!(
            "Local SEO: use local-intent phrasing (\"in {place}\", \"near me\") and mention {place} naturally in headings and body copy."
        ),
        SeoMode::Global => "Global SEO: target broad, non-geographic search intent; do not localise the copy.".to_owned(),
        SeoMode::Hybrid => format!(
            "Hybrid SEO: cover the broad topic first, then add local-intent phrasing for {place} in at least one section."
        ),
    }
}

/// Checks a model response against its layout and returns the final page.
///
/// # Errors
///
/// Returns [`Error::PageGeneration`] if the page is implausibly short, has
/// drifted from the layout's structure, or lacks the structured data an FAQ
/// layout requires.
pub fn validate_page(
    layout: &LockedLayout,
    record: &KeywordRecord,
    page: &str,
    drift_tolerance: f64,
) -> Result<String> {
    let length = page.chars().count();
    if length < MIN_PAGE_LENGTH {
        return Err(page_error(
            record,
            format!("response has {length} characters, expected at least {MIN_PAGE_LENGTH}"),
        ));
    }

    let skeleton = Skeleton::of(page);
    if let Some(drift) = detect_drift(layout.skeleton(), &skeleton, drift_tolerance) {
        return Err(page_error(record, drift.to_string()));
    }

    let page = if layout.has_faq() {
        if !json_ld_bodies(page).any(|body| {
            !layout.owns_json_ld(body) && serde_json::from_str::<serde_json::Value>(body).is_ok()
        }) {
            return Err(page_error(
                record,
                "FAQ layout but no new valid JSON-LD block in the page".to_string(),
            ));
        }
        page.to_owned()
    } else if skeleton.json_ld_blocks > layout.skeleton().json_ld_blocks {
        debug!("Removing structured data the layout has no FAQ for: {}", record.label());
        JSON_LD_REGEX
            .replace_all(page, |captures: &regex::Captures<'_>| {
                let kept = captures
                    .get(1)
                    .is_some_and(|body| layout.owns_json_ld(body.as_str()));
                match captures.get(0) {
                    Some(block) if kept => block.as_str().to_owned(),
                    _ => String::new(),
                }
            })
            .into_owned()
    } else {
        page.to_owned()
    };

    if let Some(placeholder) = LEFTOVER_PLACEHOLDER_REGEX.find(&page) {
        warn!(
            "Page for {} still contains placeholder {}",
            record.label(),
            placeholder.as_str()
        );
    }

    Ok(page)
}

fn json_ld_bodies(html: &str) -> impl Iterator<Item = &str> {
    JSON_LD_REGEX
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|body| body.as_str().trim())
}

fn page_error(record: &KeywordRecord, reason: String) -> Error {
    Error::PageGeneration {
        keyword: record.label(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAQ_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><title>{{TITLE}}</title>
<meta name="description" content="{{META_DESCRIPTION}}">
<style>body { font-family: sans-serif; margin: 0; } .hero { padding: 4rem 2rem; }</style></head>
<body>
<header><nav><a href="/">Home</a> <a href="/contact">Contact</a></nav></header>
<main>
<section class="hero"><h1>{{H1}}</h1><p>{{INTRO}}</p><img src="/img/hero.jpg" alt="hero"></section>
<section>{{SECTION1}}</section>
<section id="faq">{{FAQ}}</section>
</main>
<footer><a class="button" href="/contact">{{CTA}}</a></footer>
{{SCHEMA}}
</body></html>"#;

    const SCHEMA: &str = r#"<script type="application/ld+json">{"@context":"https://schema.org","@type":"FAQPage","mainEntity":[]}</script>"#;

    fn record() -> KeywordRecord {
        KeywordRecord::new("plumber", Some("Austin")).expect("valid record")
    }

    fn no_faq_layout() -> String {
        FAQ_LAYOUT
            .replace(r#"<section id="faq">{{FAQ}}</section>"#, "")
            .replace("{{SCHEMA}}", "")
    }

    fn fill(layout: &str, schema: &str) -> String {
        layout
            .replace("{{TITLE}}", "Plumber in Austin")
            .replace("{{META_DESCRIPTION}}", "Trusted plumbers in Austin.")
            .replace("{{H1}}", "Plumber in Austin")
            .replace("{{INTRO}}", &"Fast, licensed plumbing across Austin. ".repeat(5))
            .replace("{{SECTION1}}", "<h2>Services</h2><p>Leaks, drains and heaters.</p>")
            .replace("{{FAQ}}", "<h3>Do you work weekends?</h3><p>Yes.</p>")
            .replace("{{CTA}}", "Call now")
            .replace("{{SCHEMA}}", schema)
    }

    #[test]
    fn test_prompt_embeds_layout_and_parameters() {
        let layout = LockedLayout::new(LayoutDocument::new(FAQ_LAYOUT));
        let settings = ContentSettings {
            language: Language::Spanish,
            country: Some("USA".to_string()),
            word_target: 600,
            ..Default::default()
        };

        let prompt = build_prompt(&layout, &record(), &settings);

        assert!(prompt.starts_with(FAQ_LAYOUT));
        assert!(prompt.contains("Keyword: plumber"));
        assert!(prompt.contains("City: Austin"));
        assert!(prompt.contains("Country: USA"));
        assert!(prompt.contains("Language: Spanish"));
        assert!(prompt.contains("About 600 words"));
        assert!(prompt.contains("Local SEO"));
        assert!(prompt.contains("in Austin, USA"));
        assert!(prompt.contains("FAQPage"));
    }

    #[test]
    fn test_prompt_forbids_schema_without_faq() {
        let layout = LockedLayout::new(LayoutDocument::new(no_faq_layout()));
        let settings = ContentSettings {
            seo_mode: SeoMode::Global,
            ..Default::default()
        };

        let prompt = build_prompt(&layout, &record(), &settings);

        assert!(prompt.contains("Do NOT add any JSON-LD"));
        assert!(!prompt.contains("FAQPage"));
        assert!(prompt.contains("Global SEO"));
        assert!(!prompt.contains("and the city"));
    }

    #[test]
    fn test_prompt_uses_run_city_fallback() {
        let layout = LockedLayout::new(LayoutDocument::new(FAQ_LAYOUT));
        let settings = ContentSettings {
            seo_mode: SeoMode::Hybrid,
            city: Some("Dallas".to_string()),
            ..Default::default()
        };
        let record = KeywordRecord::new("roofer", None).expect("valid record");

        let prompt = build_prompt(&layout, &record, &settings);

        assert!(prompt.contains("City: Dallas"));
        assert!(prompt.contains("Country: not specified"));
        assert!(prompt.contains("Hybrid SEO"));
    }

    #[test]
    fn test_validate_accepts_filled_faq_page() {
        let layout = LockedLayout::new(LayoutDocument::new(FAQ_LAYOUT));
        let page = fill(FAQ_LAYOUT, SCHEMA);
        assert_eq!(
            validate_page(&layout, &record(), &page, 0.1).expect("valid page"),
            page
        );
    }

    #[test]
    fn test_validate_rejects_short_page() {
        let layout = LockedLayout::new(LayoutDocument::new(FAQ_LAYOUT));
        let result = validate_page(&layout, &record(), "<p>stub</p>", 0.1);
        assert!(matches!(
            result,
            Err(Error::PageGeneration { ref keyword, .. }) if keyword == "plumber (Austin)"
        ));
    }

    #[test]
    fn test_validate_requires_schema_for_faq_layout() {
        let layout = LockedLayout::new(LayoutDocument::new(FAQ_LAYOUT));
        let missing = fill(FAQ_LAYOUT, "");
        let invalid = fill(
            FAQ_LAYOUT,
            r#"<script type="application/ld+json">{ not json</script>"#,
        );
        assert!(validate_page(&layout, &record(), &missing, 0.1).is_err());
        assert!(validate_page(&layout, &record(), &invalid, 0.1).is_err());
    }

    #[test]
    fn test_validate_strips_fabricated_schema() {
        let layout_html = no_faq_layout();
        let layout = LockedLayout::new(LayoutDocument::new(layout_html.clone()));
        let page = fill(&layout_html, "").replace("</body>", &format!("{SCHEMA}\n</body>"));

        let validated = validate_page(&layout, &record(), &page, 0.1).expect("valid page");

        assert!(!validated.contains("application/ld+json"));
        assert!(validated.contains("Plumber in Austin"));
    }

    #[test]
    fn test_validate_keeps_layout_structured_data() {
        let organization = r#"<script type="application/ld+json">{"@context":"https://schema.org","@type":"Organization","name":"Acme Plumbing"}</script>"#;
        let layout_html = no_faq_layout().replace("</head>", &format!("{organization}</head>"));
        let layout = LockedLayout::new(LayoutDocument::new(layout_html.clone()));
        let page = fill(&layout_html, "").replace("</body>", &format!("{SCHEMA}\n</body>"));

        let validated = validate_page(&layout, &record(), &page, 0.1).expect("valid page");

        assert!(validated.contains(r#""@type":"Organization""#));
        assert!(!validated.contains("FAQPage"));
    }

    #[test]
    fn test_validate_requires_new_schema_for_faq_layout() {
        let organization = r#"<script type="application/ld+json">{"@type":"Organization","name":"Acme"}</script>"#;
        let layout_html = FAQ_LAYOUT.replace("</head>", &format!("{organization}</head>"));
        let layout = LockedLayout::new(LayoutDocument::new(layout_html.clone()));

        let copied_only = fill(&layout_html, "");
        let answered = fill(&layout_html, SCHEMA);

        assert!(validate_page(&layout, &record(), &copied_only, 0.1).is_err());
        assert!(validate_page(&layout, &record(), &answered, 0.1).is_ok());
    }

    #[test]
    fn test_validate_counts_characters_not_bytes() {
        let layout = LockedLayout::new(LayoutDocument::new(no_faq_layout()));
        // 300 Hangul syllables: 900 bytes but only 300 characters.
        let page = format!("<html><body>{}</body></html>", "가".repeat(300));

        let result = validate_page(&layout, &record(), &page, 0.1);

        assert!(matches!(
            result,
            Err(Error::PageGeneration { ref reason, .. }) if reason.contains("characters")
        ));
    }

    #[test]
    fn test_validate_rejects_structural_drift() {
        let layout = LockedLayout::new(LayoutDocument::new(FAQ_LAYOUT));
        let page = fill(FAQ_LAYOUT, SCHEMA)
            .replace(r#"<header><nav><a href="/">Home</a> <a href="/contact">Contact</a></nav></header>"#, "")
            .replace("<footer>", "<div>")
            .replace("</footer>", "</div>");

        let result = validate_page(&layout, &record(), &page, 0.1);

        assert!(matches!(
            result,
            Err(Error::PageGeneration { ref reason, .. }) if reason.contains("landmarks missing")
        ));
    }
}
