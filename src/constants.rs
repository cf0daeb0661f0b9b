pub const MODEL_API_KEY_ENV_NAME: &str = "SITEMORPH_API_KEY";

/// Responses shorter than this are treated as truncated or refused.
pub const MIN_LAYOUT_LENGTH: usize = 500;
pub const MIN_PAGE_LENGTH: usize = 500;

pub const DEFAULT_WORD_TARGET: u32 = 800;
pub const DEFAULT_DRIFT_TOLERANCE: f64 = 0.1;
pub const MAX_COMPLETION_TOKENS: u32 = 8000;

pub const LAYOUT_TEMPERATURE: f32 = 0.1;
pub const CONTENT_TEMPERATURE: f32 = 0.4;

pub const STYLESHEET_FILE_NAME: &str = "style.css";

pub const PLACEHOLDERS: [&str; 9] = [
    "{{TITLE}}",
    "{{META_DESCRIPTION}}",
    "{{H1}}",
    "{{INTRO}}",
    "{{SECTION1}}",
    "{{SECTION2}}",
    "{{FAQ}}",
    "{{CTA}}",
    "{{SCHEMA}}",
];

pub(crate) const THINK_STRIPPER: &str = r"<think>[\s\S]*</think>\s*";

pub(crate) const CODE_FENCE_STRIPPER: &str = r"(?m)^\s*```[a-zA-Z]*\s*$";

pub(crate) const JSON_LD_BLOCK: &str =
    r#"(?is)<script[^>]*type\s*=\s*["']?application/ld\+json["']?[^>]*>(.*?)</script>\s*"#;

pub(crate) const LAYOUT_PROMPT: &str = r#"
Convert the homepage screenshot(s) above into a FULL HTML + CSS document.
This is a LOCKED MASTER TEMPLATE that will be reused for many pages.

Rules:
- Use semantic HTML5 (header, nav, main, section, footer).
- Use embedded CSS only, no external stylesheets or frameworks.
- Mobile and desktop responsive, with at least one media query for small screens.
- Keep layout, colors, fonts, spacing and images the same as the screenshot.
- Insert these placeholders instead of real content:
  {placeholders}
- Do not invent any real content, names, prices or claims.
{split_rule}
Return ONLY the HTML document."#;

pub(crate) const SPLIT_STYLESHEET_RULE: &str =
    "- Put ALL CSS into a single <style> block inside <head>.";

pub(crate) const CONTENT_PROMPT: &str = r#"

The HTML above is a LOCKED TEMPLATE. Fill it in for the page described below.

Non-negotiable rules:
- Do NOT change the HTML structure: keep every element, its order and its nesting.
- Do NOT change CSS: keep every <style> block and every style attribute as is.
- Keep every image, video and media reference unchanged.
- Keep every link, button, form and call-to-action element.
- Only replace text content and placeholder tokens such as {{H1}}.

SEO requirements:
- Write a meta title and a meta description suitable for a search results listing.
- The H1 must include the keyword{h1_city}.
- {seo_rule}
- About {words} words of body copy, NLP optimized, no keyword stuffing.
- {schema_rule}

Keyword: {keyword}
City: {city}
Country: {country}
Language: {language}

Return the FULL HTML document only."#;

pub(crate) const SCHEMA_REQUIRED_RULE: &str = "The template has an FAQ section: fill it with 3-5 questions and answers and add exactly one <script type=\"application/ld+json\"> block with FAQPage structured data matching them.";

pub(crate) const SCHEMA_FORBIDDEN_RULE: &str =
    "Do NOT add any JSON-LD or other structured data block.";
