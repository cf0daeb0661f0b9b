//! Filesystem- and URL-safe tokens for page names.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::keywords::KeywordRecord;

static NON_ALPHANUMERIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("Failed to compile slug regex"));

const SEPARATOR: char = '-';
const EMPTY_SLUG_FALLBACK: &str = "page";

/// Lowercases `text`, collapses every run of characters outside `[a-z0-9]`
/// into a single `-` and strips leading and trailing separators.
///
/// The result is not unique: callers combine several slugs into a composite
/// key when they need distinct names.
pub fn slugify(text: &str) -> String {
    NON_ALPHANUMERIC_RUN
        .replace_all(&text.to_lowercase(), "-")
        .trim_matches(SEPARATOR)
        .to_owned()
}

/// Derives the archive file name of a page.
///
/// The composite key is keyword, then the effective city (the record's own
/// city, else `fallback_city`), then the origin template's file stem when
/// the page comes from a multi-file bundle.
pub fn page_filename(
    record: &KeywordRecord,
    fallback_city: Option<&str>,
    origin_stem: Option<&str>,
) -> String {
    let keyword = slugify(&record.keyword);
    let mut parts = vec![if keyword.is_empty() {
        EMPTY_SLUG_FALLBACK.to_owned()
    } else {
        keyword
    }];

    parts.extend(
        [record.effective_city(fallback_city), origin_stem]
            .into_iter()
            .flatten()
            .map(slugify)
            .filter(|part| !part.is_empty()),
    );

    format!("{}.html", parts.join("-"))
}
