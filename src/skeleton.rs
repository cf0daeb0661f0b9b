//! Structural skeleton of an HTML document, used to tell whether a generated
//! page kept the locked layout intact.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector as ScraperSelector};

const LANDMARKS: [&str; 11] = [
    "html", "head", "body", "header", "nav", "main", "section", "article", "aside", "footer",
    "form",
];

const FAQ_PLACEHOLDER: &str = "{{faq}}";
const FAQ_TEXT_MARKERS: [&str; 2] = ["faq", "frequently asked"];

static MEDIA_SELECTOR: Lazy<ScraperSelector> = Lazy::new(|| {
    ScraperSelector::parse("img[src], video[src], source[src], iframe[src]")
        .expect("Failed to compile media selector")
});

static STYLE_SELECTOR: Lazy<ScraperSelector> =
    Lazy::new(|| ScraperSelector::parse("style").expect("Failed to compile style selector"));

static JSON_LD_SELECTOR: Lazy<ScraperSelector> = Lazy::new(|| {
    ScraperSelector::parse(r#"script[type="application/ld+json"]"#)
        .expect("Failed to compile JSON-LD selector")
});

static HEADING_SELECTOR: Lazy<ScraperSelector> = Lazy::new(|| {
    ScraperSelector::parse("h1, h2, h3, h4, h5, h6, summary, dt")
        .expect("Failed to compile heading selector")
});

/// The parts of a document that content injection must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skeleton {
    /// Landmark elements in document order.
    pub landmarks: Vec<String>,
    /// `src` of every embedded media element.
    pub media: BTreeSet<String>,
    pub style_blocks: usize,
    pub json_ld_blocks: usize,
    /// Whether the document has an FAQ-like section.
    pub has_faq: bool,
}

impl Skeleton {
    /// Parses `html` and extracts its skeleton.
    pub fn of(html: &str) -> Self {
        let document = Html::parse_document(html);

        let landmarks = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(|element| element.value().name())
            .filter(|name| LANDMARKS.contains(name))
            .map(str::to_owned)
            .collect();

        let media = document
            .select(&MEDIA_SELECTOR)
            .filter_map(|element| element.value().attr("src"))
            .map(|src| src.trim().to_owned())
            .filter(|src| !src.is_empty())
            .collect();

        Self {
            landmarks,
            media,
            style_blocks: document.select(&STYLE_SELECTOR).count(),
            json_ld_blocks: document.select(&JSON_LD_SELECTOR).count(),
            has_faq: has_faq_section(html, &document),
        }
    }
}

/// Detects an FAQ placeholder, an element whose `id` or `class` mentions
/// "faq", or a heading naming frequently asked questions.
fn has_faq_section(html: &str, document: &Html) -> bool {
    if html.to_lowercase().contains(FAQ_PLACEHOLDER) {
        return true;
    }

    let marked_by_attribute = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .any(|element| {
            let value = element.value();
            value
                .id()
                .into_iter()
                .chain(value.classes())
                .any(|name| name.to_lowercase().contains("faq"))
        });

    marked_by_attribute
        || document.select(&HEADING_SELECTOR).any(|heading| {
            let text = heading.text().collect::<String>().to_lowercase();
            FAQ_TEXT_MARKERS.iter().any(|marker| text.contains(marker))
        })
}

/// A structural difference between a locked layout and a generated page.
#[derive(Debug, Clone, PartialEq)]
pub enum Drift {
    /// Too many layout landmarks have no counterpart in the page.
    MissingLandmarks { missing: usize, total: usize },
    /// An embedded media reference disappeared.
    MissingMedia(String),
    /// Fewer `<style>` blocks than the layout had.
    MissingStyles { expected: usize, found: usize },
}

impl fmt::Display for Drift {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::MissingLandmarks { missing, total } => write!(
                formatter,
                "structure drifted: {missing} of {total} layout landmarks missing"
            ),
            Drift::MissingMedia(src) => write!(formatter, "media reference removed: {src}"),
            Drift::MissingStyles { expected, found } => write!(
                formatter,
                "style blocks removed: expected {expected}, found {found}"
            ),
        }
    }
}

/// Compares a page against the layout it was generated from.
///
/// The layout's landmark sequence must survive as a subsequence of the
/// page's, with at most `tolerance` (a ratio) of landmarks unmatched. Added
/// elements are allowed since placeholders expand into markup.
pub fn detect_drift(layout: &Skeleton, page: &Skeleton, tolerance: f64) -> Option<Drift> {
    let total = layout.landmarks.len();
    if total > 0 {
        let matched = common_subsequence_len(&layout.landmarks, &page.landmarks);
        let missing = total - matched;
        if missing as f64 / total as f64 > tolerance {
            return Some(Drift::MissingLandmarks { missing, total });
        }
    }

    if let Some(src) = layout.media.difference(&page.media).next() {
        return Some(Drift::MissingMedia(src.clone()));
    }

    if page.style_blocks < layout.style_blocks {
        return Some(Drift::MissingStyles {
            expected: layout.style_blocks,
            found: page.style_blocks,
        });
    }

    None
}

fn common_subsequence_len(left: &[String], right: &[String]) -> usize {
    let mut previous = vec![0_usize; right.len() + 1];

    for left_tag in left {
        let mut current = Vec::with_capacity(right.len() + 1);
        current.push(0_usize);
        for (column, right_tag) in right.iter().enumerate() {
            let value = if left_tag == right_tag {
                previous.get(column).copied().unwrap_or_default() + 1
            } else {
                let above = previous.get(column + 1).copied().unwrap_or_default();
                let before = current.last().copied().unwrap_or_default();
                above.max(before)
            };
            current.push(value);
        }
        previous = current;
    }

    previous.last().copied().unwrap_or_default()
}
