//! The sitemorph library builds keyword landing pages from a locked homepage
//! layout: the layout is derived from screenshots (or taken from a supplied
//! template), then an LLM fills it in once per keyword and the pages are
//! packed into a ZIP archive.

pub mod archive;
pub mod completion;
pub mod constants;
pub mod error;
pub mod inject;
pub mod keywords;
pub mod layout;
pub mod pipeline;
pub mod skeleton;
pub mod slug;
pub mod template;

/// Enum representing the layout of pasted keyword lines.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub enum PastedFormat {
    /// One keyword per line.
    #[default]
    Keyword,
    /// `keyword | city` per line.
    KeywordCity,
}

impl std::str::FromStr for PastedFormat {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "keyword" => Ok(PastedFormat::Keyword),
            "keyword-city" | "keyword_city" => Ok(PastedFormat::KeywordCity),
            _ => Err(format!("Invalid keyword format: {}", input)),
        }
    }
}

/// Enum representing the content strategy of generated pages.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SeoMode {
    /// Geographic intent, naming the city and country.
    #[default]
    Local,
    /// Broad intent without geographic targeting.
    Global,
    /// Broad intent plus a local section.
    Hybrid,
}

impl std::str::FromStr for SeoMode {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "local" => Ok(SeoMode::Local),
            "global" => Ok(SeoMode::Global),
            "hybrid" => Ok(SeoMode::Hybrid),
            _ => Err(format!("Invalid SEO mode: {}", input)),
        }
    }
}

/// Enum representing the language pages are written in.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Language {
    #[default]
    English,
    Urdu,
    Arabic,
    Spanish,
    Korean,
    Filipino,
}

impl std::fmt::Display for Language {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Language::English => "English",
            Language::Urdu => "Urdu",
            Language::Arabic => "Arabic",
            Language::Spanish => "Spanish",
            Language::Korean => "Korean",
            Language::Filipino => "Filipino",
        };
        write!(formatter, "{name}")
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "urdu" | "ur" => Ok(Language::Urdu),
            "arabic" | "ar" => Ok(Language::Arabic),
            "spanish" | "es" => Ok(Language::Spanish),
            "korean" | "ko" => Ok(Language::Korean),
            "filipino" | "fil" | "tl" => Ok(Language::Filipino),
            _ => Err(format!("Unsupported language: {}", input)),
        }
    }
}

pub use archive::assemble;
pub use error::{Error, Result};
pub use inject::inject;
pub use keywords::resolve;
pub use layout::acquire_layout;
pub use pipeline::run;
pub use slug::slugify;
