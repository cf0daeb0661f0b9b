//! The layout module acquires the locked layout of a run, either by asking a
//! vision model to rebuild homepage screenshots as a placeholder template or
//! by taking user supplied HTML as is.

use std::fs;
use std::path::{Path, PathBuf};

use llm::chat::{ChatMessage, ImageMime};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::archive::PassthroughAsset;
use crate::completion::{CompletionContext, complete};
use crate::constants::{
    LAYOUT_PROMPT, MIN_LAYOUT_LENGTH, PLACEHOLDERS, SPLIT_STYLESHEET_RULE, STYLESHEET_FILE_NAME,
};
use crate::error::{Error, Result};
use crate::template::{FetchedTemplate, LayoutSource, TemplateBundle, fetch_template};

static STYLE_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<style[^>]*>(.*?)</style>\s*").expect("Failed to compile style regex")
});

static HEAD_CLOSE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</head>").expect("Failed to compile head regex"));

const PREVIEW_FILE_STEM: &str = "layout";

/// A locked layout. It is never modified once acquired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutDocument(String);

/// A layout decomposed into markup and stylesheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitLayout {
    /// Markup with every `<style>` block replaced by one stylesheet link.
    pub markup: String,
    /// The contents of every `<style>` block, in document order.
    pub stylesheet: String,
}

impl LayoutDocument {
    pub fn new(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Moves every `<style>` block into a separate stylesheet referenced as
    /// `style.css`.
    pub fn split(&self) -> SplitLayout {
        let stylesheet = STYLE_BLOCK_REGEX
            .captures_iter(&self.0)
            .filter_map(|captures| captures.get(1))
            .map(|css| css.as_str().trim())
            .filter(|css| !css.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let stripped = STYLE_BLOCK_REGEX.replace_all(&self.0, "");
        let link = format!("<link rel=\"stylesheet\" href=\"{STYLESHEET_FILE_NAME}\">\n");
        let markup = if HEAD_CLOSE_REGEX.is_match(&stripped) {
            HEAD_CLOSE_REGEX
                .replacen(&stripped, 1, format!("{link}</head>"))
                .into_owned()
        } else {
            format!("{link}{stripped}")
        };

        SplitLayout { markup, stylesheet }
    }
}

/// One layout of a run, with where it came from in a bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutEntry {
    pub document: LayoutDocument,
    /// Bundle directory of the origin file, `/` separated; empty otherwise.
    pub directory: String,
    /// File stem of the origin file for bundle entries.
    pub origin_stem: Option<String>,
}

impl LayoutEntry {
    /// An entry for single-document modes.
    pub fn single(document: LayoutDocument) -> Self {
        Self {
            document,
            directory: String::new(),
            origin_stem: None,
        }
    }
}

/// Every layout of a run plus the bundle files copied through unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcquiredTemplate {
    pub layouts: Vec<LayoutEntry>,
    pub assets: Vec<PassthroughAsset>,
}

impl AcquiredTemplate {
    fn single(document: LayoutDocument) -> Self {
        Self {
            layouts: vec![LayoutEntry::single(document)],
            assets: Vec::new(),
        }
    }

    fn from_bundle(bundle: TemplateBundle) -> Self {
        let layouts = bundle
            .html
            .iter()
            .map(|file| LayoutEntry {
                document: LayoutDocument::new(String::from_utf8_lossy(&file.bytes)),
                directory: file.directory().to_owned(),
                origin_stem: Some(file.stem().to_owned()),
            })
            .collect();

        let assets = bundle
            .assets
            .into_iter()
            .map(|file| PassthroughAsset {
                path: file.path,
                bytes: file.bytes,
            })
            .collect();

        Self { layouts, assets }
    }
}

/// Configuration containing shared data for layout acquisition
pub struct LayoutContext<'a> {
    /// Completion settings for the vision model
    pub completion: CompletionContext<'a>,
    /// HTTP client for remote templates
    pub http: &'a reqwest::Client,
    /// Whether the vision model should put all CSS into one `<style>` block
    pub split_stylesheet: bool,
}

/// Acquires the layout(s) of a run from exactly one source.
///
/// Screenshots go through the vision model; every other source is used as is
/// without any model call.
///
/// # Errors
///
/// Returns an error if:
/// * The source holds no usable HTML
/// * A screenshot cannot be read or has an unsupported type
/// * The layout call fails or returns an implausibly short document
/// * A remote template cannot be fetched or classified
/// * A bundle cannot be unpacked
pub async fn acquire_layout(
    source: &LayoutSource,
    ctx: &LayoutContext<'_>,
) -> Result<AcquiredTemplate> {
    let template = match source {
        LayoutSource::Images(images) => {
            AcquiredTemplate::single(generate_layout_from_images(images, ctx).await?)
        }
        LayoutSource::File(path) => {
            info!("Using template file {} as is", path.display());
            AcquiredTemplate::single(passthrough(fs::read_to_string(path)?)?)
        }
        LayoutSource::Text(text) => {
            info!("Using pasted template as is");
            AcquiredTemplate::single(passthrough(text.clone())?)
        }
        LayoutSource::Url(url) => match fetch_template(ctx.http, url).await? {
            FetchedTemplate::Markup(markup) => AcquiredTemplate::single(passthrough(markup)?),
            FetchedTemplate::Archive(bytes) => {
                AcquiredTemplate::from_bundle(TemplateBundle::from_zip_bytes(&bytes)?)
            }
        },
        LayoutSource::Bundle(path) => {
            AcquiredTemplate::from_bundle(TemplateBundle::from_zip_file(path)?)
        }
    };

    Ok(template)
}

fn passthrough(markup: String) -> Result<LayoutDocument> {
    let document = LayoutDocument::new(markup);
    if document.is_empty() {
        return Err(Error::MissingTemplate("the template is empty".to_string()));
    }
    Ok(document)
}

/// Asks the vision model to rebuild the screenshots as a placeholder template.
///
/// # Errors
///
/// Returns an error if a screenshot cannot be read or has an unsupported
/// type, the model call fails, or the response is shorter than
/// `MIN_LAYOUT_LENGTH`.
pub async fn generate_layout_from_images(
    images: &[PathBuf],
    ctx: &LayoutContext<'_>,
) -> Result<LayoutDocument> {
    if images.is_empty() {
        return Err(Error::MissingTemplate("no screenshots given".to_string()));
    }

    let mut messages = Vec::with_capacity(images.len() + 1);
    for path in images {
        let mime = image_mime(path)?;
        let bytes = fs::read(path)?;
        debug!("Attaching screenshot {} ({} bytes)", path.display(), bytes.len());
        messages.push(ChatMessage::user().image(mime, bytes).build());
    }
    messages.push(ChatMessage::user().content(layout_prompt(ctx.split_stylesheet)).build());

    info!("Creating master template from {} screenshot(s)...", images.len());

    let layout = complete(&messages, &ctx.completion)
        .await
        .map_err(|failure| {
            if failure.fatal {
                Error::Authentication(failure.message)
            } else {
                Error::LayoutGeneration(failure.message)
            }
        })?;

    let length = layout.chars().count();
    if length < MIN_LAYOUT_LENGTH {
        return Err(Error::LayoutGeneration(format!(
            "response has {length} characters, expected at least {MIN_LAYOUT_LENGTH}"
        )));
    }

    info!("Master template created ({length} characters)");
    Ok(LayoutDocument::new(layout))
}

/// The layout instruction sent with the screenshots.
pub fn layout_prompt(split_stylesheet: bool) -> String {
    LAYOUT_PROMPT
        .replace("{placeholders}", &PLACEHOLDERS.join(", "))
        .replace(
            "{split_rule}",
            if split_stylesheet {
                SPLIT_STYLESHEET_RULE
            } else {
                ""
            },
        )
}

/// Picks the image MIME type from the file extension.
///
/// # Errors
///
/// Returns [`Error::UnsupportedImage`] for anything but PNG, JPEG, GIF and WebP.
pub fn image_mime(path: &Path) -> Result<ImageMime> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "png" => Ok(ImageMime::PNG),
        "jpg" | "jpeg" => Ok(ImageMime::JPEG),
        "gif" => Ok(ImageMime::GIF),
        "webp" => Ok(ImageMime::WEBP),
        _ => Err(Error::UnsupportedImage(path.display().to_string())),
    }
}

/// Writes every acquired layout under `output_dir` for inspection.
///
/// With `split`, each layout is written as markup plus a `style.css` next to
/// it.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub fn write_layout_preview(
    template: &AcquiredTemplate,
    output_dir: &Path,
    split: bool,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for entry in &template.layouts {
        let directory = output_dir.join(&entry.directory);
        fs::create_dir_all(&directory)?;
        let html_path = directory.join(format!(
            "{}.html",
            entry.origin_stem.as_deref().unwrap_or(PREVIEW_FILE_STEM)
        ));

        if split {
            let parts = entry.document.split();
            let css_path = directory.join(STYLESHEET_FILE_NAME);
            fs::write(&html_path, parts.markup)?;
            fs::write(&css_path, parts.stylesheet)?;
            written.push(html_path);
            written.push(css_path);
        } else {
            fs::write(&html_path, entry.document.as_str())?;
            written.push(html_path);
        }
    }

    info!("Wrote {} layout preview file(s)", written.len());
    Ok(written)
}
