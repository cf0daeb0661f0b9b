//! The template module reads user supplied layouts: single HTML files, pasted
//! markup, remote URLs and ZIP bundles of several files.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use tempfile::TempDir;
use url::Url;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{Error, Result};

const SCRATCH_PREFIX: &str = "sitemorph-";
const HTML_EXTENSIONS: [&str; 2] = ["html", "htm"];
const ARCHIVE_CONTENT_TYPES: [&str; 2] = ["application/zip", "application/x-zip-compressed"];
const MARKUP_CONTENT_TYPES: [&str; 2] = ["text/html", "application/xhtml+xml"];

/// The one place a run's layout comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutSource {
    /// Homepage screenshots sent to a vision model.
    Images(Vec<PathBuf>),
    /// A local HTML file used as is.
    File(PathBuf),
    /// Pasted HTML used as is.
    Text(String),
    /// A remote HTML document or ZIP bundle.
    Url(Url),
    /// A local ZIP bundle of HTML files and assets.
    Bundle(PathBuf),
}

impl LayoutSource {
    /// Picks the single layout source among the optional inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingTemplate`] if nothing is given and
    /// [`Error::ConflictingTemplate`] if more than one input is given.
    pub fn from_options(
        images: Vec<PathBuf>,
        file: Option<PathBuf>,
        text: Option<String>,
        url: Option<Url>,
        bundle: Option<PathBuf>,
    ) -> Result<Self> {
        let mut sources: Vec<LayoutSource> = [
            (!images.is_empty()).then(|| LayoutSource::Images(images)),
            file.map(LayoutSource::File),
            text.map(LayoutSource::Text),
            url.map(LayoutSource::Url),
            bundle.map(LayoutSource::Bundle),
        ]
        .into_iter()
        .flatten()
        .collect();

        match sources.len() {
            0 => Err(Error::MissingTemplate(
                "give screenshots, a template file, pasted HTML, a URL or a ZIP".to_string(),
            )),
            1 => sources
                .pop()
                .ok_or_else(|| Error::MissingTemplate("no layout source".to_string())),
            count => Err(Error::ConflictingTemplate(count)),
        }
    }
}

/// One file read from a template bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleFile {
    /// Path relative to the bundle root, `/` separated.
    pub path: String,
    pub bytes: Vec<u8>,
}

impl BundleFile {
    /// Directory part of the path, empty at the bundle root.
    pub fn directory(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(directory, _)| directory)
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        let name = self.path.rsplit_once('/').map_or(self.path.as_str(), |(_, name)| name);
        name.rsplit_once('.').map_or(name, |(stem, _)| stem)
    }
}

/// HTML entry points and other files of an unpacked template archive.
///
/// Every HTML file anywhere in the tree is its own layout; every other file
/// is copied to the output archive unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateBundle {
    pub html: Vec<BundleFile>,
    pub assets: Vec<BundleFile>,
}

impl TemplateBundle {
    /// Reads a ZIP bundle from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a usable bundle.
    pub fn from_zip_file(path: &Path) -> Result<Self> {
        info!("Unpacking template bundle {}", path.display());
        Self::from_zip_bytes(&fs::read(path)?)
    }

    /// Unpacks ZIP bytes into a scratch directory under the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is invalid, extraction fails or the
    /// bundle has no HTML file.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self> {
        Self::unpack_in(&std::env::temp_dir(), bytes)
    }

    /// Unpacks ZIP bytes into a scratch directory created under `parent`.
    ///
    /// The scratch directory lives only for the duration of this call and is
    /// removed on every return path.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is invalid, extraction fails or the
    /// bundle has no HTML file.
    pub fn unpack_in(parent: &Path, bytes: &[u8]) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(parent)?;
        debug!("Extracting bundle into {}", scratch.path().display());

        extract(bytes, &scratch)?;
        let bundle = walk(scratch.path())?;

        if bundle.html.is_empty() {
            return Err(Error::MissingTemplate(
                "the template bundle contains no HTML file".to_string(),
            ));
        }

        info!(
            "Bundle holds {} HTML file(s) and {} asset(s)",
            bundle.html.len(),
            bundle.assets.len()
        );
        Ok(bundle)
    }
}

fn extract(bytes: &[u8], scratch: &TempDir) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping bundle entry with unsafe path: {}", entry.name());
            continue;
        };

        let target = scratch.path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        io::copy(&mut entry, &mut file)?;
    }

    Ok(())
}

fn walk(root: &Path) -> Result<TemplateBundle> {
    let mut bundle = TemplateBundle::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if is_metadata_path(relative) {
            continue;
        }

        let file = BundleFile {
            path: slash_path(relative),
            bytes: fs::read(entry.path())?,
        };
        if is_html(relative) {
            bundle.html.push(file);
        } else {
            bundle.assets.push(file);
        }
    }

    Ok(bundle)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_metadata_path(path: &Path) -> bool {
    path.components()
        .next()
        .is_some_and(|first| first.as_os_str() == "__MACOSX")
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            HTML_EXTENSIONS
                .iter()
                .any(|html| extension.eq_ignore_ascii_case(html))
        })
}

/// What a remote template turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    Markup,
    Archive,
}

/// A downloaded template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchedTemplate {
    Markup(String),
    Archive(Vec<u8>),
}

/// Classifies a remote template by its declared content type, falling back
/// to the extension of the URL path.
pub fn classify(content_type: Option<&str>, url: &Url) -> Option<TemplateKind> {
    let declared = content_type
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().to_lowercase());

    if let Some(mime) = declared.as_deref() {
        if ARCHIVE_CONTENT_TYPES.contains(&mime) {
            return Some(TemplateKind::Archive);
        }
        if MARKUP_CONTENT_TYPES.contains(&mime) {
            return Some(TemplateKind::Markup);
        }
    }

    let path = Path::new(url.path());
    let extension = path.extension().and_then(|extension| extension.to_str())?;
    if extension.eq_ignore_ascii_case("zip") {
        Some(TemplateKind::Archive)
    } else if is_html(path) {
        Some(TemplateKind::Markup)
    } else {
        None
    }
}

/// Downloads a template with a single GET request.
///
/// # Errors
///
/// Returns [`Error::TemplateFetch`] if the request fails, the status is not a
/// success or the content cannot be classified.
pub async fn fetch_template(client: &reqwest::Client, url: &Url) -> Result<FetchedTemplate> {
    info!("Fetching template from {url}");

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::TemplateFetch(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::TemplateFetch(format!("{url} returned {status}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let kind = classify(content_type.as_deref(), url).ok_or_else(|| {
        Error::TemplateFetch(format!(
            "{url} has unrecognized content type {}",
            content_type.as_deref().unwrap_or("<none>")
        ))
    })?;

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::TemplateFetch(format!("{url}: {e}")))?;

    match kind {
        TemplateKind::Archive => Ok(FetchedTemplate::Archive(body.to_vec())),
        TemplateKind::Markup => Ok(FetchedTemplate::Markup(
            String::from_utf8_lossy(&body).into_owned(),
        )),
    }
}
