//! The archive module packs generated pages and bundle assets into a ZIP.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use log::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::keywords::KeywordRecord;

/// A page produced for one keyword record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedPage {
    pub record: KeywordRecord,
    pub content: String,
    /// File name derived from the record, see [`crate::slug::page_filename`].
    pub filename: String,
    /// Bundle directory the page mirrors; empty for single layouts.
    pub directory: String,
}

impl GeneratedPage {
    /// Entry path inside the archive.
    pub fn path(&self) -> String {
        if self.directory.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.directory.trim_end_matches('/'), self.filename)
        }
    }
}

/// A non-HTML bundle file copied into the archive unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassthroughAsset {
    /// Path relative to the bundle root, `/` separated.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// A finished archive and the entry paths its pages were written under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembled {
    pub bytes: Vec<u8>,
    /// One entry path per page, in the order the pages were given.
    pub page_paths: Vec<String>,
}

/// Writes assets, then pages, into an in-memory ZIP archive.
///
/// Zero pages still produce a valid archive. An entry path that is already
/// taken gets a numeric suffix (`name-2.html`) instead of replacing the
/// earlier entry.
///
/// # Errors
///
/// Returns an error if writing an entry fails.
pub fn assemble(pages: &[GeneratedPage], assets: &[PassthroughAsset]) -> Result<Assembled> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for asset in assets {
        let path = unique_path(&mut used, asset.path.clone());
        debug!("Adding {path} ({} bytes)", asset.bytes.len());
        writer.start_file(path.as_str(), options)?;
        writer.write_all(&asset.bytes)?;
    }

    let mut page_paths = Vec::with_capacity(pages.len());
    for page in pages {
        let path = unique_path(&mut used, page.path());
        debug!("Adding {path} ({} bytes)", page.content.len());
        writer.start_file(path.as_str(), options)?;
        writer.write_all(page.content.as_bytes())?;
        page_paths.push(path);
    }

    Ok(Assembled {
        bytes: writer.finish()?.into_inner(),
        page_paths,
    })
}

fn unique_path(used: &mut HashSet<String>, path: String) -> String {
    if used.insert(path.clone()) {
        return path;
    }

    let mut counter = 2;
    loop {
        let candidate = suffixed(&path, counter);
        if used.insert(candidate.clone()) {
            warn!("Archive entry {path} already exists, writing {candidate} instead");
            return candidate;
        }
        counter += 1;
    }
}

fn suffixed(path: &str, counter: usize) -> String {
    let (directory, name) = match path.rsplit_once('/') {
        Some((directory, name)) => (format!("{directory}/"), name),
        None => (String::new(), path),
    };

    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => {
            format!("{directory}{stem}-{counter}.{extension}")
        }
        _ => format!("{directory}{name}-{counter}"),
    }
}
