//! Error types for the page generation pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating a page set.
#[derive(Error, Debug)]
pub enum Error {
    /// Neither a CSV file nor any non-blank pasted line was given.
    #[error("no keywords found: paste keywords or provide a CSV file")]
    EmptyInput,

    /// The CSV file lacks a required column.
    #[error("invalid CSV: required column '{column}' is missing")]
    MalformedTabular {
        /// Name of the missing column.
        column: &'static str,
    },

    /// No layout source was selected, or the selected one holds nothing usable.
    #[error("no usable template: {0}")]
    MissingTemplate(String),

    /// More than one layout source was selected for a single run.
    #[error("exactly one layout source may be given, got {0}")]
    ConflictingTemplate(usize),

    /// A screenshot has an extension the vision endpoint cannot take.
    #[error("unsupported image type: {0}")]
    UnsupportedImage(String),

    /// Remote template retrieval failed or returned an unknown content type.
    #[error("template fetch failed: {0}")]
    TemplateFetch(String),

    /// The layout call failed or returned an implausibly short document.
    #[error("layout generation failed: {0}")]
    LayoutGeneration(String),

    /// A single keyword's page could not be generated.
    #[error("page generation failed for '{keyword}': {reason}")]
    PageGeneration {
        /// Label of the keyword record that failed.
        keyword: String,
        /// What went wrong.
        reason: String,
    },

    /// The LLM provider rejected the credential or the request itself.
    #[error("LLM provider rejected the request: {0}")]
    Authentication(String),

    /// The selected backend needs an API key and none was given.
    #[error("API key required: set {env} or pass --api-key")]
    MissingCredential {
        /// Environment variable the key is read from.
        env: &'static str,
    },

    /// Every page failed, so there is nothing to download.
    #[error("archive is empty: no pages generated ({skipped} skipped)")]
    EmptyArchive {
        /// Number of records that were skipped.
        skipped: usize,
    },

    /// CSV parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// ZIP reading or writing error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error happens before any network call is made.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::EmptyInput
                | Error::MalformedTabular { .. }
                | Error::MissingTemplate(_)
                | Error::ConflictingTemplate(_)
                | Error::UnsupportedImage(_)
                | Error::MissingCredential { .. }
        )
    }
}
