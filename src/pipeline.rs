//! The pipeline module runs one page generation: keywords, layout, content
//! injection and archive assembly, in that order.

use futures_util::StreamExt;
use futures_util::stream;
use llm::chat::ChatProvider;
use log::{info, warn};

use crate::archive::{GeneratedPage, assemble};
use crate::completion::{CompletionContext, RetryPolicy, rate_limiter};
use crate::error::{Error, Result};
use crate::inject::{ContentSettings, LockedLayout, inject};
use crate::keywords::{KeywordSource, resolve};
use crate::layout::{LayoutContext, acquire_layout};
use crate::slug::page_filename;
use crate::template::LayoutSource;

/// Everything a run needs, built once before it starts.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub keywords: KeywordSource,
    pub layout: Option<LayoutSource>,
    pub content: ContentSettings,
    /// Whether the vision model should put all CSS into one `<style>` block.
    pub split_stylesheet: bool,
    /// Maximum number of page requests in flight.
    pub concurrency: usize,
    /// Requests per minute across the whole run (default: no limit).
    pub rpm: Option<u32>,
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keywords: KeywordSource::default(),
            layout: None,
            content: ContentSettings::default(),
            split_stylesheet: false,
            concurrency: 1,
            rpm: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// The models of a run: one for layout extraction, one for page content.
pub struct Models<'a> {
    pub layout: &'a dyn ChatProvider,
    pub content: &'a dyn ChatProvider,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The ZIP archive.
    pub archive: Vec<u8>,
    /// Archive entry paths of the generated pages, in completion order.
    pub pages: Vec<String>,
    pub assets: usize,
    /// Labels of the keyword records that were skipped.
    pub skipped: Vec<String>,
}

/// Runs the whole pipeline and returns the archive.
///
/// Keywords are resolved and the layout source is checked before any model
/// call. A page that fails is skipped with a warning; the run only fails when
/// no page at all could be generated.
///
/// # Errors
///
/// Returns an error if:
/// * The keyword source is empty or malformed
/// * No layout source is configured or the layout cannot be acquired
/// * The provider rejects the credential or request
/// * Every page failed
/// * The archive cannot be written
pub async fn run(
    config: &RunConfig,
    models: &Models<'_>,
    http: &reqwest::Client,
) -> Result<RunReport> {
    let records = resolve(&config.keywords)?;
    let source = config.layout.as_ref().ok_or_else(|| {
        Error::MissingTemplate("no layout source was selected".to_string())
    })?;

    let limiter = rate_limiter(config.rpm);
    let layout_ctx = LayoutContext {
        completion: CompletionContext {
            model: models.layout,
            rate_limiter: limiter.as_ref(),
            retry: config.retry,
        },
        http,
        split_stylesheet: config.split_stylesheet,
    };
    let template = acquire_layout(source, &layout_ctx).await?;

    let content_ctx = CompletionContext {
        model: models.content,
        rate_limiter: limiter.as_ref(),
        retry: config.retry,
    };
    let layouts: Vec<_> = template
        .layouts
        .iter()
        .map(|entry| (entry, LockedLayout::new(entry.document.clone())))
        .collect();

    let total = layouts.len() * records.len();
    info!(
        "Generating {total} page(s) for {} keyword(s), {} at a time",
        records.len(),
        config.concurrency.max(1)
    );

    let jobs = layouts
        .iter()
        .flat_map(|layout| records.iter().map(move |record| (layout, record)));

    let mut results = stream::iter(jobs)
        .map(|((entry, locked), record)| {
            let content_ctx = &content_ctx;
            async move {
                let result = inject(locked, record, &config.content, content_ctx).await;
                (*entry, record, result)
            }
        })
        .buffer_unordered(config.concurrency.max(1));

    let mut pages = Vec::with_capacity(total);
    let mut skipped = Vec::new();

    while let Some((entry, record, result)) = results.next().await {
        match result {
            Ok(content) => {
                let page = GeneratedPage {
                    record: record.clone(),
                    content,
                    filename: page_filename(
                        record,
                        config.content.city.as_deref(),
                        entry.origin_stem.as_deref(),
                    ),
                    directory: entry.directory.clone(),
                };
                info!(
                    "Generated page for {} ({}/{total})",
                    record.label(),
                    pages.len() + skipped.len() + 1
                );
                pages.push(page);
            }
            Err(Error::PageGeneration { keyword, reason }) => {
                warn!("Skipped: {keyword}: {reason}");
                skipped.push(keyword);
            }
            Err(other) => return Err(other),
        }
    }

    if pages.is_empty() {
        return Err(Error::EmptyArchive {
            skipped: skipped.len(),
        });
    }

    let assembled = assemble(&pages, &template.assets)?;
    info!(
        "Pages generated: {} written, {} skipped, {} asset(s) copied",
        pages.len(),
        skipped.len(),
        template.assets.len()
    );

    Ok(RunReport {
        archive: assembled.bytes,
        pages: assembled.page_paths,
        assets: template.assets.len(),
        skipped,
    })
}
