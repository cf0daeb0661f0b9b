//! sitemorph is a CLI tool that builds keyword landing pages from a locked
//! homepage layout and packs them into a ZIP archive.
//!
//! The tool has two main commands:
//! 1. `generate` - Locks a layout, fills it in for every keyword and writes the ZIP
//! 2. `layout` - Locks a layout and writes it to disk for inspection

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Builder;
use llm::builder::{LLMBackend, LLMBuilder};
use log::{LevelFilter, info};
use url::Url;

use sitemorph::{
    Language, PastedFormat, SeoMode,
    completion::{CompletionContext, RetryPolicy, rate_limiter},
    constants::{
        CONTENT_TEMPERATURE, DEFAULT_DRIFT_TOLERANCE, DEFAULT_WORD_TARGET, LAYOUT_TEMPERATURE,
        MAX_COMPLETION_TOKENS, MODEL_API_KEY_ENV_NAME,
    },
    error::Error,
    inject::ContentSettings,
    keywords::{KeywordSource, TabularSource},
    layout::{LayoutContext, acquire_layout, write_layout_preview},
    pipeline::{Models, RunConfig, run},
    template::LayoutSource,
};

const USER_AGENT: &str = "SiteMorph Bot";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A CLI tool to build keyword landing pages from a locked homepage layout
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute (generate or layout)
    #[command(subcommand)]
    command: Command,

    #[arg(long, short, action = clap::ArgAction::Count, help = "Output v(v...)erbosity: error (0), warn (1), info (2), debug (3), trace (4)", global = true, default_value_t = 2)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one page per keyword and write them to a ZIP archive
    Generate {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        layout: LayoutArgs,
        #[command(flatten)]
        keywords: KeywordArgs,
        #[command(flatten)]
        content: ContentArgs,
        /// Path to the ZIP archive to write
        #[arg(long, short, default_value = "pages.zip")]
        output: PathBuf,
    },
    /// Lock the layout only and write it to a directory for inspection
    Layout {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Directory to write the layout to
        #[arg(long, short, default_value = "layout")]
        output: PathBuf,
        /// Write the CSS to a separate style.css
        #[arg(long)]
        split: bool,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// URL of the LLM model to use, e.g. openai://gpt-4o
    model: String,
    /// API key (default: read from the SITEMORPH_API_KEY environment variable)
    #[arg(long)]
    api_key: Option<String>,
    /// Rate limit: requests per minute (default: no limit)
    #[arg(long, short = 'r')]
    rpm: Option<u32>,
    /// Attempts per request for rate-limited or timed-out calls
    #[arg(long, default_value_t = 3)]
    retries: u32,
}

#[derive(Args)]
struct LayoutArgs {
    /// Homepage screenshot to rebuild as a layout (repeatable)
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    /// HTML template file to use as is
    #[arg(long)]
    template: Option<PathBuf>,
    /// HTML template text to use as is
    #[arg(long)]
    template_text: Option<String>,
    /// URL of an HTML template or ZIP bundle
    #[arg(long)]
    template_url: Option<Url>,
    /// ZIP bundle of HTML templates and assets
    #[arg(long)]
    template_zip: Option<PathBuf>,
}

#[derive(Args)]
struct KeywordArgs {
    /// Keywords, one per line
    #[arg(long, short)]
    keywords: Option<String>,
    /// CSV file with a `keyword` column and an optional `city` column
    #[arg(long)]
    keywords_file: Option<PathBuf>,
    /// Format of pasted keywords: "keyword" (default) or "keyword-city"
    #[arg(long, default_value = "keyword")]
    format: PastedFormat,
}

#[derive(Args)]
struct ContentArgs {
    /// Page language
    #[arg(long, short, default_value = "English")]
    language: Language,
    /// SEO mode: "local" (default), "global" or "hybrid"
    #[arg(long, default_value = "local")]
    seo_mode: SeoMode,
    /// Target country
    #[arg(long)]
    country: Option<String>,
    /// Target city for keywords without their own city
    #[arg(long)]
    city: Option<String>,
    /// Approximate words of body copy per page
    #[arg(long, default_value_t = DEFAULT_WORD_TARGET)]
    words: u32,
    /// Share of layout landmarks a page may lose before it is rejected
    #[arg(long, default_value_t = DEFAULT_DRIFT_TOLERANCE)]
    drift_tolerance: f64,
    /// Number of concurrent page requests (default: 1)
    #[arg(long, short, default_value_t = 1)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    match cli.command {
        Command::Generate {
            model,
            layout,
            keywords,
            content,
            output,
        } => handle_generate_command(model, layout, keywords, content, output).await,
        Command::Layout {
            model,
            layout,
            output,
            split,
        } => handle_layout_command(model, layout, output, split).await,
    }
}

async fn handle_generate_command(
    model: ModelArgs,
    layout: LayoutArgs,
    keywords: KeywordArgs,
    content: ContentArgs,
    output: PathBuf,
) -> Result<()> {
    let config = RunConfig {
        keywords: KeywordSource {
            pasted: keywords.keywords,
            tabular: keywords.keywords_file.map(TabularSource::Path),
            format: keywords.format,
        },
        layout: Some(layout_source(layout)?),
        content: ContentSettings {
            language: content.language,
            seo_mode: content.seo_mode,
            country: content.country,
            city: content.city,
            word_target: content.words,
            drift_tolerance: content.drift_tolerance,
        },
        split_stylesheet: false,
        concurrency: content.concurrency,
        rpm: model.rpm,
        retry: retry_policy(model.retries),
    };

    // Fail on empty or malformed keywords before building any model.
    sitemorph::keywords::resolve(&config.keywords)?;

    let layout_model = llm_builder(&model)?
        .temperature(LAYOUT_TEMPERATURE)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build LLM model: {}", e))?;
    let content_model = llm_builder(&model)?
        .temperature(CONTENT_TEMPERATURE)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build LLM model: {}", e))?;

    let models = Models {
        layout: layout_model.as_ref(),
        content: content_model.as_ref(),
    };

    let report = run(&config, &models, &http_client()?).await?;

    fs::write(&output, &report.archive)
        .context(format!("Failed to write archive: {}", output.display()))?;
    info!(
        "Wrote {} page(s) and {} asset(s) to {}",
        report.pages.len(),
        report.assets,
        output.display()
    );
    if !report.skipped.is_empty() {
        info!("Skipped keywords: {}", report.skipped.join(", "));
    }

    Ok(())
}

async fn handle_layout_command(
    model: ModelArgs,
    layout: LayoutArgs,
    output: PathBuf,
    split: bool,
) -> Result<()> {
    let source = layout_source(layout)?;
    let layout_model = llm_builder(&model)?
        .temperature(LAYOUT_TEMPERATURE)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build LLM model: {}", e))?;

    let limiter = rate_limiter(model.rpm);
    let http = http_client()?;
    let ctx = LayoutContext {
        completion: CompletionContext {
            model: layout_model.as_ref(),
            rate_limiter: limiter.as_ref(),
            retry: retry_policy(model.retries),
        },
        http: &http,
        split_stylesheet: split,
    };

    let template = acquire_layout(&source, &ctx).await?;
    for path in write_layout_preview(&template, &output, split)? {
        info!("Wrote {}", path.display());
    }

    Ok(())
}

fn layout_source(layout: LayoutArgs) -> Result<LayoutSource> {
    Ok(LayoutSource::from_options(
        layout.images,
        layout.template,
        layout.template_text,
        layout.template_url,
        layout.template_zip,
    )?)
}

fn retry_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: retries.max(1),
        ..RetryPolicy::default()
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

fn llm_builder(model: &ModelArgs) -> Result<LLMBuilder> {
    let model_url =
        Url::parse(&model.model).map_err(|e| anyhow::anyhow!("Invalid model URL: {}", e))?;
    let backend = LLMBackend::from_str(model_url.scheme())
        .map_err(|e| anyhow::anyhow!("Invalid LLM backend: {}", e))?;
    let needs_key = !matches!(backend, LLMBackend::Ollama);

    let llm_builder = LLMBuilder::new()
        .backend(backend)
        .max_tokens(MAX_COMPLETION_TOKENS)
        .model(
            [
                model_url
                    .host_str()
                    .context("Specify model name as host URL.")?,
                model_url.username(),
            ]
            .iter()
            .filter(|x| !x.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(":"),
        );

    let api_key = model
        .api_key
        .clone()
        .or_else(|| std::env::var(MODEL_API_KEY_ENV_NAME).ok())
        .filter(|key| !key.trim().is_empty());

    match api_key {
        Some(key) => {
            info!("API key is provided");
            Ok(llm_builder.api_key(key))
        }
        None if needs_key => Err(Error::MissingCredential {
            env: MODEL_API_KEY_ENV_NAME,
        }
        .into()),
        None => {
            info!("No API key provided, continuing without one");
            Ok(llm_builder)
        }
    }
}
