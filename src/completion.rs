//! The completion module sends chat requests to the LLM model, waiting on the
//! rate limiter and retrying transient failures with exponential backoff.

use std::time::Duration;

use llm::chat::{ChatMessage, ChatProvider};
use llm::error::LLMError;
use log::{debug, warn};
use once_cell::sync::Lazy;
use rate_guard::{RateLimit, StdTokenBucket, TokenBucketBuilder};
use regex::Regex;

use crate::constants::{CODE_FENCE_STRIPPER, THINK_STRIPPER};

static THINK_STRIPPER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(THINK_STRIPPER).expect("Failed to compile THINK_STRIPPER regex"));

static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(CODE_FENCE_STRIPPER).expect("Failed to compile CODE_FENCE_STRIPPER regex")
});

const TRANSIENT_MARKERS: [&str; 9] = [
    "429",
    "rate limit",
    "too many requests",
    "timeout",
    "timed out",
    "overloaded",
    "502",
    "503",
    "504",
];

const FATAL_MARKERS: [&str; 4] = ["401", "403", "unauthorized", "invalid api key"];

const MAX_BACKOFF_DOUBLINGS: u32 = 5;

/// How many times a request is attempted and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        self.base_delay.saturating_mul(1 << doublings)
    }
}

/// How a failed request should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limits, timeouts and transport errors: worth retrying.
    Transient,
    /// Rejected credential or request: no later request can succeed either.
    Fatal,
    /// Anything else: give up on this request only.
    Permanent,
}

/// Classifies an LLM error for the retry loop.
pub fn classify(error: &LLMError) -> ErrorClass {
    match error {
        LLMError::AuthError(_) | LLMError::InvalidRequest(_) => ErrorClass::Fatal,
        LLMError::HttpError(_) => ErrorClass::Transient,
        other => {
            let message = other.to_string().to_lowercase();
            if TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker)) {
                ErrorClass::Transient
            } else if FATAL_MARKERS.iter().any(|marker| message.contains(marker)) {
                ErrorClass::Fatal
            } else {
                ErrorClass::Permanent
            }
        }
    }
}

/// A request that failed after every allowed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionFailure {
    /// Whether the whole run should stop.
    pub fatal: bool,
    pub message: String,
    pub attempts: u32,
}

/// Configuration containing shared data for completion requests
pub struct CompletionContext<'a> {
    /// LLM model to send requests to
    pub model: &'a dyn ChatProvider,
    /// Rate limiter for controlling request frequency
    pub rate_limiter: Option<&'a StdTokenBucket>,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

/// Builds a token bucket allowing `rpm` requests per minute.
pub fn rate_limiter(rpm: Option<u32>) -> Option<StdTokenBucket> {
    rpm.and_then(|rpm| {
        let capacity = u64::from(rpm.max(1));
        let refill_interval = Duration::from_secs_f64(60.0 / capacity as f64);

        TokenBucketBuilder::builder()
            .capacity(capacity)
            .refill_amount(1_u64)
            .refill_every(refill_interval)
            .with_time(rate_guard::StdTimeSource::new())
            .with_precision::<rate_guard::Nanos>()
            .build()
            .ok()
    })
}

/// Sends `messages` and returns the cleaned completion text.
///
/// # Errors
///
/// Returns a [`CompletionFailure`] if the model call fails with a non-transient
/// error, or keeps failing transiently until the retry policy is exhausted.
pub async fn complete(
    messages: &[ChatMessage],
    ctx: &CompletionContext<'_>,
) -> Result<String, CompletionFailure> {
    let max_attempts = ctx.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        wait_for_rate_limit(ctx.rate_limiter).await;

        match ctx.model.chat(messages).await {
            Ok(response) => return Ok(clean_completion(&response.to_string())),
            Err(error) => {
                let class = classify(&error);
                if class == ErrorClass::Transient && attempt < max_attempts {
                    let delay = ctx.retry.backoff(attempt);
                    warn!("LLM error: {error}. Retrying in {delay:?} ({attempt}/{max_attempts})");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                debug!("LLM error after {attempt} attempt(s): {error}");
                return Err(CompletionFailure {
                    fatal: class == ErrorClass::Fatal,
                    message: format!("LLM error: {error}."),
                    attempts: attempt,
                });
            }
        }
    }
}

async fn wait_for_rate_limit(limiter: Option<&StdTokenBucket>) {
    if let Some(limiter) = limiter {
        loop {
            match limiter.try_acquire(1) {
                Ok(()) => break,
                Err(_) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Removes reasoning blocks and Markdown code fences around the document.
pub fn clean_completion(response: &str) -> String {
    let without_think = THINK_STRIPPER_REGEX.replace_all(response, "");
    CODE_FENCE_REGEX
        .replace_all(&without_think, "")
        .trim()
        .to_owned()
}
