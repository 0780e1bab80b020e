//! Provider failure classification.
//!
//! Transient failures (timeouts, rate limits, 5xx) are retried below the
//! stage layer. Terminal ones surface immediately. Context-window overflow
//! is terminal and normalized into a single token-limit error regardless of
//! how the provider phrased it.

use crate::core::Provider;
use crate::errors::{ProviderError, StatusClass};
use regex::Regex;
use std::sync::LazyLock;

static TOKEN_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(context[ _-]?length|context window|maximum context|too many tokens|prompt is too long|token limit|max_tokens_exceeded|input is too long|request too large)",
    )
    .expect("valid regex")
});

/// Maps an HTTP status code to a status class.
#[must_use]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        408 | 504 => StatusClass::Timeout,
        429 => StatusClass::RateLimited,
        413 => StatusClass::ContentTooLong,
        401 | 403 => StatusClass::Unauthorized,
        400 | 404 | 405 | 409 | 415 | 422 => StatusClass::BadRequest,
        500..=599 => StatusClass::ServerError,
        _ => StatusClass::Unknown,
    }
}

/// Returns true if an error body or message describes a context overflow.
#[must_use]
pub fn is_token_limit_message(message: &str) -> bool {
    TOKEN_LIMIT.is_match(message)
}

/// Builds the provider error for a failed HTTP response.
#[must_use]
pub fn classify_response(provider: Provider, status: u16, body: &str) -> ProviderError {
    let class = classify_status(status);
    let overflow = class == StatusClass::ContentTooLong
        || (class == StatusClass::BadRequest && is_token_limit_message(body));
    if overflow {
        return ProviderError::token_limit(provider).with_status_code(status);
    }
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate(body, 500))
    };
    ProviderError::new(provider, class, message).with_status_code(status)
}

/// Rewrites a provider error whose message describes a context overflow
/// into the normalized token-limit error.
///
/// Invokers that already classify overflow return the same error; others
/// only have to carry the provider's own wording.
#[must_use]
pub fn normalize_overflow(err: ProviderError) -> ProviderError {
    if err.is_token_limit || !is_token_limit_message(&err.message) {
        return err;
    }
    let normalized = ProviderError::token_limit(err.provider);
    match err.status_code {
        Some(code) => normalized.with_status_code(code),
        None => normalized,
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
