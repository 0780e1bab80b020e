//! Error types for the evergreen pipeline.
//!
//! Three domain errors travel through the stage layer unchanged:
//! [`ValidationError`], [`ProviderError`] and [`ProcessingError`]. Everything
//! else (configuration, templates, serialization, registry construction) is
//! a non-domain error that the stage runner wraps into a `ProcessingError`.

use crate::core::{Provider, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Remediation hint attached to token-limit failures.
pub const TOKEN_LIMIT_HINT: &str = "content too long, shorten input";

/// Message used when a provider rejects input for exceeding its context.
pub const TOKEN_LIMIT_MESSAGE: &str = "input exceeds model context limit; shorten content";

/// The main error type for evergreen operations.
#[derive(Debug, Error)]
pub enum EvergreenError {
    /// Output failed structural validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A model provider call failed.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// A stage failed with run context attached.
    #[error("{0}")]
    Processing(#[from] ProcessingError),

    /// The stage registry could not be built.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Invalid settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A prompt template could not be loaded or rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A context slot was written twice.
    #[error("Result for stage '{0}' was already recorded")]
    SlotConflict(StageId),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvergreenError {
    /// Returns true for the three domain variants the runner passes through.
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Provider(_) | Self::Processing(_)
        )
    }

    /// Returns true if the failure traces back to a provider token limit.
    #[must_use]
    pub fn is_token_limit(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_token_limit,
            Self::Processing(err) => err.cause.as_deref().is_some_and(Self::is_token_limit),
            _ => false,
        }
    }

    /// Returns true for provider errors worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider(err) if err.is_transient())
    }

    /// Short machine-readable kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Provider(_) => "provider",
            Self::Processing(_) => "processing",
            Self::Registry(_) => "registry",
            Self::Config(_) => "config",
            Self::Template(_) => "template",
            Self::Serialization(_) => "serialization",
            Self::SlotConflict(_) => "slot_conflict",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for EvergreenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a registry error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "REGISTRY-001-CANONICAL").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }
        map
    }
}

/// Output failed a structural check.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Validation failed for '{field}': {reason}")]
pub struct ValidationError {
    /// Offending field, as a JSON pointer or plain name.
    pub field: String,
    /// Why the check failed.
    pub reason: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// The request timed out.
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
    /// Malformed request.
    BadRequest,
    /// Authentication or authorization failure.
    Unauthorized,
    /// Input larger than the model context.
    ContentTooLong,
    /// Connection-level failure.
    Network,
    /// Anything else.
    Unknown,
}

impl StatusClass {
    /// Returns true if retrying may succeed.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServerError | Self::Network
        )
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ServerError => write!(f, "server_error"),
            Self::BadRequest => write!(f, "bad_request"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::ContentTooLong => write!(f, "content_too_long"),
            Self::Network => write!(f, "network"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A model provider call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Provider '{provider}' failed ({status_class}): {message}")]
pub struct ProviderError {
    /// Provider that failed.
    pub provider: Provider,
    /// Classified failure.
    pub status_class: StatusClass,
    /// Whether the input exceeded the model context.
    pub is_token_limit: bool,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when there was one.
    pub status_code: Option<u16>,
}

impl ProviderError {
    /// Creates a new provider error.
    #[must_use]
    pub fn new(provider: Provider, status_class: StatusClass, message: impl Into<String>) -> Self {
        Self {
            provider,
            status_class,
            is_token_limit: status_class == StatusClass::ContentTooLong,
            message: message.into(),
            status_code: None,
        }
    }

    /// The normalized token-limit error.
    #[must_use]
    pub fn token_limit(provider: Provider) -> Self {
        Self::new(provider, StatusClass::ContentTooLong, TOKEN_LIMIT_MESSAGE)
    }

    /// Sets the HTTP status code.
    #[must_use]
    pub const fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !self.is_token_limit && self.status_class.is_transient()
    }
}

/// A stage failed; carries the run context needed to report it.
#[derive(Debug, Error)]
#[error("Stage {stage_id} ({stage_name}) failed in run {run_id}: {message}")]
pub struct ProcessingError {
    /// Numeric stage id as requested (may be outside the registered set).
    pub stage_id: u8,
    /// Human-readable stage name.
    pub stage_name: String,
    /// Run identifier.
    pub run_id: Uuid,
    /// Summary of what went wrong.
    pub message: String,
    /// Underlying error, if any.
    #[source]
    pub cause: Option<Box<EvergreenError>>,
}

impl ProcessingError {
    /// Creates a processing error for a known stage.
    #[must_use]
    pub fn new(stage: StageId, run_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            stage_id: stage.number(),
            stage_name: stage.display_name().to_string(),
            run_id,
            message: message.into(),
            cause: None,
        }
    }

    /// Error for a stage id outside the registered set.
    #[must_use]
    pub fn unknown_stage(stage_id: u8, run_id: Uuid) -> Self {
        Self {
            stage_id,
            stage_name: "unknown".to_string(),
            run_id,
            message: format!("no stage registered with id {stage_id}"),
            cause: None,
        }
    }

    /// Wraps a non-domain error raised while running a stage.
    #[must_use]
    pub fn wrap(stage: StageId, run_id: Uuid, cause: EvergreenError) -> Self {
        Self {
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
            ..Self::new(stage, run_id, String::new())
        }
    }

    /// Wraps a transient provider error that outlived its retry budget.
    #[must_use]
    pub fn retries_exhausted(stage: StageId, run_id: Uuid, cause: EvergreenError) -> Self {
        Self {
            message: format!("retries exhausted: {cause}"),
            cause: Some(Box::new(cause)),
            ..Self::new(stage, run_id, String::new())
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage_id".to_string(), serde_json::json!(self.stage_id));
        map.insert("stage_name".to_string(), serde_json::json!(self.stage_name));
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref cause) = self.cause {
            map.insert("cause_kind".to_string(), serde_json::json!(cause.kind()));
        }
        map
    }
}

/// The stage registry was declared inconsistently.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RegistryError {
    /// The error message.
    pub message: String,
    /// Stages involved.
    pub stages: Vec<StageId>,
    /// Diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl RegistryError {
    /// Creates a new registry error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<StageId>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Error code, if diagnostic info is attached.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("message".to_string(), serde_json::Value::String(self.message.clone()));
        map.insert(
            "stages".to_string(),
            serde_json::Value::Array(
                self.stages
                    .iter()
                    .map(|s| serde_json::Value::String(s.slug().to_string()))
                    .collect(),
            ),
        );
        if let Some(ref info) = self.error_info {
            let info_map: serde_json::Map<String, serde_json::Value> =
                info.to_dict().into_iter().collect();
            map.insert("error_info".to_string(), serde_json::Value::Object(info_map));
        }
        map
    }
}

/// A run aborted; the report callers see.
#[derive(Debug, Error)]
pub struct PipelineFailure {
    /// Run identifier.
    pub run_id: Uuid,
    /// Failing stage, when the failure is attributable to one.
    pub stage: Option<StageId>,
    /// Execution phase label (e.g. "plan[4,5]").
    pub phase: Option<String>,
    /// Underlying error.
    #[source]
    pub error: EvergreenError,
}

impl PipelineFailure {
    /// Creates a new failure report.
    #[must_use]
    pub fn new(run_id: Uuid, error: EvergreenError) -> Self {
        Self {
            run_id,
            stage: None,
            phase: None,
            error,
        }
    }

    /// Sets the failing stage.
    #[must_use]
    pub const fn with_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Sets the failing phase label.
    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Human name of the failing stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        match (&self.stage, &self.error) {
            (Some(stage), _) => stage.display_name(),
            (None, EvergreenError::Processing(err)) => &err.stage_name,
            (None, _) => "pipeline",
        }
    }

    /// Remediation hint, if one applies.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        self.error.is_token_limit().then_some(TOKEN_LIMIT_HINT)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("stage".to_string(), serde_json::json!(self.stage_name()));
        map.insert("error_kind".to_string(), serde_json::json!(self.error.kind()));
        map.insert("message".to_string(), serde_json::json!(self.error.to_string()));
        if let Some(ref phase) = self.phase {
            map.insert("phase".to_string(), serde_json::json!(phase));
        }
        if let Some(hint) = self.hint() {
            map.insert("hint".to_string(), serde_json::json!(hint));
        }
        map
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed (run {}): {}",
            self.stage_name(),
            self.run_id,
            self.error
        )?;
        if let Some(hint) = self.hint() {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

/// Result type alias for evergreen operations.
pub type Result<T> = std::result::Result<T, EvergreenError>;
