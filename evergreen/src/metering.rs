//! Fire-and-forget usage metering.
//!
//! Every stage run produces one [`UsageRecord`]. Records are handed to a
//! [`UsageMeter`] on a detached task; a meter failure is logged and never
//! reaches the stage.

use crate::core::{Provider, StageId};
use crate::errors::EvergreenError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One metered stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Run identifier.
    pub run_id: Uuid,
    /// Stage that ran.
    pub stage: StageId,
    /// Provider used.
    pub provider: Provider,
    /// Model used.
    pub model: String,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Cost in USD.
    pub cost_usd: f64,
    /// Stage latency.
    pub latency_ms: u64,
    /// Whether the stage succeeded.
    pub success: bool,
    /// When the record was created.
    pub recorded_at: DateTime<Utc>,
}

/// Persists usage records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageMeter: Send + Sync {
    /// Stores one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored.
    async fn record(&self, record: UsageRecord) -> Result<(), EvergreenError>;
}

/// Hands a record to the meter on a detached task.
///
/// Requires a running tokio runtime. The returned handle may be dropped.
pub fn record_detached(
    meter: Arc<dyn UsageMeter>,
    record: UsageRecord,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stage = record.stage;
        let run_id = record.run_id;
        if let Err(e) = meter.record(record).await {
            warn!(%run_id, stage = %stage, error = %e, "Usage metering failed");
        }
    })
}

/// Drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMeter;

#[async_trait]
impl UsageMeter for NoOpMeter {
    async fn record(&self, _record: UsageRecord) -> Result<(), EvergreenError> {
        Ok(())
    }
}

/// Logs every record at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMeter;

#[async_trait]
impl UsageMeter for LoggingMeter {
    async fn record(&self, record: UsageRecord) -> Result<(), EvergreenError> {
        debug!(
            run_id = %record.run_id,
            stage = %record.stage,
            provider = %record.provider,
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_usd = record.cost_usd,
            latency_ms = record.latency_ms,
            success = record.success,
            "Usage recorded"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct CollectingMeter {
    records: parking_lot::Mutex<Vec<UsageRecord>>,
}

impl CollectingMeter {
    /// Creates an empty meter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far.
    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl UsageMeter for CollectingMeter {
    async fn record(&self, record: UsageRecord) -> Result<(), EvergreenError> {
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UsageRecord {
        UsageRecord {
            run_id: Uuid::new_v4(),
            stage: StageId::Headlines,
            provider: Provider::OpenAi,
            model: "gpt-4.1-mini".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: 0.0001,
            latency_ms: 20,
            success: true,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failing_meter_is_swallowed() {
        let mut meter = MockUsageMeter::new();
        meter
            .expect_record()
            .times(1)
            .returning(|_| Err(EvergreenError::Internal("db down".to_string())));

        let handle = record_detached(Arc::new(meter), record());
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_collecting_meter() {
        let meter = Arc::new(CollectingMeter::new());
        record_detached(meter.clone(), record()).await.unwrap();

        let records = meter.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, StageId::Headlines);
    }

    #[test]
    fn test_logging_meter() {
        tokio_test::block_on(async {
            assert!(LoggingMeter.record(record()).await.is_ok());
        });
    }
}
