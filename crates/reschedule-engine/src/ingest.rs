//! Batch ingestion of raw provider events.
//!
//! Each event is cleaned before it is persisted, and re-delivered events are
//! dropped by idempotency key. One bad event never sinks the batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cleaning::{CleanParams, CleanerRegistry, ConsentSnapshot, Source};
use crate::store::EventLog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_type: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub source: Source,
    pub occurred_at_ms: i64,
    /// Defaults to the idempotency key.
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFailure {
    pub idempotency_key: String,
    pub reason: String,
    /// True when retrying the same event may succeed.
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
    pub failures: Vec<IngestFailure>,
}

/// Clean and append every event; the consent snapshot applies to the batch.
pub async fn ingest_events_batch(
    log: &dyn EventLog,
    registry: &CleanerRegistry,
    user_id: &str,
    consent: ConsentSnapshot,
    events: Vec<RawEvent>,
) -> IngestReport {
    let mut report = IngestReport::default();

    for raw in events {
        let params = CleanParams {
            clerk_user_id: user_id.to_string(),
            event_id: raw.event_id.unwrap_or_else(|| raw.idempotency_key.clone()),
            event_type: raw.event_type,
            occurred_at_ms: raw.occurred_at_ms,
            source: raw.source,
            payload: raw.payload,
            consent,
        };

        let cleaned = match registry.clean(&params) {
            Ok(cleaned) => cleaned,
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    event_type = %params.event_type,
                    idempotency_key = %raw.idempotency_key,
                    error = %err,
                    "rejected raw event"
                );
                report.failures.push(IngestFailure {
                    idempotency_key: raw.idempotency_key,
                    reason: err.to_string(),
                    retryable: !err.is_client_error(),
                });
                continue;
            }
        };

        match log.append(user_id, &raw.idempotency_key, cleaned).await {
            Ok(true) => report.accepted += 1,
            Ok(false) => {
                debug!(idempotency_key = %raw.idempotency_key, "duplicate delivery dropped");
                report.duplicates += 1;
            }
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    idempotency_key = %raw.idempotency_key,
                    error = %err,
                    "failed to persist cleaned event"
                );
                report.failures.push(IngestFailure {
                    idempotency_key: raw.idempotency_key,
                    reason: err.to_string(),
                    retryable: !err.is_client_error(),
                });
            }
        }
    }

    info!(
        user_id = %user_id,
        accepted = report.accepted,
        duplicates = report.duplicates,
        failed = report.failures.len(),
        "ingested event batch"
    );
    report
}
