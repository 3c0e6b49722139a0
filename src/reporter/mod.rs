use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

/// Severity of a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// What stage of the invocation produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// An intermediate attempt failed and will be retried
    RetryAttempt,
    /// All attempts were consumed without success
    RetryExhausted,
    /// Terminal failure surfaced to the caller
    FinalFailure,
    /// Call rejected by an open breaker
    CircuitOpen,
    /// Response failed structural or custom validation
    ValidationFailure,
}

/// Immutable record of one failure event. Append-only; never mutated
/// after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Rendered message of the underlying cause
    pub message: String,
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Logical operation name
    pub source: String,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    /// Free-form correlation context
    pub context: HashMap<String, String>,
    /// Attempt number, when the failure came out of a retry loop
    pub attempt: Option<u32>,
}

impl ErrorRecord {
    pub fn new(
        source: impl Into<String>,
        message: impl Into<String>,
        kind: ErrorKind,
        category: ErrorCategory,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message: message.into(),
            kind,
            category,
            severity,
            source: source.into(),
            user_id: None,
            request_id: None,
            context: HashMap::new(),
            attempt: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

#[derive(Debug)]
struct ReporterState {
    records: VecDeque<ErrorRecord>,
    counts_by_source: HashMap<String, u64>,
}

/// Bounded in-memory failure store with per-source counters.
///
/// Cheaply clonable; clones share the same store. Recording is
/// infallible: a full buffer evicts the oldest record and nothing here
/// can fail the caller's operation.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    state: Arc<RwLock<ReporterState>>,
    capacity: usize,
}

const DEFAULT_CAPACITY: usize = 1024;

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ErrorReporter {
    /// Create a reporter retaining at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(ReporterState {
                records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                counts_by_source: HashMap::new(),
            })),
            capacity: capacity.max(1),
        }
    }

    /// Append a record and bump the per-source counter
    pub async fn record(&self, record: ErrorRecord) {
        match record.severity {
            Severity::High => error!(
                source = %record.source,
                kind = %record.kind,
                message = %record.message,
                "Recording failure"
            ),
            _ => warn!(
                source = %record.source,
                kind = %record.kind,
                message = %record.message,
                "Recording failure"
            ),
        }

        let mut state = self.state.write().await;
        *state.counts_by_source.entry(record.source.clone()).or_insert(0) += 1;
        if state.records.len() == self.capacity {
            state.records.pop_front();
        }
        state.records.push_back(record);
    }

    /// Recent records, optionally filtered by source and lower time bound.
    /// Oldest first.
    pub async fn recent(
        &self,
        source: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ErrorRecord> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .filter(|r| source.map_or(true, |s| r.source == s))
            .filter(|r| since.map_or(true, |t| r.timestamp >= t))
            .cloned()
            .collect()
    }

    /// Total failures recorded for a source, including evicted records
    pub async fn count(&self, source: &str) -> u64 {
        let state = self.state.read().await;
        state.counts_by_source.get(source).copied().unwrap_or(0)
    }

    /// Drop all records and counters. Intended for test isolation.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.records.clear();
        state.counts_by_source.clear();
    }
}
