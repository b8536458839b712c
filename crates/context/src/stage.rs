//! Pipeline stages, stage outcomes and stage telemetry
//!
//! Provides:
//! - `Stage` states of the pipeline state machine
//! - `StageOutcome` returned by every stage function
//! - `StageRecord` emitted once per executed stage
//! - `StageSink` implementations (metrics, no-op, in-memory)

use docrag_common::errors::{AppError, Result};
use docrag_common::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Expand,
    Retrieve,
    Rerank,
    Verify,
    Assemble,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Expand => "expand",
            Stage::Retrieve => "retrieve",
            Stage::Rerank => "rerank",
            Stage::Verify => "verify",
            Stage::Assemble => "assemble",
            Stage::Done => "done",
        }
    }

    /// Telemetry code for a failure inside this stage
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Stage::Expand => Some("EXPANSION_ERROR"),
            Stage::Retrieve => Some("RETRIEVAL_ERROR"),
            Stage::Rerank => Some("RERANKING_ERROR"),
            Stage::Verify => Some("VERIFICATION_ERROR"),
            Stage::Assemble => Some("ASSEMBLY_ERROR"),
            Stage::Done => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage.
///
/// `succeeded == false` means the stage hit an error and `output` is its
/// pass-through fallback. `degraded` is also set when the stage ran without
/// its model.
#[derive(Debug)]
pub struct StageOutcome<T> {
    pub output: T,
    pub succeeded: bool,
    pub degraded: bool,
    pub error: Option<AppError>,
}

impl<T> StageOutcome<T> {
    pub fn ok(output: T) -> Self {
        Self { output, succeeded: true, degraded: false, error: None }
    }

    /// Completed without doing the stage's real work
    pub fn degraded(output: T) -> Self {
        Self { output, succeeded: true, degraded: true, error: None }
    }

    /// Failed; `output` is the fallback
    pub fn failed(output: T, error: AppError) -> Self {
        Self { output, succeeded: false, degraded: true, error: Some(error) }
    }
}

/// Telemetry for one executed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub trace_id: Uuid,
    pub stage: Stage,
    /// Position in the request's execution order, starting at 1
    pub order: u32,
    pub duration_ms: u64,
    pub input_count: usize,
    pub output_count: usize,
    pub success: bool,
    pub error_code: Option<String>,
}

/// Receiver of stage telemetry. Failures are never fatal to the request.
pub trait StageSink: Send + Sync {
    fn record_stage(&self, record: &StageRecord) -> Result<()>;
}

/// Forwards stage records to the `metrics` facade
#[derive(Debug, Default)]
pub struct MetricsStageSink;

impl StageSink for MetricsStageSink {
    fn record_stage(&self, record: &StageRecord) -> Result<()> {
        metrics::record_stage(
            record.stage.as_str(),
            record.duration_ms as f64 / 1000.0,
            record.output_count,
            record.success,
        );
        Ok(())
    }
}

/// Drops every record
#[derive(Debug, Default)]
pub struct NoopStageSink;

impl StageSink for NoopStageSink {
    fn record_stage(&self, _record: &StageRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct RecordingStageSink {
    records: Mutex<Vec<StageRecord>>,
    rejecting: bool,
}

impl RecordingStageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every write fails
    pub fn rejecting() -> Self {
        Self { records: Mutex::new(Vec::new()), rejecting: true }
    }

    pub fn records(&self) -> Vec<StageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl StageSink for RecordingStageSink {
    fn record_stage(&self, record: &StageRecord) -> Result<()> {
        if self.rejecting {
            return Err(AppError::Internal { message: "stage sink rejected record".to_string() });
        }
        self.records
            .lock()
            .map_err(|_| AppError::Internal { message: "stage sink lock poisoned".to_string() })?
            .push(record.clone());
        Ok(())
    }
}
