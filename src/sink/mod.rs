//! Delivery of sample batches to the monitoring backend.
//!
//! The [`DeliveryGate`] sits in front of a [`TelemetrySink`] and guarantees
//! that one sampling interval is never delivered twice for the same scope,
//! even across restarts, by consulting a durable checkpoint.

mod command;

pub use command::{CommandSink, DEFAULT_SENDER, DEFAULT_SENDER_CONFIG, WriterSink};

use std::io;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::collector::extract::MetricSample;
use crate::storage::{CheckpointError, CheckpointStore};

/// Error returned by a sink for a whole batch.
#[derive(Debug)]
pub enum SinkError {
    /// Could not write the batch or start the sender.
    Io(io::Error),
    /// The sender ran but reported failure.
    Rejected { status: Option<i32>, output: String },
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "sink I/O error: {}", e),
            SinkError::Rejected { status, output } => {
                match status {
                    Some(code) => write!(f, "sink exited with status {}", code)?,
                    None => write!(f, "sink terminated by signal")?,
                }
                if !output.is_empty() {
                    write!(f, ": {}", output)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(e) => Some(e),
            SinkError::Rejected { .. } => None,
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::Io(e)
    }
}

/// Samples serialized in the sink's line protocol, one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    lines: Vec<String>,
}

impl Batch {
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        Self {
            lines: samples.iter().map(MetricSample::to_line).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Payload handed to the sender.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Accepts a batch and delivers it to the monitoring backend.
///
/// `host` is the array identifier the backend routes the batch by. Success
/// and failure are per batch, not per line.
pub trait TelemetrySink {
    fn send(&mut self, host: &str, batch: &Batch) -> Result<(), SinkError>;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn send(&mut self, host: &str, batch: &Batch) -> Result<(), SinkError> {
        (**self).send(host, batch)
    }
}

/// Result of a delivery attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    /// This scope already delivered this timestamp; the sink was not called.
    SkippedDuplicate,
}

/// A batch could not be delivered.
///
/// When the sink fails the checkpoint is left alone so the next run retries
/// the same interval.
#[derive(Debug)]
pub enum DeliveryError {
    Sink(SinkError),
    Checkpoint(CheckpointError),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Sink(e) => write!(f, "{}", e),
            DeliveryError::Checkpoint(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Sink(e) => Some(e),
            DeliveryError::Checkpoint(e) => Some(e),
        }
    }
}

/// Checkpoint key of `scope` on `array`.
pub fn checkpoint_key(array: &str, scope: &str) -> String {
    format!("{}.{}", array, scope)
}

/// Deduplicating front of a sink.
pub struct DeliveryGate<C: CheckpointStore, S: TelemetrySink> {
    checkpoints: C,
    sink: S,
}

impl<C: CheckpointStore, S: TelemetrySink> DeliveryGate<C, S> {
    pub fn new(checkpoints: C, sink: S) -> Self {
        Self { checkpoints, sink }
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Delivers `samples` for `scope` unless `timestamp` was already sent.
    ///
    /// The checkpoint advances only after the sink accepted the batch.
    pub fn deliver(
        &mut self,
        array: &str,
        scope: &str,
        samples: &[MetricSample],
        timestamp: i64,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let key = checkpoint_key(array, scope);
        let last = self
            .checkpoints
            .get(&key)
            .map_err(DeliveryError::Checkpoint)?;

        if last == Some(timestamp) {
            info!("Skipping {}: interval {} already delivered", key, timestamp);
            return Ok(DeliveryOutcome::SkippedDuplicate);
        }

        let batch = Batch::from_samples(samples);
        debug!("Sending {} samples for {}", batch.len(), key);
        self.sink.send(array, &batch).map_err(|e| {
            error!("Delivery of {} failed: {}", key, e);
            DeliveryError::Sink(e)
        })?;

        self.checkpoints
            .put(&key, timestamp)
            .map_err(DeliveryError::Checkpoint)?;
        Ok(DeliveryOutcome::Sent)
    }
}
