//! In-memory collaborators for testing the pipeline without an array.
//!
//! This module provides `MockService`, `RecordingSink` and pre-built
//! scenarios so collectors can be exercised without a management endpoint
//! or a monitoring backend.

pub mod scenarios;

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crate::collector::entity::EntityClass;
use crate::collector::interval::SamplingInterval;
use crate::collector::manifest::Manifest;
use crate::collector::pool::PoolMembership;
use crate::collector::traits::{ManagementService, ServiceError};
use crate::sink::{Batch, SinkError, TelemetrySink};

/// Management service backed by in-memory fixtures.
#[derive(Debug, Clone, Default)]
pub struct MockService {
    /// Currently configured sampling interval.
    pub interval: Duration,
    pub manifests: HashMap<EntityClass, Manifest>,
    /// Blobs in positional order.
    pub blobs: Vec<String>,
    pub pools: HashMap<String, PoolMembership>,
    /// Every successful `set_sampling_interval` call.
    pub interval_writes: Vec<SamplingInterval>,
    pub fail_interval_read: bool,
    pub fail_interval_write: bool,
    pub fail_collect: bool,
    pub collect_calls: usize,
}

impl MockService {
    /// Creates an empty service reporting `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Registers the manifest for `class`.
    ///
    /// # Panics
    /// If `columns` is not a valid manifest.
    pub fn add_manifest(&mut self, class: EntityClass, columns: &[&str]) {
        let manifest = Manifest::new(columns.iter().copied())
            .unwrap_or_else(|e| panic!("invalid mock manifest for {}: {}", class, e));
        self.manifests.insert(class, manifest);
    }

    /// Sets the blob at `class`'s position, padding earlier positions with
    /// empty blobs.
    pub fn set_blob(&mut self, class: EntityClass, blob: impl Into<String>) {
        let index = class.blob_index();
        if self.blobs.len() <= index {
            self.blobs.resize(index + 1, String::new());
        }
        self.blobs[index] = blob.into();
    }

    pub fn add_pool(&mut self, pool: &str, disks: &[&str], volumes: &[&str]) {
        self.pools.insert(
            pool.to_string(),
            PoolMembership {
                disks: disks.iter().map(|s| s.to_string()).collect(),
                volumes: volumes.iter().map(|s| s.to_string()).collect(),
            },
        );
    }
}

fn injected(what: &str) -> ServiceError {
    ServiceError::Io(io::Error::other(format!("injected {} failure", what)))
}

impl ManagementService for MockService {
    fn sampling_interval(&mut self, _array: &str) -> Result<Duration, ServiceError> {
        if self.fail_interval_read {
            return Err(injected("interval read"));
        }
        Ok(self.interval)
    }

    fn set_sampling_interval(
        &mut self,
        _array: &str,
        interval: SamplingInterval,
    ) -> Result<(), ServiceError> {
        if self.fail_interval_write {
            return Err(injected("interval write"));
        }
        self.interval = interval.as_duration();
        self.interval_writes.push(interval);
        Ok(())
    }

    fn manifest(&mut self, _array: &str, class: EntityClass) -> Result<Manifest, ServiceError> {
        self.manifests
            .get(&class)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("manifest for {}", class)))
    }

    fn collect_statistics(&mut self, _array: &str) -> Result<Vec<String>, ServiceError> {
        self.collect_calls += 1;
        if self.fail_collect {
            return Err(injected("collect"));
        }
        Ok(self.blobs.clone())
    }

    fn pool_membership(
        &mut self,
        _array: &str,
        pool: &str,
    ) -> Result<PoolMembership, ServiceError> {
        self.pools
            .get(pool)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("pool {}", pool)))
    }
}

/// Sink that records every batch it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    /// `(host, rendered batch)` per successful send.
    pub sent: Vec<(String, String)>,
    /// Fail every send while set.
    pub fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All delivered lines, across batches.
    pub fn lines(&self) -> Vec<String> {
        self.sent
            .iter()
            .flat_map(|(_, payload)| payload.lines().map(str::to_string))
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn send(&mut self, host: &str, batch: &Batch) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Rejected {
                status: Some(2),
                output: "injected failure".to_string(),
            });
        }
        self.sent.push((host.to_string(), batch.render()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_blob_pads_positions() {
        let mut service = MockService::new(Duration::from_secs(600));
        service.set_blob(EntityClass::Volumes, "v");
        assert_eq!(service.blobs.len(), 6);
        assert_eq!(service.blobs[5], "v");
        assert!(service.blobs[..5].iter().all(String::is_empty));
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let mut service = MockService::new(Duration::from_secs(600));
        let err = service.manifest("APM001", EntityClass::Disks).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn recording_sink_fails_on_demand() {
        let mut sink = RecordingSink::new();
        sink.fail = true;
        assert!(sink.send("APM001", &Batch::default()).is_err());
        assert!(sink.sent.is_empty());
    }
}
