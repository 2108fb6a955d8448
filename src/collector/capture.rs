//! Management service backed by a directory of captured responses.
//!
//! Layout, one directory per array serial:
//!
//! ```text
//! <root>/<array>/interval               CIM interval, e.g. 00000000001000.000000:000
//! <root>/<array>/manifests/<class>.txt  column names, `;` or newline separated
//! <root>/<array>/statistics/<n>.csv     blob at position n of the collect output
//! <root>/<array>/pools/<pool>.json      {"disks": [...], "volumes": [...]}
//! ```
//!
//! Interval changes are written back to the `interval` file, so the
//! directory behaves like an array that honors reconfiguration.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::collector::entity::EntityClass;
use crate::collector::interval::SamplingInterval;
use crate::collector::manifest::Manifest;
use crate::collector::pool::PoolMembership;
use crate::collector::traits::{ManagementService, ServiceError};
use crate::storage::checkpoint::write_atomic;
use crate::util::parse_cim_interval;

/// Capture-directory management service.
#[derive(Debug, Clone)]
pub struct CaptureDirService {
    root: PathBuf,
}

impl CaptureDirService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn array_dir(&self, array: &str) -> PathBuf {
        self.root.join(array)
    }

    fn interval_path(&self, array: &str) -> PathBuf {
        self.array_dir(array).join("interval")
    }

    fn read(&self, path: &Path, what: impl FnOnce() -> String) -> Result<String, ServiceError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ServiceError::NotFound(what())),
            Err(e) => Err(ServiceError::Io(e)),
        }
    }
}

impl ManagementService for CaptureDirService {
    fn sampling_interval(&mut self, array: &str) -> Result<Duration, ServiceError> {
        let path = self.interval_path(array);
        let raw = self.read(&path, || format!("sampling interval of {}", array))?;
        let raw = raw.trim();

        // Plain minutes are accepted for hand-written captures.
        if let Ok(minutes) = raw.parse::<u64>() {
            return Ok(Duration::from_secs(minutes.saturating_mul(60)));
        }
        parse_cim_interval(raw).map_err(|e| ServiceError::Protocol(e.to_string()))
    }

    fn set_sampling_interval(
        &mut self,
        array: &str,
        interval: SamplingInterval,
    ) -> Result<(), ServiceError> {
        let path = self.interval_path(array);
        std::fs::create_dir_all(self.array_dir(array))?;
        write_atomic(&path, interval.to_cim().as_bytes())?;
        Ok(())
    }

    fn manifest(&mut self, array: &str, class: EntityClass) -> Result<Manifest, ServiceError> {
        let path = self
            .array_dir(array)
            .join("manifests")
            .join(format!("{}.txt", class.name()));
        let header = self.read(&path, || format!("manifest for {}", class))?;
        Manifest::parse(&header)
            .map_err(|e| ServiceError::Protocol(format!("{}: {}", path.display(), e)))
    }

    fn collect_statistics(&mut self, array: &str) -> Result<Vec<String>, ServiceError> {
        let dir = self.array_dir(array).join("statistics");
        if !dir.is_dir() {
            return Err(ServiceError::NotFound(format!("statistics of {}", array)));
        }

        let mut blobs = Vec::new();
        loop {
            let path = dir.join(format!("{}.csv", blobs.len()));
            match std::fs::read_to_string(&path) {
                Ok(blob) => blobs.push(blob),
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(ServiceError::Io(e)),
            }
        }
        debug!("Read {} statistics blobs from {}", blobs.len(), dir.display());
        Ok(blobs)
    }

    fn pool_membership(&mut self, array: &str, pool: &str) -> Result<PoolMembership, ServiceError> {
        let path = self
            .array_dir(array)
            .join("pools")
            .join(format!("{}.json", pool));
        let raw = self.read(&path, || format!("pool {}", pool))?;
        serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Protocol(format!("{}: {}", path.display(), e)))
    }
}
