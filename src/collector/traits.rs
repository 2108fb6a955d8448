//! Abstraction over the array's management service.
//!
//! The `ManagementService` trait allows the collector to work against a real
//! management endpoint, a captured directory of responses, or an in-memory
//! mock for testing.

use std::io;
use std::time::Duration;

use crate::collector::entity::EntityClass;
use crate::collector::interval::SamplingInterval;
use crate::collector::manifest::Manifest;
use crate::collector::pool::PoolMembership;

/// Error returned by a management-service call.
#[derive(Debug)]
pub enum ServiceError {
    /// Underlying transport or storage failed.
    Io(io::Error),
    /// The requested object does not exist on the service.
    NotFound(String),
    /// The service answered with something we could not interpret.
    Protocol(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Io(e) => write!(f, "management service I/O error: {}", e),
            ServiceError::NotFound(what) => write!(f, "management service: {} not found", what),
            ServiceError::Protocol(msg) => write!(f, "management service protocol error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> Self {
        ServiceError::Io(e)
    }
}

/// Operations the collector needs from the array's management service.
///
/// All calls are synchronous and blocking. Timeouts and retries, if any,
/// belong to the implementation.
pub trait ManagementService {
    /// Reads the array's currently configured statistics sampling interval.
    fn sampling_interval(&mut self, array: &str) -> Result<Duration, ServiceError>;

    /// Changes the array's statistics sampling interval.
    fn set_sampling_interval(
        &mut self,
        array: &str,
        interval: SamplingInterval,
    ) -> Result<(), ServiceError>;

    /// Returns the column layout of the statistics blob for `class`.
    fn manifest(&mut self, array: &str, class: EntityClass) -> Result<Manifest, ServiceError>;

    /// Invokes the collect-statistics operation.
    ///
    /// Blobs are returned in the vendor's positional order, see
    /// [`EntityClass::blob_index`].
    fn collect_statistics(&mut self, array: &str) -> Result<Vec<String>, ServiceError>;

    /// Returns the disks and volumes associated with a storage pool.
    fn pool_membership(&mut self, array: &str, pool: &str) -> Result<PoolMembership, ServiceError>;
}

impl<T: ManagementService + ?Sized> ManagementService for Box<T> {
    fn sampling_interval(&mut self, array: &str) -> Result<Duration, ServiceError> {
        (**self).sampling_interval(array)
    }

    fn set_sampling_interval(
        &mut self,
        array: &str,
        interval: SamplingInterval,
    ) -> Result<(), ServiceError> {
        (**self).set_sampling_interval(array, interval)
    }

    fn manifest(&mut self, array: &str, class: EntityClass) -> Result<Manifest, ServiceError> {
        (**self).manifest(array, class)
    }

    fn collect_statistics(&mut self, array: &str) -> Result<Vec<String>, ServiceError> {
        (**self).collect_statistics(array)
    }

    fn pool_membership(&mut self, array: &str, pool: &str) -> Result<PoolMembership, ServiceError> {
        (**self).pool_membership(array, pool)
    }
}
