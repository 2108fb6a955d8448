//! Block performance statistics collector for storage arrays.
//!
//! This module drives one collection cycle against a storage array's
//! management service and turns the returned statistics blobs into
//! timestamped metric samples.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Collector                           │
//! │  ensure_interval ─► manifests ─► collect ─► decode ─► extract│
//! │                                               │        │     │
//! │                                          pool::aggregate     │
//! │                                               │        │     │
//! │                                        ┌──────▼────────▼──┐  │
//! │                                        │   DeliveryGate   │  │
//! │                                        └──────┬───────────┘  │
//! │            ┌──────────────────┐               │              │
//! │            │ ManagementService│ (trait)       │              │
//! │            └────────┬─────────┘               │              │
//! └─────────────────────┼─────────────────────────┼──────────────┘
//!                       │                         │
//!          ┌────────────┼──────────┐     ┌────────┴─────────┐
//!   ┌──────▼────────┐ ┌─▼─────────┐│     │ TelemetrySink    │
//!   │CaptureDirSvc  │ │MockService││     │ CheckpointStore  │
//!   │ (directory)   │ │ (testing) ││     └──────────────────┘
//!   └───────────────┘ └───────────┘│
//! ```
//!
//! # Usage
//!
//! ```
//! use vnxstat::collector::mock::RecordingSink;
//! use vnxstat::collector::{Collector, CollectorConfig, MockService};
//! use vnxstat::sink::DeliveryGate;
//! use vnxstat::storage::MemoryCheckpointStore;
//!
//! let service = MockService::typical_array("APM001");
//! let gate = DeliveryGate::new(MemoryCheckpointStore::new(), RecordingSink::new());
//! let mut collector = Collector::new(service, gate, CollectorConfig::new("APM001"));
//! let report = collector.run().unwrap();
//! assert!(report.sent() > 0);
//! ```

pub mod capture;
#[allow(clippy::module_inception)]
mod collector;
pub mod entity;
pub mod extract;
pub mod interval;
pub mod manifest;
pub mod mock;
pub mod pool;
pub mod traits;

pub use capture::CaptureDirService;
pub use collector::{
    BatchReport, Collector, CollectorConfig, DEFAULT_KEY_PREFIX, PoolConfig, RunError, RunReport,
    Stage,
};
pub use entity::{EntityClass, IgnoreRule, IgnoreTable};
pub use extract::{Extractor, MetricSample};
pub use interval::{SamplingInterval, ensure_interval};
pub use manifest::{DecodedTable, Manifest, decode};
pub use mock::MockService;
pub use pool::{PoolMembership, aggregate};
pub use traits::{ManagementService, ServiceError};
