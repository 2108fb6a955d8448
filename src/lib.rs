//! vnxstat - block storage performance statistics collector.
//!
//! This library provides the pieces used by the `vnxstat` binary:
//! - `collector` - interval reconciliation, blob decoding, metric extraction
//! - `sink` - deduplicated delivery to a zabbix_sender compatible backend
//! - `storage` - durable delivery checkpoints
//! - `util` - CIM datetime and interval handling

pub mod collector;
pub mod sink;
pub mod storage;
pub mod util;
