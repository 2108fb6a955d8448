//! Durable state kept between runs.

pub mod checkpoint;

pub use checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
