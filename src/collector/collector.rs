//! Main collector that runs one collection cycle against an array.
//!
//! A run is strictly sequential: reconcile the sampling interval, fetch the
//! manifests, collect the statistics blobs, then decode, extract and deliver
//! each entity class, and finally aggregate configured pools. Any error
//! aborts the run and names the stage that failed; the external scheduler
//! starts the next attempt.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{Local, TimeZone};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collector::entity::{EntityClass, IgnoreTable};
use crate::collector::extract::{ExtractError, Extractor};
use crate::collector::interval::{IntervalReconciliationError, SamplingInterval, ensure_interval};
use crate::collector::manifest::{DecodedTable, Manifest, ManifestMismatchError, decode};
use crate::collector::pool::{DEFAULT_POOL_METRICS, aggregate};
use crate::collector::traits::{ManagementService, ServiceError};
use crate::sink::{DeliveryError, DeliveryGate, DeliveryOutcome, TelemetrySink};
use crate::storage::CheckpointStore;

/// Metric key prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "emc.vnx.perf";

/// A storage pool whose disk and volume counters are summed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub id: String,
    pub metrics: Vec<String>,
}

impl PoolConfig {
    /// Pool summing [`DEFAULT_POOL_METRICS`].
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metrics: DEFAULT_POOL_METRICS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Checkpoint scope of this pool.
    pub fn scope(&self) -> String {
        format!("pool.{}", self.id)
    }
}

/// Everything one collector needs to know about its array.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Array serial; also the routing host for the sink.
    pub array_id: String,
    pub sampling_interval: SamplingInterval,
    /// Classes delivered per device, in delivery order.
    pub entity_classes: Vec<EntityClass>,
    pub key_prefix: String,
    pub ignore: IgnoreTable,
    pub pools: Vec<PoolConfig>,
}

impl CollectorConfig {
    /// Collects every entity class at the default cadence.
    pub fn new(array_id: impl Into<String>) -> Self {
        Self {
            array_id: array_id.into(),
            sampling_interval: SamplingInterval::default(),
            entity_classes: EntityClass::ALL.to_vec(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ignore: IgnoreTable::with_defaults(),
            pools: Vec::new(),
        }
    }

    /// Classes whose blobs must be fetched and decoded, sorted by blob index.
    fn required_classes(&self) -> Vec<EntityClass> {
        let mut classes = self.entity_classes.clone();
        if !self.pools.is_empty() {
            classes.push(EntityClass::Disks);
            classes.push(EntityClass::Volumes);
        }
        classes.sort_by_key(|c| c.blob_index());
        classes.dedup();
        classes
    }
}

/// Pipeline stage, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reconcile,
    ManifestFetch,
    Collect,
    Decode,
    Extract,
    PoolMembership,
    Deliver,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Reconcile => "reconcile",
            Stage::ManifestFetch => "manifest fetch",
            Stage::Collect => "collect",
            Stage::Decode => "decode",
            Stage::Extract => "extract",
            Stage::PoolMembership => "pool membership",
            Stage::Deliver => "deliver",
        };
        f.write_str(name)
    }
}

/// A failed collection run.
#[derive(Debug)]
pub enum RunError {
    Reconcile(IntervalReconciliationError),
    ManifestFetch {
        class: EntityClass,
        source: ServiceError,
    },
    Collect(ServiceError),
    /// The collect output has no blob at the class's position.
    MissingBlob {
        class: EntityClass,
        available: usize,
    },
    Decode {
        class: EntityClass,
        source: ManifestMismatchError,
    },
    Extract {
        scope: String,
        source: ExtractError,
    },
    PoolMembership {
        pool: String,
        source: ServiceError,
    },
    Deliver {
        scope: String,
        source: DeliveryError,
    },
}

impl RunError {
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Reconcile(_) => Stage::Reconcile,
            RunError::ManifestFetch { .. } => Stage::ManifestFetch,
            RunError::Collect(_) => Stage::Collect,
            RunError::MissingBlob { .. } | RunError::Decode { .. } => Stage::Decode,
            RunError::Extract { .. } => Stage::Extract,
            RunError::PoolMembership { .. } => Stage::PoolMembership,
            RunError::Deliver { .. } => Stage::Deliver,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: ", self.stage())?;
        match self {
            RunError::Reconcile(e) => write!(f, "{}", e),
            RunError::ManifestFetch { class, source } => write!(f, "{}: {}", class, source),
            RunError::Collect(e) => write!(f, "{}", e),
            RunError::MissingBlob { class, available } => write!(
                f,
                "{}: no blob at position {} (service returned {})",
                class,
                class.blob_index(),
                available
            ),
            RunError::Decode { class, source } => write!(f, "{}: {}", class, source),
            RunError::Extract { scope, source } => write!(f, "{}: {}", scope, source),
            RunError::PoolMembership { pool, source } => write!(f, "pool {}: {}", pool, source),
            RunError::Deliver { scope, source } => write!(f, "{}: {}", scope, source),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Reconcile(e) => Some(e),
            RunError::ManifestFetch { source, .. } => Some(source),
            RunError::Collect(e) => Some(e),
            RunError::MissingBlob { .. } => None,
            RunError::Decode { source, .. } => Some(source),
            RunError::Extract { source, .. } => Some(source),
            RunError::PoolMembership { source, .. } => Some(source),
            RunError::Deliver { source, .. } => Some(source),
        }
    }
}

impl From<IntervalReconciliationError> for RunError {
    fn from(e: IntervalReconciliationError) -> Self {
        RunError::Reconcile(e)
    }
}

/// What happened to one scope's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub scope: String,
    pub rows: usize,
    pub samples: usize,
    pub not_applicable: usize,
    pub timestamp: Option<i64>,
    /// `None` when there was nothing to deliver.
    pub outcome: Option<DeliveryOutcome>,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub array_id: String,
    pub interval_changed: bool,
    pub batches: Vec<BatchReport>,
    pub elapsed_ms: u128,
}

impl RunReport {
    pub fn batch(&self, scope: &str) -> Option<&BatchReport> {
        self.batches.iter().find(|b| b.scope == scope)
    }

    pub fn sent(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.outcome == Some(DeliveryOutcome::Sent))
            .count()
    }
}

/// Runs collection cycles for one array.
pub struct Collector<M, C, S>
where
    M: ManagementService,
    C: CheckpointStore,
    S: TelemetrySink,
{
    service: M,
    gate: DeliveryGate<C, S>,
    config: CollectorConfig,
}

impl<M, C, S> Collector<M, C, S>
where
    M: ManagementService,
    C: CheckpointStore,
    S: TelemetrySink,
{
    pub fn new(service: M, gate: DeliveryGate<C, S>, config: CollectorConfig) -> Self {
        Self {
            service,
            gate,
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn service(&self) -> &M {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut M {
        &mut self.service
    }

    pub fn gate(&self) -> &DeliveryGate<C, S> {
        &self.gate
    }

    /// Runs one collection cycle.
    pub fn run(&mut self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let array = self.config.array_id.clone();
        let mut report = RunReport {
            array_id: array.clone(),
            ..RunReport::default()
        };

        report.interval_changed =
            ensure_interval(&mut self.service, &array, self.config.sampling_interval)?;

        let classes = self.config.required_classes();
        let mut manifests: Vec<(EntityClass, Manifest)> = Vec::with_capacity(classes.len());
        for class in classes {
            let manifest = self
                .service
                .manifest(&array, class)
                .map_err(|source| RunError::ManifestFetch { class, source })?;
            debug!("Manifest for {}: {} columns", class, manifest.len());
            manifests.push((class, manifest));
        }

        let blobs = self
            .service
            .collect_statistics(&array)
            .map_err(RunError::Collect)?;
        if blobs.len() != EntityClass::ALL.len() {
            warn!(
                "Expected {} statistics blobs from {}, got {}",
                EntityClass::ALL.len(),
                array,
                blobs.len()
            );
        }

        let mut tables: BTreeMap<EntityClass, DecodedTable<'_>> = BTreeMap::new();
        for (class, manifest) in &manifests {
            let class = *class;
            let blob = blobs
                .get(class.blob_index())
                .ok_or(RunError::MissingBlob {
                    class,
                    available: blobs.len(),
                })?;
            let table =
                decode(manifest, blob).map_err(|source| RunError::Decode { class, source })?;
            check_instance_marker(class, &table);
            tables.insert(class, table);
        }

        let extractor = Extractor::new(&self.config.array_id, &self.config.key_prefix);
        for &class in &self.config.entity_classes {
            let Some(table) = tables.get(&class) else {
                continue;
            };
            let scope = class.name().to_string();
            let extraction = extractor
                .extract(table, self.config.ignore.get(class))
                .map_err(|source| RunError::Extract {
                    scope: scope.clone(),
                    source,
                })?;

            let outcome = match extraction.timestamp {
                Some(ts) if !extraction.samples.is_empty() => {
                    Some(deliver(&mut self.gate, &array, &scope, &extraction.samples, ts)?)
                }
                _ => {
                    debug!("No samples for {}, nothing to deliver", scope);
                    None
                }
            };

            report.batches.push(BatchReport {
                scope,
                rows: extraction.rows,
                samples: extraction.samples.len(),
                not_applicable: extraction.not_applicable,
                timestamp: extraction.timestamp,
                outcome,
            });
        }

        for pool in &self.config.pools {
            let scope = pool.scope();
            let membership = self
                .service
                .pool_membership(&array, &pool.id)
                .map_err(|source| RunError::PoolMembership {
                    pool: pool.id.clone(),
                    source,
                })?;
            if membership.is_empty() {
                warn!("Pool {} has no members", pool.id);
            }

            let (Some(disks), Some(volumes)) = (
                tables.get(&EntityClass::Disks),
                tables.get(&EntityClass::Volumes),
            ) else {
                continue;
            };
            let agg = aggregate(&membership, disks, volumes, &pool.metrics).map_err(|source| {
                RunError::Extract {
                    scope: scope.clone(),
                    source,
                }
            })?;
            let samples = agg.to_samples(&array, &self.config.key_prefix, &pool.id);

            let outcome = match agg.timestamp {
                Some(ts) if !samples.is_empty() => {
                    Some(deliver(&mut self.gate, &array, &scope, &samples, ts)?)
                }
                _ => {
                    debug!("Pool {} matched no rows, nothing to deliver", pool.id);
                    None
                }
            };

            report.batches.push(BatchReport {
                scope,
                rows: agg.matched_disks + agg.matched_volumes,
                samples: samples.len(),
                not_applicable: 0,
                timestamp: agg.timestamp,
                outcome,
            });
        }

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            "Run for {} finished: {} of {} batches sent in {}ms",
            array,
            report.sent(),
            report.batches.len(),
            report.elapsed_ms
        );
        Ok(report)
    }
}

fn deliver<C: CheckpointStore, S: TelemetrySink>(
    gate: &mut DeliveryGate<C, S>,
    array: &str,
    scope: &str,
    samples: &[crate::collector::extract::MetricSample],
    timestamp: i64,
) -> Result<DeliveryOutcome, RunError> {
    let outcome = gate
        .deliver(array, scope, samples, timestamp)
        .map_err(|source| RunError::Deliver {
            scope: scope.to_string(),
            source,
        })?;

    if outcome == DeliveryOutcome::Sent {
        let stat_time = Local
            .timestamp_opt(timestamp, 0)
            .single()
            .map(|t| t.format("%c").to_string())
            .unwrap_or_else(|| timestamp.to_string());
        info!(
            "Sent {} samples for {} (current time: {}, stat time: {})",
            samples.len(),
            scope,
            Local::now().format("%c"),
            stat_time
        );
    }
    Ok(outcome)
}

/// Cross-checks the positional blob mapping against the instance ids the
/// blob actually contains.
fn check_instance_marker(class: EntityClass, table: &DecodedTable<'_>) {
    let Some(marker) = class.instance_marker() else {
        return;
    };
    let Some(position) = table
        .manifest()
        .position(crate::collector::manifest::INSTANCE_ID)
    else {
        return;
    };
    let foreign = table
        .rows()
        .filter_map(|row| row.field(position))
        .filter(|id| !id.contains(marker))
        .count();
    if foreign > 0 {
        warn!(
            "{} of {} {} rows lack '{}' in their instance id; blob order may have changed",
            foreign,
            table.len(),
            class,
            marker
        );
    }
}
