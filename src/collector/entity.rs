//! Entity classes and their per-class data tables.
//!
//! One collect-statistics call returns one blob per entity class. The blobs
//! are positional: the index of each class is an external contract with the
//! management service and can shift between firmware versions, so it lives
//! in exactly one table here.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

/// Statistics domain a blob belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Array,
    Disks,
    StorageProcessors,
    StorageProcessorPorts,
    Snapshots,
    Volumes,
}

/// Vendor blob ordering. Position `i` holds the class whose blob is at
/// index `i` of the collect-statistics output.
const BLOB_ORDER: [EntityClass; 6] = [
    EntityClass::Array,
    EntityClass::Disks,
    EntityClass::StorageProcessors,
    EntityClass::StorageProcessorPorts,
    EntityClass::Snapshots,
    EntityClass::Volumes,
];

impl EntityClass {
    pub const ALL: [EntityClass; 6] = BLOB_ORDER;

    /// Position of this class's blob in the collect-statistics output.
    pub fn blob_index(self) -> usize {
        BLOB_ORDER
            .iter()
            .position(|c| *c == self)
            .unwrap_or_default()
    }

    pub fn from_blob_index(index: usize) -> Option<Self> {
        BLOB_ORDER.get(index).copied()
    }

    /// Short name used in checkpoint scopes, file names, and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            EntityClass::Array => "array",
            EntityClass::Disks => "disks",
            EntityClass::StorageProcessors => "sp",
            EntityClass::StorageProcessorPorts => "sp_ports",
            EntityClass::Snapshots => "snapshots",
            EntityClass::Volumes => "volumes",
        }
    }

    /// Substring every instance id of this class is expected to contain.
    ///
    /// Used to cross-check the positional mapping against the blob's own
    /// contents. `None` where the id format is not known.
    pub fn instance_marker(self) -> Option<&'static str> {
        match self {
            EntityClass::Disks => Some("+Disk+"),
            EntityClass::StorageProcessors => Some("+FEAdapt+"),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for EntityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "array" => Ok(EntityClass::Array),
            "disks" | "disk" => Ok(EntityClass::Disks),
            "sp" | "sps" | "storage_processors" => Ok(EntityClass::StorageProcessors),
            "sp_ports" | "ports" | "storage_processor_ports" => {
                Ok(EntityClass::StorageProcessorPorts)
            }
            "snapshots" | "snaps" => Ok(EntityClass::Snapshots),
            "volumes" | "volume" => Ok(EntityClass::Volumes),
            other => Err(format!(
                "unknown entity class '{}' (expected one of: {})",
                other,
                EntityClass::ALL.map(EntityClass::name).join(", ")
            )),
        }
    }
}

/// Set of column names excluded from extraction.
pub type IgnoreList = BTreeSet<String>;

static NO_IGNORES: IgnoreList = BTreeSet::new();

/// Columns dropped by default, per class.
///
/// Extend this table when firmware adds counters that should not be
/// forwarded; extraction code never names columns itself.
const DEFAULT_IGNORED_COLUMNS: &[(EntityClass, &[&str])] = &[
    (EntityClass::Array, &[]),
    (EntityClass::Disks, &[]),
    (EntityClass::StorageProcessors, &[]),
    (EntityClass::StorageProcessorPorts, &[]),
    (EntityClass::Snapshots, &[]),
    (EntityClass::Volumes, &[]),
];

/// Per-class ignore lists, loaded once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreTable {
    columns: HashMap<EntityClass, IgnoreList>,
}

impl IgnoreTable {
    /// Table with no ignored columns at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table seeded from the built-in defaults.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        for (class, columns) in DEFAULT_IGNORED_COLUMNS {
            for column in *columns {
                table.insert(*class, *column);
            }
        }
        table
    }

    pub fn insert(&mut self, class: EntityClass, column: impl Into<String>) {
        self.columns.entry(class).or_default().insert(column.into());
    }

    pub fn get(&self, class: EntityClass) -> &IgnoreList {
        self.columns.get(&class).unwrap_or(&NO_IGNORES)
    }

    pub fn is_ignored(&self, class: EntityClass, column: &str) -> bool {
        self.get(class).contains(column)
    }
}

/// A single `CLASS:COLUMN` ignore rule as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    pub class: EntityClass,
    pub column: String,
}

impl std::str::FromStr for IgnoreRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, column) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid ignore rule '{}': expected CLASS:COLUMN", s))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(format!("invalid ignore rule '{}': empty column name", s));
        }
        Ok(Self {
            class: class.parse()?,
            column: column.to_string(),
        })
    }
}
