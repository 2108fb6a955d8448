//! Storage-pool level aggregation of disk and volume counters.
//!
//! This is the only place counters are summed across devices; everywhere
//! else samples are emitted per device.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collector::extract::{
    ExtractError, MetricSample, NOT_APPLICABLE, metric_key, row_timestamp,
};
use crate::collector::manifest::{DecodedTable, FixedColumns};

/// Counters summed per pool when none are configured.
pub const DEFAULT_POOL_METRICS: &[&str] = &[
    "TotalIOs",
    "KBytesTransferred",
    "ReadIOs",
    "KBytesRead",
    "WriteIOs",
    "KBytesWritten",
];

/// Devices associated with one storage pool at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMembership {
    #[serde(default)]
    pub disks: HashSet<String>,
    #[serde(default)]
    pub volumes: HashSet<String>,
}

impl PoolMembership {
    pub fn is_empty(&self) -> bool {
        self.disks.is_empty() && self.volumes.is_empty()
    }
}

/// Summed counters of one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolAggregate {
    pub disks: BTreeMap<String, u64>,
    pub volumes: BTreeMap<String, u64>,
    /// Timestamp of the last row processed.
    pub timestamp: Option<i64>,
    /// Rows within the pool disagreed on their timestamp.
    pub diverged: bool,
    pub matched_disks: usize,
    pub matched_volumes: usize,
}

impl PoolAggregate {
    /// Pool-level samples keyed as `<prefix>.pool.<disks|volumes>.<metric>[<pool>]`.
    pub fn to_samples(&self, array_id: &str, key_prefix: &str, pool: &str) -> Vec<MetricSample> {
        let Some(timestamp) = self.timestamp else {
            return Vec::new();
        };

        let disk_prefix = format!("{}.pool.disks", key_prefix);
        let volume_prefix = format!("{}.pool.volumes", key_prefix);
        let sums = self
            .disks
            .iter()
            .map(|(m, v)| (&disk_prefix, m, v))
            .chain(self.volumes.iter().map(|(m, v)| (&volume_prefix, m, v)));

        sums.map(|(prefix, metric, value)| MetricSample {
            array_id: array_id.to_string(),
            metric_key: metric_key(prefix, metric, pool),
            timestamp,
            value: value.to_string(),
        })
        .collect()
    }
}

#[derive(Default)]
struct TimestampTracker {
    last: Option<i64>,
    diverged: bool,
}

impl TimestampTracker {
    fn observe(&mut self, ts: i64) {
        if let Some(prev) = self.last {
            if prev != ts {
                self.diverged = true;
            }
        }
        self.last = Some(ts);
    }
}

/// Sums `metric_names` over the rows of `table` whose instance id is in
/// `members`. Returns the number of matched rows.
fn sum_members(
    table: &DecodedTable<'_>,
    members: &HashSet<String>,
    metric_names: &[String],
    sums: &mut BTreeMap<String, u64>,
    clock: &mut TimestampTracker,
) -> Result<usize, ExtractError> {
    let manifest = table.manifest();
    let fixed = FixedColumns::locate(manifest)?;

    let mut columns = Vec::with_capacity(metric_names.len());
    for name in metric_names {
        match manifest.position(name) {
            Some(i) => columns.push((i, name.as_str())),
            None => warn!("Pool metric {} is not in the manifest, skipping", name),
        }
    }

    let mut matched = 0;
    for (index, row) in table.rows().enumerate() {
        let device = row.field(fixed.instance_id).unwrap_or_default();
        if !members.contains(device) {
            continue;
        }
        matched += 1;
        clock.observe(row_timestamp(row, index, &fixed)?);

        for &(column, name) in &columns {
            // A sum exists only once a member row has been seen.
            let sum = sums.entry(name.to_string()).or_insert(0);
            let raw = row.field(column).unwrap_or_default();
            if raw == NOT_APPLICABLE {
                continue;
            }
            match raw.trim().parse::<u64>() {
                Ok(v) => *sum = sum.saturating_add(v),
                Err(_) => warn!(
                    "Non-numeric {} value '{}' for {}, not summed",
                    name, raw, device
                ),
            }
        }
    }

    Ok(matched)
}

/// Sums each requested metric over the pool's disks and volumes.
///
/// Rows of devices outside `membership` are ignored. All rows of one
/// collection are expected to share a timestamp; if they do not, the last
/// one seen wins and the result is flagged as diverged.
pub fn aggregate(
    membership: &PoolMembership,
    disk_rows: &DecodedTable<'_>,
    volume_rows: &DecodedTable<'_>,
    metric_names: &[String],
) -> Result<PoolAggregate, ExtractError> {
    let mut clock = TimestampTracker::default();
    let mut result = PoolAggregate::default();

    result.matched_disks = sum_members(
        disk_rows,
        &membership.disks,
        metric_names,
        &mut result.disks,
        &mut clock,
    )?;
    result.matched_volumes = sum_members(
        volume_rows,
        &membership.volumes,
        metric_names,
        &mut result.volumes,
        &mut clock,
    )?;

    if clock.diverged {
        warn!(
            "Pool rows carry differing timestamps, using last seen {:?}",
            clock.last
        );
    }
    result.timestamp = clock.last;
    result.diverged = clock.diverged;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::manifest::{Manifest, decode};
    use crate::util::CimTimestamp;

    const TS: &str = "20230101120000.000000+000";
    const LATER: &str = "20230101121000.000000+000";

    fn manifest() -> Manifest {
        Manifest::new([
            "InstanceID",
            "ElementType",
            "StatisticTime",
            "TotalIOs",
            "ReadIOs",
        ])
        .unwrap()
    }

    fn members(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn metrics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sums_only_pool_members() {
        let m = manifest();
        let disks = decode(
            &m,
            &format!("A;10;{ts};10;1\nB;10;{ts};20;2\nC;10;{ts};5;3\n", ts = TS),
        )
        .unwrap();
        let volumes = decode(&m, "").unwrap();
        let membership = PoolMembership {
            disks: members(&["A", "B"]),
            volumes: HashSet::new(),
        };

        let agg = aggregate(&membership, &disks, &volumes, &metrics(&["TotalIOs"])).unwrap();
        assert_eq!(agg.disks.get("TotalIOs"), Some(&30));
        assert_eq!(agg.matched_disks, 2);
        assert_eq!(agg.timestamp, Some(CimTimestamp::parse(TS).unwrap().epoch()));
        assert!(!agg.diverged);
    }

    #[test]
    fn disks_and_volumes_summed_separately() {
        let m = manifest();
        let disks = decode(&m, &format!("A;10;{ts};10;1\n", ts = TS)).unwrap();
        let volumes = decode(
            &m,
            &format!("V1;2;{ts};100;7\nV2;2;{ts};50;8\nV3;2;{ts};1;1\n", ts = TS),
        )
        .unwrap();
        let membership = PoolMembership {
            disks: members(&["A"]),
            volumes: members(&["V1", "V2"]),
        };

        let agg = aggregate(&membership, &disks, &volumes, &metrics(&["TotalIOs", "ReadIOs"]))
            .unwrap();
        assert_eq!(agg.disks.get("TotalIOs"), Some(&10));
        assert_eq!(agg.volumes.get("TotalIOs"), Some(&150));
        assert_eq!(agg.volumes.get("ReadIOs"), Some(&15));
        assert_eq!(agg.matched_volumes, 2);
    }

    #[test]
    fn side_without_member_rows_emits_nothing() {
        let m = manifest();
        let disks = decode(&m, &format!("A;10;{ts};10;1\n", ts = TS)).unwrap();
        let volumes = decode(&m, &format!("V9;2;{ts};100;7\n", ts = TS)).unwrap();
        let membership = PoolMembership {
            disks: members(&["A"]),
            volumes: members(&["V1"]),
        };

        let agg = aggregate(&membership, &disks, &volumes, &metrics(&["TotalIOs"])).unwrap();
        assert_eq!(agg.matched_volumes, 0);
        assert!(agg.volumes.is_empty());

        let samples = agg.to_samples("APM001", "emc.vnx.perf", "Pool_0");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metric_key, "emc.vnx.perf.pool.disks.TotalIOs[Pool_0]");
    }

    #[test]
    fn not_applicable_does_not_contribute() {
        let m = manifest();
        let disks = decode(
            &m,
            &format!("A;10;{ts};{na};1\nB;10;{ts};4;1\n", ts = TS, na = NOT_APPLICABLE),
        )
        .unwrap();
        let volumes = decode(&m, "").unwrap();
        let membership = PoolMembership {
            disks: members(&["A", "B"]),
            volumes: HashSet::new(),
        };
        let agg = aggregate(&membership, &disks, &volumes, &metrics(&["TotalIOs"])).unwrap();
        assert_eq!(agg.disks.get("TotalIOs"), Some(&4));
    }

    #[test]
    fn diverging_timestamps_use_last_and_flag() {
        let m = manifest();
        let disks = decode(&m, &format!("A;10;{};1;1\nB;10;{};2;2\n", TS, LATER)).unwrap();
        let volumes = decode(&m, "").unwrap();
        let membership = PoolMembership {
            disks: members(&["A", "B"]),
            volumes: HashSet::new(),
        };
        let agg = aggregate(&membership, &disks, &volumes, &metrics(&["TotalIOs"])).unwrap();
        assert!(agg.diverged);
        assert_eq!(agg.timestamp, Some(CimTimestamp::parse(LATER).unwrap().epoch()));
        assert_eq!(agg.disks.get("TotalIOs"), Some(&3));
    }

    #[test]
    fn unknown_metric_is_skipped() {
        let m = manifest();
        let disks = decode(&m, &format!("A;10;{};1;1\n", TS)).unwrap();
        let volumes = decode(&m, "").unwrap();
        let membership = PoolMembership {
            disks: members(&["A"]),
            volumes: HashSet::new(),
        };
        let agg = aggregate(&membership, &disks, &volumes, &metrics(&["Bogus", "TotalIOs"]))
            .unwrap();
        assert!(!agg.disks.contains_key("Bogus"));
        assert_eq!(agg.disks.get("TotalIOs"), Some(&1));
    }

    #[test]
    fn samples_use_pool_keys() {
        let mut agg = PoolAggregate {
            timestamp: Some(1_672_574_400),
            ..PoolAggregate::default()
        };
        agg.disks.insert("TotalIOs".to_string(), 30);
        agg.volumes.insert("TotalIOs".to_string(), 12);

        let samples = agg.to_samples("APM001", "emc.vnx.perf", "Pool_0");
        let lines: Vec<_> = samples.iter().map(MetricSample::to_line).collect();
        assert_eq!(
            lines,
            vec![
                "APM001 emc.vnx.perf.pool.disks.TotalIOs[Pool_0] 1672574400 30",
                "APM001 emc.vnx.perf.pool.volumes.TotalIOs[Pool_0] 1672574400 12",
            ]
        );
    }

    #[test]
    fn no_matched_rows_yields_no_samples() {
        let agg = PoolAggregate::default();
        assert!(agg.to_samples("a", "p", "pool").is_empty());
    }

    #[test]
    fn membership_from_json() {
        let m: PoolMembership =
            serde_json::from_str(r#"{"disks": ["A", "B"], "volumes": ["V1"]}"#).unwrap();
        assert_eq!(m.disks.len(), 2);
        assert!(m.volumes.contains("V1"));
        let only_disks: PoolMembership = serde_json::from_str(r#"{"disks": ["A"]}"#).unwrap();
        assert!(only_disks.volumes.is_empty());
    }
}
