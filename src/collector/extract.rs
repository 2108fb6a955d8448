//! Turns decoded statistics rows into metric samples.

use serde::Serialize;
use tracing::debug;

use crate::collector::entity::IgnoreList;
use crate::collector::manifest::{DecodedTable, FixedColumns, ManifestError, Row};
use crate::util::{CimTimeError, CimTimestamp};

/// Raw value the array reports for a counter that does not apply to the
/// device (`u64::MAX`).
pub const NOT_APPLICABLE: &str = "18446744073709551615";

/// One time-series point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub array_id: String,
    pub metric_key: String,
    pub timestamp: i64,
    pub value: String,
}

impl MetricSample {
    /// `<array_id> <metric_key> <unix_timestamp> <value>`
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.array_id, self.metric_key, self.timestamp, self.value
        )
    }
}

/// `<prefix>.<metric>[<device>]`
pub fn metric_key(prefix: &str, metric: &str, device: &str) -> String {
    format!("{}.{}[{}]", prefix, metric, device)
}

/// Error while extracting samples from a decoded table.
#[derive(Debug)]
pub enum ExtractError {
    /// The manifest lacks a fixed column.
    Manifest(ManifestError),
    /// A row's timestamp could not be converted.
    Timestamp { row: usize, source: CimTimeError },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Manifest(e) => write!(f, "{}", e),
            ExtractError::Timestamp { row, source } => write!(f, "row {}: {}", row, source),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Manifest(e) => Some(e),
            ExtractError::Timestamp { source, .. } => Some(source),
        }
    }
}

impl From<ManifestError> for ExtractError {
    fn from(e: ManifestError) -> Self {
        ExtractError::Manifest(e)
    }
}

/// Samples extracted from one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub samples: Vec<MetricSample>,
    /// Timestamp of the last row, used as the batch timestamp.
    pub timestamp: Option<i64>,
    pub rows: usize,
    /// Values dropped because they carried [`NOT_APPLICABLE`].
    pub not_applicable: usize,
}

/// Converts the timestamp column of `row`.
pub(crate) fn row_timestamp(
    row: Row<'_>,
    index: usize,
    fixed: &FixedColumns,
) -> Result<i64, ExtractError> {
    let raw = row.field(fixed.timestamp).unwrap_or_default();
    CimTimestamp::parse(raw)
        .map(|ts| ts.epoch())
        .map_err(|source| ExtractError::Timestamp { row: index, source })
}

/// Builds per-device samples for one array.
#[derive(Debug, Clone, Copy)]
pub struct Extractor<'a> {
    array_id: &'a str,
    key_prefix: &'a str,
}

impl<'a> Extractor<'a> {
    pub fn new(array_id: &'a str, key_prefix: &'a str) -> Self {
        Self {
            array_id,
            key_prefix,
        }
    }

    /// Emits one sample per row and non-fixed, non-ignored column.
    ///
    /// Not-applicable values are dropped, never reported as zero.
    pub fn extract(
        &self,
        table: &DecodedTable<'_>,
        ignore: &IgnoreList,
    ) -> Result<Extraction, ExtractError> {
        let manifest = table.manifest();
        let fixed = FixedColumns::locate(manifest)?;

        // Column positions that produce samples, resolved once per table.
        let emitted: Vec<(usize, &str)> = manifest
            .columns()
            .iter()
            .enumerate()
            .filter(|(i, name)| !fixed.contains(*i) && !ignore.contains(name.as_str()))
            .map(|(i, name)| (i, name.as_str()))
            .collect();

        let mut out = Extraction {
            samples: Vec::with_capacity(table.len() * emitted.len()),
            ..Extraction::default()
        };

        for (index, row) in table.rows().enumerate() {
            let timestamp = row_timestamp(row, index, &fixed)?;
            let device = row.field(fixed.instance_id).unwrap_or_default();

            for &(column, name) in &emitted {
                let value = row.field(column).unwrap_or_default();
                if value == NOT_APPLICABLE {
                    out.not_applicable += 1;
                    continue;
                }
                out.samples.push(MetricSample {
                    array_id: self.array_id.to_string(),
                    metric_key: metric_key(self.key_prefix, name, device),
                    timestamp,
                    value: value.to_string(),
                });
            }

            out.timestamp = Some(timestamp);
            out.rows += 1;
        }

        if out.not_applicable > 0 {
            debug!(
                "Dropped {} not-applicable values from {} rows",
                out.not_applicable, out.rows
            );
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::manifest::{Manifest, decode};

    const TS: &str = "20230101120000.000000+000";

    fn manifest(cols: &[&str]) -> Manifest {
        Manifest::new(cols.iter().copied()).unwrap()
    }

    fn epoch(raw: &str) -> i64 {
        CimTimestamp::parse(raw).unwrap().epoch()
    }

    #[test]
    fn single_row_single_metric() {
        let m = manifest(&["InstanceID", "ElementType", "StatisticTime", "TotalIOs"]);
        let table = decode(&m, &format!("dev1;8;{};42", TS)).unwrap();
        let out = Extractor::new("array", "metric")
            .extract(&table, &IgnoreList::new())
            .unwrap();

        assert_eq!(
            out.samples,
            vec![MetricSample {
                array_id: "array".to_string(),
                metric_key: "metric.TotalIOs[dev1]".to_string(),
                timestamp: epoch(TS),
                value: "42".to_string(),
            }]
        );
        assert_eq!(out.timestamp, Some(epoch(TS)));
        assert_eq!(out.rows, 1);
    }

    #[test]
    fn unsigned_zero_offset_row_is_extracted() {
        let m = manifest(&["InstanceID", "ElementType", "StatisticTime", "TotalIOs"]);
        let table = decode(&m, "dev1;8;20230101120000.0000000000;42").unwrap();
        let out = Extractor::new("array", "metric")
            .extract(&table, &IgnoreList::new())
            .unwrap();
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.timestamp, Some(epoch(TS)));
    }

    #[test]
    fn not_applicable_values_never_emitted() {
        let m = manifest(&[
            "InstanceID",
            "ElementType",
            "StatisticTime",
            "ReadIOs",
            "WriteIOs",
        ]);
        let blob = format!(
            "d1;8;{ts};{na};7\nd2;8;{ts};3;{na}\n",
            ts = TS,
            na = NOT_APPLICABLE
        );
        let table = decode(&m, &blob).unwrap();
        let out = Extractor::new("APM001", "emc.vnx.perf")
            .extract(&table, &IgnoreList::new())
            .unwrap();

        assert_eq!(out.samples.len(), 2);
        assert_eq!(out.not_applicable, 2);
        assert!(out.samples.iter().all(|s| s.value != NOT_APPLICABLE));
        let keys: Vec<_> = out.samples.iter().map(|s| s.metric_key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["emc.vnx.perf.WriteIOs[d1]", "emc.vnx.perf.ReadIOs[d2]"]
        );
    }

    #[test]
    fn ignored_columns_are_skipped() {
        let m = manifest(&[
            "InstanceID",
            "ElementType",
            "StatisticTime",
            "TotalIOs",
            "IdleTimeCounter",
        ]);
        let table = decode(&m, &format!("d1;8;{};5;99", TS)).unwrap();
        let ignore: IgnoreList = ["IdleTimeCounter".to_string()].into_iter().collect();
        let out = Extractor::new("a", "p").extract(&table, &ignore).unwrap();
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].metric_key, "p.TotalIOs[d1]");
    }

    #[test]
    fn fixed_columns_never_emitted() {
        let m = manifest(&["StatisticTime", "InstanceID", "ElementType"]);
        let table = decode(&m, &format!("{};d1;8", TS)).unwrap();
        let out = Extractor::new("a", "p").extract(&table, &IgnoreList::new()).unwrap();
        assert!(out.samples.is_empty());
        assert_eq!(out.rows, 1);
    }

    #[test]
    fn empty_table_has_no_timestamp() {
        let m = manifest(&["InstanceID", "ElementType", "StatisticTime", "TotalIOs"]);
        let table = decode(&m, "").unwrap();
        let out = Extractor::new("a", "p").extract(&table, &IgnoreList::new()).unwrap();
        assert_eq!(out.timestamp, None);
        assert!(out.samples.is_empty());
    }

    #[test]
    fn bad_timestamp_reports_row() {
        let m = manifest(&["InstanceID", "ElementType", "StatisticTime", "TotalIOs"]);
        let blob = format!("d1;8;{};1\nd2;8;garbage;2\n", TS);
        let table = decode(&m, &blob).unwrap();
        let err = Extractor::new("a", "p")
            .extract(&table, &IgnoreList::new())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timestamp { row: 1, .. }));
    }

    #[test]
    fn missing_fixed_column_is_error() {
        let m = manifest(&["InstanceID", "TotalIOs"]);
        let table = decode(&m, "d1;1").unwrap();
        let err = Extractor::new("a", "p")
            .extract(&table, &IgnoreList::new())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Manifest(_)));
    }

    #[test]
    fn line_format() {
        let sample = MetricSample {
            array_id: "APM001".to_string(),
            metric_key: "emc.vnx.perf.TotalIOs[CLAR+APM001+Disk+0_0_1]".to_string(),
            timestamp: 1_672_574_400,
            value: "42".to_string(),
        };
        assert_eq!(
            sample.to_line(),
            "APM001 emc.vnx.perf.TotalIOs[CLAR+APM001+Disk+0_0_1] 1672574400 42"
        );
    }
}
