//! Statistics manifest and blob decoding.
//!
//! A manifest is the ordered column list describing one statistics blob.
//! Blobs are newline-separated records of `;`-separated fields, matched to
//! the manifest by position.

use std::collections::HashMap;

/// Column holding the CIM sample timestamp.
pub const STATISTIC_TIME: &str = "StatisticTime";
/// Column holding the owning device's instance id.
pub const INSTANCE_ID: &str = "InstanceID";
/// Column holding the element type code.
pub const ELEMENT_TYPE: &str = "ElementType";

const FIELD_DELIMITER: char = ';';

/// Invalid manifest contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// Manifest has no columns.
    Empty,
    /// A column name appears more than once.
    DuplicateColumn(String),
    /// A required column is absent.
    MissingColumn(&'static str),
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestError::Empty => write!(f, "manifest has no columns"),
            ManifestError::DuplicateColumn(name) => {
                write!(f, "manifest lists column '{}' more than once", name)
            }
            ManifestError::MissingColumn(name) => {
                write!(f, "manifest is missing required column '{}'", name)
            }
        }
    }
}

impl std::error::Error for ManifestError {}

/// A blob row whose field count does not match the manifest.
///
/// The manifest and blob come from incompatible collection runs; the whole
/// decode is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMismatchError {
    /// Zero-based index of the offending record.
    pub row: usize,
    pub expected: usize,
    pub found: usize,
}

impl std::fmt::Display for ManifestMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row {} has {} fields but manifest has {} columns",
            self.row, self.found, self.expected
        )
    }
}

impl std::error::Error for ManifestMismatchError {}

/// Ordered, unique column names of one statistics blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Manifest {
    pub fn new<I, S>(columns: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(ManifestError::DuplicateColumn(name.clone()));
            }
        }

        Ok(Self { columns, index })
    }

    /// Parses a header row. Columns may be separated by `;` or newlines.
    pub fn parse(header: &str) -> Result<Self, ManifestError> {
        Self::new(
            header
                .split([FIELD_DELIMITER, '\n'])
                .map(str::trim)
                .filter(|c| !c.is_empty()),
        )
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of `name`, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn column(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }
}

/// Resolved positions of the columns every statistics blob carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedColumns {
    pub timestamp: usize,
    pub instance_id: usize,
    pub element_type: usize,
}

impl FixedColumns {
    pub fn locate(manifest: &Manifest) -> Result<Self, ManifestError> {
        let find = |name: &'static str| {
            manifest
                .position(name)
                .ok_or(ManifestError::MissingColumn(name))
        };
        Ok(Self {
            timestamp: find(STATISTIC_TIME)?,
            instance_id: find(INSTANCE_ID)?,
            element_type: find(ELEMENT_TYPE)?,
        })
    }

    pub fn contains(&self, index: usize) -> bool {
        index == self.timestamp || index == self.instance_id || index == self.element_type
    }
}

/// Rows of one blob, decoded against its manifest.
#[derive(Debug, Clone)]
pub struct DecodedTable<'m> {
    manifest: &'m Manifest,
    rows: Vec<Vec<String>>,
}

impl<'m> DecodedTable<'m> {
    pub fn manifest(&self) -> &'m Manifest {
        self.manifest
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|fields| Row {
            manifest: self.manifest,
            fields,
        })
    }

    /// Rows in blob order.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(|fields| Row {
            manifest: self.manifest,
            fields,
        })
    }
}

/// A single decoded record, viewed as a column-name to raw-value map.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    manifest: &'a Manifest,
    fields: &'a [String],
}

impl<'a> Row<'a> {
    /// Raw value of column `name`.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.manifest.position(name).and_then(|i| self.field(i))
    }

    /// Raw value at manifest position `index`.
    pub fn field(&self, index: usize) -> Option<&'a str> {
        self.fields.get(index).map(String::as_str)
    }

    /// `(column, value)` pairs in manifest order.
    pub fn iter(self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.manifest
            .columns()
            .iter()
            .map(String::as_str)
            .zip(self.fields.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Splits `blob` into records and zips each against `manifest`.
///
/// Blank lines are ignored and a trailing `\r` is stripped. Any record whose
/// field count differs from the manifest length fails the whole decode.
pub fn decode<'m>(
    manifest: &'m Manifest,
    blob: &str,
) -> Result<DecodedTable<'m>, ManifestMismatchError> {
    let mut rows = Vec::new();

    for line in blob.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split(FIELD_DELIMITER).map(str::to_string).collect();
        if fields.len() != manifest.len() {
            return Err(ManifestMismatchError {
                row: rows.len(),
                expected: manifest.len(),
                found: fields.len(),
            });
        }
        rows.push(fields);
    }

    Ok(DecodedTable { manifest, rows })
}
