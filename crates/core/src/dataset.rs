//! Dataset View - a filterable, read-only projection of the base table.
//!
//! The base table is loaded once and shared through an `Arc`; every view holds
//! the same table plus its own [`Predicate`]. Filtering never touches rows, it
//! only produces a new view whose predicate is the merge of the old one and the
//! requested constraint.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(default)]
    pub flags: Option<String>,
    #[serde(default)]
    pub instruction: String,
    pub category: String,
    pub intent: String,
    #[serde(default)]
    pub response: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Category,
    Intent,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Intent => "intent",
        }
    }

    fn value_of<'a>(&self, record: &'a DatasetRecord) -> &'a str {
        match self {
            Self::Category => &record.category,
            Self::Intent => &record.intent,
        }
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("could not read dataset `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid dataset record at line {line}: {source}")]
    Parse { line: usize, source: serde_json::Error },
    #[error("dataset contains no records")]
    Empty,
    #[error("cannot sample {requested} rows from a view with {available} rows")]
    SampleTooLarge { requested: usize, available: usize },
}

/// The immutable rows every view projects over.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BaseTable {
    records: Vec<DatasetRecord>,
}

impl BaseTable {
    pub fn new(records: Vec<DatasetRecord>) -> Self {
        Self { records }
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| DatasetError::Read { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw)
    }

    /// Accepts either a JSON array of records or one JSON record per line.
    pub fn from_json_str(raw: &str) -> Result<Self, DatasetError> {
        let trimmed = raw.trim_start();
        let records = if trimmed.starts_with('[') {
            serde_json::from_str::<Vec<DatasetRecord>>(trimmed)
                .map_err(|source| DatasetError::Parse { line: source.line(), source })?
        } else {
            let mut records = Vec::new();
            for (index, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record = serde_json::from_str::<DatasetRecord>(line)
                    .map_err(|source| DatasetError::Parse { line: index + 1, source })?;
                records.push(record);
            }
            records
        };

        if records.is_empty() {
            return Err(DatasetError::Empty);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[DatasetRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Constraint on a single column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ColumnFilter {
    #[default]
    Any,
    OneOf(BTreeSet<String>),
}

impl ColumnFilter {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(allowed) => allowed.contains(value),
        }
    }

    pub fn intersect(&self, other: &ColumnFilter) -> ColumnFilter {
        match (self, other) {
            (Self::Any, other) => other.clone(),
            (this, Self::Any) => this.clone(),
            (Self::OneOf(left), Self::OneOf(right)) => {
                Self::OneOf(left.intersection(right).cloned().collect())
            }
        }
    }

    /// An empty request leaves the column unrestricted.
    fn restrict(&self, values: BTreeSet<String>) -> ColumnFilter {
        if values.is_empty() {
            return self.clone();
        }
        self.intersect(&Self::OneOf(values))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default)]
    pub category: ColumnFilter,
    #[serde(default)]
    pub intent: ColumnFilter,
}

impl Predicate {
    pub fn restrict(&self, column: Column, values: BTreeSet<String>) -> Predicate {
        let mut next = self.clone();
        match column {
            Column::Category => next.category = self.category.restrict(values),
            Column::Intent => next.intent = self.intent.restrict(values),
        }
        next
    }

    pub fn merge(&self, other: &Predicate) -> Predicate {
        Predicate {
            category: self.category.intersect(&other.category),
            intent: self.intent.intersect(&other.intent),
        }
    }

    pub fn matches(&self, record: &DatasetRecord) -> bool {
        self.category.matches(Column::Category.value_of(record))
            && self.intent.matches(Column::Intent.value_of(record))
    }
}

#[derive(Clone)]
pub struct DatasetView {
    base: Arc<BaseTable>,
    predicate: Predicate,
}

impl fmt::Debug for DatasetView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetView")
            .field("base_rows", &self.base.len())
            .field("predicate", &self.predicate)
            .finish()
    }
}

impl PartialEq for DatasetView {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.base, &other.base) && self.predicate == other.predicate
    }
}

impl DatasetView {
    pub fn full(base: Arc<BaseTable>) -> Self {
        Self { base, predicate: Predicate::default() }
    }

    pub fn restore(base: Arc<BaseTable>, predicate: Predicate) -> Self {
        Self { base, predicate }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn rows(&self) -> impl Iterator<Item = &DatasetRecord> + '_ {
        self.base.records().iter().filter(|record| self.predicate.matches(record))
    }

    pub fn filter<I, S>(&self, column: Column, values: I) -> DatasetView
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        Self { base: Arc::clone(&self.base), predicate: self.predicate.restrict(column, values) }
    }

    pub fn apply(&self, predicate: &Predicate) -> DatasetView {
        Self { base: Arc::clone(&self.base), predicate: self.predicate.merge(predicate) }
    }

    /// Distinct values of `column`, in first-seen order.
    pub fn distinct(&self, column: Column) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for record in self.rows() {
            let value = column.value_of(record);
            if seen.insert(value) {
                values.push(value.to_string());
            }
        }
        values
    }

    pub fn count_rows(&self) -> usize {
        self.rows().count()
    }

    pub fn count_where(&self, column: Column, value: &str) -> usize {
        self.rows().filter(|record| column.value_of(record) == value).count()
    }

    /// Draws `n` rows without replacement.
    pub fn sample<R>(&self, n: usize, rng: &mut R) -> Result<Vec<DatasetRecord>, DatasetError>
    where
        R: Rng + ?Sized,
    {
        let rows = self.rows().collect::<Vec<_>>();
        if n > rows.len() {
            return Err(DatasetError::SampleTooLarge { requested: n, available: rows.len() });
        }

        Ok(rand::seq::index::sample(rng, rows.len(), n)
            .into_iter()
            .map(|index| rows[index].clone())
            .collect())
    }

    /// Samples up to `batch_size * batch_count` rows and splits them into batches.
    pub fn batches<R>(
        &self,
        batch_size: usize,
        batch_count: usize,
        rng: &mut R,
    ) -> Vec<Vec<DatasetRecord>>
    where
        R: Rng + ?Sized,
    {
        let batch_size = batch_size.max(1);
        let total = self.count_rows().min(batch_size.saturating_mul(batch_count));
        match self.sample(total, rng) {
            Ok(rows) => rows.chunks(batch_size).map(<[DatasetRecord]>::to_vec).collect(),
            Err(_) => Vec::new(),
        }
    }
}
