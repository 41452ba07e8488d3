//! # Tabular Input
//!
//! A `Dataset` is an immutable view over a `polars` `DataFrame`. The sampling
//! core never mutates it; every later stage reads columns out of it by name.
//!
//! Columns are classified once into a `Schema` so that model validation can
//! run against names and kinds without touching the values.

use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error while reading '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a column can be used as model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Integer, float, or text that parses as numbers throughout.
    Numeric,
    /// Boolean, or text with exactly two distinct labels.
    Binary,
    /// Anything else (free text, nested types, dates).
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,
}

/// Ordered column names and kinds of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
}

impl Dataset {
    pub fn new(frame: DataFrame) -> Self {
        Self { frame }
    }

    /// Reads a comma-separated file with a header row.
    pub fn from_csv(path: &Path) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        let frame = CsvReader::new(file)
            .with_options(CsvReadOptions::default().with_has_header(true))
            .finish()?;
        log::info!(
            "Loaded {} rows x {} columns from '{}'",
            frame.height(),
            frame.width(),
            path.display()
        );
        Ok(Self { frame })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn schema(&self) -> Schema {
        let columns = self
            .frame
            .get_columns()
            .iter()
            .map(|column| ColumnSchema {
                name: column.name().to_string(),
                kind: classify(column),
            })
            .collect();
        Schema::new(columns)
    }
}

fn classify(column: &Column) -> ColumnKind {
    match column.dtype() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Float32
        | DataType::Float64 => ColumnKind::Numeric,
        DataType::Boolean => ColumnKind::Binary,
        DataType::String => match column.str() {
            Ok(values) => classify_text(values),
            Err(_) => ColumnKind::Other,
        },
        _ => ColumnKind::Other,
    }
}

fn classify_text(values: &StringChunked) -> ColumnKind {
    let present: Vec<&str> = values.into_iter().flatten().collect();
    if present.iter().all(|v| v.trim().parse::<f64>().is_ok()) {
        return ColumnKind::Numeric;
    }
    if text_levels(values).len() == 2 {
        ColumnKind::Binary
    } else {
        ColumnKind::Other
    }
}

/// Distinct non-null labels of a text column in sorted order.
pub(crate) fn text_levels(values: &StringChunked) -> Vec<String> {
    let levels: BTreeSet<&str> = values.into_iter().flatten().collect();
    levels.into_iter().map(str::to_string).collect()
}
