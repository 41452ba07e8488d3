//! # Design Matrix Preparation
//!
//! Turns the columns a `ModelSpec` selects into the dense `ndarray` structures
//! the sampler consumes. Preparation is all-or-nothing: the first violation
//! aborts the whole batch and nothing is imputed or dropped.
//!
//! - Column order in `x` is exactly `spec.predictors()` order; coefficient
//!   `beta{k}` belongs to column `k - 1`.
//! - Text columns are accepted when every value parses as a number, or when
//!   they hold exactly two labels (mapped to 0/1 in sorted label order).

use crate::dataset::{Dataset, text_levels};
use crate::spec::{ModelFamily, ModelSpec};
use ndarray::{Array1, Array2, ShapeBuilder};
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("The dataset has no rows; at least one observation is required.")]
    EmptySelection,
    #[error("The required column '{0}' was not found in the dataset.")]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the column '{0}'. Complete data with no missing values is required."
    )]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error(
        "The logistic response '{column_name}' must be 0 or 1, but row {row} has value {value}."
    )]
    ResponseOutsideBinary {
        column_name: String,
        row: usize,
        value: f64,
    },
    #[error(
        "The survival response '{column_name}' must be strictly positive, but row {row} has value {value}."
    )]
    NonPositiveResponse {
        column_name: String,
        row: usize,
        value: f64,
    },
}

/// Numeric model input. Shape invariants: `x` is N×K, `y` has length N.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub response: String,
    pub predictors: Vec<String>,
    pub family: ModelFamily,
}

impl DesignMatrix {
    pub fn n_observations(&self) -> usize {
        self.y.len()
    }

    pub fn n_predictors(&self) -> usize {
        self.x.ncols()
    }
}

pub fn prepare_design_matrix(
    dataset: &Dataset,
    spec: &ModelSpec,
) -> Result<DesignMatrix, DataError> {
    let frame = dataset.frame();
    let n = frame.height();
    if n == 0 {
        return Err(DataError::EmptySelection);
    }

    let y = Array1::from_vec(extract_numeric_column(frame, spec.response())?);
    validate_response_domain(spec.family(), spec.response(), &y)?;

    let k = spec.predictors().len();
    let mut buffer = Vec::with_capacity(n * k);
    for name in spec.predictors() {
        let mut column = extract_numeric_column(frame, name)?;
        buffer.append(&mut column);
    }
    // Columns were appended one after another, so the buffer is column-major.
    let x = Array2::from_shape_vec((n, k).f(), buffer).map_err(|e| {
        DataError::ColumnWrongType {
            column_name: spec.predictors().join(","),
            expected_type: "columns of equal length",
            found_type: e.to_string(),
        }
    })?;

    log::info!(
        "Prepared design matrix: {} observations x {} predictors ({} response '{}')",
        n,
        k,
        spec.family(),
        spec.response()
    );

    Ok(DesignMatrix {
        x,
        y,
        response: spec.response().to_string(),
        predictors: spec.predictors().to_vec(),
        family: spec.family(),
    })
}

fn validate_response_domain(
    family: ModelFamily,
    column_name: &str,
    y: &Array1<f64>,
) -> Result<(), DataError> {
    match family {
        ModelFamily::Linear => Ok(()),
        ModelFamily::Logistic => match y.iter().position(|&v| v != 0.0 && v != 1.0) {
            Some(row) => Err(DataError::ResponseOutsideBinary {
                column_name: column_name.to_string(),
                row: row + 1,
                value: y[row],
            }),
            None => Ok(()),
        },
        ModelFamily::Survival => match y.iter().position(|&v| v <= 0.0) {
            Some(row) => Err(DataError::NonPositiveResponse {
                column_name: column_name.to_string(),
                row: row + 1,
                value: y[row],
            }),
            None => Ok(()),
        },
    }
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df
        .column(column_name)
        .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let values = match series.dtype() {
        DataType::String => text_to_numeric(series.str()?, column_name)?,
        dtype => {
            let casted = series
                .cast(&DataType::Float64)
                .map_err(|_| wrong_type(column_name, dtype))?;
            if casted.null_count() > 0 {
                return Err(wrong_type(column_name, dtype));
            }
            let chunked = casted.f64()?.rechunk();
            chunked.into_no_null_iter().collect()
        }
    };

    if values.iter().any(|v: &f64| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

fn text_to_numeric(values: &StringChunked, column_name: &str) -> Result<Vec<f64>, DataError> {
    let parsed: Option<Vec<f64>> = values
        .into_iter()
        .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
        .collect();
    if let Some(parsed) = parsed {
        return Ok(parsed);
    }

    let levels = text_levels(values);
    if levels.len() != 2 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric) or a two-level category",
            found_type: format!("text with {} distinct labels", levels.len()),
        });
    }
    log::info!(
        "Column '{}' coded as binary: '{}' -> 0, '{}' -> 1",
        column_name,
        levels[0],
        levels[1]
    );
    Ok(values
        .into_iter()
        .map(|v| if v == Some(levels[1].as_str()) { 1.0 } else { 0.0 })
        .collect())
}

fn wrong_type(column_name: &str, dtype: &DataType) -> DataError {
    DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{dtype:?}"),
    }
}
