//! # Dataset Exploration
//!
//! Column summaries and a Pearson correlation matrix computed before a model
//! is specified. Only numeric and boolean columns take part; booleans count
//! as 0/1. Missing values are skipped column by column, and correlations use
//! the rows where both columns are present.

use crate::convergence::quantile;
use crate::dataset::Dataset;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExploreError {
    #[error("Column '{0}' not found in the dataset")]
    ColumnNotFound(String),
    #[error("Column '{column}' has type {dtype}; correlation needs numeric or boolean columns")]
    NotNumeric { column: String, dtype: String },
    #[error("Correlation needs at least 2 columns, got {0}")]
    TooFewColumns(usize),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
}

/// Count, moments and five-number summary of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    /// Non-missing values.
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1); `NaN` below two values.
    pub sd: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

/// Symmetric Pearson matrix with its column order.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        Some(self.values[[i, j]])
    }
}

fn is_numeric_or_bool(dtype: &DataType) -> bool {
    dtype.is_primitive_numeric() || matches!(dtype, DataType::Boolean)
}

fn optional_values(column: &Column) -> PolarsResult<Vec<Option<f64>>> {
    let casted = column.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

impl Dataset {
    /// Summaries of every numeric or boolean column, in frame order.
    pub fn describe(&self) -> Result<Vec<ColumnSummary>, ExploreError> {
        let mut summaries = Vec::new();
        for column in self.frame().get_columns() {
            if !is_numeric_or_bool(column.dtype()) {
                log::debug!("describe: skipping '{}' ({})", column.name(), column.dtype());
                continue;
            }
            let values = optional_values(column)?;
            let present: Array1<f64> = values.iter().flatten().copied().collect();
            summaries.push(summarize_column(
                column.name().to_string(),
                present,
                values.len(),
            ));
        }
        Ok(summaries)
    }

    /// Pearson correlations between `columns`, or between every numeric and
    /// boolean column when `None`.
    pub fn correlation(
        &self,
        columns: Option<&[String]>,
    ) -> Result<CorrelationMatrix, ExploreError> {
        let frame = self.frame();
        let names: Vec<String> = match columns {
            Some(requested) => {
                for name in requested {
                    let column = frame
                        .column(name)
                        .map_err(|_| ExploreError::ColumnNotFound(name.clone()))?;
                    if !is_numeric_or_bool(column.dtype()) {
                        return Err(ExploreError::NotNumeric {
                            column: name.clone(),
                            dtype: column.dtype().to_string(),
                        });
                    }
                }
                requested.to_vec()
            }
            None => frame
                .get_columns()
                .iter()
                .filter(|c| is_numeric_or_bool(c.dtype()))
                .map(|c| c.name().to_string())
                .collect(),
        };
        if names.len() < 2 {
            return Err(ExploreError::TooFewColumns(names.len()));
        }

        let data = names
            .iter()
            .map(|name| optional_values(frame.column(name)?))
            .collect::<PolarsResult<Vec<_>>>()?;
        let k = names.len();
        let mut values = Array2::from_elem((k, k), 1.0);
        for i in 0..k {
            for j in (i + 1)..k {
                let r = pairwise_pearson(&data[i], &data[j]);
                values[[i, j]] = r;
                values[[j, i]] = r;
            }
        }
        log::info!("Computed {k}x{k} correlation matrix");
        Ok(CorrelationMatrix {
            columns: names,
            values,
        })
    }
}

fn summarize_column(name: String, present: Array1<f64>, total: usize) -> ColumnSummary {
    let count = present.len();
    let (mean, sd, min, max) = if count == 0 {
        (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    } else {
        let sd = if count > 1 { present.std(1.0) } else { f64::NAN };
        (
            present.mean().unwrap_or(f64::NAN),
            sd,
            present.iter().copied().fold(f64::INFINITY, f64::min),
            present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    };
    ColumnSummary {
        name,
        count,
        missing: total - count,
        mean,
        sd,
        min,
        q25: quantile(present.view(), 0.25),
        median: quantile(present.view(), 0.5),
        q75: quantile(present.view(), 0.75),
        max,
    }
}

/// `NaN` when fewer than two complete pairs exist or either side is constant.
fn pairwise_pearson(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in &pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cohort() -> Dataset {
        Dataset::new(
            df!(
                "age" => &[40.0, 50.0, 60.0, 70.0, 80.0],
                "stay" => &[2.0, 4.0, 6.0, 8.0, 10.0],
                "smoker" => &[true, false, true, false, false],
                "ward" => &["a", "b", "a", "c", "b"]
            )
            .unwrap(),
        )
    }

    #[test]
    fn describe_covers_numeric_and_boolean_columns() {
        let summaries = cohort().describe().unwrap();
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["age", "stay", "smoker"]);

        let age = &summaries[0];
        assert_eq!(age.count, 5);
        assert_eq!(age.missing, 0);
        assert_abs_diff_eq!(age.mean, 60.0);
        assert_abs_diff_eq!(age.sd, 250.0f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(age.min, 40.0);
        assert_abs_diff_eq!(age.q25, 50.0);
        assert_abs_diff_eq!(age.median, 60.0);
        assert_abs_diff_eq!(age.max, 80.0);

        assert_abs_diff_eq!(summaries[2].mean, 0.4);
    }

    #[test]
    fn describe_skips_missing_values() {
        let frame = df!("dose" => &[Some(1.0), None, Some(3.0)]).unwrap();
        let summary = &Dataset::new(frame).describe().unwrap()[0];
        assert_eq!(summary.count, 2);
        assert_eq!(summary.missing, 1);
        assert_abs_diff_eq!(summary.mean, 2.0);
    }

    #[test]
    fn correlation_defaults_to_numeric_and_boolean_columns() {
        let matrix = cohort().correlation(None).unwrap();
        assert_eq!(matrix.columns, ["age", "stay", "smoker"]);
        assert_abs_diff_eq!(matrix.get("age", "stay").unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix.get("smoker", "smoker").unwrap(), 1.0);
        let r = matrix.get("age", "smoker").unwrap();
        assert_abs_diff_eq!(r, matrix.get("smoker", "age").unwrap());
        assert!(r < 0.0, "r = {r}");
    }

    #[test]
    fn correlation_uses_complete_pairs_only() {
        let frame = df!(
            "x" => &[Some(1.0), Some(2.0), None, Some(4.0)],
            "y" => &[Some(-1.0), Some(-2.0), Some(100.0), Some(-4.0)]
        )
        .unwrap();
        let matrix = Dataset::new(frame).correlation(None).unwrap();
        assert_abs_diff_eq!(matrix.get("x", "y").unwrap(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_column_correlates_as_nan() {
        let frame = df!("x" => &[1.0, 2.0, 3.0], "c" => &[5.0, 5.0, 5.0]).unwrap();
        let matrix = Dataset::new(frame).correlation(None).unwrap();
        assert!(matrix.get("x", "c").unwrap().is_nan());
    }

    #[test]
    fn requested_columns_are_validated() {
        let dataset = cohort();
        let err = dataset
            .correlation(Some(&["age".to_string(), "ward".to_string()]))
            .unwrap_err();
        assert!(matches!(err, ExploreError::NotNumeric { column, .. } if column == "ward"));

        let err = dataset
            .correlation(Some(&["age".to_string(), "height".to_string()]))
            .unwrap_err();
        assert!(matches!(err, ExploreError::ColumnNotFound(c) if c == "height"));

        let err = dataset.correlation(Some(&["age".to_string()])).unwrap_err();
        assert!(matches!(err, ExploreError::TooFewColumns(1)));
    }
}
