//! # Synthetic Medical Data
//!
//! Seeded generator for demographic, hospital-stay, comorbidity and
//! survival columns, used to try the pipeline without real patient data.
//!
//! Columns, in order: `age` and `weight` (or a correlated pair replacing
//! them), `length_of_stay`, one 0/1 column per comorbidity, `survival_time`,
//! `event_occurred`. The event indicator is drawn independently of the
//! survival time.

use crate::dataset::Dataset;
use chrono::{Local, NaiveDate};
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Distribution, Gamma, Normal, StandardNormal};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory the CLI writes generated data to unless told otherwise.
pub const DEFAULT_OUTPUT_DIR: &str = "data/generated_data";

#[derive(Error, Debug)]
pub enum SyntheticError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error(
        "Got {names} comorbidity names but {prevalences} prevalences; the lists must have the same length."
    )]
    ComorbidityMismatch { names: usize, prevalences: usize },
    #[error("Column '{0}' appears more than once.")]
    DuplicateColumn(String),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error at '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn invalid(name: &str, reason: impl Into<String>) -> SyntheticError {
    SyntheticError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalParams {
    pub mean: f64,
    pub sd: f64,
}

/// Gamma distribution in shape/scale form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaParams {
    pub shape: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comorbidity {
    pub name: String,
    pub prevalence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedVariable {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
}

/// Two normal variables with correlation `correlation`, generated as
/// `z2 = ρ·z1 + sqrt(1 - ρ²)·e` on standard normals and then shifted and scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedPair {
    pub first: CorrelatedVariable,
    pub second: CorrelatedVariable,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub samples: usize,
    /// Truncated toward zero to whole years.
    pub age: NormalParams,
    pub weight: NormalParams,
    pub length_of_stay: GammaParams,
    pub comorbidities: Vec<Comorbidity>,
    pub survival: GammaParams,
    pub event_rate: f64,
    /// Replaces `age` and `weight` when set.
    pub correlated: Option<CorrelatedPair>,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            age: NormalParams {
                mean: 60.0,
                sd: 10.0,
            },
            weight: NormalParams {
                mean: 70.0,
                sd: 15.0,
            },
            length_of_stay: GammaParams {
                shape: 2.0,
                scale: 2.0,
            },
            comorbidities: [("diabetes", 0.2), ("hypertension", 0.3), ("cancer", 0.05)]
                .into_iter()
                .map(|(name, prevalence)| Comorbidity {
                    name: name.to_string(),
                    prevalence,
                })
                .collect(),
            survival: GammaParams {
                shape: 2.0,
                scale: 5.0,
            },
            event_rate: 0.3,
            correlated: None,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Replaces the comorbidity list from parallel name and prevalence lists.
    pub fn with_comorbidities(
        mut self,
        names: &[String],
        prevalences: &[f64],
    ) -> Result<Self, SyntheticError> {
        if names.len() != prevalences.len() {
            return Err(SyntheticError::ComorbidityMismatch {
                names: names.len(),
                prevalences: prevalences.len(),
            });
        }
        self.comorbidities = names
            .iter()
            .zip(prevalences)
            .map(|(name, &prevalence)| Comorbidity {
                name: name.clone(),
                prevalence,
            })
            .collect();
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SyntheticError> {
        if self.samples == 0 {
            return Err(invalid("samples", "must be at least 1"));
        }
        check_normal("age", self.age)?;
        check_normal("weight", self.weight)?;
        check_gamma("length_of_stay", self.length_of_stay)?;
        check_gamma("survival", self.survival)?;
        check_probability("event_rate", self.event_rate)?;
        for c in &self.comorbidities {
            check_probability(&c.name, c.prevalence)?;
        }
        if let Some(pair) = &self.correlated {
            if !(-1.0..=1.0).contains(&pair.correlation) {
                return Err(invalid(
                    "correlation",
                    format!("must lie in [-1, 1], got {}", pair.correlation),
                ));
            }
            for var in [&pair.first, &pair.second] {
                check_normal(
                    &var.name,
                    NormalParams {
                        mean: var.mean,
                        sd: var.sd,
                    },
                )?;
            }
        }

        let mut names: Vec<&str> = self.column_names();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(SyntheticError::DuplicateColumn(w[0].to_string()));
        }
        Ok(())
    }

    fn column_names(&self) -> Vec<&str> {
        let mut names = match &self.correlated {
            Some(pair) => vec![pair.first.name.as_str(), pair.second.name.as_str()],
            None => vec!["age", "weight"],
        };
        names.push("length_of_stay");
        names.extend(self.comorbidities.iter().map(|c| c.name.as_str()));
        names.extend(["survival_time", "event_occurred"]);
        names
    }
}

fn check_normal(name: &str, params: NormalParams) -> Result<(), SyntheticError> {
    if !params.mean.is_finite() || !(params.sd.is_finite() && params.sd > 0.0) {
        return Err(invalid(
            name,
            format!(
                "normal parameters need a finite mean and positive sd, got mean={} sd={}",
                params.mean, params.sd
            ),
        ));
    }
    Ok(())
}

fn check_gamma(name: &str, params: GammaParams) -> Result<(), SyntheticError> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !positive(params.shape) || !positive(params.scale) {
        return Err(invalid(
            name,
            format!(
                "gamma shape and scale must be positive, got shape={} scale={}",
                params.shape, params.scale
            ),
        ));
    }
    Ok(())
}

fn check_probability(name: &str, p: f64) -> Result<(), SyntheticError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(invalid(name, format!("must lie in [0, 1], got {p}")));
    }
    Ok(())
}

fn normal_draws(rng: &mut StdRng, n: usize, params: NormalParams) -> Result<Vec<f64>, SyntheticError> {
    let dist = Normal::new(params.mean, params.sd).map_err(|e| invalid("normal", e.to_string()))?;
    Ok((0..n).map(|_| dist.sample(rng)).collect())
}

fn gamma_draws(rng: &mut StdRng, n: usize, params: GammaParams) -> Result<Vec<f64>, SyntheticError> {
    let dist =
        Gamma::new(params.shape, params.scale).map_err(|e| invalid("gamma", e.to_string()))?;
    Ok((0..n).map(|_| dist.sample(rng)).collect())
}

fn bernoulli_draws(rng: &mut StdRng, n: usize, p: f64) -> Result<Vec<i64>, SyntheticError> {
    let dist = Bernoulli::new(p).map_err(|e| invalid("bernoulli", e.to_string()))?;
    Ok((0..n).map(|_| i64::from(dist.sample(rng))).collect())
}

fn correlated_draws(rng: &mut StdRng, n: usize, pair: &CorrelatedPair) -> (Vec<f64>, Vec<f64>) {
    let rho = pair.correlation;
    let z1: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();
    let e: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();
    let first = z1
        .iter()
        .map(|z| z * pair.first.sd + pair.first.mean)
        .collect();
    let second = z1
        .iter()
        .zip(&e)
        .map(|(z, e)| (rho * z + (1.0 - rho * rho).sqrt() * e) * pair.second.sd + pair.second.mean)
        .collect();
    (first, second)
}

/// Generates a dataset; identical configs (including the seed) give identical data.
pub fn generate(config: &SyntheticConfig) -> Result<Dataset, SyntheticError> {
    config.validate()?;
    let n = config.samples;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut columns: Vec<Column> = Vec::with_capacity(5 + config.comorbidities.len());

    match &config.correlated {
        Some(pair) => {
            let (first, second) = correlated_draws(&mut rng, n, pair);
            columns.push(Series::new(pair.first.name.as_str().into(), first).into());
            columns.push(Series::new(pair.second.name.as_str().into(), second).into());
        }
        None => {
            let age: Vec<i64> = normal_draws(&mut rng, n, config.age)?
                .into_iter()
                .map(|a| a.trunc() as i64)
                .collect();
            let weight = normal_draws(&mut rng, n, config.weight)?;
            columns.push(Series::new("age".into(), age).into());
            columns.push(Series::new("weight".into(), weight).into());
        }
    }

    let stay = gamma_draws(&mut rng, n, config.length_of_stay)?;
    columns.push(Series::new("length_of_stay".into(), stay).into());

    for c in &config.comorbidities {
        let flags = bernoulli_draws(&mut rng, n, c.prevalence)?;
        columns.push(Series::new(c.name.as_str().into(), flags).into());
    }

    let survival = gamma_draws(&mut rng, n, config.survival)?;
    let events = bernoulli_draws(&mut rng, n, config.event_rate)?;
    columns.push(Series::new("survival_time".into(), survival).into());
    columns.push(Series::new("event_occurred".into(), events).into());

    let frame = DataFrame::new(columns)?;
    log::info!(
        "Generated {} synthetic records with {} columns (seed {})",
        frame.height(),
        frame.width(),
        config.seed
    );
    Ok(Dataset::new(frame))
}

/// `synthetic_medical_data_{YYYYMMDD}.csv`
pub fn default_file_name(date: NaiveDate) -> String {
    format!("synthetic_medical_data_{}.csv", date.format("%Y%m%d"))
}

/// Resolves the output file name: the date-stamped default, or `name` with
/// `.csv` appended when it lacks the extension.
pub fn export_file_name(name: Option<&str>, date: NaiveDate) -> String {
    match name {
        None => default_file_name(date),
        Some(name) if name.ends_with(".csv") => name.to_string(),
        Some(name) => format!("{name}.csv"),
    }
}

/// Writes `dataset` as CSV into `directory` (created if missing) and returns the path.
pub fn export_csv(
    dataset: &Dataset,
    directory: &Path,
    name: Option<&str>,
) -> Result<PathBuf, SyntheticError> {
    fs::create_dir_all(directory).map_err(|source| SyntheticError::IoError {
        path: directory.to_path_buf(),
        source,
    })?;
    let path = directory.join(export_file_name(name, Local::now().date_naive()));
    let mut file = File::create(&path).map_err(|source| SyntheticError::IoError {
        path: path.clone(),
        source,
    })?;
    let mut frame = dataset.frame().clone();
    CsvWriter::new(&mut file).include_header(true).finish(&mut frame)?;
    log::info!("Synthetic data exported to '{}'", path.display());
    Ok(path)
}
