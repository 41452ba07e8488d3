//! # End-to-End Run
//!
//! Validation, design matrix preparation, sampling and reporting, executed
//! strictly in that order. The first failing stage ends the run; nothing is
//! retried. Only the sampling stage runs in parallel.

use crate::config::{ConfigError, PipelineConfig};
use crate::dataset::Dataset;
use crate::design::{DataError, prepare_design_matrix};
use crate::progress::{NoopProgress, PipelineStage, SamplingProgress};
use crate::report::{DiagnosticReport, DiagnosticReportGenerator, ReportError};
use crate::sampler::{ChainEngine, NutsEngine, PosteriorDraws, SamplerError, SamplerRunner};
use crate::spec::{ModelSpec, ModelSpecBuilder, ValidationError};
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Model validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Data preparation failed: {0}")]
    Data(#[from] DataError),
    #[error("Sampling failed: {0}")]
    Sampler(#[from] SamplerError),
    #[error("Report generation failed: {0}")]
    Report(#[from] ReportError),
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub spec: ModelSpec,
    pub draws: PosteriorDraws,
    pub report: DiagnosticReport,
}

pub struct Pipeline<'a> {
    config: PipelineConfig,
    progress: &'a dyn SamplingProgress,
    engine: &'a dyn ChainEngine,
    date: Option<NaiveDate>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            progress: &NoopProgress,
            engine: &NutsEngine,
            date: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn SamplingProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_engine(mut self, engine: &'a dyn ChainEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Date used for artifact names; today's local date otherwise.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn run(&self, dataset: &Dataset) -> Result<PipelineOutput, PipelineError> {
        self.config.validate()?;

        let spec = self.stage(PipelineStage::Validation, || {
            ModelSpecBuilder::new(
                self.config.family.as_str(),
                self.config.response.as_str(),
                self.config.predictors.iter().map(String::as_str),
            )
            .build(&dataset.schema())
            .map_err(PipelineError::from)
        })?;

        let design = self.stage(PipelineStage::Preparation, || {
            prepare_design_matrix(dataset, &spec).map_err(PipelineError::from)
        })?;
        log::info!(
            "Design matrix: {} observations x {} predictors",
            design.n_observations(),
            design.n_predictors()
        );

        let draws = self.stage(PipelineStage::Sampling, || {
            SamplerRunner::new(self.config.sampler_config())
                .with_engine(self.engine)
                .with_progress(self.progress)
                .run(&spec, &design)
                .map_err(PipelineError::from)
        })?;

        let report = self.stage(PipelineStage::Reporting, || {
            let mut generator =
                DiagnosticReportGenerator::new(self.config.output_directory.clone())
                    .with_labels(coefficient_labels(&spec));
            if let Some(date) = self.date {
                generator = generator.with_date(date);
            }
            generator
                .generate(&draws, self.config.parameter_subset.as_deref())
                .map_err(PipelineError::from)
        })?;

        Ok(PipelineOutput {
            spec,
            draws,
            report,
        })
    }

    fn stage<T>(
        &self,
        stage: PipelineStage,
        body: impl FnOnce() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        log::info!("Starting {stage}");
        self.progress.on_stage_start(stage);
        let result = body();
        match &result {
            Ok(_) => self.progress.on_stage_finish(stage),
            Err(e) => log::error!("{stage} failed: {e}"),
        }
        result
    }
}

/// Runs every stage with the NUTS engine and today's date.
pub fn run_pipeline(
    dataset: &Dataset,
    config: &PipelineConfig,
    progress: &dyn SamplingProgress,
) -> Result<PipelineOutput, PipelineError> {
    Pipeline::new(config.clone())
        .with_progress(progress)
        .run(dataset)
}

/// `beta{k}` -> name of the k-th predictor.
fn coefficient_labels(spec: &ModelSpec) -> HashMap<String, String> {
    spec.parameter_names()
        .into_iter()
        .zip(spec.predictors().iter().cloned())
        .collect()
}
