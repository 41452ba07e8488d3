use std::fmt;

/// Stages reported while the pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Validation,
    Preparation,
    Sampling,
    Reporting,
}

impl PipelineStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Validation => "model validation",
            Self::Preparation => "design matrix preparation",
            Self::Sampling => "MCMC sampling",
            Self::Reporting => "diagnostic report generation",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for stage boundaries and per-chain completion.
///
/// `on_chain_finish` is called from sampler worker threads, hence `Sync`.
pub trait SamplingProgress: Sync {
    fn on_stage_start(&self, stage: PipelineStage) {
        let _ = stage;
    }
    fn on_chains_start(&self, total_chains: usize) {
        let _ = total_chains;
    }
    fn on_chain_finish(&self, chain: usize) {
        let _ = chain;
    }
    fn on_stage_finish(&self, stage: PipelineStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl SamplingProgress for NoopProgress {}
