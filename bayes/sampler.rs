//! NUTS Sampling using mini-mcmc
//!
//! This module turns a `ModelSpec` and `DesignMatrix` into posterior draws.
//! The numerical sampler is mini-mcmc's NUTS; this module only supplies the
//! log posterior (with analytical gradients) and runs the chains.
//!
//! # Parameterization
//!
//! NUTS runs in an unconstrained space θ = [z₁..z_K, u]:
//!
//! - β_k = z_k / s_k where s_k is the root-mean-square of column k, so every
//!   coefficient direction has roughly unit curvature under the identity
//!   mass matrix mini-mcmc uses.
//! - u = log σ (linear) or u = log α (survival); the Jacobian term is
//!   included in the density.
//!
//! Draws are mapped back to (β, σ) or (β, α) before they leave this module.
//!
//! # Chains
//!
//! Each chain is an independent NUTS instance with its own seed and starting
//! point. Chains run on the rayon pool and share only read-only data behind
//! `Arc`. The first fatal chain error aborts the whole run.

use crate::convergence::{self, ParameterDiagnostics};
use crate::design::DesignMatrix;
use crate::progress::{NoopProgress, SamplingProgress};
use crate::spec::{ModelFamily, ModelSpec, Prior};
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use burn::tensor::TensorData;
use mini_mcmc::distributions::GradientTarget;
use mini_mcmc::nuts::NUTSChain;
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::f64::consts::PI;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Backend type for NUTS - uses f64 for numerical precision
pub type NutsBackend = Autodiff<NdArray<f64>>;

/// Standard deviation of the jitter around the starting point of each chain.
const INITIAL_JITTER: f64 = 0.1;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),
    #[error("The design matrix does not belong to this model: {0}")]
    SpecMismatch(String),
    #[error(
        "Chain {chain} failed to initialize: the log density is {log_density} at the starting point."
    )]
    InitializationFailed { chain: usize, log_density: f64 },
    #[error("Chain {chain}: the NUTS engine reported a fatal error: {message}")]
    EngineFailure { chain: usize, message: String },
    #[error("Chain {chain} produced non-finite draws for parameter '{parameter}'.")]
    NonFiniteDraws { chain: usize, parameter: String },
}

/// Configuration for NUTS sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Number of independent chains
    pub chains: usize,
    /// Number of draws kept per chain (after warmup)
    pub iterations: usize,
    /// Number of warmup draws discarded per chain
    pub warmup: usize,
    /// Target acceptance probability for step-size adaptation
    pub target_accept: f64,
    /// Base seed; chain `c` uses `seed + c`. Drawn from entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            iterations: 2000,
            warmup: 1000,
            target_accept: 0.8,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.chains == 0 {
            return Err(SamplerError::InvalidConfig(
                "chains must be at least 1".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(SamplerError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(SamplerError::InvalidConfig(format!(
                "target_accept must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        Ok(())
    }
}

/// Shared data for the posterior (wrapped in Arc to prevent cloning).
#[derive(Clone)]
struct SharedData {
    /// Design matrix X [n_obs, k]
    x: Arc<Array2<f64>>,
    /// Response vector y [n_obs]
    y: Arc<Array1<f64>>,
    /// ln y, precomputed for the Weibull likelihood
    log_y: Arc<Array1<f64>>,
    /// 1 / s_k, maps z to β
    inv_scale: Arc<Array1<f64>>,
    /// Number of coefficients
    k: usize,
}

/// Log posterior of one family in the unconstrained space, with analytical gradients.
#[derive(Clone)]
pub struct LogPosterior {
    data: SharedData,
    family: ModelFamily,
    coefficient_prior: Prior,
    nuisance_prior: Option<Prior>,
}

impl LogPosterior {
    pub fn new(spec: &ModelSpec, design: &DesignMatrix) -> Result<Self, SamplerError> {
        if design.family != spec.family() {
            return Err(SamplerError::SpecMismatch(format!(
                "design prepared for {} but model is {}",
                design.family,
                spec.family()
            )));
        }
        if design.predictors != spec.predictors() || design.response != spec.response() {
            return Err(SamplerError::SpecMismatch(format!(
                "design columns {}~{:?} differ from model {}~{:?}",
                design.response,
                design.predictors,
                spec.response(),
                spec.predictors()
            )));
        }

        let n = design.x.nrows().max(1) as f64;
        let inv_scale: Array1<f64> = design
            .x
            .axis_iter(Axis(1))
            .map(|column| {
                let rms = (column.dot(&column) / n).sqrt();
                if rms > 0.0 && rms.is_finite() {
                    1.0 / rms
                } else {
                    1.0
                }
            })
            .collect();
        let log_y = match spec.family() {
            ModelFamily::Survival => design.y.mapv(f64::ln),
            ModelFamily::Linear | ModelFamily::Logistic => Array1::zeros(0),
        };

        Ok(Self {
            data: SharedData {
                x: Arc::new(design.x.clone()),
                y: Arc::new(design.y.clone()),
                log_y: Arc::new(log_y),
                inv_scale: Arc::new(inv_scale),
                k: design.x.ncols(),
            },
            family: spec.family(),
            coefficient_prior: spec.family().coefficient_prior(),
            nuisance_prior: spec.family().nuisance().map(|p| p.prior),
        })
    }

    /// Length of the unconstrained parameter vector.
    pub fn dim(&self) -> usize {
        self.data.k + usize::from(self.nuisance_prior.is_some())
    }

    /// Starting point: jittered zero coefficients, and for the linear family
    /// the log of the response standard deviation as log σ.
    pub fn initial_position(&self, rng: &mut StdRng) -> Array1<f64> {
        let mut theta: Array1<f64> = (0..self.dim())
            .map(|_| {
                let e: f64 = StandardNormal.sample(rng);
                e * INITIAL_JITTER
            })
            .collect();
        if self.family == ModelFamily::Linear {
            let sd = if self.data.y.len() > 1 {
                self.data.y.std(1.0)
            } else {
                1.0
            };
            if sd > 0.0 && sd.is_finite() {
                theta[self.data.k] += sd.ln();
            }
        }
        theta
    }

    /// Maps an unconstrained draw θ to the reported parameters (β, then σ or α).
    pub fn to_natural(&self, theta: &Array1<f64>) -> Array1<f64> {
        let k = self.data.k;
        let mut natural = theta.clone();
        natural
            .slice_mut(s![..k])
            .zip_mut_with(self.data.inv_scale.as_ref(), |v, &w| *v *= w);
        if self.nuisance_prior.is_some() {
            natural[k] = theta[k].exp();
        }
        natural
    }

    /// Returns (log_posterior, gradient_theta).
    pub fn log_density_and_gradient(&self, theta: &Array1<f64>) -> (f64, Array1<f64>) {
        let k = self.data.k;

        // === Step 1: z -> β, η = X β ===
        let beta = &theta.slice(s![..k]) * self.data.inv_scale.as_ref();
        let eta = self.data.x.dot(&beta);

        // === Step 2: likelihood, its derivative in η, and in u ===
        let (mut logp, grad_eta, grad_u) = match self.family {
            ModelFamily::Linear => self.normal_loglik(&eta, theta[k]),
            ModelFamily::Logistic => {
                let (ll, grad) = self.bernoulli_loglik(&eta);
                (ll, grad, 0.0)
            }
            ModelFamily::Survival => self.weibull_loglik(&eta, theta[k]),
        };

        // === Step 3: chain rule to β, then coefficient prior ===
        let mut grad_beta = self.data.x.t().dot(&grad_eta);
        for (g, &b) in grad_beta.iter_mut().zip(beta.iter()) {
            let (lp, dlp) = prior_log_density(&self.coefficient_prior, b);
            logp += lp;
            *g += dlp;
        }

        // === Step 4: β -> z ===
        let mut grad = Array1::<f64>::zeros(self.dim());
        grad.slice_mut(s![..k])
            .assign(&(&grad_beta * self.data.inv_scale.as_ref()));

        // === Step 5: nuisance prior with the log-transform Jacobian ===
        if let Some(prior) = &self.nuisance_prior {
            let u = theta[k];
            let value = u.exp();
            let (lp, dlp) = prior_log_density(prior, value);
            logp += lp + u;
            grad[k] = grad_u + dlp * value + 1.0;
        }

        (logp, grad)
    }

    /// Normal(η, σ) with σ = exp(u).
    fn normal_loglik(&self, eta: &Array1<f64>, u: f64) -> (f64, Array1<f64>, f64) {
        let inv_var = (-2.0 * u).exp();
        let residual = self.data.y.as_ref() - eta;
        let rss = residual.dot(&residual);
        let n = residual.len() as f64;
        let ll = -n * u - 0.5 * n * (2.0 * PI).ln() - 0.5 * rss * inv_var;
        let grad_u = -n + rss * inv_var;
        (ll, residual * inv_var, grad_u)
    }

    /// Bernoulli(logit⁻¹(η)).
    fn bernoulli_loglik(&self, eta: &Array1<f64>) -> (f64, Array1<f64>) {
        let mut ll = 0.0;
        let mut residual = Array1::<f64>::zeros(eta.len());
        for (i, (&e, &y)) in eta.iter().zip(self.data.y.iter()).enumerate() {
            // log(1 + e^η) without overflow
            let softplus = if e > 0.0 {
                e + (-e).exp().ln_1p()
            } else {
                e.exp().ln_1p()
            };
            ll += y * e - softplus;
            residual[i] = y - 1.0 / (1.0 + (-e).exp());
        }
        (ll, residual)
    }

    /// Weibull(shape α = exp(u), scale λ = exp(η)).
    fn weibull_loglik(&self, eta: &Array1<f64>, u: f64) -> (f64, Array1<f64>, f64) {
        let alpha = u.exp();
        let mut ll = 0.0;
        let mut d_alpha = 0.0;
        let mut grad_eta = Array1::<f64>::zeros(eta.len());
        for (i, (&e, &log_y)) in eta.iter().zip(self.data.log_y.iter()).enumerate() {
            let log_ratio = log_y - e;
            let w = (alpha * log_ratio).exp();
            ll += u - alpha * e + (alpha - 1.0) * log_y - w;
            grad_eta[i] = alpha * (w - 1.0);
            d_alpha += 1.0 / alpha + log_ratio - w * log_ratio;
        }
        (ll, grad_eta, alpha * d_alpha)
    }
}

/// Log density (up to a constant) and its derivative for the priors used here.
fn prior_log_density(prior: &Prior, value: f64) -> (f64, f64) {
    match *prior {
        Prior::Normal { mean, sd } => {
            let inv_var = 1.0 / (sd * sd);
            let d = value - mean;
            (-0.5 * d * d * inv_var, -d * inv_var)
        }
        Prior::HalfCauchy { location, scale } => {
            let r = (value - location) / scale;
            (-(r * r).ln_1p(), -2.0 * r / (scale * (1.0 + r * r)))
        }
    }
}

fn tensor_to_array(z: Tensor<NutsBackend, 1>) -> Option<Array1<f64>> {
    z.into_data().to_vec::<f64>().ok().map(Array1::from_vec)
}

/// Implement GradientTarget for NUTS with analytical gradients.
impl GradientTarget<f64, NutsBackend> for LogPosterior {
    fn unnorm_logp(&self, z: Tensor<NutsBackend, 1>) -> Tensor<NutsBackend, 1> {
        let device = z.device();
        let logp = match tensor_to_array(z) {
            Some(theta) => self.log_density_and_gradient(&theta).0,
            None => f64::NEG_INFINITY,
        };
        Tensor::<NutsBackend, 1>::from_data(TensorData::new(vec![logp], [1]), &device)
    }

    fn unnorm_logp_and_grad(
        &self,
        z: Tensor<NutsBackend, 1>,
    ) -> (Tensor<NutsBackend, 1>, Tensor<NutsBackend, 1>) {
        let device = z.device();
        let dim = self.dim();
        let (logp, grad) = match tensor_to_array(z) {
            Some(theta) => self.log_density_and_gradient(&theta),
            None => (f64::NEG_INFINITY, Array1::zeros(dim)),
        };

        let logp_tensor =
            Tensor::<NutsBackend, 1>::from_data(TensorData::new(vec![logp], [1]), &device);
        let grad_tensor =
            Tensor::<NutsBackend, 1>::from_data(TensorData::new(grad.to_vec(), [dim]), &device);
        (logp_tensor, grad_tensor)
    }
}

/// The schedule every chain runs.
#[derive(Clone, Copy, Debug)]
pub struct ChainSchedule {
    pub iterations: usize,
    pub warmup: usize,
    pub target_accept: f64,
}

/// Runs a single chain and returns its unconstrained draws `[iterations, dim]`.
pub trait ChainEngine: Sync {
    fn sample_chain(
        &self,
        target: LogPosterior,
        initial_position: Vec<f64>,
        schedule: ChainSchedule,
        chain: usize,
        seed: u64,
    ) -> Result<Array2<f64>, SamplerError>;
}

impl<E: ChainEngine + ?Sized> ChainEngine for &E {
    fn sample_chain(
        &self,
        target: LogPosterior,
        initial_position: Vec<f64>,
        schedule: ChainSchedule,
        chain: usize,
        seed: u64,
    ) -> Result<Array2<f64>, SamplerError> {
        (**self).sample_chain(target, initial_position, schedule, chain, seed)
    }
}

/// mini-mcmc single-chain NUTS with dual-averaging step-size adaptation during warmup.
///
/// A panic inside the engine is reported as `EngineFailure` for its chain.
/// Release builds unwind so that such panics can be caught.
#[derive(Default)]
pub struct NutsEngine;

impl ChainEngine for NutsEngine {
    fn sample_chain(
        &self,
        target: LogPosterior,
        initial_position: Vec<f64>,
        schedule: ChainSchedule,
        chain: usize,
        seed: u64,
    ) -> Result<Array2<f64>, SamplerError> {
        let dim = target.dim();
        let mut sampler = NUTSChain::<f64, NutsBackend, LogPosterior>::new(
            target,
            initial_position,
            schedule.target_accept,
        )
        .set_seed(seed);

        let samples_tensor = panic::catch_unwind(AssertUnwindSafe(|| {
            sampler.run(schedule.iterations, schedule.warmup)
        }))
        .map_err(|payload| SamplerError::EngineFailure {
            chain,
            message: panic_message(payload.as_ref()),
        })?;

        let n_out = samples_tensor.dims()[0];
        let data: Vec<f64> =
            samples_tensor
                .into_data()
                .to_vec()
                .map_err(|e| SamplerError::EngineFailure {
                    chain,
                    message: format!("could not read draws: {e:?}"),
                })?;
        log::debug!("Chain {chain}: NUTS returned {n_out} draws");
        Array2::from_shape_vec((n_out, dim), data).map_err(|e| SamplerError::EngineFailure {
            chain,
            message: format!("unexpected draw layout: {e}"),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("engine panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("engine panicked: {message}")
    } else {
        "engine panicked".to_string()
    }
}

/// Posterior draws of one sampler run: `values` is `[chains, iterations, parameters]`.
#[derive(Debug, Clone)]
pub struct PosteriorDraws {
    parameters: Vec<String>,
    values: Array3<f64>,
    diagnostics: Vec<ParameterDiagnostics>,
    seeds: Vec<u64>,
}

impl PosteriorDraws {
    /// Wraps raw draws and computes their convergence diagnostics.
    pub fn new(
        parameters: Vec<String>,
        values: Array3<f64>,
        seeds: Vec<u64>,
    ) -> Result<Self, SamplerError> {
        if values.len_of(Axis(2)) != parameters.len() {
            return Err(SamplerError::SpecMismatch(format!(
                "{} parameter names for {} parameter columns",
                parameters.len(),
                values.len_of(Axis(2))
            )));
        }
        let diagnostics = convergence::summarize(&values, &parameters);
        Ok(Self {
            parameters,
            values,
            diagnostics,
            seeds,
        })
    }

    pub fn chains(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    pub fn iterations(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn diagnostics(&self) -> &[ParameterDiagnostics] {
        &self.diagnostics
    }

    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    /// `[chains, iterations]` draws of one parameter.
    pub fn draws_of(&self, parameter: &str) -> Option<ArrayView2<'_, f64>> {
        let index = self.parameters.iter().position(|p| p == parameter)?;
        Some(self.values.index_axis(Axis(2), index))
    }

    /// True when every parameter has R̂ below the threshold. Informational only.
    pub fn converged(&self) -> bool {
        self.diagnostics.iter().all(ParameterDiagnostics::converged)
    }
}

pub struct SamplerRunner<'a> {
    config: SamplerConfig,
    engine: Box<dyn ChainEngine + 'a>,
    progress: &'a dyn SamplingProgress,
}

impl<'a> SamplerRunner<'a> {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            engine: Box::new(NutsEngine),
            progress: &NoopProgress,
        }
    }

    pub fn with_engine(mut self, engine: impl ChainEngine + 'a) -> Self {
        self.engine = Box::new(engine);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn SamplingProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(
        &self,
        spec: &ModelSpec,
        design: &DesignMatrix,
    ) -> Result<PosteriorDraws, SamplerError> {
        self.config.validate()?;
        let target = LogPosterior::new(spec, design)?;
        let parameters = spec.parameter_names();
        let base_seed = self
            .config
            .seed
            .unwrap_or_else(|| rand::thread_rng().r#gen());
        let seeds: Vec<u64> = (0..self.config.chains)
            .map(|c| base_seed.wrapping_add(c as u64))
            .collect();
        let schedule = ChainSchedule {
            iterations: self.config.iterations,
            warmup: self.config.warmup,
            target_accept: self.config.target_accept,
        };

        log::info!(
            "Sampling {} model: {} chains x ({} warmup + {} draws), {} parameters, base seed {}",
            spec.family(),
            self.config.chains,
            schedule.warmup,
            schedule.iterations,
            parameters.len(),
            base_seed
        );
        self.progress.on_chains_start(self.config.chains);

        let chains: Vec<Array2<f64>> = seeds
            .par_iter()
            .enumerate()
            .map(|(chain, &seed)| {
                let draws = self.run_chain(&target, &parameters, schedule, chain, seed)?;
                self.progress.on_chain_finish(chain);
                Ok(draws)
            })
            .collect::<Result<Vec<_>, SamplerError>>()?;

        let mut values =
            Array3::<f64>::zeros((self.config.chains, schedule.iterations, parameters.len()));
        for (chain, draws) in chains.iter().enumerate() {
            values.index_axis_mut(Axis(0), chain).assign(draws);
        }

        let posterior = PosteriorDraws::new(parameters, values, seeds)?;
        for diag in posterior.diagnostics() {
            if diag.converged() {
                log::debug!(
                    "{}: mean={:.4} sd={:.4} rhat={:.3} ess={:.0}",
                    diag.name,
                    diag.mean,
                    diag.sd,
                    diag.rhat,
                    diag.ess
                );
            } else {
                log::warn!(
                    "{} may not have converged: rhat={:.3} ess={:.0}",
                    diag.name,
                    diag.rhat,
                    diag.ess
                );
            }
        }
        Ok(posterior)
    }

    /// One chain: initialize, hand off to the engine, map draws to the natural scale.
    fn run_chain(
        &self,
        target: &LogPosterior,
        parameters: &[String],
        schedule: ChainSchedule,
        chain: usize,
        seed: u64,
    ) -> Result<Array2<f64>, SamplerError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let start = target.initial_position(&mut rng);
        let (log_density, _) = target.log_density_and_gradient(&start);
        if !log_density.is_finite() {
            return Err(SamplerError::InitializationFailed { chain, log_density });
        }

        let raw = self
            .engine
            .sample_chain(target.clone(), start.to_vec(), schedule, chain, seed)?;
        if raw.dim() != (schedule.iterations, target.dim()) {
            return Err(SamplerError::EngineFailure {
                chain,
                message: format!(
                    "expected {}x{} draws, engine returned {:?}",
                    schedule.iterations,
                    target.dim(),
                    raw.dim()
                ),
            });
        }

        let mut natural = Array2::<f64>::zeros(raw.dim());
        for (mut out, theta) in natural.outer_iter_mut().zip(raw.outer_iter()) {
            out.assign(&target.to_natural(&theta.to_owned()));
        }
        if let Some(p) = (0..parameters.len())
            .find(|&p| natural.column(p).iter().any(|v| !v.is_finite()))
        {
            return Err(SamplerError::NonFiniteDraws {
                chain,
                parameter: parameters[p].clone(),
            });
        }
        Ok(natural)
    }
}
