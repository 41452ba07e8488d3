//! Split-R̂ and effective sample size for multi-chain draws.
//!
//! Both statistics take one parameter's draws as a `[chains, iterations]`
//! view. Degenerate input (fewer than four draws per chain, or zero variance)
//! yields `NaN` rather than an error, since convergence is informational.

use ndarray::{Array1, Array3, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

/// R̂ above this value marks a parameter as not converged.
pub const RHAT_THRESHOLD: f64 = 1.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDiagnostics {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// 5th and 95th percentile of the pooled draws.
    pub interval_90: (f64, f64),
    pub rhat: f64,
    pub ess: f64,
}

impl ParameterDiagnostics {
    pub fn converged(&self) -> bool {
        self.rhat.is_finite() && self.rhat < RHAT_THRESHOLD
    }
}

/// Summaries for every parameter of a `[chains, iterations, parameters]` array.
pub fn summarize(values: &Array3<f64>, names: &[String]) -> Vec<ParameterDiagnostics> {
    names
        .iter()
        .enumerate()
        .map(|(p, name)| {
            let draws = values.index_axis(Axis(2), p);
            let pooled: Array1<f64> = draws.iter().copied().collect();
            ParameterDiagnostics {
                name: name.clone(),
                mean: pooled.mean().unwrap_or(f64::NAN),
                sd: if pooled.len() > 1 {
                    pooled.std(1.0)
                } else {
                    f64::NAN
                },
                interval_90: (quantile(pooled.view(), 0.05), quantile(pooled.view(), 0.95)),
                rhat: split_rhat(draws),
                ess: effective_sample_size(draws),
            }
        })
        .collect()
}

/// Gelman-Rubin potential scale reduction computed on chains split in half.
pub fn split_rhat(draws: ArrayView2<f64>) -> f64 {
    let (n_chains, n_iter) = draws.dim();
    let half = n_iter / 2;
    if n_chains == 0 || half < 2 {
        return f64::NAN;
    }

    // The middle draw of an odd-length chain is dropped.
    let mut halves = Vec::with_capacity(2 * n_chains);
    for c in 0..n_chains {
        halves.push(draws.slice(s![c, ..half]));
        halves.push(draws.slice(s![c, n_iter - half..]));
    }

    let n = half as f64;
    let means: Array1<f64> = halves.iter().map(|h| h.mean().unwrap_or(f64::NAN)).collect();
    let within = halves.iter().map(|h| h.var(1.0)).sum::<f64>() / halves.len() as f64;
    let between = n * means.var(1.0);

    if within <= 0.0 {
        return if between <= 0.0 { f64::NAN } else { f64::INFINITY };
    }
    let var_plus = (n - 1.0) / n * within + between / n;
    (var_plus / within).sqrt()
}

/// Multi-chain ESS using Geyer's initial monotone sequence estimator.
pub fn effective_sample_size(draws: ArrayView2<f64>) -> f64 {
    let (n_chains, n_iter) = draws.dim();
    if n_chains == 0 || n_iter < 4 {
        return f64::NAN;
    }
    let n = n_iter as f64;
    let total = (n_chains * n_iter) as f64;

    let centered: Vec<(Array1<f64>, f64)> = draws
        .outer_iter()
        .map(|chain| {
            let mean = chain.mean().unwrap_or(0.0);
            (chain.mapv(|v| v - mean), mean)
        })
        .collect();
    let autocov = |lag: usize| -> f64 {
        centered
            .iter()
            .map(|(c, _)| c.slice(s![..n_iter - lag]).dot(&c.slice(s![lag..])) / n)
            .sum::<f64>()
            / n_chains as f64
    };

    let chain_means: Array1<f64> = centered.iter().map(|(_, m)| *m).collect();
    let within = autocov(0) * n / (n - 1.0);
    let between_over_n = if n_chains > 1 {
        chain_means.var(1.0)
    } else {
        0.0
    };
    let var_plus = (n - 1.0) / n * within + between_over_n;
    if var_plus <= 0.0 || !var_plus.is_finite() {
        return f64::NAN;
    }
    let rho = |lag: usize| 1.0 - (within - autocov(lag)) / var_plus;

    let mut tau = -1.0;
    let mut previous_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n_iter {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(previous_pair);
        tau += 2.0 * pair;
        previous_pair = pair;
        lag += 2;
    }

    let tau = tau.max(1.0 / total.log10());
    total / tau
}

/// Linear-interpolated sample quantile.
pub fn quantile(values: ArrayView1<f64>, q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let frac = position - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, StandardNormal};

    fn iid_chains(chains: usize, iterations: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((chains, iterations), |_| StandardNormal.sample(&mut rng))
    }

    #[test]
    fn rhat_is_near_one_for_iid_chains() {
        let draws = iid_chains(4, 1000, 7);
        let rhat = split_rhat(draws.view());
        assert!((rhat - 1.0).abs() < 0.02, "rhat = {rhat}");
    }

    #[test]
    fn rhat_flags_chains_stuck_in_different_places() {
        let mut draws = iid_chains(4, 500, 11);
        for (c, mut chain) in draws.outer_iter_mut().enumerate() {
            chain += 5.0 * c as f64;
        }
        assert!(split_rhat(draws.view()) > 2.0);
    }

    #[test]
    fn rhat_detects_within_chain_drift() {
        let draws = Array2::from_shape_fn((2, 400), |(_, t)| t as f64 / 10.0);
        assert!(split_rhat(draws.view()) > RHAT_THRESHOLD);
    }

    #[test]
    fn ess_of_iid_draws_is_close_to_total() {
        let draws = iid_chains(4, 1000, 3);
        let ess = effective_sample_size(draws.view());
        assert!(ess > 3000.0 && ess < 5200.0, "ess = {ess}");
    }

    #[test]
    fn ess_shrinks_for_autocorrelated_draws() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut draws = Array2::<f64>::zeros((4, 1000));
        for mut chain in draws.outer_iter_mut() {
            let mut state = 0.0;
            for v in chain.iter_mut() {
                let e: f64 = StandardNormal.sample(&mut rng);
                state = 0.95 * state + e;
                *v = state;
            }
        }
        let ess = effective_sample_size(draws.view());
        assert!(ess < 600.0, "ess = {ess}");
    }

    #[test]
    fn degenerate_input_yields_nan() {
        let constant = Array2::from_elem((4, 100), 2.0);
        assert!(split_rhat(constant.view()).is_nan());
        assert!(effective_sample_size(constant.view()).is_nan());
        let short = Array2::from_elem((4, 3), 1.0);
        assert!(split_rhat(short.view()).is_nan());
    }

    #[test]
    fn quantile_interpolates() {
        let values = ndarray::array![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_abs_diff_eq!(quantile(values.view(), 0.5), 3.0);
        assert_abs_diff_eq!(quantile(values.view(), 0.0), 1.0);
        assert_abs_diff_eq!(quantile(values.view(), 1.0), 5.0);
        assert_abs_diff_eq!(quantile(values.view(), 0.25), 2.0);
    }

    #[test]
    fn summarize_reports_every_parameter() {
        let values = Array3::from_shape_fn((2, 50, 2), |(c, t, p)| {
            (p as f64) * 10.0 + ((c * 50 + t) as f64 * 0.71).sin()
        });
        let names = vec!["beta1".to_string(), "sigma".to_string()];
        let summary = summarize(&values, &names);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[1].name, "sigma");
        assert!((summary[1].mean - 10.0).abs() < 0.5);
        assert!(summary[0].interval_90.0 < summary[0].interval_90.1);
    }
}
