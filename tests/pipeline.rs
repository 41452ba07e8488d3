use bayesreg::config::PipelineConfig;
use bayesreg::dataset::Dataset;
use bayesreg::pipeline::{Pipeline, PipelineError, run_pipeline};
use bayesreg::progress::NoopProgress;
use bayesreg::report::DiagnosticReportGenerator;
use bayesreg::sampler::SamplerError;
use bayesreg::synthetic::{self, SyntheticConfig};
use chrono::NaiveDate;
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::fs;
use tempfile::tempdir;

fn linear_dataset(n: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(17);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let x1: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64) * 4.0 - 2.0).collect();
    let x2: Vec<f64> = (0..n).map(|i| ((i * 7) % 11) as f64 / 5.0 - 1.0).collect();
    let y: Vec<f64> = x1
        .iter()
        .zip(&x2)
        .map(|(a, b)| 1.5 * a - 0.75 * b + noise.sample(&mut rng))
        .collect();
    Dataset::new(df!("x1" => x1, "x2" => x2, "y" => y).unwrap())
}

#[test]
fn nuts_draws_have_the_requested_shape() {
    let mut config = PipelineConfig::new("linear", "y", ["x1", "x2"]);
    config.seed = Some(2025);

    let output = run_pipeline(&linear_dataset(80), &config, &NoopProgress).unwrap();
    let draws = &output.draws;
    assert_eq!(draws.values().shape(), &[4, 2000, 3]);
    assert_eq!(draws.parameters(), ["beta1", "beta2", "sigma"]);
    assert_eq!(draws.seeds(), &[2025, 2026, 2027, 2028]);

    let diag = draws.diagnostics();
    assert!((diag[0].mean - 1.5).abs() < 0.3, "beta1 mean {}", diag[0].mean);
    assert!((diag[1].mean + 0.75).abs() < 0.3, "beta2 mean {}", diag[1].mean);
    assert!(diag[2].mean > 0.3 && diag[2].mean < 0.8, "sigma mean {}", diag[2].mean);
    assert!(draws.converged());
    assert!(output.report.artifacts.is_empty());
}

#[test]
fn same_seed_reproduces_the_draws() {
    let mut config = PipelineConfig::new("linear", "y", ["x1"]);
    config.chains = 2;
    config.iterations = 100;
    config.warmup = 50;
    config.seed = Some(9);
    let dataset = linear_dataset(40);

    let a = run_pipeline(&dataset, &config, &NoopProgress).unwrap();
    let b = run_pipeline(&dataset, &config, &NoopProgress).unwrap();
    assert_eq!(a.draws.values(), b.draws.values());
}

#[test]
fn repeated_runs_number_their_artifacts() {
    let dir = tempdir().unwrap();
    let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    fs::write(dir.path().join("diagnostic_20250101_007_beta1.pdf"), b"").unwrap();

    let mut config = PipelineConfig::new("logistic", "diabetes", ["age", "weight"]);
    config.chains = 2;
    config.iterations = 100;
    config.warmup = 100;
    config.seed = Some(1);
    config.output_directory = Some(dir.path().to_path_buf());
    let dataset = synthetic::generate(&SyntheticConfig {
        samples: 200,
        ..SyntheticConfig::default()
    })
    .unwrap();

    let first = Pipeline::new(config.clone())
        .with_date(date)
        .run(&dataset)
        .unwrap();
    assert_eq!(first.report.run_index, Some(8));

    let second = DiagnosticReportGenerator::new(Some(dir.path().to_path_buf()))
        .with_date(date)
        .generate(&first.draws, None)
        .unwrap();
    assert_eq!(second.run_index, Some(9));
    let names: Vec<String> = second
        .artifacts
        .iter()
        .map(|a| a.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        [
            "diagnostic_20250101_009_beta1.svg",
            "diagnostic_20250101_009_beta2.svg"
        ]
    );
}

#[test]
fn survival_model_samples_a_positive_shape() {
    let dataset = synthetic::generate(&SyntheticConfig {
        samples: 150,
        ..SyntheticConfig::default()
    })
    .unwrap();
    let mut config = PipelineConfig::new("Survival", "survival_time", ["cancer", "hypertension"]);
    config.chains = 2;
    config.iterations = 200;
    config.warmup = 200;
    config.seed = Some(4);

    let output = run_pipeline(&dataset, &config, &NoopProgress).unwrap();
    let alpha = output.draws.draws_of("alpha").unwrap();
    assert!(alpha.iter().all(|&a| a.is_finite() && a > 0.0));
    assert_eq!(output.draws.parameters(), ["beta1", "beta2", "alpha"]);
}

#[test]
fn invalid_chain_count_fails_before_sampling() {
    let mut config = PipelineConfig::new("linear", "y", ["x1"]);
    config.chains = 0;
    let err = run_pipeline(&linear_dataset(10), &config, &NoopProgress).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));

    config.chains = 1;
    config.target_accept = 1.5;
    let err = run_pipeline(&linear_dataset(10), &config, &NoopProgress).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Sampler(SamplerError::InvalidConfig(_))
    ));
}
