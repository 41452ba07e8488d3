#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use bayesreg::config::PipelineConfig;
use bayesreg::dataset::Dataset;
use bayesreg::explore::ExploreError;
use bayesreg::pipeline::{Pipeline, PipelineOutput};
use bayesreg::progress::{PipelineStage, SamplingProgress};
use bayesreg::synthetic::{self, SyntheticConfig};
use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

#[derive(Parser)]
#[command(
    name = "bayesreg",
    about = "Bayesian regression with NUTS sampling and convergence diagnostics",
    long_about = "Fits linear, logistic or Weibull survival regressions to tabular data \
                 with multi-chain NUTS, then writes trace and density figures per parameter."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model and write diagnostic figures
    #[command(about = "Fit a Bayesian regression model (outputs: diagnostic_*.svg)")]
    Fit(FitArgs),

    /// Generate a synthetic medical dataset
    #[command(about = "Generate synthetic medical data (outputs: CSV)")]
    Generate(GenerateArgs),

    /// Summarize columns and their correlations
    #[command(about = "Describe numeric and boolean columns of a CSV file")]
    Describe(DescribeArgs),
}

#[derive(Args)]
struct FitArgs {
    /// Path to a CSV file with a header row
    #[arg(value_name = "DATA_CSV")]
    data: PathBuf,

    /// TOML run configuration; command-line flags override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Model family: linear, logistic or survival
    #[arg(long)]
    family: Option<String>,

    /// Response column
    #[arg(long)]
    response: Option<String>,

    /// Predictor column (repeat for several)
    #[arg(long = "predictor", value_name = "COLUMN")]
    predictors: Vec<String>,

    #[arg(long)]
    chains: Option<usize>,

    /// Post-warmup draws per chain
    #[arg(long)]
    iterations: Option<usize>,

    /// Warmup draws per chain
    #[arg(long)]
    warmup: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Directory for diagnostic figures; nothing is written when omitted
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Parameter to plot (repeat for several); all parameters when omitted
    #[arg(long = "parameter", value_name = "NAME")]
    parameters: Vec<String>,
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, default_value = "1000")]
    samples: usize,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// File name; `.csv` is appended when missing. Date-stamped by default.
    #[arg(long, value_name = "NAME")]
    output: Option<String>,

    #[arg(long, value_name = "DIR", default_value = synthetic::DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Comorbidity column (repeat for several, paired with --prevalence)
    #[arg(long = "comorbidity", value_name = "NAME")]
    comorbidities: Vec<String>,

    #[arg(long = "prevalence", value_name = "P")]
    prevalences: Vec<f64>,
}

#[derive(Args)]
struct DescribeArgs {
    #[arg(value_name = "DATA_CSV")]
    data: PathBuf,

    /// Column to correlate (repeat for several); all numeric and boolean columns when omitted
    #[arg(long = "column", value_name = "COLUMN")]
    columns: Vec<String>,
}

/// Chain completion bar on stderr, hidden when stderr is not a terminal.
#[derive(Default)]
struct ChainProgressBar {
    bar: OnceLock<ProgressBar>,
}

impl SamplingProgress for ChainProgressBar {
    fn on_chains_start(&self, total_chains: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(Some(total_chains as u64), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chains {msg}",
        ) {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        pb.set_message("Sampling...");
        let _ = self.bar.set(pb);
    }

    fn on_chain_finish(&self, _chain: usize) {
        if let Some(pb) = self.bar.get() {
            pb.inc(1);
        }
    }

    fn on_stage_finish(&self, stage: PipelineStage) {
        if stage == PipelineStage::Sampling {
            if let Some(pb) = self.bar.get() {
                pb.finish_with_message("done");
            }
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Generate(args)) => generate(args),
        Some(Commands::Describe(args)) => describe(args),
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn resolve_config(args: FitArgs) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            let family = args
                .family
                .clone()
                .ok_or("--family is required without --config")?;
            let response = args
                .response
                .clone()
                .ok_or("--response is required without --config")?;
            PipelineConfig::new(family, response, Vec::<String>::new())
        }
    };

    if let Some(family) = args.family {
        config.family = family;
    }
    if let Some(response) = args.response {
        config.response = response;
    }
    if !args.predictors.is_empty() {
        config.predictors = args.predictors;
    }
    if let Some(chains) = args.chains {
        config.chains = chains;
    }
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(warmup) = args.warmup {
        config.warmup = warmup;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.output_dir.is_some() {
        config.output_directory = args.output_dir;
    }
    if !args.parameters.is_empty() {
        config.parameter_subset = Some(args.parameters);
    }
    config.validate()?;
    Ok(config)
}

fn fit(args: FitArgs) -> Result<(), Box<dyn Error>> {
    let data_path = args.data.clone();
    let config = resolve_config(args)?;
    let dataset = Dataset::from_csv(&data_path)?;

    let progress = ChainProgressBar::default();
    let output = Pipeline::new(config).with_progress(&progress).run(&dataset)?;
    print_summary(&output);
    Ok(())
}

fn print_summary(output: &PipelineOutput) {
    let spec = &output.spec;
    println!(
        "\n{} regression of '{}' on {} predictor(s)",
        spec.family(),
        spec.response(),
        spec.predictors().len()
    );
    println!(
        "{:<12} {:<18} {:>10} {:>10} {:>10} {:>10} {:>7} {:>8}",
        "parameter", "term", "mean", "sd", "5%", "95%", "rhat", "ess"
    );
    for diag in output.draws.diagnostics() {
        let term = diag
            .name
            .strip_prefix("beta")
            .and_then(|k| k.parse::<usize>().ok())
            .and_then(|k| k.checked_sub(1))
            .and_then(|i| spec.predictors().get(i))
            .map_or("-", String::as_str);
        println!(
            "{:<12} {:<18} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>7.3} {:>8.0}{}",
            diag.name,
            term,
            diag.mean,
            diag.sd,
            diag.interval_90.0,
            diag.interval_90.1,
            diag.rhat,
            diag.ess,
            if diag.converged() { "" } else { "  (!)" }
        );
    }
    if !output.draws.converged() {
        println!("(!) R-hat at or above 1.1: chains may not have converged.");
    }

    if let Some(run) = output.report.run_index {
        println!("\nRun {run:03}: wrote {} figure(s)", output.report.artifacts.len());
        for artifact in &output.report.artifacts {
            println!("  {}", artifact.path.display());
        }
    }
}

fn generate(args: GenerateArgs) -> Result<(), Box<dyn Error>> {
    let mut config = SyntheticConfig {
        samples: args.samples,
        seed: args.seed,
        ..SyntheticConfig::default()
    };
    if !args.comorbidities.is_empty() || !args.prevalences.is_empty() {
        config = config.with_comorbidities(&args.comorbidities, &args.prevalences)?;
    }
    let dataset = synthetic::generate(&config)?;
    let path = synthetic::export_csv(&dataset, &args.output_dir, args.output.as_deref())?;
    println!("Wrote {} rows to {}", dataset.height(), path.display());
    Ok(())
}

fn describe(args: DescribeArgs) -> Result<(), Box<dyn Error>> {
    let dataset = Dataset::from_csv(&args.data)?;
    println!(
        "{:<20} {:>7} {:>7} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "column", "count", "missing", "mean", "sd", "min", "25%", "50%", "75%", "max"
    );
    for s in dataset.describe()? {
        println!(
            "{:<20} {:>7} {:>7} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            s.name, s.count, s.missing, s.mean, s.sd, s.min, s.q25, s.median, s.q75, s.max
        );
    }

    let requested = (!args.columns.is_empty()).then_some(args.columns.as_slice());
    let matrix = match dataset.correlation(requested) {
        Ok(matrix) => matrix,
        Err(ExploreError::TooFewColumns(n)) if requested.is_none() => {
            println!("\nCorrelation needs at least 2 numeric or boolean columns, found {n}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("\nCorrelation matrix:");
    print!("{:<20}", "");
    for name in &matrix.columns {
        print!(" {name:>12.12}");
    }
    println!();
    for (name, row) in matrix.columns.iter().zip(matrix.values.rows()) {
        print!("{name:<20}");
        for r in row {
            print!(" {r:>12.2}");
        }
        println!();
    }
    Ok(())
}
