//! # Diagnostic Figures
//!
//! One composite SVG per parameter: the trace of every chain on the left and
//! the kernel density estimate of the posterior on the right. Figures are
//! rendered in memory first; when an output directory is configured they
//! are written under the run's versioned file names (see `versioning`).

use crate::convergence::quantile;
use crate::sampler::PosteriorDraws;
use crate::versioning::RunCounter;
use chrono::NaiveDate;
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FIGURE_EXTENSION: &str = "svg";

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 340.0;
const PANEL_TOP: f64 = 48.0;
const PANEL_BOTTOM: f64 = 290.0;
const TRACE_LEFT: f64 = 70.0;
const TRACE_RIGHT: f64 = 520.0;
const DENSITY_LEFT: f64 = 580.0;
const DENSITY_RIGHT: f64 = 930.0;
/// Trace polylines are thinned to at most this many vertices per chain.
const MAX_TRACE_POINTS: usize = 1000;
const DENSITY_GRID: usize = 200;
const CHAIN_COLORS: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
];

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Parameter '{0}' is not part of the posterior draws.")]
    UnknownParameter(String),
    #[error("The posterior draws are empty; nothing to plot.")]
    EmptyDraws,
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A rendered composite figure for one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub parameter_name: String,
    pub svg: String,
}

/// A figure persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticArtifact {
    pub date: NaiveDate,
    pub run_index: u32,
    pub parameter_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub figures: Vec<Figure>,
    /// Empty when no output directory was configured.
    pub artifacts: Vec<DiagnosticArtifact>,
    pub run_index: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticReportGenerator {
    output_dir: Option<PathBuf>,
    date: Option<NaiveDate>,
    labels: HashMap<String, String>,
}

impl DiagnosticReportGenerator {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            ..Self::default()
        }
    }

    /// Fixes the calendar date used in file names instead of today's date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Display labels appended to figure titles, e.g. `beta1` -> `age`.
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn generate(
        &self,
        draws: &PosteriorDraws,
        subset: Option<&[String]>,
    ) -> Result<DiagnosticReport, ReportError> {
        if draws.chains() == 0 || draws.iterations() == 0 {
            return Err(ReportError::EmptyDraws);
        }
        let selected: Vec<&str> = match subset {
            Some(names) => names.iter().map(String::as_str).collect(),
            None => draws.parameters().iter().map(String::as_str).collect(),
        };

        let mut figures = Vec::with_capacity(selected.len());
        for name in selected {
            let values = draws
                .draws_of(name)
                .ok_or_else(|| ReportError::UnknownParameter(name.to_string()))?;
            let title = match self.labels.get(name) {
                Some(label) => format!("{name} ({label})"),
                None => name.to_string(),
            };
            figures.push(Figure {
                parameter_name: name.to_string(),
                svg: render_figure(&title, values),
            });
        }

        let Some(directory) = &self.output_dir else {
            log::info!("Rendered {} figures in memory", figures.len());
            return Ok(DiagnosticReport {
                figures,
                artifacts: Vec::new(),
                run_index: None,
            });
        };

        fs::create_dir_all(directory).map_err(|e| ReportError::io(directory, e))?;
        let counter = match self.date {
            Some(date) => RunCounter::new(directory, date),
            None => RunCounter::today(directory),
        };

        let mut artifacts = Vec::with_capacity(figures.len());
        for figure in &figures {
            let path = counter
                .artifact_path(&figure.parameter_name, FIGURE_EXTENSION)
                .map_err(|e| ReportError::io(directory, e))?;
            fs::write(&path, figure.svg.as_bytes()).map_err(|e| ReportError::io(&path, e))?;
            log::debug!("Wrote {}", path.display());
            artifacts.push(DiagnosticArtifact {
                date: counter.date(),
                run_index: counter
                    .run_index()
                    .map_err(|e| ReportError::io(directory, e))?,
                parameter_name: figure.parameter_name.clone(),
                path,
            });
        }
        let run_index = artifacts.first().map(|a| a.run_index);
        log::info!(
            "Wrote {} diagnostic figures to '{}'",
            artifacts.len(),
            directory.display()
        );

        Ok(DiagnosticReport {
            figures,
            artifacts,
            run_index,
        })
    }
}

/// Gaussian KDE on an evenly spaced grid, bandwidth by Silverman's rule.
pub fn kernel_density(values: ArrayView1<f64>, grid_points: usize) -> (Array1<f64>, Array1<f64>) {
    let n = values.len();
    let (lo, hi) = min_max(values.iter().copied());
    if n == 0 || grid_points < 2 {
        return (Array1::zeros(0), Array1::zeros(0));
    }

    let sd = if n > 1 { values.std(1.0) } else { 0.0 };
    let iqr = quantile(values, 0.75) - quantile(values, 0.25);
    let spread = match (sd > 0.0, iqr > 0.0) {
        (true, true) => sd.min(iqr / 1.34),
        (true, false) => sd,
        (false, true) => iqr / 1.34,
        (false, false) => (lo.abs() * 1e-3).max(1e-3),
    };
    let bandwidth = 0.9 * spread * (n as f64).powf(-0.2);

    let grid = Array1::linspace(lo - 3.0 * bandwidth, hi + 3.0 * bandwidth, grid_points);
    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    let density = grid.mapv(|g| {
        values
            .iter()
            .map(|&v| {
                let u = (g - v) / bandwidth;
                (-0.5 * u * u).exp()
            })
            .sum::<f64>()
            * norm
    });
    (grid, density)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// Maps a data interval linearly onto a pixel interval.
struct Scale {
    data: (f64, f64),
    pixels: (f64, f64),
}

impl Scale {
    fn new(lo: f64, hi: f64, pixels: (f64, f64)) -> Self {
        let (lo, hi) = if hi > lo {
            (lo, hi)
        } else {
            (lo - 0.5, hi + 0.5)
        };
        Self {
            data: (lo, hi),
            pixels,
        }
    }

    fn map(&self, v: f64) -> f64 {
        let t = (v - self.data.0) / (self.data.1 - self.data.0);
        self.pixels.0 + t * (self.pixels.1 - self.pixels.0)
    }
}

fn polyline(svg: &mut String, points: impl Iterator<Item = (f64, f64)>, color: &str, width: f64) {
    let coords: Vec<String> = points.map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
    svg.push_str(&format!(
        "  <polyline fill=\"none\" stroke=\"{color}\" stroke-width=\"{width}\" stroke-opacity=\"0.8\" points=\"{}\"/>\n",
        coords.join(" ")
    ));
}

fn panel_frame(svg: &mut String, left: f64, right: f64, title: &str) {
    svg.push_str(&format!(
        "  <rect x=\"{left}\" y=\"{PANEL_TOP}\" width=\"{}\" height=\"{}\" fill=\"#ffffff\" stroke=\"#333333\"/>\n",
        right - left,
        PANEL_BOTTOM - PANEL_TOP
    ));
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"{}\" class=\"panel\" text-anchor=\"middle\">{}</text>\n",
        (left + right) / 2.0,
        PANEL_TOP - 8.0,
        escape(title)
    ));
}

fn axis_labels(svg: &mut String, left: f64, right: f64, x: (f64, f64), y: (f64, f64)) {
    svg.push_str(&format!(
        "  <text x=\"{left}\" y=\"{}\" class=\"tick\">{}</text>\n",
        PANEL_BOTTOM + 16.0,
        format_tick(x.0)
    ));
    svg.push_str(&format!(
        "  <text x=\"{right}\" y=\"{}\" class=\"tick\" text-anchor=\"end\">{}</text>\n",
        PANEL_BOTTOM + 16.0,
        format_tick(x.1)
    ));
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"{PANEL_BOTTOM}\" class=\"tick\" text-anchor=\"end\">{}</text>\n",
        left - 6.0,
        format_tick(y.0)
    ));
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"{}\" class=\"tick\" text-anchor=\"end\">{}</text>\n",
        left - 6.0,
        PANEL_TOP + 10.0,
        format_tick(y.1)
    ));
}

fn format_tick(v: f64) -> String {
    if v != 0.0 && (v.abs() >= 1e4 || v.abs() < 1e-2) {
        format!("{v:.2e}")
    } else {
        format!("{v:.3}")
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders the trace (left) and density (right) panels for `[chains, iterations]` draws.
pub fn render_figure(title: &str, draws: ArrayView2<f64>) -> String {
    let (n_chains, n_iter) = draws.dim();
    let (lo, hi) = min_max(draws.iter().copied());

    let mut svg = String::new();
    svg.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n"
    ));
    svg.push_str("  <style>\n");
    svg.push_str("    .title { font-family: sans-serif; font-size: 16px; font-weight: bold; }\n");
    svg.push_str("    .panel { font-family: sans-serif; font-size: 13px; }\n");
    svg.push_str("    .tick { font-family: monospace; font-size: 11px; }\n");
    svg.push_str("  </style>\n");
    svg.push_str("  <rect width=\"100%\" height=\"100%\" fill=\"#f8f8f8\"/>\n");
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"22\" class=\"title\" text-anchor=\"middle\">{}</text>\n",
        WIDTH / 2.0,
        escape(title)
    ));

    // --- Trace panel ---
    panel_frame(&mut svg, TRACE_LEFT, TRACE_RIGHT, "Trace");
    let x_scale = Scale::new(0.0, n_iter.saturating_sub(1) as f64, (TRACE_LEFT, TRACE_RIGHT));
    let y_scale = Scale::new(lo, hi, (PANEL_BOTTOM, PANEL_TOP));
    let stride = n_iter.div_ceil(MAX_TRACE_POINTS).max(1);
    for (c, chain) in draws.outer_iter().enumerate() {
        let points = chain
            .iter()
            .enumerate()
            .step_by(stride)
            .map(|(t, &v)| (x_scale.map(t as f64), y_scale.map(v)));
        polyline(&mut svg, points, CHAIN_COLORS[c % CHAIN_COLORS.len()], 0.8);
    }
    axis_labels(
        &mut svg,
        TRACE_LEFT,
        TRACE_RIGHT,
        (0.0, n_iter.saturating_sub(1) as f64),
        y_scale.data,
    );

    // --- Density panel ---
    panel_frame(&mut svg, DENSITY_LEFT, DENSITY_RIGHT, "Posterior density");
    let pooled: Array1<f64> = draws.iter().copied().collect();
    let (grid, density) = kernel_density(pooled.view(), DENSITY_GRID);
    let per_chain: Vec<(Array1<f64>, Array1<f64>)> = if n_chains > 1 {
        draws
            .outer_iter()
            .map(|chain| kernel_density(chain, DENSITY_GRID))
            .collect()
    } else {
        Vec::new()
    };
    if !grid.is_empty() {
        let peak = per_chain
            .iter()
            .flat_map(|(_, d)| d.iter().copied())
            .chain(density.iter().copied())
            .fold(0.0, f64::max);
        let (x_lo, x_hi) = min_max(
            per_chain
                .iter()
                .flat_map(|(g, _)| g.iter().copied())
                .chain(grid.iter().copied()),
        );
        let gx = Scale::new(x_lo, x_hi, (DENSITY_LEFT, DENSITY_RIGHT));
        let gy = Scale::new(0.0, peak, (PANEL_BOTTOM, PANEL_TOP));
        for (c, (chain_grid, chain_density)) in per_chain.iter().enumerate() {
            let points = chain_grid
                .iter()
                .zip(chain_density.iter())
                .map(|(&x, &d)| (gx.map(x), gy.map(d)));
            polyline(&mut svg, points, CHAIN_COLORS[c % CHAIN_COLORS.len()], 0.6);
        }
        let points = grid
            .iter()
            .zip(density.iter())
            .map(|(&x, &d)| (gx.map(x), gy.map(d)));
        polyline(&mut svg, points, "#000000", 1.6);
        axis_labels(
            &mut svg,
            DENSITY_LEFT,
            DENSITY_RIGHT,
            gx.data,
            (0.0, peak),
        );
    }

    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use std::fs;
    use tempfile::tempdir;

    fn draws(parameters: &[&str]) -> PosteriorDraws {
        let values = Array3::from_shape_fn((2, 120, parameters.len()), |(c, t, p)| {
            p as f64 + ((t * 13 + c * 7) as f64 * 0.37).sin()
        });
        PosteriorDraws::new(
            parameters.iter().map(|p| p.to_string()).collect(),
            values,
            vec![1, 2],
        )
        .unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn kde_integrates_to_one() {
        let values = Array1::from_shape_fn(500, |i| ((i as f64) * 0.731).sin() * 2.0);
        let (grid, density) = kernel_density(values.view(), 400);
        let step = grid[1] - grid[0];
        let area: f64 = density.sum() * step;
        assert!((area - 1.0).abs() < 0.02, "area = {area}");
    }

    #[test]
    fn kde_handles_constant_draws() {
        let values = Array1::from_elem(50, 3.0);
        let (grid, density) = kernel_density(values.view(), 50);
        assert_eq!(grid.len(), 50);
        assert!(density.iter().all(|d| d.is_finite()));
    }

    #[test]
    fn figure_contains_both_panels_and_every_chain() {
        let values = Array2::from_shape_fn((3, 50), |(c, t)| c as f64 + t as f64 * 0.01);
        let svg = render_figure("beta1 (age & <sex>)", values.view());
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("Trace"));
        assert!(svg.contains("Posterior density"));
        assert!(svg.contains("beta1 (age &amp; &lt;sex&gt;)"));
        // three chain traces, three chain densities, one pooled density
        assert_eq!(svg.matches("<polyline").count(), 7);
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn no_directory_returns_figures_in_memory() {
        let report = DiagnosticReportGenerator::new(None)
            .generate(&draws(&["beta1", "sigma"]), None)
            .unwrap();
        assert_eq!(report.figures.len(), 2);
        assert!(report.artifacts.is_empty());
        assert_eq!(report.run_index, None);
    }

    #[test]
    fn subset_selects_and_validates_parameters() {
        let generator = DiagnosticReportGenerator::new(None);
        let posterior = draws(&["beta1", "beta2", "alpha"]);
        let report = generator
            .generate(&posterior, Some(&["alpha".to_string()]))
            .unwrap();
        assert_eq!(report.figures.len(), 1);
        assert_eq!(report.figures[0].parameter_name, "alpha");

        let err = generator
            .generate(&posterior, Some(&["sigma".to_string()]))
            .unwrap_err();
        assert!(matches!(err, ReportError::UnknownParameter(p) if p == "sigma"));
    }

    #[test]
    fn consecutive_runs_share_one_index_each() {
        let dir = tempdir().unwrap();
        let generator =
            DiagnosticReportGenerator::new(Some(dir.path().to_path_buf())).with_date(day(1));
        let posterior = draws(&["beta1", "beta2", "sigma"]);

        let first = generator.generate(&posterior, None).unwrap();
        let second = generator.generate(&posterior, None).unwrap();
        assert_eq!(first.run_index, Some(1));
        assert_eq!(second.run_index, Some(2));
        assert!(second.artifacts.iter().all(|a| a.run_index == 2));
        assert!(
            second.artifacts[0]
                .path
                .ends_with("diagnostic_20250101_002_beta1.svg")
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 6);
    }

    #[test]
    fn a_new_date_restarts_numbering() {
        let dir = tempdir().unwrap();
        let posterior = draws(&["beta1"]);
        let path = Some(dir.path().to_path_buf());
        DiagnosticReportGenerator::new(path.clone())
            .with_date(day(1))
            .generate(&posterior, None)
            .unwrap();
        let next_day = DiagnosticReportGenerator::new(path)
            .with_date(day(2))
            .generate(&posterior, None)
            .unwrap();
        assert_eq!(next_day.run_index, Some(1));
    }

    #[test]
    fn labels_are_added_to_titles() {
        let labels = HashMap::from([("beta1".to_string(), "age".to_string())]);
        let report = DiagnosticReportGenerator::new(None)
            .with_labels(labels)
            .generate(&draws(&["beta1"]), None)
            .unwrap();
        assert!(report.figures[0].svg.contains("beta1 (age)"));
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_directory");
        fs::write(&blocker, b"").unwrap();
        let err = DiagnosticReportGenerator::new(Some(blocker.join("out")))
            .with_date(day(1))
            .generate(&draws(&["beta1"]), None)
            .unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }

    #[test]
    fn exhausted_run_numbers_fail_without_writing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("diagnostic_20250101_4294967295_beta1.svg"), b"").unwrap();
        let err = DiagnosticReportGenerator::new(Some(dir.path().to_path_buf()))
            .with_date(day(1))
            .generate(&draws(&["beta1"]), None)
            .unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
