//! Date-scoped run numbering for diagnostic artifacts.
//!
//! A `RunCounter` belongs to exactly one pipeline run. The first call to
//! `run_index` scans the output directory; every later call returns the same
//! value, so all artifacts of a run share one index.
//!
//! The scan-then-write sequence assumes a single writer per directory and
//! date. Two runs started concurrently against the same directory can compute
//! the same index and overwrite each other's files.

use chrono::{Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File-name prefix of every diagnostic artifact.
pub const ARTIFACT_PREFIX: &str = "diagnostic";

pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `diagnostic_{YYYYMMDD}_{run:03}_{parameter}.{extension}`
pub fn artifact_file_name(
    date: NaiveDate,
    run_index: u32,
    parameter: &str,
    extension: &str,
) -> String {
    format!(
        "{ARTIFACT_PREFIX}_{}_{run_index:03}_{parameter}.{extension}",
        date_stamp(date)
    )
}

/// Digits immediately following the first `{stamp}_` in `file_name`, if any.
fn run_digits<'a>(file_name: &'a str, stamp: &str) -> Option<&'a str> {
    let marker = format!("{stamp}_");
    let start = file_name.find(&marker)? + marker.len();
    let rest = &file_name[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

fn out_of_range(file_name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("run number in '{file_name}' exceeds the supported range"),
    )
}

/// Highest run index already present in `directory` for `date`, if any.
///
/// A run number too large for `u32` is an error rather than being skipped,
/// so the next index never falls below an existing one.
pub fn highest_existing_run(directory: &Path, date: NaiveDate) -> io::Result<Option<u32>> {
    let stamp = date_stamp(date);
    let mut highest = None;
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(digits) = run_digits(name, &stamp) {
            let run: u32 = digits.parse().map_err(|_| out_of_range(name))?;
            highest = Some(highest.map_or(run, |h: u32| h.max(run)));
        }
    }
    Ok(highest)
}

/// Index for the next run: one past the highest existing run, or 1.
pub fn next_run_index(directory: &Path, date: NaiveDate) -> io::Result<u32> {
    match highest_existing_run(directory, date)? {
        None => Ok(1),
        Some(highest) => highest.checked_add(1).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "run {highest} for {} is the last representable run index",
                    date_stamp(date)
                ),
            )
        }),
    }
}

#[derive(Debug)]
pub struct RunCounter {
    directory: PathBuf,
    date: NaiveDate,
    index: OnceLock<u32>,
}

impl RunCounter {
    pub fn new(directory: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            directory: directory.into(),
            date,
            index: OnceLock::new(),
        }
    }

    /// Counter for today's local date.
    pub fn today(directory: impl Into<PathBuf>) -> Self {
        Self::new(directory, Local::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// The run index, computed on first use and fixed afterwards.
    pub fn run_index(&self) -> io::Result<u32> {
        if let Some(index) = self.index.get() {
            return Ok(*index);
        }
        let next = next_run_index(&self.directory, self.date)?;
        let index = *self.index.get_or_init(|| next);
        log::info!(
            "Diagnostic run {:03} for {} in '{}'",
            index,
            date_stamp(self.date),
            self.directory.display()
        );
        Ok(index)
    }

    /// Path of the artifact for `parameter` in this run.
    pub fn artifact_path(&self, parameter: &str, extension: &str) -> io::Result<PathBuf> {
        let index = self.run_index()?;
        Ok(self
            .directory
            .join(artifact_file_name(self.date, index, parameter, extension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn jan_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(
            artifact_file_name(jan_first(), 8, "beta1", "svg"),
            "diagnostic_20250101_008_beta1.svg"
        );
        assert_eq!(
            artifact_file_name(jan_first(), 1234, "sigma", "svg"),
            "diagnostic_20250101_1234_sigma.svg"
        );
    }

    #[test]
    fn empty_directory_starts_at_one() {
        let dir = tempdir().unwrap();
        let counter = RunCounter::new(dir.path(), jan_first());
        assert_eq!(counter.run_index().unwrap(), 1);
    }

    #[test]
    fn existing_artifact_advances_index() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("diagnostic_20250101_007_beta1.pdf"), b"").unwrap();
        fs::write(dir.path().join("diagnostic_20250101_003_sigma.svg"), b"").unwrap();
        let counter = RunCounter::new(dir.path(), jan_first());
        assert_eq!(counter.run_index().unwrap(), 8);
    }

    #[test]
    fn other_dates_and_unrelated_files_are_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("diagnostic_20241231_042_beta1.svg"), b"").unwrap();
        fs::write(dir.path().join("notes_20250101.txt"), b"").unwrap();
        fs::write(dir.path().join("20250101_.svg"), b"").unwrap();
        let counter = RunCounter::new(dir.path(), jan_first());
        assert_eq!(counter.run_index().unwrap(), 1);
    }

    #[test]
    fn index_is_fixed_once_computed() {
        let dir = tempdir().unwrap();
        let counter = RunCounter::new(dir.path(), jan_first());
        let first = counter.artifact_path("beta1", "svg").unwrap();
        fs::write(&first, b"").unwrap();
        let second = counter.artifact_path("beta2", "svg").unwrap();
        assert_eq!(counter.run_index().unwrap(), 1);
        assert!(second.ends_with("diagnostic_20250101_001_beta2.svg"));
    }

    #[test]
    fn largest_run_number_is_an_error_not_a_wrap() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("diagnostic_20250101_4294967295_beta1.svg"), b"").unwrap();
        let counter = RunCounter::new(dir.path(), jan_first());
        let err = counter.run_index().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn run_number_beyond_u32_is_not_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("diagnostic_20250101_003_beta1.svg"), b"").unwrap();
        fs::write(dir.path().join("diagnostic_20250101_99999999999_beta1.svg"), b"").unwrap();
        let counter = RunCounter::new(dir.path(), jan_first());
        assert!(counter.run_index().is_err());
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let counter = RunCounter::new("/nonexistent/diagnostics", jan_first());
        assert!(counter.run_index().is_err());
    }
}
