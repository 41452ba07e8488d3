//! Run configuration, built from CLI flags or read from a TOML file.

use crate::sampler::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("'{field}' must be at least 1, got {value}.")]
    CountTooSmall { field: &'static str, value: usize },
}

fn default_chains() -> usize {
    4
}

fn default_iterations() -> usize {
    2000
}

fn default_warmup() -> usize {
    1000
}

fn default_target_accept() -> f64 {
    0.8
}

/// Everything a pipeline run needs besides the data itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Family token: `linear`, `logistic` or `survival` (case-insensitive).
    pub family: String,
    pub response: String,
    pub predictors: Vec<String>,
    #[serde(default = "default_chains")]
    pub chains: usize,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_warmup")]
    pub warmup: usize,
    #[serde(default = "default_target_accept")]
    pub target_accept: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub output_directory: Option<PathBuf>,
    /// Parameters to plot; all of them when absent.
    #[serde(default)]
    pub parameter_subset: Option<Vec<String>>,
}

impl PipelineConfig {
    pub fn new(
        family: impl Into<String>,
        response: impl Into<String>,
        predictors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            family: family.into(),
            response: response.into(),
            predictors: predictors.into_iter().map(Into::into).collect(),
            chains: default_chains(),
            iterations: default_iterations(),
            warmup: default_warmup(),
            target_accept: default_target_accept(),
            seed: None,
            output_directory: None,
            parameter_subset: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("chains", self.chains), ("iterations", self.iterations)] {
            if value < 1 {
                return Err(ConfigError::CountTooSmall { field, value });
            }
        }
        Ok(())
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            chains: self.chains,
            iterations: self.iterations,
            warmup: self.warmup,
            target_accept: self.target_accept,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn minimal_toml_gets_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "family = \"Logistic\"\nresponse = \"outcome\"\npredictors = [\"age\", \"weight\"]"
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.family, "Logistic");
        assert_eq!(config.predictors, vec!["age", "weight"]);
        assert_eq!(config.chains, 4);
        assert_eq!(config.iterations, 2000);
        assert_eq!(config.warmup, 1000);
        assert_eq!(config.seed, None);
        assert_eq!(config.output_directory, None);
        assert_eq!(config.parameter_subset, None);
    }

    #[test]
    fn toml_round_trip_preserves_every_field() {
        let mut config = PipelineConfig::new("survival", "survival_time", ["age"]);
        config.seed = Some(7);
        config.output_directory = Some(PathBuf::from("plots"));
        config.parameter_subset = Some(vec!["alpha".to_string()]);
        let text = config.to_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn zero_chains_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "family = \"linear\"\nresponse = \"y\"\npredictors = [\"x\"]\nchains = 0"
        )
        .unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CountTooSmall {
                field: "chains",
                value: 0
            }
        ));
    }

    #[test]
    fn missing_required_field_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "family = \"linear\"\nresponse = \"y\"").unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn sampler_config_carries_counts_and_seed() {
        let mut config = PipelineConfig::new("linear", "y", ["x"]);
        config.chains = 2;
        config.seed = Some(99);
        let sampler = config.sampler_config();
        assert_eq!(sampler.chains, 2);
        assert_eq!(sampler.seed, Some(99));
        assert_eq!(sampler.iterations, 2000);
    }
}
