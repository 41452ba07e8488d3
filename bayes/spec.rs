//! # Model Specification
//!
//! Maps a requested family and column selection onto one of three fixed
//! generative templates. Each template is plain data: the coefficient prior,
//! the optional positive nuisance parameter and its prior. Everything
//! downstream dispatches on `ModelFamily` with `match`.

use crate::dataset::Schema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Standard deviation of the Normal(0, 10) prior shared by every coefficient.
pub const COEFFICIENT_PRIOR_SD: f64 = 10.0;
/// Scale of the HalfCauchy(0, 5) prior on `sigma` and `alpha`.
pub const NUISANCE_PRIOR_SCALE: f64 = 5.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("family: unknown model family '{0}'; expected one of linear, logistic, survival")]
    UnknownFamily(String),
    #[error("response: column '{0}' was not found in the dataset")]
    ResponseNotFound(String),
    #[error("predictors: column '{0}' was not found in the dataset")]
    PredictorNotFound(String),
    #[error("predictors: the response column '{0}' cannot also be a predictor")]
    ResponseInPredictors(String),
    #[error("predictors: column '{0}' is listed more than once")]
    DuplicatePredictor(String),
    #[error("predictors: at least one predictor column is required")]
    NoPredictors,
}

/// The parametric form of the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    /// y ~ Normal(Xβ, σ)
    Linear,
    /// y ~ Bernoulli(logit⁻¹(Xβ))
    Logistic,
    /// y ~ Weibull(α, exp(Xβ)), every observation an event.
    Survival,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    Normal { mean: f64, sd: f64 },
    HalfCauchy { location: f64, scale: f64 },
}

/// A positive, family-specific parameter sampled alongside the coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NuisanceParameter {
    pub name: &'static str,
    pub prior: Prior,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [Self::Linear, Self::Logistic, Self::Survival];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Logistic => "logistic",
            Self::Survival => "survival",
        }
    }

    pub fn coefficient_prior(self) -> Prior {
        Prior::Normal {
            mean: 0.0,
            sd: COEFFICIENT_PRIOR_SD,
        }
    }

    pub fn nuisance(self) -> Option<NuisanceParameter> {
        let prior = Prior::HalfCauchy {
            location: 0.0,
            scale: NUISANCE_PRIOR_SCALE,
        };
        match self {
            Self::Linear => Some(NuisanceParameter {
                name: "sigma",
                prior,
            }),
            Self::Logistic => None,
            Self::Survival => Some(NuisanceParameter {
                name: "alpha",
                prior,
            }),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ValidationError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "logistic" => Ok(Self::Logistic),
            "survival" => Ok(Self::Survival),
            _ => Err(ValidationError::UnknownFamily(token.to_string())),
        }
    }
}

/// A validated model definition. Only constructible through `ModelSpecBuilder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    family: ModelFamily,
    response: String,
    predictors: Vec<String>,
}

impl ModelSpec {
    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }

    /// Number of sampled parameters: one coefficient per predictor plus the nuisance, if any.
    pub fn parameter_count(&self) -> usize {
        self.predictors.len() + usize::from(self.family.nuisance().is_some())
    }

    /// `beta1..betaK`, followed by `sigma` (linear) or `alpha` (survival).
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = (1..=self.predictors.len())
            .map(|i| format!("beta{i}"))
            .collect();
        if let Some(nuisance) = self.family.nuisance() {
            names.push(nuisance.name.to_string());
        }
        names
    }
}

pub struct ModelSpecBuilder {
    family: String,
    response: String,
    predictors: Vec<String>,
}

impl ModelSpecBuilder {
    pub fn new(
        family: impl Into<String>,
        response: impl Into<String>,
        predictors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            family: family.into(),
            response: response.into(),
            predictors: predictors.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates the request against `schema`; fields are checked in the order
    /// family, response, predictors.
    pub fn build(self, schema: &Schema) -> Result<ModelSpec, ValidationError> {
        let family: ModelFamily = self.family.parse()?;

        if !schema.contains(&self.response) {
            return Err(ValidationError::ResponseNotFound(self.response));
        }
        if self.predictors.is_empty() {
            return Err(ValidationError::NoPredictors);
        }

        let mut seen = HashSet::with_capacity(self.predictors.len());
        for name in &self.predictors {
            if *name == self.response {
                return Err(ValidationError::ResponseInPredictors(name.clone()));
            }
            if !schema.contains(name) {
                return Err(ValidationError::PredictorNotFound(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(ValidationError::DuplicatePredictor(name.clone()));
            }
        }

        log::debug!(
            "Model spec: {} response='{}' predictors={:?}",
            family,
            self.response,
            self.predictors
        );

        Ok(ModelSpec {
            family,
            response: self.response,
            predictors: self.predictors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnKind, ColumnSchema};

    fn schema(names: &[&str]) -> Schema {
        Schema::new(
            names
                .iter()
                .map(|n| ColumnSchema {
                    name: n.to_string(),
                    kind: ColumnKind::Numeric,
                })
                .collect(),
        )
    }

    #[test]
    fn parameter_names_follow_family_template() {
        let schema = schema(&["y", "age", "score"]);
        let expected = [
            (ModelFamily::Linear, vec!["beta1", "beta2", "sigma"]),
            (ModelFamily::Logistic, vec!["beta1", "beta2"]),
            (ModelFamily::Survival, vec!["beta1", "beta2", "alpha"]),
        ];
        for (family, names) in expected {
            let spec = ModelSpecBuilder::new(family.as_str(), "y", ["age", "score"])
                .build(&schema)
                .unwrap();
            assert_eq!(spec.parameter_names(), names, "family {family}");
            assert_eq!(spec.parameter_count(), names.len());
        }
    }

    #[test]
    fn family_tokens_are_case_insensitive() {
        assert_eq!("Logistic".parse::<ModelFamily>(), Ok(ModelFamily::Logistic));
        assert_eq!(" SURVIVAL ".parse::<ModelFamily>(), Ok(ModelFamily::Survival));
        assert_eq!(
            "poisson".parse::<ModelFamily>(),
            Err(ValidationError::UnknownFamily("poisson".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_columns() {
        let schema = schema(&["y", "age"]);
        assert_eq!(
            ModelSpecBuilder::new("linear", "outcome", ["age"]).build(&schema),
            Err(ValidationError::ResponseNotFound("outcome".to_string()))
        );
        assert_eq!(
            ModelSpecBuilder::new("linear", "y", ["age", "bmi"]).build(&schema),
            Err(ValidationError::PredictorNotFound("bmi".to_string()))
        );
    }

    #[test]
    fn rejects_response_among_predictors() {
        let schema = schema(&["y", "age"]);
        assert_eq!(
            ModelSpecBuilder::new("logistic", "y", ["age", "y"]).build(&schema),
            Err(ValidationError::ResponseInPredictors("y".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_and_empty_predictors() {
        let schema = schema(&["y", "age"]);
        assert_eq!(
            ModelSpecBuilder::new("linear", "y", ["age", "age"]).build(&schema),
            Err(ValidationError::DuplicatePredictor("age".to_string()))
        );
        assert_eq!(
            ModelSpecBuilder::new("linear", "y", Vec::<String>::new()).build(&schema),
            Err(ValidationError::NoPredictors)
        );
    }

    #[test]
    fn unknown_family_is_reported_before_columns() {
        let schema = schema(&["y"]);
        assert_eq!(
            ModelSpecBuilder::new("gamma", "nope", ["also_nope"]).build(&schema),
            Err(ValidationError::UnknownFamily("gamma".to_string()))
        );
    }

    #[test]
    fn priors_are_fixed_per_family() {
        for family in ModelFamily::ALL {
            assert_eq!(
                family.coefficient_prior(),
                Prior::Normal { mean: 0.0, sd: 10.0 }
            );
        }
        assert!(ModelFamily::Logistic.nuisance().is_none());
        let alpha = ModelFamily::Survival.nuisance().unwrap();
        assert_eq!(alpha.name, "alpha");
        assert_eq!(
            alpha.prior,
            Prior::HalfCauchy {
                location: 0.0,
                scale: 5.0
            }
        );
    }
}
