//! # Model Bundle Loading
//!
//! The pre-trained artifact this engine consumes: the required feature list,
//! the z-scaling lookup table, the bundled predictor parameters, the
//! explainer's background reference matrix, and the deterministic seed, all
//! serialized as one human-readable TOML file.
//!
//! The bundle is loaded once at startup into an immutable value that is
//! passed explicitly into the pipeline; nothing here is ambient state.
//! Validation happens at load time so every later stage can assume a
//! structurally sound model.

use crate::survival::{ProportionalHazards, SurvivalError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// One entry of the scaling table: the training-time mean and standard
/// deviation of a feature. Features without an entry pass through unscaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScale {
    pub feature: String,
    pub mean: f64,
    pub std: f64,
}

/// The complete, self-contained model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Required feature names, in the exact column order the predictor expects.
    pub features: Vec<String>,
    /// Seed for the explainer's permutation sampling.
    pub seed: u64,
    /// Fixed scoring horizon, in days.
    pub horizon_days: f64,
    /// Per-feature scaling entries; at most one per feature.
    pub zscaler: Vec<FeatureScale>,
    /// The bundled survival predictor.
    pub predictor: ProportionalHazards,
    /// Background reference rows (normalized feature space) for the explainer.
    pub background: Array2<f64>,
}

/// All ways artifact loading, saving, or validation can fail.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("The model feature list is empty.")]
    EmptyFeatureList,
    #[error("Feature '{0}' appears more than once in the model feature list.")]
    DuplicateFeature(String),
    #[error(
        "Feature '{0}' has more than one scaling entry; each scaled feature must have exactly one (mean, std) pair."
    )]
    DuplicateScalerEntry(String),
    #[error("Scaling entry for '{0}' has a non-finite or zero standard deviation.")]
    InvalidScale(String),
    #[error(
        "The predictor carries {found} coefficients for {expected} model features; the two lists must align."
    )]
    CoefficientCountMismatch { expected: usize, found: usize },
    #[error(
        "The background matrix has {found} columns but the model expects {expected} features."
    )]
    BackgroundShapeMismatch { expected: usize, found: usize },
    #[error("The background matrix is empty; the explainer needs at least one reference row.")]
    EmptyBackground,
    #[error("The background matrix contains non-finite values.")]
    NonFiniteBackground,
    #[error("The scoring horizon must be a positive number of days, got {0}.")]
    InvalidHorizon(f64),
    #[error("Invalid predictor parameters: {0}")]
    Predictor(#[from] SurvivalError),
}

impl ModelBundle {
    /// Loads and validates a bundle from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let toml_string = fs::read_to_string(path)?;
        let bundle: ModelBundle = toml::from_str(&toml_string)?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Saves the bundle in human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        if self.features.is_empty() {
            return Err(ArtifactError::EmptyFeatureList);
        }
        let mut seen = HashSet::with_capacity(self.features.len());
        for feature in &self.features {
            if !seen.insert(feature.as_str()) {
                return Err(ArtifactError::DuplicateFeature(feature.clone()));
            }
        }

        let mut scaled = HashSet::with_capacity(self.zscaler.len());
        for entry in &self.zscaler {
            if !scaled.insert(entry.feature.as_str()) {
                return Err(ArtifactError::DuplicateScalerEntry(entry.feature.clone()));
            }
            if !entry.std.is_finite() || entry.std == 0.0 || !entry.mean.is_finite() {
                return Err(ArtifactError::InvalidScale(entry.feature.clone()));
            }
        }

        self.predictor.validate()?;
        if self.predictor.coefficients.len() != self.features.len() {
            return Err(ArtifactError::CoefficientCountMismatch {
                expected: self.features.len(),
                found: self.predictor.coefficients.len(),
            });
        }

        if self.background.nrows() == 0 {
            return Err(ArtifactError::EmptyBackground);
        }
        if self.background.ncols() != self.features.len() {
            return Err(ArtifactError::BackgroundShapeMismatch {
                expected: self.features.len(),
                found: self.background.ncols(),
            });
        }
        if self.background.iter().any(|v| !v.is_finite()) {
            return Err(ArtifactError::NonFiniteBackground);
        }

        if !self.horizon_days.is_finite() || self.horizon_days <= 0.0 {
            return Err(ArtifactError::InvalidHorizon(self.horizon_days));
        }
        Ok(())
    }
}
