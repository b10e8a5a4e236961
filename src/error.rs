//! Error types of the crop recommendation pipeline.

use std::path::PathBuf;
use std::time::Duration;

use croprec_helpers::ClassifierError;
use thiserror::Error;

use crate::dataset::Feature;

/// Problems reading the training dataset. Always fatal for a training run.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset is missing required column '{0}'")]
    MissingColumn(String),

    #[error("row {row}, column '{column}': '{value}' is not a finite number")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row} has an empty label")]
    EmptyLabel { row: usize },

    #[error("dataset contains no rows")]
    Empty,
}

/// Which end of an admissible range a value fell outside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

/// A prediction request that cannot be answered. Recoverable: the caller
/// reports the message back to whoever sent the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(Feature),

    #[error("field '{0}' must be a number")]
    NotNumeric(Feature),

    #[error("{feature} must be between {min} and {max}, got {value}")]
    OutOfRange {
        feature: Feature,
        value: f64,
        min: f64,
        max: f64,
        violated: Bound,
    },
}

impl ValidationError {
    /// The field the error refers to, if any.
    pub fn feature(&self) -> Option<Feature> {
        match self {
            ValidationError::NotAnObject => None,
            ValidationError::MissingField(f) | ValidationError::NotNumeric(f) => Some(*f),
            ValidationError::OutOfRange { feature, .. } => Some(*feature),
        }
    }
}

/// The prediction service has no usable model. The service stays up and
/// every request fails with this until a bundle loads.
#[derive(Error, Debug)]
pub enum ModelNotLoadedError {
    #[error("no model bundle at {0}; train a model first")]
    Missing(PathBuf),

    #[error("model bundle could not be loaded: {0}")]
    Invalid(#[source] ArtifactError),

    #[error("loading the model bundle took longer than {0:?}")]
    TimedOut(Duration),
}

/// Errors from [`PredictionService`](crate::prediction::PredictionService).
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("model not loaded: {0}")]
    ModelNotLoaded(#[from] ModelNotLoadedError),

    #[error("prediction failed: {0}")]
    Model(#[from] ClassifierError),

    #[error("prediction failed: {0}")]
    Scaler(#[from] ScalerError),
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("invalid split: {0}")]
    InvalidSplit(String),

    #[error("{algorithm} failed to fit: {source}")]
    Fit {
        algorithm: &'static str,
        #[source]
        source: ClassifierError,
    },

    #[error(
        "{folds}-fold cross-validation needs {folds} samples of every class, \
         class {class} has {found}"
    )]
    NotEnoughSamples {
        class: usize,
        folds: usize,
        found: usize,
    },

    #[error("no candidate model could be trained")]
    NoViableCandidate,

    #[error(transparent)]
    Scaler(#[from] ScalerError),
}

/// Problems persisting or loading a [`ModelBundle`](crate::artifact::ModelBundle).
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("bundle I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bundle is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported bundle format version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("bundle checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch { recorded: String, computed: String },

    #[error("bundle was trained on feature order {found:?}, expected {expected:?}")]
    FeatureOrderMismatch {
        found: Vec<String>,
        expected: Vec<String>,
    },

    #[error("bundle is inconsistent: {0}")]
    Inconsistent(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScalerError {
    #[error("cannot fit a scaler on zero samples")]
    Empty,

    #[error("expected {expected} features, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("feature {0} contains non-finite values")]
    NonFinite(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Umbrella error of the library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("training error: {0}")]
    Training(#[from] TrainingError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
