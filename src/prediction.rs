//! Inference: request validation and crop prediction against a loaded bundle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use croprec_helpers::Classifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifact::ModelBundle;
use crate::dataset::{Feature, FeatureVector};
use crate::error::{Bound, ModelNotLoadedError, PredictionError, ValidationError};

/// One row of the validation table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldCheck {
    pub feature: Feature,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldCheck {
    /// The bound `value` violates, if any. NaN violates both; it is reported
    /// against the lower one.
    pub fn violation(&self) -> Option<Bound> {
        if !(self.value >= self.min) {
            Some(Bound::Lower)
        } else if !(self.value <= self.max) {
            Some(Bound::Upper)
        } else {
            None
        }
    }
}

/// `(feature, value, range)` for every field of `input`, in canonical order.
pub fn validation_table(input: &FeatureVector) -> [FieldCheck; 7] {
    Feature::ALL.map(|feature| {
        let (min, max) = feature.range();
        FieldCheck {
            feature,
            value: input.get(feature),
            min,
            max,
        }
    })
}

/// Checks every field against its admissible range and reports the first
/// violation in canonical order.
pub fn validate(input: &FeatureVector) -> Result<(), ValidationError> {
    for check in validation_table(input) {
        if let Some(violated) = check.violation() {
            return Err(ValidationError::OutOfRange {
                feature: check.feature,
                value: check.value,
                min: check.min,
                max: check.max,
                violated,
            });
        }
    }
    Ok(())
}

fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extracts a [`FeatureVector`] from a request body. Numbers and numeric
/// strings are accepted; unknown keys are ignored.
pub fn parse_request(body: &Value) -> Result<FeatureVector, ValidationError> {
    let object = body.as_object().ok_or(ValidationError::NotAnObject)?;
    let mut vector = FeatureVector::default();
    for feature in Feature::ALL {
        let raw = object
            .get(feature.key())
            .ok_or(ValidationError::MissingField(feature))?;
        let value = coerce(raw).ok_or(ValidationError::NotNumeric(feature))?;
        vector.set(feature, value);
    }
    Ok(vector)
}

/// Result of [`PredictionService::predict`].
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub crop: String,
    /// Crop name to probability, present when the model can estimate them.
    pub probabilities: Option<BTreeMap<String, f64>>,
}

/// Response body handed back to the web collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub input_data: FeatureVector,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub probabilities: Option<BTreeMap<String, f64>>,
}

/// `{"error": message}` body for a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&PredictionError> for ErrorBody {
    fn from(err: &PredictionError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Validates requests and answers them with the current model bundle.
///
/// The bundle is read lazily on first use and then shared read-only by every
/// caller. A failed load leaves the service without a model; the next request
/// tries again, so a service started before the first training run recovers
/// once a bundle appears. [`reload`](Self::reload) swaps in a newer bundle.
pub struct PredictionService {
    bundle_path: PathBuf,
    load_timeout: Duration,
    bundle: RwLock<Option<Arc<ModelBundle>>>,
}

impl PredictionService {
    pub fn new(bundle_path: impl Into<PathBuf>, load_timeout: Duration) -> Self {
        Self {
            bundle_path: bundle_path.into(),
            load_timeout,
            bundle: RwLock::new(None),
        }
    }

    /// A service around an already loaded bundle.
    pub fn from_bundle(bundle: ModelBundle) -> Self {
        Self {
            bundle_path: PathBuf::new(),
            load_timeout: Duration::ZERO,
            bundle: RwLock::new(Some(Arc::new(bundle))),
        }
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    pub fn is_loaded(&self) -> bool {
        self.bundle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The shared bundle, loading it if no load has succeeded yet.
    pub fn bundle(&self) -> Result<Arc<ModelBundle>, ModelNotLoadedError> {
        if let Some(bundle) = self
            .bundle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(bundle));
        }

        let mut slot = self.bundle.write().unwrap_or_else(PoisonError::into_inner);
        // another caller may have loaded it while we waited for the lock
        if let Some(bundle) = slot.as_ref() {
            return Ok(Arc::clone(bundle));
        }
        let bundle = Arc::new(self.load()?);
        *slot = Some(Arc::clone(&bundle));
        Ok(bundle)
    }

    /// Loads the bundle from disk again and replaces the current one. On
    /// failure the current bundle stays in place.
    pub fn reload(&self) -> Result<Arc<ModelBundle>, ModelNotLoadedError> {
        let bundle = Arc::new(self.load()?);
        *self.bundle.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&bundle));
        Ok(bundle)
    }

    /// Replaces the current bundle with one trained in-process.
    pub fn replace(&self, bundle: ModelBundle) {
        *self.bundle.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(bundle));
    }

    fn load(&self) -> Result<ModelBundle, ModelNotLoadedError> {
        match ModelBundle::load_with_timeout(&self.bundle_path, self.load_timeout) {
            Ok(bundle) => {
                info!(
                    path = %self.bundle_path.display(),
                    run_id = %bundle.run_id,
                    algorithm = %bundle.model().algorithm,
                    "model bundle loaded"
                );
                Ok(bundle)
            }
            Err(err) => {
                warn!(path = %self.bundle_path.display(), error = %err, "model bundle unavailable");
                Err(err)
            }
        }
    }

    /// Validates `input` and predicts its crop.
    ///
    /// Validation happens before the model is touched, so invalid requests are
    /// rejected even when no model is loaded.
    pub fn predict(&self, input: &FeatureVector) -> Result<Prediction, PredictionError> {
        validate(input)?;
        let bundle = self.bundle()?;
        let model = bundle.model();
        let scaled = bundle.scaler().transform_vector(input)?;

        let class = model.classifier.predict(scaled.view())?;
        let crop = bundle
            .classes()
            .get(class)
            .cloned()
            .ok_or(croprec_helpers::ClassifierError::LabelOutOfRange {
                label: class,
                n_classes: bundle.classes().len(),
            })?;

        let probabilities = if model.classifier.descriptor().supports_probabilities {
            let proba = model.classifier.predict_proba(scaled.view())?;
            Some(
                bundle
                    .classes()
                    .iter()
                    .cloned()
                    .zip(proba.iter().copied())
                    .collect(),
            )
        } else {
            None
        };

        debug!(%crop, "predicted");
        Ok(Prediction {
            crop,
            probabilities,
        })
    }

    /// JSON in, JSON out: parses the request body, predicts, and echoes the
    /// validated input back.
    pub fn predict_json(&self, body: &Value) -> Result<PredictionResponse, PredictionError> {
        let input = parse_request(body)?;
        let prediction = self.predict(&input)?;
        Ok(PredictionResponse {
            prediction: prediction.crop,
            input_data: input,
            probabilities: prediction.probabilities,
        })
    }
}
