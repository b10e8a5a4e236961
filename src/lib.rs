//! Crop recommendation from soil and climate readings.
//!
//! The library covers the whole lifecycle of the model: loading the dataset,
//! comparing candidate classifiers, persisting the winner together with its
//! scaler, and answering validated prediction requests.

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod pipeline;
pub mod prediction;
pub mod scaler;
pub mod trainer;

pub use artifact::ModelBundle;
pub use config::PipelineConfig;
pub use croprec_helpers::{Classifier, ClassifierError, ModelDescriptor};
pub use dataset::{Dataset, DatasetLoader, Feature, FeatureVector, LabelEncoder, Sample};
pub use error::{Error, Result};
pub use evaluator::{EvaluationReport, ModelEvaluator};
pub use pipeline::{PipelineOutcome, TrainingPipeline};
pub use prediction::{Prediction, PredictionResponse, PredictionService};
pub use scaler::{FeatureScaler, ScalerArtifact};
pub use trainer::{Algorithm, Hyperparameters, ModelTrainer, TrainedClassifier, TrainedModel};
