//! End-to-end training run.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::artifact::{new_run_id, ModelBundle};
use crate::config::PipelineConfig;
use crate::dataset::{canonical_feature_order, Dataset, DatasetLoader, LabelEncoder};
use crate::error::{DatasetError, Result, TrainingError};
use crate::evaluator::{EvaluationReport, ModelEvaluator};
use crate::scaler::{FeatureScaler, ScalerArtifact};
use crate::trainer::{self, best_index, select_best, Candidate, ModelTrainer, Split};

/// What a completed [`TrainingPipeline::run`] produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub bundle: ModelBundle,
    pub bundle_path: PathBuf,
    pub report: EvaluationReport,
}

struct Comparison {
    candidates: Vec<Candidate>,
    scaler: ScalerArtifact,
    report: EvaluationReport,
}

/// Load, split, scale, compare, select and (for [`run`](Self::run)) persist.
pub struct TrainingPipeline {
    config: PipelineConfig,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Trains on the configured dataset and saves the winning bundle.
    pub fn run(&self) -> Result<PipelineOutcome> {
        let dataset = self.load_dataset()?;
        self.run_on(&dataset)
    }

    /// Same comparison and report as [`run`](Self::run), without writing a bundle.
    pub fn evaluate(&self) -> Result<EvaluationReport> {
        let dataset = self.load_dataset()?;
        Ok(self.compare(&dataset)?.report)
    }

    pub fn run_on(&self, dataset: &Dataset) -> Result<PipelineOutcome> {
        let Comparison {
            candidates,
            scaler,
            report,
        } = self.compare(dataset)?;
        let model = select_best(candidates)?;
        info!(
            algorithm = %model.algorithm,
            accuracy = model.metrics.accuracy,
            "selected model"
        );

        let bundle = ModelBundle::new(model, scaler, new_run_id(self.config.split.seed))?;
        let bundle_path = self.config.artifacts.bundle_path.clone();
        bundle.save(&bundle_path)?;
        Ok(PipelineOutcome {
            bundle,
            bundle_path,
            report,
        })
    }

    pub fn evaluate_on(&self, dataset: &Dataset) -> Result<EvaluationReport> {
        Ok(self.compare(dataset)?.report)
    }

    fn load_dataset(&self) -> Result<Dataset> {
        let loader = DatasetLoader::with_label_column(self.config.dataset.label_column.clone());
        let dataset = loader.load(&self.config.dataset.path)?;
        info!(
            path = %self.config.dataset.path.display(),
            samples = dataset.len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    fn compare(&self, dataset: &Dataset) -> Result<Comparison> {
        if dataset.is_empty() {
            return Err(DatasetError::Empty.into());
        }
        for (crop, count) in dataset.class_distribution() {
            info!(%crop, count, "class distribution");
        }

        let encoder = LabelEncoder::fit(&dataset.labels);
        let labels = encoder
            .encode_all(&dataset.labels)
            .ok_or_else(|| TrainingError::InvalidSplit("unencodable label".into()))?;
        let split_config = &self.config.split;
        let Split { train, test } = trainer::split(
            dataset.features.view(),
            &labels,
            split_config.test_fraction,
            split_config.seed,
            split_config.stratify,
        )?;
        info!(train = train.len(), test = test.len(), "split dataset");

        // fitted on the training partition only
        let scaler = FeatureScaler::fit(train.features.view()).map_err(TrainingError::from)?;
        let scaled = Split {
            train: trainer::Partition {
                features: scaler.transform(train.features.view()).map_err(TrainingError::from)?,
                ..train
            },
            test: trainer::Partition {
                features: scaler.transform(test.features.view()).map_err(TrainingError::from)?,
                ..test
            },
        };

        let trainer = ModelTrainer::new(
            self.config.training.hyperparameters(),
            split_config.seed,
            self.config.training.cv_folds,
        );
        let feature_order = canonical_feature_order();
        let candidates = trainer.compare(&scaled, encoder.classes(), &feature_order);
        if candidates.len() < trainer.candidates().len() {
            warn!(
                trained = candidates.len(),
                configured = trainer.candidates().len(),
                "some candidates were excluded"
            );
        }

        let best = best_index(&candidates).ok_or(TrainingError::NoViableCandidate)?;
        let report = ModelEvaluator::new(encoder.classes(), &scaled.test.labels)
            .report(&candidates, best)
            .ok_or(TrainingError::NoViableCandidate)?;

        Ok(Comparison {
            candidates,
            scaler,
            report,
        })
    }
}
