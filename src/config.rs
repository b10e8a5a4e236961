//! Pipeline configuration, read from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use decision_tree::{MaxFeatures, TreeParams};
use linear_svm::SvmParams;
use logistic_regression::LogisticParams;
use random_forest::ForestParams;
use serde::{Deserialize, Serialize};

use crate::artifact::DEFAULT_BUNDLE_FILE;
use crate::dataset::LABEL_COLUMN;
use crate::error::ConfigError;
use crate::trainer::{Algorithm, Hyperparameters};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub split: SplitConfig,
    pub training: TrainingConfig,
    pub artifacts: ArtifactConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: PathBuf,
    pub label_column: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/Crop_recommendation.csv"),
            label_column: LABEL_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    /// Seeds the split, the folds and every randomised algorithm.
    pub seed: u64,
    pub stratify: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            stratify: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Candidates to compare, in the order they are trained.
    pub algorithms: Vec<Algorithm>,
    /// Folds of cross-validation per candidate; 0 disables it.
    pub cv_folds: usize,
    pub random_forest: ForestConfig,
    pub decision_tree: TreeConfig,
    pub naive_bayes: NaiveBayesConfig,
    pub logistic_regression: LogisticConfig,
    pub linear_svm: SvmConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            algorithms: Algorithm::ALL.to_vec(),
            cv_folds: 5,
            random_forest: ForestConfig::default(),
            decision_tree: TreeConfig::default(),
            naive_bayes: NaiveBayesConfig::default(),
            logistic_regression: LogisticConfig::default(),
            linear_svm: SvmConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// The configured candidates, in configuration order.
    pub fn hyperparameters(&self) -> Vec<Hyperparameters> {
        self.algorithms
            .iter()
            .map(|algorithm| self.hyperparameters_for(*algorithm))
            .collect()
    }

    pub fn hyperparameters_for(&self, algorithm: Algorithm) -> Hyperparameters {
        match algorithm {
            Algorithm::RandomForest => Hyperparameters::RandomForest(self.random_forest.params()),
            Algorithm::DecisionTree => Hyperparameters::DecisionTree(self.decision_tree.params()),
            Algorithm::NaiveBayes => Hyperparameters::NaiveBayes {
                var_smoothing: self.naive_bayes.var_smoothing,
            },
            Algorithm::LogisticRegression => {
                Hyperparameters::LogisticRegression(self.logistic_regression.params())
            }
            Algorithm::LinearSvm => Hyperparameters::LinearSvm(self.linear_svm.params()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub bootstrap: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
        }
    }
}

impl ForestConfig {
    pub fn params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            tree: TreeParams {
                max_depth: self.max_depth,
                min_samples_split: self.min_samples_split,
                min_samples_leaf: self.min_samples_leaf,
                max_features: self.max_features,
            },
            bootstrap: self.bootstrap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            max_features: MaxFeatures::All,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl TreeConfig {
    pub fn params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaiveBayesConfig {
    pub var_smoothing: f64,
}

impl Default for NaiveBayesConfig {
    fn default() -> Self {
        Self {
            var_smoothing: 1e-9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub l2: f64,
    pub tol: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        let p = LogisticParams::<f64>::default();
        Self {
            learning_rate: p.learning_rate,
            max_iter: p.max_iter,
            l2: p.l2,
            tol: p.tol,
        }
    }
}

impl LogisticConfig {
    pub fn params(&self) -> LogisticParams<f64> {
        LogisticParams {
            learning_rate: self.learning_rate,
            max_iter: self.max_iter,
            l2: self.l2,
            tol: self.tol,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    pub learning_rate: f64,
    pub lambda: f64,
    pub epochs: usize,
}

impl Default for SvmConfig {
    fn default() -> Self {
        let p = SvmParams::<f64>::default();
        Self {
            learning_rate: p.learning_rate,
            lambda: p.lambda,
            epochs: p.epochs,
        }
    }
}

impl SvmConfig {
    pub fn params(&self) -> SvmParams<f64> {
        SvmParams {
            lambda: self.lambda,
            learning_rate: self.learning_rate,
            epochs: self.epochs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub bundle_path: PathBuf,
    pub load_timeout_ms: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            bundle_path: PathBuf::from("models").join(DEFAULT_BUNDLE_FILE),
            load_timeout_ms: 5000,
        }
    }
}

impl ArtifactConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values no run could succeed with. Algorithm-specific limits are
    /// left to the algorithms, which report them per candidate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.split.test_fraction;
        if !(t > 0.0 && t < 1.0) {
            return Err(invalid(
                "split.test_fraction",
                format!("must lie strictly between 0 and 1, got {}", t),
            ));
        }
        if self.training.algorithms.is_empty() {
            return Err(invalid("training.algorithms", "at least one algorithm is required"));
        }
        if self.training.cv_folds == 1 {
            return Err(invalid(
                "training.cv_folds",
                "use 0 to disable cross-validation or at least 2 folds",
            ));
        }
        if self.training.random_forest.n_estimators == 0 {
            return Err(invalid(
                "training.random_forest.n_estimators",
                "a forest needs at least one tree",
            ));
        }
        if self.dataset.label_column.is_empty() {
            return Err(invalid("dataset.label_column", "must not be empty"));
        }
        if self.artifacts.load_timeout_ms == 0 {
            return Err(invalid("artifacts.load_timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.split.test_fraction, 0.2);
        assert_eq!(config.split.seed, 42);
        assert!(config.split.stratify);
        assert_eq!(config.training.cv_folds, 5);
        assert_eq!(config.training.random_forest.n_estimators, 100);
        assert_eq!(config.training.naive_bayes.var_smoothing, 1e-9);
        assert_eq!(config.training.logistic_regression.max_iter, 1000);
        assert_eq!(config.artifacts.load_timeout(), Duration::from_secs(5));
        assert_eq!(config.training.hyperparameters().len(), 5);
    }

    #[test]
    fn test_partial_config() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [dataset]
            path = "crops.csv"

            [split]
            seed = 7

            [training]
            algorithms = ["random_forest", "naive_bayes"]
            cv_folds = 0

            [training.random_forest]
            n_estimators = 12
            max_features = "log2"
            max_depth = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.dataset.path, PathBuf::from("crops.csv"));
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.split.test_fraction, 0.2);
        let hp = config.training.hyperparameters();
        assert_eq!(hp.len(), 2);
        match &hp[0] {
            Hyperparameters::RandomForest(p) => {
                assert_eq!(p.n_estimators, 12);
                assert_eq!(p.tree.max_features, MaxFeatures::Log2);
                assert_eq!(p.tree.max_depth, Some(8));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(hp[1].algorithm(), Algorithm::NaiveBayes);
    }

    #[test]
    fn test_validation_errors() {
        let err = PipelineConfig::from_toml_str("[split]\ntest_fraction = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "split.test_fraction",
                ..
            }
        ));

        let err = PipelineConfig::from_toml_str("[training]\nalgorithms = []").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "training.algorithms",
                ..
            }
        ));

        let err = PipelineConfig::from_toml_str("[training]\ncv_folds = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_unknown_algorithm_is_parse_error() {
        let err = PipelineConfig::from_toml_str("[training]\nalgorithms = [\"knn\"]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_toml_file("/no/such/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
