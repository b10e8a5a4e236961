//! Splitting, fitting and choosing between candidate classifiers.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use croprec_helpers::{Classifier, ClassifierError, ModelDescriptor};
use decision_tree::{DecisionTree, TreeParams};
use linear_svm::{LinearSvm, SvmParams};
use logistic_regression::{LogisticParams, LogisticRegression};
use naive_bayes::GaussianNb;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use random_forest::{ForestParams, RandomForest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TrainingError;
use crate::evaluator::{self, ClassificationMetrics, CrossValidation};

/// The classifier families the pipeline can train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RandomForest,
    DecisionTree,
    NaiveBayes,
    LogisticRegression,
    LinearSvm,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::RandomForest,
        Algorithm::DecisionTree,
        Algorithm::NaiveBayes,
        Algorithm::LogisticRegression,
        Algorithm::LinearSvm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::RandomForest => "random_forest",
            Algorithm::DecisionTree => "decision_tree",
            Algorithm::NaiveBayes => "naive_bayes",
            Algorithm::LogisticRegression => "logistic_regression",
            Algorithm::LinearSvm => "linear_svm",
        }
    }

    /// Last tie-breaker of [`select_best`]; lower wins.
    pub fn priority(self) -> u8 {
        match self {
            Algorithm::RandomForest => 0,
            Algorithm::DecisionTree => 1,
            Algorithm::NaiveBayes => 2,
            Algorithm::LinearSvm => 3,
            Algorithm::LogisticRegression => 4,
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An algorithm together with the settings to fit it with.
#[derive(Debug, Clone, PartialEq)]
pub enum Hyperparameters {
    RandomForest(ForestParams),
    DecisionTree(TreeParams),
    NaiveBayes { var_smoothing: f64 },
    LogisticRegression(LogisticParams<f64>),
    LinearSvm(SvmParams<f64>),
}

impl Hyperparameters {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Hyperparameters::RandomForest(_) => Algorithm::RandomForest,
            Hyperparameters::DecisionTree(_) => Algorithm::DecisionTree,
            Hyperparameters::NaiveBayes { .. } => Algorithm::NaiveBayes,
            Hyperparameters::LogisticRegression(_) => Algorithm::LogisticRegression,
            Hyperparameters::LinearSvm(_) => Algorithm::LinearSvm,
        }
    }

    /// Fits a fresh classifier. `seed` drives every random choice the
    /// algorithm makes.
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<TrainedClassifier, ClassifierError> {
        let mut model = match self {
            Hyperparameters::RandomForest(p) => {
                TrainedClassifier::RandomForest(RandomForest::new(p.clone(), seed))
            }
            Hyperparameters::DecisionTree(p) => {
                TrainedClassifier::DecisionTree(DecisionTree::new(p.clone(), seed))
            }
            Hyperparameters::NaiveBayes { var_smoothing } => {
                TrainedClassifier::NaiveBayes(GaussianNb::new(*var_smoothing))
            }
            Hyperparameters::LogisticRegression(p) => {
                TrainedClassifier::LogisticRegression(LogisticRegression::new(p.clone()))
            }
            Hyperparameters::LinearSvm(p) => {
                TrainedClassifier::LinearSvm(LinearSvm::new(p.clone(), seed))
            }
        };
        model.fit(x, y, n_classes)?;
        Ok(model)
    }
}

/// A classifier of any supported family. A closed enum rather than a trait
/// object so that it can be persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "state", rename_all = "snake_case")]
pub enum TrainedClassifier {
    RandomForest(RandomForest<f64>),
    DecisionTree(DecisionTree<f64>),
    NaiveBayes(GaussianNb<f64>),
    LogisticRegression(LogisticRegression<f64>),
    LinearSvm(LinearSvm<f64>),
}

impl TrainedClassifier {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            TrainedClassifier::RandomForest(_) => Algorithm::RandomForest,
            TrainedClassifier::DecisionTree(_) => Algorithm::DecisionTree,
            TrainedClassifier::NaiveBayes(_) => Algorithm::NaiveBayes,
            TrainedClassifier::LogisticRegression(_) => Algorithm::LogisticRegression,
            TrainedClassifier::LinearSvm(_) => Algorithm::LinearSvm,
        }
    }

    fn inner(&self) -> &dyn Classifier<f64> {
        match self {
            TrainedClassifier::RandomForest(m) => m,
            TrainedClassifier::DecisionTree(m) => m,
            TrainedClassifier::NaiveBayes(m) => m,
            TrainedClassifier::LogisticRegression(m) => m,
            TrainedClassifier::LinearSvm(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier<f64> {
        match self {
            TrainedClassifier::RandomForest(m) => m,
            TrainedClassifier::DecisionTree(m) => m,
            TrainedClassifier::NaiveBayes(m) => m,
            TrainedClassifier::LogisticRegression(m) => m,
            TrainedClassifier::LinearSvm(m) => m,
        }
    }
}

impl Classifier<f64> for TrainedClassifier {
    fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<(), ClassifierError> {
        self.inner_mut().fit(x, y, n_classes)
    }

    fn predict(&self, features: ArrayView1<f64>) -> Result<usize, ClassifierError> {
        self.inner().predict(features)
    }

    fn descriptor(&self) -> ModelDescriptor {
        self.inner().descriptor()
    }

    fn predict_proba(&self, features: ArrayView1<f64>) -> Result<Array1<f64>, ClassifierError> {
        self.inner().predict_proba(features)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        self.inner().feature_importances()
    }

    fn predict_many(&self, x: ArrayView2<f64>) -> Result<Vec<usize>, ClassifierError> {
        match self {
            TrainedClassifier::RandomForest(forest) => random_forest::predict_parallel(forest, x),
            other => other.inner().predict_many(x),
        }
    }
}

/// One side of a train/test split.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub features: Array2<f64>,
    pub labels: Vec<usize>,
    /// Row of each sample in the dataset the split was drawn from.
    pub indices: Vec<usize>,
}

impl Partition {
    fn gather(features: ArrayView2<f64>, labels: &[usize], indices: Vec<usize>) -> Self {
        Self {
            features: features.select(Axis(0), &indices),
            labels: indices.iter().map(|&i| labels[i]).collect(),
            indices,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Partition,
    pub test: Partition,
}

/// Splits the rows into a training and a test partition.
///
/// With `stratify`, every class contributes `round(n_c * test_fraction)` of its
/// samples to the test partition, but never all of them. Otherwise the rows
/// are shuffled globally and `round(n * test_fraction)` go to test. The same
/// seed always yields the same partition.
pub fn split(
    features: ArrayView2<f64>,
    labels: &[usize],
    test_fraction: f64,
    seed: u64,
    stratify: bool,
) -> Result<Split, TrainingError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(TrainingError::InvalidSplit(format!(
            "test_fraction must lie strictly between 0 and 1, got {}",
            test_fraction
        )));
    }
    if features.nrows() != labels.len() {
        return Err(TrainingError::InvalidSplit(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    if stratify {
        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(i);
        }
        for members in by_class.values_mut() {
            members.shuffle(&mut rng);
            let wanted = (members.len() as f64 * test_fraction).round() as usize;
            let n_test = wanted.min(members.len() - 1);
            test.extend_from_slice(&members[..n_test]);
            train.extend_from_slice(&members[n_test..]);
        }
        train.shuffle(&mut rng);
        test.shuffle(&mut rng);
    } else {
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.shuffle(&mut rng);
        let n_test = (labels.len() as f64 * test_fraction).round() as usize;
        test = order.split_off(labels.len() - n_test.min(labels.len()));
        train = order;
    }

    if train.is_empty() || test.is_empty() {
        return Err(TrainingError::InvalidSplit(format!(
            "{} samples leave an empty partition at test_fraction {}",
            labels.len(),
            test_fraction
        )));
    }

    Ok(Split {
        train: Partition::gather(features, labels, train),
        test: Partition::gather(features, labels, test),
    })
}

/// A fitted classifier with everything needed to interpret and judge it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub algorithm: Algorithm,
    pub classifier: TrainedClassifier,
    pub feature_order: Vec<String>,
    pub classes: Vec<String>,
    /// Scores on the held-out test partition.
    pub metrics: ClassificationMetrics,
    pub cross_validation: Option<CrossValidation>,
}

/// A model produced by [`ModelTrainer::compare`], with its test predictions.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: TrainedModel,
    pub test_predictions: Vec<usize>,
}

pub struct ModelTrainer {
    candidates: Vec<Hyperparameters>,
    seed: u64,
    cv_folds: usize,
}

impl ModelTrainer {
    /// `cv_folds` below 2 disables cross-validation.
    pub fn new(candidates: Vec<Hyperparameters>, seed: u64, cv_folds: usize) -> Self {
        Self {
            candidates,
            seed,
            cv_folds,
        }
    }

    pub fn candidates(&self) -> &[Hyperparameters] {
        &self.candidates
    }

    pub fn train(
        &self,
        x: ArrayView2<f64>,
        y: &[usize],
        n_classes: usize,
        hyperparameters: &Hyperparameters,
    ) -> Result<TrainedClassifier, TrainingError> {
        let algorithm = hyperparameters.algorithm();
        debug!(%algorithm, samples = x.nrows(), "fitting");
        hyperparameters
            .fit(x, y, n_classes, self.seed)
            .map_err(|source| TrainingError::Fit {
                algorithm: algorithm.name(),
                source,
            })
    }

    /// Fits every configured algorithm on the training partition and scores it
    /// on the test partition. Algorithms that fail to fit are logged and left
    /// out; the others still come back.
    pub fn compare(
        &self,
        split: &Split,
        classes: &[String],
        feature_order: &[String],
    ) -> Vec<Candidate> {
        let n_classes = classes.len();
        let mut candidates = Vec::with_capacity(self.candidates.len());

        for hyperparameters in &self.candidates {
            let algorithm = hyperparameters.algorithm();
            let classifier = match self.train(
                split.train.features.view(),
                &split.train.labels,
                n_classes,
                hyperparameters,
            ) {
                Ok(classifier) => classifier,
                Err(err) => {
                    warn!(%algorithm, error = %err, "excluding candidate");
                    continue;
                }
            };
            let test_predictions = match classifier.predict_many(split.test.features.view()) {
                Ok(predictions) => predictions,
                Err(err) => {
                    warn!(%algorithm, error = %err, "excluding candidate");
                    continue;
                }
            };
            let metrics =
                evaluator::weighted_metrics(&split.test.labels, &test_predictions, n_classes);

            let cross_validation = if self.cv_folds >= 2 {
                match evaluator::cross_validate(
                    hyperparameters,
                    split.train.features.view(),
                    &split.train.labels,
                    n_classes,
                    self.cv_folds,
                    self.seed,
                ) {
                    Ok(cv) => Some(cv),
                    Err(err) => {
                        warn!(%algorithm, error = %err, "skipping cross-validation");
                        None
                    }
                }
            } else {
                None
            };

            info!(
                %algorithm,
                accuracy = metrics.accuracy,
                cv_mean = cross_validation.as_ref().map(|cv| cv.mean),
                "candidate scored"
            );
            candidates.push(Candidate {
                model: TrainedModel {
                    algorithm,
                    classifier,
                    feature_order: feature_order.to_vec(),
                    classes: classes.to_vec(),
                    metrics,
                    cross_validation,
                },
                test_predictions,
            });
        }
        candidates
    }
}

/// `Less` when `a` should be preferred over `b`.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    let (a, b) = (&a.model, &b.model);
    b.metrics
        .accuracy
        .total_cmp(&a.metrics.accuracy)
        .then_with(|| match (&a.cross_validation, &b.cross_validation) {
            (Some(x), Some(y)) => x.std.total_cmp(&y.std),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.algorithm.priority().cmp(&b.algorithm.priority()))
}

/// Index of the candidate [`select_best`] would pick.
pub fn best_index(candidates: &[Candidate]) -> Option<usize> {
    (0..candidates.len()).min_by(|&i, &j| rank(&candidates[i], &candidates[j]))
}

/// Highest test accuracy wins. Ties go to the lower cross-validation spread
/// and then to the algorithm with the best [`Algorithm::priority`].
pub fn select_best(mut candidates: Vec<Candidate>) -> Result<TrainedModel, TrainingError> {
    let best = best_index(&candidates).ok_or(TrainingError::NoViableCandidate)?;
    Ok(candidates.swap_remove(best).model)
}
