//! Scoring of fitted classifiers.
//!
//! Everything here works on class indices; names only appear in reports.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use croprec_helpers::Classifier;
use ndarray::{ArrayView2, Axis};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrainingError};
use crate::trainer::{Algorithm, Candidate, Hyperparameters, TrainedClassifier};

/// Fraction of predictions that match. Zero for empty input.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// Support-weighted mean of the per-class scores.
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Scores of a single class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub class: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

struct ClassScores {
    precision: f64,
    recall: f64,
    f1: f64,
    support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn class_scores(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Vec<ClassScores> {
    let mut tp = vec![0usize; n_classes];
    let mut predicted = vec![0usize; n_classes];
    let mut actual = vec![0usize; n_classes];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t < n_classes {
            actual[t] += 1;
        }
        if p < n_classes {
            predicted[p] += 1;
        }
        if t == p && t < n_classes {
            tp[t] += 1;
        }
    }

    (0..n_classes)
        .map(|c| {
            let precision = ratio(tp[c], predicted[c]);
            let recall = ratio(tp[c], actual[c]);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassScores {
                precision,
                recall,
                f1,
                support: actual[c],
            }
        })
        .collect()
}

/// Accuracy plus support-weighted precision, recall and F1. A class that is
/// never predicted scores zero precision rather than failing.
pub fn weighted_metrics(
    y_true: &[usize],
    y_pred: &[usize],
    n_classes: usize,
) -> ClassificationMetrics {
    let scores = class_scores(y_true, y_pred, n_classes);
    let total: usize = scores.iter().map(|s| s.support).sum();
    let weighted = |f: fn(&ClassScores) -> f64| {
        if total == 0 {
            return 0.0;
        }
        scores
            .iter()
            .map(|s| f(s) * s.support as f64)
            .sum::<f64>()
            / total as f64
    };
    ClassificationMetrics {
        accuracy: accuracy(y_true, y_pred),
        precision: weighted(|s| s.precision),
        recall: weighted(|s| s.recall),
        f1: weighted(|s| s.f1),
    }
}

pub fn per_class_report(
    y_true: &[usize],
    y_pred: &[usize],
    classes: &[String],
) -> Vec<ClassReport> {
    class_scores(y_true, y_pred, classes.len())
        .into_iter()
        .zip(classes)
        .map(|(s, class)| ClassReport {
            class: class.clone(),
            precision: s.precision,
            recall: s.recall,
            f1: s.f1,
            support: s.support,
        })
        .collect()
}

/// Rows are true classes, columns predicted classes, both in label order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub classes: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[usize], y_pred: &[usize], classes: &[String]) -> Self {
        let n = classes.len();
        let mut counts = vec![vec![0; n]; n];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < n && p < n {
                counts[t][p] += 1;
            }
        }
        Self {
            classes: classes.to_vec(),
            counts,
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.counts.len()).map(|i| self.get(i, i)).sum()
    }
}

/// Per-fold accuracies of a k-fold run and their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub fold_scores: Vec<f64>,
    pub mean: f64,
    /// Population standard deviation of `fold_scores`.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl CrossValidation {
    /// Summarises per-fold scores. `None` if there are no scores or any of
    /// them is not finite.
    pub fn from_scores(fold_scores: Vec<f64>) -> Option<Self> {
        if fold_scores.is_empty() || fold_scores.iter().any(|s| !s.is_finite()) {
            return None;
        }
        let n = fold_scores.len() as f64;
        let mean = fold_scores.iter().sum::<f64>() / n;
        let var = fold_scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let min = fold_scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = fold_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // clamp away rounding in the mean
        Some(Self {
            mean: mean.clamp(min, max),
            std: var.sqrt(),
            min,
            max,
            fold_scores,
        })
    }
}

/// Assigns every sample to one of `k` folds, spreading each class evenly.
///
/// Each class is shuffled and dealt round-robin; the dealing position carries
/// over between classes so fold sizes differ by at most one.
///
/// # Errors
///
/// Returns `TrainingError::InvalidSplit` if `k` is below 2.
pub fn stratified_folds(
    y: &[usize],
    k: usize,
    seed: u64,
) -> std::result::Result<Vec<Vec<usize>>, TrainingError> {
    if k < 2 {
        return Err(TrainingError::InvalidSplit(format!(
            "cross-validation needs at least 2 folds, got {}",
            k
        )));
    }
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    let mut next = 0;
    for members in by_class.values_mut() {
        members.shuffle(&mut rng);
        for &i in members.iter() {
            folds[next % k].push(i);
            next += 1;
        }
    }
    Ok(folds)
}

/// Stratified k-fold cross-validation of `hyperparameters` on `(x, y)`.
///
/// Every sample is held out exactly once. Each class needs at least `k`
/// samples so that every fold sees it.
pub fn cross_validate(
    hyperparameters: &Hyperparameters,
    x: ArrayView2<f64>,
    y: &[usize],
    n_classes: usize,
    k: usize,
    seed: u64,
) -> std::result::Result<CrossValidation, TrainingError> {
    let folds = stratified_folds(y, k, seed)?;
    let counts = croprec_helpers::class_counts(y, 0..y.len(), n_classes);
    if let Some((class, &found)) = counts.iter().enumerate().find(|&(_, &c)| c > 0 && c < k) {
        return Err(TrainingError::NotEnoughSamples {
            class,
            folds: k,
            found,
        });
    }

    let algorithm = hyperparameters.algorithm();
    let mut scores = Vec::with_capacity(k);
    for (f, held_out) in folds.iter().enumerate() {
        let train: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|&(g, _)| g != f)
            .flat_map(|(_, fold)| fold.iter().copied())
            .collect();
        let x_train = x.select(Axis(0), &train);
        let y_train: Vec<usize> = train.iter().map(|&i| y[i]).collect();
        let model = hyperparameters
            .fit(x_train.view(), &y_train, n_classes, seed)
            .map_err(|source| TrainingError::Fit {
                algorithm: algorithm.name(),
                source,
            })?;

        let x_test = x.select(Axis(0), held_out);
        let y_test: Vec<usize> = held_out.iter().map(|&i| y[i]).collect();
        let predictions = model
            .predict_many(x_test.view())
            .map_err(|source| TrainingError::Fit {
                algorithm: algorithm.name(),
                source,
            })?;
        let score = accuracy(&y_test, &predictions);
        debug!(%algorithm, fold = f, score, "fold scored");
        scores.push(score);
    }
    CrossValidation::from_scores(scores).ok_or_else(|| {
        TrainingError::InvalidSplit(format!("{} produced no fold scores", algorithm))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Features ordered by decreasing importance, or `None` when the model
/// cannot rank them.
pub fn feature_importance_ranking(
    model: &TrainedClassifier,
    feature_order: &[String],
) -> Option<Vec<FeatureImportance>> {
    if !model.descriptor().supports_feature_importance {
        return None;
    }
    let importances = model.feature_importances()?;
    let mut ranking: Vec<FeatureImportance> = feature_order
        .iter()
        .zip(importances.iter())
        .map(|(feature, &importance)| FeatureImportance {
            feature: feature.clone(),
            importance,
        })
        .collect();
    ranking.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    Some(ranking)
}

/// One row of the model comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub algorithm: Algorithm,
    pub metrics: ClassificationMetrics,
    pub cv_mean: Option<f64>,
    pub cv_std: Option<f64>,
}

/// Everything known about a training run's outcome, ready to be written out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub selected: Algorithm,
    pub classes: Vec<String>,
    pub test_samples: usize,
    pub metrics: ClassificationMetrics,
    pub per_class: Vec<ClassReport>,
    pub confusion_matrix: ConfusionMatrix,
    pub cross_validation: Option<CrossValidation>,
    pub feature_importance: Option<Vec<FeatureImportance>>,
    pub candidates: Vec<CandidateSummary>,
}

impl EvaluationReport {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Builds reports against a fixed set of true test labels.
pub struct ModelEvaluator<'a> {
    classes: &'a [String],
    y_true: &'a [usize],
}

impl<'a> ModelEvaluator<'a> {
    pub fn new(classes: &'a [String], y_true: &'a [usize]) -> Self {
        Self { classes, y_true }
    }

    pub fn metrics(&self, y_pred: &[usize]) -> ClassificationMetrics {
        weighted_metrics(self.y_true, y_pred, self.classes.len())
    }

    pub fn confusion_matrix(&self, y_pred: &[usize]) -> ConfusionMatrix {
        ConfusionMatrix::new(self.y_true, y_pred, self.classes)
    }

    /// Report for `candidates[selected]`, with the others in the comparison
    /// table. `None` if `selected` is out of bounds.
    pub fn report(&self, candidates: &[Candidate], selected: usize) -> Option<EvaluationReport> {
        let best = candidates.get(selected)?;
        let predictions = &best.test_predictions;
        Some(EvaluationReport {
            generated_at: Utc::now(),
            selected: best.model.algorithm,
            classes: self.classes.to_vec(),
            test_samples: self.y_true.len(),
            metrics: self.metrics(predictions),
            per_class: per_class_report(self.y_true, predictions, self.classes),
            confusion_matrix: self.confusion_matrix(predictions),
            cross_validation: best.model.cross_validation.clone(),
            feature_importance: feature_importance_ranking(
                &best.model.classifier,
                &best.model.feature_order,
            ),
            candidates: candidates
                .iter()
                .map(|c| CandidateSummary {
                    algorithm: c.model.algorithm,
                    metrics: c.model.metrics,
                    cv_mean: c.model.cross_validation.as_ref().map(|cv| cv.mean),
                    cv_std: c.model.cross_validation.as_ref().map(|cv| cv.std),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use decision_tree::TreeParams;
    use ndarray::Array2;
    use proptest::prelude::*;
    use random_forest::ForestParams;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("crop{i}")).collect()
    }

    fn blobs(per_class: usize, n_classes: usize) -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for class in 0..n_classes {
            for k in 0..per_class {
                let c = class as f64 * 5.0;
                let j = (k % 7) as f64 * 0.1;
                rows.extend_from_slice(&[c + j, c - j]);
                labels.push(class);
            }
        }
        (Array2::from_shape_vec((labels.len(), 2), rows).unwrap(), labels)
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 2, 1], &[0, 1, 1, 1]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_weighted_metrics() {
        let y_true = [0, 0, 0, 1];
        let y_pred = [0, 0, 1, 1];
        let m = weighted_metrics(&y_true, &y_pred, 2);
        // class 0: p=1, r=2/3; class 1: p=1/2, r=1
        assert_abs_diff_eq!(m.precision, 0.75 * 1.0 + 0.25 * 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.recall, 0.75 * (2.0 / 3.0) + 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(m.accuracy, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_division_scores_zero() {
        let report = per_class_report(&[0, 0], &[0, 0], &names(3));
        assert_eq!(report[1].precision, 0.0);
        assert_eq!(report[1].recall, 0.0);
        assert_eq!(report[1].f1, 0.0);
        assert_eq!(report[1].support, 0);
        assert_eq!(report[0].f1, 1.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let cm = ConfusionMatrix::new(&[0, 1, 2, 2], &[0, 2, 2, 1], &names(3));
        assert_eq!(cm.get(0, 0), 1);
        assert_eq!(cm.get(1, 2), 1);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.get(2, 2), 1);
        assert_eq!(cm.total(), 4);
        assert_eq!(cm.correct(), 2);
        assert_eq!(cm.get(9, 9), 0);
    }

    #[test]
    fn test_stratified_folds_cover_every_sample_once() {
        let y: Vec<usize> = (0..23).map(|i| i % 3).collect();
        let folds = stratified_folds(&y, 5, 42).unwrap();
        let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
        all.sort();
        assert_eq!(all, (0..23).collect::<Vec<_>>());
        let sizes: Vec<usize> = folds.iter().map(Vec::len).collect();
        let (lo, hi) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        assert!(hi - lo <= 1);
    }

    #[test]
    fn test_stratified_folds_reject_fewer_than_two() {
        for k in [0, 1] {
            assert!(matches!(
                stratified_folds(&[0, 1], k, 1),
                Err(TrainingError::InvalidSplit(_))
            ));
        }
    }

    #[test]
    fn test_cv_summary_needs_finite_scores() {
        assert!(CrossValidation::from_scores(Vec::new()).is_none());
        assert!(CrossValidation::from_scores(vec![0.9, f64::NAN]).is_none());

        let cv = CrossValidation::from_scores(vec![0.8, 1.0]).unwrap();
        assert_abs_diff_eq!(cv.mean, 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(cv.std, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(cv.min, 0.8);
        assert_abs_diff_eq!(cv.max, 1.0);
    }

    #[test]
    fn test_cross_validate() {
        let (x, y) = blobs(15, 3);
        let hp = Hyperparameters::DecisionTree(TreeParams::default());
        let cv = cross_validate(&hp, x.view(), &y, 3, 5, 42).unwrap();
        assert_eq!(cv.fold_scores.len(), 5);
        assert!(cv.min <= cv.mean && cv.mean <= cv.max);
        assert_abs_diff_eq!(cv.mean, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_validate_needs_enough_samples() {
        let (x, y) = blobs(3, 2);
        let hp = Hyperparameters::NaiveBayes { var_smoothing: 1e-9 };
        assert!(matches!(
            cross_validate(&hp, x.view(), &y, 2, 5, 0),
            Err(TrainingError::NotEnoughSamples { folds: 5, found: 3, .. })
        ));
        assert!(matches!(
            cross_validate(&hp, x.view(), &y, 2, 1, 0),
            Err(TrainingError::InvalidSplit(_))
        ));
    }

    #[test]
    fn test_feature_importance_ranking() {
        let (x, y) = blobs(10, 3);
        let forest = Hyperparameters::RandomForest(ForestParams {
            n_estimators: 10,
            ..ForestParams::default()
        })
        .fit(x.view(), &y, 3, 1)
        .unwrap();
        let order = vec!["a".to_string(), "b".to_string()];
        let ranking = feature_importance_ranking(&forest, &order).unwrap();
        assert_eq!(ranking.len(), 2);
        assert!(ranking[0].importance >= ranking[1].importance);

        let nb = Hyperparameters::NaiveBayes { var_smoothing: 1e-9 }
            .fit(x.view(), &y, 3, 1)
            .unwrap();
        assert!(feature_importance_ranking(&nb, &order).is_none());
    }

    proptest! {
        #[test]
        fn cv_mean_within_fold_range(scores in prop::collection::vec(0.0f64..=1.0, 2..12)) {
            let cv = CrossValidation::from_scores(scores).unwrap();
            prop_assert!(cv.min <= cv.mean && cv.mean <= cv.max);
            prop_assert!(cv.std >= 0.0);
        }

        #[test]
        fn weighted_scores_are_probabilities(
            pairs in prop::collection::vec((0usize..4, 0usize..4), 1..60)
        ) {
            let (y_true, y_pred): (Vec<usize>, Vec<usize>) = pairs.into_iter().unzip();
            let m = weighted_metrics(&y_true, &y_pred, 4);
            for v in [m.accuracy, m.precision, m.recall, m.f1] {
                prop_assert!((0.0..=1.0).contains(&v));
            }
            // weighted recall equals accuracy
            prop_assert!((m.recall - m.accuracy).abs() < 1e-9);
            let cm = ConfusionMatrix::new(&y_true, &y_pred, &names(4));
            prop_assert_eq!(cm.total(), y_true.len());
        }
    }
}
