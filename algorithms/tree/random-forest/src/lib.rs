use croprec_helpers::{
    ensure_dimensions, validate_training_set, Classifier, ClassifierError, Float, ModelDescriptor,
};
use decision_tree::{DecisionTree, MaxFeatures, TreeParams};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// Hyperparameters of a [`RandomForest`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ForestParams {
    pub n_estimators: usize,
    /// Growth limits applied to every tree.
    pub tree: TreeParams,
    /// Draw a bootstrap sample per tree. Without it every tree sees the full set
    /// and only feature sub-sampling decorrelates them.
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams {
                max_features: MaxFeatures::Sqrt,
                ..TreeParams::default()
            },
            bootstrap: true,
        }
    }
}

/// A random forest classifier.
///
/// Each tree is fitted on a bootstrap sample of the training set and considers
/// a random subset of features at every split. Predictions are a majority vote
/// over the trees; ties go to the lowest class index.
///
/// Trees are fitted in parallel. Every tree draws from its own generator seeded
/// with `seed + tree_index`, so a fixed seed yields the same forest regardless
/// of how the work is scheduled.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct RandomForest<F> {
    params: ForestParams,
    seed: u64,
    trees: Vec<DecisionTree<F>>,
    n_features: usize,
    n_classes: usize,
}

impl<F: Float> RandomForest<F> {
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            trees: Vec::new(),
            n_features: 0,
            n_classes: 0,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[DecisionTree<F>] {
        &self.trees
    }

    /// Vote count per class for a single sample.
    pub fn votes(&self, features: ArrayView1<F>) -> Result<Vec<usize>, ClassifierError> {
        if self.trees.is_empty() {
            return Err(ClassifierError::NotFitted);
        }
        ensure_dimensions(self.n_features, features.len())?;

        let mut votes = vec![0usize; self.n_classes];
        for tree in &self.trees {
            votes[tree.predict(features)?] += 1;
        }
        Ok(votes)
    }

    fn fit_tree(
        &self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
        tree_index: usize,
    ) -> Result<DecisionTree<F>, ClassifierError> {
        let tree_seed = self.seed.wrapping_add(tree_index as u64);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(tree_seed);
        let n_samples = x.nrows();
        let indices: Vec<usize> = if self.params.bootstrap {
            (0..n_samples).map(|_| rng.random_range(0..n_samples)).collect()
        } else {
            (0..n_samples).collect()
        };

        let mut tree = DecisionTree::new(self.params.tree.clone(), tree_seed);
        tree.fit_with_indices(x, y, n_classes, indices, &mut rng)?;
        Ok(tree)
    }
}

impl<F: Float> Classifier<F> for RandomForest<F> {
    /// Fits `n_estimators` trees in parallel, tree `i` seeded with `seed + i`.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::InvalidParameter` if `n_estimators` is 0 or the
    /// tree parameters are unusable.
    /// Returns the first error of any tree fit, usually a training set that
    /// fails [`validate_training_set`].
    fn fit(
        &mut self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<(), ClassifierError> {
        if self.params.n_estimators == 0 {
            return Err(ClassifierError::InvalidParameter(
                "n_estimators must be at least 1".into(),
            ));
        }
        self.params.tree.validate()?;
        validate_training_set(x, y, n_classes)?;

        let this = &*self;
        let trees = (0..this.params.n_estimators)
            .into_par_iter()
            .map(|i| this.fit_tree(x, y, n_classes, i))
            .collect::<Result<Vec<_>, _>>()?;

        self.trees = trees;
        self.n_features = x.ncols();
        self.n_classes = n_classes;
        Ok(())
    }

    fn predict(&self, features: ArrayView1<F>) -> Result<usize, ClassifierError> {
        let votes = self.votes(features)?;
        let mut best = 0;
        for (class, &count) in votes.iter().enumerate() {
            if count > votes[best] {
                best = class;
            }
        }
        Ok(best)
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "random_forest",
            supports_probabilities: true,
            supports_feature_importance: true,
        }
    }

    /// Fraction of trees voting for each class, so the most probable class is
    /// always the one [`predict`](Classifier::predict) returns.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::NotFitted` before `fit` and
    /// `ClassifierError::DimensionMismatch` for a sample of the wrong width.
    fn predict_proba(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        let votes = self.votes(features)?;
        let total = F::from_count(self.trees.len());
        Ok(votes.iter().map(|&v| F::from_count(v) / total).collect())
    }

    /// Mean of the per-tree impurity importances, renormalised to sum to one.
    fn feature_importances(&self) -> Option<Array1<F>> {
        if self.trees.is_empty() {
            return None;
        }
        let mut total = Array1::zeros(self.n_features);
        for tree in &self.trees {
            total += &tree.feature_importances()?;
        }
        let sum = total.sum();
        if sum > F::zero() {
            total /= sum;
        }
        Some(total)
    }
}

/// Predicts every row, spreading the rows across threads.
pub fn predict_parallel<F: Float>(
    forest: &RandomForest<F>,
    x: ArrayView2<F>,
) -> Result<Vec<usize>, ClassifierError> {
    (0..x.nrows())
        .into_par_iter()
        .map(|i| forest.predict(x.row(i)))
        .collect()
}
