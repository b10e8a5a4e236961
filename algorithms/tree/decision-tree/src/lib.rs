use croprec_helpers::{
    argmax, class_counts, ensure_dimensions, validate_training_set, Classifier, ClassifierError,
    Float, ModelDescriptor,
};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::cmp::Ordering;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// How many features are considered when searching for the best split of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "snake_case")
)]
pub enum MaxFeatures {
    /// Every feature, every node (plain CART).
    All,
    /// `floor(sqrt(n_features))`, the usual choice inside a random forest.
    Sqrt,
    /// `floor(log2(n_features))`.
    Log2,
    /// A fixed number, clamped to `1..=n_features`.
    Fixed(usize),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Fixed(n) => n,
        };
        n.clamp(1, n_features.max(1))
    }
}

/// Growth limits of a single tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct TreeParams {
    /// Maximum depth of the tree; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// A node with fewer samples than this becomes a leaf.
    pub min_samples_split: usize,
    /// Each child of a split must keep at least this many samples.
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

impl TreeParams {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.min_samples_split < 2 {
            return Err(ClassifierError::InvalidParameter(
                "min_samples_split must be at least 2".into(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ClassifierError::InvalidParameter(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ClassifierError::InvalidParameter(
                "max_depth must be at least 1".into(),
            ));
        }
        if self.max_features == MaxFeatures::Fixed(0) {
            return Err(ClassifierError::InvalidParameter(
                "max_features must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A node of the flattened tree. Children are indices into `DecisionTree::nodes`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum Node<F> {
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: F,
        left: usize,
        right: usize,
    },
    /// Class frequencies of the training samples that reached this leaf.
    Leaf { distribution: Vec<F> },
}

/// A CART classification tree using Gini impurity.
///
/// The tree is stored as a flat arena of [`Node`]s with the root at index 0,
/// which keeps it trivially serialisable and cheap to walk.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct DecisionTree<F> {
    params: TreeParams,
    seed: u64,
    nodes: Vec<Node<F>>,
    n_features: usize,
    n_classes: usize,
    importances: Option<Array1<F>>,
}

impl<F: Float> DecisionTree<F> {
    /// Creates an unfitted tree. `seed` drives feature sub-sampling and is
    /// unused with [`MaxFeatures::All`].
    pub fn new(params: TreeParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            nodes: Vec::new(),
            n_features: 0,
            n_classes: 0,
            importances: None,
        }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn nodes(&self) -> &[Node<F>] {
        &self.nodes
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Depth of the fitted tree; a lone leaf has depth 0.
    pub fn depth(&self) -> usize {
        fn walk<F>(nodes: &[Node<F>], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Fits the tree on the rows of `x` selected by `indices`.
    ///
    /// Indices may repeat, which is how a forest feeds bootstrap samples in
    /// without copying the feature matrix.
    ///
    /// # Arguments
    ///
    /// * `x`: The full feature matrix, one row per sample.
    /// * `y`: Class index of every row of `x`.
    /// * `indices`: The rows to train on.
    /// * `rng`: Drives feature sub-sampling at each node.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::InvalidParameter` if the [`TreeParams`] are unusable.
    /// Returns `ClassifierError::EmptyTrainingSet` if `x` or `indices` is empty.
    /// Returns `ClassifierError::DimensionMismatch`, `LabelOutOfRange` or
    /// `NonFiniteInput` if `x` and `y` do not form a valid training set.
    pub fn fit_with_indices<R: Rng>(
        &mut self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
        mut indices: Vec<usize>,
        rng: &mut R,
    ) -> Result<(), ClassifierError> {
        self.params.validate()?;
        validate_training_set(x, y, n_classes)?;
        if indices.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }

        let n_features = x.ncols();
        let mut builder = TreeBuilder {
            x,
            y,
            n_classes,
            params: &self.params,
            n_try: self.params.max_features.resolve(n_features),
            rng,
            nodes: Vec::new(),
            importances: vec![F::zero(); n_features],
        };
        builder.grow(&mut indices, 0);

        let TreeBuilder {
            nodes, importances, ..
        } = builder;
        let total: F = importances.iter().copied().sum();
        let mut importances = Array1::from(importances);
        if total > F::zero() {
            importances /= total;
        }

        self.nodes = nodes;
        self.n_features = n_features;
        self.n_classes = n_classes;
        self.importances = Some(importances);
        Ok(())
    }

    fn leaf_for(&self, features: ArrayView1<F>) -> Result<&[F], ClassifierError> {
        if self.nodes.is_empty() {
            return Err(ClassifierError::NotFitted);
        }
        ensure_dimensions(self.n_features, features.len())?;

        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf { distribution } => return Ok(distribution.as_slice()),
            }
        }
    }
}

impl<F: Float> Classifier<F> for DecisionTree<F> {
    fn fit(
        &mut self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<(), ClassifierError> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        self.fit_with_indices(x, y, n_classes, (0..x.nrows()).collect(), &mut rng)
    }

    fn predict(&self, features: ArrayView1<F>) -> Result<usize, ClassifierError> {
        let distribution = self.leaf_for(features)?;
        Ok(argmax(ArrayView1::from(distribution)))
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "decision_tree",
            supports_probabilities: true,
            supports_feature_importance: true,
        }
    }

    fn predict_proba(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        self.leaf_for(features).map(|d| Array1::from(d.to_vec()))
    }

    fn feature_importances(&self) -> Option<Array1<F>> {
        self.importances.clone()
    }
}

struct BestSplit<F> {
    feature: usize,
    threshold: F,
    gain: F,
}

struct TreeBuilder<'a, 'x, F, R> {
    x: ArrayView2<'x, F>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a TreeParams,
    n_try: usize,
    rng: &'a mut R,
    nodes: Vec<Node<F>>,
    importances: Vec<F>,
}

impl<F: Float, R: Rng> TreeBuilder<'_, '_, F, R> {
    /// Grows the subtree for `indices` and returns the id of its root.
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let counts = class_counts(self.y, indices.iter().copied(), self.n_classes);
        let n = indices.len();
        let impurity = gini::<F>(&counts, n);

        let may_split = self.params.max_depth.is_none_or(|max| depth < max)
            && n >= self.params.min_samples_split
            && n >= 2 * self.params.min_samples_leaf
            && impurity > F::zero();

        if may_split {
            if let Some(split) = self.best_split(indices, &counts, impurity) {
                let mid = partition(indices, |i| self.x[[i, split.feature]] <= split.threshold);
                // Weighted impurity decrease, normalised once the tree is done.
                self.importances[split.feature] += split.gain * F::from_count(n);

                let id = self.nodes.len();
                self.nodes.push(Node::Leaf {
                    distribution: Vec::new(),
                });
                let (left_indices, right_indices) = indices.split_at_mut(mid);
                let left = self.grow(left_indices, depth + 1);
                let right = self.grow(right_indices, depth + 1);
                self.nodes[id] = Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right,
                };
                return id;
            }
        }

        let total = F::from_count(n);
        let distribution = counts.iter().map(|&c| F::from_count(c) / total).collect();
        self.nodes.push(Node::Leaf { distribution });
        self.nodes.len() - 1
    }

    fn best_split(
        &mut self,
        indices: &[usize],
        counts: &[usize],
        impurity: F,
    ) -> Option<BestSplit<F>> {
        let n_features = self.x.ncols();
        let mut candidates = if self.n_try >= n_features {
            (0..n_features).collect()
        } else {
            index::sample(&mut *self.rng, n_features, self.n_try).into_vec()
        };
        // Scanning in feature order keeps tie-breaking independent of the sampler.
        candidates.sort_unstable();

        let mut sorted = indices.to_vec();
        let mut best = None;
        for &feature in &candidates {
            self.scan_feature(feature, &mut sorted, counts, impurity, &mut best);
        }
        // Like CART in a forest: keep looking past the sampled features until
        // some feature can split the node.
        if best.is_none() && candidates.len() < n_features {
            for feature in (0..n_features).filter(|f| candidates.binary_search(f).is_err()) {
                self.scan_feature(feature, &mut sorted, counts, impurity, &mut best);
            }
        }
        best
    }

    fn scan_feature(
        &self,
        feature: usize,
        sorted: &mut [usize],
        counts: &[usize],
        impurity: F,
        best: &mut Option<BestSplit<F>>,
    ) {
        let column = self.x.column(feature);
        sorted.sort_unstable_by(|&a, &b| {
            column[a].partial_cmp(&column[b]).unwrap_or(Ordering::Equal)
        });

        let n = sorted.len();
        let total = F::from_count(n);
        let min_leaf = self.params.min_samples_leaf;
        let mut left = vec![0usize; self.n_classes];
        let mut right = counts.to_vec();

        for pos in 0..n - 1 {
            let class = self.y[sorted[pos]];
            left[class] += 1;
            right[class] -= 1;

            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let here = column[sorted[pos]];
            let next = column[sorted[pos + 1]];
            if here >= next {
                continue;
            }

            let weighted = (F::from_count(n_left) * gini(&left, n_left)
                + F::from_count(n_right) * gini(&right, n_right))
                / total;
            let gain = impurity - weighted;
            if gain <= F::epsilon() || best.as_ref().is_some_and(|b| gain <= b.gain) {
                continue;
            }

            let two = F::one() + F::one();
            let mut threshold = (here + next) / two;
            if threshold >= next {
                threshold = here;
            }
            *best = Some(BestSplit {
                feature,
                threshold,
                gain,
            });
        }
    }
}

fn gini<F: Float>(counts: &[usize], n: usize) -> F {
    if n == 0 {
        return F::zero();
    }
    let total = F::from_count(n);
    counts.iter().fold(F::one(), |acc, &c| {
        let p = F::from_count(c) / total;
        acc - p * p
    })
}

/// Moves every index satisfying `goes_left` to the front and returns how many there are.
fn partition(indices: &mut [usize], goes_left: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..indices.len() {
        if goes_left(indices[i]) {
            indices.swap(i, mid);
            mid += 1;
        }
    }
    mid
}
