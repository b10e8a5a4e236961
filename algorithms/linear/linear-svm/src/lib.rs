use croprec_helpers::{
    argmax, ensure_dimensions, validate_training_set, Classifier, ClassifierError, Float,
    ModelDescriptor,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct SvmParams<F> {
    /// Regularisation strength.
    pub lambda: F,
    /// Initial step size; it decays as `lr / (1 + lr * lambda * t)`.
    pub learning_rate: F,
    /// Passes over the training set.
    pub epochs: usize,
}

impl<F: Float> Default for SvmParams<F> {
    fn default() -> Self {
        Self {
            lambda: F::constant(1e-4),
            learning_rate: F::constant(0.1),
            epochs: 50,
        }
    }
}

/// Linear support vector machine, one binary hinge-loss model per class.
///
/// Each binary model is trained with stochastic gradient descent over a
/// shuffled pass order drawn from `seed + class`. Predictions pick the class
/// with the largest decision score. The scores are not calibrated, so this
/// model does not offer probability estimates.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LinearSvm<F> {
    params: SvmParams<F>,
    seed: u64,
    /// `n_classes x n_features`
    weights: Option<Array2<F>>,
    biases: Option<Array1<F>>,
}

impl<F: Float> LinearSvm<F> {
    pub fn new(params: SvmParams<F>, seed: u64) -> Self {
        Self {
            params,
            seed,
            weights: None,
            biases: None,
        }
    }

    /// Signed distance-like score of every one-vs-rest model.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::NotFitted` before [`Classifier::fit`] and
    /// `ClassifierError::DimensionMismatch` for a sample of the wrong width.
    pub fn decision_function(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        let (weights, biases) = match (&self.weights, &self.biases) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(ClassifierError::NotFitted),
        };
        ensure_dimensions(weights.ncols(), features.len())?;
        Ok(weights.dot(&features) + biases)
    }

    fn fit_binary(&self, x: ArrayView2<F>, y: &[usize], class: usize) -> (Array1<F>, F) {
        let SvmParams {
            lambda,
            learning_rate,
            epochs,
        } = self.params;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed.wrapping_add(class as u64));
        let mut order: Vec<usize> = (0..x.nrows()).collect();
        let mut w = Array1::<F>::zeros(x.ncols());
        let mut b = F::zero();
        let mut t = F::zero();

        for _ in 0..epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                let row = x.row(i);
                let target = if y[i] == class { F::one() } else { -F::one() };
                let eta = learning_rate / (F::one() + learning_rate * lambda * t);
                let margin = target * (w.dot(&row) + b);

                w *= F::one() - eta * lambda;
                if margin < F::one() {
                    w.scaled_add(eta * target, &row);
                    b += eta * target;
                }
                t += F::one();
            }
        }
        (w, b)
    }
}

impl<F: Float> Classifier<F> for LinearSvm<F> {
    /// # Errors
    ///
    /// Returns `ClassifierError::InvalidParameter` for a non-positive `lambda`
    /// or `learning_rate`, or zero `epochs`.
    /// Returns `ClassifierError::Diverged` if a binary model ends with
    /// non-finite weights.
    fn fit(
        &mut self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<(), ClassifierError> {
        let SvmParams {
            lambda,
            learning_rate,
            epochs,
        } = self.params;
        if !(lambda > F::zero()) || !(learning_rate > F::zero()) || epochs == 0 {
            return Err(ClassifierError::InvalidParameter(
                "lambda and learning_rate must be positive and epochs non-zero".into(),
            ));
        }
        validate_training_set(x, y, n_classes)?;

        let mut weights = Array2::<F>::zeros((n_classes, x.ncols()));
        let mut biases = Array1::<F>::zeros(n_classes);
        for class in 0..n_classes {
            let (w, b) = self.fit_binary(x, y, class);
            if w.iter().any(|v| !v.is_finite()) || !b.is_finite() {
                return Err(ClassifierError::Diverged(format!(
                    "non-finite weights for class {}",
                    class
                )));
            }
            weights.row_mut(class).assign(&w);
            biases[class] = b;
        }

        self.weights = Some(weights);
        self.biases = Some(biases);
        Ok(())
    }

    fn predict(&self, features: ArrayView1<F>) -> Result<usize, ClassifierError> {
        let scores = self.decision_function(features)?;
        Ok(argmax(scores.view()))
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "linear_svm",
            supports_probabilities: false,
            supports_feature_importance: false,
        }
    }
}
