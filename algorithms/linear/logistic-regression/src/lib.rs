use croprec_helpers::{
    argmax, ensure_dimensions, validate_training_set, Classifier, ClassifierError, Float,
    ModelDescriptor,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// Optimiser settings for [`LogisticRegression`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LogisticParams<F> {
    /// Step size of full-batch gradient descent.
    pub learning_rate: F,
    pub max_iter: usize,
    /// L2 penalty on the weights (the intercepts are not penalised).
    pub l2: F,
    /// Stop once the largest gradient component falls below this.
    pub tol: F,
}

impl<F: Float> Default for LogisticParams<F> {
    fn default() -> Self {
        Self {
            learning_rate: F::constant(0.5),
            max_iter: 1000,
            l2: F::constant(1e-4),
            tol: F::constant(1e-6),
        }
    }
}

/// Multinomial (softmax) logistic regression trained by gradient descent.
///
/// Weights start at zero, so training is fully deterministic.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LogisticRegression<F> {
    params: LogisticParams<F>,
    /// `n_features x n_classes`
    weights: Option<Array2<F>>,
    intercepts: Option<Array1<F>>,
    n_iter: usize,
}

impl<F: Float> LogisticRegression<F> {
    pub fn new(params: LogisticParams<F>) -> Self {
        Self {
            params,
            weights: None,
            intercepts: None,
            n_iter: 0,
        }
    }

    /// Gradient steps taken by the last `fit`.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn logits(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        let (weights, intercepts) = match (&self.weights, &self.intercepts) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(ClassifierError::NotFitted),
        };
        ensure_dimensions(weights.nrows(), features.len())?;
        Ok(features.dot(weights) + intercepts)
    }
}

impl<F: Float> Default for LogisticRegression<F> {
    fn default() -> Self {
        Self::new(LogisticParams::default())
    }
}

/// Row-wise softmax, shifted by each row's maximum.
fn softmax_rows<F: Float>(mut logits: Array2<F>) -> Array2<F> {
    for mut row in logits.rows_mut() {
        let max = row.iter().fold(F::neg_infinity(), |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let norm = row.sum();
        row /= norm;
    }
    logits
}

impl<F: Float> Classifier<F> for LogisticRegression<F> {
    /// # Errors
    ///
    /// Returns `ClassifierError::Diverged` as soon as a weight or intercept
    /// turns non-finite, which a too-large `learning_rate` causes.
    fn fit(
        &mut self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<(), ClassifierError> {
        let LogisticParams {
            learning_rate,
            max_iter,
            l2,
            tol,
        } = self.params;
        if !(learning_rate > F::zero()) || max_iter == 0 || l2 < F::zero() {
            return Err(ClassifierError::InvalidParameter(
                "learning_rate must be positive, max_iter non-zero and l2 non-negative".into(),
            ));
        }
        validate_training_set(x, y, n_classes)?;

        let (n_samples, n_features) = x.dim();
        let n = F::from_count(n_samples);
        let mut targets = Array2::<F>::zeros((n_samples, n_classes));
        for (i, &label) in y.iter().enumerate() {
            targets[[i, label]] = F::one();
        }

        let mut weights = Array2::<F>::zeros((n_features, n_classes));
        let mut intercepts = Array1::<F>::zeros(n_classes);
        let mut steps = 0;
        for _ in 0..max_iter {
            steps += 1;
            let proba = softmax_rows(x.dot(&weights) + &intercepts);
            let residual = proba - &targets;
            let grad_w = x.t().dot(&residual) / n + &weights * l2;
            let grad_b = residual.sum_axis(Axis(0)) / n;

            weights.scaled_add(-learning_rate, &grad_w);
            intercepts.scaled_add(-learning_rate, &grad_b);

            if weights.iter().chain(intercepts.iter()).any(|v| !v.is_finite()) {
                return Err(ClassifierError::Diverged(format!(
                    "non-finite weights after {} iterations",
                    steps
                )));
            }
            let largest = grad_w
                .iter()
                .chain(grad_b.iter())
                .fold(F::zero(), |acc, &g| acc.max(num_traits::Float::abs(g)));
            if largest < tol {
                break;
            }
        }

        self.weights = Some(weights);
        self.intercepts = Some(intercepts);
        self.n_iter = steps;
        Ok(())
    }

    fn predict(&self, features: ArrayView1<F>) -> Result<usize, ClassifierError> {
        let logits = self.logits(features)?;
        Ok(argmax(logits.view()))
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "logistic_regression",
            supports_probabilities: true,
            supports_feature_importance: false,
        }
    }

    fn predict_proba(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        let logits = self.logits(features)?;
        let proba = softmax_rows(logits.insert_axis(Axis(0)));
        Ok(proba.row(0).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Vec<usize>) {
        let x = array![
            [-2.0, 0.0],
            [-1.5, 0.5],
            [-2.5, -0.5],
            [2.0, 0.0],
            [1.5, 0.5],
            [2.5, -0.5],
            [0.0, 3.0],
            [0.5, 2.5],
            [-0.5, 3.5],
        ];
        (x, vec![0, 0, 0, 1, 1, 1, 2, 2, 2])
    }

    #[test]
    fn test_logreg_fit_and_predict() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        model.fit(x.view(), &y, 3).unwrap();

        assert_eq!(model.predict_many(x.view()).unwrap(), y);
        assert_eq!(model.predict(array![-3.0, 0.0].view()).unwrap(), 0);
        assert_eq!(model.predict(array![0.0, 4.0].view()).unwrap(), 2);
    }

    #[test]
    fn test_logreg_probabilities_sum_to_one() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        model.fit(x.view(), &y, 3).unwrap();

        let proba = model.predict_proba(array![2.0, 0.0].view()).unwrap();
        assert_abs_diff_eq!(proba.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(argmax(proba.view()), 1);
    }

    #[test]
    fn test_logreg_is_deterministic() {
        let (x, y) = separable();
        let mut a = LogisticRegression::default();
        let mut b = LogisticRegression::default();
        a.fit(x.view(), &y, 3).unwrap();
        b.fit(x.view(), &y, 3).unwrap();
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.n_iter(), b.n_iter());
    }

    #[test]
    fn test_huge_learning_rate_diverges() {
        let x = array![[1e150, 0.0], [-1e150, 0.0]];
        let params = LogisticParams {
            learning_rate: 1e200,
            ..LogisticParams::default()
        };
        let mut model = LogisticRegression::new(params);
        assert!(matches!(
            model.fit(x.view(), &[0, 1], 2),
            Err(ClassifierError::Diverged(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let (x, y) = separable();
        let params = LogisticParams {
            max_iter: 0,
            ..LogisticParams::default()
        };
        let mut model = LogisticRegression::new(params);
        assert!(matches!(
            model.fit(x.view(), &y, 3),
            Err(ClassifierError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_predict_not_fitted() {
        let model: LogisticRegression<f64> = LogisticRegression::default();
        assert!(matches!(
            model.predict(array![0.0, 0.0].view()),
            Err(ClassifierError::NotFitted)
        ));
    }
}
