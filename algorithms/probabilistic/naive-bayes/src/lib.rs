use croprec_helpers::{
    argmax, class_counts, ensure_dimensions, validate_training_set, Classifier, ClassifierError,
    Float, ModelDescriptor,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

/// Gaussian Naive Bayes.
///
/// Every feature is modelled as an independent normal distribution per class.
/// `var_smoothing` times the largest feature variance is added to every
/// variance so that constant features do not produce zero-width Gaussians.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct GaussianNb<F> {
    var_smoothing: F,
    /// Per-class feature means, `n_classes x n_features`.
    means: Option<Array2<F>>,
    /// Per-class feature variances, `n_classes x n_features`.
    variances: Option<Array2<F>>,
    /// Prior of each class; zero for classes absent from training.
    priors: Option<Array1<F>>,
}

impl<F: Float> GaussianNb<F> {
    pub fn new(var_smoothing: F) -> Self {
        Self {
            var_smoothing,
            means: None,
            variances: None,
            priors: None,
        }
    }

    /// Unnormalised log posterior of every class.
    fn joint_log_likelihood(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        let (means, variances, priors) =
            match (&self.means, &self.variances, &self.priors) {
                (Some(m), Some(v), Some(p)) => (m, v, p),
                _ => return Err(ClassifierError::NotFitted),
            };
        ensure_dimensions(means.ncols(), features.len())?;

        let two = F::constant(2.0);
        let two_pi = F::constant(std::f64::consts::TAU);
        let mut jll = priors.mapv(|p| p.ln());
        for (class, score) in jll.iter_mut().enumerate() {
            if *score == F::neg_infinity() {
                continue;
            }
            let mut log_likelihood = F::zero();
            for ((&x, &mean), &var) in features
                .iter()
                .zip(means.row(class))
                .zip(variances.row(class))
            {
                let diff = x - mean;
                log_likelihood -= ((two_pi * var).ln() + diff * diff / var) / two;
            }
            *score += log_likelihood;
        }
        Ok(jll)
    }
}

impl<F: Float> Default for GaussianNb<F> {
    fn default() -> Self {
        Self::new(F::constant(1e-9))
    }
}

impl<F: Float> Classifier<F> for GaussianNb<F> {
    /// # Errors
    ///
    /// Returns `ClassifierError::InvalidParameter` for a negative or NaN
    /// `var_smoothing`.
    fn fit(
        &mut self,
        x: ArrayView2<F>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<(), ClassifierError> {
        if !(self.var_smoothing >= F::zero()) {
            return Err(ClassifierError::InvalidParameter(
                "var_smoothing must be non-negative".into(),
            ));
        }
        validate_training_set(x, y, n_classes)?;

        let n_features = x.ncols();
        let counts = class_counts(y, 0..y.len(), n_classes);
        let max_variance = x
            .var_axis(Axis(0), F::zero())
            .iter()
            .fold(F::zero(), |acc, &v| acc.max(v));
        let epsilon = (self.var_smoothing * max_variance).max(F::min_positive_value());

        let mut means = Array2::zeros((n_classes, n_features));
        let mut variances = Array2::from_elem((n_classes, n_features), epsilon);
        for (class, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
            let members = x.select(Axis(0), &rows);
            if let Some(mean) = members.mean_axis(Axis(0)) {
                means.row_mut(class).assign(&mean);
            }
            let var = members.var_axis(Axis(0), F::zero()) + epsilon;
            variances.row_mut(class).assign(&var);
        }

        let total = F::from_count(y.len());
        let priors = counts.iter().map(|&c| F::from_count(c) / total).collect();

        self.means = Some(means);
        self.variances = Some(variances);
        self.priors = Some(priors);
        Ok(())
    }

    fn predict(&self, features: ArrayView1<F>) -> Result<usize, ClassifierError> {
        let jll = self.joint_log_likelihood(features)?;
        Ok(argmax(jll.view()))
    }

    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "naive_bayes",
            supports_probabilities: true,
            supports_feature_importance: false,
        }
    }

    fn predict_proba(&self, features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        let jll = self.joint_log_likelihood(features)?;
        // log-sum-exp around the maximum keeps the exponentials in range
        let max = jll.iter().fold(F::neg_infinity(), |acc, &v| acc.max(v));
        let exp = jll.mapv(|v| (v - max).exp());
        let norm = exp.sum();
        Ok(exp / norm)
    }
}
