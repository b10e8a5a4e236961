use crate::Float;
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// Errors shared by every classifier in the workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// Cannot fit on an empty training set
    EmptyTrainingSet,
    /// Feature count differs from what the model expects
    DimensionMismatch { expected: usize, found: usize },
    /// A class index is not below the declared number of classes
    LabelOutOfRange { label: usize, n_classes: usize },
    /// NaN or infinite values in the training features
    NonFiniteInput,
    /// A hyperparameter is outside its valid domain
    InvalidParameter(String),
    /// `predict` was called before `fit`
    NotFitted,
    /// Optimisation produced non-finite parameters
    Diverged(String),
    /// The model does not offer the requested capability
    Unsupported(&'static str),
}

impl Display for ClassifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierError::EmptyTrainingSet => write!(f, "Cannot fit on an empty training set"),
            ClassifierError::DimensionMismatch { expected, found } => write!(
                f,
                "Expected {} features per sample, found {}",
                expected, found
            ),
            ClassifierError::LabelOutOfRange { label, n_classes } => write!(
                f,
                "Class index {} is out of range for {} classes",
                label, n_classes
            ),
            ClassifierError::NonFiniteInput => {
                write!(f, "Training features contain NaN or infinite values")
            }
            ClassifierError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            ClassifierError::NotFitted => write!(f, "Model has not been fitted"),
            ClassifierError::Diverged(msg) => write!(f, "Training did not converge: {}", msg),
            ClassifierError::Unsupported(what) => write!(f, "Model does not support {}", what),
        }
    }
}

impl Error for ClassifierError {}

/// Static facts about a classifier that callers query before using optional
/// capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub supports_probabilities: bool,
    pub supports_feature_importance: bool,
}

/// The common interface of every classifier in the workspace.
///
/// Labels are class indices in `0..n_classes`; mapping them to names is the
/// caller's business.
pub trait Classifier<F: Float> {
    /// Fits the model on the rows of `x` labelled by `y`.
    ///
    /// # Arguments
    ///
    /// * `x`: One row per training sample.
    /// * `y`: Class index of every row, each below `n_classes`.
    /// * `n_classes`: Number of classes the model will distinguish.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::EmptyTrainingSet`, `DimensionMismatch`,
    /// `LabelOutOfRange` or `NonFiniteInput` when `x` and `y` fail
    /// [`validate_training_set`].
    /// Returns `ClassifierError::InvalidParameter` for unusable hyperparameters
    /// and `ClassifierError::Diverged` when optimisation blows up.
    fn fit(&mut self, x: ArrayView2<F>, y: &[usize], n_classes: usize)
    -> Result<(), ClassifierError>;

    /// Predicts the class index of a single sample.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::NotFitted` before `fit` and
    /// `ClassifierError::DimensionMismatch` for a sample of the wrong width.
    fn predict(&self, features: ArrayView1<F>) -> Result<usize, ClassifierError>;

    fn descriptor(&self) -> ModelDescriptor;

    /// Class probabilities for a single sample, indexed by class.
    ///
    /// Only meaningful when `descriptor().supports_probabilities` is set.
    ///
    /// # Errors
    ///
    /// Returns `ClassifierError::Unsupported` unless the model overrides this.
    /// Implementations return the same errors as [`Classifier::predict`].
    fn predict_proba(&self, _features: ArrayView1<F>) -> Result<Array1<F>, ClassifierError> {
        Err(ClassifierError::Unsupported("probability estimates"))
    }

    /// Normalised per-feature importances, if the model can compute them.
    fn feature_importances(&self) -> Option<Array1<F>> {
        None
    }

    fn predict_many(&self, x: ArrayView2<F>) -> Result<Vec<usize>, ClassifierError> {
        x.rows().into_iter().map(|row| self.predict(row)).collect()
    }
}

/// Checks the invariants every `fit` implementation relies on.
pub fn validate_training_set<F: Float>(
    x: ArrayView2<F>,
    y: &[usize],
    n_classes: usize,
) -> Result<(), ClassifierError> {
    if x.nrows() == 0 || y.is_empty() {
        return Err(ClassifierError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::DimensionMismatch {
            expected: x.nrows(),
            found: y.len(),
        });
    }
    if x.ncols() == 0 {
        return Err(ClassifierError::DimensionMismatch {
            expected: 1,
            found: 0,
        });
    }
    if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
        return Err(ClassifierError::LabelOutOfRange { label, n_classes });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::NonFiniteInput);
    }
    Ok(())
}

pub fn ensure_dimensions(expected: usize, found: usize) -> Result<(), ClassifierError> {
    if expected == found {
        Ok(())
    } else {
        Err(ClassifierError::DimensionMismatch { expected, found })
    }
}

/// Index of the largest value. Ties go to the lowest index, NaN never wins.
pub fn argmax<F: Float>(values: ArrayView1<F>) -> usize {
    let mut best = 0;
    let mut best_value = F::neg_infinity();
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Number of samples per class among `indices`.
pub fn class_counts<I>(y: &[usize], indices: I, n_classes: usize) -> Vec<usize>
where
    I: IntoIterator<Item = usize>,
{
    let mut counts = vec![0; n_classes];
    for i in indices {
        counts[y[i]] += 1;
    }
    counts
}
