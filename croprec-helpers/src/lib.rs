use ndarray::{NdFloat, ScalarOperand};

use num_traits::{AsPrimitive, FromPrimitive, NumCast, Signed};
use rand::distr::uniform::SampleUniform;

use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

// Include submodules
mod common;

// Re-export types from submodules
pub use common::{
    argmax, class_counts, ensure_dimensions, validate_training_set, Classifier, ClassifierError,
    ModelDescriptor,
};

pub trait Float:
    NdFloat
    + FromPrimitive
    + Default
    + Signed
    + Sum
    + AsPrimitive<usize>
    + for<'a> AddAssign<&'a Self>
    + for<'a> MulAssign<&'a Self>
    + for<'a> SubAssign<&'a Self>
    + for<'a> DivAssign<&'a Self>
    + num_traits::MulAdd<Output = Self>
    + SampleUniform
    + ScalarOperand
    + std::marker::Unpin
{
    fn cast<T: NumCast>(x: T) -> Option<Self> {
        NumCast::from(x)
    }

    /// Converts an `f64` literal. Exact for `f64`, rounded for `f32`.
    fn constant(x: f64) -> Self {
        Self::from_f64(x).unwrap_or_else(Self::nan)
    }

    /// Converts a count into `Self`. Counts of training samples always fit.
    fn from_count(n: usize) -> Self {
        Self::from_usize(n).unwrap_or_else(Self::max_value)
    }
}

impl Float for f32 {}

impl Float for f64 {}
