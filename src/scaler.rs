//! Standardisation of feature columns.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::dataset::FeatureVector;
use crate::error::ScalerError;

/// Fits a [`ScalerArtifact`]. Only ever fitted on the training partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureScaler;

impl FeatureScaler {
    /// Per-column mean and population standard deviation. Columns with zero
    /// spread get a scale of 1 so they pass through centred but unscaled.
    pub fn fit(features: ArrayView2<f64>) -> Result<ScalerArtifact, ScalerError> {
        if features.nrows() == 0 {
            return Err(ScalerError::Empty);
        }
        if let Some(column) = features
            .axis_iter(Axis(1))
            .position(|col| col.iter().any(|v| !v.is_finite()))
        {
            return Err(ScalerError::NonFinite(column));
        }

        let mean = features.mean_axis(Axis(0)).ok_or(ScalerError::Empty)?;
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 { s } else { 1.0 });
        Ok(ScalerArtifact { mean, scale })
    }
}

/// Fitted scaling parameters, persisted alongside the model they were fitted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl ScalerArtifact {
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ScalerError> {
        self.check(features.ncols())?;
        Ok((&features - &self.mean) / &self.scale)
    }

    pub fn transform_vector(&self, vector: &FeatureVector) -> Result<Array1<f64>, ScalerError> {
        let values = vector.to_array();
        self.check(values.len())?;
        Ok((values - &self.mean) / &self.scale)
    }

    fn check(&self, found: usize) -> Result<(), ScalerError> {
        if found != self.n_features() {
            return Err(ScalerError::DimensionMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_fit_and_transform() {
        let x = array![[1.0, 10.0, 5.0], [3.0, 30.0, 5.0]];
        let scaler = FeatureScaler::fit(x.view()).unwrap();
        assert_eq!(scaler.mean, array![2.0, 20.0, 5.0]);
        assert_eq!(scaler.scale, array![1.0, 10.0, 1.0]);

        let z = scaler.transform(x.view()).unwrap();
        assert_abs_diff_eq!(z, array![[-1.0, -1.0, 0.0], [1.0, 1.0, 0.0]], epsilon = 1e-12);
    }

    #[test]
    fn test_transform_vector_matches_matrix() {
        let x = array![
            [90.0, 42.0, 43.0, 20.8, 82.0, 6.5, 202.9],
            [40.0, 72.0, 77.0, 17.0, 16.9, 7.4, 88.5],
            [70.0, 50.0, 20.0, 25.0, 60.0, 6.0, 80.0],
        ];
        let scaler = FeatureScaler::fit(x.view()).unwrap();
        let v = FeatureVector::new([90.0, 42.0, 43.0, 20.8, 82.0, 6.5, 202.9]);
        let from_vector = scaler.transform_vector(&v).unwrap();
        let from_matrix = scaler.transform(x.view()).unwrap();
        assert_eq!(from_vector, from_matrix.row(0));
    }

    #[test]
    fn test_dimension_mismatch() {
        let scaler = FeatureScaler::fit(array![[1.0, 2.0]].view()).unwrap();
        assert_eq!(
            scaler.transform(array![[1.0, 2.0, 3.0]].view()),
            Err(ScalerError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        );
        assert!(scaler
            .transform_vector(&FeatureVector::default())
            .is_err());
    }

    #[test]
    fn test_fit_rejects_empty_and_non_finite() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert_eq!(FeatureScaler::fit(empty.view()), Err(ScalerError::Empty));
        let x = array![[1.0, f64::NAN], [2.0, 3.0]];
        assert_eq!(FeatureScaler::fit(x.view()), Err(ScalerError::NonFinite(1)));
    }

    proptest! {
        #[test]
        fn transform_is_deterministic(
            rows in prop::collection::vec(prop::array::uniform7(-500.0f64..500.0), 2..40)
        ) {
            let flat: Vec<f64> = rows.iter().flatten().copied().collect();
            let x = Array2::from_shape_vec((rows.len(), 7), flat).unwrap();
            let scaler = FeatureScaler::fit(x.view()).unwrap();
            let a = scaler.transform(x.view()).unwrap();
            let b = scaler.transform(x.view()).unwrap();
            prop_assert_eq!(a, b);

            let v = FeatureVector::new(rows[0]);
            let first = scaler.transform_vector(&v).unwrap();
            let second = scaler.transform_vector(&v).unwrap();
            prop_assert!(first.iter().zip(second.iter()).all(|(p, q)| p.to_bits() == q.to_bits()));
        }
    }
}
