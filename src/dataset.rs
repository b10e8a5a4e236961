//! Crop dataset loading and the fixed feature schema.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::{DatasetError, ValidationError};

/// Number of soil and climate readings per sample.
pub const N_FEATURES: usize = 7;

/// Default name of the label column in the training CSV.
pub const LABEL_COLUMN: &str = "label";

/// One of the seven soil and climate readings, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Nitrogen,
    Phosphorus,
    Potassium,
    Temperature,
    Humidity,
    Ph,
    Rainfall,
}

impl Feature {
    /// Every feature in the order models are trained on.
    pub const ALL: [Feature; N_FEATURES] = [
        Feature::Nitrogen,
        Feature::Phosphorus,
        Feature::Potassium,
        Feature::Temperature,
        Feature::Humidity,
        Feature::Ph,
        Feature::Rainfall,
    ];

    /// Position in a [`FeatureVector`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Key used in prediction requests.
    pub fn key(self) -> &'static str {
        match self {
            Feature::Nitrogen => "nitrogen",
            Feature::Phosphorus => "phosphorus",
            Feature::Potassium => "potassium",
            Feature::Temperature => "temperature",
            Feature::Humidity => "humidity",
            Feature::Ph => "ph",
            Feature::Rainfall => "rainfall",
        }
    }

    /// Column header in the training CSV.
    pub fn column(self) -> &'static str {
        match self {
            Feature::Nitrogen => "N",
            Feature::Phosphorus => "P",
            Feature::Potassium => "K",
            other => other.key(),
        }
    }

    /// Admissible `(min, max)` at inference time, both inclusive.
    pub fn range(self) -> (f64, f64) {
        match self {
            Feature::Nitrogen => (0.0, 140.0),
            Feature::Phosphorus => (0.0, 145.0),
            Feature::Potassium => (0.0, 205.0),
            Feature::Temperature => (8.8, 43.7),
            Feature::Humidity => (14.3, 99.98),
            Feature::Ph => (3.5, 9.9),
            Feature::Rainfall => (20.2, 298.6),
        }
    }

    pub fn from_key(key: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.key() == key)
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Keys of [`Feature::ALL`], the order recorded in every model bundle.
pub fn canonical_feature_order() -> Vec<String> {
    Feature::ALL.iter().map(|f| f.key().to_string()).collect()
}

/// The seven readings of one field, in canonical order.
///
/// Deserializes from an object keyed by request key; every feature must be
/// present.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(try_from = "BTreeMap<Feature, f64>")]
pub struct FeatureVector([f64; N_FEATURES]);

impl FeatureVector {
    pub fn new(values: [f64; N_FEATURES]) -> Self {
        Self(values)
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        self.0[feature.index()] = value;
    }

    pub fn values(&self) -> &[f64; N_FEATURES] {
        &self.0
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.0.to_vec())
    }

    /// `(feature, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.into_iter().zip(self.0.iter().copied())
    }
}

impl TryFrom<BTreeMap<Feature, f64>> for FeatureVector {
    type Error = ValidationError;

    fn try_from(map: BTreeMap<Feature, f64>) -> Result<Self, Self::Error> {
        let mut vector = FeatureVector::default();
        for feature in Feature::ALL {
            let value = map
                .get(&feature)
                .copied()
                .ok_or(ValidationError::MissingField(feature))?;
            vector.set(feature, value);
        }
        Ok(vector)
    }
}

// Serialized as an object keyed by request key, in canonical order.
impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(N_FEATURES))?;
        for (feature, value) in self.iter() {
            map.serialize_entry(feature.key(), &value)?;
        }
        map.end()
    }
}

/// A labelled row of the training set.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: FeatureVector,
    pub label: String,
}

/// Feature matrix (`n_samples x 7`, canonical column order) and crop labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub labels: Vec<String>,
}

impl Dataset {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut features = Array2::zeros((samples.len(), N_FEATURES));
        for (mut row, sample) in features.rows_mut().into_iter().zip(samples) {
            row.assign(&sample.features.to_array());
        }
        Self {
            features,
            labels: samples.iter().map(|s| s.label.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn sample(&self, index: usize) -> Option<Sample> {
        let label = self.labels.get(index)?.clone();
        let row = self.features.row(index);
        let mut values = [0.0; N_FEATURES];
        for (slot, &v) in values.iter_mut().zip(row.iter()) {
            *slot = v;
        }
        Some(Sample {
            features: FeatureVector::new(values),
            label,
        })
    }

    /// Number of samples per crop, sorted by crop name.
    pub fn class_distribution(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Reads the crop CSV.
///
/// Columns are located by header name, so their order in the file does not
/// matter and extra columns are ignored. All required columns are checked
/// before any record is parsed.
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    label_column: String,
}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self {
            label_column: LABEL_COLUMN.to_string(),
        }
    }
}

impl DatasetLoader {
    pub fn with_label_column(label_column: impl Into<String>) -> Self {
        Self {
            label_column: label_column.into(),
        }
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Dataset, DatasetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = self.load_from_reader(file)?;
        debug!(path = %path.display(), rows = dataset.len(), "loaded dataset");
        Ok(dataset)
    }

    pub fn load_from_reader<R: Read>(&self, reader: R) -> Result<Dataset, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
        };
        let mut columns = [0usize; N_FEATURES];
        for (slot, feature) in columns.iter_mut().zip(Feature::ALL) {
            *slot = position(feature.column())?;
        }
        let label_column = position(&self.label_column)?;

        let mut values = Vec::new();
        let mut labels = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let row = i + 1;
            for (&column, feature) in columns.iter().zip(Feature::ALL) {
                let raw = record.get(column).unwrap_or("");
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| DatasetError::InvalidValue {
                        row,
                        column: feature.column().to_string(),
                        value: raw.to_string(),
                    })?;
                values.push(value);
            }
            let label = record.get(label_column).unwrap_or("");
            if label.is_empty() {
                return Err(DatasetError::EmptyLabel { row });
            }
            labels.push(label.to_string());
        }

        if labels.is_empty() {
            return Err(DatasetError::Empty);
        }
        let features = Array2::from_shape_vec((labels.len(), N_FEATURES), values)
            .map_err(|_| DatasetError::Empty)?;
        Ok(Dataset { features, labels })
    }
}

/// Maps crop names to class indices. Classes are sorted by name, which is also
/// the row and column order of confusion matrices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn from_classes(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
    }

    /// Encodes every label; `None` if any label is unknown.
    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Option<Vec<usize>> {
        labels.iter().map(|l| self.encode(l.as_ref())).collect()
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }
}
