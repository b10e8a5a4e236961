use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use approx::assert_abs_diff_eq;
use croprec::artifact::DEFAULT_BUNDLE_FILE;
use croprec::error::{
    ArtifactError, DatasetError, ModelNotLoadedError, PredictionError, ValidationError,
};
use croprec::trainer;
use croprec::{
    Algorithm, DatasetLoader, Feature, FeatureVector, LabelEncoder, PipelineConfig,
    PredictionService, TrainingPipeline,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde_json::json;
use tempfile::TempDir;

const CROPS: [&str; 22] = [
    "apple",
    "banana",
    "blackgram",
    "chickpea",
    "coconut",
    "coffee",
    "cotton",
    "grapes",
    "jute",
    "kidneybeans",
    "lentil",
    "maize",
    "mango",
    "mothbeans",
    "mungbean",
    "muskmelon",
    "orange",
    "papaya",
    "pigeonpeas",
    "pomegranate",
    "rice",
    "watermelon",
];

const HEADER: &str = "N,P,K,temperature,humidity,ph,rainfall,label\n";

fn row(values: &[f64; 7], label: &str) -> String {
    let cells: Vec<String> = values.iter().map(|v| format!("{:.3}", v)).collect();
    format!("{},{}\n", cells.join(","), label)
}

/// 100 rows for each of the 22 crops. Every crop sits in its own band of
/// every feature's admissible range, so the classes are separable and all
/// rows pass request validation.
fn synthetic_csv() -> String {
    const MULTIPLIERS: [usize; 7] = [1, 3, 5, 7, 9, 13, 15];
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2200);
    let mut csv = String::from(HEADER);
    for (c, crop) in CROPS.iter().enumerate() {
        for _ in 0..100 {
            let mut values = [0.0; 7];
            for (i, feature) in Feature::ALL.into_iter().enumerate() {
                let (min, max) = feature.range();
                let band = (c * MULTIPLIERS[i]) % CROPS.len();
                let jitter: f64 = rng.random_range(-0.3..0.3);
                let frac = (band as f64 + 0.5 + jitter) / CROPS.len() as f64;
                values[i] = min + frac * (max - min);
            }
            csv.push_str(&row(&values, crop));
        }
    }
    csv
}

/// Rice, maize and chickpea in non-overlapping bands, placed so that every
/// feature of the rice-like request falls on the rice side.
fn three_crop_csv() -> String {
    let centres: [(&str, [f64; 7], [f64; 7]); 3] = [
        (
            "rice",
            [85.0, 42.0, 40.0, 21.0, 82.0, 6.5, 236.0],
            [8.0, 4.0, 3.0, 1.0, 2.0, 0.3, 10.0],
        ),
        (
            "maize",
            [70.0, 55.0, 20.0, 24.5, 65.0, 5.8, 85.0],
            [8.0, 4.0, 3.0, 1.0, 3.0, 0.3, 10.0],
        ),
        (
            "chickpea",
            [40.0, 68.0, 80.0, 18.0, 17.0, 7.3, 80.0],
            [8.0, 5.0, 3.0, 1.0, 1.5, 0.3, 8.0],
        ),
    ];
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let mut csv = String::from(HEADER);
    for (crop, centre, spread) in centres {
        for _ in 0..40 {
            let mut values = [0.0; 7];
            for i in 0..7 {
                values[i] = centre[i] + rng.random_range(-spread[i]..spread[i]);
            }
            csv.push_str(&row(&values, crop));
        }
    }
    csv
}

fn write_csv(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("crops.csv");
    fs::write(&path, contents).unwrap();
    path
}

fn config(dir: &Path, dataset: PathBuf, algorithms: &[Algorithm]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.dataset.path = dataset;
    config.artifacts.bundle_path = dir.join("models").join(DEFAULT_BUNDLE_FILE);
    config.training.algorithms = algorithms.to_vec();
    config.training.cv_folds = 3;
    config.training.random_forest.n_estimators = 10;
    config.training.logistic_regression.max_iter = 200;
    config.training.linear_svm.epochs = 10;
    config
}

fn rice_like() -> FeatureVector {
    FeatureVector::new([90.0, 42.0, 43.0, 20.8, 82.0, 6.5, 202.9])
}

#[test]
fn stratified_split_keeps_class_proportions() {
    let dir = TempDir::new().unwrap();
    let path = write_csv(dir.path(), &synthetic_csv());
    let dataset = DatasetLoader::default().load(&path).unwrap();
    assert_eq!(dataset.len(), 2200);
    assert_eq!(dataset.class_distribution().len(), 22);

    let encoder = LabelEncoder::fit(&dataset.labels);
    let labels = encoder.encode_all(&dataset.labels).unwrap();
    let split = trainer::split(dataset.features.view(), &labels, 0.2, 42, true).unwrap();

    assert_eq!(split.test.len(), 440);
    assert_eq!(split.train.len(), 1760);
    for class in 0..22 {
        let in_test = split.test.labels.iter().filter(|&&l| l == class).count();
        let in_train = split.train.labels.iter().filter(|&&l| l == class).count();
        assert_eq!(in_test, 20, "class {}", encoder.decode(class).unwrap());
        assert_eq!(in_train, 80);
    }

    let again = trainer::split(dataset.features.view(), &labels, 0.2, 42, true).unwrap();
    assert_eq!(split, again);
}

#[test]
fn trained_service_only_predicts_known_crops() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &synthetic_csv());
    let config = config(
        dir.path(),
        dataset,
        &[
            Algorithm::RandomForest,
            Algorithm::DecisionTree,
            Algorithm::NaiveBayes,
        ],
    );
    let outcome = TrainingPipeline::new(config.clone()).run().unwrap();
    assert!(outcome.bundle_path.exists());
    assert_eq!(outcome.report.test_samples, 440);
    assert_eq!(outcome.report.confusion_matrix.total(), 440);
    assert_eq!(outcome.report.candidates.len(), 3);
    assert!(outcome.report.metrics.accuracy > 0.95);
    let cv = outcome.report.cross_validation.as_ref().unwrap();
    assert!(cv.min <= cv.mean && cv.mean <= cv.max);

    let service = PredictionService::new(
        &config.artifacts.bundle_path,
        config.artifacts.load_timeout(),
    );
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
    for _ in 0..50 {
        let mut input = FeatureVector::default();
        for feature in Feature::ALL {
            let (min, max) = feature.range();
            input.set(feature, rng.random_range(min..=max));
        }
        let prediction = service.predict(&input).unwrap();
        assert!(CROPS.contains(&prediction.crop.as_str()));
        if let Some(probabilities) = prediction.probabilities {
            assert_eq!(probabilities.len(), 22);
            assert!(probabilities.values().all(|p| (0.0..=1.0).contains(p)));
            assert_abs_diff_eq!(probabilities.values().sum::<f64>(), 1.0, epsilon = 1e-9);
            let top = probabilities
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(crop, _)| crop.clone())
                .unwrap();
            assert_eq!(probabilities[&top], probabilities[&prediction.crop]);
        }
    }
}

#[test]
fn rice_like_request_predicts_rice() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &three_crop_csv());
    let config = config(dir.path(), dataset, &Algorithm::ALL);
    let outcome = TrainingPipeline::new(config).run().unwrap();
    assert_eq!(outcome.bundle.classes(), ["chickpea", "maize", "rice"]);

    let service = PredictionService::from_bundle(outcome.bundle);
    let response = service
        .predict_json(&json!({
            "nitrogen": 90, "phosphorus": 42, "potassium": 43, "temperature": 20.8,
            "humidity": 82, "ph": 6.5, "rainfall": 202.9
        }))
        .unwrap();
    assert_eq!(response.prediction, "rice");
    assert_eq!(response.input_data, rice_like());
}

#[test]
fn out_of_range_temperature_cites_bound() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &three_crop_csv());
    let config = config(dir.path(), dataset, &[Algorithm::NaiveBayes]);
    let outcome = TrainingPipeline::new(config).run().unwrap();
    let service = PredictionService::from_bundle(outcome.bundle);

    let err = service
        .predict_json(&json!({
            "nitrogen": 90, "phosphorus": 42, "potassium": 43, "temperature": 200,
            "humidity": 82, "ph": 6.5, "rainfall": 202.9
        }))
        .unwrap_err();
    match &err {
        PredictionError::Validation(ValidationError::OutOfRange { feature, max, .. }) => {
            assert_eq!(*feature, Feature::Temperature);
            assert_eq!(*max, 43.7);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("43.7"));
}

#[test]
fn service_recovers_once_a_bundle_is_trained() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &three_crop_csv());
    let config = config(dir.path(), dataset, &[Algorithm::DecisionTree]);
    let service = PredictionService::new(
        &config.artifacts.bundle_path,
        Duration::from_secs(5),
    );

    let err = service.predict(&rice_like()).unwrap_err();
    assert!(matches!(
        err,
        PredictionError::ModelNotLoaded(ModelNotLoadedError::Missing(_))
    ));

    TrainingPipeline::new(config).run().unwrap();
    assert_eq!(service.predict(&rice_like()).unwrap().crop, "rice");
    assert!(service.is_loaded());
}

#[test]
fn tampered_bundle_is_refused() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &three_crop_csv());
    let config = config(dir.path(), dataset, &[Algorithm::NaiveBayes]);
    TrainingPipeline::new(config.clone()).run().unwrap();

    let service = PredictionService::new(&config.artifacts.bundle_path, Duration::from_secs(5));
    assert!(service.predict(&rice_like()).is_ok());

    let path = &config.artifacts.bundle_path;
    let text = fs::read_to_string(path).unwrap();
    fs::write(path, text.replace("\"maize\"", "\"wheat\"")).unwrap();

    let err = service.reload().unwrap_err();
    assert!(matches!(
        err,
        ModelNotLoadedError::Invalid(ArtifactError::ChecksumMismatch { .. })
    ));
    // the previously loaded bundle keeps serving
    assert_eq!(service.predict(&rice_like()).unwrap().crop, "rice");
}

#[test]
fn model_without_probabilities_omits_them() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &three_crop_csv());
    let config = config(dir.path(), dataset, &[Algorithm::LinearSvm]);
    let outcome = TrainingPipeline::new(config).run().unwrap();
    assert!(outcome.report.feature_importance.is_none());

    let service = PredictionService::from_bundle(outcome.bundle);
    let response = service.predict_json(&json!({
        "nitrogen": 40, "phosphorus": 68, "potassium": 80, "temperature": 18.0,
        "humidity": 17, "ph": 7.3, "rainfall": 80
    }));
    let response = response.unwrap();
    assert_eq!(response.prediction, "chickpea");
    assert!(response.probabilities.is_none());
    let body = serde_json::to_value(&response).unwrap();
    assert!(body.get("probabilities").is_none());
    assert!(body.get("input_data").is_some());
}

#[test]
fn evaluate_is_reproducible_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), &three_crop_csv());
    let config = config(
        dir.path(),
        dataset,
        &[Algorithm::RandomForest, Algorithm::NaiveBayes],
    );
    let pipeline = TrainingPipeline::new(config.clone());

    let first = pipeline.evaluate().unwrap();
    let second = pipeline.evaluate().unwrap();
    assert!(!config.artifacts.bundle_path.exists());

    assert_eq!(first.selected, second.selected);
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.confusion_matrix, second.confusion_matrix);
    assert_eq!(first.feature_importance, second.feature_importance);
    assert_eq!(first.candidates, second.candidates);
    assert_eq!(first.per_class.len(), 3);

    let report_path = dir.path().join("report.json");
    first.write_json(&report_path).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["classes"], json!(["chickpea", "maize", "rice"]));
}

#[test]
fn missing_dataset_column_aborts_training() {
    let dir = TempDir::new().unwrap();
    let dataset = write_csv(dir.path(), "N,P,K,temperature,humidity,ph,label\n1,2,3,4,5,6,rice\n");
    let config = config(dir.path(), dataset, &[Algorithm::NaiveBayes]);
    let err = TrainingPipeline::new(config).run().unwrap_err();
    assert!(matches!(
        err,
        croprec::Error::Dataset(DatasetError::MissingColumn(ref c)) if c == "rainfall"
    ));
}
