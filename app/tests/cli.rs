//! Drives the `croprec` binary end to end on a small three-crop dataset.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const HEADER: &str = "N,P,K,temperature,humidity,ph,rainfall,label\n";

const RICE_LIKE: &str = r#"{"nitrogen": 90, "phosphorus": 42, "potassium": 43,
    "temperature": 20.8, "humidity": 82, "ph": 6.5, "rainfall": 202.9}"#;

fn croprec() -> Command {
    Command::cargo_bin("croprec").unwrap()
}

/// Thirty rows per crop, spread evenly around a centre.
fn dataset_csv() -> String {
    let crops: [(&str, [f64; 7], [f64; 7]); 3] = [
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
    let mut csv = String::from(HEADER);
    for (crop, centre, spread) in crops {
        for k in 0..30 {
            // offsets cycle through -0.9..=0.9 of the spread
            let t = ((k * 7) % 19) as f64 / 10.0 - 0.9;
            let values: Vec<String> = centre
                .iter()
                .zip(spread)
                .map(|(c, s)| format!("{:.3}", c + t * s))
                .collect();
            csv.push_str(&format!("{},{}\n", values.join(","), crop));
        }
    }
    csv
}

struct Workspace {
    dir: TempDir,
    config: PathBuf,
    bundle: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("crops.csv");
        fs::write(&dataset, dataset_csv()).unwrap();
        let bundle = dir.path().join("models").join("crop_model.bundle.json");

        let config = dir.path().join("croprec.toml");
        let toml = format!(
            "[dataset]\npath = '{}'\n\n\
             [split]\nseed = 7\n\n\
             [training]\nalgorithms = [\"decision_tree\", \"naive_bayes\"]\ncv_folds = 3\n\n\
             [artifacts]\nbundle_path = '{}'\n",
            dataset.display(),
            bundle.display()
        );
        fs::write(&config, toml).unwrap();

        Self {
            dir,
            config,
            bundle,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn train(&self) {
        croprec()
            .arg("train")
            .arg("--config")
            .arg(&self.config)
            .assert()
            .success();
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_train_writes_bundle_and_report() {
    let ws = Workspace::new();
    let report = ws.path("report.json");

    croprec()
        .arg("train")
        .arg("--config")
        .arg(&ws.config)
        .arg("--report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("selected:"))
        .stdout(predicate::str::contains("bundle:"));

    assert!(ws.bundle.exists());
    let report = read_json(&report);
    assert_eq!(report["classes"], serde_json::json!(["chickpea", "maize", "rice"]));
    assert_eq!(report["candidates"].as_array().unwrap().len(), 2);
}

#[test]
fn test_evaluate_prints_report_without_saving() {
    let ws = Workspace::new();

    let output = croprec()
        .arg("evaluate")
        .arg("--config")
        .arg(&ws.config)
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["confusion_matrix"].is_object());
    assert!(!ws.bundle.exists());
}

#[test]
fn test_predict_from_file_and_stdin() {
    let ws = Workspace::new();
    ws.train();
    let request = ws.path("request.json");
    fs::write(&request, RICE_LIKE).unwrap();

    let output = croprec()
        .arg("predict")
        .arg("--model")
        .arg(&ws.bundle)
        .arg("--input")
        .arg(&request)
        .output()
        .unwrap();
    assert!(output.status.success());
    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["prediction"], "rice");
    assert_eq!(response["input_data"]["rainfall"], 202.9);

    croprec()
        .arg("predict")
        .arg("--model")
        .arg(&ws.bundle)
        .write_stdin(RICE_LIKE)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"prediction\": \"rice\""));
}

#[test]
fn test_predict_rejects_out_of_range_field() {
    let ws = Workspace::new();
    ws.train();
    let request = RICE_LIKE.replace("\"temperature\": 20.8", "\"temperature\": 200");

    croprec()
        .arg("predict")
        .arg("--model")
        .arg(&ws.bundle)
        .write_stdin(request)
        .assert()
        .failure()
        .stdout(predicate::str::contains("temperature"))
        .stdout(predicate::str::contains("43.7"));
}

#[test]
fn test_predict_without_model_reports_error_body() {
    let ws = Workspace::new();

    let output = croprec()
        .arg("predict")
        .arg("--model")
        .arg(&ws.bundle)
        .write_stdin(RICE_LIKE)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(body["error"].is_string());
}

#[test]
fn test_missing_config_fails() {
    let ws = Workspace::new();

    croprec()
        .arg("train")
        .arg("--config")
        .arg(ws.path("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading config"));
}

#[test]
fn test_invalid_json_request_fails() {
    let ws = Workspace::new();

    croprec()
        .arg("predict")
        .arg("--model")
        .arg(&ws.bundle)
        .write_stdin("nitrogen=90")
        .assert()
        .failure()
        .stderr(predicate::str::contains("request is not JSON"));
}
