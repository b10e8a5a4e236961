use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use croprec::prediction::ErrorBody;
use croprec::{EvaluationReport, PipelineConfig, PredictionService, TrainingPipeline};
use tracing::info;

fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_toml_file(path)
        .with_context(|| format!("loading config {}", path.display()))
}

fn print_summary(report: &EvaluationReport) {
    println!(
        "{:<22} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "model", "accuracy", "precision", "recall", "f1", "cv mean"
    );
    for c in &report.candidates {
        let cv = c
            .cv_mean
            .map(|m| format!("{:.4}", m))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9}",
            c.algorithm.name(),
            c.metrics.accuracy,
            c.metrics.precision,
            c.metrics.recall,
            c.metrics.f1,
            cv
        );
    }
    println!("selected: {}", report.selected);
    if let Some(ranking) = &report.feature_importance {
        println!("feature importance:");
        for f in ranking {
            println!("  {:<12} {:.4}", f.feature, f.importance);
        }
    }
}

pub fn train(config: &Path, report: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let outcome = TrainingPipeline::new(config).run()?;
    print_summary(&outcome.report);
    println!("bundle: {}", outcome.bundle_path.display());

    if let Some(path) = report {
        outcome.report.write_json(path)?;
        info!(path = %path.display(), "wrote evaluation report");
    }
    Ok(())
}

pub fn evaluate(config: &Path, report: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let evaluation = TrainingPipeline::new(config).evaluate()?;
    match report {
        Some(path) => {
            evaluation.write_json(path)?;
            print_summary(&evaluation);
        }
        None => println!("{}", serde_json::to_string_pretty(&evaluation)?),
    }
    Ok(())
}

pub fn predict(model: &Path, input: Option<&Path>, timeout_ms: u64) -> Result<()> {
    let raw = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading request {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let body: serde_json::Value = serde_json::from_str(&raw).context("request is not JSON")?;

    let service = PredictionService::new(model, Duration::from_millis(timeout_ms));
    match service.predict_json(&body) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string(&ErrorBody::from(&err))?);
            bail!(err)
        }
    }
}
