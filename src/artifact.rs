//! The persisted model bundle.
//!
//! A bundle is a single JSON document:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "run_id": "...",
//!   "created_at": "...",
//!   "checksum": "<sha256 of payload>",
//!   "payload": { "feature_order": [...], "classes": [...], "scaler": {...}, "model": {...} }
//! }
//! ```
//!
//! The checksum covers the canonical JSON encoding of `payload`, so a bundle
//! edited after it was written is refused on load.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::dataset::canonical_feature_order;
use crate::error::{ArtifactError, ModelNotLoadedError};
use crate::scaler::ScalerArtifact;
use crate::trainer::TrainedModel;

pub const FORMAT_VERSION: u32 = 1;

pub const DEFAULT_BUNDLE_FILE: &str = "crop_model.bundle.json";

/// What the checksum protects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePayload {
    pub feature_order: Vec<String>,
    pub classes: Vec<String>,
    pub scaler: ScalerArtifact,
    pub model: TrainedModel,
}

/// A trained model and the scaler fitted with it.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub format_version: u32,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub payload: BundlePayload,
}

#[derive(Serialize, Deserialize)]
struct RawBundle {
    format_version: u32,
    run_id: String,
    created_at: DateTime<Utc>,
    checksum: String,
    payload: serde_json::Value,
}

fn checksum(payload: &serde_json::Value) -> Result<String, ArtifactError> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Identifier of a training run: UTC timestamp plus the split seed.
pub fn new_run_id(seed: u64) -> String {
    format!("{}-s{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"), seed)
}

impl ModelBundle {
    pub fn new(
        model: TrainedModel,
        scaler: ScalerArtifact,
        run_id: impl Into<String>,
    ) -> Result<Self, ArtifactError> {
        let payload = BundlePayload {
            feature_order: model.feature_order.clone(),
            classes: model.classes.clone(),
            scaler,
            model,
        };
        let checksum = checksum(&serde_json::to_value(&payload)?)?;
        let bundle = Self {
            format_version: FORMAT_VERSION,
            run_id: run_id.into(),
            created_at: Utc::now(),
            checksum,
            payload,
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }

    pub fn model(&self) -> &TrainedModel {
        &self.payload.model
    }

    pub fn scaler(&self) -> &ScalerArtifact {
        &self.payload.scaler
    }

    pub fn classes(&self) -> &[String] {
        &self.payload.classes
    }

    fn check_consistency(&self) -> Result<(), ArtifactError> {
        let expected = canonical_feature_order();
        if self.payload.feature_order != expected {
            return Err(ArtifactError::FeatureOrderMismatch {
                found: self.payload.feature_order.clone(),
                expected,
            });
        }
        if self.payload.model.feature_order != self.payload.feature_order {
            return Err(ArtifactError::Inconsistent(
                "model and bundle disagree on feature order".into(),
            ));
        }
        if self.payload.model.classes != self.payload.classes {
            return Err(ArtifactError::Inconsistent(
                "model and bundle disagree on class names".into(),
            ));
        }
        if self.payload.classes.is_empty() {
            return Err(ArtifactError::Inconsistent("bundle lists no classes".into()));
        }
        if self.payload.scaler.n_features() != self.payload.feature_order.len() {
            return Err(ArtifactError::Inconsistent(format!(
                "scaler has {} features, bundle lists {}",
                self.payload.scaler.n_features(),
                self.payload.feature_order.len()
            )));
        }
        Ok(())
    }

    /// Writes the bundle next to `path` and renames it into place, so readers
    /// see either the previous bundle or the complete new one.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let raw = RawBundle {
            format_version: self.format_version,
            run_id: self.run_id.clone(),
            created_at: self.created_at,
            checksum: self.checksum.clone(),
            payload: serde_json::to_value(&self.payload)?,
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer(&mut tmp, &raw)?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        info!(path = %path.display(), run_id = %self.run_id, "saved model bundle");
        Ok(())
    }

    /// Reads a bundle and checks its version, checksum and feature order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bundle = Self::from_json(&text)?;
        debug!(path = %path.display(), run_id = %bundle.run_id, "loaded model bundle");
        Ok(bundle)
    }

    pub fn from_json(text: &str) -> Result<Self, ArtifactError> {
        let raw: RawBundle = serde_json::from_str(text)?;
        if raw.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found: raw.format_version,
                expected: FORMAT_VERSION,
            });
        }
        let computed = checksum(&raw.payload)?;
        if computed != raw.checksum {
            return Err(ArtifactError::ChecksumMismatch {
                recorded: raw.checksum,
                computed,
            });
        }
        let bundle = Self {
            format_version: raw.format_version,
            run_id: raw.run_id,
            created_at: raw.created_at,
            checksum: raw.checksum,
            payload: serde_json::from_value(raw.payload)?,
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }

    /// [`load`](Self::load) on a worker thread, giving up after `timeout`.
    ///
    /// A worker that overruns is left to finish on its own; its result is
    /// dropped.
    pub fn load_with_timeout(
        path: impl AsRef<Path>,
        timeout: Duration,
    ) -> Result<Self, ModelNotLoadedError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ModelNotLoadedError::Missing(path));
        }

        let (tx, rx) = mpsc::channel();
        let worker_path = path.clone();
        thread::Builder::new()
            .name("bundle-loader".into())
            .spawn(move || {
                // the receiver may already have given up
                let _ = tx.send(ModelBundle::load(&worker_path));
            })
            .map_err(|source| {
                ModelNotLoadedError::Invalid(ArtifactError::Io {
                    path: path.clone(),
                    source,
                })
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(ModelNotLoadedError::Invalid),
            Err(_) => Err(ModelNotLoadedError::TimedOut(timeout)),
        }
    }
}
