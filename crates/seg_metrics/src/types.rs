use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type MetricsResult<T> = Result<T, MetricsError>;

pub const TRAIN: &str = "train";
pub const VAL: &str = "val";

pub const LOSS: &str = "loss";
pub const ACCURACY: &str = "accuracy";
pub const JACCARD: &str = "jaccard";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("zip error at {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("json error in {entry}: {source}")]
    Json {
        entry: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no {metric:?} series for split {split:?}")]
    MissingSeries { split: String, metric: String },
    #[error("best epoch {best} outside recorded epochs 0..{epochs}")]
    BestEpochOutOfRange { best: usize, epochs: usize },
    #[error("inconsistent history: {0}")]
    Inconsistent(String),
    #[error("prediction/target length mismatch: {pred} vs {target}")]
    LengthMismatch { pred: usize, target: usize },
    #[error("predicted label {label} outside 0..{nclasses}")]
    LabelOutOfRange { label: i32, nclasses: usize },
}

/// Canonical split key for metric lookups: `val`, `valid` and `validation`
/// all name the validation series.
pub fn canonical_split(split: &str) -> &str {
    match split {
        "val" | "valid" | "validation" => VAL,
        "train" | "training" => TRAIN,
        other => other,
    }
}

/// Loss, accuracy and mean Jaccard of one split at one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub jaccard: f64,
}
