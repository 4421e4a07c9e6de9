//! Per-epoch metric series and their on-disk archive.

use crate::types::{
    canonical_split, EpochMetrics, MetricsError, MetricsResult, ACCURACY, JACCARD, LOSS, TRAIN,
    VAL,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const METRICS_ENTRY: &str = "metrics.json";
pub const BEST_EPOCH_ENTRY: &str = "best_epoch.json";

/// `metrics[split][metric][epoch]` plus the epoch with the best validation score.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub metrics: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
    pub best_epoch: usize,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value to `metrics[split][metric]`.
    pub fn push(&mut self, split: &str, metric: &str, value: f64) {
        self.metrics
            .entry(canonical_split(split).to_string())
            .or_default()
            .entry(metric.to_string())
            .or_default()
            .push(value);
    }

    /// Record loss, accuracy and Jaccard of train and val for the next epoch.
    pub fn push_epoch(&mut self, train: EpochMetrics, val: EpochMetrics) {
        for (split, m) in [(TRAIN, train), (VAL, val)] {
            self.push(split, LOSS, m.loss);
            self.push(split, ACCURACY, m.accuracy);
            self.push(split, JACCARD, m.jaccard);
        }
    }

    pub fn series(&self, split: &str, metric: &str) -> Option<&[f64]> {
        self.metrics
            .get(canonical_split(split))
            .and_then(|m| m.get(metric))
            .map(Vec::as_slice)
    }

    fn require(&self, split: &str, metric: &str) -> MetricsResult<&[f64]> {
        self.series(split, metric)
            .ok_or_else(|| MetricsError::MissingSeries {
                split: split.to_string(),
                metric: metric.to_string(),
            })
    }

    /// Number of recorded epochs, taken from the training loss series.
    pub fn epochs(&self) -> usize {
        self.series(TRAIN, LOSS).map_or(0, <[f64]>::len)
    }

    /// Every series has one value per epoch and `best_epoch` points at one.
    pub fn validate(&self) -> MetricsResult<()> {
        let epochs = self.epochs();
        for (split, by_metric) in &self.metrics {
            for (metric, values) in by_metric {
                if values.len() != epochs {
                    return Err(MetricsError::Inconsistent(format!(
                        "{split}/{metric} has {} epochs, {TRAIN}/{LOSS} has {epochs}",
                        values.len()
                    )));
                }
            }
        }
        if epochs > 0 && self.best_epoch >= epochs {
            return Err(MetricsError::BestEpochOutOfRange {
                best: self.best_epoch,
                epochs,
            });
        }
        Ok(())
    }

    pub fn best_epoch_report(&self) -> MetricsResult<BestEpochReport> {
        let epochs = self.epochs();
        let b = self.best_epoch;
        if b >= epochs {
            return Err(MetricsError::BestEpochOutOfRange { best: b, epochs });
        }
        let at = |split: &str| -> MetricsResult<EpochMetrics> {
            let pick = |metric: &str| -> MetricsResult<f64> {
                let values = self.require(split, metric)?;
                values
                    .get(b)
                    .copied()
                    .ok_or(MetricsError::BestEpochOutOfRange {
                        best: b,
                        epochs: values.len(),
                    })
            };
            Ok(EpochMetrics {
                loss: pick(LOSS)?,
                accuracy: pick(ACCURACY)?,
                jaccard: pick(JACCARD)?,
            })
        };
        Ok(BestEpochReport {
            best_epoch: b,
            epochs,
            train: at(TRAIN)?,
            val: at(VAL)?,
        })
    }

    /// Write the history as a deflate zip holding `metrics.json` and
    /// `best_epoch.json`.
    pub fn save(&self, path: &Path) -> MetricsResult<()> {
        let io_err = |e: std::io::Error| MetricsError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let zip_err = |e: zip::result::ZipError| MetricsError::Zip {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        let mut zip = zip::ZipWriter::new(BufWriter::new(file));

        let entries = [
            (METRICS_ENTRY, to_json(METRICS_ENTRY, &self.metrics)?),
            (BEST_EPOCH_ENTRY, to_json(BEST_EPOCH_ENTRY, &self.best_epoch)?),
        ];
        for (name, bytes) in entries {
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            zip.start_file(name, options).map_err(zip_err)?;
            zip.write_all(&bytes).map_err(io_err)?;
        }
        let mut inner = zip.finish().map_err(zip_err)?;
        inner.flush().map_err(io_err)?;
        log::debug!(
            "wrote metrics history ({} epochs) to {}",
            self.epochs(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> MetricsResult<Self> {
        let file = File::open(path).map_err(|e| MetricsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| MetricsError::Zip {
            path: path.to_path_buf(),
            source: e,
        })?;
        let metrics = read_entry(&mut zip, path, METRICS_ENTRY)?;
        let best_epoch = read_entry(&mut zip, path, BEST_EPOCH_ENTRY)?;
        let history = MetricsHistory {
            metrics: normalize_splits(metrics)?,
            best_epoch,
        };
        history.validate()?;
        Ok(history)
    }
}

fn to_json<T: Serialize>(entry: &str, value: &T) -> MetricsResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| MetricsError::Json {
        entry: entry.to_string(),
        source: e,
    })
}

fn read_entry<R, T>(zip: &mut zip::ZipArchive<R>, path: &Path, entry: &str) -> MetricsResult<T>
where
    R: Read + std::io::Seek,
    T: for<'de> Deserialize<'de>,
{
    let mut buf = Vec::new();
    zip.by_name(entry)
        .map_err(|e| MetricsError::Zip {
            path: path.to_path_buf(),
            source: e,
        })?
        .read_to_end(&mut buf)
        .map_err(|e| MetricsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    serde_json::from_slice(&buf).map_err(|e| MetricsError::Json {
        entry: entry.to_string(),
        source: e,
    })
}

/// Archives written by other tools may key validation as `valid`. Two keys
/// naming the same split are rejected rather than merged.
fn normalize_splits(
    raw: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
) -> MetricsResult<BTreeMap<String, BTreeMap<String, Vec<f64>>>> {
    let mut out = BTreeMap::new();
    let mut sources: BTreeMap<String, String> = BTreeMap::new();
    for (split, by_metric) in raw {
        let canonical = canonical_split(&split).to_string();
        if let Some(first) = sources.insert(canonical.clone(), split.clone()) {
            return Err(MetricsError::Inconsistent(format!(
                "splits {first:?} and {split:?} both name {canonical:?}"
            )));
        }
        out.insert(canonical, by_metric);
    }
    Ok(out)
}

/// Train and validation metrics at the best epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestEpochReport {
    pub best_epoch: usize,
    pub epochs: usize,
    pub train: EpochMetrics,
    pub val: EpochMetrics,
}

impl fmt::Display for BestEpochReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "best epoch {} of {}", self.best_epoch, self.epochs)?;
        for (split, m) in [(TRAIN, &self.train), (VAL, &self.val)] {
            writeln!(
                f,
                "{split:>5}: loss {:.6} accuracy {:.6} jaccard {:.6}",
                m.loss, m.accuracy, m.jaccard
            )?;
        }
        Ok(())
    }
}
