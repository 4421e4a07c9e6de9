//! Metrics recorded while training a segmentation network.
//!
//! - `history`: per-split, per-metric epoch series persisted as a zip archive
//!   (`metrics.json` + `best_epoch.json`) and the best-epoch report.
//! - `confusion`: accuracy and Jaccard index with void labels ignored.
//! - `early_stop`: patience tracking on the validation Jaccard.

pub mod confusion;
pub mod early_stop;
pub mod history;
pub mod types;

pub use confusion::ConfusionMatrix;
pub use early_stop::{EarlyStopping, StopDecision};
pub use history::{BestEpochReport, MetricsHistory, BEST_EPOCH_ENTRY, METRICS_ENTRY};
pub use types::*;
