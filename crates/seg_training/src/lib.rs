//! Drivers around the segmentation data pipeline: the loader harness and the
//! `read_metrics` / `config_summary` tools.

pub mod harness;
pub mod tools;

pub use harness::{
    check_batch, run_all, run_harness, HarnessArgs, HarnessError, HarnessReport, PreloadMode,
};
pub use tools::{run_config_summary, run_read_metrics, ConfigSummaryArgs, ReadMetricsArgs};

/// Backend the harness uploads batches to.
pub type TrainBackend = burn_ndarray::NdArray<f32>;
