//! Training configuration for densely-connected segmentation networks.
//!
//! A training config (TOML) declares the dataset, hyperparameters, optimizer
//! and loss, and points at a network-definition file whose `[network]` table
//! describes the model to build. Values in the config's own `[network]`
//! table override the definition file.

pub mod config;
pub mod network;
pub mod optim;

pub use config::{ConfigError, TrainConfig, CONFIG_ENV, DEFAULT_CONFIG_NAME};
pub use network::{NetworkSpec, NetworkSummary, StageSummary};
pub use optim::{LossKind, OptimizerKind};
