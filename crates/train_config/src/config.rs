use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::network::{NetworkFile, NetworkSpec};
use crate::optim::{LossKind, OptimizerKind};

pub const DEFAULT_CONFIG_NAME: &str = "denseseg.toml";
pub const CONFIG_ENV: &str = "DENSESEG_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("toml parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid training config: {0}")]
    Invalid(String),
    #[error("invalid network definition: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub dataset: String,
    /// (height, width) of training crops; None trains on full-size images.
    pub train_crop_size: Option<(u32, u32)>,
    pub seed: u64,
    pub learning_rate: f64,
    /// Multiplicative learning-rate decay applied once per epoch.
    pub lr_sched_decay: f64,
    pub weight_decay: f64,
    pub num_epochs: usize,
    /// Epochs without validation improvement before stopping.
    pub max_patience: usize,
    pub loss_function: LossKind,
    pub optimizer: OptimizerKind,
    pub batch_size: usize,
    /// Network-definition file the model is built from.
    pub model_path: Option<PathBuf>,
    /// Weights to start from instead of a fresh initialisation.
    pub pretrained_model: Option<PathBuf>,
    pub network: NetworkSpec,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset: "Vaihingen".to_string(),
            train_crop_size: Some((300, 300)),
            seed: 0,
            learning_rate: 1e-3,
            lr_sched_decay: 0.995,
            weight_decay: 1e-3,
            num_epochs: 750,
            max_patience: 150,
            loss_function: LossKind::CrossEntropy,
            optimizer: OptimizerKind::Rmsprop,
            batch_size: 3,
            model_path: None,
            pretrained_model: None,
            network: NetworkSpec::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainConfigFile {
    dataset: Option<String>,
    train_crop_size: Option<CropField>,
    seed: Option<u64>,
    training: Option<TrainingSection>,
    architecture: Option<ArchitectureSection>,
    network: Option<NetworkFile>,
}

/// `train_crop_size = [h, w]` or `train_crop_size = "full"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CropField {
    Size([u32; 2]),
    Keyword(String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainingSection {
    learning_rate: Option<f64>,
    lr_sched_decay: Option<f64>,
    weight_decay: Option<f64>,
    num_epochs: Option<usize>,
    max_patience: Option<usize>,
    loss_function: Option<LossKind>,
    optimizer: Option<OptimizerKind>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ArchitectureSection {
    model_path: Option<String>,
    pretrained_model: Option<String>,
}

impl TrainConfig {
    /// Load from `$DENSESEG_CONFIG`, else `denseseg.toml` in the working
    /// directory; a missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        if !path.exists() {
            log::warn!(
                "training config {} not found; using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: TrainConfigFile = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        let cfg = Self::from_file(file, path)?;
        cfg.validate()?;
        cfg.warn_if_unusual();
        Ok(cfg)
    }

    fn from_file(file: TrainConfigFile, config_path: &Path) -> Result<Self, ConfigError> {
        let defaults = TrainConfig::default();
        let training = file.training.unwrap_or_default();
        let architecture = file.architecture.unwrap_or_default();

        let train_crop_size = match file.train_crop_size {
            None => defaults.train_crop_size,
            Some(CropField::Size([h, w])) => Some((h, w)),
            Some(CropField::Keyword(k)) if matches!(k.as_str(), "full" | "none") => None,
            Some(CropField::Keyword(k)) => {
                return Err(ConfigError::Invalid(format!(
                    "train_crop_size must be [height, width] or \"full\", got {k:?}"
                )))
            }
        };

        let model_path = architecture
            .model_path
            .map(|v| resolve_model_path(config_path, &expand_path(&v)));
        let network = match &model_path {
            Some(p) => NetworkSpec::load_with_overrides(p, file.network)?,
            None => match file.network {
                Some(n) => n.apply(NetworkSpec::default())?,
                None => NetworkSpec::default(),
            },
        };

        Ok(TrainConfig {
            dataset: file.dataset.unwrap_or(defaults.dataset),
            train_crop_size,
            seed: file.seed.unwrap_or(defaults.seed),
            learning_rate: training.learning_rate.unwrap_or(defaults.learning_rate),
            lr_sched_decay: training.lr_sched_decay.unwrap_or(defaults.lr_sched_decay),
            weight_decay: training.weight_decay.unwrap_or(defaults.weight_decay),
            num_epochs: training.num_epochs.unwrap_or(defaults.num_epochs),
            max_patience: training.max_patience.unwrap_or(defaults.max_patience),
            loss_function: training.loss_function.unwrap_or(defaults.loss_function),
            optimizer: training.optimizer.unwrap_or(defaults.optimizer),
            batch_size: training.batch_size.unwrap_or(defaults.batch_size),
            model_path,
            pretrained_model: architecture.pretrained_model.map(|v| expand_path(&v)),
            network,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.trim().is_empty() {
            return Err(ConfigError::Invalid("dataset is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.lr_sched_decay.is_nan() || self.lr_sched_decay <= 0.0 || self.lr_sched_decay > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "lr_sched_decay must be in (0, 1], got {}",
                self.lr_sched_decay
            )));
        }
        if self.weight_decay < 0.0 {
            return Err(ConfigError::Invalid("weight_decay must not be negative".to_string()));
        }
        if let Some((h, w)) = self.train_crop_size {
            if h == 0 || w == 0 {
                return Err(ConfigError::Invalid(format!(
                    "train_crop_size {h}x{w} has a zero side"
                )));
            }
        }
        self.network.validate()
    }

    fn warn_if_unusual(&self) {
        if self.num_epochs == 0 {
            log::warn!("training config: num_epochs is 0; training will not run");
        }
        if self.max_patience > self.num_epochs {
            log::warn!(
                "training config: max_patience {} exceeds num_epochs {}; early stopping never triggers",
                self.max_patience,
                self.num_epochs
            );
        }
        if let Some(p) = &self.pretrained_model {
            if !p.exists() {
                log::warn!("training config: pretrained_model {} does not exist", p.display());
            }
        }
    }

    /// Learning rate after `epoch` decay steps.
    pub fn lr_at_epoch(&self, epoch: usize) -> f64 {
        let steps = i32::try_from(epoch).unwrap_or(i32::MAX);
        self.learning_rate * self.lr_sched_decay.powi(steps)
    }
}

/// Relative model paths are taken from the project root: the directory of
/// the config file, or its parent when the config lives in `config/`.
fn resolve_model_path(config_path: &Path, model_path: &Path) -> PathBuf {
    if model_path.is_absolute() {
        return model_path.to_path_buf();
    }
    let mut base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if base.file_name().and_then(|s| s.to_str()) == Some("config") {
        base = base.parent().unwrap_or(base);
    }
    base.join(model_path)
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Substitute `${VAR}`; unknown variables are left in place.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
