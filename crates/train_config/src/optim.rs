//! Selectable loss functions and optimizers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LossKind {
    /// Pixel-wise categorical cross-entropy, void pixels masked out.
    #[default]
    #[serde(rename = "crossentropy", alias = "cross_entropy")]
    CrossEntropy,
    /// One minus the mean Jaccard index over non-void classes.
    #[serde(rename = "jaccard")]
    Jaccard,
}

impl LossKind {
    pub const ALL: [LossKind; 2] = [LossKind::CrossEntropy, LossKind::Jaccard];

    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::CrossEntropy => "crossentropy",
            LossKind::Jaccard => "jaccard",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossentropy" | "cross_entropy" => Ok(LossKind::CrossEntropy),
            "jaccard" => Ok(LossKind::Jaccard),
            other => Err(format!("unknown loss function {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Rmsprop,
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 3] = [
        OptimizerKind::Rmsprop,
        OptimizerKind::Adam,
        OptimizerKind::Sgd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Rmsprop => "rmsprop",
            OptimizerKind::Adam => "adam",
            OptimizerKind::Sgd => "sgd",
        }
    }

    /// Numerical-stability epsilon used when none is configured.
    pub fn default_epsilon(&self) -> Option<f64> {
        match self {
            OptimizerKind::Rmsprop => Some(1e-6),
            OptimizerKind::Adam => Some(1e-8),
            OptimizerKind::Sgd => None,
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OptimizerKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown optimizer {s:?}"))
    }
}
