//! Network-definition files and FC-DenseNet feature-map arithmetic.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FC_DENSENET: &str = "fc-densenet";

/// Deepest pooling stack accepted; `2^n_pool` must fit in `u32`.
pub const MAX_N_POOL: usize = 31;

/// Hyperparameters of a Tiramisu-style FC-DenseNet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub architecture: String,
    pub input_channels: usize,
    pub n_classes: usize,
    pub n_filters_first_conv: usize,
    pub n_pool: usize,
    pub growth_rate: usize,
    /// Layers per dense block: `n_pool` down blocks, the bottleneck, `n_pool` up blocks.
    pub n_layers_per_block: Vec<usize>,
    pub dropout_p: f32,
}

impl Default for NetworkSpec {
    /// FC-DenseNet103 on 4-channel (IRRG + DSM) aerial tiles with 6 classes.
    fn default() -> Self {
        Self {
            architecture: FC_DENSENET.to_string(),
            input_channels: 4,
            n_classes: 6,
            n_filters_first_conv: 48,
            n_pool: 5,
            growth_rate: 16,
            n_layers_per_block: vec![4, 5, 7, 10, 12, 15, 12, 10, 7, 5, 4],
            dropout_p: 0.5,
        }
    }
}

/// `n_layers_per_block` may be a single count for every block or a full list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum LayersField {
    Uniform(usize),
    PerBlock(Vec<usize>),
}

/// `[network]` table as written in a definition file or a config override.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct NetworkFile {
    architecture: Option<String>,
    input_channels: Option<usize>,
    n_classes: Option<usize>,
    n_filters_first_conv: Option<usize>,
    n_pool: Option<usize>,
    growth_rate: Option<usize>,
    n_layers_per_block: Option<LayersField>,
    dropout_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct NetworkDefinitionFile {
    network: NetworkFile,
}

impl NetworkFile {
    /// Apply the fields present in `self` on top of `base`.
    pub(crate) fn apply(self, mut base: NetworkSpec) -> Result<NetworkSpec, ConfigError> {
        if let Some(v) = self.architecture {
            base.architecture = v;
        }
        if let Some(v) = self.input_channels {
            base.input_channels = v;
        }
        if let Some(v) = self.n_classes {
            base.n_classes = v;
        }
        if let Some(v) = self.n_filters_first_conv {
            base.n_filters_first_conv = v;
        }
        if let Some(v) = self.n_pool {
            if v > MAX_N_POOL {
                return Err(ConfigError::Network(format!(
                    "n_pool {v} exceeds the maximum of {MAX_N_POOL}"
                )));
            }
            base.n_pool = v;
        }
        if let Some(v) = self.growth_rate {
            base.growth_rate = v;
        }
        match self.n_layers_per_block {
            Some(LayersField::Uniform(n)) => {
                base.n_layers_per_block = vec![n; 2 * base.n_pool + 1];
            }
            Some(LayersField::PerBlock(list)) => base.n_layers_per_block = list,
            None => {}
        }
        if let Some(v) = self.dropout_p {
            base.dropout_p = v;
        }
        Ok(base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub n_filters: usize,
    /// (height, width) at this stage when an input size was given.
    pub spatial: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSummary {
    pub stages: Vec<StageSummary>,
    /// Feature maps entering the final 1x1 classifier.
    pub final_feature_maps: usize,
    pub n_classes: usize,
}

impl NetworkSpec {
    /// Read a network-definition file (`[network]` table) on top of the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, None)
    }

    pub(crate) fn load_with_overrides(
        path: &Path,
        overrides: Option<NetworkFile>,
    ) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: NetworkDefinitionFile = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut spec = file.network.apply(NetworkSpec::default())?;
        if let Some(overrides) = overrides {
            spec = overrides.apply(spec)?;
        }
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.architecture != FC_DENSENET {
            return Err(ConfigError::Network(format!(
                "unsupported architecture {:?} (expected {FC_DENSENET:?})",
                self.architecture
            )));
        }
        if self.n_pool > MAX_N_POOL {
            return Err(ConfigError::Network(format!(
                "n_pool {} exceeds the maximum of {MAX_N_POOL}",
                self.n_pool
            )));
        }
        let expected_blocks = 2 * self.n_pool + 1;
        if self.n_layers_per_block.len() != expected_blocks {
            return Err(ConfigError::Network(format!(
                "n_layers_per_block has {} entries, expected 2 * n_pool + 1 = {}",
                self.n_layers_per_block.len(),
                expected_blocks
            )));
        }
        if self.input_channels == 0 || self.n_classes == 0 || self.n_filters_first_conv == 0 {
            return Err(ConfigError::Network(
                "input_channels, n_classes and n_filters_first_conv must be positive".to_string(),
            ));
        }
        if self.growth_rate == 0 {
            return Err(ConfigError::Network("growth_rate must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(ConfigError::Network(format!(
                "dropout_p {} outside [0, 1)",
                self.dropout_p
            )));
        }
        Ok(())
    }

    /// Feature maps (and spatial size, given an input of `input_hw`) after
    /// every stage of the network.
    pub fn summary(&self, input_hw: Option<(u32, u32)>) -> Result<NetworkSummary, ConfigError> {
        self.validate()?;
        if let Some((h, w)) = input_hw {
            let factor = 1u32.checked_shl(self.n_pool as u32).unwrap_or(0);
            if factor == 0 || h % factor != 0 || w % factor != 0 || h == 0 || w == 0 {
                return Err(ConfigError::Network(format!(
                    "input {h}x{w} is not divisible by 2^n_pool = 2^{}",
                    self.n_pool
                )));
            }
        }
        let layers = &self.n_layers_per_block;
        let g = self.growth_rate;
        let mut spatial = input_hw;
        let mut stages = Vec::new();
        let mut push = |name: String, n_filters: usize, spatial: Option<(u32, u32)>| {
            stages.push(StageSummary {
                name,
                n_filters,
                spatial,
            })
        };

        let mut m = self.n_filters_first_conv;
        push("first_conv".to_string(), m, spatial);

        let mut skips = Vec::with_capacity(self.n_pool);
        for (i, n_layers) in layers.iter().take(self.n_pool).enumerate() {
            m += g * n_layers;
            push(format!("down_block_{i}"), m, spatial);
            skips.push(m);
            spatial = spatial.map(|(h, w)| (h / 2, w / 2));
            push(format!("transition_down_{i}"), m, spatial);
        }

        // The bottleneck only forwards the feature maps it produced.
        let mut upsample = g * layers[self.n_pool];
        push("bottleneck".to_string(), upsample, spatial);

        for i in 0..self.n_pool {
            spatial = spatial.map(|(h, w)| (h * 2, w * 2));
            m = upsample + skips[self.n_pool - 1 - i];
            push(format!("transition_up_{i}"), m, spatial);
            upsample = g * layers[self.n_pool + i + 1];
            m += upsample;
            push(format!("up_block_{i}"), m, spatial);
        }
        push("classifier".to_string(), self.n_classes, spatial);

        Ok(NetworkSummary {
            stages,
            final_feature_maps: m,
            n_classes: self.n_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn densenet103_feature_maps() {
        let summary = NetworkSpec::default().summary(Some((224, 224))).unwrap();
        let by_name = |name: &str| {
            summary
                .stages
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .unwrap()
        };
        assert_eq!(by_name("down_block_0").n_filters, 112);
        assert_eq!(by_name("down_block_4").n_filters, 656);
        assert_eq!(by_name("bottleneck").n_filters, 240);
        assert_eq!(by_name("bottleneck").spatial, Some((7, 7)));
        assert_eq!(by_name("up_block_0").n_filters, 1088);
        assert_eq!(summary.final_feature_maps, 256);
        assert_eq!(by_name("classifier").spatial, Some((224, 224)));
    }

    #[test]
    fn block_count_must_match_pooling() {
        let spec = NetworkSpec {
            n_layers_per_block: vec![4; 10],
            ..Default::default()
        };
        assert!(matches!(spec.validate(), Err(ConfigError::Network(_))));
    }

    #[test]
    fn input_must_survive_pooling() {
        let err = NetworkSpec::default().summary(Some((300, 300))).unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn uniform_layers_expand_to_every_block() {
        let file = NetworkFile {
            n_pool: Some(2),
            n_layers_per_block: Some(LayersField::Uniform(3)),
            ..Default::default()
        };
        let spec = file.apply(NetworkSpec::default()).unwrap();
        assert_eq!(spec.n_layers_per_block, vec![3; 5]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn huge_pool_count_is_rejected_before_expanding() {
        let file = NetworkFile {
            n_pool: Some(usize::MAX / 4),
            n_layers_per_block: Some(LayersField::Uniform(4)),
            ..Default::default()
        };
        let err = file.apply(NetworkSpec::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Network(ref m) if m.contains("n_pool")));

        let spec = NetworkSpec {
            n_pool: 40,
            n_layers_per_block: vec![1; 81],
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }
}
