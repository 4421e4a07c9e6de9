//! Core types, error definitions, and data structures for seg_dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Number of channels of every decoded image (RGB).
pub const IMAGE_CHANNELS: usize = 3;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unknown set requested: {0}")]
    UnknownSplit(String),
    #[error("image {name} is {image:?} (w, h) but its mask is {mask:?}")]
    ShapeMismatch {
        name: String,
        image: (u32, u32),
        mask: (u32, u32),
    },
    #[error("mask missing for image {name}: {path}")]
    MissingMask { name: String, path: PathBuf },
    #[error("{0} is not in the preload cache")]
    NotPreloaded(String),
    #[error("invalid loader config: {0}")]
    InvalidConfig(String),
    #[error("crop {crop:?} (h, w) does not fit sample {name} of size {size:?} (h, w)")]
    CropTooLarge {
        name: String,
        crop: (u32, u32),
        size: (u32, u32),
    },
    #[error("file name is not valid UTF-8: {}", path.display())]
    InvalidFilename { path: PathBuf },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Valid, Split::Test];

    /// Put a set name in canonical form: `train`, `valid` or `test`.
    pub fn canonicalize(which_set: &str) -> DatasetResult<Self> {
        match which_set {
            "train" | "training" => Ok(Split::Train),
            "val" | "valid" | "validation" => Ok(Split::Valid),
            "test" | "testing" => Ok(Split::Test),
            other => Err(DatasetError::UnknownSplit(other.to_string())),
        }
    }

    /// Directory name of the split under the dataset root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Split::canonicalize(s)
    }
}

/// One decoded image/mask pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// File stem shared by the image and its mask.
    pub name: String,
    /// Image in HWC layout, normalized to [0, 1].
    pub image_hwc: Vec<f32>,
    /// Row-major class index per pixel, void labels already remapped.
    pub mask: Vec<i32>,
    pub width: u32,
    pub height: u32,
}

impl Sample {
    pub fn size_hw(&self) -> (u32, u32) {
        (self.height, self.width)
    }
}

/// Static description of a segmentation dataset: classes, void labels, palette.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub non_void_nclasses: usize,
    /// Raw mask values that mark pixels excluded from loss and metrics.
    pub raw_void_labels: Vec<i32>,
    pub cmap: BTreeMap<i32, [u8; 3]>,
    pub mask_labels: BTreeMap<i32, String>,
}

impl DatasetDescriptor {
    /// EndoScene (CVC-ColonDB + CVC-ClinicDB): 912 colonoscopy frames with
    /// polyp/background labels plus a void class on the image border.
    pub fn polyps912() -> Self {
        Self {
            name: "polyps912".to_string(),
            non_void_nclasses: 2,
            raw_void_labels: vec![2],
            cmap: BTreeMap::from([
                (0, [0, 0, 0]),
                (1, [255, 255, 255]),
                (2, [128, 128, 128]),
            ]),
            mask_labels: BTreeMap::from([
                (0, "Background".to_string()),
                (1, "Polyp".to_string()),
                (2, "Void".to_string()),
            ]),
        }
    }

    /// Classes seen by the network, including the single merged void class.
    pub fn nclasses(&self) -> usize {
        self.non_void_nclasses + usize::from(!self.raw_void_labels.is_empty())
    }

    /// Class indices excluded from loss/metrics after remapping.
    pub fn void_labels(&self) -> Vec<i32> {
        if self.raw_void_labels.is_empty() {
            Vec::new()
        } else {
            vec![self.non_void_nclasses as i32]
        }
    }

    /// Map a raw mask value to a class index. Void values and anything
    /// outside `[0, non_void_nclasses)` collapse onto the void class.
    pub fn remap_label(&self, raw: i32) -> i32 {
        let in_range = raw >= 0 && (raw as usize) < self.non_void_nclasses;
        if in_range && !self.raw_void_labels.contains(&raw) {
            raw
        } else {
            self.non_void_nclasses as i32
        }
    }

    pub fn color_of(&self, class: i32) -> Option<[u8; 3]> {
        self.cmap.get(&class).copied()
    }

    pub fn label_name(&self, class: i32) -> Option<&str> {
        self.mask_labels.get(&class).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub split: Option<Split>,
    pub images: usize,
    pub masks: usize,
    /// Pairs that decoded with matching dimensions.
    pub paired: usize,
    pub missing_mask: usize,
    pub orphan_mask: usize,
    pub undecodable: usize,
    pub shape_mismatch: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_missing_mask: Option<usize>,
    pub max_orphan_mask: Option<usize>,
    pub max_undecodable: Option<usize>,
    pub max_shape_mismatch: Option<usize>,
    pub max_missing_ratio: Option<f32>,
}

impl ValidationThresholds {
    /// Strict thresholds: any missing, orphan, broken or mismatched pair fails.
    pub fn strict() -> Self {
        Self {
            max_missing_mask: Some(0),
            max_orphan_mask: Some(0),
            max_undecodable: Some(0),
            max_shape_mismatch: Some(0),
            max_missing_ratio: None,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Thresholds from `SEG_DATASET_MAX_*` keys; unparsable values are ignored.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_usize = |key: &str| lookup(key)?.trim().parse::<usize>().ok();
        let parse_ratio = |key: &str| lookup(key)?.trim().parse::<f32>().ok();
        ValidationThresholds {
            max_missing_mask: parse_usize("SEG_DATASET_MAX_MISSING_MASK"),
            max_orphan_mask: parse_usize("SEG_DATASET_MAX_ORPHAN_MASK"),
            max_undecodable: parse_usize("SEG_DATASET_MAX_UNDECODABLE"),
            max_shape_mismatch: parse_usize("SEG_DATASET_MAX_SHAPE_MISMATCH"),
            max_missing_ratio: parse_ratio("SEG_DATASET_MAX_MISSING_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: SplitSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_aliases_canonicalize() {
        for (alias, expected) in [
            ("train", Split::Train),
            ("training", Split::Train),
            ("val", Split::Valid),
            ("valid", Split::Valid),
            ("validation", Split::Valid),
            ("test", Split::Test),
            ("testing", Split::Test),
        ] {
            assert_eq!(Split::canonicalize(alias).unwrap(), expected, "{alias}");
        }
    }

    #[test]
    fn unknown_split_is_rejected() {
        let err = Split::canonicalize("Train").unwrap_err();
        assert!(matches!(err, DatasetError::UnknownSplit(ref s) if s == "Train"));
        assert!("holdout".parse::<Split>().is_err());
    }

    #[test]
    fn polyps_descriptor_merges_void() {
        let d = DatasetDescriptor::polyps912();
        assert_eq!(d.nclasses(), 3);
        assert_eq!(d.void_labels(), vec![2]);
        assert_eq!(d.remap_label(0), 0);
        assert_eq!(d.remap_label(1), 1);
        assert_eq!(d.remap_label(2), 2);
        assert_eq!(d.remap_label(255), 2);
        assert_eq!(d.remap_label(-1), 2);
        assert_eq!(d.label_name(1), Some("Polyp"));
        assert_eq!(d.color_of(2), Some([128, 128, 128]));
    }

    #[test]
    fn thresholds_parse_env_keys() {
        let vars = BTreeMap::from([
            ("SEG_DATASET_MAX_MISSING_MASK", " 3 "),
            ("SEG_DATASET_MAX_ORPHAN_MASK", "0"),
            ("SEG_DATASET_MAX_UNDECODABLE", "lots"),
            ("SEG_DATASET_MAX_MISSING_RATIO", "0.25"),
        ]);
        let t = ValidationThresholds::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(t.max_missing_mask, Some(3));
        assert_eq!(t.max_orphan_mask, Some(0));
        assert_eq!(t.max_undecodable, None);
        assert_eq!(t.max_shape_mismatch, None);
        assert_eq!(t.max_missing_ratio, Some(0.25));
    }
}
