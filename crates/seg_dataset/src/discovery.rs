//! Locating the image and mask files of a split.

use crate::types::{DatasetError, DatasetResult, Split};
use std::fs;
use std::path::{Path, PathBuf};

pub const IMAGE_SUBDIR: &str = "images";
pub const MASK_SUBDIR: &str = "masks2";
pub const IMAGE_EXT: &str = "bmp";
pub const MASK_EXT: &str = "tif";

/// Directories of one split: `<root>/<split>/images` and `<root>/<split>/masks2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPaths {
    pub root: PathBuf,
    pub split: Split,
    pub image_dir: PathBuf,
    pub mask_dir: PathBuf,
}

impl SplitPaths {
    pub fn new(root: &Path, split: Split) -> Self {
        let split_dir = root.join(split.as_str());
        Self {
            root: root.to_path_buf(),
            split,
            image_dir: split_dir.join(IMAGE_SUBDIR),
            mask_dir: split_dir.join(MASK_SUBDIR),
        }
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.image_dir.join(format!("{name}.{IMAGE_EXT}"))
    }

    pub fn mask_path(&self, name: &str) -> PathBuf {
        self.mask_dir.join(format!("{name}.{MASK_EXT}"))
    }
}

/// Stems of every `*.<ext>` file directly inside `dir`, sorted. Unreadable
/// entries and non-UTF-8 stems are errors so the list matches the disk.
pub fn list_filenames(dir: &Path, ext: &str) -> DatasetResult<Vec<String>> {
    let io_err = |e: std::io::Error| DatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some(ext) {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DatasetError::InvalidFilename { path: path.clone() })?;
        names.push(stem.to_string());
    }
    names.sort();
    Ok(names)
}
