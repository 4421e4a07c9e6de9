//! Dataset discovery, image/mask loading, preload caching and batching for
//! semantic-segmentation splits laid out as `<root>/<split>/images/*.bmp`
//! plus `<root>/<split>/masks2/*.tif`.
//!
//! This crate provides utilities for:
//! - Canonicalizing split names and discovering the files of a split
//! - Loading image/mask pairs, optionally preloading a whole split
//! - Joint crop/flip augmentation of images and masks
//! - Batch iteration, sequential or backed by a prefetch thread
//! - Dataset validation (missing masks, shape mismatches)

// Module declarations
pub mod aug;
pub mod batch;
pub mod discovery;
pub mod loader;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod tensor;

// Re-export public API
pub use aug::{AugmentConfig, AugmentPipeline};
pub use batch::{BatchIter, LoaderConfig, SegBatch, SegDataset};
pub use discovery::{list_filenames, SplitPaths};
pub use loader::{load_pair, LoadCounter, PreloadCache, SampleSource};
pub use types::*;
pub use validation::{summarize_root, summarize_split, validate_summary};

#[cfg(feature = "burn-runtime")]
pub use tensor::BurnSegBatch;
