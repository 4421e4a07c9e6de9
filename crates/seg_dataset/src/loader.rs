//! Decoding image/mask pairs and the in-memory preload cache.

use crate::discovery::SplitPaths;
use crate::types::{DatasetDescriptor, DatasetError, DatasetResult, Sample};
use image::DynamicImage;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Load one image and its mask.
///
/// The `.bmp` is decoded as RGB and scaled to [0, 1]. The `.tif` mask is read
/// at its native bit depth (no rescaling of label values) and every raw value
/// is mapped through [`DatasetDescriptor::remap_label`].
pub fn load_pair(
    paths: &SplitPaths,
    name: &str,
    descriptor: &DatasetDescriptor,
) -> DatasetResult<Sample> {
    let img_path = paths.image_path(name);
    let img = image::open(&img_path)
        .map_err(|e| DatasetError::Image {
            path: img_path.clone(),
            source: e,
        })?
        .to_rgb8();

    let mask_path = paths.mask_path(name);
    if !mask_path.exists() {
        return Err(DatasetError::MissingMask {
            name: name.to_string(),
            path: mask_path,
        });
    }
    let mask_img = image::open(&mask_path).map_err(|e| DatasetError::Image {
        path: mask_path.clone(),
        source: e,
    })?;

    let (width, height) = img.dimensions();
    let mask_size = (mask_img.width(), mask_img.height());
    if (width, height) != mask_size {
        return Err(DatasetError::ShapeMismatch {
            name: name.to_string(),
            image: (width, height),
            mask: mask_size,
        });
    }

    let image_hwc = img.as_raw().iter().map(|v| *v as f32 / 255.0).collect();
    let mask = decode_labels(mask_img)
        .into_iter()
        .map(|raw| descriptor.remap_label(raw))
        .collect();

    Ok(Sample {
        name: name.to_string(),
        image_hwc,
        mask,
        width,
        height,
    })
}

fn decode_labels(img: DynamicImage) -> Vec<i32> {
    match img {
        DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(i32::from).collect(),
        DynamicImage::ImageLuma16(buf) => buf.into_raw().into_iter().map(i32::from).collect(),
        DynamicImage::ImageLumaA8(buf) => buf.pixels().map(|p| i32::from(p[0])).collect(),
        DynamicImage::ImageLumaA16(buf) => buf.pixels().map(|p| i32::from(p[0])).collect(),
        // Colour masks carry the label in the first channel.
        other => other.to_rgb8().pixels().map(|p| i32::from(p[0])).collect(),
    }
}

/// Shared count of pair loads issued by one dataset.
#[derive(Debug, Clone, Default)]
pub struct LoadCounter(Arc<AtomicUsize>);

impl LoadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Where samples of one split come from on disk. Cheap to clone and `Send`,
/// so prefetch threads carry their own copy.
#[derive(Debug, Clone)]
pub struct SampleSource {
    paths: Arc<SplitPaths>,
    descriptor: Arc<DatasetDescriptor>,
    counter: LoadCounter,
}

impl SampleSource {
    pub fn new(paths: SplitPaths, descriptor: Arc<DatasetDescriptor>) -> Self {
        Self {
            paths: Arc::new(paths),
            descriptor,
            counter: LoadCounter::new(),
        }
    }

    pub fn paths(&self) -> &SplitPaths {
        &self.paths
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    pub fn counter(&self) -> &LoadCounter {
        &self.counter
    }

    pub fn load(&self, name: &str) -> DatasetResult<Sample> {
        self.counter.incr();
        load_pair(&self.paths, name, &self.descriptor)
    }
}

/// Every sample of a split held in memory, in filename order.
#[derive(Debug, Default)]
pub struct PreloadCache {
    samples: Vec<Sample>,
    name_to_idx: HashMap<String, usize>,
}

impl PreloadCache {
    pub fn build(source: &SampleSource, filenames: &[String]) -> DatasetResult<Self> {
        let samples = filenames
            .par_iter()
            .map(|name| source.load(name))
            .collect::<DatasetResult<Vec<_>>>()?;
        let name_to_idx = filenames
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect::<HashMap<_, _>>();
        if name_to_idx.len() != samples.len() {
            return Err(DatasetError::Other(format!(
                "preload cache holds {} samples for {} distinct names",
                samples.len(),
                name_to_idx.len()
            )));
        }
        Ok(Self {
            samples,
            name_to_idx,
        })
    }

    pub fn get(&self, name: &str) -> DatasetResult<&Sample> {
        self.name_to_idx
            .get(name)
            .and_then(|idx| self.samples.get(*idx))
            .ok_or_else(|| DatasetError::NotPreloaded(name.to_string()))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_idx.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
