//! Joint image/mask augmentation: random crop and horizontal flip.

use crate::types::{DatasetError, DatasetResult, Sample, IMAGE_CHANNELS};
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AugmentConfig {
    /// Crop every sample to this (height, width). If None, samples keep their size.
    pub crop_size: Option<(u32, u32)>,
    /// Probability of flipping image and mask horizontally.
    pub horizontal_flip_prob: f32,
    /// Seed for reproducible crops/flips; mixed with epoch and sample index.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AugmentPipeline {
    cfg: AugmentConfig,
}

impl AugmentPipeline {
    pub fn from_config(cfg: &AugmentConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.cfg
    }

    pub fn is_identity(&self) -> bool {
        self.cfg.crop_size.is_none() && self.cfg.horizontal_flip_prob <= 0.0
    }

    pub fn describe(&self) -> String {
        let crop = self
            .cfg
            .crop_size
            .map(|(h, w)| format!("{}x{}", h, w))
            .unwrap_or_else(|| "none".to_string());
        format!(
            "crop={} flip_p={:.2} seed={}",
            crop,
            self.cfg.horizontal_flip_prob,
            self.cfg
                .seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Apply crop then flip. `sample_index` is the position of the sample in
    /// the split's filename list, so seeded output does not depend on whether
    /// the sample came from disk or from the preload cache.
    pub fn apply(&self, sample: &Sample, sample_index: usize, epoch: usize) -> DatasetResult<Sample> {
        if self.is_identity() {
            return Ok(sample.clone());
        }
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.cfg.seed {
            let mixed = seed ^ ((epoch as u64) << 32) ^ sample_index as u64;
            seeded_rng = rand::rngs::StdRng::seed_from_u64(mixed);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let mut out = match self.cfg.crop_size {
            Some(crop) => random_crop(sample, crop, rng)?,
            None => sample.clone(),
        };
        maybe_hflip(&mut out, self.cfg.horizontal_flip_prob, rng);
        Ok(out)
    }
}

pub(crate) fn random_crop(
    sample: &Sample,
    (crop_h, crop_w): (u32, u32),
    rng: &mut dyn rand::RngCore,
) -> DatasetResult<Sample> {
    let (h, w) = sample.size_hw();
    if crop_h == 0 || crop_w == 0 || crop_h > h || crop_w > w {
        return Err(DatasetError::CropTooLarge {
            name: sample.name.clone(),
            crop: (crop_h, crop_w),
            size: (h, w),
        });
    }
    let y0 = rng.random_range(0..=h - crop_h) as usize;
    let x0 = rng.random_range(0..=w - crop_w) as usize;
    let (w, crop_h, crop_w) = (w as usize, crop_h as usize, crop_w as usize);

    let mut image_hwc = Vec::with_capacity(crop_h * crop_w * IMAGE_CHANNELS);
    let mut mask = Vec::with_capacity(crop_h * crop_w);
    for y in y0..y0 + crop_h {
        let row = y * w + x0;
        image_hwc.extend_from_slice(
            &sample.image_hwc[row * IMAGE_CHANNELS..(row + crop_w) * IMAGE_CHANNELS],
        );
        mask.extend_from_slice(&sample.mask[row..row + crop_w]);
    }
    Ok(Sample {
        name: sample.name.clone(),
        image_hwc,
        mask,
        width: crop_w as u32,
        height: crop_h as u32,
    })
}

pub(crate) fn maybe_hflip(sample: &mut Sample, prob: f32, rng: &mut dyn rand::RngCore) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let w = sample.width as usize;
    for row in sample.mask.chunks_mut(w) {
        row.reverse();
    }
    for row in sample.image_hwc.chunks_mut(w * IMAGE_CHANNELS) {
        for x in 0..w / 2 {
            let mirror = w - 1 - x;
            for c in 0..IMAGE_CHANNELS {
                row.swap(x * IMAGE_CHANNELS + c, mirror * IMAGE_CHANNELS + c);
            }
        }
    }
}
