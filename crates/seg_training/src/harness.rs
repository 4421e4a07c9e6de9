use crate::TrainBackend;
use clap::{Parser, ValueEnum};
use seg_dataset::{AugmentConfig, DatasetError, LoaderConfig, SegBatch, SegDataset};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadMode {
    /// Read every sample from disk when its batch is built.
    Off,
    /// Load all splits into memory before iterating.
    On,
    /// Run once without and once with preload.
    Both,
}

impl PreloadMode {
    fn runs(self) -> &'static [bool] {
        match self {
            PreloadMode::Off => &[false],
            PreloadMode::On => &[true],
            PreloadMode::Both => &[false, true],
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "loader_harness",
    about = "Drive the polyps912 loader through full epochs and check every batch"
)]
pub struct HarnessArgs {
    /// Dataset root containing train/, valid/ and test/.
    #[arg(long, default_value = "datasets/polyps912")]
    pub dataset_root: PathBuf,
    /// Training batch size (validation and test use 1).
    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,
    /// Training crop height.
    #[arg(long, default_value_t = 288)]
    pub crop_height: u32,
    /// Training crop width.
    #[arg(long, default_value_t = 384)]
    pub crop_width: u32,
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,
    /// Simulated model step per minibatch, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub step_ms: u64,
    #[arg(long, value_enum, default_value_t = PreloadMode::Both)]
    pub preload: PreloadMode,
    /// Build batches on a prefetch thread.
    #[arg(long)]
    pub use_threads: bool,
    /// Seed for shuffling and crops.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("epoch {epoch}: batch {batch} of {nbatches} was missing")]
    MissingBatch {
        epoch: usize,
        batch: usize,
        nbatches: usize,
    },
    #[error("batch {batch} failed check: {reason}")]
    BatchCheck { batch: usize, reason: String },
    #[error("loaded {actual} samples, expected {expected}")]
    LoadCount { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitStats {
    pub nsamples: usize,
    pub batch_size: usize,
    pub nbatches: usize,
}

impl SplitStats {
    fn of(ds: &SegDataset) -> Self {
        Self {
            nsamples: ds.nsamples(),
            batch_size: ds.batch_size(),
            nbatches: ds.nbatches(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessReport {
    pub preload: bool,
    pub nclasses: usize,
    pub void_labels: Vec<i32>,
    pub train: SplitStats,
    pub valid: SplitStats,
    pub test: SplitStats,
    pub build_time: Duration,
    /// Time spent fetching batches, simulated steps excluded.
    pub fetch_time: Duration,
    pub batches_checked: usize,
    pub load_count: usize,
    pub expected_load_count: usize,
}

/// Shape and range checks on one training batch.
pub fn check_batch(
    batch: &SegBatch,
    index: usize,
    batch_size: usize,
    crop_hw: (u32, u32),
    nclasses: usize,
) -> Result<(), HarnessError> {
    let fail = |reason: String| HarnessError::BatchCheck {
        batch: index,
        reason,
    };
    let [n, h, w, c] = batch.image_shape();
    if n == 0 || n > batch_size {
        return Err(fail(format!("{n} images with batch size {batch_size}")));
    }
    let crop = (crop_hw.0 as usize, crop_hw.1 as usize);
    if (h, w, c) != (crop.0, crop.1, 3) {
        return Err(fail(format!(
            "image shape {h}x{w}x{c}, expected {}x{}x3",
            crop.0, crop.1
        )));
    }
    if batch.images.len() != n * h * w * c {
        return Err(fail(format!(
            "{} image values for shape {:?}",
            batch.images.len(),
            batch.image_shape()
        )));
    }
    if let Some((lo, hi)) = batch.image_range() {
        if lo < 0.0 || hi > 1.0 {
            return Err(fail(format!("image values span [{lo}, {hi}]")));
        }
    }
    let mask_shape = batch.mask_shape();
    if mask_shape != [n, crop.0, crop.1, nclasses] {
        return Err(fail(format!(
            "mask shape {mask_shape:?}, expected [{n}, {}, {}, {nclasses}]",
            crop.0, crop.1
        )));
    }
    Ok(())
}

fn build_datasets(
    args: &HarnessArgs,
    preload: bool,
) -> Result<[SegDataset; 3], HarnessError> {
    let eval_cfg = LoaderConfig {
        batch_size: 1,
        seed: args.seed,
        use_threads: args.use_threads,
        preload,
        ..Default::default()
    };
    let train_cfg = LoaderConfig {
        batch_size: args.batch_size,
        augment: AugmentConfig {
            crop_size: Some((args.crop_height, args.crop_width)),
            seed: args.seed,
            ..Default::default()
        },
        ..eval_cfg.clone()
    };
    let root = args.dataset_root.as_path();
    Ok([
        SegDataset::polyps912(root, "train", train_cfg)?,
        SegDataset::polyps912(root, "valid", eval_cfg.clone())?,
        SegDataset::polyps912(root, "test", eval_cfg)?,
    ])
}

/// Build the three splits, run `args.epochs` training epochs and verify
/// every batch plus the number of samples read from disk.
pub fn run_harness(args: &HarnessArgs, preload: bool) -> Result<HarnessReport, HarnessError> {
    let start_build = Instant::now();
    let [train, valid, test] = build_datasets(args, preload)?;
    let build_time = start_build.elapsed();

    let nclasses = train.nclasses();
    log::info!("N classes: {nclasses}");
    log::info!("Void label: {:?}", train.void_labels());
    for (label, ds) in [("Train", &train), ("Validation", &valid), ("Test", &test)] {
        log::info!(
            "{label} n_images: {}, batch_size: {}, n_batches: {}",
            ds.nsamples(),
            ds.batch_size(),
            ds.nbatches()
        );
    }
    log::info!(
        "Time to build{} the datasets: {:.3}s",
        if preload { " and preload" } else { "" },
        build_time.as_secs_f64()
    );

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let step = Duration::from_millis(args.step_ms);
    let crop = (args.crop_height, args.crop_width);
    let nbatches = train.nbatches();
    let mut fetch_time = Duration::ZERO;
    let mut batches_checked = 0;

    for epoch in 0..args.epochs {
        let mut iter = train.epoch(epoch);
        let mut last = Instant::now();
        for mb in 0..nbatches {
            let batch = iter.next().ok_or(HarnessError::MissingBatch {
                epoch,
                batch: mb,
                nbatches,
            })??;
            check_batch(&batch, mb, train.batch_size(), crop, nclasses)?;

            let tensors = batch.to_burn::<TrainBackend>(&device);
            if tensors.images.dims() != batch.image_shape()
                || tensors.masks.dims() != batch.mask_shape()
            {
                return Err(HarnessError::BatchCheck {
                    batch: mb,
                    reason: format!(
                        "tensor dims {:?}/{:?} differ from batch shapes",
                        tensors.images.dims(),
                        tensors.masks.dims()
                    ),
                });
            }
            batches_checked += 1;

            // Stands in for running the model on the batch.
            std::thread::sleep(step);
            let now = Instant::now();
            let part = now.duration_since(last).saturating_sub(step);
            last = now;
            fetch_time += part;
            log::info!(
                "Minibatch {mb} time: {:.3}s ({:.3}s)",
                part.as_secs_f64(),
                fetch_time.as_secs_f64()
            );
        }
    }

    let load_count = train.load_count() + valid.load_count() + test.load_count();
    let expected_load_count = if preload {
        train.nsamples() + valid.nsamples() + test.nsamples()
    } else {
        train.nsamples() * args.epochs
    };
    if load_count != expected_load_count {
        return Err(HarnessError::LoadCount {
            expected: expected_load_count,
            actual: load_count,
        });
    }

    Ok(HarnessReport {
        preload,
        nclasses,
        void_labels: train.void_labels(),
        train: SplitStats::of(&train),
        valid: SplitStats::of(&valid),
        test: SplitStats::of(&test),
        build_time,
        fetch_time,
        batches_checked,
        load_count,
        expected_load_count,
    })
}

/// Run the harness for every preload setting `args.preload` selects.
pub fn run_all(args: &HarnessArgs) -> Result<Vec<HarnessReport>, HarnessError> {
    args.preload
        .runs()
        .iter()
        .map(|&preload| run_harness(args, preload))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize, h: usize, w: usize, value: f32, nclasses: usize) -> SegBatch {
        SegBatch {
            images: vec![value; n * h * w * 3],
            masks: vec![0; n * h * w * nclasses],
            filenames: (0..n).map(|i| format!("{i:03}")).collect(),
            subset: "default".to_string(),
            height: h,
            width: w,
            mask_channels: nclasses,
            channels_last: true,
        }
    }

    #[test]
    fn accepts_well_formed_batch() {
        assert!(check_batch(&batch(2, 4, 6, 0.5, 3), 0, 2, (4, 6), 3).is_ok());
    }

    #[test]
    fn rejects_bad_batches() {
        let too_many = check_batch(&batch(3, 4, 6, 0.5, 3), 0, 2, (4, 6), 3);
        assert!(matches!(too_many, Err(HarnessError::BatchCheck { .. })));
        let wrong_crop = check_batch(&batch(1, 4, 4, 0.5, 3), 1, 2, (4, 6), 3);
        assert!(matches!(wrong_crop, Err(HarnessError::BatchCheck { batch: 1, .. })));
        let out_of_range = check_batch(&batch(1, 4, 6, 1.5, 3), 0, 2, (4, 6), 3);
        assert!(out_of_range.is_err());
        let label_masks = check_batch(&batch(1, 4, 6, 0.5, 1), 0, 2, (4, 6), 3);
        assert!(label_masks.is_err());
    }

    #[test]
    fn preload_modes_expand() {
        assert_eq!(PreloadMode::Both.runs(), &[false, true]);
        assert_eq!(PreloadMode::On.runs(), &[true]);
    }
}
