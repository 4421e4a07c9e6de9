//! Integration tests for end-to-end seg_dataset workflows.
//!
//! These tests build a synthetic `<root>/<split>/{images,masks2}` tree and check:
//! 1. Discovery → batch iteration shapes and value ranges
//! 2. Preloaded and on-disk loaders agree batch for batch
//! 3. Load counting with and without preload
//! 4. Prefetch thread output matches sequential output
//! 5. Validation of broken splits

use image::{GrayImage, Luma, Rgb, RgbImage};
use seg_dataset::{
    summarize_split, validate_summary, AugmentConfig, DatasetError, LoaderConfig, SegBatch,
    SegDataset, Split, ValidationOutcome, ValidationThresholds,
};
use std::fs;
use std::path::Path;

/// Write `count` image/mask pairs of `width`x`height` into one split.
fn create_synthetic_split(
    root: &Path,
    split: &str,
    count: usize,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let images = root.join(split).join("images");
    let masks = root.join(split).join("masks2");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&masks)?;
    for i in 0..count {
        let name = format!("{:03}", i + 1);
        let mut img = RgbImage::new(width, height);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(i as u32 * 20 + x) as u8, (y * 10) as u8, 255]);
        }
        img.save(images.join(format!("{name}.bmp")))?;

        let mut mask = GrayImage::new(width, height);
        for (x, y, p) in mask.enumerate_pixels_mut() {
            *p = Luma([((x + y + i as u32) % 3) as u8]);
        }
        // Out-of-range label on the border collapses to void.
        mask.put_pixel(0, 0, Luma([255]));
        mask.save(masks.join(format!("{name}.tif")))?;
    }
    Ok(())
}

fn create_synthetic_dataset(root: &Path) -> anyhow::Result<()> {
    create_synthetic_split(root, "train", 5, 10, 8)?;
    create_synthetic_split(root, "valid", 2, 10, 8)?;
    create_synthetic_split(root, "test", 3, 10, 8)?;
    Ok(())
}

fn train_cfg(preload: bool) -> LoaderConfig {
    LoaderConfig {
        batch_size: 2,
        shuffle: true,
        seed: Some(11),
        return_one_hot: true,
        return_01c: true,
        preload,
        augment: AugmentConfig {
            crop_size: Some((4, 6)),
            horizontal_flip_prob: 0.5,
            seed: Some(5),
        },
        ..Default::default()
    }
}

fn collect_epoch(ds: &SegDataset, epoch: usize) -> anyhow::Result<Vec<SegBatch>> {
    Ok(ds.epoch(epoch).collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn split_metadata_matches_disk() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;

    let ds = SegDataset::polyps912(tmp.path(), "training", train_cfg(false))?;
    assert_eq!(ds.split(), Split::Train);
    assert_eq!(ds.nsamples(), 5);
    assert_eq!(ds.batch_size(), 2);
    assert_eq!(ds.nbatches(), 3);
    assert_eq!(ds.nclasses(), 3);
    assert_eq!(ds.void_labels(), vec![2]);
    assert_eq!(ds.filenames(), ["001", "002", "003", "004", "005"]);
    assert_eq!(ds.get_names()["default"].len(), 5);

    let val = SegDataset::polyps912(tmp.path(), "val", LoaderConfig::default())?;
    assert_eq!(val.split(), Split::Valid);
    assert_eq!(val.nbatches(), 2);
    Ok(())
}

#[test]
fn unknown_split_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;
    let err = SegDataset::polyps912(tmp.path(), "holdout", LoaderConfig::default())
        .err()
        .expect("holdout is not a split");
    assert!(matches!(err, DatasetError::UnknownSplit(_)));
    Ok(())
}

#[test]
fn cropped_batches_have_expected_shapes_and_ranges() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;
    let ds = SegDataset::polyps912(tmp.path(), "train", train_cfg(false))?;

    let batches = collect_epoch(&ds, 0)?;
    assert_eq!(batches.len(), ds.nbatches());
    let mut seen = 0;
    for batch in &batches {
        let [n, h, w, c] = batch.image_shape();
        assert!(n <= ds.batch_size());
        assert_eq!((h, w, c), (4, 6, 3));
        assert_eq!(batch.mask_shape(), [n, 4, 6, ds.nclasses()]);
        assert_eq!(batch.images.len(), n * 4 * 6 * 3);
        let (lo, hi) = batch.image_range().expect("non-empty batch");
        assert!(lo >= 0.0 && hi <= 1.0);
        // One-hot: exactly one class set per pixel.
        for pixel in batch.masks.chunks(ds.nclasses()) {
            assert_eq!(pixel.iter().sum::<i32>(), 1);
        }
        seen += n;
    }
    assert_eq!(seen, ds.nsamples());
    assert_eq!(batches.last().map(SegBatch::len), Some(1));
    Ok(())
}

#[test]
fn full_size_label_masks_are_remapped() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;
    let cfg = LoaderConfig {
        batch_size: 3,
        shuffle: false,
        return_one_hot: false,
        return_01c: false,
        ..Default::default()
    };
    let ds = SegDataset::polyps912(tmp.path(), "test", cfg)?;
    let batch = ds.load_sequence(&ds.filenames().to_vec())?;
    assert_eq!(batch.image_shape(), [3, 3, 8, 10]);
    assert_eq!(batch.mask_shape(), [3, 1, 8, 10]);
    assert!(batch.masks.iter().all(|v| (0..3).contains(v)));
    // Pixel (0, 0) held 255 on disk.
    assert_eq!(batch.masks[0], 2);
    // Blue plane of the first image is 255 / 255.
    assert!((batch.images[2 * 80] - 1.0).abs() < 1e-6);
    assert_eq!(batch.filenames, ["001", "002", "003"]);
    Ok(())
}

#[test]
fn preloaded_and_disk_loaders_agree() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;
    let disk = SegDataset::polyps912(tmp.path(), "train", train_cfg(false))?;
    let cached = SegDataset::polyps912(tmp.path(), "train", train_cfg(true))?;
    assert!(cached.is_preloaded());
    for epoch in 0..2 {
        assert_eq!(collect_epoch(&disk, epoch)?, collect_epoch(&cached, epoch)?);
    }
    let names = vec!["004".to_string(), "002".to_string()];
    assert_eq!(disk.load_sequence(&names)?, cached.load_sequence(&names)?);
    Ok(())
}

#[test]
fn load_counts_follow_preload_mode() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;

    let disk = SegDataset::polyps912(tmp.path(), "train", train_cfg(false))?;
    assert_eq!(disk.load_count(), 0);
    collect_epoch(&disk, 0)?;
    assert_eq!(disk.load_count(), disk.nsamples());
    collect_epoch(&disk, 1)?;
    assert_eq!(disk.load_count(), 2 * disk.nsamples());

    let cached = SegDataset::polyps912(tmp.path(), "train", train_cfg(true))?;
    assert_eq!(cached.load_count(), cached.nsamples());
    collect_epoch(&cached, 0)?;
    collect_epoch(&cached, 1)?;
    assert_eq!(cached.load_count(), cached.nsamples());
    Ok(())
}

#[test]
fn prefetch_thread_matches_sequential() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;
    let sequential = SegDataset::polyps912(tmp.path(), "train", train_cfg(false))?;
    let threaded = SegDataset::polyps912(
        tmp.path(),
        "train",
        LoaderConfig {
            use_threads: true,
            queue_size: 1,
            ..train_cfg(false)
        },
    )?;
    assert_eq!(collect_epoch(&sequential, 0)?, collect_epoch(&threaded, 0)?);

    // Abandoning an epoch early must not hang on the bounded queue.
    let mut iter = threaded.epoch(1);
    assert_eq!(iter.len(), 3);
    assert!(iter.next().transpose()?.is_some());
    assert_eq!(iter.len(), 2);
    drop(iter);
    Ok(())
}

#[test]
fn mismatched_mask_surfaces_and_validates() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_synthetic_split(tmp.path(), "train", 3, 10, 8)?;
    let masks = tmp.path().join("train").join("masks2");
    GrayImage::new(4, 4).save(masks.join("002.tif"))?;
    fs::remove_file(masks.join("003.tif"))?;
    GrayImage::new(10, 8).save(masks.join("999.tif"))?;

    // First batch holds 001 and the mismatched 002.
    let cfg = LoaderConfig {
        batch_size: 2,
        shuffle: false,
        ..Default::default()
    };
    let ds = SegDataset::polyps912(tmp.path(), "train", cfg)?;
    let err = ds.epoch(0).next().expect("one batch").unwrap_err();
    assert!(matches!(err, DatasetError::ShapeMismatch { .. }));

    let summary = summarize_split(tmp.path(), Split::Train, ds.descriptor())?;
    assert_eq!(summary.images, 3);
    assert_eq!(summary.paired, 1);
    assert_eq!(summary.shape_mismatch, 1);
    assert_eq!(summary.missing_mask, 1);
    assert_eq!(summary.orphan_mask, 1);
    let report = validate_summary(summary, &ValidationThresholds::strict());
    assert_eq!(report.outcome, ValidationOutcome::Fail);
    Ok(())
}

#[cfg(feature = "burn-runtime")]
#[test]
fn batches_upload_to_burn() -> anyhow::Result<()> {
    type B = burn_ndarray::NdArray<f32>;
    let tmp = tempfile::tempdir()?;
    create_synthetic_dataset(tmp.path())?;
    let ds = SegDataset::polyps912(tmp.path(), "train", train_cfg(false))?;
    let device = <B as burn::tensor::backend::Backend>::Device::default();
    let batch = ds.epoch(0).next().expect("batch")?;
    let tensors = batch.to_burn::<B>(&device);
    assert_eq!(tensors.images.dims(), [2, 4, 6, 3]);
    assert_eq!(tensors.masks.dims(), [2, 4, 6, 3]);
    assert_eq!(tensors.filenames, batch.filenames);
    Ok(())
}
