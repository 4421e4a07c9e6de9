//! Batch iteration for training, validation and testing splits.

use crate::aug::{AugmentConfig, AugmentPipeline};
use crate::discovery::{list_filenames, SplitPaths, IMAGE_EXT};
use crate::loader::{PreloadCache, SampleSource};
use crate::types::{
    DatasetDescriptor, DatasetError, DatasetResult, Sample, Split, IMAGE_CHANNELS,
};
use crossbeam_channel::{bounded, Receiver};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;
pub(crate) const DEFAULT_SUBSET: &str = "default";

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Maximum samples per batch; the last batch of an epoch may be smaller.
    pub batch_size: usize,
    /// Reshuffle the filename order at the start of every epoch.
    pub shuffle: bool,
    /// Seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Return masks one-hot encoded over `nclasses`.
    pub return_one_hot: bool,
    /// Channels-last layout (N, H, W, C); otherwise (N, C, H, W).
    pub return_01c: bool,
    /// Assemble batches on a background producer thread.
    pub use_threads: bool,
    /// Batches buffered by the producer thread.
    pub queue_size: usize,
    /// Load every sample of the split into memory up front.
    pub preload: bool,
    pub augment: AugmentConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: true,
            seed: None,
            return_one_hot: true,
            return_01c: true,
            use_threads: false,
            queue_size: 20,
            preload: false,
            augment: AugmentConfig::default(),
        }
    }
}

/// Images, masks and filenames of one batch, stored flat.
#[derive(Debug, Clone, PartialEq)]
pub struct SegBatch {
    pub images: Vec<f32>,
    pub masks: Vec<i32>,
    pub filenames: Vec<String>,
    pub subset: String,
    pub height: usize,
    pub width: usize,
    /// `nclasses` for one-hot masks, 1 for label masks.
    pub mask_channels: usize,
    pub channels_last: bool,
}

impl SegBatch {
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn image_shape(&self) -> [usize; 4] {
        self.shape_with(IMAGE_CHANNELS)
    }

    pub fn mask_shape(&self) -> [usize; 4] {
        self.shape_with(self.mask_channels)
    }

    fn shape_with(&self, channels: usize) -> [usize; 4] {
        if self.channels_last {
            [self.len(), self.height, self.width, channels]
        } else {
            [self.len(), channels, self.height, self.width]
        }
    }

    /// Smallest and largest image value, None for an empty batch.
    pub fn image_range(&self) -> Option<(f32, f32)> {
        let mut it = self.images.iter().copied();
        let first = it.next()?;
        Some(it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Stack samples into a batch. All samples must share one spatial size.
pub(crate) fn assemble(
    samples: Vec<Sample>,
    nclasses: usize,
    one_hot: bool,
    channels_last: bool,
) -> DatasetResult<SegBatch> {
    let Some(first) = samples.first() else {
        return Err(DatasetError::Other("cannot assemble an empty batch".to_string()));
    };
    let (height, width) = (first.height as usize, first.width as usize);
    let pixels = height * width;
    let mask_channels = if one_hot { nclasses } else { 1 };

    let mut images = Vec::with_capacity(samples.len() * pixels * IMAGE_CHANNELS);
    let mut masks = vec![0i32; samples.len() * pixels * mask_channels];
    let mut filenames = Vec::with_capacity(samples.len());

    for (i, sample) in samples.into_iter().enumerate() {
        if (sample.height as usize, sample.width as usize) != (height, width) {
            return Err(DatasetError::Other(format!(
                "batch contains varying image sizes ({} is {}x{}, expected {}x{}); set a crop_size to force consistency",
                sample.name, sample.height, sample.width, height, width
            )));
        }
        if channels_last {
            images.extend_from_slice(&sample.image_hwc);
        } else {
            for c in 0..IMAGE_CHANNELS {
                images.extend(
                    sample
                        .image_hwc
                        .iter()
                        .skip(c)
                        .step_by(IMAGE_CHANNELS)
                        .copied(),
                );
            }
        }

        let base = i * pixels * mask_channels;
        let out = &mut masks[base..base + pixels * mask_channels];
        if one_hot {
            for (p, label) in sample.mask.iter().enumerate() {
                // Labels without a class slot stay all-zero.
                let Ok(class) = usize::try_from(*label) else { continue };
                if class >= nclasses {
                    continue;
                }
                let idx = if channels_last {
                    p * nclasses + class
                } else {
                    class * pixels + p
                };
                out[idx] = 1;
            }
        } else {
            out.copy_from_slice(&sample.mask);
        }
        filenames.push(sample.name);
    }

    Ok(SegBatch {
        images,
        masks,
        filenames,
        subset: DEFAULT_SUBSET.to_string(),
        height,
        width,
        mask_channels,
        channels_last,
    })
}

/// Everything needed to turn a slice of sample indices into a batch. Shared
/// between the direct iterator and the prefetch thread.
#[derive(Debug, Clone)]
struct BatchProducer {
    filenames: Arc<Vec<String>>,
    source: SampleSource,
    cache: Option<Arc<PreloadCache>>,
    pipeline: AugmentPipeline,
    nclasses: usize,
    one_hot: bool,
    channels_last: bool,
}

impl BatchProducer {
    fn fetch(&self, idx: usize) -> DatasetResult<Sample> {
        let name = self
            .filenames
            .get(idx)
            .ok_or_else(|| DatasetError::Other(format!("sample index {idx} out of range")))?;
        match &self.cache {
            Some(cache) => cache.get(name).cloned(),
            None => self.source.load(name),
        }
    }

    fn produce(&self, indices: &[usize], epoch: usize) -> DatasetResult<SegBatch> {
        let samples = indices
            .par_iter()
            .map(|idx| {
                let sample = self.fetch(*idx)?;
                self.pipeline.apply(&sample, *idx, epoch)
            })
            .collect::<DatasetResult<Vec<_>>>()?;
        assemble(samples, self.nclasses, self.one_hot, self.channels_last)
    }
}

/// A segmentation split: discovered filenames, optional preload cache and
/// batch iteration over epochs.
pub struct SegDataset {
    split: Split,
    descriptor: Arc<DatasetDescriptor>,
    cfg: LoaderConfig,
    producer: BatchProducer,
}

impl SegDataset {
    pub fn new(
        root: &Path,
        which_set: &str,
        descriptor: DatasetDescriptor,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let split = Split::canonicalize(which_set)?;
        let paths = SplitPaths::new(root, split);
        let filenames = list_filenames(&paths.image_dir, IMAGE_EXT)?;
        let descriptor = Arc::new(descriptor);
        let source = SampleSource::new(paths, descriptor.clone());

        let cache = if cfg.preload {
            let t0 = Instant::now();
            let cache = PreloadCache::build(&source, &filenames)?;
            log::info!(
                "[dataset] preloaded {} {} samples of {} in {} ms",
                cache.len(),
                split,
                descriptor.name,
                t0.elapsed().as_millis()
            );
            Some(Arc::new(cache))
        } else {
            None
        };

        let pipeline = AugmentPipeline::from_config(&cfg.augment);
        log::debug!(
            "[dataset] {} {}: {} samples, batch_size={} augment: {}",
            descriptor.name,
            split,
            filenames.len(),
            cfg.batch_size,
            pipeline.describe()
        );
        let producer = BatchProducer {
            filenames: Arc::new(filenames),
            source,
            cache,
            pipeline,
            nclasses: descriptor.nclasses(),
            one_hot: cfg.return_one_hot,
            channels_last: cfg.return_01c,
        };
        Ok(Self {
            split,
            descriptor,
            cfg,
            producer,
        })
    }

    /// EndoScene polyp split under `root`.
    pub fn polyps912(root: &Path, which_set: &str, cfg: LoaderConfig) -> DatasetResult<Self> {
        Self::new(root, which_set, DatasetDescriptor::polyps912(), cfg)
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn descriptor(&self) -> &DatasetDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn paths(&self) -> &SplitPaths {
        self.producer.source.paths()
    }

    pub fn filenames(&self) -> &[String] {
        &self.producer.filenames
    }

    pub fn nsamples(&self) -> usize {
        self.producer.filenames.len()
    }

    pub fn batch_size(&self) -> usize {
        self.cfg.batch_size
    }

    pub fn nbatches(&self) -> usize {
        self.nsamples().div_ceil(self.cfg.batch_size)
    }

    pub fn nclasses(&self) -> usize {
        self.descriptor.nclasses()
    }

    pub fn void_labels(&self) -> Vec<i32> {
        self.descriptor.void_labels()
    }

    pub fn is_preloaded(&self) -> bool {
        self.producer.cache.is_some()
    }

    /// Filenames grouped per subset; this layout has a single `default` subset.
    pub fn get_names(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([(DEFAULT_SUBSET.to_string(), self.filenames().to_vec())])
    }

    /// Number of image/mask pairs read from disk so far, preload included.
    pub fn load_count(&self) -> usize {
        self.producer.source.counter().get()
    }

    /// Load the named samples without augmentation, in the given order.
    pub fn load_sequence(&self, names: &[String]) -> DatasetResult<SegBatch> {
        let samples = names
            .iter()
            .map(|name| match &self.producer.cache {
                Some(cache) => cache.get(name).cloned(),
                None => self.producer.source.load(name),
            })
            .collect::<DatasetResult<Vec<_>>>()?;
        assemble(
            samples,
            self.producer.nclasses,
            self.producer.one_hot,
            self.producer.channels_last,
        )
    }

    /// Sample order of one epoch, shuffled when configured.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nsamples()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        order
    }

    /// Iterate the batches of one epoch.
    pub fn epoch(&self, epoch: usize) -> BatchIter {
        let chunks: Vec<Vec<usize>> = self
            .epoch_order(epoch)
            .chunks(self.cfg.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        let total = chunks.len();
        let inner = if self.cfg.use_threads {
            spawn_prefetch(self.producer.clone(), chunks, epoch, self.cfg.queue_size)
        } else {
            BatchIterKind::Direct {
                producer: self.producer.clone(),
                chunks,
                cursor: 0,
                epoch,
            }
        };
        BatchIter::new(inner, total, self.split)
    }
}

fn spawn_prefetch(
    producer: BatchProducer,
    chunks: Vec<Vec<usize>>,
    epoch: usize,
    queue_size: usize,
) -> BatchIterKind {
    let (tx, rx) = bounded(queue_size.max(1));
    let worker = thread::spawn(move || {
        for chunk in chunks {
            let res = producer.produce(&chunk, epoch);
            let failed = res.is_err();
            if tx.send(res).is_err() || failed {
                break;
            }
        }
    });
    BatchIterKind::Threaded {
        rx: Some(rx),
        worker: Some(worker),
        ended: false,
    }
}

/// Progress-log interval from `SEG_DATASET_LOG_EVERY`: unset keeps the
/// default, `off` or `0` disables, garbage disables.
fn parse_log_every(raw: Option<&str>) -> Option<usize> {
    match raw.map(str::trim) {
        None => Some(DEFAULT_LOG_EVERY_SAMPLES),
        Some(v) if v.eq_ignore_ascii_case("off") => None,
        Some(v) => v.parse::<usize>().ok().filter(|n| *n > 0),
    }
}

enum BatchIterKind {
    Direct {
        producer: BatchProducer,
        chunks: Vec<Vec<usize>>,
        cursor: usize,
        epoch: usize,
    },
    Threaded {
        rx: Option<Receiver<DatasetResult<SegBatch>>>,
        worker: Option<JoinHandle<()>>,
        ended: bool,
    },
}

/// Batches of one epoch. Dropping a threaded iterator stops its producer.
pub struct BatchIter {
    inner: BatchIterKind,
    split: Split,
    total_batches: usize,
    processed_batches: usize,
    processed_samples: usize,
    started: Instant,
    total_fetch_time: Duration,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    trace_path: Option<PathBuf>,
    trace_file: Option<std::fs::File>,
}

impl BatchIter {
    fn new(inner: BatchIterKind, total_batches: usize, split: Split) -> Self {
        let log_every_samples =
            parse_log_every(std::env::var("SEG_DATASET_LOG_EVERY").ok().as_deref());
        let trace_path = std::env::var("SEG_DATASET_TRACE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let now = Instant::now();
        Self {
            inner,
            split,
            total_batches,
            processed_batches: 0,
            processed_samples: 0,
            started: now,
            total_fetch_time: Duration::ZERO,
            last_log: now,
            last_logged_samples: 0,
            log_every_samples,
            trace_path,
            trace_file: None,
        }
    }

    /// Batches not yet yielded.
    pub fn len(&self) -> usize {
        self.total_batches.saturating_sub(self.processed_batches)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    fn next_raw(&mut self) -> Option<DatasetResult<SegBatch>> {
        let remaining = self.len();
        match &mut self.inner {
            BatchIterKind::Direct {
                producer,
                chunks,
                cursor,
                epoch,
            } => {
                let chunk = chunks.get(*cursor)?;
                *cursor += 1;
                Some(producer.produce(chunk, *epoch))
            }
            BatchIterKind::Threaded { rx, worker, ended } => {
                if *ended {
                    return None;
                }
                let received = rx.as_ref().and_then(|rx| rx.recv().ok());
                match received {
                    Some(Ok(batch)) => Some(Ok(batch)),
                    Some(Err(e)) => {
                        *ended = true;
                        Some(Err(e))
                    }
                    None => {
                        *ended = true;
                        if remaining == 0 {
                            return None;
                        }
                        let panicked = worker.take().is_some_and(|h| h.join().is_err());
                        Some(Err(DatasetError::Other(format!(
                            "prefetch thread for {} stopped with {remaining} batches left{}",
                            self.split,
                            if panicked { " (panicked)" } else { "" }
                        ))))
                    }
                }
            }
        }
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let should_log = processed_since >= threshold
            || self.last_log.elapsed() >= Duration::from_secs(30)
            || self.processed_batches == self.total_batches;
        if !should_log {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let rate = self.processed_samples as f32 / secs;
        let avg_fetch_ms = if self.processed_batches > 0 {
            (self.total_fetch_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        log::info!(
            "[dataset] split={} batches={}/{} samples={} elapsed={:.1}s rate={:.1} img/s avg_fetch_ms={:.2}",
            self.split,
            self.processed_batches,
            self.total_batches,
            self.processed_samples,
            secs,
            rate,
            avg_fetch_ms
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }

    fn maybe_trace(&mut self, batch: &SegBatch, fetch_elapsed: Duration) {
        let Some(path) = &self.trace_path else {
            return;
        };
        if self.trace_file.is_none() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => self.trace_file = Some(f),
                Err(e) => {
                    log::warn!("failed to open trace file {}: {e}", path.display());
                    self.trace_path = None;
                    return;
                }
            }
        }
        let Some(file) = self.trace_file.as_mut() else {
            return;
        };
        let record = serde_json::json!({
            "split": self.split.as_str(),
            "batch": self.processed_batches,
            "samples": batch.len(),
            "height": batch.height,
            "width": batch.width,
            "fetch_ms": fetch_elapsed.as_secs_f64() * 1000.0,
            "timestamp_ms": self.started.elapsed().as_millis() as u64
        });
        if let Err(e) = writeln!(file, "{}", record) {
            log::warn!("failed to write trace record: {e}");
            self.trace_path = None;
            self.trace_file = None;
        }
    }
}

impl Iterator for BatchIter {
    type Item = DatasetResult<SegBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let t_fetch = Instant::now();
        let res = self.next_raw()?;
        let fetch_elapsed = t_fetch.elapsed();
        if let Ok(batch) = &res {
            self.processed_batches += 1;
            self.processed_samples += batch.len();
            self.total_fetch_time += fetch_elapsed;
            self.maybe_trace(batch, fetch_elapsed);
            self.maybe_log_progress();
        }
        Some(res)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.len()))
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let BatchIterKind::Threaded { rx, worker, .. } = &mut self.inner {
            // Disconnect first so a producer blocked on a full queue exits.
            drop(rx.take());
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}
