//! Burn Dataset Integration for Chest X-rays
//!
//! Implements Burn's `Dataset` and `Batcher` traits over images decoded once
//! into memory at 224×224.
//!
//! ## Batchers
//!
//! - `XrayBatcher`: rescaling only (validation, test, inference)
//! - `AugmentingBatcher`: seeded random augmentation per sample (training)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use super::augmentation::{AugmentationConfig, Augmenter};
use super::loader::SplitDirectory;
use super::preprocess::{load_image, to_tensor_data};
use crate::utils::error::Result;
use crate::{IMAGE_SIZE, NUM_CHANNELS};

/// A decoded chest X-ray with its label
#[derive(Clone, Debug)]
pub struct XrayItem {
    /// 224×224 RGB pixels
    pub image: RgbImage,
    /// Class label (0 = NORMAL, 1 = PNEUMONIA)
    pub label: usize,
    /// Source file
    pub path: PathBuf,
}

impl XrayItem {
    /// Load and resize an image; decode failures are fatal
    pub fn from_path(path: &Path, label: usize) -> Result<Self> {
        Ok(Self {
            image: load_image(path)?,
            label,
            path: path.to_path_buf(),
        })
    }
}

/// In-memory dataset of one split, in directory order
#[derive(Clone, Debug)]
pub struct XrayDataset {
    items: Vec<XrayItem>,
}

impl XrayDataset {
    /// Decode every sample in parallel and keep the results in memory
    ///
    /// Order follows `samples`. The first unreadable image aborts loading.
    pub fn new_cached(samples: &[(PathBuf, usize)]) -> Result<Self> {
        let total = samples.len();
        info!("Pre-loading {} images into memory", total);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);

        let items = samples
            .par_iter()
            .map(|(path, label)| {
                let item = XrayItem::from_path(path, *label);
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect::<Result<Vec<_>>>();

        match &items {
            Ok(items) => pb.finish_with_message(format!("Loaded {} images", items.len())),
            Err(_) => pb.abandon(),
        }

        Ok(Self { items: items? })
    }

    /// Load every image of a scanned split
    pub fn from_split(split: &SplitDirectory) -> Result<Self> {
        Self::new_cached(&split.pairs())
    }

    /// Wrap already decoded items
    pub fn from_items(items: Vec<XrayItem>) -> Self {
        Self { items }
    }

    /// Labels in dataset order
    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }

    /// Items in `[start, end)`, clamped to the dataset length
    pub fn slice(&self, start: usize, end: usize) -> Vec<XrayItem> {
        let end = end.min(self.items.len());
        let start = start.min(end);
        self.items[start..end].to_vec()
    }
}

impl Dataset<XrayItem> for XrayDataset {
    fn get(&self, index: usize) -> Option<XrayItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of chest X-rays
#[derive(Clone, Debug)]
pub struct XrayBatch<B: Backend> {
    /// Images with shape [batch_size, 3, 224, 224], values in [0, 1]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size], values in {0, 1}
    pub targets: Tensor<B, 1, Int>,
}

fn assemble_batch<B: Backend>(
    images_data: Vec<f32>,
    labels: Vec<i64>,
    device: &B::Device,
) -> XrayBatch<B> {
    let batch_size = labels.len();

    let images = Tensor::<B, 4>::from_floats(
        TensorData::new(
            images_data,
            [batch_size, NUM_CHANNELS, IMAGE_SIZE, IMAGE_SIZE],
        ),
        device,
    );
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

    XrayBatch { images, targets }
}

/// Batcher without augmentation
#[derive(Clone, Debug, Default)]
pub struct XrayBatcher;

impl XrayBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, XrayItem, XrayBatch<B>> for XrayBatcher {
    fn batch(&self, items: Vec<XrayItem>, device: &B::Device) -> XrayBatch<B> {
        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| to_tensor_data(&item.image))
            .collect();
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        assemble_batch(images_data, labels, device)
    }
}

/// Batcher that applies seeded random augmentation to every sample
///
/// Each call to `batch` draws a fresh batch seed from the base seed and an
/// internal counter, so a run with the same seed sees the same augmentations.
#[derive(Clone, Debug)]
pub struct AugmentingBatcher {
    augmenter: Augmenter,
    seed: u64,
    batches_seen: Arc<AtomicU64>,
}

impl AugmentingBatcher {
    pub fn new(config: AugmentationConfig, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(config),
            seed,
            batches_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_batch_seed(&self) -> u64 {
        let n = self.batches_seen.fetch_add(1, Ordering::Relaxed);
        self.seed
            .wrapping_add(n.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl<B: Backend> Batcher<B, XrayItem, XrayBatch<B>> for AugmentingBatcher {
    fn batch(&self, items: Vec<XrayItem>, device: &B::Device) -> XrayBatch<B> {
        let batch_seed = self.next_batch_seed();

        let images_data: Vec<f32> = items
            .par_iter()
            .enumerate()
            .map(|(i, item)| {
                let mut rng = ChaCha8Rng::seed_from_u64(batch_seed.wrapping_add(i as u64));
                to_tensor_data(&self.augmenter.augment(&item.image, &mut rng))
            })
            .collect::<Vec<_>>()
            .concat();
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();

        assemble_batch(images_data, labels, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray;

    fn item(shade: u8, label: usize) -> XrayItem {
        XrayItem {
            image: RgbImage::from_pixel(224, 224, Rgb([shade, shade, shade])),
            label,
            path: PathBuf::from(format!("mem_{}.png", shade)),
        }
    }

    #[test]
    fn test_batch_shapes_and_labels() {
        let device = Default::default();
        let items = vec![item(0, 0), item(255, 1), item(128, 1)];

        let batch: XrayBatch<TestBackend> = XrayBatcher::new().batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 224, 224]);
        assert_eq!(batch.targets.dims(), [3]);

        let labels = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(labels, vec![0, 1, 1]);

        let max: f32 = batch.images.clone().max().into_scalar().elem();
        let min: f32 = batch.images.min().into_scalar().elem();
        assert_eq!(max, 1.0);
        assert_eq!(min, 0.0);
    }

    #[test]
    fn test_augmenting_batcher_is_reproducible() {
        let device = Default::default();
        let gradient = XrayItem {
            image: RgbImage::from_fn(224, 224, |x, y| Rgb([x as u8, y as u8, 0])),
            label: 1,
            path: PathBuf::from("gradient.png"),
        };

        let a = AugmentingBatcher::new(AugmentationConfig::xray(), 9);
        let b = AugmentingBatcher::new(AugmentationConfig::xray(), 9);

        let batch_a: XrayBatch<TestBackend> = a.batch(vec![gradient.clone()], &device);
        let batch_b: XrayBatch<TestBackend> = b.batch(vec![gradient.clone()], &device);
        let data_a = batch_a.images.into_data().to_vec::<f32>().unwrap();
        let data_b = batch_b.images.into_data().to_vec::<f32>().unwrap();
        assert_eq!(data_a, data_b);

        // the next batch from the same batcher draws a new transform
        let batch_a2: XrayBatch<TestBackend> = a.batch(vec![gradient], &device);
        let data_a2 = batch_a2.images.into_data().to_vec::<f32>().unwrap();
        assert_ne!(data_a, data_a2);
    }

    #[test]
    fn test_cached_dataset_from_split() {
        let dir = tempfile::tempdir().unwrap();
        crate::dataset::loader::tests::write_split(dir.path(), 2);
        let split = SplitDirectory::load(dir.path(), super::super::loader::Split::Test).unwrap();

        let dataset = XrayDataset::from_split(&split).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.labels(), vec![0, 0, 1, 1]);
        assert_eq!(dataset.get(0).unwrap().image.dimensions(), (224, 224));
        assert_eq!(dataset.slice(3, 10).len(), 1);
    }

    #[test]
    fn test_unreadable_image_aborts_loading() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"garbage").unwrap();

        let result = XrayDataset::new_cached(&[(bad, 0)]);
        assert!(result.is_err());
    }
}
