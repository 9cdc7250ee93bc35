//! Dataset module
//!
//! - `loader`: split directory scanning and class discovery
//! - `preprocess`: decode, resize and rescale (shared with inference)
//! - `augmentation`: random affine augmentation for training
//! - `burn_dataset`: Burn `Dataset` and `Batcher` implementations

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod preprocess;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{AugmentingBatcher, XrayBatch, XrayBatcher, XrayDataset, XrayItem};
pub use loader::{DatasetStats, ImageSample, Split, SplitDirectory, XrayDirectory};
