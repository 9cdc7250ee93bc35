//! Pretrained backbone import
//!
//! Loads a torchvision `densenet121` state dict (`.pth`) into [`DenseNet`]
//! with burn-import's PyTorch recorder. Batch norm `weight`/`bias` map to
//! `gamma`/`beta` through the recorder's adapter; the key remaps below align
//! the rest of the naming.

use std::path::Path;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::info;

use super::densenet::{DenseNet, DenseNetRecord};
use crate::utils::error::{PneumoniaError, Result};

/// Upper bound on dense layers per block covered by the key remaps
const MAX_LAYERS_PER_BLOCK: usize = 64;

/// Key remaps from torchvision names to the Burn module tree
pub fn key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![
        // drop the `features.` container prefix
        (r"^features\.(.*)$".to_string(), "$1".to_string()),
        // legacy checkpoints spell `norm1` as `norm.1`
        (r"\.(norm|relu|conv)\.([12])\.".to_string(), ".$1$2.".to_string()),
    ];

    // torchvision numbers dense layers from 1
    for i in 1..=MAX_LAYERS_PER_BLOCK {
        remaps.push((
            format!(r"\.denselayer{}\.", i),
            format!(".layers.{}.", i - 1),
        ));
    }

    remaps
}

/// Load pretrained weights into a freshly initialized backbone
pub fn load_pretrained_backbone<B: Backend>(
    backbone: DenseNet<B>,
    weights: &Path,
    device: &B::Device,
) -> Result<DenseNet<B>> {
    if !weights.exists() {
        return Err(PneumoniaError::PathNotFound(weights.to_path_buf()));
    }

    info!("Loading pretrained backbone weights from {:?}", weights);

    let load_args = key_remaps()
        .into_iter()
        .fold(LoadArgs::new(weights.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        });

    let record: DenseNetRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args, device)
        .map_err(|e| {
            PneumoniaError::Model(format!(
                "Failed to import pretrained weights from {}: {:?}",
                weights.display(),
                e
            ))
        })?;

    Ok(backbone.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_remaps_strip_prefix_first() {
        let remaps = key_remaps();
        assert_eq!(remaps[0].0, r"^features\.(.*)$");
        assert_eq!(remaps[0].1, "$1");
    }

    #[test]
    fn test_key_remaps_shift_dense_layer_index() {
        let remaps = key_remaps();
        assert!(remaps.contains(&(r"\.denselayer1\.".to_string(), ".layers.0.".to_string())));
        assert!(remaps.contains(&(r"\.denselayer24\.".to_string(), ".layers.23.".to_string())));
        // trailing dot keeps denselayer1 from matching denselayer12
        assert!(remaps.iter().all(|(pattern, _)| pattern.ends_with(r"\.") || pattern.ends_with('$')));
    }

    #[test]
    fn test_missing_weights_file() {
        let device = Default::default();
        let backbone = crate::model::DenseNetConfig::tiny().init::<burn::backend::NdArray>(&device);
        let result = load_pretrained_backbone(
            backbone,
            Path::new("/nonexistent/densenet121.pth"),
            &device,
        );
        assert!(matches!(result, Err(PneumoniaError::PathNotFound(_))));
    }
}
