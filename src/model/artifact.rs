//! Model artifacts
//!
//! A saved model is a pair of files sharing one stem:
//! `<stem>.mpk` (weights, named MessagePack) and `<stem>.json` (the
//! [`ClassifierConfig`] needed to rebuild the architecture).

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use tracing::debug;

use super::classifier::{ClassifierConfig, PneumoniaClassifier};
use crate::utils::error::{PneumoniaError, Result};

/// Full precision keeps reloaded predictions identical to the saved model
pub type ArtifactRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Path of the weights file for a stem
pub fn weights_path(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

/// Path of the architecture file for a stem
pub fn config_path(stem: &Path) -> PathBuf {
    stem.with_extension("json")
}

/// Whether both artifact files exist
pub fn artifact_exists(stem: &Path) -> bool {
    weights_path(stem).exists() && config_path(stem).exists()
}

/// Save weights and architecture under `stem`
pub fn save_artifact<B: Backend>(
    model: &PneumoniaClassifier<B>,
    config: &ClassifierConfig,
    stem: &Path,
) -> Result<()> {
    if let Some(parent) = stem.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    config.save(config_path(stem))?;
    model
        .clone()
        .save_file(weights_path(stem), &ArtifactRecorder::new())?;

    debug!("Saved model artifact {:?}", stem);
    Ok(())
}

/// Load a model saved with [`save_artifact`]
///
/// Pretrained backbone files are never needed: the weights file is complete.
pub fn load_artifact<B: Backend>(
    stem: &Path,
    device: &B::Device,
) -> Result<(PneumoniaClassifier<B>, ClassifierConfig)> {
    let config_file = config_path(stem);
    let weights_file = weights_path(stem);

    for path in [&config_file, &weights_file] {
        if !path.exists() {
            return Err(PneumoniaError::PathNotFound(path.clone()));
        }
    }

    let config = ClassifierConfig::load(&config_file).map_err(|e| {
        PneumoniaError::Model(format!(
            "Invalid model config {}: {:?}",
            config_file.display(),
            e
        ))
    })?;

    let model = config
        .init::<B>(device)
        .load_file(weights_file, &ArtifactRecorder::new(), device)?;

    debug!("Loaded model artifact {:?}", stem);
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackboneConfig, DenseNetConfig, HeadConfig, HiddenLayerConfig};
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray;

    #[test]
    fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("nested").join("best_model");
        let device = Default::default();

        let config = ClassifierConfig::new(
            BackboneConfig::new().with_densenet(DenseNetConfig::tiny()),
            HeadConfig::new(0.3, vec![HiddenLayerConfig::new(8, 0.3)]),
        );
        let model = config.init::<TestBackend>(&device);
        save_artifact(&model, &config, &stem).unwrap();

        assert!(artifact_exists(&stem));
        assert!(dir.path().join("nested/best_model.mpk").exists());
        assert!(dir.path().join("nested/best_model.json").exists());

        let (loaded, loaded_config) = load_artifact::<TestBackend>(&stem, &device).unwrap();
        assert_eq!(loaded_config.head.hidden.len(), 1);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 224, 224], &device);
        let before = model.forward_probability(input.clone()).into_data().to_vec::<f32>().unwrap();
        let after = loaded.forward_probability(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_artifact::<TestBackend>(&dir.path().join("missing"), &Default::default());
        assert!(matches!(result, Err(PneumoniaError::PathNotFound(_))));
    }
}
