//! Model module
//!
//! - `densenet`: DenseNet121 backbone and layer freezing
//! - `pretrained`: torchvision weight import
//! - `classifier`: backbone plus classification head
//! - `artifact`: saving and loading trained models

pub mod artifact;
pub mod classifier;
pub mod densenet;
pub mod pretrained;

pub use artifact::{artifact_exists, load_artifact, save_artifact};
pub use classifier::{
    BackboneConfig, ClassifierConfig, HeadConfig, HiddenLayerConfig, PneumoniaClassifier,
};
pub use densenet::{DenseNet, DenseNetConfig};
