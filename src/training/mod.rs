//! Training module
//!
//! - `trainer`: the training loop and run orchestration
//! - `callbacks`: early stopping and best-checkpoint monitors
//! - `scheduler`: reduce-on-plateau learning rate schedule
//! - `history`: per-epoch metrics persisted for plotting

pub mod callbacks;
pub mod history;
pub mod scheduler;
pub mod trainer;

pub use callbacks::{BestCheckpoint, CheckpointRecord, EarlyStopping, EarlyStoppingDecision};
pub use history::{EpochMetrics, TrainingHistory};
pub use scheduler::{PlateauMode, ReduceOnPlateauState};
pub use trainer::{fit, run_training, StopReason, TrainingOutcome, TrainingSummary};
