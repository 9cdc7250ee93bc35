//! Learning Rate Scheduler Module
//!
//! Reduce-on-plateau scheduling keyed on a monitored metric: after
//! `patience` epochs without an improvement larger than `min_delta`, the
//! learning rate is multiplied by `reduction_factor`, bounded below by
//! `min_lr`. A new rate applies from the next epoch.

use crate::config::PlateauConfig;

/// Mode for plateau detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

/// State for reduce-on-plateau scheduler
#[derive(Debug, Clone)]
pub struct ReduceOnPlateauState {
    best_metric: f64,
    epochs_without_improvement: usize,
    current_lr: f64,
    reduction_factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    mode: PlateauMode,
    reduced_last_step: bool,
}

impl ReduceOnPlateauState {
    /// Create a new reduce-on-plateau state
    pub fn new(
        initial_lr: f64,
        reduction_factor: f64,
        patience: usize,
        min_lr: f64,
        min_delta: f64,
        mode: PlateauMode,
    ) -> Self {
        let best_metric = match mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        };

        Self {
            best_metric,
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            reduction_factor,
            patience,
            min_lr,
            min_delta,
            mode,
            reduced_last_step: false,
        }
    }

    /// Scheduler monitoring validation loss
    pub fn from_config(initial_lr: f64, config: &PlateauConfig) -> Self {
        Self::new(
            initial_lr,
            config.factor,
            config.patience,
            config.min_lr,
            config.min_delta,
            PlateauMode::Min,
        )
    }

    fn is_improvement(&self, metric: f64) -> bool {
        match self.mode {
            PlateauMode::Min => metric < self.best_metric - self.min_delta,
            PlateauMode::Max => metric > self.best_metric + self.min_delta,
        }
    }

    /// Update the scheduler with a new metric value and return the new learning rate
    pub fn step(&mut self, metric: f64) -> f64 {
        self.reduced_last_step = false;

        if self.is_improvement(metric) {
            self.best_metric = metric;
            self.epochs_without_improvement = 0;
        } else {
            self.epochs_without_improvement += 1;

            if self.epochs_without_improvement >= self.patience && self.current_lr > self.min_lr {
                let new_lr = (self.current_lr * self.reduction_factor).max(self.min_lr);
                self.current_lr = new_lr;
                self.epochs_without_improvement = 0;
                self.reduced_last_step = true;
            }
        }

        self.current_lr
    }

    /// Whether the last `step` reduced the learning rate
    pub fn lr_was_reduced(&self) -> bool {
        self.reduced_last_step
    }

    pub fn best_metric(&self) -> f64 {
        self.best_metric
    }
}
