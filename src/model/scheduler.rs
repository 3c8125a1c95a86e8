use std::f64::consts::PI;

use crate::config::{LrPolicy, TrainingConfig};

/// Per-epoch learning-rate schedule. `step` is called once at the start of
/// every epoch, like a torch `LambdaLR` whose counter starts at 0.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    policy: LrPolicy,
    base_lr: f64,
    epoch_count: usize,
    n_epochs: usize,
    n_epochs_decay: usize,
    lr_decay_iters: usize,
    current_step: usize,
}

impl LrScheduler {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            policy: config.lr_policy,
            base_lr: config.lr,
            epoch_count: config.epoch_count,
            n_epochs: config.n_epochs,
            n_epochs_decay: config.n_epochs_decay,
            lr_decay_iters: config.lr_decay_iters,
            current_step: 0,
        }
    }

    pub fn get_lr(&self) -> f64 {
        self.base_lr * self.factor(self.current_step)
    }

    pub fn step(&mut self) -> f64 {
        self.current_step += 1;
        self.get_lr()
    }

    fn factor(&self, step: usize) -> f64 {
        match self.policy {
            // Constant for n_epochs, then linear decay to zero over n_epochs_decay.
            LrPolicy::Linear => {
                let past = (step + self.epoch_count).saturating_sub(self.n_epochs);
                1.0 - past as f64 / (self.n_epochs_decay + 1) as f64
            }
            LrPolicy::Step => 0.1f64.powi((step / self.lr_decay_iters.max(1)) as i32),
            // Period 2 * n_epochs, so the decay epochs climb back up like torch's
            // CosineAnnealingLR(T_max = n_epochs, eta_min = 0).
            LrPolicy::Cosine => {
                0.5 * (1.0 + (PI * step as f64 / self.n_epochs.max(1) as f64).cos())
            }
        }
    }
}
