use super::Sgd;

/// Epochs between two learning rate decays.
pub const STEP_SIZE: i64 = 7;
/// Factor applied to the learning rate at each decay.
pub const GAMMA: f64 = 0.1;

/// Decays the learning rate by `gamma` every `step_size` epochs.
///
/// `lr = initial_lr * gamma^(epoch / step_size)`
#[derive(Debug, Clone)]
pub struct StepLr {
    initial_lr: f64,
    step_size: i64,
    gamma: f64,
    epoch: i64,
}

impl StepLr {
    pub fn new(optimizer: &Sgd, step_size: i64, gamma: f64) -> StepLr {
        StepLr { initial_lr: optimizer.config().initial_lr, step_size, gamma, epoch: 0 }
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    pub fn lr(&self) -> f64 {
        if self.step_size <= 0 {
            return self.initial_lr;
        }
        self.initial_lr * self.gamma.powi((self.epoch / self.step_size) as i32)
    }

    /// Moves to the next epoch and updates the optimizer learning rate.
    pub fn step(&mut self, optimizer: &mut Sgd) {
        self.epoch += 1;
        optimizer.set_lr(self.lr());
    }
}
