//! Optimization of the head parameters.
mod scheduler;
mod sgd;

pub use scheduler::{StepLr, GAMMA, STEP_SIZE};
pub use sgd::{Sgd, SgdConfig, MOMENTUM};
