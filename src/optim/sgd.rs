use serde::{Deserialize, Serialize};
use tch::{no_grad, Tensor};

/// Momentum used when fine-tuning heads.
pub const MOMENTUM: f64 = 0.9;

/// Hyper-parameters of the optimizer, as recorded in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub lr: f64,
    pub initial_lr: f64,
    pub momentum: f64,
    pub params: Vec<String>,
}

/// Stochastic gradient descent with momentum over an explicit list of named
/// parameters.
///
/// Unlike the libtorch optimizers the momentum buffers are kept on the rust
/// side so that they can be written to checkpoints. A buffer is created the
/// first time its parameter receives a gradient.
pub struct Sgd {
    config: SgdConfig,
    params: Vec<(String, Tensor)>,
    buffers: Vec<Option<Tensor>>,
}

impl std::fmt::Debug for Sgd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sgd").field("config", &self.config).finish()
    }
}

impl Sgd {
    pub fn new(params: Vec<(String, Tensor)>, lr: f64, momentum: f64) -> Sgd {
        let names = params.iter().map(|(name, _)| name.clone()).collect();
        let buffers = params.iter().map(|_| None).collect();
        let config = SgdConfig { lr, initial_lr: lr, momentum, params: names };
        Sgd { config, params, buffers }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    pub fn lr(&self) -> f64 {
        self.config.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.config.lr = lr
    }

    pub fn parameters(&self) -> &[(String, Tensor)] {
        &self.params
    }

    /// The momentum buffers created so far, keyed by parameter name.
    pub fn momentum_buffers(&self) -> Vec<(String, Tensor)> {
        self.params
            .iter()
            .zip(self.buffers.iter())
            .filter_map(|((name, _), buffer)| {
                buffer.as_ref().map(|b| (name.clone(), b.shallow_clone()))
            })
            .collect()
    }

    /// Zeroes the gradient of every parameter.
    pub fn zero_grad(&mut self) {
        for (_, param) in self.params.iter_mut() {
            param.zero_grad();
        }
    }

    /// Applies one update, outside of the autograd graph.
    pub fn step(&mut self) {
        no_grad(|| self.step_());
    }

    fn step_(&mut self) {
        let (lr, momentum) = (self.config.lr, self.config.momentum);
        for ((_, param), buffer) in self.params.iter_mut().zip(self.buffers.iter_mut()) {
            let grad = param.grad();
            // parameters that did not take part in the loss have no gradient
            if !grad.defined() {
                continue;
            }
            let update = if momentum == 0. {
                grad
            } else {
                match buffer {
                    Some(buf) => {
                        *buf *= momentum;
                        *buf += &grad;
                        buf.shallow_clone()
                    }
                    None => {
                        let buf = grad.copy();
                        let update = buf.shallow_clone();
                        *buffer = Some(buf);
                        update
                    }
                }
            };
            *param -= update * lr;
        }
    }

    /// Zeroes the gradients, back-propagates `loss` and applies an update.
    pub fn backward_step(&mut self, loss: &Tensor) {
        self.zero_grad();
        loss.backward();
        self.step();
    }
}
