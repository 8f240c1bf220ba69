//! Assembly of a pretrained backbone with a new classification head.
pub mod head;

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use tch::nn::{ModuleT, VarStore};
use tch::{Device, Tensor};

use crate::checkpoint::Checkpoint;
use crate::optim::{Sgd, MOMENTUM};
use crate::{Arch, Error, Result};
pub use head::{Head, HeadLayer, NUM_CLASSES};

/// A frozen pretrained backbone followed by a trainable head, all the
/// variables living in a single var store.
#[derive(Debug)]
pub struct FineTuneModel {
    arch: Arch,
    hidden_units: i64,
    vs: VarStore,
    backbone: Box<dyn ModuleT>,
    head: Head,
}

/// Reads the width of the backbone features from the first layer of the
/// original head.
pub fn head_in_features(arch: Arch, pretrained: &VarStore) -> Result<i64> {
    let name = arch.pretrained_head_weight();
    match pretrained.variables().get(name).map(|w| w.size()) {
        Some(size) if size.len() == 2 => Ok(size[1]),
        Some(size) => Err(Error::FileFormat(format!("unexpected shape {size:?} for {name}"))),
        None => Err(Error::FileFormat(format!("cannot find {name} in the pretrained weights"))),
    }
}

/// Loads the pretrained weights of `arch`, attaches a new head and returns
/// the model along with an optimizer over the head parameters.
pub fn assemble<T: AsRef<Path>>(
    arch: Arch,
    weights: T,
    hidden_units: i64,
    learning_rate: f64,
    device: Device,
) -> Result<(FineTuneModel, Sgd)> {
    let model = FineTuneModel::from_pretrained(arch, weights, hidden_units, device)?;
    let optimizer = model.optimizer(learning_rate);
    Ok((model, optimizer))
}

impl FineTuneModel {
    /// Loads the pretrained network of `arch` from a weight file, see
    /// [`FineTuneModel::from_pretrained_store`].
    pub fn from_pretrained<T: AsRef<Path>>(
        arch: Arch,
        weights: T,
        hidden_units: i64,
        device: Device,
    ) -> Result<FineTuneModel> {
        let weights = weights.as_ref();
        let mut pretrained = VarStore::new(Device::Cpu);
        let _network = arch.pretrained_network(&pretrained.root());
        pretrained.load(weights)?;
        info!("loaded pretrained {arch} weights from {}", weights.display());
        FineTuneModel::from_pretrained_store(arch, &pretrained, hidden_units, device)
    }

    /// Copies the backbone variables out of `pretrained`, which must hold the
    /// full imagenet network of `arch`, freezes them and attaches a new head.
    pub fn from_pretrained_store(
        arch: Arch,
        pretrained: &VarStore,
        hidden_units: i64,
        device: Device,
    ) -> Result<FineTuneModel> {
        let in_features = head_in_features(arch, pretrained)?;
        let mut vs = VarStore::new(device);
        let backbone = arch.backbone(&vs.root());
        vs.copy(pretrained)?;
        vs.freeze();
        let head = Head::new(&vs.root(), arch, in_features, hidden_units);
        debug!("{arch} head: {:?}", head.linear_shapes());
        Ok(FineTuneModel { arch, hidden_units, vs, backbone, head })
    }

    /// Rebuilds a model from a checkpoint: the backbone of its arch, the head
    /// it describes, and all the saved weights.
    pub fn from_checkpoint(checkpoint: &Checkpoint, device: Device) -> Result<FineTuneModel> {
        let arch = checkpoint.arch;
        head::check_layout(arch, &checkpoint.head)?;
        let in_features = checkpoint.head.iter().find_map(|layer| match layer {
            HeadLayer::Linear { in_features, .. } => Some(*in_features),
            _ => None,
        });
        if in_features != Some(arch.features_dim()) {
            return Err(Error::FileFormat(format!(
                "{arch} head expects {in_features:?} features instead of {}",
                arch.features_dim()
            )));
        }
        let mut vs = VarStore::new(device);
        let backbone = arch.backbone(&vs.root());
        vs.freeze();
        let head = Head::from_layers(&vs.root(), checkpoint.head.clone());

        let saved: HashMap<&str, &Tensor> =
            checkpoint.state_dict.iter().map(|(name, t)| (name.as_str(), t)).collect();
        tch::no_grad(|| {
            for (name, mut var) in vs.variables() {
                let src = saved.get(name.as_str()).ok_or_else(|| {
                    Error::FileFormat(format!("cannot find {name} in the checkpoint"))
                })?;
                var.f_copy_(src)?;
            }
            Ok::<(), Error>(())
        })?;
        Ok(FineTuneModel { arch, hidden_units: checkpoint.hidden_units, vs, backbone, head })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn hidden_units(&self) -> i64 {
        self.hidden_units
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn num_classes(&self) -> i64 {
        self.head.out_features()
    }

    /// All the variables, sorted by name.
    pub fn state_dict(&self) -> Vec<(String, Tensor)> {
        let mut variables: Vec<_> = self.vs.variables().into_iter().collect();
        variables.sort_by(|a, b| a.0.cmp(&b.0));
        variables
    }

    /// The head variables, sorted by name.
    pub fn head_parameters(&self) -> Vec<(String, Tensor)> {
        let key = self.arch.head_key();
        let prefix = format!("{key}.");
        self.state_dict()
            .into_iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .collect()
    }

    /// Momentum SGD over the head parameters only.
    pub fn optimizer(&self, learning_rate: f64) -> Sgd {
        Sgd::new(self.head_parameters(), learning_rate, MOMENTUM)
    }

    /// Runs the frozen backbone in evaluation mode, without tracking
    /// gradients. The features are returned on the model device.
    pub fn features(&self, images: &Tensor) -> Tensor {
        let images = images.to_device(self.device());
        tch::no_grad(|| self.backbone.forward_t(&images, false))
    }

    /// Applies the head to precomputed backbone features.
    pub fn classify_t(&self, features: &Tensor, train: bool) -> Tensor {
        features.apply_t(&self.head, train)
    }
}

impl ModuleT for FineTuneModel {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.classify_t(&self.features(xs), train)
    }
}
