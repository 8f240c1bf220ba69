//! Trainable classification heads attached on top of a frozen backbone.
use serde::{Deserialize, Serialize};
use tch::nn::{self, ModuleT, SequentialT};
use tch::Tensor;

use crate::{Arch, Error, Result};

/// Number of outputs of every head.
pub const NUM_CLASSES: i64 = 102;

/// Width of the first hidden layer of the vgg16 head.
pub const VGG_HIDDEN: i64 = 4096;

pub const DROPOUT: f64 = 0.5;

/// One layer of a head. Linear layers are named after the var store prefix
/// of their weights, e.g. `classifier.fc1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeadLayer {
    Linear { name: String, in_features: i64, out_features: i64 },
    Relu,
    Dropout { p: f64 },
}

fn linear(name: String, in_features: i64, out_features: i64) -> HeadLayer {
    HeadLayer::Linear { name, in_features, out_features }
}

/// The layers of the head used for `arch` given the width of the backbone
/// features.
pub fn layout(arch: Arch, in_features: i64, hidden_units: i64) -> Vec<HeadLayer> {
    let key = arch.head_key();
    match arch {
        Arch::Vgg16 => vec![
            linear(format!("{key}.fc1"), in_features, VGG_HIDDEN),
            HeadLayer::Relu,
            HeadLayer::Dropout { p: DROPOUT },
            linear(format!("{key}.fc2"), VGG_HIDDEN, hidden_units),
            HeadLayer::Relu,
            HeadLayer::Dropout { p: DROPOUT },
            linear(format!("{key}.fc3"), hidden_units, NUM_CLASSES),
        ],
        Arch::Resnet18 => vec![linear(key.to_string(), in_features, NUM_CLASSES)],
    }
}

/// Checks that linear layers chain up with positive widths, that their names
/// live under the head key of `arch`, that dropout probabilities lie in
/// [0, 1], and that the head ends with a linear layer.
pub fn check_layout(arch: Arch, layers: &[HeadLayer]) -> Result<()> {
    let prefix = format!("{}.", arch.head_key());
    let mut width: Option<i64> = None;
    for layer in layers.iter() {
        match layer {
            HeadLayer::Linear { name, in_features, out_features } => {
                if name != arch.head_key() && !name.starts_with(&prefix) {
                    return Err(Error::FileFormat(format!(
                        "head layer {name} outside of {prefix}"
                    )));
                }
                if *in_features < 1 || *out_features < 1 {
                    return Err(Error::FileFormat(format!(
                        "head layer {name} has shape {in_features}x{out_features}"
                    )));
                }
                if let Some(w) = width {
                    if w != *in_features {
                        return Err(Error::FileFormat(format!(
                            "head layer {name} expects {in_features} inputs, got {w}"
                        )));
                    }
                }
                width = Some(*out_features)
            }
            HeadLayer::Dropout { p } if !(0.0..=1.0).contains(p) => {
                return Err(Error::FileFormat(format!("dropout probability {p}")));
            }
            HeadLayer::Relu | HeadLayer::Dropout { .. } => {}
        }
    }
    match layers.last() {
        Some(HeadLayer::Linear { .. }) => Ok(()),
        _ => Err(Error::FileFormat("head does not end with a linear layer".to_string())),
    }
}

fn sub_path<'a>(root: &nn::Path<'a>, name: &str) -> nn::Path<'a> {
    let mut parts = name.split('.');
    let mut p = root / parts.next().unwrap_or(name);
    for part in parts {
        p = &p / part;
    }
    p
}

/// A head together with the description it was built from.
#[derive(Debug)]
pub struct Head {
    layers: Vec<HeadLayer>,
    seq: SequentialT,
}

impl Head {
    pub fn new(root: &nn::Path, arch: Arch, in_features: i64, hidden_units: i64) -> Head {
        Head::from_layers(root, layout(arch, in_features, hidden_units))
    }

    /// Creates the variables of every linear layer under `root`.
    pub fn from_layers(root: &nn::Path, layers: Vec<HeadLayer>) -> Head {
        let mut seq = nn::seq_t();
        for layer in layers.iter() {
            seq = match *layer {
                HeadLayer::Linear { ref name, in_features, out_features } => seq.add(nn::linear(
                    sub_path(root, name),
                    in_features,
                    out_features,
                    Default::default(),
                )),
                HeadLayer::Relu => seq.add_fn(|xs| xs.relu()),
                HeadLayer::Dropout { p } => seq.add_fn_t(move |xs, train| xs.dropout(p, train)),
            }
        }
        Head { layers, seq }
    }

    pub fn layers(&self) -> &[HeadLayer] {
        &self.layers
    }

    /// `(in_features, out_features)` of the linear layers, in order.
    pub fn linear_shapes(&self) -> Vec<(i64, i64)> {
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                HeadLayer::Linear { in_features, out_features, .. } => {
                    Some((*in_features, *out_features))
                }
                _ => None,
            })
            .collect()
    }

    pub fn out_features(&self) -> i64 {
        self.linear_shapes().last().map_or(0, |s| s.1)
    }
}

impl ModuleT for Head {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply_t(&self.seq, train)
    }
}
