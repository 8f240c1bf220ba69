//! Supported pretrained architectures.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tch::nn::{self, ModuleT};
use tch::vision::{resnet, vgg};

use crate::vision::vgg::{vgg16_features, FEATURES_DIM as VGG16_FEATURES_DIM};
use crate::Error;

/// Number of classes of the imagenet heads shipped with the pretrained weights.
pub const IMAGENET_CLASSES: i64 = 1000;

/// Width of the pooled resnet18 features fed to `fc`.
pub const RESNET18_FEATURES_DIM: i64 = 512;

/// The closed set of backbones that can be fine-tuned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[clap(name = "vgg16")]
    Vgg16,
    #[clap(name = "resnet18")]
    Resnet18,
}

impl Arch {
    pub fn name(self) -> &'static str {
        match self {
            Arch::Vgg16 => "vgg16",
            Arch::Resnet18 => "resnet18",
        }
    }

    /// Var store prefix of the classification head, also the checkpoint key
    /// holding the head description.
    pub fn head_key(self) -> &'static str {
        match self {
            Arch::Vgg16 => "classifier",
            Arch::Resnet18 => "fc",
        }
    }

    /// Weight of the first linear layer of the original imagenet head. Its
    /// second dimension is the width of the backbone features.
    pub fn pretrained_head_weight(self) -> &'static str {
        match self {
            Arch::Vgg16 => "classifier.0.weight",
            Arch::Resnet18 => "fc.weight",
        }
    }

    /// Width of the flattened backbone features.
    pub fn features_dim(self) -> i64 {
        match self {
            Arch::Vgg16 => VGG16_FEATURES_DIM,
            Arch::Resnet18 => RESNET18_FEATURES_DIM,
        }
    }

    /// File name of the pretrained weights when none is given explicitly.
    pub fn default_weights(self) -> String {
        format!("{}.ot", self.name())
    }

    /// Builds the feature extractor alone, without any classification layer.
    pub fn backbone(self, p: &nn::Path) -> Box<dyn ModuleT> {
        match self {
            Arch::Vgg16 => Box::new(vgg16_features(p)),
            Arch::Resnet18 => Box::new(resnet::resnet18_no_final_layer(p)),
        }
    }

    /// Builds the complete imagenet network, matching the layout of the
    /// pretrained weight files.
    pub fn pretrained_network(self, p: &nn::Path) -> Box<dyn ModuleT> {
        match self {
            Arch::Vgg16 => Box::new(vgg::vgg16(p, IMAGENET_CLASSES)),
            Arch::Resnet18 => Box::new(resnet::resnet18(p, IMAGENET_CLASSES)),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vgg16" => Ok(Arch::Vgg16),
            "resnet18" => Ok(Arch::Resnet18),
            _ => Err(Error::UnknownArchitecture(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("vgg16".parse::<Arch>().unwrap(), Arch::Vgg16);
        assert_eq!("resnet18".parse::<Arch>().unwrap(), Arch::Resnet18);
        assert!(matches!("alexnet".parse::<Arch>(), Err(Error::UnknownArchitecture(s)) if s == "alexnet"));
        assert!("VGG16".parse::<Arch>().is_err());
    }

    #[test]
    fn names() {
        for arch in [Arch::Vgg16, Arch::Resnet18] {
            assert_eq!(arch.to_string().parse::<Arch>().unwrap(), arch);
            assert!(arch.pretrained_head_weight().starts_with(arch.head_key()));
        }
        assert_eq!(Arch::Vgg16.head_key(), "classifier");
        assert_eq!(Arch::Resnet18.head_key(), "fc");
        assert_eq!(Arch::Resnet18.default_weights(), "resnet18.ot");
    }
}
