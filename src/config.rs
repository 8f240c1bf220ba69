//! Command line configuration.
use std::path::PathBuf;

use clap::Parser;

use crate::checkpoint;
use crate::Arch;

/// Fine-tunes a pretrained vgg16 or resnet18 on an image folder dataset and
/// writes a checkpoint.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Dataset directory, holding `train`, `valid` and optionally `test`
    /// sub-directories with one directory per class.
    pub data_dir: PathBuf,

    /// Prefix of the checkpoint file, a trailing separator is not added.
    #[arg(long = "save_dir")]
    pub save_dir: Option<String>,

    /// Pretrained architecture to fine-tune.
    #[arg(long, value_enum, default_value = "vgg16")]
    pub arch: Arch,

    #[arg(long = "learning_rate", default_value_t = 0.01)]
    pub learning_rate: f64,

    /// Width of the second hidden layer of the vgg16 head.
    #[arg(long = "hidden_units", default_value_t = 1000, value_parser = clap::value_parser!(i64).range(1..))]
    pub hidden_units: i64,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(i64).range(0..))]
    pub epochs: i64,

    /// Train on a gpu when one is available.
    #[arg(long = "gpu")]
    pub use_accelerator: bool,

    /// Pretrained weight file, `<arch>.ot` by default.
    #[arg(long)]
    pub weights: Option<PathBuf>,

    #[arg(long = "batch_size", default_value_t = 64, value_parser = clap::value_parser!(i64).range(1..))]
    pub batch_size: i64,
}

impl Config {
    pub fn checkpoint_path(&self) -> PathBuf {
        checkpoint::checkpoint_path(self.save_dir.as_deref())
    }

    pub fn weights_path(&self) -> PathBuf {
        self.weights.clone().unwrap_or_else(|| PathBuf::from(self.arch.default_weights()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["train", "flowers"]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("flowers"));
        assert_eq!(config.save_dir, None);
        assert_eq!(config.arch, Arch::Vgg16);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.hidden_units, 1000);
        assert_eq!(config.epochs, 10);
        assert!(!config.use_accelerator);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.weights_path(), PathBuf::from("vgg16.ot"));
        assert_eq!(config.checkpoint_path(), PathBuf::from("checkpoint-part-2.pth"));
    }

    #[test]
    fn all_flags() {
        let config = Config::try_parse_from([
            "train",
            "flowers",
            "--save_dir",
            "out/",
            "--arch",
            "resnet18",
            "--learning_rate",
            "0.001",
            "--hidden_units",
            "500",
            "--epochs",
            "3",
            "--gpu",
            "--weights",
            "weights/resnet18.ot",
        ])
        .unwrap();
        assert_eq!(config.arch, Arch::Resnet18);
        assert_eq!(config.learning_rate, 0.001);
        assert_eq!(config.hidden_units, 500);
        assert_eq!(config.epochs, 3);
        assert!(config.use_accelerator);
        assert_eq!(config.weights_path(), PathBuf::from("weights/resnet18.ot"));
        assert_eq!(config.checkpoint_path(), PathBuf::from("out/checkpoint-part-2.pth"));
    }

    #[test]
    fn save_dir_without_separator() {
        let config = Config::try_parse_from(["train", "flowers", "--save_dir", "out"]).unwrap();
        assert_eq!(config.checkpoint_path(), PathBuf::from("outcheckpoint-part-2.pth"));
    }

    #[test]
    fn invalid_arguments() {
        let err = Config::try_parse_from(["train", "flowers", "--arch", "alexnet"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        let err = Config::try_parse_from(["train"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert!(Config::try_parse_from(["train", "flowers", "--epochs", "ten"]).is_err());
        assert!(Config::try_parse_from(["train", "flowers", "--hidden_units", "0"]).is_err());
    }
}
