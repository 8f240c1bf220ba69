use std::io;

use thiserror::Error;

/// Main library error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Architecture name outside of the supported set.
    #[error("unknown architecture {0}, expected vgg16 or resnet18")]
    UnknownArchitecture(String),

    /// A required dataset split directory does not exist.
    #[error("missing dataset split {split} in {dir}")]
    MissingSplit { split: String, dir: String },

    /// A split directory without any class sub-directory.
    #[error("no class directory found in {0}")]
    MissingClasses(String),

    /// A class directory without any image.
    #[error("no image found in {0}")]
    MissingImage(String),

    /// A split whose classes differ from the training split.
    #[error("classes of split {split} do not match the training split")]
    ClassMismatch { split: String },

    /// More classes than the head has outputs.
    #[error("dataset has {classes} classes but the head only has {outputs} outputs")]
    TooManyClasses { classes: usize, outputs: i64 },

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    FileFormat(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// JSON encoding or decoding of checkpoint metadata.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Errors returned by torch.
    #[error(transparent)]
    Torch(#[from] tch::TchError),

    /// Safetensors serialization error.
    #[error("safetensors error {path}: {err}")]
    SafeTensor { path: String, err: safetensors::SafeTensorError },
}

pub type Result<T> = std::result::Result<T, Error>;
