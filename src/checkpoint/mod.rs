//! Checkpoints written at the end of a run.
//!
//! A checkpoint is a single safetensors file. The model variables are stored
//! under `state_dict.`, the optimizer momentum buffers under
//! `optimizer.momentum_buffer.`, and everything else goes in the string
//! metadata of the file: `arch`, `hidden_units`, `learning_rate`, `epochs`,
//! `class_to_idx`, `optimizer`, and the head description under either
//! `classifier` or `fc` depending on the architecture.
pub mod safetensors;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;
use tch::Tensor;

use crate::model::{FineTuneModel, HeadLayer};
use crate::optim::{Sgd, SgdConfig};
use crate::{Arch, Config, Error, Result};

/// File name of the checkpoint, appended to the save directory as is.
pub const CHECKPOINT_NAME: &str = "checkpoint-part-2.pth";

const STATE_DICT: &str = "state_dict.";
const MOMENTUM_BUFFER: &str = "optimizer.momentum_buffer.";

pub const ARCH: &str = "arch";
pub const HIDDEN_UNITS: &str = "hidden_units";
pub const LEARNING_RATE: &str = "learning_rate";
pub const EPOCHS: &str = "epochs";
pub const CLASS_TO_IDX: &str = "class_to_idx";
pub const OPTIMIZER: &str = "optimizer";

/// Location of the checkpoint. The save directory is a plain prefix: no
/// separator is inserted, so `out` gives `outcheckpoint-part-2.pth`.
pub fn checkpoint_path(save_dir: Option<&str>) -> PathBuf {
    PathBuf::from(format!("{}{}", save_dir.unwrap_or(""), CHECKPOINT_NAME))
}

fn field<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .map(|v| v.as_str())
        .ok_or_else(|| Error::FileFormat(format!("missing checkpoint field {key}")))
}

fn parse_field<T: FromStr>(metadata: &HashMap<String, String>, key: &str) -> Result<T> {
    let value = field(metadata, key)?;
    value.parse().map_err(|_| Error::FileFormat(format!("invalid {key} {value}")))
}

#[derive(Debug)]
pub struct Checkpoint {
    pub arch: Arch,
    pub hidden_units: i64,
    pub learning_rate: f64,
    pub epochs: i64,
    pub class_to_idx: BTreeMap<String, i64>,
    pub optimizer: SgdConfig,
    pub momentum_buffers: Vec<(String, Tensor)>,
    pub state_dict: Vec<(String, Tensor)>,
    pub head: Vec<HeadLayer>,
}

impl Checkpoint {
    pub fn new(
        model: &FineTuneModel,
        optimizer: &Sgd,
        config: &Config,
        class_to_idx: &BTreeMap<String, i64>,
    ) -> Checkpoint {
        Checkpoint {
            arch: model.arch(),
            hidden_units: model.hidden_units(),
            learning_rate: config.learning_rate,
            epochs: config.epochs,
            class_to_idx: class_to_idx.clone(),
            optimizer: optimizer.config().clone(),
            momentum_buffers: optimizer.momentum_buffers(),
            state_dict: model.state_dict(),
            head: model.head().layers().to_vec(),
        }
    }

    /// The string metadata stored in the file.
    pub fn metadata(&self) -> Result<HashMap<String, String>> {
        let mut metadata = HashMap::new();
        metadata.insert(ARCH.to_string(), self.arch.to_string());
        metadata.insert(HIDDEN_UNITS.to_string(), self.hidden_units.to_string());
        metadata.insert(LEARNING_RATE.to_string(), self.learning_rate.to_string());
        metadata.insert(EPOCHS.to_string(), self.epochs.to_string());
        metadata.insert(CLASS_TO_IDX.to_string(), serde_json::to_string(&self.class_to_idx)?);
        metadata.insert(OPTIMIZER.to_string(), serde_json::to_string(&self.optimizer)?);
        metadata.insert(self.arch.head_key().to_string(), serde_json::to_string(&self.head)?);
        Ok(metadata)
    }

    fn tensors(&self) -> Vec<(String, Tensor)> {
        let state_dict = self
            .state_dict
            .iter()
            .map(|(name, t)| (format!("{STATE_DICT}{name}"), t.shallow_clone()));
        let buffers = self
            .momentum_buffers
            .iter()
            .map(|(name, t)| (format!("{MOMENTUM_BUFFER}{name}"), t.shallow_clone()));
        state_dict.chain(buffers).collect()
    }

    /// Writes the checkpoint to a temporary file next to `path` and renames
    /// it into place, so that `path` never holds a partial checkpoint.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let written = safetensors::write(&self.tensors(), self.metadata()?, &tmp)
            .and_then(|()| Ok(std::fs::rename(&tmp, path)?));
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        written?;
        info!("saved {} checkpoint to {}", self.arch, path.display());
        Ok(())
    }

    pub fn load<T: AsRef<Path>>(path: T) -> Result<Checkpoint> {
        let (tensors, metadata) = safetensors::read(path)?;
        let arch: Arch = field(&metadata, ARCH)?.parse()?;
        for other in [Arch::Vgg16, Arch::Resnet18] {
            if other.head_key() != arch.head_key() && metadata.contains_key(other.head_key()) {
                return Err(Error::FileFormat(format!(
                    "{arch} checkpoint with a {} head",
                    other.head_key()
                )));
            }
        }
        let head: Vec<HeadLayer> = serde_json::from_str(field(&metadata, arch.head_key())?)?;
        let class_to_idx = serde_json::from_str(field(&metadata, CLASS_TO_IDX)?)?;
        let optimizer = serde_json::from_str(field(&metadata, OPTIMIZER)?)?;

        let mut state_dict = vec![];
        let mut momentum_buffers = vec![];
        for (name, tensor) in tensors {
            if let Some(name) = name.strip_prefix(STATE_DICT) {
                state_dict.push((name.to_string(), tensor))
            } else if let Some(name) = name.strip_prefix(MOMENTUM_BUFFER) {
                momentum_buffers.push((name.to_string(), tensor))
            } else {
                return Err(Error::FileFormat(format!("unexpected tensor {name}")));
            }
        }
        state_dict.sort_by(|a, b| a.0.cmp(&b.0));
        momentum_buffers.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Checkpoint {
            arch,
            hidden_units: parse_field(&metadata, HIDDEN_UNITS)?,
            learning_rate: parse_field(&metadata, LEARNING_RATE)?,
            epochs: parse_field(&metadata, EPOCHS)?,
            class_to_idx,
            optimizer,
            momentum_buffers,
            state_dict,
            head,
        })
    }
}
