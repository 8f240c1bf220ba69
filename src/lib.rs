//! Fine-tuning of pretrained image classifiers with tch.
//!
//! A pretrained vgg16 or resnet18 is loaded and frozen, its classification
//! layers are replaced by a new head with 102 outputs, the head is trained on
//! an image folder dataset and the result is written to a checkpoint.
mod arch;
pub use arch::Arch;

mod error;
pub use error::{Error, Result};

pub mod checkpoint;
pub use checkpoint::Checkpoint;

pub mod config;
pub use config::Config;

pub mod device;
pub mod model;
pub use model::FineTuneModel;

pub mod optim;
pub mod train;
pub mod vision;

use log::info;

use optim::{StepLr, GAMMA, STEP_SIZE};
use train::{CrossEntropyLoss, TrainOptions, TrainReport};

/// Runs a whole fine-tuning session and writes the checkpoint to
/// `config.checkpoint_path()`.
pub fn run(config: &Config) -> Result<TrainReport> {
    let datasets = vision::image_folder::load_datasets(&config.data_dir)?;
    let device = device::device_type(config.use_accelerator);
    let (mut model, mut optimizer) = model::assemble(
        config.arch,
        config.weights_path(),
        config.hidden_units,
        config.learning_rate,
        device,
    )?;
    let classes = datasets.train.num_classes();
    if classes as i64 > model.num_classes() {
        return Err(Error::TooManyClasses { classes, outputs: model.num_classes() });
    }

    let mut scheduler = StepLr::new(&optimizer, STEP_SIZE, GAMMA);
    let options = TrainOptions { epochs: config.epochs, batch_size: config.batch_size };
    let report = train::train_model(
        &mut model,
        &CrossEntropyLoss,
        &mut optimizer,
        &mut scheduler,
        &datasets,
        options,
    )?;
    if let Some(test) = &datasets.test {
        let accuracy = train::test_accuracy(&model, test, config.batch_size)?;
        info!("test accuracy {:.2}%", 100. * accuracy);
    }

    let checkpoint = Checkpoint::new(&model, &optimizer, config, datasets.class_to_idx());
    checkpoint.save(config.checkpoint_path())?;
    Ok(report)
}
