// Fine-tunes a pretrained vgg16 or resnet18 on an image folder dataset.
//
// The dataset directory should contain `train` and `valid` directories, and
// optionally a `test` one, each with one sub-directory per class.
//
// Pre-trained weights are read from `vgg16.ot` or `resnet18.ot` unless
// `--weights` is given, they can be found here:
// https://github.com/LaurentMazare/tch-rs/releases/download/mw/vgg16.ot
// https://github.com/LaurentMazare/ocaml-torch/releases/download/v0.1-unstable/resnet18.ot
use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use tch_finetune::Config;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Config::parse();
    info!("{config:?}");
    let report = tch_finetune::run(&config)
        .with_context(|| format!("fine-tuning {} on {}", config.arch, config.data_dir.display()))?;
    if let Some(epoch) = report.best_epoch {
        info!("kept the weights of epoch {epoch}");
    }
    info!("checkpoint written to {}", config.checkpoint_path().display());
    Ok(())
}
