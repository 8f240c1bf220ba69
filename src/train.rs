//! The fit/validation loop.
//!
//! The backbone being frozen, its activations are computed once per split
//! and the epochs only run the head, as in the usual transfer learning setup.
use log::{debug, info};
use tch::data::Iter2;
use tch::{Device, Tensor};

use crate::model::FineTuneModel;
use crate::optim::{Sgd, StepLr};
use crate::vision::image_folder::{Datasets, ImageFolder};
use crate::{Error, Result};

/// Loss minimized by the training loop.
pub trait Criterion {
    fn loss(&self, logits: &Tensor, targets: &Tensor) -> Tensor;
}

/// Cross entropy on unnormalized logits, averaged over the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl Criterion for CrossEntropyLoss {
    fn loss(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        logits.cross_entropy_for_logits(targets)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    pub epochs: i64,
    pub batch_size: i64,
}

/// Statistics gathered at the end of an epoch. Accuracies are in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: i64,
    pub lr: f64,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub history: Vec<EpochStats>,
    /// Epoch of the weights left in the model, `None` when no epoch ran.
    pub best_epoch: Option<i64>,
    pub best_valid_accuracy: f64,
}

/// Backbone activations of a whole split, kept on the cpu.
#[derive(Debug)]
pub struct Features {
    pub features: Tensor,
    pub labels: Tensor,
}

/// Runs the images of `folder` through the backbone, `batch_size` at a time.
pub fn extract_features(
    model: &FineTuneModel,
    folder: &ImageFolder,
    batch_size: i64,
) -> Result<Features> {
    if folder.is_empty() {
        return Err(Error::MissingImage(folder.root().display().to_string()));
    }
    let batch_size = batch_size.max(1) as usize;
    let mut features = vec![];
    let mut labels = vec![];
    for start in (0..folder.len()).step_by(batch_size) {
        let (images, ys) = folder.load_batch(start, batch_size)?;
        features.push(model.features(&images).to_device(Device::Cpu));
        labels.push(ys);
    }
    debug!("extracted features of {} images from {}", folder.len(), folder.root().display());
    Ok(Features { features: Tensor::f_cat(&features, 0)?, labels: Tensor::f_cat(&labels, 0)? })
}

/// Mean loss and accuracy of the head over some features, in eval mode.
pub fn evaluate<C: Criterion>(
    model: &FineTuneModel,
    criterion: &C,
    data: &Features,
    batch_size: i64,
) -> Result<(f64, f64)> {
    let device = model.device();
    let (mut loss, mut correct, mut seen) = (0f64, 0f64, 0i64);
    tch::no_grad(|| {
        let mut iter = Iter2::new(&data.features, &data.labels, batch_size.max(1));
        for (xs, ys) in iter.to_device(device).return_smaller_last_batch() {
            let n = ys.size()[0];
            let logits = model.classify_t(&xs, false);
            loss += f64::try_from(criterion.loss(&logits, &ys))? * n as f64;
            correct += f64::try_from(logits.accuracy_for_logits(&ys))? * n as f64;
            seen += n;
        }
        Ok::<(), Error>(())
    })?;
    let seen = seen.max(1) as f64;
    Ok((loss / seen, correct / seen))
}

fn snapshot(params: &[(String, Tensor)]) -> Vec<Tensor> {
    tch::no_grad(|| params.iter().map(|(_, p)| p.copy()).collect())
}

fn restore(params: &mut [(String, Tensor)], saved: &[Tensor]) -> Result<()> {
    tch::no_grad(|| {
        for ((_, p), s) in params.iter_mut().zip(saved.iter()) {
            p.f_copy_(s)?;
        }
        Ok(())
    })
}

/// Trains the head of `model` for `options.epochs` epochs on the `train`
/// split, validating on `valid` after every epoch.
///
/// The scheduler is stepped once per epoch. At the end the head holds the
/// weights of the epoch with the best validation accuracy.
pub fn train_model<C: Criterion>(
    model: &mut FineTuneModel,
    criterion: &C,
    optimizer: &mut Sgd,
    scheduler: &mut StepLr,
    datasets: &Datasets,
    options: TrainOptions,
) -> Result<TrainReport> {
    let train = extract_features(model, &datasets.train, options.batch_size)?;
    let valid = extract_features(model, &datasets.valid, options.batch_size)?;
    let device = model.device();
    let mut head_params = model.head_parameters();
    let mut best = None;
    let mut report = TrainReport { history: vec![], best_epoch: None, best_valid_accuracy: 0. };

    for epoch in 1..=options.epochs {
        let lr = optimizer.lr();
        let (mut loss_sum, mut correct, mut seen) = (0f64, 0f64, 0i64);
        let mut iter = Iter2::new(&train.features, &train.labels, options.batch_size.max(1));
        for (xs, ys) in iter.shuffle().to_device(device).return_smaller_last_batch() {
            let n = ys.size()[0];
            let logits = model.classify_t(&xs, true);
            let loss = criterion.loss(&logits, &ys);
            optimizer.backward_step(&loss);
            loss_sum += f64::try_from(&loss)? * n as f64;
            let accuracy = tch::no_grad(|| logits.accuracy_for_logits(&ys));
            correct += f64::try_from(&accuracy)? * n as f64;
            seen += n;
        }
        let seen = seen.max(1) as f64;
        let (valid_loss, valid_accuracy) = evaluate(model, criterion, &valid, options.batch_size)?;
        scheduler.step(optimizer);

        let stats = EpochStats {
            epoch,
            lr,
            train_loss: loss_sum / seen,
            train_accuracy: correct / seen,
            valid_loss,
            valid_accuracy,
        };
        info!(
            "epoch {}/{} lr {:.2e} train loss {:.4} acc {:.2}% valid loss {:.4} acc {:.2}%",
            epoch,
            options.epochs,
            lr,
            stats.train_loss,
            100. * stats.train_accuracy,
            valid_loss,
            100. * valid_accuracy,
        );
        if report.best_epoch.is_none() || valid_accuracy > report.best_valid_accuracy {
            report.best_epoch = Some(epoch);
            report.best_valid_accuracy = valid_accuracy;
            best = Some(snapshot(&head_params));
        }
        report.history.push(stats);
    }

    if let (Some(epoch), Some(best)) = (report.best_epoch, best) {
        restore(&mut head_params, &best)?;
        info!(
            "best valid accuracy {:.2}% at epoch {epoch}",
            100. * report.best_valid_accuracy
        );
    }
    Ok(report)
}

/// Accuracy of `model` on a whole split.
pub fn test_accuracy(model: &FineTuneModel, folder: &ImageFolder, batch_size: i64) -> Result<f64> {
    let data = extract_features(model, folder, batch_size)?;
    let (_, accuracy) = evaluate(model, &CrossEntropyLoss, &data, batch_size)?;
    Ok(accuracy)
}

