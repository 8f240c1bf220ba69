use tch::nn::{self, Module, VarStore};
use tch::{Device, Kind, Reduction, Tensor};
use tch_finetune::optim::{Sgd, StepLr, GAMMA, STEP_SIZE};

use test_utils::*;

#[test]
fn momentum_update() {
    let vs = VarStore::new(Device::Cpu);
    let p = vs.root().ones("p", &[1]);
    let q = vs.root().ones("q", &[1]);
    let params = vec![("p".to_string(), p.shallow_clone()), ("q".to_string(), q.shallow_clone())];
    let mut opt = Sgd::new(params, 0.1, 0.9);

    // d(2p)/dp = 2, q takes no part in the loss.
    opt.backward_step(&(&p * 2.).sum(Kind::Float));
    assert!((f64_from(&p.sum(Kind::Float)) - 0.8).abs() < 1e-6);

    opt.backward_step(&(&p * 2.).sum(Kind::Float));
    // buffer = 0.9 * 2 + 2 = 3.8, p = 0.8 - 0.1 * 3.8
    assert!((f64_from(&p.sum(Kind::Float)) - 0.42).abs() < 1e-6);
    assert_eq!(f64_from(&q.sum(Kind::Float)), 1.0);

    let buffers = opt.momentum_buffers();
    assert_eq!(buffers.len(), 1);
    assert_eq!(buffers[0].0, "p");
    assert!((f64_from(&buffers[0].1.sum(Kind::Float)) - 3.8).abs() < 1e-6);
}

#[test]
fn fits_a_linear_model() {
    tch::manual_seed(42);
    let xs = Tensor::from_slice(&(1..15).collect::<Vec<_>>()).to_kind(Kind::Float).view([-1, 1]);
    let xs = xs / 14.;
    let ys = &xs * 0.42 + 1.337;

    let vs = VarStore::new(Device::Cpu);
    let linear = nn::linear(vs.root(), 1, 1, Default::default());
    let params = vs.variables().into_iter().collect();
    let mut opt = Sgd::new(params, 0.05, 0.9);

    let initial_loss = f64_from(&xs.apply(&linear).mse_loss(&ys, Reduction::Mean));
    for _idx in 1..500 {
        let loss = linear.forward(&xs).mse_loss(&ys, Reduction::Mean);
        opt.backward_step(&loss);
    }
    let final_loss = f64_from(&xs.apply(&linear).mse_loss(&ys, Reduction::Mean));
    assert!(final_loss < 1e-3, "final loss {final_loss}");
    assert!(final_loss < initial_loss, "initial loss {initial_loss}");
}

#[test]
fn step_lr_decays_every_seven_epochs() {
    let vs = VarStore::new(Device::Cpu);
    let p = vs.root().ones("p", &[1]);
    let mut opt = Sgd::new(vec![("p".to_string(), p)], 0.01, 0.9);
    let mut scheduler = StepLr::new(&opt, STEP_SIZE, GAMMA);

    let mut lrs = vec![opt.lr()];
    for _epoch in 0..15 {
        scheduler.step(&mut opt);
        lrs.push(opt.lr());
    }
    assert_eq!(scheduler.epoch(), 15);
    for (epoch, lr) in lrs.iter().enumerate() {
        let expected = match epoch {
            0..=6 => 0.01,
            7..=13 => 0.001,
            _ => 0.0001,
        };
        assert!((lr - expected).abs() < 1e-12, "epoch {epoch}: {lr}");
    }
    assert_eq!(opt.config().initial_lr, 0.01);
}
