use tch::nn::{ModuleT, VarStore};
use tch::{kind, Device, Tensor};
use tch_finetune::model::{self, Head, HeadLayer, NUM_CLASSES};
use tch_finetune::{vision, Arch, Error, FineTuneModel};

use test_utils::*;

#[test]
fn resnet18_head() {
    let pretrained = resnet18_store();
    let model =
        FineTuneModel::from_pretrained_store(Arch::Resnet18, &pretrained, 1000, Device::Cpu)
            .unwrap();
    assert_eq!(model.head().linear_shapes(), [(512, NUM_CLASSES)]);
    assert_eq!(model.num_classes(), 102);

    let vars = model.var_store().variables();
    assert_eq!(vars["fc.weight"].size(), [102, 512]);
    assert_eq!(vars["fc.bias"].size(), [102]);
    assert!(!vars.keys().any(|name| name.starts_with("classifier")));
}

#[test]
fn backbone_is_frozen_and_copied() {
    let pretrained = resnet18_store();
    let model =
        FineTuneModel::from_pretrained_store(Arch::Resnet18, &pretrained, 1000, Device::Cpu)
            .unwrap();
    let vars = model.var_store().variables();
    let original = pretrained.variables();
    for (name, var) in vars.iter() {
        if name.starts_with("fc.") {
            assert!(var.requires_grad(), "{name}");
        } else {
            assert!(!var.requires_grad(), "{name}");
            assert_eq!(max_diff(var, &original[name]), 0., "{name}");
        }
    }
}

#[test]
fn optimizer_only_holds_the_head() {
    let pretrained = resnet18_store();
    let model =
        FineTuneModel::from_pretrained_store(Arch::Resnet18, &pretrained, 1000, Device::Cpu)
            .unwrap();
    let optimizer = model.optimizer(0.01);
    let names: Vec<&str> = optimizer.parameters().iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["fc.bias", "fc.weight"]);
    assert_eq!(optimizer.config().momentum, 0.9);
    assert_eq!(optimizer.lr(), 0.01);
    assert_eq!(model.head_parameters().len(), 2);
}

#[test]
fn resnet18_forward() {
    let pretrained = resnet18_store();
    let model =
        FineTuneModel::from_pretrained_store(Arch::Resnet18, &pretrained, 1000, Device::Cpu)
            .unwrap();
    let images = Tensor::zeros([2, 3, 64, 64], kind::FLOAT_CPU);
    assert_eq!(model.features(&images).size(), [2, 512]);
    assert_eq!(model.forward_t(&images, false).size(), [2, 102]);
}

#[test]
fn vgg16_head() {
    let vs = VarStore::new(Device::Cpu);
    let head = Head::new(&vs.root(), Arch::Vgg16, 64, 500);
    assert_eq!(head.linear_shapes(), [(64, 4096), (4096, 500), (500, 102)]);
    assert_eq!(
        head.layers().iter().filter(|l| matches!(l, HeadLayer::Linear { .. })).count(),
        3
    );

    let vars = vs.variables();
    assert_eq!(vars["classifier.fc1.weight"].size(), [4096, 64]);
    assert_eq!(vars["classifier.fc2.weight"].size(), [500, 4096]);
    assert_eq!(vars["classifier.fc3.weight"].size(), [102, 500]);
    assert_eq!(vars.len(), 6);

    let xs = Tensor::zeros([3, 64], kind::FLOAT_CPU);
    assert_eq!(xs.apply_t(&head, true).size(), [3, 102]);
}

#[test]
fn vgg16_features() {
    let vs = VarStore::new(Device::Cpu);
    let features = vision::vgg::vgg16_features(&vs.root());
    let vars = vs.variables();
    assert!(vars.contains_key("features.0.weight"));
    assert!(vars.contains_key("features.28.weight"));
    assert!(!vars.keys().any(|name| name.starts_with("classifier")));

    let images = Tensor::zeros([1, 3, 32, 32], kind::FLOAT_CPU);
    let ys = tch::no_grad(|| images.apply_t(&features, false));
    assert_eq!(ys.size(), [1, vision::vgg::FEATURES_DIM]);
}

#[test]
fn head_width_comes_from_the_pretrained_head() {
    let vs = VarStore::new(Device::Cpu);
    let _w = vs.root().sub("classifier").sub("0").zeros("weight", &[16, 8]);
    assert_eq!(model::head_in_features(Arch::Vgg16, &vs).unwrap(), 8);
    assert!(matches!(model::head_in_features(Arch::Resnet18, &vs), Err(Error::FileFormat(_))));

    let pretrained = resnet18_store();
    assert_eq!(model::head_in_features(Arch::Resnet18, &pretrained).unwrap(), 512);
}

#[test]
fn missing_weights_file() {
    let path = std::env::temp_dir().join(format!("tch-finetune-missing-{}.ot", std::process::id()));
    let err = model::assemble(Arch::Resnet18, &path, 1000, 0.01, Device::Cpu).unwrap_err();
    assert!(matches!(err, Error::Torch(_) | Error::Io(_)), "{err:?}");
}

#[test]
fn vgg16_assembly() {
    let pretrained = VarStore::new(Device::Cpu);
    let _net = Arch::Vgg16.pretrained_network(&pretrained.root());
    assert_eq!(model::head_in_features(Arch::Vgg16, &pretrained).unwrap(), 25088);

    let model =
        FineTuneModel::from_pretrained_store(Arch::Vgg16, &pretrained, 500, Device::Cpu).unwrap();
    assert_eq!(model.head().linear_shapes(), [(25088, 4096), (4096, 500), (500, 102)]);
    assert_eq!(model.hidden_units(), 500);

    let vars = model.var_store().variables();
    let original = pretrained.variables();
    let mut features = 0;
    for (name, var) in vars.iter() {
        if name.starts_with("features.") {
            features += 1;
            assert!(!var.requires_grad(), "{name}");
            assert_eq!(max_diff(var, &original[name]), 0., "{name}");
        } else {
            assert!(name.starts_with("classifier.fc"), "{name}");
            assert!(var.requires_grad(), "{name}");
        }
    }
    // weight and bias of the 13 convolutions
    assert_eq!(features, 26);
    assert!(!vars.contains_key("classifier.0.weight"));

    let optimizer = model.optimizer(0.01);
    let names: Vec<&str> = optimizer.parameters().iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        [
            "classifier.fc1.bias",
            "classifier.fc1.weight",
            "classifier.fc2.bias",
            "classifier.fc2.weight",
            "classifier.fc3.bias",
            "classifier.fc3.weight",
        ]
    );
}
