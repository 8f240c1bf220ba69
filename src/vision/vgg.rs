//! Convolutional part of VGG-16, used as a frozen backbone.
//!
//! Variable names follow `tch::vision::vgg`, so the weights of the full
//! network can be copied into it.
use tch::nn::{self, Conv2D, SequentialT};

/// Width of the flattened features fed to the classifier.
pub const FEATURES_DIM: i64 = 512 * 7 * 7;

// Each list element contains multiple convolutions with some specified number
// of features followed by a single max-pool layer.
fn layers_d() -> Vec<Vec<i64>> {
    vec![
        vec![64, 64],
        vec![128, 128],
        vec![256, 256, 256],
        vec![512, 512, 512],
        vec![512, 512, 512],
    ]
}

fn conv2d(p: nn::Path, c_in: i64, c_out: i64) -> Conv2D {
    let conv2d_cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
    nn::conv2d(p, c_in, c_out, 3, conv2d_cfg)
}

fn features(p: &nn::Path, cfg: Vec<Vec<i64>>) -> SequentialT {
    let f = p / "features";
    let mut seq = nn::seq_t();
    let mut c_in = 3;
    for channels in cfg.into_iter() {
        for &c_out in channels.iter() {
            let l = seq.len();
            seq = seq.add(conv2d(&f / &l.to_string(), c_in, c_out));
            seq = seq.add_fn(|xs| xs.relu());
            c_in = c_out;
        }
        seq = seq.add_fn(|xs| xs.max_pool2d_default(2));
    }
    seq.add_fn(|xs| xs.adaptive_avg_pool2d([7, 7]).flat_view())
}

/// The convolutional part of VGG-16, returning flattened features of
/// size [`FEATURES_DIM`].
pub fn vgg16_features(p: &nn::Path) -> SequentialT {
    features(p, layers_d())
}
