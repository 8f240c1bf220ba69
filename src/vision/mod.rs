/// The `vision` module groups the pretrained backbones and the image
/// folder datasets used for fine-tuning.
pub mod image_folder;

pub mod vgg;
