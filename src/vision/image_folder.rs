//! Image folder datasets.
//!
//! A split is a directory holding one sub-directory per class, e.g.
//! `train/daisy/001.jpg`. Classes are sorted by name and indexed from 0.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tch::vision::imagenet;
use tch::Tensor;

use crate::{Error, Result};

/// Extensions of the files treated as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "ppm", "pgm"];

/// Directory name of each dataset split.
pub const TRAIN: &str = "train";
pub const VALID: &str = "valid";
pub const TEST: &str = "test";

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn visit_dirs(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            visit_dirs(&path, files)?;
        } else if is_image(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Labelled images found under a split directory.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    class_to_idx: BTreeMap<String, i64>,
    samples: Vec<(PathBuf, i64)>,
}

impl ImageFolder {
    /// Scans `root` for class directories and their images. Images are only
    /// decoded when a batch is requested.
    pub fn new<T: AsRef<Path>>(root: T) -> Result<ImageFolder> {
        let root = root.as_ref().to_path_buf();
        let mut classes = vec![];
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        if classes.is_empty() {
            return Err(Error::MissingClasses(root.display().to_string()));
        }
        classes.sort();

        let mut class_to_idx = BTreeMap::new();
        let mut samples = vec![];
        for (idx, class) in classes.into_iter().enumerate() {
            let idx = idx as i64;
            let class_dir = root.join(&class);
            let mut files = vec![];
            visit_dirs(&class_dir, &mut files)?;
            if files.is_empty() {
                return Err(Error::MissingImage(class_dir.display().to_string()));
            }
            files.sort();
            samples.extend(files.into_iter().map(|f| (f, idx)));
            class_to_idx.insert(class, idx);
        }
        debug!("{}: {} classes, {} images", root.display(), class_to_idx.len(), samples.len());
        Ok(ImageFolder { root, class_to_idx, samples })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mapping from class name to the label used by the model outputs.
    pub fn class_to_idx(&self) -> &BTreeMap<String, i64> {
        &self.class_to_idx
    }

    pub fn num_classes(&self) -> usize {
        self.class_to_idx.len()
    }

    pub fn samples(&self) -> &[(PathBuf, i64)] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Loads the images of `samples[start..start + size]`, resized to 224x224
    /// and normalized with the imagenet statistics.
    ///
    /// Returns a `[size, 3, 224, 224]` float tensor and the matching int64 labels.
    pub fn load_batch(&self, start: usize, size: usize) -> Result<(Tensor, Tensor)> {
        let end = usize::min(start + size, self.samples.len());
        let samples = &self.samples[start.min(end)..end];
        let images = samples
            .iter()
            .map(|(path, _)| imagenet::load_image_and_resize224(path))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let labels: Vec<i64> = samples.iter().map(|(_, label)| *label).collect();
        Ok((Tensor::f_stack(&images, 0)?, Tensor::from_slice(&labels)))
    }
}

/// The splits of a fine-tuning dataset.
#[derive(Debug, Clone)]
pub struct Datasets {
    pub train: ImageFolder,
    pub valid: ImageFolder,
    pub test: Option<ImageFolder>,
}

impl Datasets {
    /// The mapping recorded in checkpoints, taken from the training split.
    pub fn class_to_idx(&self) -> &BTreeMap<String, i64> {
        self.train.class_to_idx()
    }
}

fn split_dir(data_dir: &Path, split: &str) -> Result<PathBuf> {
    let dir = data_dir.join(split);
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(Error::MissingSplit { split: split.to_string(), dir: data_dir.display().to_string() })
    }
}

fn check_classes(train: &ImageFolder, other: &ImageFolder, split: &str) -> Result<()> {
    if train.class_to_idx() != other.class_to_idx() {
        return Err(Error::ClassMismatch { split: split.to_string() });
    }
    Ok(())
}

/// Loads the `train`, `valid` and optional `test` splits of `data_dir`.
pub fn load_datasets<T: AsRef<Path>>(data_dir: T) -> Result<Datasets> {
    let data_dir = data_dir.as_ref();
    let train = ImageFolder::new(split_dir(data_dir, TRAIN)?)?;
    let valid = ImageFolder::new(split_dir(data_dir, VALID)?)?;
    check_classes(&train, &valid, VALID)?;
    let test_dir = data_dir.join(TEST);
    let test = if test_dir.is_dir() {
        let test = ImageFolder::new(test_dir)?;
        check_classes(&train, &test, TEST)?;
        Some(test)
    } else {
        None
    };
    info!(
        "loaded {} classes: {} train, {} valid, {} test images",
        train.num_classes(),
        train.len(),
        valid.len(),
        test.as_ref().map_or(0, |t| t.len())
    );
    Ok(Datasets { train, valid, test })
}
