//! Named tensors plus string metadata in a `.safetensors` file.
//! <https://github.com/huggingface/safetensors>
//!
//! The dtype and tensor conversions are the ones `tch` provides; this module
//! only adds the metadata that `Tensor::write_safetensors` leaves out.
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use safetensors::tensor::{Dtype, SafeTensors, View};
use tch::{Device, Tensor};

use crate::{Error, Result};

/// The raw bytes of a tensor copied to the cpu, ready to be serialized.
pub struct SafeView {
    data: Vec<u8>,
    shape: Vec<usize>,
    dtype: Dtype,
}

impl SafeView {
    pub fn new(tensor: &Tensor) -> Result<Self> {
        if tensor.is_sparse() {
            return Err(Error::FileFormat("cannot save sparse tensors".to_string()));
        }
        let dtype = Dtype::try_from(tensor.kind())?;
        let tensor = tensor.to_device(Device::Cpu).contiguous();
        let shape = tensor.size().iter().map(|&x| x as usize).collect();
        let numel = tensor.numel();
        let mut data = vec![0; numel * tensor.kind().elt_size_in_bytes()];
        tensor.f_copy_data_u8(&mut data, numel)?;
        Ok(Self { data, shape, dtype })
    }
}

impl View for SafeView {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<[u8]> {
        Cow::Borrowed(&self.data)
    }

    fn data_len(&self) -> usize {
        self.data.len()
    }
}

fn wrap_err<P: AsRef<Path>>(path: P, err: safetensors::SafeTensorError) -> Error {
    Error::SafeTensor { path: path.as_ref().to_string_lossy().to_string(), err }
}

/// Writes named tensors together with some string metadata.
pub fn write<S: AsRef<str>, P: AsRef<Path>>(
    tensors: &[(S, Tensor)],
    metadata: HashMap<String, String>,
    path: P,
) -> Result<()> {
    let views = tensors
        .iter()
        .map(|(name, tensor)| Ok((name.as_ref(), SafeView::new(tensor)?)))
        .collect::<Result<Vec<_>>>()?;
    safetensors::tensor::serialize_to_file(views, &Some(metadata), path.as_ref())
        .map_err(|e| wrap_err(&path, e))
}

/// Reads back the named tensors and the string metadata of a file.
pub fn read<P: AsRef<Path>>(path: P) -> Result<(Vec<(String, Tensor)>, HashMap<String, String>)> {
    let buffer = std::fs::read(&path)?;
    let (_, metadata) = SafeTensors::read_metadata(&buffer).map_err(|e| wrap_err(&path, e))?;
    let metadata = metadata.metadata().clone().unwrap_or_default();
    let safetensors = SafeTensors::deserialize(&buffer).map_err(|e| wrap_err(&path, e))?;
    let tensors = safetensors
        .tensors()
        .into_iter()
        .map(|(name, view)| Ok((name, Tensor::try_from(view)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok((tensors, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    #[test]
    fn view() {
        let t = Tensor::from_slice(&[1f32, 2., 3., 4.]).view([2, 2]).tr();
        let view = SafeView::new(&t).unwrap();
        assert_eq!(view.dtype(), Dtype::F32);
        assert_eq!(view.shape(), [2, 2]);
        assert_eq!(view.data_len(), 16);
        let values: Vec<f32> =
            view.data().chunks(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect();
        assert_eq!(values, [1., 3., 2., 4.]);
    }

    #[test]
    fn unsupported_kind() {
        let t = Tensor::zeros([2], (Kind::ComplexFloat, Device::Cpu));
        assert!(matches!(SafeView::new(&t), Err(Error::Torch(_))));
    }
}
