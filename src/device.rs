//! Selection of the device the model is trained on.
use log::{info, warn};
use tch::{Cuda, Device};

/// Returns the device to train on.
///
/// When an accelerator is requested the first CUDA device is used, then MPS
/// on macOS. If neither is available this falls back to the CPU.
pub fn device_type(use_accelerator: bool) -> Device {
    if !use_accelerator {
        return Device::Cpu;
    }
    let device = if Cuda::is_available() {
        Device::Cuda(0)
    } else if tch::utils::has_mps() {
        Device::Mps
    } else {
        warn!("accelerator requested but neither cuda nor mps is available, using the cpu");
        Device::Cpu
    };
    info!("training on {device:?}");
    device
}
