// ============================================================
// Layer 5 — Backend Selection
// ============================================================
// The tensor backend is fixed at compile time:
//   feature "wgpu" (default) → Autodiff<Wgpu>, GPU chosen by index
//   otherwise                → Autodiff<NdArray> on the host
//
// Training uses TrainBackend for gradients; feature extraction and
// evaluation run on InferBackend (no autodiff graph).

use burn::tensor::backend::Backend;

#[cfg(feature = "wgpu")]
pub type InferBackend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
pub type InferBackend = burn::backend::NdArray;

pub type TrainBackend = burn::backend::Autodiff<InferBackend>;

pub type TrainDevice = <TrainBackend as Backend>::Device;

/// Pick the device for this process from the `--device` index.
#[cfg(feature = "wgpu")]
pub fn select_device(index: usize) -> TrainDevice {
    let device = burn::backend::wgpu::WgpuDevice::DiscreteGpu(index);
    tracing::info!("Using WGPU device: {:?}", device);
    device
}

/// Pick the device for this process from the `--device` index.
#[cfg(not(feature = "wgpu"))]
pub fn select_device(index: usize) -> TrainDevice {
    if index != 0 {
        tracing::warn!("Built without GPU support; ignoring device index {}", index);
    }
    let device = burn::backend::ndarray::NdArrayDevice::Cpu;
    tracing::info!("Using host device: {:?}", device);
    device
}
