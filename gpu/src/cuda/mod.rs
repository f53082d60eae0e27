//! CUDA backend for kernel compilation and dispatch (NVRTC + driver API)

pub mod buffer_ops;
pub mod compile;
pub mod device_init;
pub mod dispatch;

pub use device_init::CudaDevice;
