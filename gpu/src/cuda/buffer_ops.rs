//! CUDA buffer operations: raw device allocation and host/device copies

use cudarc::driver::result;

use super::device_init::CudaDevice;
use crate::backend::DevicePtr;
use crate::error::{KernelError, Result};

/// Allocate `bytes` of device memory.
pub fn alloc(device: &CudaDevice, bytes: usize) -> Result<DevicePtr> {
    device.bind()?;
    unsafe { result::malloc_sync(bytes) }
        .map_err(|e| KernelError::device("alloc", format!("{} bytes: {:?}", bytes, e)))
}

/// Copy host bytes into device memory at `dst`.
pub fn copy_to_device(device: &CudaDevice, dst: DevicePtr, src: &[u8]) -> Result<()> {
    device.bind()?;
    unsafe { result::memcpy_htod_sync(dst, src) }
        .map_err(|e| KernelError::device("host-to-device copy", format!("{:?}", e)))
}

/// Copy device memory at `src` into `dst`.
pub fn copy_from_device(device: &CudaDevice, dst: &mut [u8], src: DevicePtr) -> Result<()> {
    device.bind()?;
    unsafe { result::memcpy_dtoh_sync(dst, src) }
        .map_err(|e| KernelError::device("device-to-host copy", format!("{:?}", e)))
}

/// Release memory returned by [`alloc`].
pub fn free(device: &CudaDevice, ptr: DevicePtr) -> Result<()> {
    device.bind()?;
    unsafe { result::free_sync(ptr) }
        .map_err(|e| KernelError::device("free", format!("{:#x}: {:?}", ptr, e)))
}
