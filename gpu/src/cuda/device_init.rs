//! CUDA device initialization via cudarc

use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{CudaContext, CudaStream};

use super::{buffer_ops, compile};
use crate::backend::{Device, DevicePtr, Program};
use crate::config::{CompilerConfig, DEFAULT_MAX_THREADS_PER_BLOCK};
use crate::error::{KernelError, Result};

/// CUDA context bound to one ordinal, plus the stream launches are issued on.
pub struct CudaDevice {
    pub(crate) ctx: Arc<CudaContext>,
    pub(crate) stream: Arc<CudaStream>,
    pub(crate) compiler: CompilerConfig,
    ordinal: u32,
    max_threads_per_block: u32,
}

impl CudaDevice {
    /// Bind device `ordinal`.
    pub fn new(ordinal: u32, compiler: &CompilerConfig) -> Result<Self> {
        let ctx = CudaContext::new(ordinal as usize).map_err(|e| KernelError::DeviceBind {
            device_id: ordinal,
            reason: format!("{:?}", e),
        })?;
        let stream = ctx.default_stream();
        let max_threads_per_block = ctx
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_THREADS_PER_BLOCK);

        Ok(CudaDevice {
            ctx,
            stream,
            compiler: compiler.clone(),
            ordinal,
            max_threads_per_block,
        })
    }

    /// Check if at least one CUDA device is present.
    pub fn is_available() -> bool {
        CudaContext::device_count().map(|n| n > 0).unwrap_or(false)
    }

    /// Make this context current on the calling thread.
    pub(crate) fn bind(&self) -> Result<()> {
        self.ctx
            .bind_to_thread()
            .map_err(|e| KernelError::device("context bind", format!("{:?}", e)))
    }
}

impl Device for CudaDevice {
    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn name(&self) -> String {
        self.ctx
            .name()
            .unwrap_or_else(|_| format!("CUDA device {}", self.ordinal))
    }

    fn max_threads_per_block(&self) -> u32 {
        self.max_threads_per_block
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn Program>> {
        compile::compile_program(self, source)
    }

    fn alloc(&self, bytes: usize) -> Result<DevicePtr> {
        buffer_ops::alloc(self, bytes)
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        buffer_ops::copy_to_device(self, dst, src)
    }

    fn copy_from_device(&self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        buffer_ops::copy_from_device(self, dst, src)
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        buffer_ops::free(self, ptr)
    }

    fn synchronize(&self) -> Result<()> {
        self.ctx
            .synchronize()
            .map_err(|e| KernelError::device("synchronize", format!("{:?}", e)))
    }
}
