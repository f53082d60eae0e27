//! CUDA kernel dispatch: configures geometry and enqueues one launch.

use std::sync::Arc;

use cudarc::driver::{CudaFunction, CudaStream, LaunchConfig, PushKernelArg};

use crate::backend::{KernelArgs, KernelFunction};
use crate::error::{KernelError, Result};
use crate::geometry::LaunchGeometry;

/// A loaded entry point bound to the stream it launches on.
pub struct CudaKernel {
    function: CudaFunction,
    stream: Arc<CudaStream>,
}

impl CudaKernel {
    pub fn new(function: CudaFunction, stream: Arc<CudaStream>) -> Self {
        CudaKernel { function, stream }
    }
}

impl KernelFunction for CudaKernel {
    fn launch(&self, geometry: &LaunchGeometry, args: &KernelArgs) -> Result<()> {
        let cfg = LaunchConfig {
            grid_dim: geometry.grid,
            block_dim: geometry.block,
            shared_mem_bytes: 0,
        };

        let mut launch = self.stream.launch_builder(&self.function);
        launch
            .arg(&args.input)
            .arg(&args.sides)
            .arg(&args.output)
            .arg(&args.scalars)
            .arg(&args.m)
            .arg(&args.n)
            .arg(&args.grix)
            .arg(&args.reserved[0])
            .arg(&args.reserved[1]);

        unsafe { launch.launch(cfg) }
            .map_err(|e| KernelError::device("launch", format!("{:?}", e)))?;
        Ok(())
    }
}
