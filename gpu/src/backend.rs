//! Backend abstraction: the accelerator primitives the context depends on.
//!
//! `Device` owns allocation, host/device copies, synchronization and the JIT
//! entry point. `Program` is the opaque compiled artifact; the core only ever
//! asks it to instantiate an entry point for an element type and launch it.
//! The CUDA backend implements both behind the `cuda-backend` feature; any
//! other implementation can be handed to
//! [`KernelContext::with_device`](crate::KernelContext::with_device).

use std::sync::Arc;

use crate::element::ElementType;
use crate::error::Result;
use crate::geometry::LaunchGeometry;

/// Raw device address, as carried by the host bridge.
pub type DevicePtr = u64;

/// One bound accelerator.
pub trait Device: Send + Sync {
    /// Ordinal this device was bound with.
    fn ordinal(&self) -> u32;

    /// Human-readable device name for diagnostics.
    fn name(&self) -> String {
        format!("device {}", self.ordinal())
    }

    /// Upper bound on threads in one execution group.
    fn max_threads_per_block(&self) -> u32;

    /// JIT-compile kernel source into a loadable program.
    fn compile(&self, source: &str) -> Result<Arc<dyn Program>>;

    /// Allocate `bytes` of device memory.
    fn alloc(&self, bytes: usize) -> Result<DevicePtr>;

    /// Copy host bytes into device memory at `dst`.
    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()>;

    /// Copy `dst.len()` bytes from device memory at `src` into `dst`.
    fn copy_from_device(&self, dst: &mut [u8], src: DevicePtr) -> Result<()>;

    /// Release memory returned by [`Device::alloc`].
    fn free(&self, ptr: DevicePtr) -> Result<()>;

    /// Block until all outstanding device work has completed.
    fn synchronize(&self) -> Result<()>;
}

/// Opaque compiled program owned by the kernel cache.
pub trait Program: Send + Sync {
    /// Resolve `entry` instantiated for `element`.
    fn instantiate(&self, entry: &str, element: ElementType) -> Result<Arc<dyn KernelFunction>>;
}

/// A launchable entry point.
pub trait KernelFunction: Send + Sync {
    /// Configure `geometry` and enqueue one launch. Does not synchronize.
    fn launch(&self, geometry: &LaunchGeometry, args: &KernelArgs) -> Result<()>;
}

/// Fixed kernel parameter list, in launch order.
///
/// `(input, sides, output, scalars, m, n, grix, reserved[0], reserved[1])`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelArgs {
    /// First input array; 0 when the request carries no inputs.
    pub input: DevicePtr,
    /// Device-resident array of side-input pointers; 0 when empty.
    pub sides: DevicePtr,
    pub output: DevicePtr,
    /// Device scalar buffer; 0 when nothing was staged.
    pub scalars: DevicePtr,
    pub m: u32,
    pub n: u32,
    pub grix: u32,
    pub reserved: [u32; 2],
}
