//! Typed execution dispatcher.
//!
//! One generic routine serves every element type: resolve the operator, stage
//! scalars (plus a reserved result slot for full reductions) and the side-input
//! pointer array on the device, launch, synchronize, and read the reduction
//! result back. Device buffers are owned by [`DeviceScratch`] guards and are
//! released on every exit path.

use log::{debug, warn};

use crate::backend::{Device, DevicePtr, KernelArgs};
use crate::device::KernelContext;
use crate::element::Element;
use crate::error::{KernelError, Result};

/// Parameters of a single execution. Not stored.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a, T: Element> {
    pub name: &'a str,
    /// Input arrays; only the first is passed to the kernel.
    pub inputs: &'a [DevicePtr],
    pub sides: &'a [DevicePtr],
    pub output: DevicePtr,
    pub scalars: &'a [T],
    pub m: u32,
    pub n: u32,
    /// Group/row index forwarded to the kernel.
    pub grix: u32,
}

impl<'a, T: Element> ExecutionRequest<'a, T> {
    pub fn new(name: &'a str, m: u32, n: u32) -> Self {
        ExecutionRequest {
            name,
            inputs: &[],
            sides: &[],
            output: 0,
            scalars: &[],
            m,
            n,
            grix: 0,
        }
    }

    pub fn inputs(mut self, inputs: &'a [DevicePtr]) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn sides(mut self, sides: &'a [DevicePtr]) -> Self {
        self.sides = sides;
        self
    }

    pub fn output(mut self, output: DevicePtr) -> Self {
        self.output = output;
        self
    }

    pub fn scalars(mut self, scalars: &'a [T]) -> Self {
        self.scalars = scalars;
        self
    }

    pub fn grix(mut self, grix: u32) -> Self {
        self.grix = grix;
        self
    }
}

/// Device allocation freed on drop.
pub(crate) struct DeviceScratch<'d> {
    device: &'d dyn Device,
    ptr: DevicePtr,
    bytes: usize,
}

impl<'d> DeviceScratch<'d> {
    /// Allocate and fill a buffer with `data`. Empty data stages nothing.
    pub(crate) fn stage(device: &'d dyn Device, data: &[u8]) -> Result<Option<Self>> {
        if data.is_empty() {
            return Ok(None);
        }
        let ptr = device.alloc(data.len())?;
        let scratch = DeviceScratch {
            device,
            ptr,
            bytes: data.len(),
        };
        device.copy_to_device(scratch.ptr, data)?;
        Ok(Some(scratch))
    }

    pub(crate) fn ptr(&self) -> DevicePtr {
        self.ptr
    }
}

impl Drop for DeviceScratch<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.free(self.ptr) {
            warn!("failed to free {} byte device buffer {:#x}: {}", self.bytes, self.ptr, e);
        }
    }
}

fn staged_ptr(scratch: &Option<DeviceScratch<'_>>) -> DevicePtr {
    scratch.as_ref().map_or(0, DeviceScratch::ptr)
}

impl KernelContext {
    /// Execute the kernel registered as `request.name`.
    ///
    /// Full reductions return the value the kernel wrote to the reserved
    /// trailing scalar slot; every other aggregation kind returns zero and
    /// delivers its result through `request.output`.
    pub fn execute<T: Element>(&self, request: &ExecutionRequest<'_, T>) -> Result<T> {
        let op = match self.state.lock().registry.get(request.name) {
            Some(op) => op.clone(),
            None => {
                warn!("kernel {} not found", request.name);
                return Err(KernelError::KernelNotFound(request.name.to_string()));
            }
        };

        let geometry =
            self.geometry
                .geometry(request.m, request.n, self.max_threads_per_block)?;
        if request.inputs.len() > 1 {
            debug!(
                "kernel {}: {} inputs supplied, only the first is passed",
                request.name,
                request.inputs.len()
            );
        }

        let kernel = op.program.instantiate(request.name, T::TYPE)?;

        let mut scalar_bytes = T::slice_to_bytes(request.scalars);
        if op.aggregation.is_full() {
            T::zero().extend_bytes(&mut scalar_bytes);
        }
        let side_bytes: Vec<u8> = request
            .sides
            .iter()
            .flat_map(|p| p.to_ne_bytes())
            .collect();

        let device = self.device.as_ref();
        let _launch = self.launch_lock.lock();

        let scalars = DeviceScratch::stage(device, &scalar_bytes)?;
        let sides = DeviceScratch::stage(device, &side_bytes)?;

        let args = KernelArgs {
            input: request.inputs.first().copied().unwrap_or(0),
            sides: staged_ptr(&sides),
            output: request.output,
            scalars: staged_ptr(&scalars),
            m: request.m,
            n: request.n,
            grix: request.grix,
            reserved: [0, 0],
        };

        debug!(
            "launching kernel {} as {}: {} block(s) of {}x{} == {} threads",
            request.name,
            T::TYPE,
            geometry.blocks(),
            geometry.block.0,
            geometry.block.1,
            geometry.threads_per_block()
        );
        kernel.launch(&geometry, &args)?;
        device.synchronize()?;

        if !op.aggregation.is_full() {
            return Ok(T::zero());
        }

        let width = T::TYPE.byte_size();
        let slot = args.scalars + (request.scalars.len() * width) as u64;
        let mut out = vec![0u8; width];
        device.copy_from_device(&mut out, slot)?;
        T::from_bytes(&out).ok_or_else(|| KernelError::device("read back", "short result slot"))
    }

    /// [`execute`](Self::execute) for `f64` kernels.
    pub fn execute_f64(&self, request: &ExecutionRequest<'_, f64>) -> Result<f64> {
        self.execute(request)
    }

    /// [`execute`](Self::execute) for `f32` kernels.
    pub fn execute_f32(&self, request: &ExecutionRequest<'_, f32>) -> Result<f32> {
        self.execute(request)
    }
}
