//! Instrumented in-memory device shared by the integration tests.
//!
//! Kernels are scripted: a test maps a source string to a Rust closure that
//! plays the kernel against simulated device memory. Every allocation, free,
//! compile and launch is counted.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kerneljit_gpu::{
    Device, DevicePtr, ElementType, KernelArgs, KernelError, KernelFunction, LaunchGeometry,
    Program, Result,
};
use parking_lot::Mutex;

pub type Behaviour = Arc<dyn Fn(&mut Memory, &LaunchGeometry, &KernelArgs) + Send + Sync>;

/// Runs at the start of every compile, outside the device lock.
pub type CompileHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Simulated device memory; regions are keyed by base address.
#[derive(Default)]
pub struct Memory {
    regions: BTreeMap<DevicePtr, Vec<u8>>,
    next: DevicePtr,
}

impl Memory {
    fn insert(&mut self, bytes: Vec<u8>) -> DevicePtr {
        // Keep addresses distinct and non-zero, with a gap between regions.
        let base = 0x1000 + self.next;
        self.next += bytes.len().max(1) as u64 + 0x100;
        self.regions.insert(base, bytes);
        base
    }

    fn region_mut(&mut self, addr: DevicePtr, len: usize) -> &mut [u8] {
        let (base, bytes) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .unwrap_or_else(|| panic!("address {:#x} not mapped", addr));
        let offset = (addr - *base) as usize;
        assert!(offset + len <= bytes.len(), "access past end of region at {:#x}", addr);
        &mut bytes[offset..offset + len]
    }

    pub fn read(&mut self, addr: DevicePtr, len: usize) -> Vec<u8> {
        self.region_mut(addr, len).to_vec()
    }

    pub fn write(&mut self, addr: DevicePtr, data: &[u8]) {
        self.region_mut(addr, data.len()).copy_from_slice(data);
    }

    pub fn read_f64(&mut self, addr: DevicePtr, index: usize) -> f64 {
        let bytes = self.read(addr + (index * 8) as u64, 8);
        f64::from_ne_bytes(bytes.try_into().unwrap())
    }

    pub fn write_f64(&mut self, addr: DevicePtr, index: usize, value: f64) {
        self.write(addr + (index * 8) as u64, &value.to_ne_bytes());
    }

    pub fn read_f32(&mut self, addr: DevicePtr, index: usize) -> f32 {
        let bytes = self.read(addr + (index * 4) as u64, 4);
        f32::from_ne_bytes(bytes.try_into().unwrap())
    }

    pub fn write_f32(&mut self, addr: DevicePtr, index: usize, value: f32) {
        self.write(addr + (index * 4) as u64, &value.to_ne_bytes());
    }

    pub fn read_ptr(&mut self, addr: DevicePtr, index: usize) -> DevicePtr {
        let bytes = self.read(addr + (index * 8) as u64, 8);
        u64::from_ne_bytes(bytes.try_into().unwrap())
    }
}

#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub entry: String,
    pub element: ElementType,
    pub geometry: LaunchGeometry,
    pub args: KernelArgs,
}

#[derive(Default)]
pub struct Counters {
    pub allocs: usize,
    pub frees: usize,
    pub peak_outstanding: usize,
    pub compiles: usize,
    pub syncs: usize,
    pub launches: Vec<LaunchRecord>,
}

impl Counters {
    pub fn outstanding(&self) -> usize {
        self.allocs - self.frees
    }
}

#[derive(Default)]
struct State {
    memory: Memory,
    counters: Counters,
    kernels: HashMap<String, Behaviour>,
    fail_alloc_at: Option<usize>,
    fail_launch: bool,
    fail_copy: bool,
    fail_readback: bool,
    compile_hook: Option<CompileHook>,
}

/// Cloneable handle; clones share state, so a test can keep one while the
/// context owns another.
#[derive(Clone)]
pub struct MockDevice {
    ordinal: u32,
    max_threads: u32,
    state: Arc<Mutex<State>>,
}

impl MockDevice {
    pub fn new(ordinal: u32) -> Self {
        MockDevice {
            ordinal,
            max_threads: 1024,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_max_threads(mut self, max_threads: u32) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Script the kernel compiled from `source`.
    pub fn define_kernel<F>(&self, source: &str, behaviour: F)
    where
        F: Fn(&mut Memory, &LaunchGeometry, &KernelArgs) + Send + Sync + 'static,
    {
        self.state
            .lock()
            .kernels
            .insert(source.to_string(), Arc::new(behaviour));
    }

    /// Host-bridge owned array; not counted as a context allocation.
    pub fn host_array_f64(&self, values: &[f64]) -> DevicePtr {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        self.state.lock().memory.insert(bytes)
    }

    pub fn host_array_f32(&self, values: &[f32]) -> DevicePtr {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        self.state.lock().memory.insert(bytes)
    }

    pub fn read_f64s(&self, addr: DevicePtr, count: usize) -> Vec<f64> {
        let mut state = self.state.lock();
        (0..count).map(|i| state.memory.read_f64(addr, i)).collect()
    }

    /// Fail the `n`th allocation (1-based) from now on.
    pub fn fail_alloc_at(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_alloc_at = Some(state.counters.allocs + n);
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.lock().fail_launch = fail;
    }

    pub fn on_compile<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.state.lock().compile_hook = Some(Arc::new(hook));
    }

    /// Fail every host-to-device copy.
    pub fn fail_copies(&self, fail: bool) {
        self.state.lock().fail_copy = fail;
    }

    /// Fail every device-to-host copy.
    pub fn fail_readback(&self, fail: bool) {
        self.state.lock().fail_readback = fail;
    }

    pub fn counters<R>(&self, f: impl FnOnce(&Counters) -> R) -> R {
        f(&self.state.lock().counters)
    }

    pub fn outstanding(&self) -> usize {
        self.counters(Counters::outstanding)
    }

    pub fn allocs(&self) -> usize {
        self.counters(|c| c.allocs)
    }

    pub fn compiles(&self) -> usize {
        self.counters(|c| c.compiles)
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.counters(|c| c.launches.clone())
    }

    pub fn boxed(&self) -> Box<dyn Device> {
        Box::new(self.clone())
    }
}

struct MockProgram {
    behaviour: Behaviour,
    state: Arc<Mutex<State>>,
}

struct MockKernel {
    entry: String,
    element: ElementType,
    behaviour: Behaviour,
    state: Arc<Mutex<State>>,
}

impl Program for MockProgram {
    fn instantiate(&self, entry: &str, element: ElementType) -> Result<Arc<dyn KernelFunction>> {
        Ok(Arc::new(MockKernel {
            entry: entry.to_string(),
            element,
            behaviour: Arc::clone(&self.behaviour),
            state: Arc::clone(&self.state),
        }))
    }
}

impl KernelFunction for MockKernel {
    fn launch(&self, geometry: &LaunchGeometry, args: &KernelArgs) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_launch {
            return Err(KernelError::Device {
                operation: "launch",
                reason: "scripted launch failure".to_string(),
            });
        }
        state.counters.launches.push(LaunchRecord {
            entry: self.entry.clone(),
            element: self.element,
            geometry: *geometry,
            args: *args,
        });
        (self.behaviour)(&mut state.memory, geometry, args);
        Ok(())
    }
}

impl Device for MockDevice {
    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn max_threads_per_block(&self) -> u32 {
        self.max_threads
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn Program>> {
        let hook = self.state.lock().compile_hook.clone();
        if let Some(hook) = hook {
            hook(source);
        }
        let mut state = self.state.lock();
        let behaviour = state.kernels.get(source).cloned().ok_or_else(|| KernelError::Compile {
            name: String::new(),
            log: "error: expected a declaration".to_string(),
        })?;
        state.counters.compiles += 1;
        Ok(Arc::new(MockProgram {
            behaviour,
            state: Arc::clone(&self.state),
        }))
    }

    fn alloc(&self, bytes: usize) -> Result<DevicePtr> {
        let mut state = self.state.lock();
        if state.fail_alloc_at == Some(state.counters.allocs + 1) {
            state.fail_alloc_at = None;
            return Err(KernelError::Device {
                operation: "alloc",
                reason: "out of memory".to_string(),
            });
        }
        state.counters.allocs += 1;
        let outstanding = state.counters.outstanding();
        state.counters.peak_outstanding = state.counters.peak_outstanding.max(outstanding);
        Ok(state.memory.insert(vec![0xAB; bytes]))
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_copy {
            return Err(KernelError::Device {
                operation: "host-to-device copy",
                reason: "scripted copy failure".to_string(),
            });
        }
        state.memory.write(dst, src);
        Ok(())
    }

    fn copy_from_device(&self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_readback {
            return Err(KernelError::Device {
                operation: "device-to-host copy",
                reason: "scripted copy failure".to_string(),
            });
        }
        let bytes = state.memory.read(src, dst.len());
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        let mut state = self.state.lock();
        if state.memory.regions.remove(&ptr).is_none() {
            return Err(KernelError::Device {
                operation: "free",
                reason: format!("{:#x} not allocated", ptr),
            });
        }
        state.counters.frees += 1;
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.state.lock().counters.syncs += 1;
        Ok(())
    }
}

/// Elementwise `out[i] = in[i] + 1` over `m * n` doubles.
pub const ADD1_SOURCE: &str = "extern \"C\" __global__ void add1(/* elementwise */) {}";

/// Full reduction writing 42.5 into the reserved scalar slot.
pub const CONST_FULL_SOURCE: &str =
    "// kerneljit:aggregation=FULL\nextern \"C\" __global__ void answer() {}";

pub const FULL_RESULT: f64 = 42.5;

pub fn define_add1(device: &MockDevice) {
    device.define_kernel(ADD1_SOURCE, |mem, geometry, args| {
        let count = geometry.threads_per_block() as usize;
        for i in 0..count {
            let v = mem.read_f64(args.input, i);
            mem.write_f64(args.output, i, v + 1.0);
        }
    });
}

/// Writes [`FULL_RESULT`] at scalar index `grix`. Tests pass the scalar count
/// as `grix` so the write lands in the reserved slot.
pub fn define_const_full(device: &MockDevice) {
    device.define_kernel(CONST_FULL_SOURCE, |mem, _, args| {
        mem.write_f64(args.scalars, args.grix as usize, FULL_RESULT);
    });
}
