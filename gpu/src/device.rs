//! Kernel context: device binding, lifecycle and the compile path.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::backend::{Device, Program};
use crate::config::ContextConfig;
use crate::error::{KernelError, Result};
use crate::geometry::{GeometryPolicy, SingleBlock};
use crate::kernel_cache::{source_hash, CacheStats, KernelCache};
use crate::operator::{AggregationKind, Operator};
use crate::registry::KernelRegistry;

pub(crate) struct ContextState {
    pub(crate) registry: KernelRegistry,
    pub(crate) cache: KernelCache,
}

/// Runtime context bound to exactly one device for its lifetime.
///
/// Owns the kernel registry and the compiled-kernel cache. Registry access and
/// the allocate/copy/launch/synchronize/free sequence of each execution are
/// serialized, so a context can be shared across threads.
pub struct KernelContext {
    pub(crate) device_id: u32,
    pub(crate) device: Box<dyn Device>,
    pub(crate) max_threads_per_block: u32,
    pub(crate) geometry: Box<dyn GeometryPolicy>,
    pub(crate) state: Mutex<ContextState>,
    pub(crate) launch_lock: Mutex<()>,
}

impl KernelContext {
    /// Bind the accelerator `device_id` with configuration from the environment.
    pub fn initialize(device_id: u32) -> Result<Self> {
        Self::initialize_with_config(device_id, &ContextConfig::from_env()?)
    }

    /// Bind the accelerator `device_id` using the compiled-in backend.
    #[allow(unused_variables)]
    pub fn initialize_with_config(device_id: u32, config: &ContextConfig) -> Result<Self> {
        #[cfg(feature = "cuda-backend")]
        {
            let device = crate::cuda::CudaDevice::new(device_id, &config.compiler)?;
            Ok(Self::with_device_and_config(Box::new(device), config))
        }
        #[cfg(not(feature = "cuda-backend"))]
        {
            Err(KernelError::BackendUnavailable)
        }
    }

    /// Whether the compiled-in backend can bind at least one device.
    pub fn is_available() -> bool {
        #[cfg(feature = "cuda-backend")]
        {
            crate::cuda::CudaDevice::is_available()
        }
        #[cfg(not(feature = "cuda-backend"))]
        {
            false
        }
    }

    /// Wrap an already-bound device.
    pub fn with_device(device: Box<dyn Device>) -> Self {
        Self::with_device_and_config(device, &ContextConfig::default())
    }

    pub fn with_device_and_config(device: Box<dyn Device>, config: &ContextConfig) -> Self {
        let device_id = device.ordinal();
        let max_threads_per_block = config.max_threads_per_block(device.max_threads_per_block());
        info!(
            "bound {} (ordinal {}, {} threads per block)",
            device.name(),
            device_id,
            max_threads_per_block
        );
        KernelContext {
            device_id,
            device,
            max_threads_per_block,
            geometry: Box::new(SingleBlock),
            state: Mutex::new(ContextState {
                registry: KernelRegistry::new(),
                cache: KernelCache::new(),
            }),
            launch_lock: Mutex::new(()),
        }
    }

    /// Replace the launch geometry policy.
    pub fn with_geometry_policy(mut self, policy: impl GeometryPolicy + 'static) -> Self {
        self.geometry = Box::new(policy);
        self
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn max_threads_per_block(&self) -> u32 {
        self.max_threads_per_block
    }

    /// Compile `source` and register it under `name`, reading the aggregation
    /// kind from the source directive (NONE when absent).
    pub fn compile(&self, name: &str, source: &str) -> Result<AggregationKind> {
        let aggregation = AggregationKind::from_source(source)?.unwrap_or_default();
        self.compile_with_aggregation(name, source, aggregation)?;
        Ok(aggregation)
    }

    /// Compile `source` and register it under `name` with an explicit
    /// aggregation kind. An existing operator with the same name is replaced.
    /// On failure the registry is left untouched.
    pub fn compile_with_aggregation(
        &self,
        name: &str,
        source: &str,
        aggregation: AggregationKind,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(KernelError::InvalidRequest("kernel name is empty".to_string()));
        }

        // The JIT compile runs without the state lock so executions proceed
        // meanwhile; only the cache lookup and the insert take it.
        let cached = self.state.lock().cache.lookup(source);
        let mut state;
        let program = match cached {
            Some(program) => {
                state = self.state.lock();
                program
            }
            None => {
                let program = self.compile_source(name, source)?;
                state = self.state.lock();
                state.cache.insert(source, program)
            }
        };

        let op = Operator {
            program,
            aggregation,
            source_hash: source_hash(source),
        };
        if state.registry.register(name, op).is_some() {
            debug!("replaced operator '{}'", name);
        }
        info!("compiled kernel '{}' ({} aggregation)", name, aggregation);
        Ok(())
    }

    fn compile_source(&self, name: &str, source: &str) -> Result<Arc<dyn Program>> {
        debug!("compiling kernel '{}' ({} bytes)", name, source.len());
        self.device.compile(source).map_err(|e| match e {
            KernelError::Compile { log, .. } => KernelError::Compile {
                name: name.to_string(),
                log,
            },
            other => other,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().registry.contains(name)
    }

    /// Snapshot of the operator registered under `name`.
    pub fn operator(&self, name: &str) -> Option<Operator> {
        self.state.lock().registry.get(name).cloned()
    }

    pub fn aggregation_of(&self, name: &str) -> Option<AggregationKind> {
        self.state.lock().registry.get(name).map(|op| op.aggregation)
    }

    pub fn kernel_names(&self) -> Vec<String> {
        self.state.lock().registry.names()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.state.lock().cache.stats()
    }

    /// Verify that `device_id` is the device this context is bound to.
    pub fn check_device(&self, device_id: u32) -> Result<()> {
        if device_id != self.device_id {
            return Err(KernelError::DeviceMismatch {
                bound: self.device_id,
                requested: device_id,
            });
        }
        Ok(())
    }

    /// Release the device binding and every operator and compiled program.
    ///
    /// Resources are released even when `device_id` does not match; the
    /// mismatch is still reported.
    pub fn destroy(self, device_id: u32) -> Result<()> {
        let checked = self.check_device(device_id);
        drop(self);
        checked
    }
}

impl Drop for KernelContext {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let kernels = state.registry.len();
        let programs = state.cache.len();
        state.registry.clear();
        state.cache.clear();
        info!(
            "released device {} ({} kernels, {} programs)",
            self.device_id, kernels, programs
        );
    }
}
