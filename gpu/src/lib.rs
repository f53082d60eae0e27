//! kerneljit GPU runtime: JIT kernel registry and typed dispatcher
//!
//! Compiles small numeric kernels on demand, caches the compiled programs by
//! source text, and dispatches typed (`f32`/`f64`) execution requests against
//! them on one bound accelerator. Ships as a cdylib whose C ABI is consumed by
//! a host bridge, and as an rlib for Rust callers.
//!
//! # Rust usage
//!
//! ```rust,ignore
//! use kerneljit_gpu::{ExecutionRequest, KernelContext};
//!
//! let ctx = KernelContext::initialize(0)?;
//! ctx.compile("add1", ADD1_SOURCE)?;
//! let inputs = [a_ptr];
//! let request = ExecutionRequest::<f64>::new("add1", 4, 4).inputs(&inputs).output(b_ptr);
//! assert_eq!(ctx.execute(&request)?, 0.0);
//! ctx.destroy(0)?;
//! ```
//!
//! The CUDA backend is enabled with the `cuda-backend` feature. Without it,
//! contexts are built from any [`Device`] implementation via
//! [`KernelContext::with_device`].

pub mod backend;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod element;
pub mod error;
pub mod ffi;
pub mod geometry;
pub mod kernel_cache;
pub mod operator;
pub mod registry;

#[cfg(feature = "cuda-backend")]
pub mod cuda;

pub use backend::{Device, DevicePtr, KernelArgs, KernelFunction, Program};
pub use config::ContextConfig;
pub use device::KernelContext;
pub use dispatch::ExecutionRequest;
pub use element::{Element, ElementType};
pub use error::{KernelError, Result};
pub use geometry::{GeometryPolicy, LaunchGeometry, SingleBlock};
pub use kernel_cache::CacheStats;
pub use operator::{AggregationKind, Operator};

/// Exported C symbols, for hosts that link the runtime dynamically.
pub fn get_runtime_symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        // Context lifecycle
        ("kerneljit_initialize", ffi::kerneljit_initialize as *const u8),
        ("kerneljit_destroy", ffi::kerneljit_destroy as *const u8),
        ("kerneljit_is_available", ffi::kerneljit_is_available as *const u8),
        // Compile path
        ("kerneljit_compile_kernel", ffi::kerneljit_compile_kernel as *const u8),
        (
            "kerneljit_compile_kernel_with_aggregation",
            ffi::kerneljit_compile_kernel_with_aggregation as *const u8,
        ),
        // Dispatch
        ("kerneljit_execute_f64", ffi::kerneljit_execute_f64 as *const u8),
        ("kerneljit_execute_f32", ffi::kerneljit_execute_f32 as *const u8),
        ("kerneljit_last_status", ffi::kerneljit_last_status as *const u8),
    ]
}
