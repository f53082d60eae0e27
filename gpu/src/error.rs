//! Error types for kernel compilation and dispatch

/// Result type for context operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors that can occur while binding a device, compiling or executing a kernel
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The accelerator could not be bound
    #[error("failed to bind device {device_id}: {reason}")]
    DeviceBind { device_id: u32, reason: String },

    /// No backend was compiled into this build
    #[error("no accelerator backend available")]
    BackendUnavailable,

    /// JIT compilation rejected the kernel source
    #[error("compilation of kernel '{name}' failed: {log}")]
    Compile { name: String, log: String },

    /// Aggregation directive or tag could not be understood
    #[error("invalid aggregation kind: {0}")]
    InvalidAggregation(String),

    /// No operator registered under this name
    #[error("kernel '{0}' not found")]
    KernelNotFound(String),

    /// Launch geometry rejected before any device work
    #[error("invalid launch geometry {m}x{n}: {reason}")]
    InvalidGeometry { m: u32, n: u32, reason: String },

    /// Malformed execution request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Allocation, copy, launch or synchronization failure
    #[error("device {operation} failed: {reason}")]
    Device {
        operation: &'static str,
        reason: String,
    },

    /// Null, unknown or already destroyed context handle
    #[error("invalid context handle: {0:#x}")]
    InvalidHandle(i64),

    /// Teardown requested for a different device than the one bound
    #[error("context is bound to device {bound}, not {requested}")]
    DeviceMismatch { bound: u32, requested: u32 },

    /// Configuration file or environment could not be read
    #[error("configuration error: {0}")]
    Config(String),
}

impl KernelError {
    pub(crate) fn device(operation: &'static str, reason: impl ToString) -> Self {
        KernelError::Device {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Stable status code reported through the C ABI. Zero means success.
    pub fn status_code(&self) -> i32 {
        match self {
            KernelError::DeviceBind { .. } => 1,
            KernelError::BackendUnavailable => 2,
            KernelError::Compile { .. } => 3,
            KernelError::InvalidAggregation(_) => 4,
            KernelError::KernelNotFound(_) => 5,
            KernelError::InvalidGeometry { .. } => 6,
            KernelError::InvalidRequest(_) => 7,
            KernelError::Device { .. } => 8,
            KernelError::InvalidHandle(_) => 9,
            KernelError::DeviceMismatch { .. } => 10,
            KernelError::Config(_) => 11,
        }
    }
}
