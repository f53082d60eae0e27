//! C ABI consumed by the host bridge.
//!
//! Contexts cross the boundary as opaque `i64` handles drawn from a counter
//! that never repeats, so null, unknown and already destroyed handles are
//! reported instead of reaching another context. Each call records a status
//! code readable through [`kerneljit_last_status`]; execute entry points
//! return zero on failure, and the status separates "kernel not found" from a
//! real zero.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::{c_char, CStr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, error};
use parking_lot::RwLock;

use crate::backend::DevicePtr;
use crate::device::KernelContext;
use crate::dispatch::ExecutionRequest;
use crate::element::Element;
use crate::error::{KernelError, Result};
use crate::operator::AggregationKind;

/// Status recorded after a successful boundary call.
pub const STATUS_OK: i32 = 0;

/// 0 is the null handle and is never issued.
static NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);

lazy_static! {
    static ref LIVE_CONTEXTS: RwLock<HashMap<i64, Arc<KernelContext>>> =
        RwLock::new(HashMap::new());
}

thread_local! {
    static LAST_STATUS: Cell<i32> = const { Cell::new(STATUS_OK) };
}

fn record<T>(op: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(v) => {
            LAST_STATUS.with(|s| s.set(STATUS_OK));
            Some(v)
        }
        Err(e) => {
            LAST_STATUS.with(|s| s.set(e.status_code()));
            error!("{}: {}", op, e);
            None
        }
    }
}

/// Hand ownership of a context to the boundary and return its handle.
pub fn into_handle(ctx: KernelContext) -> i64 {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    LIVE_CONTEXTS.write().insert(handle, Arc::new(ctx));
    handle
}

/// Run `f` against a live context. The table lock is released before `f`
/// runs; the cloned `Arc` keeps the context alive through a concurrent
/// destroy.
fn with_context<T>(handle: i64, f: impl FnOnce(&KernelContext) -> Result<T>) -> Result<T> {
    let ctx = LIVE_CONTEXTS
        .read()
        .get(&handle)
        .cloned()
        .ok_or(KernelError::InvalidHandle(handle))?;
    f(ctx.as_ref())
}

unsafe fn read_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(KernelError::InvalidRequest(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| KernelError::InvalidRequest(format!("{} is not valid UTF-8", what)))
}

unsafe fn read_slice<'a, T>(ptr: *const T, len: i32, what: &str) -> Result<&'a [T]> {
    let len = usize::try_from(len)
        .map_err(|_| KernelError::InvalidRequest(format!("negative {} count", what)))?;
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(KernelError::InvalidRequest(format!("{} is null", what)));
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

fn dimension(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| KernelError::InvalidRequest(format!("{} out of range: {}", what, value)))
}

fn device_ordinal(device_id: i32) -> Result<u32> {
    u32::try_from(device_id)
        .map_err(|_| KernelError::InvalidRequest(format!("negative device id {}", device_id)))
}

// ---------------------------------------------------------------------------
// Extern C API
// ---------------------------------------------------------------------------

/// Bind device `device_id` and create a context.
/// Returns an opaque handle, or 0 on failure.
#[no_mangle]
pub extern "C" fn kerneljit_initialize(device_id: i32) -> i64 {
    let result = device_ordinal(device_id).and_then(KernelContext::initialize);
    record("initialize", result).map_or(0, into_handle)
}

/// Release a context and everything it owns.
///
/// Null, unknown or already destroyed handles and a mismatched device id are
/// reported as errors; the handle stays valid after a mismatch.
#[no_mangle]
pub extern "C" fn kerneljit_destroy(ctx: i64, device_id: i32) {
    let result = (|| {
        let device_id = device_ordinal(device_id)?;
        let shared = {
            let mut live = LIVE_CONTEXTS.write();
            match live.get(&ctx) {
                Some(bound) => bound.check_device(device_id)?,
                None => return Err(KernelError::InvalidHandle(ctx)),
            }
            live.remove(&ctx).ok_or(KernelError::InvalidHandle(ctx))?
        };
        match Arc::try_unwrap(shared) {
            Ok(owned) => owned.destroy(device_id),
            Err(shared) => {
                // In-flight calls hold the last references; the context is
                // released when the final one returns.
                debug!("context {} still in use, release deferred", ctx);
                drop(shared);
                Ok(())
            }
        }
    })();
    record("destroy", result);
}

/// Compile `src` and register it as `name`. Aggregation kind comes from the
/// source directive.
#[no_mangle]
pub unsafe extern "C" fn kerneljit_compile_kernel(
    ctx: i64,
    name: *const c_char,
    src: *const c_char,
) -> bool {
    let result = with_context(ctx, |c| {
        let name = read_str(name, "kernel name")?;
        let src = read_str(src, "kernel source")?;
        c.compile(name, src).map(|_| ())
    });
    record("compile", result).is_some()
}

/// Compile `src` and register it as `name` with an explicit aggregation tag
/// (0 none, 1 row, 2 column, 3 full).
#[no_mangle]
pub unsafe extern "C" fn kerneljit_compile_kernel_with_aggregation(
    ctx: i64,
    name: *const c_char,
    src: *const c_char,
    aggregation: i32,
) -> bool {
    let result = with_context(ctx, |c| {
        let name = read_str(name, "kernel name")?;
        let src = read_str(src, "kernel source")?;
        let kind = AggregationKind::from_tag(aggregation)
            .ok_or_else(|| KernelError::InvalidAggregation(format!("tag {}", aggregation)))?;
        c.compile_with_aggregation(name, src, kind)
    });
    record("compile", result).is_some()
}

#[allow(clippy::too_many_arguments)]
unsafe fn execute_raw<T: Element>(
    ctx: i64,
    name: *const c_char,
    in_ptrs: *const DevicePtr,
    num_inputs: i32,
    side_ptrs: *const DevicePtr,
    num_sides: i32,
    out_ptr: DevicePtr,
    scalars: *const T,
    num_scalars: i32,
    m: i64,
    n: i64,
    grix: i64,
) -> T {
    let result = with_context(ctx, |c| {
        let request = ExecutionRequest {
            name: read_str(name, "kernel name")?,
            inputs: read_slice(in_ptrs, num_inputs, "input pointers")?,
            sides: read_slice(side_ptrs, num_sides, "side pointers")?,
            output: out_ptr,
            scalars: read_slice(scalars, num_scalars, "scalars")?,
            m: dimension(m, "m")?,
            n: dimension(n, "n")?,
            grix: dimension(grix, "grix")?,
        };
        c.execute(&request)
    });
    record("execute", result).unwrap_or_else(T::zero)
}

/// Execute an `f64` kernel. Returns the reduction result for full
/// aggregations, otherwise 0.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn kerneljit_execute_f64(
    ctx: i64,
    name: *const c_char,
    in_ptrs: *const DevicePtr,
    num_inputs: i32,
    side_ptrs: *const DevicePtr,
    num_sides: i32,
    out_ptr: DevicePtr,
    scalars: *const f64,
    num_scalars: i32,
    m: i64,
    n: i64,
    grix: i64,
) -> f64 {
    execute_raw(
        ctx, name, in_ptrs, num_inputs, side_ptrs, num_sides, out_ptr, scalars, num_scalars, m,
        n, grix,
    )
}

/// Execute an `f32` kernel. Returns the reduction result for full
/// aggregations, otherwise 0.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn kerneljit_execute_f32(
    ctx: i64,
    name: *const c_char,
    in_ptrs: *const DevicePtr,
    num_inputs: i32,
    side_ptrs: *const DevicePtr,
    num_sides: i32,
    out_ptr: DevicePtr,
    scalars: *const f32,
    num_scalars: i32,
    m: i64,
    n: i64,
    grix: i64,
) -> f32 {
    execute_raw(
        ctx, name, in_ptrs, num_inputs, side_ptrs, num_sides, out_ptr, scalars, num_scalars, m,
        n, grix,
    )
}

/// Status of the last boundary call on this thread (0 = ok).
#[no_mangle]
pub extern "C" fn kerneljit_last_status() -> i32 {
    LAST_STATUS.with(|s| s.get())
}

/// Returns 1 if an accelerator can be bound, 0 otherwise.
#[no_mangle]
pub extern "C" fn kerneljit_is_available() -> i8 {
    if KernelContext::is_available() {
        1
    } else {
        0
    }
}
