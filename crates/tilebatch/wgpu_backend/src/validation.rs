//! wgpu error scopes reported as [`TileError`]s.
//!
//! wgpu reports validation and allocation failures asynchronously. Wrapping
//! device work in both scopes turns them into an error for the call that
//! caused them instead of an uncaptured-error panic later.

use anyhow::anyhow;
use log::error;
use pollster::block_on;
use tilebatch::{TileError, TileResult};
use wgpu::{CommandBuffer, Device, Error as GpuError, ErrorFilter, Queue, SubmissionIndex};

fn scope_failure(label: &str, err: &GpuError) -> TileError {
    error!(target: "tilebatch_wgpu", "{label} failed: {err}");
    let kind = match err {
        GpuError::OutOfMemory { .. } => "out of device memory",
        GpuError::Validation { .. } => "validation error",
        GpuError::Internal { .. } => "internal device error",
    };
    TileError::Device(anyhow!("{label}: {kind}: {err}"))
}

/// Run `work` under validation and out-of-memory scopes. The validation
/// error wins when both scopes caught one.
///
/// # Errors
/// Returns [`TileError::Device`] naming `label` if either scope caught an error.
pub fn scoped<T>(device: &Device, label: &str, work: impl FnOnce() -> T) -> TileResult<T> {
    device.push_error_scope(ErrorFilter::OutOfMemory);
    device.push_error_scope(ErrorFilter::Validation);
    let out = work();
    let validation = block_on(device.pop_error_scope());
    let memory = block_on(device.pop_error_scope());
    match validation.or(memory) {
        Some(err) => Err(scope_failure(label, &err)),
        None => Ok(out),
    }
}

/// Submit `buffers` inside [`scoped`].
///
/// # Errors
/// Returns [`TileError::Device`] if the submission was rejected.
pub fn submit_scoped(
    device: &Device,
    queue: &Queue,
    label: &str,
    buffers: impl IntoIterator<Item = CommandBuffer>,
) -> TileResult<SubmissionIndex> {
    scoped(device, label, || queue.submit(buffers))
}
