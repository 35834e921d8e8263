//! # GPU Backend
//!
//! The seam between the buffer pool and a real device. The pool only ever
//! asks for two things: create a buffer, destroy a buffer.
//!
//! Two implementations ship with the crate:
//! - [`WgpuBackend`] creates real `wgpu::Buffer`s from a shared device
//! - [`HeadlessBackend`] hands out handles and counts bytes, for tools and
//!   tests that run without a GPU

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BackendError;

/// Opaque handle to a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Opaque handle to a render pipeline, resolved by the command sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u64);

/// Description of a device buffer to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: wgpu::BufferUsages,
}

/// Device collaborator used by the buffer pool.
///
/// Implementations must be shareable across threads; the pool itself is
/// single-writer but the backend usually outlives it and serves several.
pub trait GpuBackend: Send + Sync {
    /// Creates a device buffer.
    ///
    /// # Errors
    ///
    /// [`BackendError::Unimplemented`] if the backend has no device path,
    /// any other variant on device failure.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError>;

    /// Destroys a device buffer.
    ///
    /// # Errors
    ///
    /// [`BackendError::UnknownHandle`] if the handle is not live.
    fn destroy_buffer(&self, handle: BufferHandle) -> Result<(), BackendError>;
}

impl<T: GpuBackend + ?Sized> GpuBackend for Arc<T> {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        (**self).create_buffer(descriptor)
    }

    fn destroy_buffer(&self, handle: BufferHandle) -> Result<(), BackendError> {
        (**self).destroy_buffer(handle)
    }
}

// ============================================================================
// HEADLESS
// ============================================================================

/// Device-less backend.
///
/// Hands out sequential handles and tracks live bytes. An optional byte
/// limit makes it report [`BackendError::OutOfDeviceMemory`] like a full
/// device would.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: AtomicU64,
    live: Mutex<HashMap<BufferHandle, u64>>,
    limit: Option<u64>,
}

impl HeadlessBackend {
    /// Creates an unlimited headless backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a headless backend that refuses to exceed `limit` live bytes.
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.live.lock().len()
    }

    /// Total bytes of live buffers.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.live.lock().values().sum()
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        let mut live = self.live.lock();
        if let Some(limit) = self.limit {
            let allocated: u64 = live.values().sum();
            if allocated + descriptor.size > limit {
                return Err(BackendError::OutOfDeviceMemory);
            }
        }

        let handle = BufferHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        live.insert(handle, descriptor.size);
        Ok(handle)
    }

    fn destroy_buffer(&self, handle: BufferHandle) -> Result<(), BackendError> {
        self.live
            .lock()
            .remove(&handle)
            .map(|_| ())
            .ok_or(BackendError::UnknownHandle(handle))
    }
}

// ============================================================================
// WGPU
// ============================================================================

/// Backend creating real buffers on a shared `wgpu::Device`.
///
/// Buffers are kept in a handle map; removing one calls
/// `wgpu::Buffer::destroy` so device memory is released immediately rather
/// than when the last reference drops.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    next_id: AtomicU64,
    buffers: Mutex<HashMap<BufferHandle, wgpu::Buffer>>,
}

impl WgpuBackend {
    /// Wraps a device.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            next_id: AtomicU64::new(0),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped device.
    #[must_use]
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Runs `f` with the device buffer behind `handle`.
    ///
    /// Returns `None` if the handle is not live.
    pub fn with_buffer<R>(
        &self,
        handle: BufferHandle,
        f: impl FnOnce(&wgpu::Buffer) -> R,
    ) -> Option<R> {
        self.buffers.lock().get(&handle).map(f)
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, BackendError> {
        let max = self.device.limits().max_buffer_size;
        if descriptor.size > max {
            return Err(BackendError::Device(format!(
                "buffer of {} bytes exceeds device limit of {max}",
                descriptor.size
            )));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: descriptor.size,
            usage: descriptor.usage,
            mapped_at_creation: false,
        });

        let handle = BufferHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock().insert(handle, buffer);

        tracing::trace!(?handle, size = descriptor.size, "created device buffer");
        Ok(handle)
    }

    fn destroy_buffer(&self, handle: BufferHandle) -> Result<(), BackendError> {
        let buffer = self
            .buffers
            .lock()
            .remove(&handle)
            .ok_or(BackendError::UnknownHandle(handle))?;
        buffer.destroy();
        Ok(())
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("live_buffers", &self.live_buffers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(size: u64) -> BufferDescriptor {
        BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::VERTEX,
        }
    }

    #[test]
    fn test_headless_tracks_bytes() {
        let backend = HeadlessBackend::new();
        let a = backend.create_buffer(&descriptor(256)).unwrap();
        let b = backend.create_buffer(&descriptor(512)).unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.allocated_bytes(), 768);

        backend.destroy_buffer(a).unwrap();
        assert_eq!(backend.live_buffers(), 1);
        assert_eq!(backend.destroy_buffer(a), Err(BackendError::UnknownHandle(a)));
    }

    #[test]
    fn test_headless_limit() {
        let backend = HeadlessBackend::with_limit(1024);
        backend.create_buffer(&descriptor(1024)).unwrap();
        assert_eq!(
            backend.create_buffer(&descriptor(1)),
            Err(BackendError::OutOfDeviceMemory)
        );
    }

    #[test]
    fn test_arc_forwarding() {
        let backend = Arc::new(HeadlessBackend::new());
        let shared: Arc<dyn GpuBackend> = backend.clone();
        let handle = shared.create_buffer(&descriptor(64)).unwrap();
        assert_eq!(backend.live_buffers(), 1);
        shared.destroy_buffer(handle).unwrap();
        assert_eq!(backend.live_buffers(), 0);
    }
}
