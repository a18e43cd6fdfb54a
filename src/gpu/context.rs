//! # GPU Device
//!
//! [`GpuDevice`] bundles a `wgpu` device and queue with the bookkeeping the
//! sort backend needs: a process-unique id for artifact cache keys, the
//! adapter name for logs, and blocking helpers around submission and
//! readback.
//!
//! ## Shared device
//!
//! [`GpuDevice::shared`] requests one adapter and device per process on first
//! use. A hardware adapter is preferred; a software fallback adapter is tried
//! next. The outcome (including failure) is cached, so later calls are cheap
//! and consistent.
//!
//! ## Teardown
//!
//! Dropping a [`GpuDevice`] (after the last context and device vector using
//! it are gone) evicts the artifacts compiled for it from the process-wide
//! cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::engine::error::{SortError, SortResult};
use crate::engine::types::BackendKind;
use crate::gpu::pipeline::ArtifactCache;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

static SHARED_DEVICE: OnceLock<SortResult<Arc<GpuDevice>>> = OnceLock::new();

/// A `wgpu` device and queue usable by the sort backend.
pub struct GpuDevice {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    id: u64,
    adapter_name: String,
}

impl GpuDevice {
    /// Returns the process-wide shared device, requesting it on first use.
    ///
    /// ## Errors
    /// [`SortError::BackendUnavailable`] if no adapter or device can be
    /// obtained. The error is cached.

    pub fn shared() -> SortResult<Arc<Self>> {
        SHARED_DEVICE
            .get_or_init(|| Self::request().map(Arc::new))
            .clone()
    }

    /// Wraps a caller-owned device and queue.
    pub fn from_wgpu(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            adapter_name: "external".to_owned(),
        }
    }

    pub(crate) fn request() -> SortResult<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

            let mut adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await;
            if adapter.is_err() {
                debug!("no hardware adapter; trying the fallback adapter");
                adapter = instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        compatible_surface: None,
                        force_fallback_adapter: true,
                    })
                    .await;
            }
            let adapter = adapter
                .map_err(|e| SortError::backend_unavailable(BackendKind::Gpu, format!("no adapter: {e}")))?;

            let adapter_info = adapter.get_info();
            info!(
                backend = ?adapter_info.backend,
                device = %adapter_info.name,
                "selected sort adapter"
            );

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("hetsort_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    ..Default::default()
                })
                .await
                .map_err(|e| SortError::backend_unavailable(BackendKind::Gpu, format!("device request failed: {e}")))?;

            Ok(Self {
                device,
                queue,
                id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
                adapter_name: adapter_info.name,
            })
        })
    }

    /// Process-unique id of this device.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Adapter name, or `"external"` for caller-owned devices.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Device limits.
    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Underlying `wgpu` device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Underlying `wgpu` queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Largest number of bytes one storage binding may cover.
    pub(crate) fn max_binding_bytes(&self) -> u64 {
        let limits = self.device.limits();
        u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size)
    }

    /// Submits `commands` and blocks until the queue has executed them.
    ///
    /// A failed wait means the device is gone and is reported as
    /// [`SortError::BackendUnavailable`].

    pub(crate) fn submit_and_wait(&self, commands: wgpu::CommandBuffer) -> SortResult<()> {
        let submission = self.queue.submit(Some(commands));
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| SortError::backend_unavailable(BackendKind::Gpu, format!("device poll failed: {e}")))?;
        Ok(())
    }

    /// Runs `f` inside a validation error scope.
    ///
    /// An error popped from the scope becomes [`SortError::DeviceValidation`];
    /// an error returned by `f` itself takes precedence.
    pub(crate) fn scoped<R>(&self, what: &str, f: impl FnOnce() -> SortResult<R>) -> SortResult<R> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        let scope = pollster::block_on(self.device.pop_error_scope());
        match (out, scope) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(err)) => Err(SortError::DeviceValidation {
                operation: what.to_owned(),
                message: err.to_string(),
            }),
            (Ok(value), None) => Ok(value),
        }
    }

    /// Copies `size` bytes at `offset` of `source` back to the host.
    ///
    /// `offset` and `size` must be multiples of 4.

    pub(crate) fn read_bytes(&self, source: &wgpu::Buffer, offset: u64, size: u64) -> SortResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hetsort_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("hetsort_readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(source, offset, &staging, 0, size);
        self.submit_and_wait(encoder.finish())?;

        let slice = staging.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| SortError::backend_unavailable(BackendKind::Gpu, format!("device poll failed: {e}")))?;

        match pollster::block_on(rx.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(SortError::TransferFailure(format!("buffer map failed: {e}"))),
            None => return Err(SortError::TransferFailure("buffer map callback dropped".into())),
        }

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    /// Writes `bytes` at `offset` of `target` and waits for the write to land.
    pub(crate) fn write_bytes(&self, target: &wgpu::Buffer, offset: u64, bytes: &[u8]) -> SortResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.queue.write_buffer(target, offset, bytes);
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("hetsort_upload_encoder"),
        });
        self.submit_and_wait(encoder.finish())
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        ArtifactCache::global().evict_device(self.id);
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("id", &self.id)
            .field("adapter", &self.adapter_name)
            .finish()
    }
}
