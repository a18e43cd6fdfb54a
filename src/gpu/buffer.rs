//! # Device Vectors
//!
//! [`DeviceVector`] is a fixed-length sequence of elements stored in a GPU
//! storage buffer. Every accessor performs a synchronous transfer of just the
//! touched region; there is no host-side cache.
//!
//! ## Layout
//! Elements are stored with their Rust byte layout. Device buffers are
//! addressed in 4-byte units, so `size_of::<T>()` must be a non-zero multiple
//! of 4; `u8`, `u16`, `i8` and `i16` cannot live in a device vector.

use std::fmt;
use std::mem::size_of;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;

use crate::engine::element::SortElement;
use crate::engine::error::{SortError, SortResult};
use crate::engine::registry::PodCodec;
use crate::gpu::context::GpuDevice;

/// A sequence of `T` resident in device memory.
pub struct DeviceVector<T: SortElement> {
    buffer: wgpu::Buffer,
    len: usize,
    device: Arc<GpuDevice>,
    codec: PodCodec<T>,
}

/// Checks that `T` can be stored in a device buffer.
pub(crate) fn check_device_layout<T: SortElement>() -> SortResult<()> {
    let size = size_of::<T>();
    if size == 0 || size % 4 != 0 {
        return Err(SortError::InvalidLayout {
            type_name: std::any::type_name::<T>(),
            size,
            reason: "device elements must be a non-zero multiple of 4 bytes",
        });
    }
    Ok(())
}

impl<T: SortElement + Pod> DeviceVector<T> {
    /// Uploads `values` to the shared device.
    ///
    /// ## Errors
    /// * [`SortError::BackendUnavailable`] if there is no shared device.
    /// * [`SortError::InvalidLayout`] if `T` cannot be stored on a device.
    /// * [`SortError::CapacityExceeded`] if the buffer would exceed device
    ///   limits.

    pub fn from_slice(values: &[T]) -> SortResult<Self> {
        Self::from_slice_on(&GpuDevice::shared()?, values)
    }

    /// Uploads `values` to `device`.
    pub fn from_slice_on(device: &Arc<GpuDevice>, values: &[T]) -> SortResult<Self> {
        let vector = Self::allocate(device, values.len())?;
        device.write_bytes(&vector.buffer, 0, bytemuck::cast_slice(values))?;
        Ok(vector)
    }

    /// Creates `len` copies of `value` on the shared device.
    pub fn filled(len: usize, value: T) -> SortResult<Self> {
        Self::filled_on(&GpuDevice::shared()?, len, value)
    }

    /// Creates `len` copies of `value` on `device`.
    pub fn filled_on(device: &Arc<GpuDevice>, len: usize, value: T) -> SortResult<Self> {
        Self::from_slice_on(device, &vec![value; len])
    }

    fn allocate(device: &Arc<GpuDevice>, len: usize) -> SortResult<Self> {
        check_device_layout::<T>()?;

        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or(SortError::CapacityExceeded { len, limit: usize::MAX / size_of::<T>() })?;
        let limit = device.max_binding_bytes();
        if bytes as u64 > limit {
            return Err(SortError::CapacityExceeded {
                len,
                limit: (limit / size_of::<T>() as u64) as usize,
            });
        }

        let buffer = device.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hetsort_device_vector"),
            size: (bytes as u64).max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            buffer,
            len,
            device: Arc::clone(device),
            codec: PodCodec::new(),
        })
    }
}

impl<T: SortElement> DeviceVector<T> {
    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the vector has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Device the vector lives on.
    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.device
    }

    /// Reads element `index`.
    pub fn get(&self, index: usize) -> SortResult<T> {
        if index >= self.len {
            return Err(SortError::IndexOutOfBounds { index, len: self.len });
        }
        self.read_range(index..index + 1)?
            .pop()
            .ok_or(SortError::IndexOutOfBounds { index, len: self.len })
    }

    /// Overwrites element `index`.
    pub fn set(&mut self, index: usize, value: T) -> SortResult<()> {
        if index >= self.len {
            return Err(SortError::IndexOutOfBounds { index, len: self.len });
        }
        let offset = (index * size_of::<T>()) as u64;
        self.device.write_bytes(&self.buffer, offset, &(self.codec.to_bytes)(&[value]))
    }

    /// Reads the elements in `range`.
    pub fn read_range(&self, range: Range<usize>) -> SortResult<Vec<T>> {
        if range.start > range.end || range.end > self.len {
            return Err(SortError::IndexOutOfBounds { index: range.end, len: self.len });
        }
        let size = size_of::<T>() as u64;
        let bytes = self.device.read_bytes(
            &self.buffer,
            range.start as u64 * size,
            (range.end - range.start) as u64 * size,
        )?;
        Ok((self.codec.from_bytes)(&bytes))
    }

    /// Reads every element.
    pub fn to_vec(&self) -> SortResult<Vec<T>> {
        self.read_range(0..self.len)
    }

    /// Replaces the whole contents with `values`, which must have the same
    /// length.
    pub(crate) fn write_all(&mut self, values: &[T]) -> SortResult<()> {
        if values.len() != self.len {
            return Err(SortError::Internal(format!(
                "host mirror has {} elements, device vector has {}",
                values.len(),
                self.len
            )));
        }
        self.device.write_bytes(&self.buffer, 0, &(self.codec.to_bytes)(values))
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Size of the live elements in bytes.
    pub(crate) fn byte_len(&self) -> u64 {
        (self.len * size_of::<T>()) as u64
    }
}

impl<T: SortElement> fmt::Debug for DeviceVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceVector")
            .field("element", &std::any::type_name::<T>())
            .field("len", &self.len)
            .field("device", &self.device.id())
            .finish()
    }
}
