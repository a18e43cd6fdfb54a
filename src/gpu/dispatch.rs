//! # GPU Sort Backend
//!
//! [`GpuBackend`] implements [`SortBackend`] over one [`GpuDevice`].
//!
//! ## Strategies
//!
//! * **GpuRadix** sorts built-in numerics by their order-preserving keys with
//!   4-bit LSD passes (histogram, scan, scatter per pass). Host sequences have
//!   their keys computed on the CPU; device sequences are encoded, sorted and
//!   decoded without leaving the device.
//! * **GpuBitonic** sorts anything with a registered device ordering through a
//!   bitonic network over an index permutation padded to a power of two, then
//!   gathers the elements in their new order.
//! * **SmallSerial** sorts a host view on the calling thread, after the same
//!   registration checks as the device strategies.
//!
//! ## Execution model
//!
//! All dispatches of one sort are recorded into a single command buffer with
//! one compute pass. Per-dispatch parameters live in one uniform buffer and
//! are selected with dynamic offsets. The caller blocks until the queue is
//! idle.
//!
//! ## Failure guarantees
//!
//! * Host data is written only after the device result has been read back.
//! * Device data is only written by the last command of the submission
//!   (decode, or a buffer copy), so a failed submission leaves it as it was.
//! * A sequence on a different device than the backend's is sorted through
//!   its host mirror.

use std::fmt;
use std::mem::size_of;
use std::num::NonZeroU64;
use std::sync::Arc;

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::engine::comparator::Comparator;
use crate::engine::config::SortConfig;
use crate::engine::cpu::{radix_params, sort_on_caller};
use crate::engine::dispatch::SortBackend;
use crate::engine::element::{directed_key, from_directed_key, SortElement};
use crate::engine::error::{SortError, SortResult};
use crate::engine::registry::{device_ordering, require_type, TypeEntry};
use crate::engine::sequence::Sequence;
use crate::engine::types::{
    BackendKind, ComparatorInfo, Direction, ElementInfo, PrimitiveKind, Strategy, GPU_MAX_WORKGROUPS,
    GPU_RADIX_BITS, GPU_RADIX_BUCKETS,
};
use crate::gpu::buffer::{check_device_layout, DeviceVector};
use crate::gpu::context::GpuDevice;
use crate::gpu::kernels::KernelParams;
use crate::gpu::pipeline::{Artifact, ArtifactCache, BitonicKernels, KeyCodecKernels, RadixKernels};

/// Backend sorting on one GPU device.
#[derive(Clone)]
pub struct GpuBackend {
    device: Arc<GpuDevice>,
    workgroup_size: u32,
}

/// Compiled kernels handed from resolution to execution.
pub struct GpuArtifacts {
    plan: Plan,
}

enum Plan {
    Host,
    Radix {
        kernels: Arc<Artifact>,
        codec: Option<Arc<Artifact>>,
    },
    Bitonic {
        kernels: Arc<Artifact>,
        element: Arc<TypeEntry>,
    },
}

impl GpuBackend {
    /// Creates a backend on `device`.
    ///
    /// ## Errors
    /// [`SortError::InvalidConfig`] if the configured workgroup size exceeds
    /// the device limits.

    pub fn new(device: Arc<GpuDevice>, config: &SortConfig) -> SortResult<Self> {
        let limits = device.limits();
        let workgroup_size = config.workgroup_size;
        if workgroup_size > limits.max_compute_invocations_per_workgroup
            || workgroup_size > limits.max_compute_workgroup_size_x
        {
            return Err(SortError::InvalidConfig(format!(
                "workgroup size {workgroup_size} exceeds the device limit of {}",
                limits
                    .max_compute_invocations_per_workgroup
                    .min(limits.max_compute_workgroup_size_x)
            )));
        }

        info!(
            device = device.id(),
            adapter = device.adapter_name(),
            workgroup_size,
            "gpu sort backend ready"
        );
        Ok(Self { device, workgroup_size })
    }

    /// Device this backend submits to.
    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.device
    }

    /// Invocations per workgroup of every generated kernel.
    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    fn owns<T: SortElement>(&self, vector: &DeviceVector<T>) -> bool {
        vector.device().id() == self.device.id()
    }

    fn is_local<T: SortElement>(&self, sequence: &Sequence<'_, T>) -> bool {
        match sequence {
            Sequence::Device(vector) => self.owns(vector),
            Sequence::Host(_) => false,
        }
    }

    fn max_workgroups(&self) -> u64 {
        u64::from(self.device.limits().max_compute_workgroups_per_dimension.min(GPU_MAX_WORKGROUPS))
    }

    /// Largest length a radix sort with `words` key words can handle.
    fn radix_limit(&self, words: u32) -> usize {
        let by_grid = self.max_workgroups() * u64::from(self.workgroup_size);
        let by_bytes = self.device.max_binding_bytes() / (u64::from(words) * 4);
        by_grid.min(by_bytes).min(u64::from(u32::MAX)) as usize
    }

    /// Largest length a bitonic sort of `element_size`-byte elements can
    /// handle. The padded index array must fit both the grid and a binding.
    fn bitonic_limit(&self, element_size: usize) -> usize {
        let bytes = self.device.max_binding_bytes();
        let by_grid = floor_power_of_two(self.max_workgroups() * u64::from(self.workgroup_size));
        let by_index = floor_power_of_two(bytes / 4);
        let by_data = bytes / element_size.max(1) as u64;
        by_grid.min(by_index).min(by_data).min(1 << 31) as usize
    }
}

fn floor_power_of_two(v: u64) -> u64 {
    if v == 0 {
        0
    } else {
        1 << (63 - v.leading_zeros())
    }
}

fn check_capacity(len: usize, limit: usize) -> SortResult<()> {
    if len > limit {
        return Err(SortError::CapacityExceeded { len, limit });
    }
    Ok(())
}

fn strategy_mismatch(strategy: Strategy) -> SortError {
    SortError::Internal(format!("strategy {strategy} cannot run on the gpu backend"))
}

impl fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBackend")
            .field("device", &self.device)
            .field("workgroup_size", &self.workgroup_size)
            .finish()
    }
}

impl SortBackend for GpuBackend {
    type Artifacts = GpuArtifacts;

    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn resolve_artifacts<T: SortElement>(
        &self,
        element: &ElementInfo,
        comparator: &ComparatorInfo,
        strategy: Strategy,
        sequence: &Sequence<'_, T>,
        _config: &SortConfig,
    ) -> SortResult<GpuArtifacts> {
        let keyed = element.primitive.is_some() && comparator.direction.is_some();
        let cache = ArtifactCache::global();

        let plan = match strategy {
            Strategy::Noop => Plan::Host,
            Strategy::SmallSerial => {
                if keyed {
                    require_type(element)?;
                } else {
                    device_ordering(element, comparator)?;
                }
                Plan::Host
            }
            Strategy::GpuRadix => {
                let (kind, direction) = match (element.primitive, comparator.direction) {
                    (Some(kind), Some(direction)) => (kind, direction),
                    _ => return Err(strategy_mismatch(strategy)),
                };
                require_type(element)?;
                check_capacity(sequence.len(), self.radix_limit(kind.key_words()))?;

                let kernels = cache.radix(&self.device, kind.key_words(), self.workgroup_size)?;
                let codec = if self.is_local(sequence) {
                    Some(cache.key_codec(&self.device, kind, direction, self.workgroup_size)?)
                } else {
                    None
                };
                Plan::Radix { kernels, codec }
            }
            Strategy::GpuBitonic => {
                let ordering = device_ordering(element, comparator)?;
                check_device_layout::<T>()?;
                check_capacity(sequence.len(), self.bitonic_limit(element.size))?;

                let kernels = cache.bitonic(
                    &self.device,
                    &ordering,
                    element.type_id,
                    comparator.type_id,
                    self.workgroup_size,
                )?;
                Plan::Bitonic { kernels, element: ordering.element }
            }
            other => return Err(strategy_mismatch(other)),
        };

        Ok(GpuArtifacts { plan })
    }

    fn execute<T: SortElement, C: Comparator<T>>(
        &self,
        sequence: Sequence<'_, T>,
        comparator: &C,
        strategy: Strategy,
        artifacts: GpuArtifacts,
        _config: &SortConfig,
    ) -> SortResult<()> {
        match (strategy, artifacts.plan) {
            (Strategy::Noop, _) => Ok(()),
            (Strategy::SmallSerial, _) => sequence.with_host_view(|data| {
                sort_on_caller(data, comparator, Strategy::SmallSerial)
                    .ok_or_else(|| strategy_mismatch(Strategy::SmallSerial))
            }),
            (Strategy::GpuRadix, Plan::Radix { kernels, codec }) => {
                let (kind, direction) = radix_params::<T, C>(comparator)?;
                let kernels = kernels.radix()?;
                match (sequence, codec) {
                    (Sequence::Device(vector), Some(codec)) if self.owns(vector) => {
                        self.radix_on_device(vector, kernels, codec.key_codec()?, kind)
                    }
                    (sequence, _) => {
                        sequence.with_host_view(|data| self.radix_on_host(data, kernels, kind, direction))
                    }
                }
            }
            (Strategy::GpuBitonic, Plan::Bitonic { kernels, element }) => {
                let kernels = kernels.bitonic()?;
                match sequence {
                    Sequence::Device(vector) if self.owns(vector) => self.bitonic_on_device(vector, kernels),
                    sequence => sequence.with_host_view(|data| self.bitonic_on_host(data, kernels, &element)),
                }
            }
            (other, _) => Err(strategy_mismatch(other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy runners
// ─────────────────────────────────────────────────────────────────────────────

impl GpuBackend {
    fn radix_on_host<T: SortElement>(
        &self,
        data: &mut [T],
        kernels: &RadixKernels,
        kind: PrimitiveKind,
        direction: Direction,
    ) -> SortResult<()> {
        let n = data.len();
        let words = kind.key_words();
        let bits = kind.bits();

        let mut keys: Vec<u32> = Vec::with_capacity(n * words as usize);
        for value in data.iter() {
            let key = directed_key(value, direction, bits);
            keys.push(key as u32);
            if words == 2 {
                keys.push((key >> 32) as u32);
            }
        }
        let key_bytes = (keys.len() * size_of::<u32>()) as u64;

        let a = storage_buffer_init(&self.device, "hetsort_keys_a", bytemuck::cast_slice(&keys));
        let b = storage_buffer(&self.device, "hetsort_keys_b", key_bytes);
        let hist = self.histogram_buffer(n);

        debug!(n, bits, "gpu radix sort of host keys");
        self.device.scoped("radix sort", || {
            let mut recorder = Recorder::new(&self.device);
            self.record_radix_passes(&mut recorder, kernels, [&a, &b, &hist], n as u32, bits, words);

            let mut encoder = self.device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("hetsort_radix_encoder"),
            });
            recorder.record(&mut encoder);
            self.device.submit_and_wait(encoder.finish())
        })?;

        let sorted_bytes = self.device.read_bytes(&a, 0, key_bytes)?;
        let sorted_keys: Vec<u32> = bytemuck::pod_collect_to_vec(&sorted_bytes);

        let mut sorted = Vec::with_capacity(n);
        for chunk in sorted_keys.chunks_exact(words as usize) {
            let hi = chunk.get(1).copied().unwrap_or(0);
            let key = u64::from(chunk[0]) | (u64::from(hi) << 32);
            let value = from_directed_key::<T>(key, direction, bits)
                .ok_or_else(|| SortError::Internal(format!("radix key {key:#x} does not decode to a {kind}")))?;
            sorted.push(value);
        }
        if sorted.len() != n {
            return Err(SortError::TransferFailure(format!(
                "read back {} keys, expected {n}",
                sorted.len()
            )));
        }

        data.copy_from_slice(&sorted);
        Ok(())
    }

    fn radix_on_device<T: SortElement>(
        &self,
        vector: &mut DeviceVector<T>,
        kernels: &RadixKernels,
        codec: &KeyCodecKernels,
        kind: PrimitiveKind,
    ) -> SortResult<()> {
        let n = vector.len();
        let bytes = vector.byte_len();
        let words = kind.key_words();

        let a = storage_buffer(&self.device, "hetsort_keys_a", bytes);
        let b = storage_buffer(&self.device, "hetsort_keys_b", bytes);
        let hist = self.histogram_buffer(n);
        let original = vector.buffer();

        debug!(n, bits = kind.bits(), "gpu radix sort of device vector");
        self.device.scoped("radix sort", || {
            let mut recorder = Recorder::new(&self.device);
            let params = KernelParams { n: n as u32, ..KernelParams::default() };
            let groups = (n as u32).div_ceil(self.workgroup_size);

            let encode = recorder.bind(&codec.layout, &[original, &a]);
            recorder.dispatch(&codec.encode, encode, params, groups);

            self.record_radix_passes(&mut recorder, kernels, [&a, &b, &hist], n as u32, kind.bits(), words);

            let decode = recorder.bind(&codec.layout, &[&a, original]);
            recorder.dispatch(&codec.decode, decode, params, groups);

            let mut encoder = self.device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("hetsort_radix_encoder"),
            });
            recorder.record(&mut encoder);
            self.device.submit_and_wait(encoder.finish())
        })
    }

    fn bitonic_on_host<T: SortElement>(
        &self,
        data: &mut [T],
        kernels: &BitonicKernels,
        element: &TypeEntry,
    ) -> SortResult<()> {
        let codec = element.descriptor.codec::<T>().ok_or_else(|| {
            SortError::Internal(format!(
                "descriptor `{}` does not describe `{}`",
                element.descriptor.name(),
                std::any::type_name::<T>()
            ))
        })?;

        let n = data.len();
        let bytes = (codec.to_bytes)(data);
        let byte_len = bytes.len() as u64;
        let padded = (n as u32).next_power_of_two();

        let input = storage_buffer_init(&self.device, "hetsort_bitonic_data", &bytes);
        let index = storage_buffer(&self.device, "hetsort_bitonic_index", u64::from(padded) * 4);
        let output = storage_buffer(&self.device, "hetsort_bitonic_out", byte_len);

        debug!(n, padded, element = element.descriptor.name(), "gpu bitonic sort of host data");
        self.device.scoped("bitonic sort", || {
            let mut recorder = Recorder::new(&self.device);
            self.record_bitonic(&mut recorder, kernels, [&input, &index, &output], n as u32);

            let mut encoder = self.device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("hetsort_bitonic_encoder"),
            });
            recorder.record(&mut encoder);
            self.device.submit_and_wait(encoder.finish())
        })?;

        let sorted = (codec.from_bytes)(&self.device.read_bytes(&output, 0, byte_len)?);
        if sorted.len() != n {
            return Err(SortError::TransferFailure(format!(
                "read back {} elements, expected {n}",
                sorted.len()
            )));
        }

        data.copy_from_slice(&sorted);
        Ok(())
    }

    fn bitonic_on_device<T: SortElement>(&self, vector: &mut DeviceVector<T>, kernels: &BitonicKernels) -> SortResult<()> {
        let n = vector.len();
        let byte_len = vector.byte_len();
        let padded = (n as u32).next_power_of_two();

        let index = storage_buffer(&self.device, "hetsort_bitonic_index", u64::from(padded) * 4);
        let output = storage_buffer(&self.device, "hetsort_bitonic_out", byte_len);
        let original = vector.buffer();

        debug!(n, padded, "gpu bitonic sort of device vector");
        self.device.scoped("bitonic sort", || {
            let mut recorder = Recorder::new(&self.device);
            self.record_bitonic(&mut recorder, kernels, [original, &index, &output], n as u32);

            let mut encoder = self.device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("hetsort_bitonic_encoder"),
            });
            recorder.record(&mut encoder);
            encoder.copy_buffer_to_buffer(&output, 0, original, 0, byte_len);
            self.device.submit_and_wait(encoder.finish())
        })
    }

    fn histogram_buffer(&self, n: usize) -> wgpu::Buffer {
        let tiles = (n as u64).div_ceil(u64::from(self.workgroup_size));
        storage_buffer(
            &self.device,
            "hetsort_histogram",
            tiles * u64::from(GPU_RADIX_BUCKETS) * 4,
        )
    }

    /// Records every radix pass over `keys = [a, b, hist]`.
    ///
    /// Passes alternate `a → b` and `b → a`. Key widths are multiples of 8
    /// bits, so the pass count is even and the sorted keys end up in `a`.
    fn record_radix_passes<'a>(
        &self,
        recorder: &mut Recorder<'a>,
        kernels: &'a RadixKernels,
        [a, b, hist]: [&'a wgpu::Buffer; 3],
        n: u32,
        bits: u32,
        words: u32,
    ) {
        let tiles = n.div_ceil(self.workgroup_size);
        let forward = recorder.bind(&kernels.layout, &[a, b, hist]);
        let backward = recorder.bind(&kernels.layout, &[b, a, hist]);

        for pass in 0..bits.div_ceil(GPU_RADIX_BITS) {
            let bit = pass * GPU_RADIX_BITS;
            let params = KernelParams {
                n,
                num_tiles: tiles,
                word: (bit / 32).min(words - 1),
                shift: bit % 32,
                ..KernelParams::default()
            };
            let group = if pass % 2 == 0 { forward } else { backward };
            recorder.dispatch(&kernels.histogram, group, params, tiles);
            recorder.dispatch(&kernels.scan, group, params, 1);
            recorder.dispatch(&kernels.scatter, group, params, tiles);
        }
    }

    fn record_bitonic<'a>(
        &self,
        recorder: &mut Recorder<'a>,
        kernels: &'a BitonicKernels,
        buffers: [&'a wgpu::Buffer; 3],
        n: u32,
    ) {
        let padded = n.next_power_of_two();
        let group = recorder.bind(&kernels.layout, &buffers);
        let base = KernelParams { n, padded, ..KernelParams::default() };

        recorder.dispatch(&kernels.init, group, base, padded.div_ceil(self.workgroup_size));

        let pairs = (padded / 2).div_ceil(self.workgroup_size);
        let mut k = 2;
        while k <= padded {
            let mut j = k / 2;
            while j > 0 {
                recorder.dispatch(&kernels.step, group, KernelParams { k, j, ..base }, pairs);
                j /= 2;
            }
            k *= 2;
        }

        recorder.dispatch(&kernels.gather, group, base, n.div_ceil(self.workgroup_size));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command recording
// ─────────────────────────────────────────────────────────────────────────────

fn storage_usage() -> wgpu::BufferUsages {
    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
}

fn storage_buffer(device: &GpuDevice, label: &str, size: u64) -> wgpu::Buffer {
    device.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(4),
        usage: storage_usage(),
        mapped_at_creation: false,
    })
}

fn storage_buffer_init(device: &GpuDevice, label: &str, contents: &[u8]) -> wgpu::Buffer {
    device.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: storage_usage(),
    })
}

struct Step<'a> {
    pipeline: &'a wgpu::ComputePipeline,
    group: usize,
    offset: u32,
    workgroups: u32,
}

/// Collects the dispatches of one submission.
///
/// Bind groups and the uniform buffer are created in [`Recorder::record`],
/// once every dispatch's parameters are known.
struct Recorder<'a> {
    device: &'a GpuDevice,
    stride: usize,
    params: Vec<u8>,
    groups: Vec<(&'a wgpu::BindGroupLayout, Vec<&'a wgpu::Buffer>)>,
    steps: Vec<Step<'a>>,
}

impl<'a> Recorder<'a> {
    fn new(device: &'a GpuDevice) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment.max(1) as usize;
        Self {
            device,
            stride: size_of::<KernelParams>().next_multiple_of(align),
            params: Vec::new(),
            groups: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Declares a bind group over `storage`; the params block is appended as
    /// the last binding.
    fn bind(&mut self, layout: &'a wgpu::BindGroupLayout, storage: &[&'a wgpu::Buffer]) -> usize {
        self.groups.push((layout, storage.to_vec()));
        self.groups.len() - 1
    }

    fn dispatch(&mut self, pipeline: &'a wgpu::ComputePipeline, group: usize, params: KernelParams, workgroups: u32) {
        if workgroups == 0 {
            return;
        }
        let offset = self.params.len();
        self.params.extend_from_slice(bytemuck::bytes_of(&params));
        self.params.resize(offset + self.stride, 0);
        self.steps.push(Step { pipeline, group, offset: offset as u32, workgroups });
    }

    fn record(self, encoder: &mut wgpu::CommandEncoder) {
        if self.steps.is_empty() {
            return;
        }
        let device = &self.device.device;

        let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("hetsort_params"),
            contents: &self.params,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_groups: Vec<wgpu::BindGroup> = self
            .groups
            .iter()
            .map(|(layout, storage)| {
                let mut entries: Vec<wgpu::BindGroupEntry> = storage
                    .iter()
                    .enumerate()
                    .map(|(i, buffer)| wgpu::BindGroupEntry {
                        binding: i as u32,
                        resource: buffer.as_entire_binding(),
                    })
                    .collect();
                entries.push(wgpu::BindGroupEntry {
                    binding: storage.len() as u32,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &uniforms,
                        offset: 0,
                        size: NonZeroU64::new(size_of::<KernelParams>() as u64),
                    }),
                });
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("hetsort_bind_group"),
                    layout,
                    entries: &entries,
                })
            })
            .collect();

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("hetsort_sort_pass"),
            timestamp_writes: None,
        });
        for step in &self.steps {
            pass.set_pipeline(step.pipeline);
            pass.set_bind_group(0, &bind_groups[step.group], &[step.offset]);
            pass.dispatch_workgroups(step.workgroups, 1, 1);
        }
    }
}
