//! # GPU Artifact Cache
//!
//! This module compiles generated WGSL into compute pipelines and caches the
//! result process-wide.
//!
//! ## Purpose
//!
//! * every program is compiled **at most once per key**, even when several
//!   threads hit the same key concurrently,
//! * pipelines and their bind group layouts are reused across calls,
//! * a compilation failure is cached for its key, so a broken comparator
//!   fails fast until it is re-registered.
//!
//! ---
//!
//! ## Keys
//!
//! | artifact | keyed by |
//! |---|---|
//! | radix passes | device, key width in words, workgroup size |
//! | key codec | device, primitive kind, direction, workgroup size |
//! | bitonic network | device, element type, comparator type, both registry revisions, workgroup size |
//!
//! Registry revisions change on every re-registration, which is how replaced
//! source fragments reach the cache without explicit invalidation. Inserting
//! a bitonic key evicts the keys it supersedes: same device, element and
//! workgroup size with an older type revision, or the same comparator with
//! an older comparator revision.
//!
//! ## Lifetime
//!
//! Every key names its device. When a [`GpuDevice`] is dropped, its keys are
//! evicted and the pipelines they hold are released with it. The shared
//! device lives for the whole process, so its artifacts do too.
//!
//! ---
//!
//! ## Binding model
//!
//! Every program uses a single bind group. Storage buffers come first, the
//! uniform [`KernelParams`](crate::gpu::kernels::KernelParams) block is the
//! last binding and is addressed with a dynamic offset so one uniform buffer
//! can carry the parameters of every dispatch in a submission.
//!
//! ## Concurrency
//!
//! The key → slot map is guarded by a `Mutex` held only long enough to fetch
//! or insert a slot. Each slot is an `Arc<OnceLock<_>>`; compilation happens
//! inside `OnceLock::get_or_init`, which blocks concurrent initialisers of the
//! same key.

use std::any::TypeId;
use std::collections::HashMap;
use std::mem::size_of;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::engine::error::{SortError, SortResult};
use crate::engine::registry::DeviceOrdering;
use crate::engine::types::{Direction, PrimitiveKind};
use crate::gpu::context::GpuDevice;
use crate::gpu::kernels::{bitonic_source, key_codec_source, radix_source, KernelParams};

/// Cache key of one compiled program.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ArtifactKey {
    Radix {
        device: u64,
        words: u32,
        workgroup_size: u32,
    },
    KeyCodec {
        device: u64,
        kind: PrimitiveKind,
        direction: Direction,
        workgroup_size: u32,
    },
    Bitonic {
        device: u64,
        element: TypeId,
        comparator: TypeId,
        type_revision: u64,
        comparator_revision: u64,
        workgroup_size: u32,
    },
}

impl ArtifactKey {
    fn device(&self) -> u64 {
        match self {
            ArtifactKey::Radix { device, .. }
            | ArtifactKey::KeyCodec { device, .. }
            | ArtifactKey::Bitonic { device, .. } => *device,
        }
    }

    /// Returns `true` if `self` makes `older` unreachable.
    fn supersedes(&self, older: &ArtifactKey) -> bool {
        match (self, older) {
            (
                ArtifactKey::Bitonic {
                    device,
                    element,
                    comparator,
                    type_revision,
                    comparator_revision,
                    workgroup_size,
                },
                ArtifactKey::Bitonic {
                    device: old_device,
                    element: old_element,
                    comparator: old_comparator,
                    type_revision: old_type_revision,
                    comparator_revision: old_comparator_revision,
                    workgroup_size: old_workgroup_size,
                },
            ) => {
                device == old_device
                    && element == old_element
                    && workgroup_size == old_workgroup_size
                    && (old_type_revision < type_revision
                        || (comparator == old_comparator && old_comparator_revision < comparator_revision))
            }
            _ => false,
        }
    }
}

/// Pipelines of one radix pass program.
#[derive(Debug)]
pub(crate) struct RadixKernels {
    pub(crate) layout: wgpu::BindGroupLayout,
    pub(crate) histogram: wgpu::ComputePipeline,
    pub(crate) scan: wgpu::ComputePipeline,
    pub(crate) scatter: wgpu::ComputePipeline,
}

/// Pipelines translating device elements to keys and back.
#[derive(Debug)]
pub(crate) struct KeyCodecKernels {
    pub(crate) layout: wgpu::BindGroupLayout,
    pub(crate) encode: wgpu::ComputePipeline,
    pub(crate) decode: wgpu::ComputePipeline,
}

/// Pipelines of one bitonic network.
#[derive(Debug)]
pub(crate) struct BitonicKernels {
    pub(crate) layout: wgpu::BindGroupLayout,
    pub(crate) init: wgpu::ComputePipeline,
    pub(crate) step: wgpu::ComputePipeline,
    pub(crate) gather: wgpu::ComputePipeline,
}

/// A compiled program.
#[derive(Debug)]
pub(crate) enum Artifact {
    Radix(RadixKernels),
    KeyCodec(KeyCodecKernels),
    Bitonic(BitonicKernels),
}

impl Artifact {
    fn kind_name(&self) -> &'static str {
        match self {
            Artifact::Radix(_) => "radix",
            Artifact::KeyCodec(_) => "key codec",
            Artifact::Bitonic(_) => "bitonic",
        }
    }

    fn mismatch(&self, wanted: &str) -> SortError {
        SortError::Internal(format!("artifact cache returned {} kernels for a {wanted} key", self.kind_name()))
    }

    pub(crate) fn radix(&self) -> SortResult<&RadixKernels> {
        match self {
            Artifact::Radix(k) => Ok(k),
            other => Err(other.mismatch("radix")),
        }
    }

    pub(crate) fn key_codec(&self) -> SortResult<&KeyCodecKernels> {
        match self {
            Artifact::KeyCodec(k) => Ok(k),
            other => Err(other.mismatch("key codec")),
        }
    }

    pub(crate) fn bitonic(&self) -> SortResult<&BitonicKernels> {
        match self {
            Artifact::Bitonic(k) => Ok(k),
            other => Err(other.mismatch("bitonic")),
        }
    }
}

type Slot = Arc<OnceLock<SortResult<Arc<Artifact>>>>;

/// Process-wide cache of compiled programs.
pub(crate) struct ArtifactCache {
    slots: Mutex<HashMap<ArtifactKey, Slot>>,
}

static ARTIFACTS: OnceLock<ArtifactCache> = OnceLock::new();

impl ArtifactCache {
    fn new() -> Self {
        ArtifactCache { slots: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn global() -> &'static Self {
        ARTIFACTS.get_or_init(Self::new)
    }

    /// Returns the artifact for `key`, building it with `build` on first use.
    pub(crate) fn resolve(
        &self,
        key: ArtifactKey,
        build: impl FnOnce() -> SortResult<Artifact>,
    ) -> SortResult<Arc<Artifact>> {
        let (slot, evicted) = {
            let mut slots = self.slots.lock()?;
            let evicted = if slots.contains_key(&key) {
                Vec::new()
            } else {
                take_where(&mut slots, |old| key.supersedes(old))
            };
            (Arc::clone(slots.entry(key.clone()).or_default()), evicted)
        };
        if !evicted.is_empty() {
            debug!(?key, evicted = evicted.len(), "evicted superseded artifacts");
        }
        drop(evicted);

        let mut built = false;
        let out = slot
            .get_or_init(|| {
                built = true;
                build().map(Arc::new)
            })
            .clone();
        if !built {
            debug!(?key, "artifact cache hit");
        }
        out
    }

    /// Number of keys resolved so far (successful or not).
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Number of keys held for `device`.
    #[cfg(test)]
    pub(crate) fn len_for_device(&self, device: u64) -> usize {
        self.slots
            .lock()
            .map(|s| s.keys().filter(|k| k.device() == device).count())
            .unwrap_or(0)
    }

    /// Drops every artifact compiled for `device`.
    pub(crate) fn evict_device(&self, device: u64) {
        let evicted = match self.slots.lock() {
            Ok(mut slots) => take_where(&mut slots, |key| key.device() == device),
            Err(_) => return,
        };
        if !evicted.is_empty() {
            debug!(device, evicted = evicted.len(), "released artifacts of dropped device");
        }
    }

    pub(crate) fn radix(&self, device: &GpuDevice, words: u32, workgroup_size: u32) -> SortResult<Arc<Artifact>> {
        let key = ArtifactKey::Radix { device: device.id(), words, workgroup_size };
        self.resolve(key, || {
            let label = format!("radix_w{words}");
            let source = radix_source(words, workgroup_size);
            let (layout, mut pipelines) = compile(
                device,
                &label,
                &source,
                &[Binding::ReadStorage, Binding::Storage, Binding::Storage, Binding::Params],
                &["histogram", "scan", "scatter"],
            )?;
            let scatter = pop_pipeline(&mut pipelines, &label)?;
            let scan = pop_pipeline(&mut pipelines, &label)?;
            let histogram = pop_pipeline(&mut pipelines, &label)?;
            Ok(Artifact::Radix(RadixKernels { layout, histogram, scan, scatter }))
        })
    }

    pub(crate) fn key_codec(
        &self,
        device: &GpuDevice,
        kind: PrimitiveKind,
        direction: Direction,
        workgroup_size: u32,
    ) -> SortResult<Arc<Artifact>> {
        let key = ArtifactKey::KeyCodec { device: device.id(), kind, direction, workgroup_size };
        self.resolve(key, || {
            let label = format!("key_codec_{kind}_{direction:?}");
            let source = key_codec_source(kind, direction, workgroup_size);
            let (layout, mut pipelines) = compile(
                device,
                &label,
                &source,
                &[Binding::ReadStorage, Binding::Storage, Binding::Params],
                &["encode", "decode"],
            )?;
            let decode = pop_pipeline(&mut pipelines, &label)?;
            let encode = pop_pipeline(&mut pipelines, &label)?;
            Ok(Artifact::KeyCodec(KeyCodecKernels { layout, encode, decode }))
        })
    }

    pub(crate) fn bitonic(
        &self,
        device: &GpuDevice,
        ordering: &DeviceOrdering,
        element: TypeId,
        comparator: TypeId,
        workgroup_size: u32,
    ) -> SortResult<Arc<Artifact>> {
        let key = ArtifactKey::Bitonic {
            device: device.id(),
            element,
            comparator,
            type_revision: ordering.element.revision,
            comparator_revision: ordering.comparator_revision,
            workgroup_size,
        };
        self.resolve(key, || {
            let label = format!("bitonic_{}", ordering.label);
            let source = bitonic_source(ordering, workgroup_size);
            let (layout, mut pipelines) = compile(
                device,
                &label,
                &source,
                &[Binding::ReadStorage, Binding::Storage, Binding::Storage, Binding::Params],
                &["init", "bitonic_step", "gather"],
            )?;
            let gather = pop_pipeline(&mut pipelines, &label)?;
            let step = pop_pipeline(&mut pipelines, &label)?;
            let init = pop_pipeline(&mut pipelines, &label)?;
            Ok(Artifact::Bitonic(BitonicKernels { layout, init, step, gather }))
        })
    }
}

/// Removes the slots whose key matches `pred`; they are dropped by the caller
/// once the map lock is released.
fn take_where(slots: &mut HashMap<ArtifactKey, Slot>, pred: impl Fn(&ArtifactKey) -> bool) -> Vec<Slot> {
    let keys: Vec<ArtifactKey> = slots.keys().filter(|k| pred(k)).cloned().collect();
    keys.into_iter().filter_map(|k| slots.remove(&k)).collect()
}

fn pop_pipeline(pipelines: &mut Vec<wgpu::ComputePipeline>, label: &str) -> SortResult<wgpu::ComputePipeline> {
    pipelines
        .pop()
        .ok_or_else(|| SortError::Internal(format!("missing pipeline for `{label}`")))
}

/// One binding slot of a generated program.
#[derive(Clone, Copy, Debug)]
enum Binding {
    ReadStorage,
    Storage,
    Params,
}

impl Binding {
    fn ty(self) -> wgpu::BindingType {
        match self {
            Binding::ReadStorage => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Binding::Storage => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Binding::Params => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(size_of::<KernelParams>() as u64),
            },
        }
    }
}

/// Compiles `source` and creates one pipeline per entry point, in order.
///
/// ## Binding layout
/// * Binding `i` has the type of `bindings[i]`.
///
/// ## Errors
/// [`SortError::CompilationFailure`] if WGSL parsing, validation, or pipeline
/// creation reports an error.

fn compile(
    device: &GpuDevice,
    label: &str,
    source: &str,
    bindings: &[Binding],
    entry_points: &[&str],
) -> SortResult<(wgpu::BindGroupLayout, Vec<wgpu::ComputePipeline>)> {
    debug!(label, entry_points = entry_points.len(), "compiling sort kernels");

    let device_ref = &device.device;
    device_ref.push_error_scope(wgpu::ErrorFilter::Validation);

    let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .enumerate()
        .map(|(i, binding)| wgpu::BindGroupLayoutEntry {
            binding: i as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: binding.ty(),
            count: None,
        })
        .collect();

    let layout = device_ref.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    });

    let pipeline_layout = device_ref.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let module = device_ref.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let pipelines: Vec<wgpu::ComputePipeline> = entry_points
        .iter()
        .map(|entry_point| {
            device_ref.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })
        .collect();

    if let Some(error) = pollster::block_on(device_ref.pop_error_scope()) {
        return Err(SortError::CompilationFailure {
            label: label.to_owned(),
            message: error.to_string(),
        });
    }

    Ok((layout, pipelines))
}

/// Number of compiled (or failed) programs held by the process-wide cache.
pub fn cached_artifact_count() -> usize {
    ArtifactCache::global().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn failing(label: &str) -> SortResult<Artifact> {
        Err(SortError::CompilationFailure { label: label.to_owned(), message: "rejected".into() })
    }

    fn bitonic_key(device: u64, comparator: TypeId, type_revision: u64, comparator_revision: u64) -> ArtifactKey {
        ArtifactKey::Bitonic {
            device,
            element: TypeId::of::<u32>(),
            comparator,
            type_revision,
            comparator_revision,
            workgroup_size: 256,
        }
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let cache = ArtifactCache::new();
        let builds = AtomicUsize::new(0);
        let key = ArtifactKey::Radix { device: 7, words: 1, workgroup_size: 256 };

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache.resolve(key.clone(), || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            failing("radix_w1")
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(results.iter().all(|r| matches!(r, Err(SortError::CompilationFailure { .. }))));
    }

    #[test]
    fn failures_are_cached_per_key_only() {
        let cache = ArtifactCache::new();
        let builds = AtomicUsize::new(0);
        let broken = bitonic_key(1, TypeId::of::<u8>(), 1, 1);
        let other = bitonic_key(1, TypeId::of::<u16>(), 1, 1);

        for _ in 0..3 {
            let err = cache
                .resolve(broken.clone(), || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    failing("broken")
                })
                .unwrap_err();
            assert!(matches!(err, SortError::CompilationFailure { .. }));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let _ = cache.resolve(other, || {
            builds.fetch_add(1, Ordering::SeqCst);
            failing("other")
        });
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        // A re-registered comparator gets a new key and is built again.
        let _ = cache.resolve(bitonic_key(1, TypeId::of::<u8>(), 1, 2), || {
            builds.fetch_add(1, Ordering::SeqCst);
            failing("broken")
        });
        assert_eq!(builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn newer_revisions_evict_superseded_keys() {
        let cache = ArtifactCache::new();
        let by_a = TypeId::of::<u8>();
        let by_b = TypeId::of::<u16>();

        let _ = cache.resolve(bitonic_key(1, by_a, 1, 1), || failing("a"));
        let _ = cache.resolve(bitonic_key(1, by_b, 1, 2), || failing("b"));
        let _ = cache.resolve(bitonic_key(2, by_a, 1, 1), || failing("a"));
        assert_eq!(cache.len(), 3);

        // Comparator `a` re-registered on device 1.
        let _ = cache.resolve(bitonic_key(1, by_a, 1, 3), || failing("a"));
        assert_eq!(cache.len_for_device(1), 2);
        assert_eq!(cache.len_for_device(2), 1);

        // Element type re-registered: every older key on device 1 goes.
        let _ = cache.resolve(bitonic_key(1, by_b, 4, 2), || failing("b"));
        assert_eq!(cache.len_for_device(1), 1);
        assert_eq!(cache.len_for_device(2), 1);
    }

    #[test]
    fn evicting_a_device_keeps_other_devices() {
        let cache = ArtifactCache::new();
        let _ = cache.resolve(ArtifactKey::Radix { device: 3, words: 1, workgroup_size: 256 }, || failing("r"));
        let _ = cache.resolve(
            ArtifactKey::KeyCodec {
                device: 3,
                kind: PrimitiveKind::F32,
                direction: Direction::Ascending,
                workgroup_size: 256,
            },
            || failing("c"),
        );
        let _ = cache.resolve(ArtifactKey::Radix { device: 4, words: 2, workgroup_size: 256 }, || failing("r"));

        cache.evict_device(3);
        assert_eq!(cache.len_for_device(3), 0);
        assert_eq!(cache.len_for_device(4), 1);
    }

    #[test]
    fn compiled_artifacts_are_reused_and_released_with_their_device() {
        let Ok(device) = GpuDevice::request() else {
            eprintln!("skipping: no GPU adapter");
            return;
        };
        let id = device.id();
        let cache = ArtifactCache::global();

        let first = cache.radix(&device, 1, 256).unwrap();
        let second = cache.radix(&device, 1, 256).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len_for_device(id), 1);

        drop((first, second));
        drop(device);
        assert_eq!(cache.len_for_device(id), 0);
    }
}
