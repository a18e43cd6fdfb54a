//! # Type and Comparator Registry
//!
//! This module provides the global registry that maps Rust element and
//! comparator types to the WGSL source fragments used to generate device
//! code.
//!
//! ## Purpose
//! GPU backends cannot run arbitrary Rust predicates. Each element type and
//! each non-canonical comparator that should run on a device is described once
//! by a source fragment and a canonical name. CPU backends never consult the
//! registry.
//!
//! ## Design
//! - Element types are keyed by `TypeId` and carry a WGSL type expression, an
//!   optional struct declaration, and an optional `natural_less` body.
//! - Comparators are keyed by `(element TypeId, comparator TypeId)` and carry a
//!   `cmp_less` body over the parameters `a` and `b`.
//! - Every registration receives a fresh **revision**. Revisions are part of
//!   the artifact cache key, so re-registering a type or comparator makes the
//!   next sort compile against the new source.
//! - Built-in numeric types are pre-registered on first access. [`Less`] and
//!   [`Greater`] are never registered: they resolve to the element type's
//!   `natural_less` body.
//!
//! ## Invariants
//! - Canonical names are valid WGSL identifiers and unique per namespace.
//! - Types with a device representation have a size that is a multiple of 4.
//! - A comparator is only accepted for an element type that is registered with
//!   a device representation.
//!
//! ## Concurrency
//! The registry is protected by an `RwLock`: lookups on the sort path take a
//! read lock, registration takes a write lock.
//!
//! [`Less`]: crate::engine::comparator::Less
//! [`Greater`]: crate::engine::comparator::Greater

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::size_of,
    sync::{Arc, OnceLock, RwLock},
};

use bytemuck::Pod;
use tracing::debug;

use crate::engine::comparator::{Comparator, Greater, Less};
use crate::engine::element::SortElement;
use crate::engine::error::{SortError, SortResult};
use crate::engine::types::{ComparatorInfo, Direction, ElementInfo, PrimitiveKind};

/// Monomorphized byte conversions for a `Pod` element type.
///
/// Stored type-erased in [`TypeDescriptor`] and recovered with a downcast on
/// the sort path, which is generic over `T` again. Device vectors hold one
/// directly.

pub(crate) struct PodCodec<T> {
    pub(crate) to_bytes: fn(&[T]) -> Vec<u8>,
    pub(crate) from_bytes: fn(&[u8]) -> Vec<T>,
}

impl<T> Clone for PodCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PodCodec<T> {}

impl<T: Pod> PodCodec<T> {
    pub(crate) fn new() -> Self {
        PodCodec { to_bytes: pod_to_bytes::<T>, from_bytes: pod_from_bytes::<T> }
    }
}

fn pod_to_bytes<T: Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn pod_from_bytes<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(bytes)
}

fn pod_codec<T: Pod + Send + Sync>() -> Arc<dyn Any + Send + Sync> {
    Arc::new(PodCodec::<T>::new())
}

/// Describes how an element type is represented in generated device code.
///
/// ## Example
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct Pair { key: u32, value: f32 }
/// impl SortElement for Pair {}
///
/// register_type(
///     TypeDescriptor::new::<Pair>("Pair", "struct Pair { key: u32, value: f32 }")
///         .with_natural_order("return a.key < b.key;"),
/// )?;
/// ```
///
/// The WGSL declaration must match the `#[repr(C)]` layout of the Rust type.

#[derive(Clone)]
pub struct TypeDescriptor {
    type_id: TypeId,
    rust_name: &'static str,
    name: String,
    wgsl_type: Option<String>,
    declaration: String,
    natural_less: Option<String>,
    size: usize,
    primitive: Option<PrimitiveKind>,
    codec: Arc<dyn Any + Send + Sync>,
}

impl TypeDescriptor {
    /// Describes a user type whose WGSL type is the struct `name`, declared by
    /// `declaration`.
    pub fn new<T: SortElement + Pod>(name: impl Into<String>, declaration: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            type_id: TypeId::of::<T>(),
            rust_name: type_name::<T>(),
            wgsl_type: Some(name.clone()),
            name,
            declaration: declaration.into(),
            natural_less: None,
            size: size_of::<T>(),
            primitive: T::PRIMITIVE,
            codec: pod_codec::<T>(),
        }
    }

    /// Sets the body of `natural_less(a, b) -> bool`, the order used by
    /// [`Less`] and [`Greater`] on the device.
    pub fn with_natural_order(mut self, body: impl Into<String>) -> Self {
        self.natural_less = Some(body.into());
        self
    }

    fn builtin<T: SortElement + Pod>(name: &str, wgsl_type: Option<&str>, natural_less: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            rust_name: type_name::<T>(),
            name: name.to_owned(),
            wgsl_type: wgsl_type.map(str::to_owned),
            declaration: String::new(),
            natural_less: natural_less.map(str::to_owned),
            size: size_of::<T>(),
            primitive: T::PRIMITIVE,
            codec: pod_codec::<T>(),
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &str { &self.name }

    /// WGSL type expression, `None` if the type has no device representation.
    pub fn wgsl_type(&self) -> Option<&str> { self.wgsl_type.as_deref() }

    /// WGSL declaration emitted ahead of generated kernels.
    pub fn declaration(&self) -> &str { &self.declaration }

    /// Body of `natural_less`, if any.
    pub fn natural_less(&self) -> Option<&str> { self.natural_less.as_deref() }

    /// `size_of` the Rust type.
    pub fn size(&self) -> usize { self.size }

    /// Returns `true` if this descriptor describes `T`.
    #[inline]
    pub fn matches_type<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    #[cfg_attr(not(feature = "gpu"), allow(dead_code))]
    pub(crate) fn codec<T: 'static>(&self) -> Option<&PodCodec<T>> {
        self.codec.downcast_ref::<PodCodec<T>>()
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("rust_name", &self.rust_name)
            .field("wgsl_type", &self.wgsl_type)
            .field("size", &self.size)
            .field("natural_less", &self.natural_less.is_some())
            .finish()
    }
}

/// Describes the device code of one comparator over one element type.
///
/// The body is the body of `cmp_less(a: T, b: T) -> bool` in WGSL, where `T`
/// is the element's WGSL type. It may call `natural_less` when the element
/// type declares one.

#[derive(Clone, Debug)]
pub struct ComparatorDescriptor {
    element: TypeId,
    element_name: &'static str,
    comparator: TypeId,
    comparator_name: &'static str,
    name: String,
    body: String,
}

impl ComparatorDescriptor {
    /// Describes comparator type `C` over element type `T`.
    pub fn new<T: SortElement, C: Comparator<T>>(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            element: TypeId::of::<T>(),
            element_name: type_name::<T>(),
            comparator: TypeId::of::<C>(),
            comparator_name: type_name::<C>(),
            name: name.into(),
            body: body.into(),
        }
    }

    /// Same as [`ComparatorDescriptor::new`], inferring `C` from a value.
    ///
    /// Closures have unnameable types; this is the only way to register one.
    pub fn for_comparator<T: SortElement, C: Comparator<T>>(
        _comparator: &C,
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new::<T, C>(name, body)
    }

    /// Canonical name.
    pub fn name(&self) -> &str { &self.name }

    /// WGSL body of `cmp_less`.
    pub fn body(&self) -> &str { &self.body }
}

/// A registered element type.
#[derive(Debug)]
pub(crate) struct TypeEntry {
    pub(crate) descriptor: TypeDescriptor,
    pub(crate) revision: u64,
}

/// A registered comparator.
#[derive(Debug)]
pub(crate) struct ComparatorEntry {
    pub(crate) name: String,
    pub(crate) body: String,
    pub(crate) revision: u64,
}

/// Everything code generation needs to emit `cmp_less` for one call.
#[derive(Debug, Clone)]
pub(crate) struct DeviceOrdering {
    pub(crate) element: Arc<TypeEntry>,
    pub(crate) less_body: String,
    pub(crate) label: String,
    pub(crate) comparator_revision: u64,
}

/// Global mapping from Rust types to device source fragments.
///
/// ## Invariants
/// - Every value in `type_names` is a key of `types`.
/// - Every comparator key's element `TypeId` is a key of `types`.

pub struct SortRegistry {
    types: HashMap<TypeId, Arc<TypeEntry>>,
    type_names: HashMap<String, TypeId>,
    comparators: HashMap<(TypeId, TypeId), Arc<ComparatorEntry>>,
    comparator_names: HashMap<(TypeId, String), TypeId>,
    next_revision: u64,
}

static REGISTRY: OnceLock<RwLock<SortRegistry>> = OnceLock::new();

fn sort_registry() -> &'static RwLock<SortRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(SortRegistry::with_builtins()))
}

const NATURAL_SCALAR: &str = "return a < b;";
const NATURAL_U64: &str = "return a.y < b.y || (a.y == b.y && a.x < b.x);";
const NATURAL_I64: &str = "let ah = bitcast<i32>(a.y);\n    let bh = bitcast<i32>(b.y);\n    \
                           return ah < bh || (ah == bh && a.x < b.x);";
const NATURAL_F64: &str = "let ka = select(vec2<u32>(a.x, a.y | 0x80000000u), ~a, (a.y & 0x80000000u) != 0u);\n    \
                           let kb = select(vec2<u32>(b.x, b.y | 0x80000000u), ~b, (b.y & 0x80000000u) != 0u);\n    \
                           return ka.y < kb.y || (ka.y == kb.y && ka.x < kb.x);";

impl SortRegistry {
    fn empty() -> Self {
        Self {
            types: HashMap::new(),
            type_names: HashMap::new(),
            comparators: HashMap::new(),
            comparator_names: HashMap::new(),
            next_revision: 1,
        }
    }

    fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins = [
            TypeDescriptor::builtin::<u8>("u8", None, None),
            TypeDescriptor::builtin::<u16>("u16", None, None),
            TypeDescriptor::builtin::<i8>("i8", None, None),
            TypeDescriptor::builtin::<i16>("i16", None, None),
            TypeDescriptor::builtin::<u32>("u32", Some("u32"), Some(NATURAL_SCALAR)),
            TypeDescriptor::builtin::<i32>("i32", Some("i32"), Some(NATURAL_SCALAR)),
            TypeDescriptor::builtin::<f32>("f32", Some("f32"), Some(NATURAL_SCALAR)),
            TypeDescriptor::builtin::<u64>("u64", Some("vec2<u32>"), Some(NATURAL_U64)),
            TypeDescriptor::builtin::<i64>("i64", Some("vec2<u32>"), Some(NATURAL_I64)),
            TypeDescriptor::builtin::<f64>("f64", Some("vec2<u32>"), Some(NATURAL_F64)),
        ];
        for descriptor in builtins {
            registry.insert_type(descriptor);
        }
        registry
    }

    fn alloc_revision(&mut self) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }

    fn insert_type(&mut self, descriptor: TypeDescriptor) {
        let revision = self.alloc_revision();
        self.type_names.insert(descriptor.name.clone(), descriptor.type_id);
        self.types.insert(descriptor.type_id, Arc::new(TypeEntry { descriptor, revision }));
    }

    /// Registers or replaces an element type.
    ///
    /// ## Errors
    /// - [`SortError::InvalidRegistration`] for a malformed name, a name already
    ///   used by another type, or an attempt to replace a built-in type.
    /// - [`SortError::InvalidLayout`] if the size is not a multiple of 4.

    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> SortResult<()> {
        validate_identifier(&descriptor.name)?;

        if descriptor.size == 0 || descriptor.size % 4 != 0 {
            return Err(SortError::InvalidLayout {
                type_name: descriptor.rust_name,
                size: descriptor.size,
                reason: "device elements must be a non-zero multiple of 4 bytes",
            });
        }
        if descriptor.primitive.is_some() {
            return Err(SortError::invalid_registration(
                &descriptor.name,
                "built-in numeric types are pre-registered",
            ));
        }
        if let Some(owner) = self.type_names.get(&descriptor.name) {
            if *owner != descriptor.type_id {
                return Err(SortError::invalid_registration(
                    &descriptor.name,
                    "name is already registered for another type",
                ));
            }
        }
        if !descriptor.declaration.is_empty() && !descriptor.declaration.contains(descriptor.name.as_str()) {
            return Err(SortError::invalid_registration(
                &descriptor.name,
                "declaration does not declare the named type",
            ));
        }

        if let Some(previous) = self.types.get(&descriptor.type_id) {
            let old_name = previous.descriptor.name.clone();
            if old_name != descriptor.name {
                self.type_names.remove(&old_name);
            }
        }

        debug!(name = %descriptor.name, rust = descriptor.rust_name, "registered sort element type");
        self.insert_type(descriptor);
        Ok(())
    }

    /// Registers or replaces a comparator.
    ///
    /// ## Errors
    /// - [`SortError::UnregisteredType`] if the element type is unknown.
    /// - [`SortError::UnsupportedComparator`] if the element type has no device
    ///   representation.
    /// - [`SortError::InvalidRegistration`] for a malformed name, an empty body,
    ///   a canonical comparator, or a name taken by another comparator.

    pub fn register_comparator(&mut self, descriptor: ComparatorDescriptor) -> SortResult<()> {
        validate_identifier(&descriptor.name)?;

        if descriptor.body.trim().is_empty() {
            return Err(SortError::invalid_registration(&descriptor.name, "comparator body is empty"));
        }
        if descriptor.comparator == TypeId::of::<Less>() || descriptor.comparator == TypeId::of::<Greater>() {
            return Err(SortError::invalid_registration(
                &descriptor.name,
                "canonical comparators use the element's natural order",
            ));
        }

        let element = self
            .types
            .get(&descriptor.element)
            .ok_or(SortError::UnregisteredType { type_name: descriptor.element_name })?;
        if element.descriptor.wgsl_type.is_none() {
            return Err(SortError::UnsupportedComparator {
                type_name: descriptor.element_name,
                comparator: descriptor.comparator_name,
            });
        }

        let name_key = (descriptor.element, descriptor.name.clone());
        if let Some(owner) = self.comparator_names.get(&name_key) {
            if *owner != descriptor.comparator {
                return Err(SortError::invalid_registration(
                    &descriptor.name,
                    "name is already registered for another comparator on this type",
                ));
            }
        }

        let key = (descriptor.element, descriptor.comparator);
        if let Some(previous) = self.comparators.get(&key) {
            let old = (descriptor.element, previous.name.clone());
            self.comparator_names.remove(&old);
        }

        let revision = self.alloc_revision();
        debug!(name = %descriptor.name, element = descriptor.element_name, revision, "registered comparator");
        self.comparator_names.insert(name_key, descriptor.comparator);
        self.comparators.insert(
            key,
            Arc::new(ComparatorEntry { name: descriptor.name, body: descriptor.body, revision }),
        );
        Ok(())
    }

    /// Returns the entry for a registered element type.
    pub(crate) fn type_entry(&self, type_id: TypeId) -> Option<Arc<TypeEntry>> {
        self.types.get(&type_id).cloned()
    }

    /// Returns the entry for a registered comparator.
    pub(crate) fn comparator_entry(&self, element: TypeId, comparator: TypeId) -> Option<Arc<ComparatorEntry>> {
        self.comparators.get(&(element, comparator)).cloned()
    }

    /// Resolves the device ordering for one (element, comparator) pair.
    ///
    /// ## Errors
    /// - [`SortError::UnregisteredType`] if the element type is unknown.
    /// - [`SortError::UnsupportedComparator`] if no device code exists for
    ///   this comparator over this element type.

    pub(crate) fn device_ordering(&self, element: &ElementInfo, comparator: &ComparatorInfo) -> SortResult<DeviceOrdering> {
        let entry = self
            .type_entry(element.type_id)
            .ok_or(SortError::UnregisteredType { type_name: element.name })?;
        let unsupported = || SortError::UnsupportedComparator {
            type_name: element.name,
            comparator: comparator.name,
        };

        if entry.descriptor.wgsl_type.is_none() {
            return Err(unsupported());
        }

        if let Some(registered) = self.comparator_entry(element.type_id, comparator.type_id) {
            return Ok(DeviceOrdering {
                label: format!("{}_{}", entry.descriptor.name, registered.name),
                less_body: registered.body.clone(),
                comparator_revision: registered.revision,
                element: entry,
            });
        }

        let direction = comparator.direction.ok_or_else(unsupported)?;
        if entry.descriptor.natural_less.is_none() {
            return Err(unsupported());
        }
        let (less_body, suffix) = match direction {
            Direction::Ascending => ("return natural_less(a, b);", "less"),
            Direction::Descending => ("return natural_less(b, a);", "greater"),
        };
        Ok(DeviceOrdering {
            label: format!("{}_{}", entry.descriptor.name, suffix),
            less_body: less_body.to_owned(),
            comparator_revision: 0,
            element: entry,
        })
    }
}

/// Module-scope identifiers declared by every generated bitonic program.
pub(crate) const GENERATED_IDENTIFIERS: &[&str] = &[
    "Params", "Elem", "params", "data", "idx", "out", "natural_less", "cmp_less", "ordered_before", "init",
    "bitonic_step", "gather",
];

/// WGSL keywords and predeclared type names.
const WGSL_KEYWORDS: &[&str] = &[
    "alias", "break", "case", "const", "const_assert", "continue", "continuing", "default", "diagnostic",
    "discard", "else", "enable", "false", "fn", "for", "if", "let", "loop", "override", "requires", "return",
    "struct", "switch", "true", "var", "while", "bool", "f16", "f32", "i32", "u32", "vec2", "vec3", "vec4",
    "mat2x2", "mat2x3", "mat2x4", "mat3x2", "mat3x3", "mat3x4", "mat4x2", "mat4x3", "mat4x4", "array",
    "atomic", "ptr", "sampler", "sampler_comparison",
];

/// Words WGSL reserves for future use.
const WGSL_RESERVED: &[&str] = &[
    "NULL", "Self", "abstract", "active", "alignas", "alignof", "as", "asm", "asm_fragment", "async",
    "attribute", "auto", "await", "become", "cast", "catch", "class", "co_await", "co_return", "co_yield",
    "coherent", "column_major", "common", "compile", "compile_fragment", "concept", "const_cast", "consteval",
    "constexpr", "constinit", "crate", "debugger", "decltype", "delete", "demote", "demote_to_helper", "do",
    "dynamic_cast", "enum", "explicit", "export", "extends", "extern", "external", "fallthrough", "filter",
    "final", "finally", "friend", "from", "fxgroup", "get", "goto", "groupshared", "highp", "impl",
    "implements", "import", "inline", "instanceof", "interface", "layout", "lowp", "macro", "macro_rules",
    "match", "mediump", "meta", "mod", "module", "move", "mut", "mutable", "namespace", "new", "nil",
    "noexcept", "noinline", "nointerpolation", "non_coherent", "noncoherent", "noperspective", "null",
    "nullptr", "of", "operator", "package", "packoffset", "partition", "pass", "patch", "pixelfragment",
    "precise", "precision", "premerge", "priv", "protected", "pub", "public", "readonly", "ref", "regardless",
    "register", "reinterpret_cast", "require", "resource", "restrict", "self", "set", "shared", "sizeof",
    "smooth", "snorm", "static", "static_assert", "static_cast", "std", "subroutine", "super", "target",
    "template", "this", "thread_local", "throw", "trait", "try", "type", "typedef", "typeid", "typename",
    "typeof", "union", "unless", "unorm", "unsafe", "unsized", "use", "using", "varying", "virtual",
    "volatile", "wgsl", "where", "with", "writeonly", "yield",
];

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`, rejecting the `__` prefix, WGSL keywords
/// and reserved words, and identifiers the generated programs declare.
fn validate_identifier(name: &str) -> SortResult<()> {
    let mut chars = name.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !head_ok || !tail_ok || name == "_" || name.starts_with("__") {
        return Err(SortError::invalid_registration(name, "not a valid WGSL identifier"));
    }
    if WGSL_KEYWORDS.contains(&name) || WGSL_RESERVED.contains(&name) {
        return Err(SortError::invalid_registration(name, "WGSL keyword or reserved word"));
    }
    if GENERATED_IDENTIFIERS.contains(&name) {
        return Err(SortError::invalid_registration(name, "name is declared by the generated sort program"));
    }
    Ok(())
}

/// Registers (or replaces) an element type for device code generation.
///
/// Required before a user type is sorted on a GPU backend.
///
/// ## Errors
/// See [`SortRegistry::register_type`].

pub fn register_type(descriptor: TypeDescriptor) -> SortResult<()> {
    let mut registry = sort_registry().write()?;
    registry.register_type(descriptor)
}

/// Registers (or replaces) a comparator for device code generation.
///
/// Replacing a comparator invalidates artifacts compiled from its previous
/// source.
///
/// ## Errors
/// See [`SortRegistry::register_comparator`].

pub fn register_comparator(descriptor: ComparatorDescriptor) -> SortResult<()> {
    let mut registry = sort_registry().write()?;
    registry.register_comparator(descriptor)
}

/// Returns `true` if element type `T` has a registered descriptor.
pub fn is_type_registered<T: 'static>() -> bool {
    sort_registry()
        .read()
        .map(|r| r.types.contains_key(&TypeId::of::<T>()))
        .unwrap_or(false)
}

/// Returns `true` if comparator `C` is registered for element type `T`.
pub fn is_comparator_registered<T: 'static, C: 'static>() -> bool {
    sort_registry()
        .read()
        .map(|r| r.comparators.contains_key(&(TypeId::of::<T>(), TypeId::of::<C>())))
        .unwrap_or(false)
}

/// Returns a copy of the descriptor registered for `T`.
pub fn type_descriptor_of<T: 'static>() -> Option<TypeDescriptor> {
    let registry = sort_registry().read().ok()?;
    registry.type_entry(TypeId::of::<T>()).map(|e| e.descriptor.clone())
}

/// Checks that `element` is registered.
#[cfg_attr(not(feature = "gpu"), allow(dead_code))]
pub(crate) fn require_type(element: &ElementInfo) -> SortResult<Arc<TypeEntry>> {
    let registry = sort_registry().read()?;
    registry
        .type_entry(element.type_id)
        .ok_or(SortError::UnregisteredType { type_name: element.name })
}

/// Resolves the device ordering through the global registry.
#[cfg_attr(not(feature = "gpu"), allow(dead_code))]
pub(crate) fn device_ordering(element: &ElementInfo, comparator: &ComparatorInfo) -> SortResult<DeviceOrdering> {
    let registry = sort_registry().read()?;
    registry.device_ordering(element, comparator)
}
