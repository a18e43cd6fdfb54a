//! # GPU Sort Backend
//!
//! This module implements the **GPU backend** of the sort engine on top of
//! `wgpu` compute shaders.
//!
//! The backend is an **optional, feature-gated extension** (`feature = "gpu"`).
//! Without it, [`BackendHint::Gpu`](crate::BackendHint::Gpu) always fails with
//! [`SortError::BackendUnavailable`](crate::SortError::BackendUnavailable) and
//! the default context runs on the CPU.
//!
//! ---
//!
//! ## High-level execution model
//!
//! A sort call on a GPU context proceeds in **three explicit stages**:
//!
//! 1. **Resolution**
//!    * The element type and comparator are looked up in the registry.
//!    * WGSL is generated for the pair and compiled into pipelines, or the
//!      cached pipelines are reused.
//!    * Length limits of the device are checked.
//!
//! 2. **Dispatch**
//!    * Host data is uploaded; device vectors are bound in place.
//!    * Every pass of the chosen network is recorded into one command buffer
//!      and submitted.
//!
//! 3. **Synchronization**
//!    * The caller blocks on `wgpu::Device::poll` until the queue is idle.
//!    * Host results are read back and written to the caller's slice.
//!
//! ---
//!
//! ## Module structure
//!
//! * `context`: device and queue acquisition, blocking transfer helpers
//! * `buffer`: [`DeviceVector`], the device memory domain
//! * `kernels`: WGSL templates and source generation
//! * `pipeline`: compilation and the process-wide artifact cache
//! * `dispatch`: [`GpuBackend`], strategy execution
//!
//! ---
//!
//! ## Correctness
//!
//! * Validation errors raised while recording are surfaced, never ignored.
//! * A lost device is reported as `BackendUnavailable` and disables the
//!   context that observed it.
//! * A failed call leaves the caller's data unchanged.

#![cfg(feature = "gpu")]

mod buffer;
mod context;
mod dispatch;
mod kernels;
mod pipeline;

pub use buffer::DeviceVector;
pub use context::GpuDevice;
pub use dispatch::{GpuArtifacts, GpuBackend};
pub use pipeline::cached_artifact_count;
