//! # Engine Module
//!
//! Backend-independent core of the sort engine.
//!
//! This module contains:
//! - Element and comparator traits
//! - The type/comparator registry used for device code generation
//! - Memory domains and sort targets
//! - Strategy selection and the backend interface
//! - CPU backends and execution contexts
//! - The sort façade
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod element;
pub mod comparator;
pub mod registry;
pub mod config;
pub mod sequence;
pub mod radix;
pub mod dispatch;
pub mod cpu;
pub mod context;
pub mod sort;
