//! Common utilities for Veles.
//!
//! This crate provides the foundational pieces shared by every Veles crate:
//!
//! - [`BinaryReader`] - Bounds-checked little-endian reading from byte slices
//! - [`flatbuffer`] - Vtable-based table reader (and encoder) for the
//!   FlatBuffer schemas used by the archive descriptor, packs and models
//! - [`fnv`] - FNV-1a 64-bit hashing, the archive's only addressing key
//! - [`path`] - Archive path normalization

mod error;
mod reader;

pub mod flatbuffer;
pub mod fnv;
pub mod path;

pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
