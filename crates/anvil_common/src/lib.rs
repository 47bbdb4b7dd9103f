//! Shared foundational types used across the anvil build system.
//!
//! This crate provides the content digest (`Stamp`) that the execution cache
//! keys everything on, together with its incremental hasher and hex codec.

#![warn(missing_docs)]

pub mod stamp;

pub use stamp::{InvalidStampError, Stamp, StampHasher};
