//! Execution cache for the anvil build system.
//!
//! This crate memoizes the outputs of external process invocations. An
//! operation's inputs (executable, arguments, environment, read files) are
//! fingerprinted into a [`Stamp`](anvil_common::Stamp); each declared output
//! is stored in a flat content-addressed directory and materialized back
//! into the workspace by hardlink, falling back to copying when the store
//! and workspace live on different filesystems. Garbage collection evicts
//! entries no workspace file links to.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod executor;
pub mod gc;
pub mod notify;
pub mod stamper;
pub mod store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use executor::CacheExecutor;
pub use gc::CacheStats;
pub use notify::{Event, MemoryNotify, Notify, NullNotify};
pub use stamper::FileStampTable;
pub use store::CacheStore;
