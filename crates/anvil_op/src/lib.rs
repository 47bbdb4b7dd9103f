//! Operation data model for the anvil build system.
//!
//! An [`Operation`] describes one unit of externally observable work — most
//! importantly spawning an external tool — together with its declared input
//! and output files. The scheduler constructs operations; the execution
//! cache annotates them with fingerprints, status, and timings.

#![warn(missing_docs)]

pub mod kind;
pub mod op;
pub mod status;

pub use kind::OpKind;
pub use op::Operation;
pub use status::OpStatus;
