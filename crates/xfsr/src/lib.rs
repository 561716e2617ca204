#![forbid(unsafe_code)]
//! xfsr public API facade.
//!
//! Re-exports the mounted-volume interface from `xfsr-core`. This is the
//! crate downstream consumers (the CLI, boot loaders, tools) depend on.

pub use xfsr_core::*;
