//! # Deferred Util
//!
//! Runtime bridging helpers shared by the deferred helper crates.

pub mod async_runtime;

pub use async_runtime::drive_detached;
