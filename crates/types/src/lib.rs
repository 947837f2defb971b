//! # Deferred Types
//!
//! Value model shared by the deferred helper engine and its hosts.
//!
//! - [`Value`]: dynamically typed helper argument or result
//! - [`Array`] / [`Object`]: shared, identity-bearing containers
//! - [`Opaque`]: host values carried through resolution untouched

mod value;

pub use value::{Array, CIRCULAR_PLACEHOLDER, OPAQUE_PLACEHOLDER, Object, Opaque, Value, ValueError};
