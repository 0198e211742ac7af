//! Typed/dynamic state bridge
//!
//! Converts dynamically-typed ClusterCSIDriver objects into the typed API
//! and extracts the spec and status fields owned by a field manager.

pub mod extract;
pub mod fields;

pub use extract::*;
pub use fields::{extract_owned, merge_sets};
