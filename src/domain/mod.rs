//! Domain layer - Port definitions
//!
//! This module defines the traits (ports) that adapters implement and that
//! the manifest hooks are written against.

pub mod ports;

pub use ports::*;
