//! Core deterministic primitives.
//!
//! Everything here is a pure function of its inputs so that the authority and
//! every participant derive byte-identical results.

pub mod hash;

// Re-export core types
pub use hash::{StateHash, StateHasher, hash_bytes, hash_to_hex};
