//! In-memory resource authority for the Stratus control plane
//!
//! This crate provides an in-memory implementation of the
//! `ResourceAuthority` interface defined in the stratus-core crate. It is
//! primarily useful for development, testing, and single-node setups where
//! persistence is not required.

pub mod authority;
pub use authority::InMemoryResourceAuthority;
