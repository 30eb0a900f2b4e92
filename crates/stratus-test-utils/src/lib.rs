//! Testing utilities for the Stratus control plane.
//!
//! This crate provides mocks of the consumed interfaces, a scripted transport
//! that plays the part of cells and image servers, seeded fixtures and a
//! harness that wires them to a live orchestrator.

pub mod fixtures;
pub mod harness;
pub mod mocks;
pub mod transport;

/// Re-export commonly used types for convenience
pub use mockall;

pub use harness::TestHarness;
pub use mocks::MockResourceAuthority;
pub use transport::{Reply, ScriptedTransport};
