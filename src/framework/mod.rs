//! Runtime-agnostic building blocks for provisioning containers.
//!
//! # Main Components
//!
//! - [`ContainerRuntime`] - Trait every runtime client implements
//! - [`RunContext`] - Cancellation and timeout carried into every call
//! - [`RuntimeError`] - Failures talking to the runtime
//! - [`wait_until_ready`] - Bounded, cancellable readiness polling
//!
//! # Testing
//!
//! See [`mock`] module for a fake runtime and a scripted test runner.

pub mod core;
pub mod mock;
pub mod wait;

// Re-export core types for convenience
pub use self::core::*;
pub use self::wait::*;
