//! Plain data passed between the provisioners, the runtime client and the orchestrator.

pub mod container;
pub mod environment;

pub use container::*;
pub use environment::*;
