//! Run sequencing, teardown and logging setup.

pub mod orchestrator;
pub mod teardown;
pub mod tracing;

pub use orchestrator::*;
pub use teardown::*;
pub use self::tracing::setup_tracing;
