//! # Project Runner
//!
//! > **A disposable integration harness for the accounting system.**
//!
//! One run brings up a PostgreSQL container, starts the application container
//! wired to it, hands the application's address to the user-journey test suite
//! and then removes both containers, whatever happened in between.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Strict sequencing
//! The application's configuration contains the database's runtime-assigned
//! address, so the two containers are provisioned one after the other, never
//! concurrently. The only step that may block for long is the readiness poll,
//! and it is bounded by a timeout and by the run's cancellation token.
//!
//! ### Guaranteed release
//! Every container name is reserved for teardown before the runtime is asked
//! to create it, so a create that times out still gets removed. Teardown runs on success, on failure and after Ctrl-C, in reverse
//! creation order, and its errors are reported next to the primary failure
//! rather than replacing it.
//!
//! ### Mocking: Testing without a Daemon
//! Provisioning and orchestration only talk to the
//! [`ContainerRuntime`](framework::ContainerRuntime) trait. The
//! [`framework::mock`] module provides a fake runtime with fluent expectations
//! and call counting, so every property of a run can be checked without Docker.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Seam ([`framework`])
//! - **Role**: The runtime contract, the call context and the generic readiness poll.
//! - **Key items**: [`ContainerRuntime`](framework::ContainerRuntime),
//!   [`RunContext`](framework::RunContext), [`wait_until_ready`](framework::wait_until_ready).
//!
//! ### 2. The Steps ([`provisioning`])
//! - **Role**: Bring up the database, then the application pointed at it.
//! - **Key items**: [`DependencyProvisioner`](provisioning::DependencyProvisioner),
//!   [`ConsumerProvisioner`](provisioning::ConsumerProvisioner).
//!
//! ### 3. The Orchestrator ([`lifecycle`])
//! - **Role**: The run's state machine, teardown and logging setup.
//! - **Key items**: [`Orchestrator`](lifecycle::Orchestrator),
//!   [`TeardownStack`](lifecycle::TeardownStack), [`RunOutcome`](lifecycle::RunOutcome).
//!
//! ### 4. The Handoff ([`runner`])
//! - **Role**: Run the external test suite with the application's endpoint.
//!
//! ### 5. Supporting modules
//! [`model`] holds container specs and the `POSTGRES_*` environment contract,
//! [`config`] the JSON configuration, and [`clients`] the Docker implementation
//! of the runtime contract.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! RUST_LOG=info cargo run -- -- cargo run -p user_journey_testing
//! ```

pub mod clients;
pub mod config;
pub mod framework;
pub mod lifecycle;
pub mod model;
pub mod provisioning;
pub mod runner;
