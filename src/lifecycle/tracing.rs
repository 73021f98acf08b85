//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter. The
//! filter comes from `RUST_LOG` and defaults to `info`.
//!
//! ## What Gets Traced
//!
//! - **State transitions** of the run (`from`, `to`)
//! - **Runtime calls**: create/start/stop/remove with the `container` id
//! - **Readiness polling**: one debug line per attempt, warnings on retried inspects
//! - **Teardown**: every released container, and each failed step with its `op`
//!
//! ## Usage Examples
//!
//! ```bash
//! # Normal run
//! project-runner
//!
//! # Watch the readiness poll
//! RUST_LOG=debug project-runner
//!
//! # Only the orchestrator
//! RUST_LOG=project_runner::lifecycle=debug project-runner
//! ```
//!
//! A failed run ends with lines like:
//!
//! ```text
//! ERROR run: Run failed stage=consumer provisioning error=failed to create container accounting_system-1a2b3c4d: ...
//! INFO run:release: Releasing container container="9f1c..." name="my-postgres-test-1a2b3c4d"
//! ```

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. Call once, from the binary.
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
