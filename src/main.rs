//! # project-runner
//!
//! Brings up the accounting-system stack in disposable containers, runs the
//! user-journey tests against it and always cleans up.
//!
//! ```bash
//! project-runner --pull -- cargo run -p user_journey_testing
//! RUST_LOG=debug project-runner --config harness.json --fixed-names
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use project_runner::clients::DockerClient;
use project_runner::config::{HarnessConfig, NamingStrategy};
use project_runner::framework::RunContext;
use project_runner::lifecycle::{setup_tracing, Orchestrator};
use project_runner::runner::CommandTestRunner;

/// Exit status for failures before the run starts.
const SETUP_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "project-runner")]
#[command(about = "Provision a database and the accounting system, then run the user-journey tests", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, env = "PROJECT_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Database image
    #[arg(long)]
    dependency_image: Option<String>,

    /// Application image
    #[arg(long)]
    consumer_image: Option<String>,

    /// Seconds to wait for the database to become ready
    #[arg(long, value_name = "SECS")]
    readiness_timeout: Option<u64>,

    /// Seconds the test suite may run
    #[arg(long, value_name = "SECS")]
    test_timeout: Option<u64>,

    /// Use the configured container names without a per-run suffix
    #[arg(long)]
    fixed_names: bool,

    /// Pull both images before creating containers
    #[arg(long)]
    pull: bool,

    /// Publish the application port on this host port
    #[arg(long, value_name = "PORT")]
    publish_port: Option<u16>,

    /// Test command, e.g. `-- cargo run -p user_journey_testing`
    #[arg(last = true)]
    test_command: Vec<String>,
}

impl Cli {
    fn apply(self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(image) = self.dependency_image {
            config.dependency.image = image;
        }
        if let Some(image) = self.consumer_image {
            config.consumer.image = image;
        }
        if let Some(secs) = self.readiness_timeout {
            config.dependency.readiness = config.dependency.readiness.with_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.test_timeout {
            config.tests.timeout_secs = secs;
        }
        if self.fixed_names {
            config.naming = NamingStrategy::Fixed;
        }
        if self.pull {
            config.pull_images = true;
        }
        if self.publish_port.is_some() {
            config.consumer.publish_port = self.publish_port;
        }
        if let Some((program, args)) = self.test_command.split_first() {
            config.tests.program = program.clone();
            config.tests.args = args.to_vec();
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_tracing();
    let cli = Cli::parse();

    let config = match HarnessConfig::load(cli.config.as_deref())
        .map(|config| cli.apply(config))
        .and_then(|config| config.validate().map(|_| config))
    {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(SETUP_FAILURE);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });
    let ctx = RunContext::new(cancel, config.call_timeout());

    let runtime = match DockerClient::connect(&ctx).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Cannot reach the container runtime");
            return ExitCode::from(SETUP_FAILURE);
        }
    };

    let tests = CommandTestRunner::new(config.tests.to_step());
    let mut orchestrator = Orchestrator::new(runtime, tests, config);
    let outcome = orchestrator.run(&ctx).await;

    info!(
        exit_status = outcome.exit_status(),
        released = outcome.teardown.released.len(),
        teardown_failures = outcome.teardown.failures.len(),
        "Run complete"
    );
    outcome.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "project-runner",
            "--consumer-image",
            "accounting-system:dev",
            "--readiness-timeout",
            "7",
            "--fixed-names",
            "--publish-port",
            "18090",
            "--",
            "./journeys.sh",
            "--fast",
        ]);
        let config = cli.apply(HarnessConfig::default());

        assert_eq!(config.consumer.image, "accounting-system:dev");
        assert_eq!(config.dependency.image, "postgres:16.0-alpine3.18");
        assert_eq!(config.dependency.readiness.timeout, Duration::from_secs(7));
        assert_eq!(config.naming, NamingStrategy::Fixed);
        assert_eq!(config.consumer.publish_port, Some(18090));
        assert_eq!(config.tests.program, "./journeys.sh");
        assert_eq!(config.tests.args, vec!["--fast".to_string()]);
    }

    #[test]
    fn zero_test_timeout_flag_fails_validation() {
        let cli = Cli::parse_from(["project-runner", "--test-timeout", "0"]);
        let config = cli.apply(HarnessConfig::default());
        assert_eq!(config.tests.timeout_secs, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn no_flags_keep_config() {
        let cli = Cli::parse_from(["project-runner"]);
        assert_eq!(cli.apply(HarnessConfig::default()), HarnessConfig::default());
    }
}
