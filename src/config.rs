//! Command line and environment configuration.
//!
//! Every option has an environment fallback so the exporter drops into a
//! container without a wrapper script. The server password is the only value
//! with no default; startup refuses to proceed without it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Prometheus exporter for kopia backup repositories.
#[derive(Debug, Parser)]
#[command(name = "kopia-exporter", about = "Prometheus exporter for kopia backups", version)]
pub struct Args {
    /// Listen address for the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:9091", env = "KOPIA_EXPORTER_LISTEN")]
    pub listen: String,

    /// URL of the kopia repository server.
    #[arg(long, default_value = "http://kopia-server:51515", env = "KOPIA_SERVER_URL")]
    pub server_url: String,

    /// Password for the repository server. Required.
    #[arg(long, env = "KOPIA_PASSWORD")]
    pub password: Option<String>,

    /// Directory holding the kopia config file.
    #[arg(long, default_value = "/app/config", env = "KOPIA_CONFIG_PATH")]
    pub config_dir: PathBuf,

    /// Directory for the kopia metadata cache.
    #[arg(long, default_value = "/app/cache", env = "KOPIA_CACHE_DIRECTORY")]
    pub cache_dir: PathBuf,

    /// Mount path of the repository, used for free-space measurement.
    #[arg(long, default_value = "/repository", env = "KOPIA_REPO_PATH")]
    pub repo_path: PathBuf,

    /// Collection interval in seconds.
    #[arg(long, default_value = "60", env = "KOPIA_EXPORTER_INTERVAL")]
    pub interval: u64,

    /// Name or path of the kopia binary.
    #[arg(long, default_value = "kopia")]
    pub kopia_bin: String,

    /// Deadline for a single kopia invocation, in seconds.
    #[arg(long, default_value = "30", env = "KOPIA_EXPORTER_COMMAND_TIMEOUT")]
    pub command_timeout: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode, only show errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn command_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    /// Path of the repository config file inside the config directory.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("repository.config")
    }

    /// Rejects values the poll loop cannot run with. Checked once at
    /// startup; a zero interval would otherwise panic deep inside the timer.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval == 0 {
            return Err("collection interval must be at least 1 second".to_string());
        }
        if self.command_timeout == 0 {
            return Err("command timeout must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("kopia_exporter={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
