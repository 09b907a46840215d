//! Collection engine: one fetch+decode pipeline per polled fact.
//!
//! A cycle polls three facts (snapshot list, repository status, free space)
//! and each one succeeds or fails on its own. The outcome of a cycle is
//! three independent `Result`s; the reconciler decides what a failure means
//! for the published state (it leaves the previous values in place).

use std::path::PathBuf;
use std::time::Duration;

use crate::command::{CommandError, CommandRunner};
use crate::decode::{
    DecodeError, RepositoryStatus, SnapshotRecord, decode_repository_status, decode_snapshots,
};
use crate::freespace::{SpaceProbe, StatError};

/// Default per-invocation deadline for the kopia CLI.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Unified error for one polled fact.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// The external command could not be started or exceeded its deadline.
    Invocation(CommandError),
    /// The command ran but reported failure.
    NonZeroExit(CommandError),
    /// The output was not valid structured data.
    Decode(DecodeError),
    /// The free-space query failed.
    FsStat(StatError),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Invocation(e) => write!(f, "{}", e),
            CollectError::NonZeroExit(e) => write!(f, "{}", e),
            CollectError::Decode(e) => write!(f, "{}", e),
            CollectError::FsStat(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<CommandError> for CollectError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Exit { .. } => CollectError::NonZeroExit(e),
            _ => CollectError::Invocation(e),
        }
    }
}

impl From<DecodeError> for CollectError {
    fn from(e: DecodeError) -> Self {
        CollectError::Decode(e)
    }
}

impl From<StatError> for CollectError {
    fn from(e: StatError) -> Self {
        CollectError::FsStat(e)
    }
}

/// The result of one reconciliation cycle's polling phase.
///
/// All three facts are always attempted; a failure in one never short-circuits
/// the others.
#[derive(Debug)]
pub struct CycleOutcome {
    pub snapshots: Result<Vec<SnapshotRecord>, CollectError>,
    pub repository: Result<RepositoryStatus, CollectError>,
    pub free_space: Result<u64, CollectError>,
}

/// Polls the kopia CLI and the repository mount.
///
/// Generic over the command runner and the space probe so tests can script
/// both, the same way the real/mock split works for the command adapter.
pub struct Collector<R: CommandRunner, S: SpaceProbe> {
    runner: R,
    probe: S,
    kopia_bin: String,
    /// Explicit kopia config file, appended to every invocation when set.
    config_file: Option<PathBuf>,
    repo_path: PathBuf,
    command_timeout: Duration,
}

impl<R: CommandRunner, S: SpaceProbe> Collector<R, S> {
    pub fn new(runner: R, probe: S, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            probe,
            kopia_bin: "kopia".to_string(),
            config_file: None,
            repo_path: repo_path.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Overrides the kopia binary name (for PATH-less deployments).
    pub fn with_kopia_bin(mut self, bin: impl Into<String>) -> Self {
        self.kopia_bin = bin.into();
        self
    }

    /// Points every invocation at an explicit repository config file.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn run_kopia(&self, args: &[&str]) -> Result<Vec<u8>, CollectError> {
        let config_arg;
        let mut full: Vec<&str> = args.to_vec();
        if let Some(ref path) = self.config_file {
            config_arg = format!("--config-file={}", path.display());
            full.push(&config_arg);
        }
        Ok(self
            .runner
            .run(&self.kopia_bin, &full, self.command_timeout)?)
    }

    /// Polls `kopia snapshot list --json --no-progress`.
    pub fn collect_snapshots(&self) -> Result<Vec<SnapshotRecord>, CollectError> {
        let raw = self.run_kopia(&["snapshot", "list", "--json", "--no-progress"])?;
        Ok(decode_snapshots(&raw)?)
    }

    /// Polls `kopia repository status --json`.
    pub fn collect_repository(&self) -> Result<RepositoryStatus, CollectError> {
        let raw = self.run_kopia(&["repository", "status", "--json"])?;
        Ok(decode_repository_status(&raw)?)
    }

    /// Stats the repository mount for available bytes.
    pub fn collect_free_space(&self) -> Result<u64, CollectError> {
        Ok(self.probe.available_bytes(&self.repo_path)?)
    }

    /// Polls all three facts. Never fails as a whole; each fact carries its
    /// own result.
    pub fn collect_cycle(&self) -> CycleOutcome {
        CycleOutcome {
            snapshots: self.collect_snapshots(),
            repository: self.collect_repository(),
            free_space: self.collect_free_space(),
        }
    }

    /// One-shot `repository connect server` handshake, run once at startup.
    ///
    /// Uses a longer deadline than the per-cycle polls: the first connect may
    /// have to populate the cache directory.
    pub fn connect_server(
        &self,
        server_url: &str,
        password: &str,
        cache_dir: &std::path::Path,
    ) -> Result<(), CollectError> {
        let cache_arg = format!("--cache-directory={}", cache_dir.display());
        let config_arg = self
            .config_file
            .as_ref()
            .map(|p| format!("--config-file={}", p.display()));

        let mut args = vec![
            "repository",
            "connect",
            "server",
            "--url",
            server_url,
            "--password",
            password,
            "--no-check-for-updates",
            "--persist-credentials",
            &cache_arg,
        ];
        if let Some(ref arg) = config_arg {
            args.push(arg);
        }

        self.runner
            .run(&self.kopia_bin, &args, self.command_timeout.saturating_mul(4))?;
        Ok(())
    }
}
