//! Free-space measurement for the repository's backing storage.
//!
//! kopia has no CLI command for this; the measurement comes straight from
//! statvfs on the repository mount path. Behind a trait so tests can run
//! without a real mount.

use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;

/// Error type for free-space queries.
#[derive(Debug, Clone, PartialEq)]
pub struct StatError {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for StatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "statvfs failed for {}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for StatError {}

/// Answers "how many bytes are still free at this path?".
pub trait SpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, StatError>;
}

/// Production probe backed by statvfs(3).
#[derive(Debug, Clone, Default)]
pub struct RealSpaceProbe;

impl RealSpaceProbe {
    pub fn new() -> Self {
        Self
    }
}

impl SpaceProbe for RealSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, StatError> {
        let stat = statvfs(path).map_err(|e| StatError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(available_from(
            stat.blocks_available() as u64,
            stat.fragment_size() as u64,
        ))
    }
}

/// Available bytes = free blocks × block size.
fn available_from(blocks: u64, block_size: u64) -> u64 {
    blocks.saturating_mul(block_size)
}

/// Fixed-answer probe for tests.
#[derive(Debug, Clone)]
pub struct MockSpaceProbe {
    pub blocks: u64,
    pub block_size: u64,
}

impl SpaceProbe for MockSpaceProbe {
    fn available_bytes(&self, _path: &Path) -> Result<u64, StatError> {
        Ok(available_from(self.blocks, self.block_size))
    }
}

/// Probe that always fails, for partial-failure tests.
#[derive(Debug, Clone, Default)]
pub struct FailingSpaceProbe;

impl SpaceProbe for FailingSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64, StatError> {
        Err(StatError {
            path: path.to_path_buf(),
            message: "mock failure".to_string(),
        })
    }
}
