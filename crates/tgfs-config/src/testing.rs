//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated state directory (chat binding, control pointer)
//! - An isolated staging directory for read/write temporaries
//! - A `Config` wired to both
//!
//! # Usage
//!
//! ```ignore
//! use tgfs_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let paths = env.state_paths();
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, StatePaths};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// State directory for this test
    pub state_dir: PathBuf,
    /// Staging directory for this test
    pub staging_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let state_dir = root.join(format!("state-{}", test_id));
        let staging_dir = root.join("staging");

        std::fs::create_dir_all(&state_dir)?;
        std::fs::create_dir_all(&staging_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            state_dir,
            staging_dir,
            test_id,
        })
    }

    pub fn state_paths(&self) -> StatePaths {
        StatePaths::new(&self.state_dir)
    }

    /// Config pointing at this environment's directories
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.state.dir = self.state_dir.clone();
        cfg.vfs.staging_dir = Some(self.staging_dir.clone());
        cfg.telegram.token = format!("test-token-{}", self.test_id);
        cfg
    }

    /// Pre-seed the persisted chat binding
    pub fn write_chat_binding(&self, chat_id: i64) -> anyhow::Result<()> {
        std::fs::write(self.state_paths().chat_binding, chat_id.to_string())?;
        Ok(())
    }

    /// Number of files currently in the staging directory
    pub fn staging_file_count(&self) -> usize {
        std::fs::read_dir(&self.staging_dir)
            .map(|entries| entries.flatten().count())
            .unwrap_or(0)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
