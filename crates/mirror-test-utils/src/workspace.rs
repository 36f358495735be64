//! [`TestWorkspace`]: a temp tree with every path a run needs.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::FakeTool;

/// Group name written into generated configs.
pub const TEST_GROUP: &str = "Test Mirrors";

/// A temporary directory laid out like a small installation:
///
/// ```text
/// <root>/locks/           lock directory
/// <root>/state/log_state  rotation state prefix
/// <root>/log/summary      summary log prefix
/// <root>/src/<mirror>/    per-mirror sources
/// <root>/dst/<mirror>/    per-mirror targets
/// <root>/tools/           fake tool scripts
/// ```
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("tools")).unwrap();
        Self { temp_dir }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn tools(&self) -> PathBuf {
        self.root().join("tools")
    }

    pub fn locks(&self) -> PathBuf {
        self.root().join("locks")
    }

    pub fn log_state(&self) -> PathBuf {
        self.root().join("state/log_state")
    }

    pub fn summary_file(&self) -> PathBuf {
        self.root().join("log/summary")
    }

    pub fn source(&self, mirror: &str) -> PathBuf {
        self.root().join("src").join(mirror)
    }

    pub fn target(&self, mirror: &str) -> PathBuf {
        self.root().join("dst").join(mirror)
    }

    /// Write `mirror.toml` running `tool` for each of `mirrors`, with at
    /// most `max_workers` at once. Returns the config path.
    pub fn write_config(&self, tool: &FakeTool, mirrors: &[&str], max_workers: usize) -> PathBuf {
        let mut content = format!(
            "[defaults]\nrsync = {:?}\nrsync_options = {:?}\nmax_workers = {}\nlock_directory = {:?}\nlog_state = {:?}\nsummary_file = {:?}\n\n",
            tool.program().to_string_lossy(),
            tool.options(),
            max_workers,
            self.locks().to_string_lossy(),
            self.log_state().to_string_lossy(),
            self.summary_file().to_string_lossy(),
        );
        content.push_str(&format!(
            "[summary]\ngroup = {:?}\nrecipients = [\"root\"]\nsendmail = \"/bin/true\"\n\n",
            TEST_GROUP
        ));
        content.push_str(&format!("[mirrors]\nenabled = {:?}\n\n", mirrors));
        for mirror in mirrors {
            fs::create_dir_all(self.source(mirror)).unwrap();
            content.push_str(&format!(
                "[mirror.{}]\nsource = {:?}\ntarget = {:?}\n\n",
                mirror,
                self.source(mirror).to_string_lossy(),
                self.target(mirror).to_string_lossy(),
            ));
        }

        let path = self.root().join("mirror.toml");
        fs::write(&path, content).unwrap();
        path
    }
}
