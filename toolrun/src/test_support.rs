//! Test-only helpers: a throwaway repository root and a shell-based config.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::io::config::RuntimeConfig;
use crate::session::Session;
use crate::tools::ToolDispatcher;

/// Config whose `script` and `serve` commands run `sh` instead of Python.
pub fn shell_config() -> RuntimeConfig {
    RuntimeConfig {
        script_command: vec!["sh".to_string(), "{file}".to_string()],
        serve_command: vec!["sh".to_string(), "{file}".to_string()],
        script_timeout_secs: 10,
        boot_grace_ms: 2_000,
        ..RuntimeConfig::default()
    }
}

/// Temporary repository root, removed on drop.
pub struct TestRoot {
    dir: TempDir,
    config: RuntimeConfig,
}

impl TestRoot {
    pub fn new() -> Result<Self> {
        Self::with_config(shell_config())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp root")?;
        Ok(Self { dir, config })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn dispatcher(&self) -> Result<ToolDispatcher> {
        ToolDispatcher::from_config(self.dir.path(), &self.config)
    }

    pub fn session(&self) -> Result<Session> {
        Ok(Session::new(self.config.plan.extractor()?))
    }
}
