//! Runtime configuration stored under `.toolrun/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::plan::{
    DEFAULT_BEGIN_MARKER, DEFAULT_END_MARKER, DEFAULT_REQUIRED_KEYS, PlanExtractor, PlanShape,
};
use crate::core::scope::DenyRule;

/// Default config location, relative to the repository root.
pub const DEFAULT_CONFIG_PATH: &str = ".toolrun/config.toml";

/// Runtime configuration (TOML).
///
/// Missing fields default to the values the runtime shipped with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Sandbox directory; relative paths resolve against the repository root.
    pub sandbox_dir: PathBuf,

    /// Target file name used when a job does not name one.
    pub default_filename: String,

    /// Default `script` timeout in seconds.
    pub script_timeout_secs: u64,

    /// Keep only the last this-many characters of each captured stream.
    pub output_tail_chars: usize,

    /// How long `serve` waits for a first boot line before returning.
    pub boot_grace_ms: u64,

    /// Port used by `serve` when the request names none.
    pub default_port: u16,

    /// Command for `script` jobs. `{file}` is replaced by the target path.
    pub script_command: Vec<String>,

    /// Command for `serve` jobs. `{file}` and `{port}` are replaced.
    pub serve_command: Vec<String>,

    /// Environment variables copied into child processes; everything else is dropped.
    pub env_passthrough: Vec<String>,

    pub bundle: BundleConfig,

    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BundleConfig {
    /// Directories whose contents are never bundled (relative to the root).
    pub legacy_dirs: Vec<String>,
    /// File name prefixes that are never bundled.
    pub forbidden_prefixes: Vec<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            legacy_dirs: vec!["blocks/components/legacy".to_string()],
            forbidden_prefixes: vec!["fs_".to_string()],
        }
    }
}

impl BundleConfig {
    pub fn deny_rule(&self) -> DenyRule {
        DenyRule::new(self.legacy_dirs.clone(), self.forbidden_prefixes.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanConfig {
    /// Top-level keys an object must carry to count as a plan.
    pub required_keys: Vec<String>,
    pub begin_marker: String,
    pub end_marker: String,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            required_keys: DEFAULT_REQUIRED_KEYS.iter().map(|k| k.to_string()).collect(),
            begin_marker: DEFAULT_BEGIN_MARKER.to_string(),
            end_marker: DEFAULT_END_MARKER.to_string(),
        }
    }
}

impl PlanConfig {
    pub fn extractor(&self) -> Result<PlanExtractor> {
        PlanExtractor::new(
            PlanShape::new(self.required_keys.clone()),
            &self.begin_marker,
            &self.end_marker,
        )
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: PathBuf::from("runner/sandbox"),
            default_filename: "app_gen.py".to_string(),
            script_timeout_secs: 60,
            output_tail_chars: 15_000,
            boot_grace_ms: 1_500,
            default_port: 8501,
            script_command: vec!["python3".to_string(), "{file}".to_string()],
            serve_command: vec![
                "streamlit".to_string(),
                "run".to_string(),
                "{file}".to_string(),
                "--server.headless=true".to_string(),
                "--server.port={port}".to_string(),
            ],
            env_passthrough: ["PATH", "HOME", "LANG", "SYSTEMROOT"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            bundle: BundleConfig::default(),
            plan: PlanConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.script_timeout_secs == 0 {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        if self.output_tail_chars == 0 {
            return Err(anyhow!("output_tail_chars must be > 0"));
        }
        if self.default_filename.trim().is_empty() {
            return Err(anyhow!("default_filename must be non-empty"));
        }
        if self.script_command.is_empty() || self.script_command[0].trim().is_empty() {
            return Err(anyhow!("script_command must be a non-empty array"));
        }
        if self.serve_command.is_empty() || self.serve_command[0].trim().is_empty() {
            return Err(anyhow!("serve_command must be a non-empty array"));
        }
        if self.plan.required_keys.is_empty() {
            return Err(anyhow!("plan.required_keys must be a non-empty array"));
        }
        if self.plan.begin_marker.trim().is_empty() || self.plan.end_marker.trim().is_empty() {
            return Err(anyhow!("plan markers must be non-empty"));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn boot_grace(&self) -> Duration {
        Duration::from_millis(self.boot_grace_ms)
    }

    /// Resolve the sandbox directory against `root`.
    pub fn sandbox_path(&self, root: &Path) -> PathBuf {
        if self.sandbox_dir.is_absolute() {
            self.sandbox_dir.clone()
        } else {
            root.join(&self.sandbox_dir)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RuntimeConfig::default()`.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        let cfg = RuntimeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RuntimeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RuntimeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
