//! Tool-execution runtime for a conversational mini-app builder.
//!
//! Exposes the component bundler, the sandbox executor and the plan
//! extractor on the command line so the agent runtime (or an operator) can
//! drive them from a shell.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use toolrun::core::plan::Extraction;
use toolrun::exit_codes;
use toolrun::io::bundler::{BundleError, bundle};
use toolrun::io::config::{DEFAULT_CONFIG_PATH, RuntimeConfig, load_config, write_config};
use toolrun::io::instructions::load_instructions;
use toolrun::io::path_guard::PathGuard;
use toolrun::io::sandbox::{ExecRequest, SandboxExecutor};
use toolrun::logging;
use toolrun::session::Session;
use toolrun::tools::{TOOL_SPECS, ToolDispatcher};

const DEFAULT_PROMPT_PATH: &str = "prompts/mega_prompt.md";

#[derive(Parser)]
#[command(
    name = "toolrun",
    version,
    about = "Scoped bundling, sandboxed execution and plan extraction for agent tools"
)]
struct Cli {
    /// Repository root that component paths and the sandbox resolve against.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `.toolrun/config.toml` under the root).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Concatenate component files into one delimited bundle.
    Bundle {
        /// Component paths relative to the root.
        #[arg(required = true)]
        paths: Vec<String>,
        /// Print the manifest JSON instead of the bundle text.
        #[arg(long)]
        manifest: bool,
    },
    /// Run code from `--file` or stdin and print the result JSON.
    Exec {
        /// inline, script or serve.
        #[arg(long, default_value = "inline")]
        mode: String,
        /// Read code from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Target file name inside the sandbox.
        #[arg(long)]
        filename: Option<String>,
        /// Script timeout in seconds.
        #[arg(long)]
        timeout: Option<f64>,
        /// Port for serve mode.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Read a model reply from stdin and print `{plan, text}` JSON.
    Extract,
    /// Dispatch one JSON tool call and print the result.
    Tool {
        /// e.g. `{"tool": "bundle_components", "components": ["a.py"]}`
        call: String,
    },
    /// Print the agent instructions.
    Instructions {
        /// Prompt file; relative paths resolve against the root.
        #[arg(long, default_value = DEFAULT_PROMPT_PATH)]
        prompt: PathBuf,
    },
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(DEFAULT_CONFIG_PATH));
    if let Command::InitConfig { force } = cli.command {
        return cmd_init_config(&config_path, force);
    }

    let cfg = load_config(&config_path)?;
    match cli.command {
        Command::Bundle { paths, manifest } => cmd_bundle(&cli.root, &cfg, &paths, manifest),
        Command::Exec {
            mode,
            file,
            filename,
            timeout,
            port,
        } => {
            let code = read_source(file.as_deref())?;
            let request = ExecRequest {
                code,
                mode,
                filename,
                timeout,
                port,
            };
            cmd_exec(&cli.root, &cfg, request)
        }
        Command::Extract => cmd_extract(&cfg),
        Command::Tool { call } => cmd_tool(&cli.root, &cfg, &call),
        Command::Instructions { prompt } => {
            let prompt = resolve(&cli.root, &prompt);
            println!("{}", load_instructions(&prompt, TOOL_SPECS, &cfg.plan)?);
            Ok(exit_codes::OK)
        }
        Command::InitConfig { .. } => Ok(exit_codes::OK),
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        eprintln!("{} exists; pass --force to overwrite", path.display());
        return Ok(exit_codes::INVALID);
    }
    write_config(path, &RuntimeConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_bundle(root: &Path, cfg: &RuntimeConfig, paths: &[String], manifest: bool) -> Result<i32> {
    let guard = PathGuard::new(root, cfg.bundle.deny_rule())
        .with_context(|| format!("resolve root {}", root.display()))?;
    match bundle(&guard, paths) {
        Ok(bundle) if manifest => {
            print_json(&bundle.manifest)?;
            Ok(exit_codes::OK)
        }
        Ok(bundle) => {
            print!("{}", bundle.text);
            Ok(exit_codes::OK)
        }
        Err(err @ BundleError::Rejected { .. }) => {
            eprintln!("{err}");
            Ok(exit_codes::INVALID)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_exec(root: &Path, cfg: &RuntimeConfig, request: ExecRequest) -> Result<i32> {
    let executor = SandboxExecutor::new(root, cfg);
    let result = executor.execute(request);
    print_json(&result)?;
    Ok(if result.is_ok() {
        exit_codes::OK
    } else {
        exit_codes::EXEC_FAILED
    })
}

fn cmd_extract(cfg: &RuntimeConfig) -> Result<i32> {
    let reply = read_source(None)?;
    let Extraction { plan, text } = cfg.plan.extractor()?.extract(&reply);
    print_json(&json!({"plan": plan, "text": text}))?;
    Ok(exit_codes::OK)
}

fn cmd_tool(root: &Path, cfg: &RuntimeConfig, call: &str) -> Result<i32> {
    let dispatcher = ToolDispatcher::from_config(root, cfg)?;
    let mut session = Session::new(cfg.plan.extractor()?);
    let out = dispatcher.dispatch_json(&mut session, call);
    print_json(&out)?;
    let failed = out.get("error").is_some_and(|e| !e.is_null())
        || out.get("status").and_then(|s| s.as_str()) == Some("error");
    Ok(if failed {
        exit_codes::EXEC_FAILED
    } else {
        exit_codes::OK
    })
}

fn read_source(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            Ok(buf)
        }
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Print `value` as pretty JSON with a trailing newline.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bundle_with_manifest() {
        let cli = Cli::parse_from(["toolrun", "bundle", "a.py", "b.py", "--manifest"]);
        match cli.command {
            Command::Bundle { paths, manifest } => {
                assert_eq!(paths, vec!["a.py", "b.py"]);
                assert!(manifest);
            }
            _ => panic!("expected bundle"),
        }
    }

    #[test]
    fn parse_exec_defaults_to_inline() {
        let cli = Cli::parse_from(["toolrun", "exec"]);
        assert!(matches!(cli.command, Command::Exec { ref mode, .. } if mode == "inline"));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_global_root_after_subcommand() {
        let cli = Cli::parse_from(["toolrun", "extract", "--root", "/repo"]);
        assert!(matches!(cli.command, Command::Extract));
        assert_eq!(cli.root, PathBuf::from("/repo"));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["toolrun", "init-config", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        assert_eq!(
            resolve(Path::new("/repo"), Path::new("/etc/p.md")),
            PathBuf::from("/etc/p.md")
        );
        assert_eq!(
            resolve(Path::new("/repo"), Path::new("prompts/p.md")),
            PathBuf::from("/repo/prompts/p.md")
        );
    }
}
