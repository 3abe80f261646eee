//! JSON tool surface exposed to the agent runtime.
//!
//! Every call returns a JSON value; nothing here returns `Err` to the agent.
//! Bundle failures come back as `{"error": "<reason>: <path>"}` verbatim so the
//! agent can correct the offending path, execution failures as an
//! `ExecutionResult` with `status: "error"`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::suggestions::RawSuggestion;
use crate::io::bundler::bundle;
use crate::io::config::RuntimeConfig;
use crate::io::path_guard::PathGuard;
use crate::io::sandbox::{ExecRequest, SandboxExecutor};
use crate::session::Session;

/// Name and description of a tool, as advertised to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOL_SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: "bundle_components",
        description: "Load component files (relative paths) and return one concatenated string plus a manifest. Rejects legacy components.",
    },
    ToolSpec {
        name: "run_code",
        description: "Run code with mode inline, script or serve. Returns status, stdout, stderr and, for serve, url and pid.",
    },
    ToolSpec {
        name: "suggest_next",
        description: "Offer follow-up choices as {id, label, payload} items; set replace to drop earlier ones.",
    },
];

/// One tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    BundleComponents {
        components: Vec<String>,
    },
    RunCode(ExecRequest),
    SuggestNext {
        items: Vec<RawSuggestion>,
        #[serde(default)]
        replace: bool,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::BundleComponents { .. } => "bundle_components",
            ToolCall::RunCode(_) => "run_code",
            ToolCall::SuggestNext { .. } => "suggest_next",
        }
    }
}

/// Routes tool calls to the bundler, the sandbox and the session.
pub struct ToolDispatcher {
    guard: PathGuard,
    executor: SandboxExecutor,
}

impl ToolDispatcher {
    pub fn new(guard: PathGuard, executor: SandboxExecutor) -> Self {
        Self { guard, executor }
    }

    /// Dispatcher rooted at `root` using `config`'s deny rule and sandbox.
    pub fn from_config(root: &Path, config: &RuntimeConfig) -> Result<Self> {
        let guard = PathGuard::new(root, config.bundle.deny_rule())
            .with_context(|| format!("resolve root {}", root.display()))?;
        let executor = SandboxExecutor::new(guard.root(), config);
        Ok(Self::new(guard, executor))
    }

    pub fn dispatch(&self, session: &mut Session, call: ToolCall) -> Value {
        debug!(tool = call.name(), "dispatching tool call");
        match call {
            ToolCall::BundleComponents { components } => match bundle(&self.guard, &components) {
                Ok(bundle) => json!({"bundle": bundle.text, "manifest": bundle.manifest}),
                Err(err) => {
                    warn!(%err, "bundle rejected");
                    json!({"error": err.to_string()})
                }
            },
            ToolCall::RunCode(request) => {
                session.set_last_code(&request.code);
                let result = self.executor.execute(request);
                serde_json::to_value(result)
                    .unwrap_or_else(|err| json!({"status": "error", "stderr": err.to_string()}))
            }
            ToolCall::SuggestNext { items, replace } => {
                let accepted = session.suggestions_mut().submit(items, replace);
                json!({"accepted": accepted, "queued": session.suggestions().len()})
            }
        }
    }

    /// Parse and dispatch a raw JSON call; malformed calls become `{"error": ...}`.
    pub fn dispatch_json(&self, session: &mut Session, raw: &str) -> Value {
        match serde_json::from_str::<ToolCall>(raw) {
            Ok(call) => self.dispatch(session, call),
            Err(err) => {
                warn!(%err, "malformed tool call");
                json!({"error": format!("invalid tool call: {err}")})
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRoot;

    #[test]
    fn bundle_call_returns_bundle_and_manifest() {
        let root = TestRoot::new().expect("root");
        root.write("blocks/components/gee/aoi.py", "def aoi(): pass\n")
            .expect("write");
        let dispatcher = root.dispatcher().expect("dispatcher");
        let mut session = root.session().expect("session");

        let out = dispatcher.dispatch_json(
            &mut session,
            r#"{"tool": "bundle_components", "components": ["blocks/components/gee/aoi.py"]}"#,
        );
        assert!(out["bundle"].as_str().expect("bundle").contains("def aoi()"));
        assert_eq!(out["manifest"][0]["id"], "blocks/components/gee/aoi.py");
        assert_eq!(out["manifest"][0]["size"], 16);
    }

    #[test]
    fn bundle_error_names_offending_path() {
        let root = TestRoot::new().expect("root");
        root.write("blocks/components/fs_old.py", "x\n").expect("write");
        let dispatcher = root.dispatcher().expect("dispatcher");
        let mut session = root.session().expect("session");

        let out = dispatcher.dispatch(
            &mut session,
            ToolCall::BundleComponents {
                components: vec!["blocks/components/fs_old.py".to_string()],
            },
        );
        assert_eq!(out, json!({"error": "legacy denied: blocks/components/fs_old.py"}));
    }

    #[test]
    fn run_code_records_last_code() {
        let root = TestRoot::new().expect("root");
        let dispatcher = root.dispatcher().expect("dispatcher");
        let mut session = root.session().expect("session");

        let out = dispatcher.dispatch_json(
            &mut session,
            r#"{"tool": "run_code", "code": "print('hi')", "mode": "inline"}"#,
        );
        assert_eq!(out, json!({"status": "ok", "stdout": "hi\n", "stderr": ""}));
        assert_eq!(session.last_code(), "print('hi')");
    }

    #[test]
    fn suggest_next_populates_session_queue() {
        let root = TestRoot::new().expect("root");
        let dispatcher = root.dispatcher().expect("dispatcher");
        let mut session = root.session().expect("session");

        let out = dispatcher.dispatch_json(
            &mut session,
            r#"{"tool": "suggest_next", "items": [
                {"id": "a", "label": "Show A", "payload": {"uc": "a"}},
                {"id": "a", "label": "Dup", "payload": {}},
                {"id": "b", "label": "Bad", "payload": 3}
            ]}"#,
        );
        assert_eq!(out, json!({"accepted": 1, "queued": 1}));
    }

    #[test]
    fn malformed_call_is_reported() {
        let root = TestRoot::new().expect("root");
        let dispatcher = root.dispatcher().expect("dispatcher");
        let mut session = root.session().expect("session");
        let out = dispatcher.dispatch_json(&mut session, r#"{"tool": "rm_rf"}"#);
        assert!(out["error"].as_str().expect("error").starts_with("invalid tool call"));
    }
}
