//! Agent instruction loading.
//!
//! The operator's prompt file wins when present. Otherwise a built-in fallback
//! is rendered so the agent still knows its tools and the plan contract.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::config::PlanConfig;
use crate::tools::ToolSpec;

const FALLBACK_TEMPLATE: &str = include_str!("prompts/fallback.md");

/// Load agent instructions from `prompt_path`, or render the fallback.
pub fn load_instructions(prompt_path: &Path, tools: &[ToolSpec], plan: &PlanConfig) -> Result<String> {
    if prompt_path.is_file() {
        debug!(path = %prompt_path.display(), "using prompt file");
        let text = fs::read_to_string(prompt_path)
            .with_context(|| format!("read {}", prompt_path.display()))?;
        return Ok(text.trim().to_string());
    }
    debug!(path = %prompt_path.display(), "prompt file missing, rendering fallback");
    render_fallback(tools, plan)
}

fn render_fallback(tools: &[ToolSpec], plan: &PlanConfig) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("fallback", FALLBACK_TEMPLATE)
        .context("load fallback template")?;
    let rendered = env
        .get_template("fallback")?
        .render(context! {
            tools => tools,
            required_keys => &plan.required_keys,
            begin_marker => &plan.begin_marker,
            end_marker => &plan.end_marker,
        })
        .context("render fallback instructions")?;
    Ok(rendered.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::TOOL_SPECS;

    #[test]
    fn prompt_file_is_used_verbatim_but_trimmed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("mega_prompt.md");
        fs::write(&path, "\n  Be precise.\n\n").expect("write");
        let text = load_instructions(&path, TOOL_SPECS, &PlanConfig::default()).expect("load");
        assert_eq!(text, "Be precise.");
    }

    #[test]
    fn fallback_lists_tools_and_plan_contract() {
        let temp = tempfile::tempdir().expect("tempdir");
        let text = load_instructions(
            &temp.path().join("missing.md"),
            TOOL_SPECS,
            &PlanConfig::default(),
        )
        .expect("load");
        assert!(text.contains("- bundle_components:"));
        assert!(text.contains("- run_code:"));
        assert!(text.contains("uc_id, aoi, params, components"));
        assert!(text.contains("PLAN_SPEC_BEGIN"));
        assert!(text.contains("PLAN_SPEC_END"));
    }
}
