//! Recovery of an embedded plan object from free-form model replies.
//!
//! A reply may carry a JSON plan in one of three encodings. They are tried in
//! strict precedence order and the first candidate that parses and satisfies
//! [`PlanShape`] wins:
//!
//! 1. A marker pair wrapping a fenced code block.
//! 2. A fenced code block, in document order.
//! 3. A bare single-level `{...}` span, in document order.
//!
//! Malformed candidates are skipped silently. Extraction never fails; the
//! worst case is "no plan" with the text returned unchanged.
//!
//! Known false positive: a bare object that happens to carry every required
//! key is treated as a plan even if the model did not mean it as one.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// A recognized plan. Values are opaque to the runtime.
pub type PlanSpec = Map<String, Value>;

pub const DEFAULT_BEGIN_MARKER: &str = "PLAN_SPEC_BEGIN";
pub const DEFAULT_END_MARKER: &str = "PLAN_SPEC_END";
pub const DEFAULT_REQUIRED_KEYS: [&str; 4] = ["uc_id", "aoi", "params", "components"];

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap());

static BARE_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// The single policy deciding whether a JSON value is a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanShape {
    required_keys: Vec<String>,
}

impl PlanShape {
    pub fn new<I>(required_keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            required_keys: required_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// True when `value` is an object containing every required key.
    pub fn matches(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => self.required_keys.iter().all(|key| map.contains_key(key)),
            _ => false,
        }
    }
}

impl Default for PlanShape {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_KEYS)
    }
}

/// Outcome of [`PlanExtractor::extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub plan: Option<PlanSpec>,
    pub text: String,
}

/// Which encoding produced the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTier {
    Marked,
    Fenced,
    Bare,
}

#[derive(Debug, Clone)]
pub struct PlanExtractor {
    shape: PlanShape,
    marked_re: Regex,
}

impl PlanExtractor {
    /// Build an extractor for the given shape and marker pair.
    pub fn new(shape: PlanShape, begin_marker: &str, end_marker: &str) -> Result<Self> {
        let marked_re = Regex::new(&marked_pattern(begin_marker, end_marker))
            .context("compile plan marker pattern")?;
        Ok(Self { shape, marked_re })
    }

    /// Lift the first valid plan out of `text`.
    pub fn extract(&self, text: &str) -> Extraction {
        match self.find(text) {
            Some((tier, start, end, plan)) => {
                debug!(?tier, start, end, "plan extracted");
                let mut cleaned = String::with_capacity(text.len() - (end - start));
                cleaned.push_str(&text[..start]);
                cleaned.push_str(&text[end..]);
                Extraction {
                    plan: Some(plan),
                    text: cleaned.trim().to_string(),
                }
            }
            None => Extraction {
                plan: None,
                text: text.to_string(),
            },
        }
    }

    fn find(&self, text: &str) -> Option<(PlanTier, usize, usize, PlanSpec)> {
        let tiers: [(PlanTier, &Regex, usize); 3] = [
            (PlanTier::Marked, &self.marked_re, 1),
            (PlanTier::Fenced, &FENCED_RE, 1),
            (PlanTier::Bare, &BARE_OBJECT_RE, 0),
        ];
        for (tier, re, group) in tiers {
            for caps in re.captures_iter(text) {
                let (Some(span), Some(body)) = (caps.get(0), caps.get(group)) else {
                    continue;
                };
                if let Some(plan) = self.parse_candidate(body.as_str()) {
                    return Some((tier, span.start(), span.end(), plan));
                }
            }
        }
        None
    }

    fn parse_candidate(&self, raw: &str) -> Option<PlanSpec> {
        let value: Value = serde_json::from_str(raw.trim()).ok()?;
        if !self.shape.matches(&value) {
            return None;
        }
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl Default for PlanExtractor {
    fn default() -> Self {
        Self {
            shape: PlanShape::default(),
            marked_re: Regex::new(&marked_pattern(DEFAULT_BEGIN_MARKER, DEFAULT_END_MARKER))
                .unwrap(),
        }
    }
}

fn marked_pattern(begin_marker: &str, end_marker: &str) -> String {
    format!(
        r"(?s){}\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```\s*{}",
        regex::escape(begin_marker),
        regex::escape(end_marker)
    )
}
