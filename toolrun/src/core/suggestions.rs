//! Session-scoped queue of selectable follow-up suggestions.
//!
//! Validation is lenient: malformed items are dropped and the rest of the
//! batch still lands. Ids are unique within the queue; the first occurrence
//! wins.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Prefix that marks a synthetic input produced from a suggestion.
pub const SUGGESTION_PREFIX: &str = "[suggestion:";

/// A validated suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub label: String,
    pub payload: Map<String, Value>,
}

/// An unvalidated suggestion as proposed by the agent.
///
/// `payload` may be an object or a string holding a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSuggestion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl RawSuggestion {
    pub fn new(id: &str, label: &str, payload: Value) -> Self {
        Self {
            id: Some(id.to_string()),
            label: Some(label.to_string()),
            payload,
        }
    }

    fn validate(self) -> Option<Suggestion> {
        let id = self.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
        let label = self
            .label
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;
        let payload = match self.payload {
            Value::Object(map) => map,
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => return None,
            },
            _ => return None,
        };
        Some(Suggestion { id, label, payload })
    }
}

/// The synthetic next input produced by choosing a suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticInput {
    pub suggestion_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionQueue {
    items: Vec<Suggestion>,
}

impl SuggestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch. With `replace`, the existing queue is discarded first.
    ///
    /// Returns the number of items accepted.
    pub fn submit<I>(&mut self, items: I, replace: bool) -> usize
    where
        I: IntoIterator<Item = RawSuggestion>,
    {
        if replace {
            self.items.clear();
        }
        let mut accepted = 0;
        let mut dropped = 0;
        for raw in items {
            match raw.validate() {
                Some(item) if !self.contains(&item.id) => {
                    self.items.push(item);
                    accepted += 1;
                }
                _ => dropped += 1,
            }
        }
        debug!(accepted, dropped, replace, "suggestions submitted");
        accepted
    }

    /// Produce the synthetic input for `id`. The item stays queued.
    pub fn consume(&self, id: &str) -> Option<SyntheticInput> {
        let item = self.get(id)?;
        let payload = Value::Object(item.payload.clone()).to_string();
        Some(SyntheticInput {
            suggestion_id: item.id.clone(),
            text: format!("{SUGGESTION_PREFIX}{}] {}\n{}", item.id, item.label, payload),
        })
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Suggestion> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn items(&self) -> &[Suggestion] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Recover the suggestion id from a synthetic input, if `text` is one.
pub fn parse_synthetic_input(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(SUGGESTION_PREFIX)?;
    let (id, _) = rest.split_once(']')?;
    (!id.is_empty()).then_some(id)
}
