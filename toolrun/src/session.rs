//! Conversation session state and turn processing.
//!
//! A [`Session`] is created at conversation start and passed explicitly to
//! everything that reads or mutates it. One turn runs at a time:
//! [`run_turn`] clears the previous turn's suggestions, lets the agent call
//! tools, lifts any plan out of the reply and records the cleaned reply.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::plan::{PlanExtractor, PlanSpec};
use crate::core::suggestions::{SuggestionQueue, SyntheticInput};
use crate::tools::{ToolCall, ToolDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    messages: Vec<Message>,
    last_code: String,
    last_plan: Option<PlanSpec>,
    suggestions: SuggestionQueue,
    extractor: PlanExtractor,
}

impl Session {
    pub fn new(extractor: PlanExtractor) -> Self {
        Self {
            messages: Vec::new(),
            last_code: String::new(),
            last_plan: None,
            suggestions: SuggestionQueue::new(),
            extractor,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_code(&self) -> &str {
        &self.last_code
    }

    pub fn set_last_code(&mut self, code: &str) {
        self.last_code = code.to_string();
    }

    pub fn last_plan(&self) -> Option<&PlanSpec> {
        self.last_plan.as_ref()
    }

    pub fn suggestions(&self) -> &SuggestionQueue {
        &self.suggestions
    }

    pub fn suggestions_mut(&mut self) -> &mut SuggestionQueue {
        &mut self.suggestions
    }

    /// Start a turn. Empty input is ignored and returns `false`.
    pub fn begin_turn(&mut self, user_text: &str) -> bool {
        if user_text.trim().is_empty() {
            return false;
        }
        self.suggestions.clear();
        self.messages.push(Message {
            role: Role::User,
            content: user_text.to_string(),
        });
        true
    }

    /// Finish a turn with the raw model reply; returns the text shown to the user.
    ///
    /// A recovered plan replaces `last_plan`; without one the previous plan stays.
    pub fn finish_turn(&mut self, raw_reply: &str) -> String {
        let extraction = self.extractor.extract(raw_reply);
        if let Some(plan) = extraction.plan {
            debug!(keys = plan.len(), "plan recorded");
            self.last_plan = Some(plan);
        }
        if !extraction.text.trim().is_empty() {
            self.messages.push(Message {
                role: Role::Assistant,
                content: extraction.text.clone(),
            });
        }
        extraction.text
    }

    /// Turn a chosen suggestion into the next input.
    pub fn choose_suggestion(&self, id: &str) -> Option<SyntheticInput> {
        self.suggestions.consume(id)
    }
}

/// Tool access handed to the agent for the duration of one turn.
pub struct TurnTools<'a> {
    dispatcher: &'a ToolDispatcher,
    session: &'a mut Session,
}

impl TurnTools<'_> {
    pub fn call(&mut self, call: ToolCall) -> Value {
        self.dispatcher.dispatch(self.session, call)
    }

    pub fn call_json(&mut self, raw: &str) -> Value {
        self.dispatcher.dispatch_json(self.session, raw)
    }

    pub fn session(&self) -> &Session {
        &*self.session
    }
}

/// The language-model runtime: decides which tools to call and writes the reply.
pub trait Agent {
    fn respond(&mut self, input: &str, tools: &mut TurnTools<'_>) -> Result<String>;
}

/// Process one user message. Returns `None` for empty input.
#[instrument(skip_all, fields(input_len = user_text.len()))]
pub fn run_turn<A: Agent>(
    session: &mut Session,
    agent: &mut A,
    dispatcher: &ToolDispatcher,
    user_text: &str,
) -> Option<String> {
    if !session.begin_turn(user_text) {
        return None;
    }
    let mut tools = TurnTools {
        dispatcher,
        session: &mut *session,
    };
    let reply = match agent.respond(user_text, &mut tools) {
        Ok(reply) => reply,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "agent failed");
            format!("Agent error: {err:#}")
        }
    };
    let shown = session.finish_turn(&reply);
    info!(
        has_plan = session.last_plan().is_some(),
        suggestions = session.suggestions().len(),
        "turn finished"
    );
    Some(shown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::suggestions::RawSuggestion;
    use serde_json::json;

    const REPLY_WITH_PLAN: &str = "Plan ready.\nPLAN_SPEC_BEGIN\n```json\n{\"uc_id\": \"ndvi\", \"aoi\": \"Rome\", \"params\": {}, \"components\": []}\n```\nPLAN_SPEC_END";

    #[test]
    fn empty_input_is_ignored() {
        let mut session = Session::new(PlanExtractor::default());
        assert!(!session.begin_turn("   "));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn new_turn_clears_suggestions() {
        let mut session = Session::new(PlanExtractor::default());
        session
            .suggestions_mut()
            .submit([RawSuggestion::new("a", "A", json!({}))], false);
        assert!(session.begin_turn("next"));
        assert!(session.suggestions().is_empty());
    }

    #[test]
    fn finish_turn_lifts_plan_and_keeps_it_across_turns() {
        let mut session = Session::new(PlanExtractor::default());
        session.begin_turn("plan ndvi");
        let shown = session.finish_turn(REPLY_WITH_PLAN);
        assert_eq!(shown, "Plan ready.");
        assert_eq!(session.last_plan().expect("plan")["uc_id"], "ndvi");

        session.begin_turn("thanks");
        session.finish_turn("You're welcome.");
        assert_eq!(session.last_plan().expect("plan")["uc_id"], "ndvi");
        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[test]
    fn reply_that_is_only_a_plan_adds_no_message() {
        let mut session = Session::new(PlanExtractor::default());
        session.begin_turn("plan");
        let reply = REPLY_WITH_PLAN.trim_start_matches("Plan ready.\n");
        assert_eq!(session.finish_turn(reply), "");
        assert_eq!(session.messages().len(), 1);
    }
}
