//! Chain: the turn-based driver over repeated compile passes.
//!
//! Each `step` call reruns a fresh engine over the same AST and status
//! table, with the scope rebuilt from the previous turn's stash. The
//! engine's skip-completed rule makes the re-walk cheap and side-effect
//! free up to the resumption point.

use tracing::debug;

use weft_diagnostic::Diagnostic;
use weft_ir::{Ast, Config, ContentItem, Conversation, Message, MessageRole, Value};

use crate::engine::Engine;
use crate::scope::{Scope, ScopeStash};
use crate::status::StatusTable;

/// Chain state errors and compile failures.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("A response is not allowed before the chain has started")]
    ResponseNotAllowed,
    #[error("A response is required to continue the chain")]
    ResponseRequired,
    #[error("The chain has already completed")]
    AlreadyCompleted,
    #[error(transparent)]
    Compile(#[from] Diagnostic),
}

/// An externally supplied response: raw text or pre-built content items.
#[derive(Debug, Clone)]
pub enum StepResponse {
    Text(String),
    Content(Vec<ContentItem>),
}

impl StepResponse {
    fn into_items(self) -> Vec<ContentItem> {
        match self {
            StepResponse::Text(text) => vec![ContentItem::text(text)],
            StepResponse::Content(items) => items,
        }
    }
}

impl From<&str> for StepResponse {
    fn from(text: &str) -> Self {
        StepResponse::Text(text.to_string())
    }
}

impl From<String> for StepResponse {
    fn from(text: String) -> Self {
        StepResponse::Text(text)
    }
}

impl From<Vec<ContentItem>> for StepResponse {
    fn from(items: Vec<ContentItem>) -> Self {
        StepResponse::Content(items)
    }
}

/// The result of one chain turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub conversation: Conversation,
    pub completed: bool,
}

/// Stateful wrapper driving repeated compile passes to realize a multi-turn
/// conversation.
pub struct Chain<'a> {
    ast: &'a Ast,
    statuses: StatusTable,
    stash: ScopeStash,
    global_messages: Vec<Message>,
    global_config: Config,
    default_role: MessageRole,
    started: bool,
    completed: bool,
    last_step_isolated: bool,
    turn: usize,
}

impl<'a> Chain<'a> {
    pub fn new(ast: &'a Ast, parameters: impl IntoIterator<Item = (String, Value)>) -> Self {
        Chain {
            ast,
            statuses: StatusTable::new(),
            stash: ScopeStash::with_parameters(parameters),
            global_messages: Vec::new(),
            global_config: Config::new(),
            default_role: MessageRole::System,
            started: false,
            completed: false,
            last_step_isolated: false,
            turn: 0,
        }
    }

    /// Role for stray content outside message tags.
    #[must_use]
    pub fn with_default_role(mut self, role: MessageRole) -> Self {
        self.default_role = role;
        self
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Run one turn.
    ///
    /// The first call must not carry a response; every later call until
    /// completion must carry one.
    pub fn step(
        &mut self,
        response: Option<StepResponse>,
    ) -> Result<StepOutcome, ChainError> {
        if self.completed {
            return Err(ChainError::AlreadyCompleted);
        }
        if !self.started && response.is_some() {
            return Err(ChainError::ResponseNotAllowed);
        }
        if self.started && response.is_none() {
            return Err(ChainError::ResponseRequired);
        }
        self.started = true;
        self.turn += 1;
        debug!(turn = self.turn, "chain step start");

        let response_items = response.map(StepResponse::into_items);
        if let Some(items) = &response_items {
            if !self.last_step_isolated {
                self.global_messages
                    .push(Message::new(MessageRole::Assistant, items.clone()));
            }
        }

        let scope = Scope::from_stash(&self.stash);
        let outcome = Engine::new(self.ast, &mut self.statuses, scope)
            .with_default_role(self.default_role.clone())
            .with_pending_response(response_items)
            .run()?;

        self.stash = outcome.scope_stash;
        if let Some(config) = outcome.global_config {
            self.global_config = config;
        }

        let step_config = outcome.step_config.unwrap_or_default();
        let isolated = step_config.flag("isolated");
        let config = self.global_config.merged(&step_config);

        // An isolated step's turn is a clean sub-conversation: no prior
        // history in, none of its output kept afterwards.
        let messages = if isolated {
            outcome.messages.clone()
        } else {
            let mut all = self.global_messages.clone();
            all.extend(outcome.messages.iter().cloned());
            all
        };
        if !isolated {
            self.global_messages.extend(outcome.messages.iter().cloned());
        }
        self.last_step_isolated = isolated;

        // A turn that finished the document but still produced messages is
        // reported as one more caller-driven turn.
        let completed = outcome.completed && outcome.messages.is_empty();
        self.completed = completed;
        debug!(turn = self.turn, completed, "chain step end");

        Ok(StepOutcome {
            conversation: Conversation { messages, config },
            completed,
        })
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn chain_over(ast: &Ast) -> Chain<'_> {
        Chain::new(ast, [])
    }

    fn last_text(outcome: &StepOutcome) -> String {
        outcome
            .conversation
            .messages
            .last()
            .map(Message::joined_text)
            .unwrap_or_default()
    }

    #[test]
    fn first_step_must_not_carry_a_response() {
        let ast = weft_parse::parse("<step/>").unwrap();
        let mut chain = chain_over(&ast);
        let err = chain.step(Some("early".into())).unwrap_err();
        assert!(matches!(err, ChainError::ResponseNotAllowed));
    }

    #[test]
    fn later_steps_require_a_response() {
        let ast = weft_parse::parse("<step/>done").unwrap();
        let mut chain = chain_over(&ast);
        chain.step(None).unwrap();
        let err = chain.step(None).unwrap_err();
        assert!(matches!(err, ChainError::ResponseRequired));
    }

    #[test]
    fn stepping_a_completed_chain_errors() {
        let ast = weft_parse::parse("just text").unwrap();
        let mut chain = chain_over(&ast);
        let first = chain.step(None).unwrap();
        // Quirk: the document finished but produced messages, so one more
        // turn is required to reach completion.
        assert!(!first.completed);
        let second = chain.step(Some("ok".into())).unwrap();
        assert!(second.completed);
        let err = chain.step(Some("again".into())).unwrap_err();
        assert!(matches!(err, ChainError::AlreadyCompleted));
    }

    #[test]
    fn three_steps_invoke_host_functions_once_each() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut params = Vec::new();
        for name in ["first", "second", "third"] {
            let seen = calls.clone();
            let tag = name.to_string();
            params.push((
                name.to_string(),
                Value::callable(
                    name,
                    Rc::new(move |_: &[Value]| {
                        seen.borrow_mut().push(tag.clone());
                        Ok(Value::string(""))
                    }),
                ),
            ));
        }
        let ast = weft_parse::parse(
            "{{ first() }}<step/>{{ second() }}<step/>{{ third() }}<step/>",
        )
        .unwrap();
        let mut chain = Chain::new(&ast, params);

        chain.step(None).unwrap();
        chain.step(Some("a".into())).unwrap();
        chain.step(Some("b".into())).unwrap();
        let last = chain.step(Some("c".into())).unwrap();
        assert!(last.completed);

        // Each function fired exactly once across all turns combined.
        assert_eq!(
            *calls.borrow(),
            vec![
                "first".to_string(),
                "second".to_string(),
                "third".to_string()
            ]
        );
    }

    #[test]
    fn loop_and_step_interplay() {
        let source = "{{ foo = 0 }}{{#for el in [1,2,3]}}{{ foo }}<step as=foo/>{{ foo = el }}{{/for}}{{ foo }}";
        let ast = weft_parse::parse(source).unwrap();
        let mut chain = chain_over(&ast);

        // Inside the loop foo renders 0, 1, 2 across suspensions.
        let t1 = chain.step(None).unwrap();
        assert_eq!(last_text(&t1), "0");
        let t2 = chain.step(Some("r1".into())).unwrap();
        assert_eq!(last_text(&t2), "1");
        let t3 = chain.step(Some("r2".into())).unwrap();
        assert_eq!(last_text(&t3), "2");
        // Loop finished: the trailing foo is the last assignment.
        let t4 = chain.step(Some("r3".into())).unwrap();
        assert_eq!(last_text(&t4), "3");
        assert!(!t4.completed);
        let t5 = chain.step(Some("r4".into())).unwrap();
        assert!(t5.completed);
    }

    #[test]
    fn as_binding_receives_the_response() {
        let ast =
            weft_parse::parse("ask<step as=answer/>got: {{ answer }}").unwrap();
        let mut chain = chain_over(&ast);
        chain.step(None).unwrap();
        let outcome = chain.step(Some("42".into())).unwrap();
        assert_eq!(last_text(&outcome), "got: 42");
    }

    #[test]
    fn responses_enter_history_as_assistant_messages() {
        let ast = weft_parse::parse("q1<step/>q2<step/>").unwrap();
        let mut chain = chain_over(&ast);
        chain.step(None).unwrap();
        let second = chain.step(Some("a1".into())).unwrap();

        let roles: Vec<_> = second
            .conversation
            .messages
            .iter()
            .map(|m| m.role.clone())
            .collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::Assistant,
                MessageRole::System
            ]
        );
        assert_eq!(second.conversation.messages[1].joined_text(), "a1");
    }

    #[test]
    fn step_config_overlays_global_config() {
        let ast = weft_parse::parse(
            "---\nmodel: base\ntemperature: 0\n---\nq<step model=\"fast\"/>",
        )
        .unwrap();
        let mut chain = chain_over(&ast);
        let outcome = chain.step(None).unwrap();
        let config = &outcome.conversation.config;
        assert_eq!(config.get("model"), Some(&Value::string("fast")));
        assert_eq!(config.get("temperature"), Some(&Value::Number(0.0)));
    }

    #[test]
    fn isolated_step_excludes_history_both_ways() {
        let ast = weft_parse::parse(
            "<user>shared</user><step/>summarize<step isolated/>after<step/>",
        )
        .unwrap();
        let mut chain = chain_over(&ast);

        let t1 = chain.step(None).unwrap();
        assert_eq!(t1.conversation.messages.len(), 1);

        // The isolated step's turn sees only its own messages.
        let t2 = chain.step(Some("a1".into())).unwrap();
        assert_eq!(t2.conversation.messages.len(), 1);
        assert_eq!(t2.conversation.messages[0].joined_text(), "summarize");

        // Its response and messages stay out of the global history.
        let t3 = chain.step(Some("iso".into())).unwrap();
        let texts: Vec<_> = t3
            .conversation
            .messages
            .iter()
            .map(Message::joined_text)
            .collect();
        assert_eq!(texts, vec!["shared", "a1", "after"]);
    }
}
