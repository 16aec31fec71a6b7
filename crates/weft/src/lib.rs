//! Weft - a template compiler for multi-turn LLM prompts.
//!
//! Weft compiles structured template text (control flow, variable scope,
//! message/content markup) into a conversation of typed messages, and can
//! pause at `<step/>` checkpoints so a caller injects an external response
//! mid-compilation and continues.
//!
//! # Rendering a single-turn prompt
//!
//! ```
//! let prompt = weft::parse("<user>Hi {{ name }}</user>").unwrap();
//! let conversation = weft::render(
//!     &prompt,
//!     [("name".to_string(), weft::Value::string("Ada"))],
//! )
//! .unwrap();
//! assert_eq!(conversation.messages.len(), 1);
//! assert_eq!(conversation.messages[0].joined_text(), "Hi Ada");
//! ```
//!
//! # Driving a multi-turn prompt
//!
//! ```
//! let prompt = weft::parse("ask me anything<step as=answer/>echo: {{ answer }}").unwrap();
//! let mut chain = prompt.chain([]);
//! let first = chain.step(None).unwrap();
//! assert!(!first.completed);
//! let second = chain.step(Some("hello".into())).unwrap();
//! assert_eq!(
//!     second.conversation.messages.last().unwrap().joined_text(),
//!     "echo: hello"
//! );
//! ```
//!
//! # Static analysis
//!
//! [`read_metadata`] performs the same traversal without executing anything:
//! it reports external parameters, a content hash that changes whenever any
//! transitively referenced prompt changes, the parsed config block, and a
//! collected (never thrown) list of structural problems.

pub mod metadata;

pub use metadata::{
    read_metadata, set_config, Document, Metadata, MetadataOptions, ReferenceResolver,
    REFERENCE_DEPTH_LIMIT,
};
pub use weft_diagnostic::{DiagResult, Diagnostic, ErrorCode, Severity, TerminalEmitter};
pub use weft_eval::{
    Chain, ChainError, Engine, RunOutcome, Scope, ScopeStash, StatusTable, StepOutcome,
    StepResponse,
};
pub use weft_ir::{
    Ast, Callable, Config, ContentItem, Conversation, HostFn, Message, MessageRole, Span, Value,
};

/// A parsed prompt: the source text plus its immutable AST.
#[derive(Debug, Clone)]
pub struct Prompt {
    source: String,
    ast: Ast,
}

impl Prompt {
    /// Parse template source.
    pub fn parse(source: impl Into<String>) -> Result<Prompt, Diagnostic> {
        let source = source.into();
        let ast = weft_parse::parse(&source)?;
        Ok(Prompt { source, ast })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Start a turn-based chain over this prompt.
    pub fn chain(&self, parameters: impl IntoIterator<Item = (String, Value)>) -> Chain<'_> {
        Chain::new(&self.ast, parameters)
    }

    /// Analyze this prompt without executing it.
    pub fn metadata(&self, options: &MetadataOptions<'_>) -> Metadata {
        read_metadata(&self.source, options)
    }
}

/// Parse template source into a [`Prompt`].
pub fn parse(source: &str) -> Result<Prompt, Diagnostic> {
    Prompt::parse(source)
}

/// Errors from [`render`].
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Compile(#[from] Diagnostic),
    /// The prompt suspended at a step tag; single-pass rendering cannot
    /// continue it.
    #[error("Use a Chain to render prompts with multiple steps")]
    MultipleSteps,
}

/// Compile a prompt in a single pass.
///
/// Fails with [`RenderError::MultipleSteps`] if the prompt contains a step
/// tag that would require an external response.
pub fn render(
    prompt: &Prompt,
    parameters: impl IntoIterator<Item = (String, Value)>,
) -> Result<Conversation, RenderError> {
    let mut statuses = StatusTable::new();
    let scope = Scope::with_parameters(parameters);
    let outcome = Engine::new(prompt.ast(), &mut statuses, scope).run()?;
    if !outcome.completed {
        return Err(RenderError::MultipleSteps);
    }
    Ok(Conversation {
        messages: outcome.messages,
        config: outcome.global_config.unwrap_or_default(),
    })
}
