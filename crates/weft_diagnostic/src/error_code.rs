//! Stable error codes for all compiler and metadata diagnostics.
//!
//! Codes are part of the public contract: downstream tooling branches on
//! them instead of matching message text, so the kebab-case strings here
//! never change.

use std::fmt;

/// Error codes for every engine and metadata failure.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ErrorCode {
    // Scope and expression errors
    /// Variable referenced before any declaration
    VariableNotDeclared,
    /// Re-declaration in the same frame (loop bindings, parameters)
    VariableAlreadyDeclared,
    /// `++`/`--` applied to a non-number
    InvalidUpdate,
    /// Invalid assignment target (e.g. through an optional chain)
    InvalidAssignment,
    /// Source text could not be parsed
    ParseError,
    /// Assignment path traverses a missing property
    PropertyNotExists,
    /// Call target is not a function
    NotAFunction,
    /// A host callable returned an error
    FunctionCallError,

    // Structural errors
    /// Message tag nested inside a message or content tag
    MessageTagInsideMessage,
    /// Content tag nested inside another content tag
    ContentTagInsideContent,
    /// Generic message tag without a role attribute
    MessageTagWithoutRole,
    /// Generic message tag with an unrecognized role
    InvalidMessageRole,
    /// Generic content tag with no resolvable content type
    ContentTagWithoutType,
    /// Tool-call content without an `id` attribute
    ToolCallTagWithoutId,
    /// Tool-call content without a `name` attribute
    ToolCallWithoutName,
    /// Tool-role message without an `id` attribute
    ToolMessageWithoutId,
    /// Tool-call content in a non-assistant message
    InvalidToolCallPlacement,
    /// Chain-step tag nested inside another step
    StepTagInsideStep,
    /// Reference tag reached the compiler unresolved
    DidNotResolveReferences,
    /// Unrecognized tag name
    UnknownTag,
    /// Node kind the engine cannot process
    UnsupportedBaseNodeType,
    /// Attribute that must be static carries an interpolated value
    InvalidStaticAttribute,

    // Reference resolution errors (metadata pass)
    /// Reference chain revisits a path
    CircularReference,
    /// Reference nesting beyond the fixed recursion bound
    ReferenceDepthLimit,
    /// Resolver returned nothing for a path
    ReferenceNotFound,
    /// Referenced prompt parameter not supplied as an attribute
    ReferenceMissingParameter,
    /// Error surfaced from inside a referenced prompt
    ReferenceError,

    // Configuration errors
    /// Config block failed YAML parsing or schema validation
    InvalidConfig,
    /// Second config block in one document
    ConfigAlreadyDeclared,
    /// Config block nested below the document root
    ConfigOutsideRoot,
    /// Root config block after other content
    InvalidConfigPlacement,
    /// Config required (e.g. a schema was supplied) but no block exists
    ConfigNotFound,
}

impl ErrorCode {
    /// The stable kebab-case code string.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::VariableNotDeclared => "variable-not-declared",
            ErrorCode::VariableAlreadyDeclared => "variable-already-declared",
            ErrorCode::InvalidUpdate => "invalid-update",
            ErrorCode::InvalidAssignment => "invalid-assignment",
            ErrorCode::ParseError => "parse-error",
            ErrorCode::PropertyNotExists => "property-not-exists",
            ErrorCode::NotAFunction => "not-a-function",
            ErrorCode::FunctionCallError => "function-call-error",
            ErrorCode::MessageTagInsideMessage => "message-tag-inside-message",
            ErrorCode::ContentTagInsideContent => "content-tag-inside-content",
            ErrorCode::MessageTagWithoutRole => "message-tag-without-role",
            ErrorCode::InvalidMessageRole => "invalid-message-role",
            ErrorCode::ContentTagWithoutType => "content-tag-without-type",
            ErrorCode::ToolCallTagWithoutId => "tool-call-tag-without-id",
            ErrorCode::ToolCallWithoutName => "tool-call-without-name",
            ErrorCode::ToolMessageWithoutId => "tool-message-without-id",
            ErrorCode::InvalidToolCallPlacement => "invalid-tool-call-placement",
            ErrorCode::StepTagInsideStep => "step-tag-inside-step",
            ErrorCode::DidNotResolveReferences => "did-not-resolve-references",
            ErrorCode::UnknownTag => "unknown-tag",
            ErrorCode::UnsupportedBaseNodeType => "unsupported-base-node-type",
            ErrorCode::InvalidStaticAttribute => "invalid-static-attribute",
            ErrorCode::CircularReference => "circular-reference",
            ErrorCode::ReferenceDepthLimit => "reference-depth-limit",
            ErrorCode::ReferenceNotFound => "reference-not-found",
            ErrorCode::ReferenceMissingParameter => "reference-missing-parameter",
            ErrorCode::ReferenceError => "reference-error",
            ErrorCode::InvalidConfig => "invalid-config",
            ErrorCode::ConfigAlreadyDeclared => "config-already-declared",
            ErrorCode::ConfigOutsideRoot => "config-outside-root",
            ErrorCode::InvalidConfigPlacement => "invalid-config-placement",
            ErrorCode::ConfigNotFound => "config-not-found",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_kebab_case() {
        let codes = [
            ErrorCode::VariableNotDeclared,
            ErrorCode::MessageTagInsideMessage,
            ErrorCode::ReferenceMissingParameter,
            ErrorCode::InvalidConfigPlacement,
        ];
        for code in codes {
            let s = code.as_str();
            assert!(s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '-'), "{s}");
        }
    }
}
