//! Centralized error constructors for the evaluator and engine.
//!
//! One constructor per failure keeps messages consistent between the
//! fail-fast compile pass and the collecting metadata pass, which must
//! report the same codes for the same documents.

use weft_diagnostic::{Diagnostic, ErrorCode};
use weft_ir::Span;

// Scope and expression errors

pub fn variable_not_declared(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::VariableNotDeclared,
        format!("Variable '{name}' is not declared"),
        span,
    )
}

pub fn variable_already_declared(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::VariableAlreadyDeclared,
        format!("Variable '{name}' is already declared"),
        span,
    )
}

pub fn invalid_update(type_name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidUpdate,
        format!("Cannot increment or decrement a value of type {type_name}"),
        span,
    )
}

pub fn property_not_exists(path: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::PropertyNotExists,
        format!("Property '{path}' does not exist"),
        span,
    )
}

pub fn not_a_function(type_name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::NotAFunction,
        format!("Value of type {type_name} is not a function"),
        span,
    )
}

pub fn function_call_error(name: &str, message: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::FunctionCallError,
        format!("Error calling '{name}': {message}"),
        span,
    )
}

// Structural errors

pub fn message_tag_inside_message(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::MessageTagInsideMessage,
        "Message tags cannot be nested inside a message",
        span,
    )
}

pub fn content_tag_inside_content(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ContentTagInsideContent,
        "Content tags cannot be nested inside content",
        span,
    )
}

pub fn message_tag_without_role(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::MessageTagWithoutRole,
        "Message tag requires a 'role' attribute",
        span,
    )
}

pub fn invalid_message_role(role: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidMessageRole,
        format!("Invalid message role '{role}'"),
        span,
    )
}

pub fn content_tag_without_type(found: Option<&str>, span: Span) -> Diagnostic {
    let message = match found {
        Some(t) => format!("Invalid content type '{t}'"),
        None => "Content tag requires a 'type' attribute".to_string(),
    };
    Diagnostic::error(ErrorCode::ContentTagWithoutType, message, span)
}

pub fn tool_call_tag_without_id(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ToolCallTagWithoutId,
        "Tool call requires an 'id' attribute",
        span,
    )
}

pub fn tool_call_without_name(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ToolCallWithoutName,
        "Tool call requires a 'name' attribute",
        span,
    )
}

pub fn tool_message_without_id(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ToolMessageWithoutId,
        "Tool message requires an 'id' attribute",
        span,
    )
}

pub fn invalid_tool_call_placement(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidToolCallPlacement,
        "Tool calls are only allowed inside assistant messages",
        span,
    )
}

pub fn step_tag_inside_step(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::StepTagInsideStep,
        "Step tags cannot be nested inside another step",
        span,
    )
}

pub fn did_not_resolve_references(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::DidNotResolveReferences,
        "References must be resolved before compilation",
        span,
    )
}

pub fn unknown_tag(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(ErrorCode::UnknownTag, format!("Unknown tag '{name}'"), span)
}

pub fn invalid_static_attribute(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidStaticAttribute,
        format!("Attribute '{name}' must be a literal value"),
        span,
    )
}

// Reference resolution errors (metadata pass)

pub fn circular_reference(path: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::CircularReference,
        format!("Circular reference to '{path}'"),
        span,
    )
}

pub fn reference_depth_limit(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ReferenceDepthLimit,
        "Reference nesting is too deep",
        span,
    )
}

pub fn reference_not_found(path: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ReferenceNotFound,
        format!("Referenced prompt '{path}' was not found"),
        span,
    )
}

pub fn reference_missing_parameter(path: &str, parameter: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ReferenceMissingParameter,
        format!("Referenced prompt '{path}' requires parameter '{parameter}'"),
        span,
    )
}

pub fn reference_error(path: &str, inner: &Diagnostic, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ReferenceError,
        format!("Error in referenced prompt '{path}': {}", inner.message),
        span,
    )
}

// Configuration errors

pub fn invalid_config(detail: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidConfig,
        format!("Invalid config: {detail}"),
        span,
    )
}

pub fn config_outside_root(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ConfigOutsideRoot,
        "Config blocks are only allowed at the document root",
        span,
    )
}

pub fn config_already_declared(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ConfigAlreadyDeclared,
        "Config has already been declared",
        span,
    )
}

pub fn invalid_config_placement(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::InvalidConfigPlacement,
        "Config blocks must precede all other content",
        span,
    )
}

pub fn config_not_found(span: Span) -> Diagnostic {
    Diagnostic::error(
        ErrorCode::ConfigNotFound,
        "No config block was found",
        span,
    )
}
