//! Metadata analysis: the non-executing traversal.
//!
//! Walks the same AST the engine executes, without evaluating anything:
//! identifiers read while undefined become the prompt's parameter set,
//! every structural rule the engine enforces is checked here too (collected
//! rather than thrown), references resolve recursively through a
//! caller-supplied resolver, and the content hash folds every transitively
//! referenced prompt into the prompt's own digest.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use sha2::{Digest, Sha256};
use tracing::debug;

use weft_diagnostic::{Diagnostic, ErrorCode};
use weft_eval::errors::{
    circular_reference, config_already_declared, config_not_found, config_outside_root,
    content_tag_inside_content, content_tag_without_type, did_not_resolve_references,
    invalid_config, invalid_config_placement, invalid_message_role, invalid_static_attribute,
    invalid_tool_call_placement, message_tag_inside_message, message_tag_without_role,
    reference_depth_limit, reference_error, reference_missing_parameter, reference_not_found,
    step_tag_inside_step, tool_call_tag_without_id, tool_call_without_name,
    tool_message_without_id, unknown_tag, variable_already_declared,
};

use weft_ir::{
    Ast, AttrValue, Config, ContentTagKind, ExprId, ExprKind, MessageTagKind, NodeId, NodeKind,
    Span, Tag, TagKind,
};

/// Maximum reference nesting before analysis stops descending.
pub const REFERENCE_DEPTH_LIMIT: usize = 50;

/// A resolvable prompt document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub path: String,
    pub content: String,
}

/// Resolves a referenced sub-prompt by path.
pub trait ReferenceResolver {
    fn resolve(&self, path: &str, from: Option<&str>) -> Option<Document>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&str, Option<&str>) -> Option<Document>,
{
    fn resolve(&self, path: &str, from: Option<&str>) -> Option<Document> {
        self(path, from)
    }
}

/// Options for [`read_metadata`].
#[derive(Default)]
pub struct MetadataOptions<'a> {
    /// Resolver for `<include>` tags. Without one, reference tags are
    /// reported just as compilation would report them.
    pub resolver: Option<&'a dyn ReferenceResolver>,
    /// Names the caller will inject; never reported as parameters.
    pub predeclared_parameters: BTreeSet<String>,
    /// Optional config-shape validator; failures surface as
    /// `invalid-config`, and a missing config block as `config-not-found`.
    pub config_validator: Option<&'a dyn Fn(&Config) -> Result<(), String>>,
}

/// The product of metadata analysis. Never an error: problems are collected
/// in `errors` and the other fields are best-effort.
#[derive(Debug)]
pub struct Metadata {
    /// External parameters: identifiers read while undefined.
    pub parameters: BTreeSet<String>,
    /// Digest over the source and every transitively referenced prompt.
    pub hash: String,
    /// The parsed root config block, when present and parseable.
    pub config: Config,
    /// Every structural problem found, in document order.
    pub errors: Vec<Diagnostic>,
    source: String,
}

impl Metadata {
    /// Re-serialize the source with its config block replaced.
    ///
    /// An empty config removes the block; a document without one gains a
    /// block at the top.
    pub fn set_config(&self, config: &Config) -> String {
        set_config(&self.source, config)
    }
}

/// Analyze a prompt without executing it.
pub fn read_metadata(source: &str, options: &MetadataOptions<'_>) -> Metadata {
    analyze(source, options, &[], None, 0)
}

/// Replace, insert, or remove the config block of a source text.
pub fn set_config(source: &str, config: &Config) -> String {
    let block_span = weft_parse::parse(source).ok().and_then(|ast| {
        let NodeKind::Fragment { children } = &ast.node(ast.root()).kind else {
            return None;
        };
        children.iter().find_map(|&child| {
            let node = ast.node(child);
            match &node.kind {
                NodeKind::Config { .. } => Some(node.span),
                _ => None,
            }
        })
    });

    let rendered = if config.is_empty() {
        String::new()
    } else {
        format!("---\n{}---\n", config.to_yaml())
    };

    match block_span {
        Some(span) => {
            let mut out = String::with_capacity(source.len() + rendered.len());
            out.push_str(&source[..span.start as usize]);
            out.push_str(&rendered);
            out.push_str(&source[span.end as usize..]);
            out
        }
        None if rendered.is_empty() => source.to_string(),
        None => format!("{rendered}{source}"),
    }
}

fn analyze(
    source: &str,
    options: &MetadataOptions<'_>,
    chain: &[String],
    own_path: Option<&str>,
    depth: usize,
) -> Metadata {
    let ast = match weft_parse::parse(source) {
        Ok(ast) => ast,
        Err(diagnostic) => {
            return Metadata {
                parameters: BTreeSet::new(),
                hash: hash_of(source, &[]),
                config: Config::new(),
                errors: vec![diagnostic],
                source: source.to_string(),
            };
        }
    };

    let mut analyzer = Analyzer {
        ast: &ast,
        options,
        chain,
        own_path,
        depth,
        scopes: vec![FxHashSet::default()],
        parameters: BTreeSet::new(),
        errors: Vec::new(),
        config: None,
        referenced_hashes: Vec::new(),
        message_role: None,
        in_content: false,
        in_step: false,
        config_seen: false,
        content_seen: false,
    };
    analyzer.walk_node(ast.root(), true);

    if options.config_validator.is_some() && analyzer.config.is_none() {
        analyzer.errors.push(config_not_found(Span::DUMMY));
    }

    debug!(
        parameters = analyzer.parameters.len(),
        errors = analyzer.errors.len(),
        "metadata analysis done"
    );
    Metadata {
        parameters: analyzer.parameters,
        hash: hash_of(source, &analyzer.referenced_hashes),
        config: analyzer.config.unwrap_or_default(),
        errors: analyzer.errors,
        source: source.to_string(),
    }
}

fn hash_of(source: &str, referenced: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    for hash in referenced {
        hasher.update(hash.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

struct Analyzer<'a> {
    ast: &'a Ast,
    options: &'a MetadataOptions<'a>,
    chain: &'a [String],
    own_path: Option<&'a str>,
    depth: usize,
    scopes: Vec<FxHashSet<String>>,
    parameters: BTreeSet<String>,
    errors: Vec<Diagnostic>,
    config: Option<Config>,
    referenced_hashes: Vec<String>,
    /// `None` outside a message; `Some(None)` inside a message whose role is
    /// only known at run time; `Some(Some(role))` otherwise.
    message_role: Option<Option<String>>,
    in_content: bool,
    in_step: bool,
    config_seen: bool,
    content_seen: bool,
}

impl<'a> Analyzer<'a> {
    fn walk_node(&mut self, id: NodeId, at_root: bool) {
        let node = self.ast.node(id);
        let span = node.span;
        match &node.kind {
            NodeKind::Fragment { children } => {
                for &child in children {
                    self.walk_node(child, at_root);
                }
            }
            NodeKind::Config { raw } => self.handle_config(raw, span, at_root),
            NodeKind::Text { text } => {
                if !text.trim().is_empty() {
                    self.content_seen = true;
                }
            }
            NodeKind::Interpolation { expr } => {
                self.walk_expr(*expr);
                self.content_seen = true;
            }
            NodeKind::If {
                condition,
                children,
                else_children,
            } => {
                self.walk_expr(*condition);
                // Both branches are analyzed: this pass does not evaluate.
                self.scoped(|a| {
                    for &child in children {
                        a.walk_node(child, false);
                    }
                });
                self.scoped(|a| {
                    for &child in else_children {
                        a.walk_node(child, false);
                    }
                });
            }
            NodeKind::For {
                iterable,
                binding,
                index_binding,
                children,
                else_children,
            } => {
                self.walk_expr(*iterable);
                if self.defined(binding) {
                    self.errors
                        .push(variable_already_declared(binding, span));
                }
                if let Some(index_name) = index_binding {
                    if self.defined(index_name) {
                        self.errors.push(variable_already_declared(
                            index_name, span,
                        ));
                    }
                }
                self.scoped(|a| {
                    a.define(binding);
                    if let Some(index_name) = index_binding {
                        a.define(index_name);
                    }
                    for &child in children {
                        a.walk_node(child, false);
                    }
                });
                self.scoped(|a| {
                    for &child in else_children {
                        a.walk_node(child, false);
                    }
                });
            }
            NodeKind::Tag(tag) => self.walk_tag(tag, span),
        }
    }

    fn walk_tag(&mut self, tag: &Tag, span: Span) {
        match &tag.kind {
            TagKind::Message(kind) => self.walk_message_tag(*kind, tag, span),
            TagKind::Content(kind) => self.walk_content_tag(*kind, tag, span),
            TagKind::Include => self.walk_reference(tag, span),
            TagKind::Step => self.walk_step(tag, span),
            TagKind::Unknown(name) => {
                self.errors.push(unknown_tag(name, span));
                for &child in &tag.children {
                    self.walk_node(child, false);
                }
            }
        }
    }

    fn walk_message_tag(&mut self, kind: MessageTagKind, tag: &Tag, span: Span) {
        if self.message_role.is_some() || self.in_content {
            self.errors.push(message_tag_inside_message(span));
        }

        let role = match kind {
            MessageTagKind::System => Some("system".to_string()),
            MessageTagKind::User => Some("user".to_string()),
            MessageTagKind::Assistant => Some("assistant".to_string()),
            MessageTagKind::Tool => Some("tool".to_string()),
            MessageTagKind::Generic => match tag.attribute("role") {
                None => {
                    self.errors.push(message_tag_without_role(span));
                    None
                }
                Some(attr) => match &attr.value {
                    AttrValue::Literal(name) => {
                        if !matches!(name.as_str(), "system" | "user" | "assistant" | "tool") {
                            self.errors.push(invalid_message_role(name, attr.span));
                        }
                        Some(name.clone())
                    }
                    AttrValue::True => {
                        self.errors.push(invalid_message_role("true", attr.span));
                        None
                    }
                    AttrValue::Expr(expr) => {
                        self.walk_expr(*expr);
                        None
                    }
                },
            },
        };

        if role.as_deref() == Some("tool") && tag.attribute("id").is_none() {
            self.errors
                .push(tool_message_without_id(span));
        }
        self.walk_attrs(tag, &["role"]);

        let previous = self.message_role.replace(role);
        for &child in &tag.children {
            self.walk_node(child, false);
        }
        self.message_role = previous;
        self.content_seen = true;
    }

    fn walk_content_tag(&mut self, kind: ContentTagKind, tag: &Tag, span: Span) {
        if self.in_content {
            self.errors.push(content_tag_inside_content(span));
        }

        let resolved = match kind {
            ContentTagKind::Generic => match tag.attribute("type") {
                None => {
                    self.errors.push(content_tag_without_type(None, span));
                    None
                }
                Some(attr) => match &attr.value {
                    AttrValue::Literal(name) => match name.as_str() {
                        "text" => Some(ContentTagKind::Text),
                        "image" => Some(ContentTagKind::Image),
                        "tool-call" => Some(ContentTagKind::ToolCall),
                        "tool-result" => Some(ContentTagKind::ToolResult),
                        other => {
                            self.errors
                                .push(content_tag_without_type(Some(other), attr.span));
                            None
                        }
                    },
                    AttrValue::True => {
                        self.errors.push(content_tag_without_type(None, attr.span));
                        None
                    }
                    AttrValue::Expr(expr) => {
                        self.walk_expr(*expr);
                        None
                    }
                },
            },
            concrete => Some(concrete),
        };

        if resolved == Some(ContentTagKind::ToolCall) {
            if tag.attribute("id").is_none() {
                self.errors
                    .push(tool_call_tag_without_id(span));
            }
            if tag.attribute("name").is_none() {
                self.errors
                    .push(tool_call_without_name(span));
            }
            match &self.message_role {
                Some(Some(role)) if role == "assistant" => {}
                Some(None) => {}
                _ => self.errors.push(invalid_tool_call_placement(span)),
            }
        }
        self.walk_attrs(tag, &["type"]);

        self.in_content = true;
        for &child in &tag.children {
            self.walk_node(child, false);
        }
        self.in_content = false;
        self.content_seen = true;
    }

    fn walk_step(&mut self, tag: &Tag, span: Span) {
        if self.in_step {
            self.errors.push(step_tag_inside_step(span));
        }

        let mut as_binding = None;
        for attr in &tag.attributes {
            if attr.name == "as" {
                match attr.value.as_static() {
                    Some(name) => as_binding = Some(name.to_string()),
                    None => self
                        .errors
                        .push(invalid_static_attribute("as", attr.span)),
                }
            } else if let AttrValue::Expr(expr) = &attr.value {
                self.walk_expr(*expr);
            }
        }

        self.in_step = true;
        for &child in &tag.children {
            self.walk_node(child, false);
        }
        self.in_step = false;

        // The response binding is visible after the step.
        if let Some(name) = as_binding {
            self.define(&name);
        }
        self.content_seen = true;
    }

    fn walk_reference(&mut self, tag: &Tag, span: Span) {
        self.content_seen = true;
        self.walk_attrs(tag, &["path"]);

        let Some(path_attr) = tag.attribute("path") else {
            self.errors.push(Diagnostic::error(
                ErrorCode::ReferenceNotFound,
                "Reference tag requires a 'path' attribute",
                span,
            ));
            return;
        };
        let Some(path) = path_attr.value.as_static() else {
            self.errors
                .push(invalid_static_attribute("path", path_attr.span));
            return;
        };
        let Some(resolver) = self.options.resolver else {
            // Mirror compilation: unresolved references are an error.
            self.errors.push(did_not_resolve_references(span));
            return;
        };
        if self.depth >= REFERENCE_DEPTH_LIMIT {
            self.errors.push(reference_depth_limit(span));
            return;
        }
        let Some(document) = resolver.resolve(path, self.own_path) else {
            self.errors.push(reference_not_found(path, span));
            return;
        };
        if self.chain.iter().any(|p| *p == document.path) {
            self.errors.push(circular_reference(path, span));
            return;
        }

        debug!(path = %document.path, depth = self.depth, "analyzing referenced prompt");
        let mut chain = self.chain.to_vec();
        chain.push(document.path.clone());
        let nested = analyze(
            &document.content,
            self.options,
            &chain,
            Some(&document.path),
            self.depth + 1,
        );

        for error in &nested.errors {
            match error.code {
                // Reference-chain failures keep their own codes; everything
                // else wraps so the caller sees which include surfaced it.
                ErrorCode::CircularReference | ErrorCode::ReferenceDepthLimit => {
                    self.errors.push(error.clone().with_span(span));
                }
                _ => self.errors.push(reference_error(path, error, span)),
            }
        }
        for parameter in &nested.parameters {
            if tag.attribute(parameter).is_none() {
                self.errors
                    .push(reference_missing_parameter(path, parameter, span));
            }
        }
        self.referenced_hashes.push(nested.hash);
    }

    fn handle_config(&mut self, raw: &str, span: Span, at_root: bool) {
        if !at_root {
            self.errors.push(config_outside_root(span));
            return;
        }
        if self.config_seen {
            self.errors.push(config_already_declared(span));
            return;
        }
        if self.content_seen {
            self.errors.push(invalid_config_placement(span));
        }
        self.config_seen = true;

        match Config::from_yaml(raw) {
            Ok(config) => {
                if let Some(validator) = self.options.config_validator {
                    if let Err(message) = validator(&config) {
                        self.errors.push(invalid_config(&message, span));
                    }
                }
                self.config = Some(config);
            }
            Err(message) => self.errors.push(invalid_config(&message, span)),
        }
    }

    // Attribute and expression walking

    /// Walk expression attribute values, skipping `except` names handled by
    /// the caller.
    fn walk_attrs(&mut self, tag: &Tag, except: &[&str]) {
        for attr in &tag.attributes {
            if except.contains(&attr.name.as_str()) {
                continue;
            }
            if let AttrValue::Expr(expr) = &attr.value {
                self.walk_expr(*expr);
            }
        }
    }

    fn walk_expr(&mut self, id: ExprId) {
        let expr = self.ast.exprs().get(id);
        match &expr.kind {
            ExprKind::Number(_)
            | ExprKind::String(_)
            | ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::Undefined => {}

            ExprKind::Ident(name) => self.read(name),

            ExprKind::Array(items) => {
                for &item in items {
                    self.walk_expr(item);
                }
            }
            ExprKind::Object(properties) => {
                for (_, value) in properties {
                    self.walk_expr(*value);
                }
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(*operand),
            ExprKind::Update { target, .. } => self.walk_expr(*target),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                self.walk_expr(*lhs);
                self.walk_expr(*rhs);
            }
            ExprKind::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                self.walk_expr(*condition);
                self.walk_expr(*consequent);
                self.walk_expr(*alternate);
            }
            ExprKind::Assign { op, target, value } => {
                self.walk_expr(*value);
                let target_expr = self.ast.exprs().get(*target);
                match &target_expr.kind {
                    ExprKind::Ident(name) => {
                        // Compound assignment reads before it writes; a
                        // plain `=` only defines.
                        if *op != weft_ir::AssignOp::Assign {
                            self.read(name);
                        }
                        let name = name.clone();
                        self.define(&name);
                    }
                    _ => self.walk_expr(*target),
                }
            }
            ExprKind::Member {
                object, property, ..
            } => {
                self.walk_expr(*object);
                if let weft_ir::MemberProp::Computed(computed) = property {
                    self.walk_expr(*computed);
                }
            }
            ExprKind::Call {
                callee, arguments, ..
            } => {
                self.walk_expr(*callee);
                for &argument in arguments {
                    self.walk_expr(argument);
                }
            }
        }
    }

    // Defined-name tracking

    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        self.scopes.push(FxHashSet::default());
        f(self);
        self.scopes.pop();
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn defined(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn read(&mut self, name: &str) {
        if !self.defined(name) && !self.options.predeclared_parameters.contains(name) {
            self.parameters.insert(name.to_string());
        }
    }
}
