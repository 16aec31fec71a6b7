//! The compile engine: a single resumable walk of the template AST.
//!
//! One handler per node variant. Suspension is a tagged result
//! ([`Control::Suspended`]) early-returned through every handler rather than
//! an unwinding mechanism; handlers that own a scope frame record a pointer
//! to it in the node status on the way out, and restore it instead of
//! copying a fresh frame when the next pass re-enters the subtree.
//!
//! The idempotency rule: before dispatch, a node whose completion marker
//! equals the current pass marker is skipped whole. This is what keeps host
//! side effects from firing twice across the repeated passes a `Chain`
//! drives.

use tracing::{debug, trace};

use weft_diagnostic::{DiagResult, Diagnostic, ErrorCode};
use weft_ir::{
    Ast, AttrValue, Attribute, Config, ContentItem, ContentTagKind, ExprId, Message,
    MessageRole, MessageTagKind, Node, NodeId, NodeKind, Span, Tag, TagKind, Value,
};

use crate::errors::{
    config_outside_root, content_tag_inside_content, content_tag_without_type,
    did_not_resolve_references, invalid_config, invalid_message_role, invalid_static_attribute,
    invalid_tool_call_placement, message_tag_inside_message, message_tag_without_role,
    step_tag_inside_step, tool_call_tag_without_id, tool_call_without_name,
    tool_message_without_id, unknown_tag, variable_already_declared,
};
use crate::evaluator::Evaluator;
use crate::scope::{Scope, ScopeStash};
use crate::status::{Mark, StatusTable};

/// Flow result of resolving one node.
#[derive(Debug)]
pub(crate) enum Control {
    Done,
    /// An unanswered step tag was reached; carries the resolved step config.
    Suspended(Config),
}

/// The product of one compile pass.
#[derive(Debug)]
pub struct RunOutcome {
    /// False when the pass suspended at a step tag.
    pub completed: bool,
    /// Messages produced by this pass only.
    pub messages: Vec<Message>,
    /// Present when suspended: the suspending step's configuration.
    pub step_config: Option<Config>,
    /// Present when this pass executed the config block.
    pub global_config: Option<Config>,
    /// Snapshot of the scope for the next pass.
    pub scope_stash: ScopeStash,
}

/// A single compile pass over an AST.
///
/// The AST is shared and immutable; all cross-pass state lives in the
/// [`StatusTable`] and the scope stash.
pub struct Engine<'a> {
    ast: &'a Ast,
    statuses: &'a mut StatusTable,
    scope: Scope,
    messages: Vec<Message>,
    content: Vec<ContentItem>,
    text_buffer: String,
    global_config: Option<Config>,
    pending_response: Option<Vec<ContentItem>>,
    in_message: bool,
    in_content: bool,
    in_step: bool,
    at_root: bool,
    default_role: MessageRole,
}

impl<'a> Engine<'a> {
    pub fn new(ast: &'a Ast, statuses: &'a mut StatusTable, scope: Scope) -> Self {
        Engine {
            ast,
            statuses,
            scope,
            messages: Vec::new(),
            content: Vec::new(),
            text_buffer: String::new(),
            global_config: None,
            pending_response: None,
            in_message: false,
            in_content: false,
            in_step: false,
            at_root: true,
            default_role: MessageRole::System,
        }
    }

    /// Role for stray content outside message tags.
    #[must_use]
    pub fn with_default_role(mut self, role: MessageRole) -> Self {
        self.default_role = role;
        self
    }

    /// Supply the external response for the step that suspended last pass.
    #[must_use]
    pub fn with_pending_response(mut self, response: Option<Vec<ContentItem>>) -> Self {
        self.pending_response = response;
        self
    }

    /// Walk the document once.
    pub fn run(mut self) -> DiagResult<RunOutcome> {
        debug!("compile pass start");
        let control = self.resolve_node(self.ast.root(), Mark::ROOT)?;
        let completed = matches!(control, Control::Done);

        if completed {
            // Trailing stray content becomes one final message.
            self.flush_text();
            if !self.content.is_empty() {
                let content = std::mem::take(&mut self.content);
                let role = self.default_role.clone();
                let span = self.ast.node(self.ast.root()).span;
                self.push_message(role, content, span)?;
            }
        }

        let step_config = match control {
            Control::Suspended(config) => Some(config),
            Control::Done => None,
        };
        debug!(completed, messages = self.messages.len(), "compile pass end");
        Ok(RunOutcome {
            completed,
            messages: self.messages,
            step_config,
            global_config: self.global_config,
            scope_stash: self.scope.stash(),
        })
    }

    // Dispatch

    fn resolve_node(&mut self, id: NodeId, mark: Mark) -> DiagResult<Control> {
        if self.statuses.completed(id, mark) {
            trace!(?id, "skipping completed node");
            return Ok(Control::Done);
        }
        let ast = self.ast;
        let node = ast.node(id);
        let span = node.span;

        let control = match &node.kind {
            NodeKind::Fragment { children } => self.resolve_children(children, mark),
            NodeKind::Config { raw } => self.resolve_config(raw, span),
            NodeKind::Text { text } => {
                self.text_buffer.push_str(text);
                Ok(Control::Done)
            }
            NodeKind::Interpolation { expr } => self.resolve_interpolation(*expr),
            NodeKind::If {
                condition,
                children,
                else_children,
            } => self.resolve_if(id, *condition, children, else_children, mark),
            NodeKind::For { .. } => self.resolve_for(id, node, mark),
            NodeKind::Tag(tag) => match &tag.kind {
                TagKind::Message(kind) => self.resolve_message_tag(*kind, tag, span, mark),
                TagKind::Content(kind) => self.resolve_content_tag(*kind, tag, span, mark),
                TagKind::Include => Err(did_not_resolve_references(span)),
                TagKind::Step => self.resolve_step(tag, span, mark),
                TagKind::Unknown(name) => Err(unknown_tag(name, span)),
            },
        }?;

        if matches!(control, Control::Done) {
            self.statuses.status_mut(id).completed_as = Some(mark);
        }
        Ok(control)
    }

    fn resolve_children(&mut self, children: &[NodeId], mark: Mark) -> DiagResult<Control> {
        for &child in children {
            match self.resolve_node(child, mark)? {
                Control::Done => {}
                suspended => return Ok(suspended),
            }
        }
        Ok(Control::Done)
    }

    // Handlers

    fn resolve_config(&mut self, raw: &str, span: Span) -> DiagResult<Control> {
        if !self.at_root {
            return Err(config_outside_root(span));
        }
        if self.global_config.is_none() {
            let config = Config::from_yaml(raw).map_err(|e| invalid_config(&e, span))?;
            self.global_config = Some(config);
        }
        Ok(Control::Done)
    }

    fn resolve_interpolation(&mut self, expr: ExprId) -> DiagResult<Control> {
        let value = self.eval(expr)?;
        // Assignments act as statements in template position: they mutate
        // the scope but render nothing.
        if matches!(
            self.ast.exprs().get(expr).kind,
            weft_ir::ExprKind::Assign { .. }
        ) {
            return Ok(Control::Done);
        }
        if let Some(items) = content_items_from_value(&value) {
            self.flush_text();
            self.content.extend(items);
        } else {
            self.text_buffer.push_str(&value.to_display_string());
        }
        Ok(Control::Done)
    }

    fn resolve_if(
        &mut self,
        id: NodeId,
        condition: ExprId,
        children: &[NodeId],
        else_children: &[NodeId],
        mark: Mark,
    ) -> DiagResult<Control> {
        // Re-evaluated on every pass through an uncompleted node; the
        // untaken branch never runs.
        let taken = self.eval(condition)?.is_truthy();
        let branch = if taken { children } else { else_children };
        self.resolve_scoped_children(id, branch, mark)
    }

    /// Resolve children in a child scope frame, restoring a suspended
    /// frame when the previous pass stopped inside this subtree.
    fn resolve_scoped_children(
        &mut self,
        id: NodeId,
        children: &[NodeId],
        mark: Mark,
    ) -> DiagResult<Control> {
        let saved = self.statuses.status_mut(id).scope_pointer.take();
        let outer = self.scope.pointer();
        match saved {
            Some(pointer) => self.scope.restore(pointer),
            None => self.scope.push_child(),
        }
        let body = self.scope.pointer();

        let was_root = self.at_root;
        self.at_root = false;
        let control = self.resolve_children(children, mark);
        self.at_root = was_root;
        self.scope.restore(outer);

        let control = control?;
        if matches!(control, Control::Suspended(_)) {
            self.statuses.status_mut(id).scope_pointer = Some(body);
        }
        Ok(control)
    }

    fn resolve_for(&mut self, id: NodeId, node: &Node, mark: Mark) -> DiagResult<Control> {
        let NodeKind::For {
            iterable,
            binding,
            index_binding,
            children,
            else_children,
        } = &node.kind
        else {
            return Err(Diagnostic::error(
                ErrorCode::UnsupportedBaseNodeType,
                "Node cannot be resolved as a loop",
                node.span,
            ));
        };

        // Entering under a new mark (e.g. an inner loop in a fresh outer
        // iteration) invalidates any previous loop state.
        {
            let status = self.statuses.status_mut(id);
            if status.entered_under != Some(mark) {
                status.entered_under = Some(mark);
                status.loop_progress = 0;
                status.iteration_marks.clear();
                status.scope_pointer = None;
            }
        }

        let subject = self.eval(*iterable)?;
        let items = match iterable_items(&subject) {
            Some(items) if !items.is_empty() => items,
            // Non-iterable or empty: the else branch runs instead.
            _ => return self.resolve_scoped_children(id, else_children, mark),
        };

        if self.scope.exists(binding) {
            return Err(variable_already_declared(binding, node.span));
        }
        if let Some(index_name) = index_binding {
            if self.scope.exists(index_name) {
                return Err(variable_already_declared(index_name, node.span));
            }
        }

        let outer = self.scope.pointer();
        let was_root = self.at_root;
        self.at_root = false;
        let start = self.statuses.status_mut(id).loop_progress;
        let resume_pointer = self.statuses.status_mut(id).scope_pointer.take();

        let mut result = Control::Done;
        for (index, item) in items.into_iter().enumerate().skip(start) {
            let iteration_mark = self.iteration_mark(id, index);

            if index == start && resume_pointer.is_some() {
                // Same iteration that suspended: its frame still holds the
                // bindings, so re-enter it instead of re-copying.
                if let Some(pointer) = resume_pointer {
                    self.scope.restore(pointer);
                }
            } else {
                self.scope.restore(outer);
                self.scope.push_child();
                self.declare_loop_binding(binding, item, node.span)?;
                if let Some(index_name) = index_binding {
                    self.declare_loop_binding(
                        index_name,
                        Value::Number(index as f64),
                        node.span,
                    )?;
                }
            }
            let iteration_pointer = self.scope.pointer();

            match self.resolve_children(children, iteration_mark) {
                Err(error) => {
                    self.at_root = was_root;
                    self.scope.restore(outer);
                    return Err(error);
                }
                Ok(Control::Done) => {
                    self.statuses.status_mut(id).loop_progress = index + 1;
                }
                Ok(Control::Suspended(config)) => {
                    let status = self.statuses.status_mut(id);
                    status.loop_progress = index;
                    status.scope_pointer = Some(iteration_pointer);
                    result = Control::Suspended(config);
                    break;
                }
            }
        }

        self.at_root = was_root;
        self.scope.restore(outer);
        Ok(result)
    }

    fn declare_loop_binding(&mut self, name: &str, value: Value, span: Span) -> DiagResult<()> {
        self.scope
            .declare(name, value)
            .map_err(|_| variable_already_declared(name, span))
    }

    fn resolve_message_tag(
        &mut self,
        kind: MessageTagKind,
        tag: &Tag,
        span: Span,
        mark: Mark,
    ) -> DiagResult<Control> {
        if self.in_message || self.in_content {
            return Err(message_tag_inside_message(span));
        }

        let role = match kind {
            MessageTagKind::System => MessageRole::System,
            MessageTagKind::User => MessageRole::User,
            MessageTagKind::Assistant => MessageRole::Assistant,
            MessageTagKind::Tool => MessageRole::Tool,
            MessageTagKind::Generic => {
                let Some(attr) = tag.attribute("role") else {
                    return Err(message_tag_without_role(span));
                };
                let attr_span = attr.span;
                let name = self.attr_value(attr)?.to_display_string();
                match name.as_str() {
                    "system" | "user" | "assistant" | "tool" => MessageRole::parse(&name),
                    other => return Err(invalid_message_role(other, attr_span)),
                }
            }
        };

        let tool_id = if role == MessageRole::Tool {
            let Some(attr) = tag.attribute("id") else {
                return Err(tool_message_without_id(span));
            };
            Some(self.attr_value(attr)?.to_display_string())
        } else {
            None
        };
        let tool_name = match tag.attribute("name") {
            Some(attr) if tool_id.is_some() => Some(self.attr_value(attr)?.to_display_string()),
            _ => None,
        };

        // Stray content collected so far belongs to its own message.
        self.flush_text();
        if !self.content.is_empty() {
            let stray = std::mem::take(&mut self.content);
            let role = self.default_role.clone();
            self.push_message(role, stray, span)?;
        }

        self.in_message = true;
        let was_root = self.at_root;
        self.at_root = false;
        let control = self.resolve_children(&tag.children, mark);
        self.at_root = was_root;
        self.in_message = false;
        let control = control?;
        if matches!(control, Control::Suspended(_)) {
            return Ok(control);
        }

        self.flush_text();
        let mut content = std::mem::take(&mut self.content);
        if let Some(id) = tool_id {
            content = wrap_tool_result(content, id, tool_name.unwrap_or_default());
        }
        self.push_message(role, content, span)?;
        Ok(Control::Done)
    }

    fn resolve_content_tag(
        &mut self,
        kind: ContentTagKind,
        tag: &Tag,
        span: Span,
        mark: Mark,
    ) -> DiagResult<Control> {
        if self.in_content {
            return Err(content_tag_inside_content(span));
        }

        let resolved = match kind {
            ContentTagKind::Generic => {
                let Some(attr) = tag.attribute("type") else {
                    return Err(content_tag_without_type(None, span));
                };
                let attr_span = attr.span;
                let name = self.attr_value(attr)?.to_display_string();
                match name.as_str() {
                    "text" => ContentTagKind::Text,
                    "image" => ContentTagKind::Image,
                    "tool-call" => ContentTagKind::ToolCall,
                    "tool-result" => ContentTagKind::ToolResult,
                    other => return Err(content_tag_without_type(Some(other), attr_span)),
                }
            }
            concrete => concrete,
        };

        self.flush_text();
        self.in_content = true;
        let was_root = self.at_root;
        self.at_root = false;
        let control = self.resolve_children(&tag.children, mark);
        self.at_root = was_root;
        self.in_content = false;
        let control = control?;
        if matches!(control, Control::Suspended(_)) {
            return Ok(control);
        }

        let body = clean_text(&std::mem::take(&mut self.text_buffer));
        let item = match resolved {
            ContentTagKind::Text => ContentItem::Text { text: body },
            ContentTagKind::Image => ContentItem::Image { source: body },
            ContentTagKind::ToolCall => {
                let Some(id_attr) = tag.attribute("id") else {
                    return Err(tool_call_tag_without_id(span));
                };
                let Some(name_attr) = tag.attribute("name") else {
                    return Err(tool_call_without_name(span));
                };
                let id = self.attr_value(id_attr)?.to_display_string();
                let name = self.attr_value(name_attr)?.to_display_string();
                let arguments = match tag.attribute("arguments") {
                    Some(attr) => self.attr_value(attr)?.to_json(),
                    None if !body.is_empty() => serde_json::from_str(&body)
                        .unwrap_or(serde_json::Value::String(body)),
                    None => serde_json::Value::Object(serde_json::Map::new()),
                };
                ContentItem::ToolCall {
                    id,
                    name,
                    arguments,
                }
            }
            ContentTagKind::ToolResult => {
                let id = match tag.attribute("id") {
                    Some(attr) => self.attr_value(attr)?.to_display_string(),
                    None => String::new(),
                };
                let name = match tag.attribute("name") {
                    Some(attr) => self.attr_value(attr)?.to_display_string(),
                    None => String::new(),
                };
                let is_error = match tag.attribute("isError").or_else(|| tag.attribute("is-error"))
                {
                    Some(attr) => self.attr_value(attr)?.is_truthy(),
                    None => false,
                };
                let result = serde_json::from_str(&body)
                    .unwrap_or(serde_json::Value::String(body));
                ContentItem::ToolResult {
                    id,
                    name,
                    result,
                    is_error,
                }
            }
            ContentTagKind::Generic => {
                return Err(content_tag_without_type(None, span));
            }
        };
        self.content.push(item);
        Ok(Control::Done)
    }

    fn resolve_step(&mut self, tag: &Tag, span: Span, mark: Mark) -> DiagResult<Control> {
        if self.in_step {
            return Err(step_tag_inside_step(span));
        }

        self.in_step = true;
        let was_root = self.at_root;
        self.at_root = false;
        let control = self.resolve_children(&tag.children, mark);
        self.at_root = was_root;
        self.in_step = false;
        let control = control?;
        if matches!(control, Control::Suspended(_)) {
            return Ok(control);
        }

        let mut config = Config::new();
        let mut as_binding = None;
        for attr in &tag.attributes {
            if attr.name == "as" {
                match attr.value.as_static() {
                    Some(name) => as_binding = Some(name.to_string()),
                    None => return Err(invalid_static_attribute("as", attr.span)),
                }
                continue;
            }
            let value = self.attr_value(attr)?;
            config.insert(attr.name.clone(), value);
        }

        match self.pending_response.take() {
            Some(items) => {
                if let Some(name) = as_binding {
                    self.scope.set(&name, response_value(&items));
                }
                Ok(Control::Done)
            }
            None => {
                // Content leading into the step is this turn's request.
                self.flush_text();
                if !self.in_message && !self.content.is_empty() {
                    let content = std::mem::take(&mut self.content);
                    let role = self.default_role.clone();
                    self.push_message(role, content, span)?;
                }
                debug!("suspending at step tag");
                Ok(Control::Suspended(config))
            }
        }
    }

    // Output plumbing

    fn eval(&mut self, expr: ExprId) -> DiagResult<Value> {
        Evaluator::new(self.ast.exprs()).evaluate(expr, &mut self.scope)
    }

    fn attr_value(&mut self, attr: &Attribute) -> DiagResult<Value> {
        match &attr.value {
            AttrValue::True => Ok(Value::Bool(true)),
            AttrValue::Literal(text) => Ok(Value::string(text.clone())),
            AttrValue::Expr(expr) => self.eval(*expr),
        }
    }

    /// Flush buffered stray text into a text content item.
    fn flush_text(&mut self) {
        let raw = std::mem::take(&mut self.text_buffer);
        let cleaned = clean_text(&raw);
        if !cleaned.is_empty() {
            self.content.push(ContentItem::text(cleaned));
        }
    }

    fn push_message(
        &mut self,
        role: MessageRole,
        content: Vec<ContentItem>,
        span: Span,
    ) -> DiagResult<()> {
        if role != MessageRole::Assistant && content.iter().any(ContentItem::is_tool_call) {
            return Err(invalid_tool_call_placement(span));
        }
        if !content.is_empty() {
            self.messages.push(Message::new(role, content));
        }
        Ok(())
    }

    fn iteration_mark(&mut self, id: NodeId, index: usize) -> Mark {
        if let Some(mark) = self
            .statuses
            .status(id)
            .and_then(|s| s.iteration_marks.get(index).copied())
        {
            return mark;
        }
        let mark = self.statuses.allocate_mark();
        let status = self.statuses.status_mut(id);
        debug_assert_eq!(status.iteration_marks.len(), index);
        status.iteration_marks.push(mark);
        mark
    }
}

/// What a for-loop can iterate: array elements, or the characters of a
/// string. Everything else sends the loop to its else branch.
fn iterable_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => Some(s.chars().map(|c| Value::string(c.to_string())).collect()),
        _ => None,
    }
}

/// Wrap collected message content into a single tool-result item, unless the
/// content already carries one.
fn wrap_tool_result(content: Vec<ContentItem>, id: String, name: String) -> Vec<ContentItem> {
    if content
        .iter()
        .any(|item| matches!(item, ContentItem::ToolResult { .. }))
    {
        return content;
    }
    let text: String = content
        .iter()
        .filter_map(ContentItem::text_value)
        .collect();
    vec![ContentItem::ToolResult {
        id,
        name,
        result: serde_json::Value::String(text),
        is_error: false,
    }]
}

/// Values shaped like content items (or lists of them) inject as content.
fn content_items_from_value(value: &Value) -> Option<Vec<ContentItem>> {
    fn one(value: &Value) -> Option<ContentItem> {
        let Value::Object(map) = value else {
            return None;
        };
        if !matches!(map.get("type"), Some(Value::String(_))) {
            return None;
        }
        serde_json::from_value(value.to_json()).ok()
    }
    match value {
        Value::Object(_) => one(value).map(|item| vec![item]),
        Value::Array(items) if !items.is_empty() => {
            items.iter().map(one).collect::<Option<Vec<_>>>()
        }
        _ => None,
    }
}

/// The scope value a step response binds to: plain text for a single text
/// item, a list of content objects otherwise.
pub(crate) fn response_value(items: &[ContentItem]) -> Value {
    if let [single] = items {
        if let Some(text) = single.text_value() {
            return Value::string(text);
        }
    }
    Value::Array(
        items
            .iter()
            .map(|item| {
                serde_json::to_value(item)
                    .map(|json| Value::from_json(&json))
                    .unwrap_or(Value::Null)
            })
            .collect(),
    )
}

/// Strip the common leading indentation of non-empty lines, then trim the
/// edges. Applied only at flush time so interpolations within a line are
/// unaffected.
fn clean_text(raw: &str) -> String {
    let common = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let dedented: Vec<&str> = raw
        .lines()
        .map(|line| line.get(common..).unwrap_or_else(|| line.trim_start()))
        .collect();
    dedented.join("\n").trim().to_string()
}
