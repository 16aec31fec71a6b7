//! Template AST.
//!
//! The AST is an immutable arena of nodes addressed by `NodeId`. The compile
//! engine never mutates it; execution status for resumability lives in a
//! side table keyed by `NodeId` (owned by the engine, not this crate).

use smallvec::SmallVec;

use crate::{ExprArena, ExprId, Span};

/// Index of a node in the [`Ast`] arena.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        NodeId(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A parsed prompt document: node arena, expression arena, and root.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    exprs: ExprArena,
    root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    /// Add a node, returning its id.
    pub fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Get a node by id. Ids are only minted by `push_node`.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// The root fragment. Set exactly once by the parser.
    pub fn root(&self) -> NodeId {
        self.root.unwrap_or(NodeId::new(0))
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn exprs(&self) -> &ExprArena {
        &self.exprs
    }

    /// Add an expression, returning its id.
    pub fn push_expr(&mut self, expr: crate::Expr) -> ExprId {
        self.exprs.push(expr)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// A template node with its source span.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Node { kind, span }
    }
}

/// Template node kinds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Root (or nested) sequence of children.
    Fragment { children: Vec<NodeId> },
    /// A `---` fenced configuration block. `raw` is the YAML between fences.
    Config { raw: String },
    /// Literal text.
    Text { text: String },
    /// `{{ expr }}` interpolation.
    Interpolation { expr: ExprId },
    /// `{{#if cond}} … {{:else}} … {{/if}}`.
    If {
        condition: ExprId,
        children: Vec<NodeId>,
        else_children: Vec<NodeId>,
    },
    /// `{{#for item, index in expr}} … {{:else}} … {{/for}}`.
    For {
        iterable: ExprId,
        binding: String,
        index_binding: Option<String>,
        children: Vec<NodeId>,
        else_children: Vec<NodeId>,
    },
    /// An element tag (`<user>`, `<content>`, `<include>`, `<step>`, …).
    Tag(Tag),
}

/// Attribute list; tags rarely carry more than a few.
pub type AttrList = SmallVec<[Attribute; 4]>;

/// An element tag.
#[derive(Debug, Clone)]
pub struct Tag {
    pub kind: TagKind,
    pub attributes: AttrList,
    pub children: Vec<NodeId>,
}

impl Tag {
    /// Find an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Tag vocabulary. Unknown names are preserved so both the compile and the
/// metadata pass can report them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKind {
    Message(MessageTagKind),
    Content(ContentTagKind),
    /// `<include path="…"/>` — a reference to another prompt.
    Include,
    /// `<step/>` or `<chain-step/>` — a chain suspension point.
    Step,
    Unknown(String),
}

impl TagKind {
    /// Resolve a tag name to its kind.
    pub fn from_name(name: &str) -> TagKind {
        match name {
            "system" => TagKind::Message(MessageTagKind::System),
            "user" => TagKind::Message(MessageTagKind::User),
            "assistant" => TagKind::Message(MessageTagKind::Assistant),
            "tool" => TagKind::Message(MessageTagKind::Tool),
            "message" => TagKind::Message(MessageTagKind::Generic),
            "text" => TagKind::Content(ContentTagKind::Text),
            "image" => TagKind::Content(ContentTagKind::Image),
            "tool-call" => TagKind::Content(ContentTagKind::ToolCall),
            "tool-result" => TagKind::Content(ContentTagKind::ToolResult),
            "content" => TagKind::Content(ContentTagKind::Generic),
            "include" => TagKind::Include,
            "step" | "chain-step" => TagKind::Step,
            other => TagKind::Unknown(other.to_string()),
        }
    }

    /// The canonical tag name, for error messages.
    pub fn name(&self) -> &str {
        match self {
            TagKind::Message(MessageTagKind::System) => "system",
            TagKind::Message(MessageTagKind::User) => "user",
            TagKind::Message(MessageTagKind::Assistant) => "assistant",
            TagKind::Message(MessageTagKind::Tool) => "tool",
            TagKind::Message(MessageTagKind::Generic) => "message",
            TagKind::Content(ContentTagKind::Text) => "text",
            TagKind::Content(ContentTagKind::Image) => "image",
            TagKind::Content(ContentTagKind::ToolCall) => "tool-call",
            TagKind::Content(ContentTagKind::ToolResult) => "tool-result",
            TagKind::Content(ContentTagKind::Generic) => "content",
            TagKind::Include => "include",
            TagKind::Step => "step",
            TagKind::Unknown(name) => name,
        }
    }
}

/// Message tag sub-kinds. `Generic` is `<message role="…">`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MessageTagKind {
    System,
    User,
    Assistant,
    Tool,
    Generic,
}

/// Content tag sub-kinds. `Generic` is `<content type="…">`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ContentTagKind {
    Text,
    Image,
    ToolCall,
    ToolResult,
    Generic,
}

/// A tag attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub span: Span,
}

/// Attribute value forms.
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// Bare attribute (`isolated`), equivalent to boolean true.
    True,
    /// Quoted literal.
    Literal(String),
    /// `attr={{ expr }}`.
    Expr(ExprId),
}

impl AttrValue {
    /// The literal text of a static attribute, if it is one.
    pub fn as_static(&self) -> Option<&str> {
        match self {
            AttrValue::Literal(s) => Some(s),
            AttrValue::True | AttrValue::Expr(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_round_trip() {
        for name in [
            "system",
            "user",
            "assistant",
            "tool",
            "message",
            "text",
            "image",
            "tool-call",
            "tool-result",
            "content",
            "include",
            "step",
        ] {
            assert_eq!(TagKind::from_name(name).name(), name);
        }
    }

    #[test]
    fn chain_step_is_step_alias() {
        assert_eq!(TagKind::from_name("chain-step"), TagKind::Step);
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let kind = TagKind::from_name("blink");
        assert_eq!(kind, TagKind::Unknown("blink".to_string()));
        assert_eq!(kind.name(), "blink");
    }
}
