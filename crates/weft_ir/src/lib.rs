//! Weft IR - shared data model for the weft prompt compiler.
//!
//! This crate holds everything the other crates agree on:
//! - `Span`: compact byte-offset source locations
//! - `Ast`/`Node`/`NodeId` and `ExprArena`/`Expr`/`ExprId`: immutable arenas
//!   produced by the parser and walked (never mutated) by the engine
//! - `Value`: runtime values with host-language coercion semantics
//! - `Message`/`ContentItem`/`Conversation`: the compiled output
//! - `Config`: the YAML-backed configuration object

mod ast;
mod config;
mod expr;
mod message;
mod span;
mod value;

pub use ast::{
    Ast, AttrList, AttrValue, Attribute, ContentTagKind, MessageTagKind, Node, NodeId, NodeKind,
    Tag, TagKind,
};
pub use config::{value_to_yaml, yaml_to_value, Config};
pub use expr::{
    AssignOp, BinaryOp, Expr, ExprArena, ExprId, ExprKind, LogicalOp, MemberProp, ObjectKey,
    UnaryOp, UpdateOp,
};
pub use message::{ContentItem, Conversation, Message, MessageRole};
pub use span::Span;
pub use value::{format_number, Callable, HostFn, Value};
