//! Template grammar.
//!
//! One function per construct: config fences, text runs, interpolations,
//! `{{#if}}`/`{{#for}}` blocks, and element tags. Block and tag bodies share
//! `parse_children`, which stops at whichever closer the caller owns.

use smallvec::SmallVec;

use weft_diagnostic::{DiagResult, Diagnostic, ErrorCode};
use weft_ir::{Ast, AttrValue, Attribute, ExprId, Node, NodeId, NodeKind, Tag, TagKind};

use crate::cursor::Cursor;
use crate::expr::ExprParser;

/// Parse template source into an AST.
pub fn parse(source: &str) -> DiagResult<Ast> {
    Parser::new(source).parse_document()
}

/// Why `parse_children` stopped.
enum Stop {
    Eof,
    /// Cursor is positioned at `</`.
    CloseTag,
    /// A `{{:else}}` was consumed.
    Else,
    /// A `{{/name}}` was consumed.
    BlockEnd(String),
}

struct Parser<'a> {
    cursor: Cursor<'a>,
    ast: Ast,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Parser {
            cursor: Cursor::new(source),
            ast: Ast::new(),
        }
    }

    fn parse_document(mut self) -> DiagResult<Ast> {
        let (children, stop) = self.parse_children()?;
        match stop {
            Stop::Eof => {}
            Stop::CloseTag => {
                return Err(self.error_here("Unexpected closing tag"));
            }
            Stop::Else => {
                return Err(self.error_here("Unexpected {{:else}} outside a block"));
            }
            Stop::BlockEnd(name) => {
                return Err(self.error_here(format!("Unexpected {{{{/{name}}}}}")));
            }
        }
        let span = weft_ir::Span::from_range(0..self.cursor.source().len());
        let root = self
            .ast
            .push_node(Node::new(NodeKind::Fragment { children }, span));
        self.ast.set_root(root);
        Ok(self.ast)
    }

    fn parse_children(&mut self) -> DiagResult<(Vec<NodeId>, Stop)> {
        let mut children = Vec::new();
        loop {
            if self.cursor.is_eof() {
                return Ok((children, Stop::Eof));
            }
            if self.cursor.starts_with("</") {
                return Ok((children, Stop::CloseTag));
            }
            if let Some(stop) = self.try_block_close()? {
                return Ok((children, stop));
            }
            if self.at_config_fence() {
                children.push(self.parse_config()?);
                continue;
            }
            if self.cursor.starts_with("{{") {
                children.push(self.parse_mustache()?);
                continue;
            }
            if self.at_tag_open() {
                children.push(self.parse_tag()?);
                continue;
            }
            children.push(self.parse_text());
        }
    }

    // Lookahead helpers

    fn at_tag_open(&self) -> bool {
        self.cursor.peek() == Some('<')
            && self
                .cursor
                .peek_second()
                .is_some_and(|c| c.is_ascii_alphabetic())
    }

    /// A `---` fence opens a config block only when a closing fence exists;
    /// a lone horizontal rule stays text.
    fn at_config_fence(&self) -> bool {
        if !self.cursor.at_line_start() {
            return false;
        }
        let rest = self.cursor.rest();
        let (first, remainder) = split_line(rest);
        is_fence_line(first) && remainder.lines().any(is_fence_line)
    }

    fn at_special(&self) -> bool {
        self.cursor.starts_with("{{")
            || self.cursor.starts_with("</")
            || self.at_tag_open()
            || self.at_config_fence()
    }

    /// Consume `{{:else}}` or `{{/name}}` if the cursor sits on one.
    fn try_block_close(&mut self) -> DiagResult<Option<Stop>> {
        if !self.cursor.starts_with("{{") {
            return Ok(None);
        }
        let save = self.cursor.pos();
        self.cursor.eat("{{");
        self.cursor.skip_ws();

        if self.cursor.eat(":") {
            match self.cursor.eat_name() {
                Some("else") => {
                    self.cursor.skip_ws();
                    if !self.cursor.eat("}}") {
                        return Err(self.error_here("Expected '}}' after {{:else"));
                    }
                    return Ok(Some(Stop::Else));
                }
                Some(other) => {
                    let message = format!("Unknown block clause ':{other}'");
                    return Err(self.error_here(message));
                }
                None => return Err(self.error_here("Expected a name after '{{:'")),
            }
        }

        if self.cursor.eat("/") {
            let Some(name) = self.cursor.eat_name() else {
                return Err(self.error_here("Expected a block name after '{{/'"));
            };
            let name = name.to_string();
            self.cursor.skip_ws();
            if !self.cursor.eat("}}") {
                return Err(self.error_here(format!("Expected '}}}}' after {{{{/{name}")));
            }
            return Ok(Some(Stop::BlockEnd(name)));
        }

        self.cursor.rewind(save);
        Ok(None)
    }

    // Constructs

    fn parse_text(&mut self) -> NodeId {
        let start = self.cursor.pos();
        while !self.cursor.is_eof() && !self.at_special() {
            self.cursor.bump();
        }
        let text = self.cursor.source()[start..self.cursor.pos()].to_string();
        let span = self.cursor.span_from(start);
        self.ast.push_node(Node::new(NodeKind::Text { text }, span))
    }

    fn parse_config(&mut self) -> DiagResult<NodeId> {
        let start = self.cursor.pos();
        self.consume_line();
        let raw_start = self.cursor.pos();
        loop {
            if self.cursor.is_eof() {
                return Err(self.error_here("Unterminated config block"));
            }
            let (line, _) = split_line(self.cursor.rest());
            if is_fence_line(line) {
                let raw = self.cursor.source()[raw_start..self.cursor.pos()].to_string();
                self.consume_line();
                let span = self.cursor.span_from(start);
                return Ok(self
                    .ast
                    .push_node(Node::new(NodeKind::Config { raw }, span)));
            }
            self.consume_line();
        }
    }

    fn consume_line(&mut self) {
        let (line, _) = split_line(self.cursor.rest());
        let advance = self.cursor.pos() + line.len();
        self.cursor.set_pos(advance);
        self.cursor.eat("\n");
    }

    /// `{{ … }}` — either a block opener (`{{#if}}`, `{{#for}}`) or an
    /// interpolation. Block closers are consumed by `try_block_close`.
    fn parse_mustache(&mut self) -> DiagResult<NodeId> {
        let start = self.cursor.pos();
        self.cursor.eat("{{");
        self.cursor.skip_ws();

        if self.cursor.eat("#") {
            return match self.cursor.eat_name() {
                Some("if") => self.parse_if_block(start),
                Some("for") => self.parse_for_block(start),
                Some(other) => {
                    let message = format!("Unknown block '#{other}'");
                    Err(self.error_here(message))
                }
                None => Err(self.error_here("Expected a block name after '{{#'")),
            };
        }

        let expr = self.parse_embedded_expr()?;
        self.expect_close_braces()?;
        let span = self.cursor.span_from(start);
        Ok(self
            .ast
            .push_node(Node::new(NodeKind::Interpolation { expr }, span)))
    }

    fn parse_if_block(&mut self, start: usize) -> DiagResult<NodeId> {
        let condition = self.parse_embedded_expr()?;
        self.expect_close_braces()?;

        let (children, stop) = self.parse_children()?;
        let else_children = self.finish_block("if", stop)?;
        let span = self.cursor.span_from(start);
        Ok(self.ast.push_node(Node::new(
            NodeKind::If {
                condition,
                children,
                else_children,
            },
            span,
        )))
    }

    fn parse_for_block(&mut self, start: usize) -> DiagResult<NodeId> {
        let (binding, index_binding, iterable) = {
            let source = self.cursor.source();
            let pos = self.cursor.pos();
            let mut parser = ExprParser::new(source, pos, &mut self.ast)?;
            let header = parser.parse_for_header()?;
            let end = parser.stop_offset();
            self.cursor.set_pos(end);
            header
        };
        self.expect_close_braces()?;

        let (children, stop) = self.parse_children()?;
        let else_children = self.finish_block("for", stop)?;
        let span = self.cursor.span_from(start);
        Ok(self.ast.push_node(Node::new(
            NodeKind::For {
                iterable,
                binding,
                index_binding,
                children,
                else_children,
            },
            span,
        )))
    }

    /// Handle the stop of a block body: an optional `{{:else}}` section
    /// followed by the matching `{{/name}}`.
    fn finish_block(&mut self, name: &str, stop: Stop) -> DiagResult<Vec<NodeId>> {
        match stop {
            Stop::BlockEnd(end) if end == name => Ok(Vec::new()),
            Stop::Else => {
                let (else_children, stop) = self.parse_children()?;
                match stop {
                    Stop::BlockEnd(end) if end == name => Ok(else_children),
                    Stop::Else => Err(self.error_here(format!("Duplicate {{{{:else}}}} in #{name}"))),
                    _ => Err(self.error_here(format!("Expected {{{{/{name}}}}}"))),
                }
            }
            _ => Err(self.error_here(format!("Expected {{{{/{name}}}}}"))),
        }
    }

    fn parse_tag(&mut self) -> DiagResult<NodeId> {
        let start = self.cursor.pos();
        self.cursor.eat("<");
        let Some(name) = self.cursor.eat_name() else {
            return Err(self.error_here("Expected a tag name"));
        };
        let name = name.to_string();

        let mut attributes: weft_ir::AttrList = SmallVec::new();
        let self_closing = loop {
            self.cursor.skip_ws();
            if self.cursor.eat("/>") {
                break true;
            }
            if self.cursor.eat(">") {
                break false;
            }
            if self.cursor.is_eof() {
                return Err(self.error_here(format!("Unclosed tag <{name}>")));
            }
            attributes.push(self.parse_attribute()?);
        };

        let children = if self_closing {
            Vec::new()
        } else {
            let (children, stop) = self.parse_children()?;
            match stop {
                Stop::CloseTag => {
                    self.cursor.eat("</");
                    let close = self.cursor.eat_name().unwrap_or_default().to_string();
                    if close != name {
                        return Err(self.error_here(format!(
                            "Mismatched closing tag: expected </{name}>, found </{close}>"
                        )));
                    }
                    self.cursor.skip_ws();
                    if !self.cursor.eat(">") {
                        return Err(self.error_here(format!("Expected '>' after </{name}")));
                    }
                    children
                }
                Stop::Eof => {
                    return Err(self.error_here(format!("Unclosed tag <{name}>")));
                }
                Stop::Else | Stop::BlockEnd(_) => {
                    return Err(self.error_here(format!(
                        "Block close inside <{name}> without a matching opener"
                    )));
                }
            }
        };

        let span = self.cursor.span_from(start);
        Ok(self.ast.push_node(Node::new(
            NodeKind::Tag(Tag {
                kind: TagKind::from_name(&name),
                attributes,
                children,
            }),
            span,
        )))
    }

    fn parse_attribute(&mut self) -> DiagResult<Attribute> {
        let start = self.cursor.pos();
        let Some(name) = self.cursor.eat_name() else {
            return Err(self.error_here("Expected an attribute name"));
        };
        let name = name.to_string();

        let value = if self.cursor.eat("=") {
            if let Some(quote) = self.peek_quote() {
                self.parse_quoted_literal(quote)?
            } else if self.cursor.eat("{{") {
                self.cursor.skip_ws();
                let expr = self.parse_embedded_expr()?;
                self.expect_close_braces()?;
                AttrValue::Expr(expr)
            } else {
                self.parse_bare_literal()?
            }
        } else {
            AttrValue::True
        };

        Ok(Attribute {
            name,
            value,
            span: self.cursor.span_from(start),
        })
    }

    fn peek_quote(&self) -> Option<char> {
        match self.cursor.peek() {
            Some(c @ ('"' | '\'')) => Some(c),
            _ => None,
        }
    }

    fn parse_quoted_literal(&mut self, quote: char) -> DiagResult<AttrValue> {
        self.cursor.bump();
        let start = self.cursor.pos();
        loop {
            match self.cursor.peek() {
                Some(c) if c == quote => {
                    let text = self.cursor.source()[start..self.cursor.pos()].to_string();
                    self.cursor.bump();
                    return Ok(AttrValue::Literal(text));
                }
                Some(_) => {
                    self.cursor.bump();
                }
                None => return Err(self.error_here("Unterminated attribute value")),
            }
        }
    }

    fn parse_bare_literal(&mut self) -> DiagResult<AttrValue> {
        let start = self.cursor.pos();
        while let Some(c) = self.cursor.peek() {
            let closes = c == '>' || (c == '/' && self.cursor.peek_second() == Some('>'));
            if c.is_whitespace() || closes {
                break;
            }
            self.cursor.bump();
        }
        if self.cursor.pos() == start {
            return Err(self.error_here("Expected an attribute value"));
        }
        let text = self.cursor.source()[start..self.cursor.pos()].to_string();
        Ok(AttrValue::Literal(text))
    }

    // Expression embedding

    fn parse_embedded_expr(&mut self) -> DiagResult<ExprId> {
        let source = self.cursor.source();
        let pos = self.cursor.pos();
        let mut parser = ExprParser::new(source, pos, &mut self.ast)?;
        let expr = parser.parse_expression()?;
        let end = parser.stop_offset();
        self.cursor.set_pos(end);
        Ok(expr)
    }

    fn expect_close_braces(&mut self) -> DiagResult<()> {
        self.cursor.skip_ws();
        if self.cursor.eat("}}") {
            Ok(())
        } else {
            Err(self.error_here("Expected '}}'"))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(ErrorCode::ParseError, message, self.cursor.here())
    }
}

fn split_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(i) => (&text[..i], &text[i + 1..]),
        None => (text, ""),
    }
}

fn is_fence_line(line: &str) -> bool {
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.starts_with("---") && line[3..].trim().is_empty()
}
