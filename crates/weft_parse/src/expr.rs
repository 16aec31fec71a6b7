//! Expression lexer and parser.
//!
//! Expressions are embedded in template syntax (`{{ expr }}`, block headers,
//! attribute values), so the parser lexes lazily from an absolute source
//! offset and stops at the first token that cannot continue the expression —
//! the template parser then resumes at that offset and expects `}}`.

use logos::Logos;

use weft_diagnostic::{DiagResult, Diagnostic, ErrorCode};
use weft_ir::{
    AssignOp, Ast, BinaryOp, Expr, ExprId, ExprKind, LogicalOp, MemberProp, ObjectKey, Span,
    UnaryOp, UpdateOp,
};

fn lex_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse::<f64>().ok()
}

fn lex_hex(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    i64::from_str_radix(&lex.slice()[2..], 16)
        .ok()
        .map(|n| n as f64)
}

fn lex_string(lex: &mut logos::Lexer<'_, Token>) -> String {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Expression tokens.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", lex_number)]
    #[regex(r"0[xX][0-9a-fA-F]+", lex_hex)]
    Number(f64),

    #[regex(r#""([^"\\]|\\.)*""#, lex_string)]
    #[regex(r#"'([^'\\]|\\.)*'"#, lex_string)]
    Str(String),

    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("undefined")]
    Undefined,
    #[token("typeof")]
    TypeOf,
    #[token("void")]
    Void,
    #[token("in")]
    In,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("?.")]
    OptChain,
    #[token("?")]
    Question,

    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("===")]
    EqEqEq,
    #[token("==")]
    EqEq,
    #[token("!==")]
    NotEqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<<")]
    Shl,
    #[token(">>>")]
    UShr,
    #[token(">>")]
    Shr,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    Nullish,

    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,

    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
}

/// Lazily-lexing expression parser over a suffix of the template source.
pub struct ExprParser<'a, 'ast> {
    lexer: logos::Lexer<'a, Token>,
    base: usize,
    current: Option<(Token, Span)>,
    ast: &'ast mut Ast,
}

impl<'a, 'ast> ExprParser<'a, 'ast> {
    /// Start parsing at absolute byte offset `start` of `source`.
    pub fn new(source: &'a str, start: usize, ast: &'ast mut Ast) -> DiagResult<Self> {
        let mut parser = ExprParser {
            lexer: Token::lexer(&source[start..]),
            base: start,
            current: None,
            ast,
        };
        parser.advance()?;
        Ok(parser)
    }

    /// Absolute byte offset where the first unconsumed token starts.
    ///
    /// The template parser resumes from here (e.g. to consume `}}`).
    pub fn stop_offset(&self) -> usize {
        match &self.current {
            Some((_, span)) => span.start as usize,
            None => self.base + self.lexer.source().len(),
        }
    }

    fn advance(&mut self) -> DiagResult<()> {
        self.current = match self.lexer.next() {
            Some(Ok(token)) => {
                let range = self.lexer.span();
                let span = Span::from_range(self.base + range.start..self.base + range.end);
                Some((token, span))
            }
            Some(Err(())) => {
                let range = self.lexer.span();
                let span = Span::from_range(self.base + range.start..self.base + range.end);
                return Err(Diagnostic::error(
                    ErrorCode::ParseError,
                    format!("Unexpected character '{}'", self.lexer.slice()),
                    span,
                ));
            }
            None => None,
        };
        Ok(())
    }

    fn current_span(&self) -> Span {
        match &self.current {
            Some((_, span)) => *span,
            None => {
                let end = self.base + self.lexer.source().len();
                Span::from_range(end..end)
            }
        }
    }

    fn eof_error(&self) -> Diagnostic {
        Diagnostic::error(
            ErrorCode::ParseError,
            "Unexpected end of expression",
            self.current_span(),
        )
    }

    fn push(&mut self, kind: ExprKind, span: Span) -> ExprId {
        self.ast.push_expr(Expr::new(kind, span))
    }

    fn span_of(&self, id: ExprId) -> Span {
        self.ast.exprs().get(id).span
    }

    /// Consume the current token if it matches.
    fn eat(&mut self, token: &Token) -> DiagResult<bool> {
        if self.current.as_ref().is_some_and(|(t, _)| t == token) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> DiagResult<Span> {
        match &self.current {
            Some((t, span)) if t == token => {
                let span = *span;
                self.advance()?;
                Ok(span)
            }
            Some((t, span)) => Err(Diagnostic::error(
                ErrorCode::ParseError,
                format!("Expected {what}, found {t:?}"),
                *span,
            )),
            None => Err(self.eof_error()),
        }
    }

    /// Parse a full expression (assignment is the loosest level).
    pub fn parse_expression(&mut self) -> DiagResult<ExprId> {
        let lhs = self.parse_conditional()?;

        let op = match &self.current {
            Some((Token::Assign, _)) => Some(AssignOp::Assign),
            Some((Token::PlusAssign, _)) => Some(AssignOp::Add),
            Some((Token::MinusAssign, _)) => Some(AssignOp::Sub),
            Some((Token::StarAssign, _)) => Some(AssignOp::Mul),
            Some((Token::SlashAssign, _)) => Some(AssignOp::Div),
            Some((Token::PercentAssign, _)) => Some(AssignOp::Rem),
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };

        self.check_assign_target(lhs)?;
        self.advance()?;
        let value = self.parse_expression()?;
        let span = self.span_of(lhs).merge(self.span_of(value));
        Ok(self.push(
            ExprKind::Assign {
                op,
                target: lhs,
                value,
            },
            span,
        ))
    }

    /// Assignment targets are identifiers or member chains rooted at an
    /// identifier. Optional chaining is rejected outright.
    fn check_assign_target(&self, target: ExprId) -> DiagResult<()> {
        let expr = self.ast.exprs().get(target);
        match &expr.kind {
            ExprKind::Ident(_) => Ok(()),
            ExprKind::Member {
                object, optional, ..
            } => {
                if *optional {
                    Err(Diagnostic::error(
                        ErrorCode::InvalidAssignment,
                        "Optional chaining cannot appear in an assignment target",
                        expr.span,
                    ))
                } else {
                    self.check_assign_target(*object)
                }
            }
            _ => Err(Diagnostic::error(
                ErrorCode::InvalidAssignment,
                "Invalid assignment target",
                expr.span,
            )),
        }
    }

    fn parse_conditional(&mut self) -> DiagResult<ExprId> {
        let condition = self.parse_logical_or()?;
        if !self.eat(&Token::Question)? {
            return Ok(condition);
        }
        let consequent = self.parse_expression()?;
        self.expect(&Token::Colon, "':'")?;
        let alternate = self.parse_expression()?;
        let span = self.span_of(condition).merge(self.span_of(alternate));
        Ok(self.push(
            ExprKind::Conditional {
                condition,
                consequent,
                alternate,
            },
            span,
        ))
    }

    fn parse_logical_or(&mut self) -> DiagResult<ExprId> {
        let mut lhs = self.parse_logical_and()?;
        loop {
            let op = match &self.current {
                Some((Token::OrOr, _)) => LogicalOp::Or,
                Some((Token::Nullish, _)) => LogicalOp::Nullish,
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_logical_and()?;
            let span = self.span_of(lhs).merge(self.span_of(rhs));
            lhs = self.push(ExprKind::Logical { op, lhs, rhs }, span);
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> DiagResult<ExprId> {
        let mut lhs = self.parse_binary(0)?;
        while self.current.as_ref().is_some_and(|(t, _)| *t == Token::AndAnd) {
            self.advance()?;
            let rhs = self.parse_binary(0)?;
            let span = self.span_of(lhs).merge(self.span_of(rhs));
            lhs = self.push(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    lhs,
                    rhs,
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn binary_op(&self) -> Option<(u8, BinaryOp)> {
        let token = self.current.as_ref().map(|(t, _)| t)?;
        Some(match token {
            Token::Pipe => (1, BinaryOp::BitOr),
            Token::Caret => (2, BinaryOp::BitXor),
            Token::Amp => (3, BinaryOp::BitAnd),
            Token::EqEq => (4, BinaryOp::Eq),
            Token::NotEq => (4, BinaryOp::NotEq),
            Token::EqEqEq => (4, BinaryOp::StrictEq),
            Token::NotEqEq => (4, BinaryOp::StrictNotEq),
            Token::Lt => (5, BinaryOp::Lt),
            Token::LtEq => (5, BinaryOp::LtEq),
            Token::Gt => (5, BinaryOp::Gt),
            Token::GtEq => (5, BinaryOp::GtEq),
            Token::In => (5, BinaryOp::In),
            Token::Shl => (6, BinaryOp::Shl),
            Token::Shr => (6, BinaryOp::Shr),
            Token::UShr => (6, BinaryOp::UShr),
            Token::Plus => (7, BinaryOp::Add),
            Token::Minus => (7, BinaryOp::Sub),
            Token::Star => (8, BinaryOp::Mul),
            Token::Slash => (8, BinaryOp::Div),
            Token::Percent => (8, BinaryOp::Rem),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> DiagResult<ExprId> {
        let mut lhs = self.parse_unary()?;
        while let Some((bp, op)) = self.binary_op() {
            if bp < min_bp {
                break;
            }
            self.advance()?;
            let rhs = self.parse_binary(bp + 1)?;
            let span = self.span_of(lhs).merge(self.span_of(rhs));
            lhs = self.push(ExprKind::Binary { op, lhs, rhs }, span);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> DiagResult<ExprId> {
        let (op, span) = match &self.current {
            Some((Token::Minus, span)) => (Some(UnaryOp::Neg), *span),
            Some((Token::Plus, span)) => (Some(UnaryOp::Plus), *span),
            Some((Token::Bang, span)) => (Some(UnaryOp::Not), *span),
            Some((Token::Tilde, span)) => (Some(UnaryOp::BitNot), *span),
            Some((Token::TypeOf, span)) => (Some(UnaryOp::TypeOf), *span),
            Some((Token::Void, span)) => (Some(UnaryOp::Void), *span),
            Some((Token::PlusPlus | Token::MinusMinus, span)) => (None, *span),
            _ => return self.parse_postfix(),
        };

        if let Some(op) = op {
            self.advance()?;
            let operand = self.parse_unary()?;
            let span = span.merge(self.span_of(operand));
            return Ok(self.push(ExprKind::Unary { op, operand }, span));
        }

        // Prefix update
        let op = match &self.current {
            Some((Token::PlusPlus, _)) => UpdateOp::Inc,
            _ => UpdateOp::Dec,
        };
        self.advance()?;
        let target = self.parse_unary()?;
        self.check_update_target(target)?;
        let span = span.merge(self.span_of(target));
        Ok(self.push(
            ExprKind::Update {
                op,
                prefix: true,
                target,
            },
            span,
        ))
    }

    fn check_update_target(&self, target: ExprId) -> DiagResult<()> {
        let expr = self.ast.exprs().get(target);
        match &expr.kind {
            ExprKind::Ident(_) | ExprKind::Member { optional: false, .. } => Ok(()),
            _ => Err(Diagnostic::error(
                ErrorCode::ParseError,
                "Invalid update target",
                expr.span,
            )),
        }
    }

    fn parse_postfix(&mut self) -> DiagResult<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            match &self.current {
                Some((Token::Dot, _)) => {
                    self.advance()?;
                    expr = self.parse_member(expr, false)?;
                }
                Some((Token::OptChain, _)) => {
                    self.advance()?;
                    expr = self.parse_member(expr, true)?;
                }
                Some((Token::LBracket, _)) => {
                    self.advance()?;
                    let property = self.parse_expression()?;
                    let close = self.expect(&Token::RBracket, "']'")?;
                    let span = self.span_of(expr).merge(close);
                    expr = self.push(
                        ExprKind::Member {
                            object: expr,
                            property: MemberProp::Computed(property),
                            optional: false,
                        },
                        span,
                    );
                }
                Some((Token::LParen, _)) => {
                    expr = self.parse_call(expr, false)?;
                }
                Some((Token::PlusPlus | Token::MinusMinus, op_span)) => {
                    let op = if matches!(self.current, Some((Token::PlusPlus, _))) {
                        UpdateOp::Inc
                    } else {
                        UpdateOp::Dec
                    };
                    let span = self.span_of(expr).merge(*op_span);
                    self.advance()?;
                    self.check_update_target(expr)?;
                    expr = self.push(
                        ExprKind::Update {
                            op,
                            prefix: false,
                            target: expr,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Member access after `.` or `?.`; `?.(` and `?.[` are supported too.
    fn parse_member(&mut self, object: ExprId, optional: bool) -> DiagResult<ExprId> {
        match self.current.clone() {
            Some((Token::Ident(name), span)) => {
                self.advance()?;
                let span = self.span_of(object).merge(span);
                Ok(self.push(
                    ExprKind::Member {
                        object,
                        property: MemberProp::Ident(name),
                        optional,
                    },
                    span,
                ))
            }
            Some((Token::LBracket, _)) if optional => {
                self.advance()?;
                let property = self.parse_expression()?;
                let close = self.expect(&Token::RBracket, "']'")?;
                let span = self.span_of(object).merge(close);
                Ok(self.push(
                    ExprKind::Member {
                        object,
                        property: MemberProp::Computed(property),
                        optional,
                    },
                    span,
                ))
            }
            Some((Token::LParen, _)) if optional => self.parse_call(object, true),
            Some((_, span)) => Err(Diagnostic::error(
                ErrorCode::ParseError,
                "Expected property name",
                span,
            )),
            None => Err(self.eof_error()),
        }
    }

    fn parse_call(&mut self, callee: ExprId, optional: bool) -> DiagResult<ExprId> {
        self.expect(&Token::LParen, "'('")?;
        let mut arguments = Vec::new();
        if !self.current.as_ref().is_some_and(|(t, _)| *t == Token::RParen) {
            loop {
                arguments.push(self.parse_expression()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        let close = self.expect(&Token::RParen, "')'")?;
        let span = self.span_of(callee).merge(close);
        Ok(self.push(
            ExprKind::Call {
                callee,
                arguments,
                optional,
            },
            span,
        ))
    }

    fn parse_primary(&mut self) -> DiagResult<ExprId> {
        let Some((token, span)) = self.current.clone() else {
            return Err(self.eof_error());
        };
        match token {
            Token::Number(n) => {
                self.advance()?;
                Ok(self.push(ExprKind::Number(n), span))
            }
            Token::Str(s) => {
                self.advance()?;
                Ok(self.push(ExprKind::String(s), span))
            }
            Token::True => {
                self.advance()?;
                Ok(self.push(ExprKind::Bool(true), span))
            }
            Token::False => {
                self.advance()?;
                Ok(self.push(ExprKind::Bool(false), span))
            }
            Token::Null => {
                self.advance()?;
                Ok(self.push(ExprKind::Null, span))
            }
            Token::Undefined => {
                self.advance()?;
                Ok(self.push(ExprKind::Undefined, span))
            }
            Token::Ident(name) => {
                self.advance()?;
                Ok(self.push(ExprKind::Ident(name), span))
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => self.parse_array(span),
            Token::LBrace => self.parse_object(span),
            other => Err(Diagnostic::error(
                ErrorCode::ParseError,
                format!("Expected expression, found {other:?}"),
                span,
            )),
        }
    }

    fn parse_array(&mut self, open: Span) -> DiagResult<ExprId> {
        self.advance()?;
        let mut items = Vec::new();
        loop {
            if self.current.as_ref().is_some_and(|(t, _)| *t == Token::RBracket) {
                break;
            }
            items.push(self.parse_expression()?);
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        let close = self.expect(&Token::RBracket, "']'")?;
        Ok(self.push(ExprKind::Array(items), open.merge(close)))
    }

    fn parse_object(&mut self, open: Span) -> DiagResult<ExprId> {
        self.advance()?;
        let mut properties = Vec::new();
        loop {
            if self.current.as_ref().is_some_and(|(t, _)| *t == Token::RBrace) {
                break;
            }
            let (key, key_span) = match self.current.clone() {
                Some((Token::Ident(name), span)) => {
                    self.advance()?;
                    (ObjectKey::Ident(name), span)
                }
                Some((Token::Str(s), span)) => {
                    self.advance()?;
                    (ObjectKey::String(s), span)
                }
                Some((t, span)) => {
                    return Err(Diagnostic::error(
                        ErrorCode::ParseError,
                        format!("Expected property key, found {t:?}"),
                        span,
                    ))
                }
                None => return Err(self.eof_error()),
            };
            let value = if self.eat(&Token::Colon)? {
                self.parse_expression()?
            } else {
                // Shorthand `{x}` binds the identifier of the same name.
                let name = key.as_str().to_string();
                self.push(ExprKind::Ident(name), key_span)
            };
            properties.push((key, value));
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        let close = self.expect(&Token::RBrace, "'}'")?;
        Ok(self.push(ExprKind::Object(properties), open.merge(close)))
    }

    /// Parse a `{{#for item, index in iterable}}` header after the `#for`.
    pub fn parse_for_header(&mut self) -> DiagResult<(String, Option<String>, ExprId)> {
        let binding = self.expect_ident("loop binding")?;
        let index_binding = if self.eat(&Token::Comma)? {
            Some(self.expect_ident("index binding")?)
        } else {
            None
        };
        match &self.current {
            Some((Token::In, _)) => self.advance()?,
            Some((t, span)) => {
                return Err(Diagnostic::error(
                    ErrorCode::ParseError,
                    format!("Expected 'in', found {t:?}"),
                    *span,
                ))
            }
            None => return Err(self.eof_error()),
        }
        let iterable = self.parse_expression()?;
        Ok((binding, index_binding, iterable))
    }

    fn expect_ident(&mut self, what: &str) -> DiagResult<String> {
        match self.current.clone() {
            Some((Token::Ident(name), _)) => {
                self.advance()?;
                Ok(name)
            }
            Some((t, span)) => Err(Diagnostic::error(
                ErrorCode::ParseError,
                format!("Expected {what}, found {t:?}"),
                span,
            )),
            None => Err(self.eof_error()),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> (Ast, ExprId) {
        let mut ast = Ast::new();
        let mut parser = ExprParser::new(source, 0, &mut ast).unwrap();
        let id = parser.parse_expression().unwrap();
        (ast, id)
    }

    #[test]
    fn precedence_mul_over_add() {
        let (ast, id) = parse_one("2+3*4");
        let ExprKind::Binary { op, rhs, .. } = &ast.exprs().get(id).kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            ast.exprs().get(*rhs).kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn optional_chain_assignment_is_rejected() {
        let mut ast = Ast::new();
        let mut parser = ExprParser::new("a?.b = 1", 0, &mut ast).unwrap();
        let err = parser.parse_expression().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAssignment);
    }

    #[test]
    fn object_literal_with_shorthand() {
        let (ast, id) = parse_one("{a, b: 2}");
        let ExprKind::Object(props) = &ast.exprs().get(id).kind else {
            panic!("expected object");
        };
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].0.as_str(), "a");
        assert!(matches!(
            ast.exprs().get(props[0].1).kind,
            ExprKind::Ident(ref n) if n == "a"
        ));
    }

    #[test]
    fn stops_at_closing_braces() {
        let mut ast = Ast::new();
        let mut parser = ExprParser::new("{a: 1} }} tail", 0, &mut ast).unwrap();
        parser.parse_expression().unwrap();
        // The first unconsumed token is the first closing brace.
        assert_eq!(parser.stop_offset(), 7);
    }

    #[test]
    fn spans_are_absolute() {
        let mut ast = Ast::new();
        let mut parser = ExprParser::new("xx foo", 3, &mut ast).unwrap();
        let id = parser.parse_expression().unwrap();
        assert_eq!(ast.exprs().get(id).span, Span::new(3, 6));
    }

    #[test]
    fn for_header_with_index() {
        let mut ast = Ast::new();
        let mut parser = ExprParser::new("item, i in list", 0, &mut ast).unwrap();
        let (binding, index, iterable) = parser.parse_for_header().unwrap();
        assert_eq!(binding, "item");
        assert_eq!(index.as_deref(), Some("i"));
        assert!(matches!(
            ast.exprs().get(iterable).kind,
            ExprKind::Ident(ref n) if n == "list"
        ));
    }

    #[test]
    fn hex_literals_lex() {
        let (ast, id) = parse_one("0xff");
        assert!(matches!(ast.exprs().get(id).kind, ExprKind::Number(n) if n == 255.0));
    }
}
