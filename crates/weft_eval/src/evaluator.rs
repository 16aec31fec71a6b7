//! Expression evaluation against a scope.
//!
//! The evaluator walks the expression arena produced by the parser. It owns
//! the semantics the operators cannot: short-circuiting logic, member access
//! and optional chaining, host calls, and writes through the scope. Every
//! failure carries the span of the offending sub-expression.

use weft_diagnostic::{DiagResult, Diagnostic, ErrorCode};
use weft_ir::{
    AssignOp, BinaryOp, ExprArena, ExprId, ExprKind, LogicalOp, MemberProp, Span, UpdateOp, Value,
};

use crate::errors::{
    function_call_error, invalid_update, not_a_function, property_not_exists,
    variable_already_declared, variable_not_declared,
};
use crate::operators::evaluate_binary;
use crate::scope::{PathSegment, Scope, ScopeError};
use crate::unary_operators::evaluate_unary;

/// Expression evaluator over a parsed arena.
pub struct Evaluator<'a> {
    exprs: &'a ExprArena,
}

impl<'a> Evaluator<'a> {
    pub fn new(exprs: &'a ExprArena) -> Self {
        Evaluator { exprs }
    }

    /// Evaluate an expression in the given scope.
    pub fn evaluate(&self, id: ExprId, scope: &mut Scope) -> DiagResult<Value> {
        let expr = self.exprs.get(id);
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::String(s) => Ok(Value::String(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),

            ExprKind::Ident(name) => scope
                .lookup(name)
                .map_err(|e| self.scope_error(e, span)),

            ExprKind::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.evaluate(*item, scope)?);
                }
                Ok(Value::Array(out))
            }

            ExprKind::Object(properties) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in properties {
                    map.insert(key.as_str().to_string(), self.evaluate(*value, scope)?);
                }
                Ok(Value::Object(map))
            }

            ExprKind::Unary { op, operand } => {
                let value = self.evaluate(*operand, scope)?;
                Ok(evaluate_unary(*op, &value))
            }

            ExprKind::Update { op, prefix, target } => {
                let current = self.evaluate(*target, scope)?;
                let Value::Number(n) = current else {
                    return Err(invalid_update(current.type_name(), span));
                };
                let delta = match op {
                    UpdateOp::Inc => 1.0,
                    UpdateOp::Dec => -1.0,
                };
                let updated = Value::Number(n + delta);
                self.write_target(*target, updated.clone(), scope, false)?;
                Ok(if *prefix { updated } else { Value::Number(n) })
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.evaluate(*lhs, scope)?;
                let right = self.evaluate(*rhs, scope)?;
                Ok(evaluate_binary(&left, &right, *op))
            }

            ExprKind::Logical { op, lhs, rhs } => {
                // The untaken side must not run: host calls may have effects.
                let left = self.evaluate(*lhs, scope)?;
                let take_right = match op {
                    LogicalOp::And => left.is_truthy(),
                    LogicalOp::Or => !left.is_truthy(),
                    LogicalOp::Nullish => matches!(left, Value::Null | Value::Undefined),
                };
                if take_right {
                    self.evaluate(*rhs, scope)
                } else {
                    Ok(left)
                }
            }

            ExprKind::Conditional {
                condition,
                consequent,
                alternate,
            } => {
                if self.evaluate(*condition, scope)?.is_truthy() {
                    self.evaluate(*consequent, scope)
                } else {
                    self.evaluate(*alternate, scope)
                }
            }

            ExprKind::Assign { op, target, value } => {
                let assigned = if *op == AssignOp::Assign {
                    self.evaluate(*value, scope)?
                } else {
                    let current = self.evaluate(*target, scope)?;
                    let rhs = self.evaluate(*value, scope)?;
                    let binary = match op {
                        AssignOp::Add => BinaryOp::Add,
                        AssignOp::Sub => BinaryOp::Sub,
                        AssignOp::Mul => BinaryOp::Mul,
                        AssignOp::Div => BinaryOp::Div,
                        AssignOp::Rem | AssignOp::Assign => BinaryOp::Rem,
                    };
                    evaluate_binary(&current, &rhs, binary)
                };
                self.write_target(*target, assigned.clone(), scope, *op == AssignOp::Assign)?;
                Ok(assigned)
            }

            ExprKind::Member {
                object,
                property,
                optional,
            } => {
                let obj = self.evaluate(*object, scope)?;
                if matches!(obj, Value::Null | Value::Undefined) {
                    if *optional {
                        return Ok(Value::Undefined);
                    }
                    let name = self.property_key(property, scope)?.to_display_string();
                    return Err(property_not_exists(&name, span));
                }
                let key = self.property_key(property, scope)?;
                Ok(member_get(&obj, &key))
            }

            ExprKind::Call {
                callee,
                arguments,
                optional,
            } => {
                let target = self.evaluate(*callee, scope)?;
                if *optional && matches!(target, Value::Null | Value::Undefined) {
                    return Ok(Value::Undefined);
                }
                let Value::Callable(callable) = target else {
                    return Err(not_a_function(target.type_name(), span));
                };
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    args.push(self.evaluate(*argument, scope)?);
                }
                callable
                    .call(&args)
                    .map_err(|message| function_call_error(callable.name(), &message, span))
            }
        }
    }

    fn property_key(&self, property: &MemberProp, scope: &mut Scope) -> DiagResult<Value> {
        match property {
            MemberProp::Ident(name) => Ok(Value::string(name.clone())),
            MemberProp::Computed(expr) => self.evaluate(*expr, scope),
        }
    }

    /// Write through an assignment or update target.
    ///
    /// `upsert` is true only for plain `=`, which declares in the current
    /// frame when the name is new; compound assignment and updates require
    /// an existing binding (already enforced by the preceding read).
    fn write_target(
        &self,
        target: ExprId,
        value: Value,
        scope: &mut Scope,
        upsert: bool,
    ) -> DiagResult<()> {
        let expr = self.exprs.get(target);
        match &expr.kind {
            ExprKind::Ident(name) => {
                if upsert {
                    scope.set(name, value);
                    Ok(())
                } else {
                    scope
                        .assign(name, value)
                        .map_err(|e| self.scope_error(e, expr.span))
                }
            }
            ExprKind::Member { .. } => {
                let (root, path) = self.member_path(target, scope)?;
                scope
                    .assign_path(&root, &path, value)
                    .map_err(|e| self.scope_error(e, expr.span))
            }
            _ => Err(Diagnostic::error(
                ErrorCode::InvalidAssignment,
                "Invalid assignment target",
                expr.span,
            )),
        }
    }

    /// Flatten a member chain into a root name and path segments.
    fn member_path(
        &self,
        id: ExprId,
        scope: &mut Scope,
    ) -> DiagResult<(String, Vec<PathSegment>)> {
        let mut segments = Vec::new();
        let mut cursor = id;
        loop {
            let expr = self.exprs.get(cursor);
            match &expr.kind {
                ExprKind::Member {
                    object,
                    property,
                    optional,
                } => {
                    if *optional {
                        return Err(Diagnostic::error(
                            ErrorCode::InvalidAssignment,
                            "Optional chaining cannot appear in an assignment target",
                            expr.span,
                        ));
                    }
                    let segment = match property {
                        MemberProp::Ident(name) => PathSegment::Key(name.clone()),
                        MemberProp::Computed(computed) => {
                            match self.evaluate(*computed, scope)? {
                                Value::Number(n) if n.fract() == 0.0 && n >= 0.0 => {
                                    PathSegment::Index(n as usize)
                                }
                                other => PathSegment::Key(other.to_display_string()),
                            }
                        }
                    };
                    segments.push(segment);
                    cursor = *object;
                }
                ExprKind::Ident(name) => {
                    segments.reverse();
                    return Ok((name.clone(), segments));
                }
                _ => {
                    return Err(Diagnostic::error(
                        ErrorCode::InvalidAssignment,
                        "Invalid assignment target",
                        expr.span,
                    ))
                }
            }
        }
    }

    fn scope_error(&self, error: ScopeError, span: Span) -> Diagnostic {
        match error {
            ScopeError::NotDeclared(name) => variable_not_declared(&name, span),
            ScopeError::AlreadyDeclared(name) => variable_already_declared(&name, span),
            ScopeError::PropertyNotExists(path) => property_not_exists(&path, span),
        }
    }
}

/// Property read on a non-null value. Missing properties are `undefined`.
fn member_get(obj: &Value, key: &Value) -> Value {
    match obj {
        Value::Object(map) => map
            .get(&key.to_display_string())
            .cloned()
            .unwrap_or(Value::Undefined),
        Value::Array(items) => {
            if let Value::Number(n) = key {
                if n.fract() == 0.0 && *n >= 0.0 {
                    return items.get(*n as usize).cloned().unwrap_or(Value::Undefined);
                }
            }
            if key.to_display_string() == "length" {
                return Value::Number(items.len() as f64);
            }
            Value::Undefined
        }
        Value::String(s) => {
            if let Value::Number(n) = key {
                if n.fract() == 0.0 && *n >= 0.0 {
                    return s
                        .chars()
                        .nth(*n as usize)
                        .map_or(Value::Undefined, |c| Value::string(c.to_string()));
                }
            }
            if key.to_display_string() == "length" {
                return Value::Number(s.chars().count() as f64);
            }
            Value::Undefined
        }
        _ => Value::Undefined,
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;
    use weft_ir::{Ast, NodeKind};

    /// Parse `src` as an interpolation and evaluate it.
    fn eval_in_scope(src: &str, scope: &mut Scope) -> DiagResult<Value> {
        let ast = weft_parse::parse(&format!("{{{{ {src} }}}}")).unwrap();
        let expr = first_expr(&ast);
        Evaluator::new(ast.exprs()).evaluate(expr, scope)
    }

    fn eval(src: &str) -> DiagResult<Value> {
        eval_in_scope(src, &mut Scope::new())
    }

    fn first_expr(ast: &Ast) -> ExprId {
        let NodeKind::Fragment { children } = &ast.node(ast.root()).kind else {
            panic!("no root fragment");
        };
        let NodeKind::Interpolation { expr } = &ast.node(children[0]).kind else {
            panic!("first child is not an interpolation");
        };
        *expr
    }

    #[test]
    fn operator_table() {
        let cases: &[(&str, Value)] = &[
            ("2+3*4", Value::Number(14.0)),
            ("2*(3+4)", Value::Number(14.0)),
            ("2<<2", Value::Number(8.0)),
            ("'a'+'b' in {ab:1,bc:2}", Value::Bool(true)),
            ("7/2", Value::Number(3.5)),
            ("'5'-2", Value::Number(3.0)),
            ("1==='1'", Value::Bool(false)),
            ("1=='1'", Value::Bool(true)),
            ("null==undefined", Value::Bool(true)),
            ("null===undefined", Value::Bool(false)),
            ("true?1:2", Value::Number(1.0)),
            ("''||'fallback'", Value::string("fallback")),
            ("0??'fallback'", Value::Number(0.0)),
            ("null??'fallback'", Value::string("fallback")),
            ("typeof 'x'", Value::string("string")),
            ("-(3)", Value::Number(-3.0)),
            ("~0", Value::Number(-1.0)),
            ("[1,2,3].length", Value::Number(3.0)),
            ("{a:{b:2}}.a.b", Value::Number(2.0)),
            ("[10,20][1]", Value::Number(20.0)),
            ("'abc'[1]", Value::string("b")),
            ("void 1", Value::Undefined),
            ("5%3", Value::Number(2.0)),
            ("1<2&&2<3", Value::Bool(true)),
        ];
        for (src, expected) in cases {
            assert_eq!(&eval(src).unwrap(), expected, "evaluating {src}");
        }
    }

    #[test]
    fn undeclared_variable_has_span() {
        let err = eval("missing").unwrap_err();
        assert_eq!(err.code, ErrorCode::VariableNotDeclared);
        // "{{ missing }}" — the identifier starts after "{{ ".
        assert_eq!(err.span.start, 3);
    }

    #[test]
    fn short_circuit_skips_side_effects() {
        let calls = Rc::new(RefCell::new(0));
        let seen = calls.clone();
        let probe = Value::callable(
            "probe",
            Rc::new(move |_args: &[Value]| {
                *seen.borrow_mut() += 1;
                Ok(Value::Bool(true))
            }),
        );
        let mut scope = Scope::with_parameters([("probe".to_string(), probe)]);

        assert_eq!(
            eval_in_scope("false && probe()", &mut scope).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval_in_scope("true || probe()", &mut scope).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_in_scope("1 ?? probe()", &mut scope).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(*calls.borrow(), 0);

        assert_eq!(
            eval_in_scope("true && probe()", &mut scope).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn host_calls_receive_arguments() {
        let add = Value::callable(
            "add",
            Rc::new(|args: &[Value]| {
                Ok(Value::Number(
                    args.iter().map(Value::as_number).sum::<f64>(),
                ))
            }),
        );
        let mut scope = Scope::with_parameters([("add".to_string(), add)]);
        assert_eq!(
            eval_in_scope("add(1, 2, 3)", &mut scope).unwrap(),
            Value::Number(6.0)
        );
    }

    #[test]
    fn host_call_errors_are_wrapped() {
        let boom = Value::callable("boom", Rc::new(|_: &[Value]| Err("kaput".to_string())));
        let mut scope = Scope::with_parameters([("boom".to_string(), boom)]);
        let err = eval_in_scope("boom()", &mut scope).unwrap_err();
        assert_eq!(err.code, ErrorCode::FunctionCallError);
        assert!(err.message.contains("kaput"));
    }

    #[test]
    fn calling_a_non_function_errors() {
        let mut scope = Scope::with_parameters([("n".to_string(), Value::Number(1.0))]);
        let err = eval_in_scope("n()", &mut scope).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAFunction);
    }

    #[test]
    fn plain_assignment_upserts() {
        let mut scope = Scope::new();
        assert_eq!(
            eval_in_scope("x = 5", &mut scope).unwrap(),
            Value::Number(5.0)
        );
        assert_eq!(scope.lookup("x"), Ok(Value::Number(5.0)));
    }

    #[test]
    fn compound_assignment_requires_declaration() {
        let err = eval("x += 1").unwrap_err();
        assert_eq!(err.code, ErrorCode::VariableNotDeclared);

        let mut scope = Scope::with_parameters([("x".to_string(), Value::Number(2.0))]);
        assert_eq!(
            eval_in_scope("x *= 3", &mut scope).unwrap(),
            Value::Number(6.0)
        );
    }

    #[test]
    fn member_assignment_through_path() {
        let mut scope = Scope::new();
        eval_in_scope("o = {a: {b: 1}}", &mut scope).unwrap();
        eval_in_scope("o.a.b = 7", &mut scope).unwrap();
        assert_eq!(eval_in_scope("o.a.b", &mut scope).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn member_assignment_missing_intermediate() {
        let mut scope = Scope::new();
        eval_in_scope("o = {}", &mut scope).unwrap();
        let err = eval_in_scope("o.a.b = 7", &mut scope).unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyNotExists);
    }

    #[test]
    fn updates_require_numbers() {
        let mut scope = Scope::with_parameters([("s".to_string(), Value::string("x"))]);
        let err = eval_in_scope("s++", &mut scope).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUpdate);
    }

    #[test]
    fn update_prefix_and_postfix_values() {
        let mut scope = Scope::with_parameters([("n".to_string(), Value::Number(1.0))]);
        assert_eq!(eval_in_scope("n++", &mut scope).unwrap(), Value::Number(1.0));
        assert_eq!(eval_in_scope("++n", &mut scope).unwrap(), Value::Number(3.0));
        assert_eq!(scope.lookup("n"), Ok(Value::Number(3.0)));
    }

    #[test]
    fn optional_chain_on_missing_is_undefined() {
        let mut scope = Scope::with_parameters([("o".to_string(), Value::Object(Default::default()))]);
        assert_eq!(
            eval_in_scope("o.missing?.deep", &mut scope).unwrap(),
            Value::Undefined
        );
        let err = eval_in_scope("o.missing.deep", &mut scope).unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyNotExists);
    }
}
