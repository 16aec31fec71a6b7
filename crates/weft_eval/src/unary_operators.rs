//! Unary operator implementations for the evaluator.
//!
//! Same dispatch shape as the binary side: total functions over the fixed
//! operator set.

use weft_ir::{UnaryOp, Value};

use crate::operators::to_int32;

/// Evaluate a unary operation.
pub fn evaluate_unary(op: UnaryOp, operand: &Value) -> Value {
    match op {
        UnaryOp::Neg => Value::Number(-operand.as_number()),
        UnaryOp::Plus => Value::Number(operand.as_number()),
        UnaryOp::Not => Value::Bool(!operand.is_truthy()),
        UnaryOp::BitNot => Value::Number(f64::from(!to_int32(operand))),
        UnaryOp::TypeOf => Value::string(operand.type_of()),
        UnaryOp::Void => Value::Undefined,
    }
}
