//! Arithmetic and comparison operator semantics, factored out of the evaluator since they're
//! pure functions of two already-evaluated values (short-circuiting for `&&`/`||` happens in
//! the evaluator, before the right operand is even evaluated, so it never reaches here).

use crate::value::{OperandType, Value, ValueResult};

/// Binary numeric/string/boolean operators. `&&`/`||` are included for completeness of the
/// operator set but the evaluator never calls [`apply_binary`] for them — it short-circuits
/// before evaluating the right operand, which this function, taking both operands already
/// evaluated, has no way to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl From<crate::ast::BinaryOp> for BinaryOp {
    fn from(op: crate::ast::BinaryOp) -> Self {
        match op {
            crate::ast::BinaryOp::Add => Self::Add,
            crate::ast::BinaryOp::Sub => Self::Sub,
            crate::ast::BinaryOp::Mul => Self::Mul,
            crate::ast::BinaryOp::Div => Self::Div,
            crate::ast::BinaryOp::Rem => Self::Rem,
            crate::ast::BinaryOp::And => Self::And,
            crate::ast::BinaryOp::Or => Self::Or,
            crate::ast::BinaryOp::Eq => Self::Eq,
            crate::ast::BinaryOp::Ne => Self::Ne,
            crate::ast::BinaryOp::Lt => Self::Lt,
            crate::ast::BinaryOp::Gt => Self::Gt,
            crate::ast::BinaryOp::Le => Self::Le,
            crate::ast::BinaryOp::Ge => Self::Ge,
        }
    }
}

/// Applies a non-short-circuiting binary operator to two already-evaluated operands.
pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> ValueResult<Value> {
    match op {
        BinaryOp::Add if left.get_operand_type() == Some(OperandType::String) || right.get_operand_type() == Some(OperandType::String) => {
            let mut text = left.to_display_string()?;
            text.push_str(&right.to_display_string()?);
            Ok(Value::new_string(text))
        }
        BinaryOp::Add => arithmetic(left, right, |a, b| a.wrapping_add(b), |a, b| a + b),
        BinaryOp::Sub => arithmetic(left, right, |a, b| a.wrapping_sub(b), |a, b| a - b),
        BinaryOp::Mul => arithmetic(left, right, |a, b| a.wrapping_mul(b), |a, b| a * b),
        BinaryOp::Div => divide(left, right),
        BinaryOp::Rem => remainder(left, right),
        BinaryOp::And => boolean_op(left, right, |a, b| a && b),
        BinaryOp::Or => boolean_op(left, right, |a, b| a || b),
        BinaryOp::Eq => Ok(Value::Boolean(left.value_equals(right)?)),
        BinaryOp::Ne => Ok(Value::Boolean(!left.value_equals(right)?)),
        BinaryOp::Lt => Ok(Value::Boolean(left.value_compare_to(right)?.is_lt())),
        BinaryOp::Gt => Ok(Value::Boolean(left.value_compare_to(right)?.is_gt())),
        BinaryOp::Le => Ok(Value::Boolean(left.value_compare_to(right)?.is_le())),
        BinaryOp::Ge => Ok(Value::Boolean(left.value_compare_to(right)?.is_ge())),
    }
}

fn boolean_op(left: &Value, right: &Value, f: impl FnOnce(bool, bool) -> bool) -> ValueResult<Value> {
    Ok(Value::Boolean(f(left.get_boolean()?, right.get_boolean()?)))
}

/// Numeric promotion per §4.3: float if either operand is float, otherwise both must be
/// integers (a mismatched pair, e.g. integer vs boolean, fails via `get_integer`'s own
/// "wrong type" error, since neither branch here coerces non-numeric operands).
fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: impl FnOnce(i64, i64) -> i64,
    float_op: impl FnOnce(f64, f64) -> f64,
) -> ValueResult<Value> {
    match (left, right) {
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let a = as_f64(left)?;
            let b = as_f64(right)?;
            Ok(Value::Float(float_op(a, b)))
        }
        _ => Ok(Value::Integer(int_op(left.get_integer()?, right.get_integer()?))),
    }
}

fn as_f64(v: &Value) -> ValueResult<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Integer(i) => Ok(*i as f64),
        _ => v.get_float(),
    }
}

fn divide(left: &Value, right: &Value) -> ValueResult<Value> {
    match (left, right) {
        (Value::Float(_), _) | (_, Value::Float(_)) => Ok(Value::Float(as_f64(left)? / as_f64(right)?)),
        _ => {
            let (a, b) = (left.get_integer()?, right.get_integer()?);
            if b == 0 {
                return Err(crate::value::RuntimeError::new("Division by zero"));
            }
            Ok(Value::Integer(a.wrapping_div(b)))
        }
    }
}

fn remainder(left: &Value, right: &Value) -> ValueResult<Value> {
    if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
        return Err(crate::value::RuntimeError::new(
            "Floating-point remainder operator is not supported",
        ));
    }
    let (a, b) = (left.get_integer()?, right.get_integer()?);
    if b == 0 {
        return Err(crate::value::RuntimeError::new("Division by zero"));
    }
    Ok(Value::Integer(a.wrapping_rem(b)))
}

/// Unary `+`, `-`, `!`. `-` on an integer is `0 - v`, the unsigned-wraparound definition; on
/// a float it's IEEE negation.
pub fn apply_unary(op: crate::ast::UnaryOp, operand: &Value) -> ValueResult<Value> {
    match op {
        crate::ast::UnaryOp::Plus => match operand {
            Value::Integer(_) | Value::Float(_) => Ok(operand.clone()),
            _ => Err(crate::value::RuntimeError::new(format!("Wrong type: expected a number, got {}", operand.typeof_tag()))),
        },
        crate::ast::UnaryOp::Neg => match operand {
            Value::Integer(i) => Ok(Value::Integer(0i64.wrapping_sub(*i))),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(crate::value::RuntimeError::new(format!("Wrong type: expected a number, got {}", operand.typeof_tag()))),
        },
        crate::ast::UnaryOp::Not => Ok(Value::Boolean(!operand.get_boolean()?)),
    }
}
