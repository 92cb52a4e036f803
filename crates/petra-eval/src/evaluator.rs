//! Model expression evaluator.
//!
//! Integer arithmetic follows the generated C++: 32-bit, truncating
//! division, remainder with the sign of the dividend. Overflow and division
//! by zero, undefined there, trap here. Mixed integer/floating operands are
//! promoted to floating point.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use petra_types::{BinaryOp, Expr, Type, UnaryOp};

use crate::code::UserCode;
use crate::env::Environment;
use crate::error::{EvalError, EvalResult};
use crate::value::Value;

/// Evaluates expressions against an environment. Holds nothing mutable,
/// so one evaluator serves every instance of a simulation.
pub struct Evaluator<'a> {
    parameters: &'a BTreeMap<String, i32>,
    code: &'a UserCode,
}

impl<'a> Evaluator<'a> {
    pub fn new(parameters: &'a BTreeMap<String, i32>, code: &'a UserCode) -> Self {
        Self { parameters, code }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Entry points
    // ══════════════════════════════════════════════════════════════════════

    pub fn eval(&self, expr: &Expr, env: &Environment) -> EvalResult<Value> {
        match expr {
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Double(d) => Ok(Value::Double(*d)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
            Expr::Param(name) => self
                .parameters
                .get(name)
                .map(|v| Value::Int(*v))
                .ok_or_else(|| EvalError::UndefinedParameter(name.clone())),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, env)?)),
            Expr::Array(items) => Ok(Value::Array(self.eval_all(items, env)?)),
            Expr::Field(base, index) => self.eval_field(base, *index, env),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, env),
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, env),
            Expr::Call(name, args) => {
                let f = self
                    .code
                    .function(name)
                    .ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;
                let args = self.eval_all(args, env)?;
                (**f)(&args)
            }
        }
    }

    /// Evaluate and convert to `ty`, applying the numeric promotions the
    /// C++ compiler would apply on assignment.
    pub fn eval_as(&self, expr: &Expr, ty: &Type, env: &Environment) -> EvalResult<Value> {
        let value = self.eval(expr, env)?;
        coerce(value, ty)
    }

    pub fn eval_bool(&self, expr: &Expr, env: &Environment) -> EvalResult<bool> {
        let value = self.eval(expr, env)?;
        value.as_bool().ok_or_else(|| {
            EvalError::TypeMismatch(format!("condition is {}, not bool", value.type_name()))
        })
    }

    pub fn eval_int(&self, expr: &Expr, env: &Environment) -> EvalResult<i32> {
        let value = self.eval(expr, env)?;
        value.as_int().ok_or_else(|| {
            EvalError::TypeMismatch(format!("expected int, got {}", value.type_name()))
        })
    }

    fn eval_all(&self, items: &[Expr], env: &Environment) -> EvalResult<Vec<Value>> {
        items.iter().map(|item| self.eval(item, env)).collect()
    }

    // ── Access ───────────────────────────────────────────────────────────

    fn eval_field(&self, base: &Expr, index: usize, env: &Environment) -> EvalResult<Value> {
        match self.eval(base, env)? {
            Value::Tuple(mut items) if index < items.len() => Ok(items.swap_remove(index)),
            other => Err(EvalError::TypeMismatch(format!(
                "no field {index} on {}",
                other.type_name()
            ))),
        }
    }

    // ── Operators ────────────────────────────────────────────────────────

    fn eval_unary(&self, op: UnaryOp, operand: &Expr, env: &Environment) -> EvalResult<Value> {
        let value = self.eval(operand, env)?;
        match (op, value) {
            (UnaryOp::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::ArithmeticTrap(format!("-({i}) overflows"))),
            (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (UnaryOp::Neg, Value::Double(x)) => Ok(Value::Double(-x)),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (op, value) => Err(EvalError::TypeMismatch(format!(
                "cannot apply {op:?} to {}",
                value.type_name()
            ))),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        env: &Environment,
    ) -> EvalResult<Value> {
        // Short-circuit for logical operators
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let left = self.eval_bool(lhs, env)?;
            return match (op, left) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(self.eval_bool(rhs, env)?)),
            };
        }

        let l = self.eval(lhs, env)?;
        let r = self.eval(rhs, env)?;
        match op {
            BinaryOp::Add => match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                _ => arith(op, &l, &r),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => arith(op, &l, &r),
            BinaryOp::Eq => Ok(Value::Bool(compare(&l, &r)? == Ordering::Equal)),
            BinaryOp::Ne => Ok(Value::Bool(compare(&l, &r)? != Ordering::Equal)),
            BinaryOp::Lt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Less)),
            BinaryOp::Le => Ok(Value::Bool(compare(&l, &r)? != Ordering::Greater)),
            BinaryOp::Gt => Ok(Value::Bool(compare(&l, &r)? == Ordering::Greater)),
            BinaryOp::Ge => Ok(Value::Bool(compare(&l, &r)? != Ordering::Less)),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> EvalResult<Value> {
    let symbol = op.symbol();
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
            return Err(EvalError::ArithmeticTrap(format!("{a} {symbol} 0")));
        }
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            _ => a.checked_rem(b),
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| EvalError::ArithmeticTrap(format!("{a} {symbol} {b} overflows")));
    }
    let (Some(a), Some(b)) = (as_f64(l), as_f64(r)) else {
        return Err(EvalError::TypeMismatch(format!(
            "cannot apply '{symbol}' to {} and {}",
            l.type_name(),
            r.type_name()
        )));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    // float op float stays float, anything with a double is double
    if matches!(
        (l, r),
        (Value::Float(_), Value::Float(_) | Value::Int(_)) | (Value::Int(_), Value::Float(_))
    ) {
        Ok(Value::Float(result as f32))
    } else {
        Ok(Value::Double(result))
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(f64::from(*i)),
        Value::Float(x) => Some(f64::from(*x)),
        Value::Double(x) => Some(*x),
        _ => None,
    }
}

/// Total order used by the comparison operators: numbers numerically,
/// strings lexicographically by bytes, tuples and arrays element-wise.
pub fn compare(l: &Value, r: &Value) -> EvalResult<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
        (Value::Tuple(a), Value::Tuple(b)) | (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                let ord = compare(x, y)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (as_f64(l), as_f64(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                EvalError::ArithmeticTrap("comparison with NaN".into())
            }),
            _ => Err(EvalError::TypeMismatch(format!(
                "cannot compare {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

/// Convert `value` to `ty` where C++ would convert implicitly, and check it
/// has the shape of `ty`.
pub fn coerce(value: Value, ty: &Type) -> EvalResult<Value> {
    let value = match (value, ty) {
        (Value::Int(i), Type::Double) => Value::Double(f64::from(i)),
        (Value::Int(i), Type::Float) => Value::Float(i as f32),
        (Value::Float(x), Type::Double) => Value::Double(f64::from(x)),
        (Value::Double(x), Type::Float) => Value::Float(x as f32),
        (Value::Tuple(items), Type::Product(fields)) if items.len() == fields.len() => {
            Value::Tuple(
                items
                    .into_iter()
                    .zip(fields)
                    .map(|(item, field)| coerce(item, &field.ty))
                    .collect::<EvalResult<_>>()?,
            )
        }
        (Value::Array(items), Type::Sequence(inner)) => Value::Array(
            items
                .into_iter()
                .map(|item| coerce(item, inner))
                .collect::<EvalResult<_>>()?,
        ),
        (value, _) => value,
    };
    if value.conforms_to(ty) {
        Ok(value)
    } else {
        Err(EvalError::TypeMismatch(format!(
            "{} value where {ty} was expected",
            value.type_name()
        )))
    }
}
