use super::{
    EvalError,
    parser::{BinaryOp, Expr, UnaryOp},
};
use crate::observation::{Env, Value};

pub(crate) fn eval(expr: &Expr, env: &Env) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        // Unknown identifiers resolve to zero so that sparse contexts
        // evaluate instead of erroring.
        Expr::Ident(name) => Ok(env.get(name).cloned().unwrap_or(Value::Int(0))),
        Expr::Unary(op, operand) => eval_unary(*op, operand, env),
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, env),
    }
}

fn eval_unary(op: UnaryOp, operand: &Expr, env: &Env) -> Result<Value, EvalError> {
    let value = eval(operand, env)?;
    match op {
        UnaryOp::Not => Ok(Value::Int(i64::from(!value.is_truthy()))),
        UnaryOp::Neg => match value {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(EvalError::BadOperand {
                op: "-",
                operand: type_name(&other),
            }),
        },
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, env: &Env) -> Result<Value, EvalError> {
    // `and`/`or` short-circuit and yield the deciding operand.
    match op {
        BinaryOp::And => {
            let left = eval(lhs, env)?;
            return if left.is_truthy() { eval(rhs, env) } else { Ok(left) };
        }
        BinaryOp::Or => {
            let left = eval(lhs, env)?;
            return if left.is_truthy() { Ok(left) } else { eval(rhs, env) };
        }
        _ => {}
    }

    let left = eval(lhs, env)?;
    let right = eval(rhs, env)?;
    match op {
        BinaryOp::Eq => Ok(Value::Int(i64::from(value_eq(&left, &right)))),
        BinaryOp::Ne => Ok(Value::Int(i64::from(!value_eq(&left, &right)))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &left, &right),
        BinaryOp::In => Ok(Value::Int(i64::from(contains(&right, &left)?))),
        BinaryOp::NotIn => Ok(Value::Int(i64::from(!contains(&right, &left)?))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arith(op, &left, &right)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// Equality with numeric promotion; incompatible types are unequal.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        _ => a == b,
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.partial_cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.partial_cmp(y),
        _ => match numeric_pair(a, b) {
            // NaN comparisons are false, not errors.
            Some((x, y)) => x.partial_cmp(&y),
            None => {
                return Err(EvalError::TypeMismatch {
                    op: op_symbol(op),
                    lhs: type_name(a),
                    rhs: type_name(b),
                });
            }
        },
    };
    let holds = ordering.is_some_and(|ordering| match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("compare is only called for ordering operators"),
    });
    Ok(Value::Int(i64::from(holds)))
}

fn contains(container: &Value, needle: &Value) -> Result<bool, EvalError> {
    match (container, needle) {
        (Value::Seq(items), _) => Ok(items.iter().any(|item| value_eq(item, needle))),
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Bytes(haystack), Value::Bytes(needle)) => Ok(needle.is_empty()
            || haystack
                .windows(needle.len())
                .any(|window| window == needle.as_slice())),
        _ => Err(EvalError::TypeMismatch {
            op: "in",
            lhs: type_name(needle),
            rhs: type_name(container),
        }),
    }
}

fn arith(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return match op {
            BinaryOp::Add => Ok(Value::Int(x.wrapping_add(*y))),
            BinaryOp::Sub => Ok(Value::Int(x.wrapping_sub(*y))),
            BinaryOp::Mul => Ok(Value::Int(x.wrapping_mul(*y))),
            BinaryOp::Div if *y == 0 => Err(EvalError::DivisionByZero),
            BinaryOp::Div => Ok(Value::Int(x.wrapping_div(*y))),
            BinaryOp::Mod if *y == 0 => Err(EvalError::DivisionByZero),
            BinaryOp::Mod => Ok(Value::Int(x.wrapping_rem(*y))),
            _ => unreachable!("arith is only called for arithmetic operators"),
        };
    }
    if let (Value::Str(x), Value::Str(y), BinaryOp::Add) = (a, b, op) {
        return Ok(Value::Str(format!("{x}{y}")));
    }
    if let (Value::Bytes(x), Value::Bytes(y), BinaryOp::Add) = (a, b, op) {
        let mut joined = x.clone();
        joined.extend_from_slice(y);
        return Ok(Value::Bytes(joined));
    }
    let Some((x, y)) = numeric_pair(a, b) else {
        return Err(EvalError::TypeMismatch {
            op: op_symbol(op),
            lhs: type_name(a),
            rhs: type_name(b),
        });
    };
    match op {
        BinaryOp::Add => Ok(Value::Float(x + y)),
        BinaryOp::Sub => Ok(Value::Float(x - y)),
        BinaryOp::Mul => Ok(Value::Float(x * y)),
        BinaryOp::Div if y == 0.0 => Err(EvalError::DivisionByZero),
        BinaryOp::Div => Ok(Value::Float(x / y)),
        BinaryOp::Mod if y == 0.0 => Err(EvalError::DivisionByZero),
        BinaryOp::Mod => Ok(Value::Float(x % y)),
        _ => unreachable!("arith is only called for arithmetic operators"),
    }
}

fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    let as_f64 = |v: &Value| match v {
        Value::Int(x) => Some(*x as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    };
    Some((as_f64(a)?, as_f64(b)?))
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "or",
        BinaryOp::And => "and",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::In => "in",
        BinaryOp::NotIn => "not in",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "str",
        Value::Bytes(_) => "bytes",
        Value::Seq(_) => "seq",
    }
}
