//! Operator implementations.
//!
//! Arithmetic instances are type-specific: the resolver has already picked
//! the `int` or `real` instance, so each implementation can assume its
//! operand shapes. Integer arithmetic is checked and raises `Overflow`;
//! `div`/`mod` follow the floor-division convention (quotient rounds
//! toward negative infinity, remainder takes the divisor's sign).

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::eval;
use crate::value::Value;

pub(super) fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    match tag {
        BuiltIn::OpPlusInt => int_binary(args, i64::checked_add),
        BuiltIn::OpMinusInt => int_binary(args, i64::checked_sub),
        BuiltIn::OpTimesInt => int_binary(args, i64::checked_mul),
        BuiltIn::OpDivInt => int_binary(args, floor_div),
        BuiltIn::OpModInt => int_binary(args, floor_mod),
        BuiltIn::OpPlusReal => real_binary(args, |a, b| a + b),
        BuiltIn::OpMinusReal => real_binary(args, |a, b| a - b),
        BuiltIn::OpTimesReal => real_binary(args, |a, b| a * b),
        BuiltIn::OpDivideReal => real_binary(args, |a, b| a / b),
        BuiltIn::OpNegateInt => {
            let n = one(args)?.as_int()?;
            n.checked_neg().map(Value::Int).ok_or(RuntimeError::Overflow)
        }
        BuiltIn::OpNegateReal => match one(args)? {
            Value::Real(x) => Ok(Value::Real(-x)),
            _ => Err(RuntimeError::Bind),
        },
        BuiltIn::OpAbsInt => {
            let n = one(args)?.as_int()?;
            n.checked_abs().map(Value::Int).ok_or(RuntimeError::Overflow)
        }
        BuiltIn::OpAbsReal => match one(args)? {
            Value::Real(x) => Ok(Value::Real(x.abs())),
            _ => Err(RuntimeError::Bind),
        },
        BuiltIn::OpEq => {
            let (a, b) = pair(args)?;
            Ok(Value::Bool(a == b))
        }
        BuiltIn::OpNe => {
            let (a, b) = pair(args)?;
            Ok(Value::Bool(a != b))
        }
        BuiltIn::OpLt => compare(args, |o| o.is_lt()),
        BuiltIn::OpLe => compare(args, |o| o.is_le()),
        BuiltIn::OpGt => compare(args, |o| o.is_gt()),
        BuiltIn::OpGe => compare(args, |o| o.is_ge()),
        BuiltIn::OpCaret => {
            let (a, b) = pair(args)?;
            match (a, b) {
                (Value::Str(a), Value::Str(b)) => {
                    let mut s = String::with_capacity(a.len() + b.len());
                    s.push_str(a);
                    s.push_str(b);
                    Ok(Value::str(s))
                }
                _ => Err(RuntimeError::Bind),
            }
        }
        BuiltIn::OpCons => {
            let (head, tail) = pair(args)?;
            match tail {
                Value::List(items) => {
                    let mut list = Vec::with_capacity(items.len() + 1);
                    list.push(head.clone());
                    list.extend(items.iter().cloned());
                    Ok(Value::list(list))
                }
                _ => Err(RuntimeError::Bind),
            }
        }
        BuiltIn::OpAppend => {
            let (a, b) = pair(args)?;
            match (a, b) {
                (Value::List(a), Value::List(b)) => {
                    let mut list = Vec::with_capacity(a.len() + b.len());
                    list.extend(a.iter().cloned());
                    list.extend(b.iter().cloned());
                    Ok(Value::list(list))
                }
                _ => Err(RuntimeError::Bind),
            }
        }
        BuiltIn::OpCompose => {
            // (f o g) x = f (g x); the pair is args[0], x is args[1]
            let (f, g) = pair(&args[..1])?;
            let x = args[1].clone();
            let inner = eval::apply(&g, x)?;
            eval::apply(&f, inner)
        }
        BuiltIn::OpNot => match one(args)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(RuntimeError::Bind),
        },
        BuiltIn::OpIgnore => Ok(Value::Unit),
        _ => unreachable!("{tag} is not an operator"),
    }
}

fn one(args: &[Value]) -> EvalResult<&Value> {
    args.first().ok_or(RuntimeError::Bind)
}

/// Unpacks a pair argument.
fn pair(args: &[Value]) -> EvalResult<(&Value, &Value)> {
    match one(args)? {
        Value::Record(fields) if fields.len() == 2 => Ok((&fields[0], &fields[1])),
        _ => Err(RuntimeError::Bind),
    }
}

fn int_binary(args: &[Value], op: impl Fn(i64, i64) -> Option<i64>) -> EvalResult<Value> {
    let (a, b) = pair(args)?;
    let (a, b) = (a.as_int()?, b.as_int()?);
    op(a, b).map(Value::Int).ok_or_else(|| {
        if b == 0 { RuntimeError::Div } else { RuntimeError::Overflow }
    })
}

fn real_binary(args: &[Value], op: impl Fn(f64, f64) -> f64) -> EvalResult<Value> {
    let (a, b) = pair(args)?;
    match (a, b) {
        (Value::Real(a), Value::Real(b)) => Ok(Value::Real(op(*a, *b))),
        _ => Err(RuntimeError::Bind),
    }
}

fn compare(args: &[Value], test: impl Fn(std::cmp::Ordering) -> bool) -> EvalResult<Value> {
    let (a, b) = pair(args)?;
    Ok(Value::Bool(test(a.cmp(b))))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_matches_sml() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_mod(-7, 2), Some(1));
        assert_eq!(floor_mod(7, -2), Some(-1));
        assert_eq!(floor_div(7, 0), None);
    }

    #[test]
    fn checked_arithmetic_overflows() {
        let args = [Value::record(vec![Value::Int(i64::MAX), Value::Int(1)])];
        assert_eq!(call(BuiltIn::OpPlusInt, &args), Err(RuntimeError::Overflow));
        let args = [Value::record(vec![Value::Int(1), Value::Int(0)])];
        assert_eq!(call(BuiltIn::OpDivInt, &args), Err(RuntimeError::Div));
    }

    #[test]
    fn structural_equality() {
        let list = |v: Vec<i64>| Value::list(v.into_iter().map(Value::Int).collect());
        let args = [Value::record(vec![list(vec![1, 2]), list(vec![1, 2])])];
        assert_eq!(call(BuiltIn::OpEq, &args), Ok(Value::Bool(true)));
        let args = [Value::record(vec![list(vec![1, 2]), list(vec![2, 1])])];
        assert_eq!(call(BuiltIn::OpEq, &args), Ok(Value::Bool(false)));
    }
}
