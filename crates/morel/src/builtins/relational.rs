//! The `Relational` aggregates used by `group ... compute`.
//!
//! Each aggregate consumes the whole collection of per-group values in one
//! application, so they compose with the evaluator's grouping without any
//! special casing: `compute c = count of e` applies `count` to the list of
//! `e` values of the group.

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::value::Value;

pub(super) fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    let items = args[0].rows()?;
    match tag {
        BuiltIn::RelCount => Ok(Value::Int(items.len() as i64)),
        BuiltIn::RelSumInt => {
            let mut total: i64 = 0;
            for item in items {
                total = total
                    .checked_add(item.as_int()?)
                    .ok_or(RuntimeError::Overflow)?;
            }
            Ok(Value::Int(total))
        }
        BuiltIn::RelSumReal => {
            let mut total = 0.0;
            for item in items {
                match item {
                    Value::Real(x) => total += x,
                    _ => return Err(RuntimeError::Bind),
                }
            }
            Ok(Value::Real(total))
        }
        BuiltIn::RelMax => items.into_iter().max().ok_or(RuntimeError::Empty),
        BuiltIn::RelMin => items.into_iter().min().ok_or(RuntimeError::Empty),
        BuiltIn::RelOnly => {
            // exactly one element: empty input is Empty, more is Size
            let mut iter = items.into_iter();
            let first = iter.next().ok_or(RuntimeError::Empty)?;
            if iter.next().is_some() {
                Err(RuntimeError::Size)
            } else {
                Ok(first)
            }
        }
        _ => unreachable!("{tag} is not an aggregate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: Vec<i64>) -> Value {
        Value::list(v.into_iter().map(Value::Int).collect())
    }

    #[test]
    fn aggregates() {
        assert_eq!(call(BuiltIn::RelCount, &[ints(vec![1, 1, 2])]), Ok(Value::Int(3)));
        assert_eq!(call(BuiltIn::RelSumInt, &[ints(vec![1, 2, 3])]), Ok(Value::Int(6)));
        assert_eq!(call(BuiltIn::RelMax, &[ints(vec![3, 1, 2])]), Ok(Value::Int(3)));
        assert_eq!(call(BuiltIn::RelMin, &[ints(vec![3, 1, 2])]), Ok(Value::Int(1)));
    }

    #[test]
    fn only_requires_exactly_one() {
        assert_eq!(call(BuiltIn::RelOnly, &[ints(vec![5])]), Ok(Value::Int(5)));
        assert_eq!(call(BuiltIn::RelOnly, &[ints(vec![])]), Err(RuntimeError::Empty));
        assert_eq!(call(BuiltIn::RelOnly, &[ints(vec![1, 2])]), Err(RuntimeError::Size));
    }
}
