//! The `List` structure.

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::eval::apply;
use crate::value::Value;

pub(super) fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    match tag {
        BuiltIn::ListMap => {
            let (f, items) = fn_and_list(args)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(apply(f, item)?);
            }
            Ok(Value::list(out))
        }
        BuiltIn::ListFilter => {
            let (f, items) = fn_and_list(args)?;
            let mut out = Vec::new();
            for item in items {
                if apply(f, item.clone())?.as_bool()? {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        BuiltIn::ListLength => Ok(Value::Int(list(&args[0])?.len() as i64)),
        BuiltIn::ListRev => {
            let mut items = list(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        BuiltIn::ListHd => list(&args[0])?.into_iter().next().ok_or(RuntimeError::Empty),
        BuiltIn::ListTl => {
            let items = list(&args[0])?;
            if items.is_empty() {
                Err(RuntimeError::Empty)
            } else {
                Ok(Value::list(items[1..].to_vec()))
            }
        }
        BuiltIn::ListNull => Ok(Value::Bool(list(&args[0])?.is_empty())),
        BuiltIn::ListNth => {
            let (items, n) = list_and_int(args)?;
            let index = usize::try_from(n).map_err(|_| RuntimeError::Subscript)?;
            items.get(index).cloned().ok_or(RuntimeError::Subscript)
        }
        BuiltIn::ListTake => {
            let (items, n) = list_and_int(args)?;
            let n = usize::try_from(n).map_err(|_| RuntimeError::Subscript)?;
            if n > items.len() {
                Err(RuntimeError::Subscript)
            } else {
                Ok(Value::list(items[..n].to_vec()))
            }
        }
        BuiltIn::ListDrop => {
            let (items, n) = list_and_int(args)?;
            let n = usize::try_from(n).map_err(|_| RuntimeError::Subscript)?;
            if n > items.len() {
                Err(RuntimeError::Subscript)
            } else {
                Ok(Value::list(items[n..].to_vec()))
            }
        }
        BuiltIn::ListConcat => {
            let lists = list(&args[0])?;
            let mut out = Vec::new();
            for inner in lists {
                out.extend(list(&inner)?);
            }
            Ok(Value::list(out))
        }
        BuiltIn::ListFoldl => {
            let f = &args[0];
            let mut acc = args[1].clone();
            for item in list(&args[2])? {
                acc = apply(f, Value::record(vec![item, acc]))?;
            }
            Ok(acc)
        }
        BuiltIn::ListFoldr => {
            let f = &args[0];
            let mut acc = args[1].clone();
            for item in list(&args[2])?.into_iter().rev() {
                acc = apply(f, Value::record(vec![item, acc]))?;
            }
            Ok(acc)
        }
        BuiltIn::ListExists => {
            let (f, items) = fn_and_list(args)?;
            for item in items {
                if apply(f, item)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        BuiltIn::ListAll => {
            let (f, items) = fn_and_list(args)?;
            for item in items {
                if !apply(f, item)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        BuiltIn::ListTabulate => {
            // the argument is a pair (n, f)
            let Value::Record(fields) = &args[0] else {
                return Err(RuntimeError::Bind);
            };
            let n = fields[0].as_int()?;
            let f = &fields[1];
            let n = usize::try_from(n).map_err(|_| RuntimeError::Size)?;
            let mut out = Vec::with_capacity(n);
            for i in 0..n {
                out.push(apply(f, Value::Int(i as i64))?);
            }
            Ok(Value::list(out))
        }
        _ => unreachable!("{tag} is not a List function"),
    }
}

fn list(value: &Value) -> EvalResult<Vec<Value>> {
    value.rows()
}

fn fn_and_list(args: &[Value]) -> EvalResult<(&Value, Vec<Value>)> {
    Ok((&args[0], list(&args[1])?))
}

fn list_and_int(args: &[Value]) -> EvalResult<(Vec<Value>, i64)> {
    match &args[0] {
        Value::Record(fields) if fields.len() == 2 => Ok((list(&fields[0])?, fields[1].as_int()?)),
        _ => Err(RuntimeError::Bind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: Vec<i64>) -> Value {
        Value::list(v.into_iter().map(Value::Int).collect())
    }

    #[test]
    fn hd_and_tl_raise_empty() {
        assert_eq!(call(BuiltIn::ListHd, &[ints(vec![])]), Err(RuntimeError::Empty));
        assert_eq!(call(BuiltIn::ListTl, &[ints(vec![])]), Err(RuntimeError::Empty));
        assert_eq!(call(BuiltIn::ListHd, &[ints(vec![7])]), Ok(Value::Int(7)));
    }

    #[test]
    fn nth_raises_subscript() {
        let args = [Value::record(vec![ints(vec![1, 2]), Value::Int(5)])];
        assert_eq!(call(BuiltIn::ListNth, &args), Err(RuntimeError::Subscript));
        let args = [Value::record(vec![ints(vec![1, 2]), Value::Int(-1)])];
        assert_eq!(call(BuiltIn::ListNth, &args), Err(RuntimeError::Subscript));
    }

    #[test]
    fn concat_flattens() {
        let args = [Value::list(vec![ints(vec![1]), ints(vec![2, 3])])];
        assert_eq!(call(BuiltIn::ListConcat, &args), Ok(ints(vec![1, 2, 3])));
    }
}
