//! The `String` structure. Indexing is by character, not byte.

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::value::Value;

pub(super) fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    match tag {
        BuiltIn::StringSize => Ok(Value::Int(string(&args[0])?.chars().count() as i64)),
        BuiltIn::StringSub => {
            let Value::Record(fields) = &args[0] else {
                return Err(RuntimeError::Bind);
            };
            let s = string(&fields[0])?;
            let i = usize::try_from(fields[1].as_int()?).map_err(|_| RuntimeError::Subscript)?;
            s.chars().nth(i).map(Value::Char).ok_or(RuntimeError::Subscript)
        }
        BuiltIn::StringSubstring => {
            let Value::Record(fields) = &args[0] else {
                return Err(RuntimeError::Bind);
            };
            let s = string(&fields[0])?;
            let start = usize::try_from(fields[1].as_int()?).map_err(|_| RuntimeError::Subscript)?;
            let len = usize::try_from(fields[2].as_int()?).map_err(|_| RuntimeError::Subscript)?;
            let chars: Vec<char> = s.chars().collect();
            if start + len > chars.len() {
                return Err(RuntimeError::Subscript);
            }
            Ok(Value::str(chars[start..start + len].iter().collect::<String>()))
        }
        BuiltIn::StringConcat => {
            let mut out = String::new();
            for part in args[0].rows()? {
                out.push_str(string(&part)?);
            }
            Ok(Value::str(out))
        }
        BuiltIn::StringImplode => {
            let mut out = String::new();
            for c in args[0].rows()? {
                match c {
                    Value::Char(c) => out.push(c),
                    _ => return Err(RuntimeError::Bind),
                }
            }
            Ok(Value::str(out))
        }
        BuiltIn::StringExplode => Ok(Value::list(
            string(&args[0])?.chars().map(Value::Char).collect(),
        )),
        BuiltIn::StringIsPrefix => {
            let prefix = string(&args[0])?;
            let s = string(&args[1])?;
            Ok(Value::Bool(s.starts_with(prefix)))
        }
        BuiltIn::StringStr => match &args[0] {
            Value::Char(c) => Ok(Value::str(c.to_string())),
            _ => Err(RuntimeError::Bind),
        },
        _ => unreachable!("{tag} is not a String function"),
    }
}

fn string(value: &Value) -> EvalResult<&str> {
    match value {
        Value::Str(s) => Ok(s),
        _ => Err(RuntimeError::Bind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_bounds() {
        let args = [Value::record(vec![Value::str("hello"), Value::Int(1), Value::Int(3)])];
        assert_eq!(call(BuiltIn::StringSubstring, &args), Ok(Value::str("ell")));
        let args = [Value::record(vec![Value::str("hello"), Value::Int(3), Value::Int(3)])];
        assert_eq!(call(BuiltIn::StringSubstring, &args), Err(RuntimeError::Subscript));
    }

    #[test]
    fn explode_implode() {
        let exploded = call(BuiltIn::StringExplode, &[Value::str("ab")]).unwrap();
        assert_eq!(
            exploded,
            Value::list(vec![Value::Char('a'), Value::Char('b')])
        );
        assert_eq!(call(BuiltIn::StringImplode, &[exploded]), Ok(Value::str("ab")));
    }
}
