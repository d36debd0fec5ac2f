//! The `Char` structure.

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::value::Value;

pub(super) fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    match tag {
        BuiltIn::CharOrd => match &args[0] {
            Value::Char(c) => Ok(Value::Int(i64::from(u32::from(*c)))),
            _ => Err(RuntimeError::Bind),
        },
        BuiltIn::CharChr => {
            let n = args[0].as_int()?;
            u32::try_from(n)
                .ok()
                .and_then(char::from_u32)
                .map(Value::Char)
                .ok_or(RuntimeError::Subscript)
        }
        BuiltIn::CharIsDigit => char_test(args, |c| c.is_ascii_digit()),
        BuiltIn::CharIsAlpha => char_test(args, |c| c.is_ascii_alphabetic()),
        _ => unreachable!("{tag} is not a Char function"),
    }
}

fn char_test(args: &[Value], test: impl Fn(char) -> bool) -> EvalResult<Value> {
    match &args[0] {
        Value::Char(c) => Ok(Value::Bool(test(*c))),
        _ => Err(RuntimeError::Bind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ord_chr_round_trip() {
        assert_eq!(call(BuiltIn::CharOrd, &[Value::Char('a')]), Ok(Value::Int(97)));
        assert_eq!(call(BuiltIn::CharChr, &[Value::Int(97)]), Ok(Value::Char('a')));
        assert_eq!(call(BuiltIn::CharChr, &[Value::Int(-1)]), Err(RuntimeError::Subscript));
    }
}
