//! The `Math` structure and the real/int conversions.

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::value::Value;

pub(super) fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    match tag {
        BuiltIn::MathSqrt => real_unary(args, f64::sqrt),
        BuiltIn::MathSin => real_unary(args, f64::sin),
        BuiltIn::MathCos => real_unary(args, f64::cos),
        BuiltIn::MathAtan => real_unary(args, f64::atan),
        BuiltIn::MathExp => real_unary(args, f64::exp),
        BuiltIn::MathLn => real_unary(args, f64::ln),
        BuiltIn::MathPow => match &args[0] {
            Value::Record(fields) => match (&fields[0], &fields[1]) {
                (Value::Real(a), Value::Real(b)) => Ok(Value::Real(a.powf(*b))),
                _ => Err(RuntimeError::Bind),
            },
            _ => Err(RuntimeError::Bind),
        },
        BuiltIn::IntToReal => Ok(Value::Real(args[0].as_int()? as f64)),
        BuiltIn::RealFloor => real_to_int(args, f64::floor),
        BuiltIn::RealCeil => real_to_int(args, f64::ceil),
        BuiltIn::RealTrunc => real_to_int(args, f64::trunc),
        BuiltIn::RealRound => real_to_int(args, |x| {
            // round half to even, the Basis convention
            let rounded = x.round();
            if (x - x.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
                rounded - x.signum()
            } else {
                rounded
            }
        }),
        _ => unreachable!("{tag} is not a Math function"),
    }
}

fn real_unary(args: &[Value], op: impl Fn(f64) -> f64) -> EvalResult<Value> {
    match &args[0] {
        Value::Real(x) => Ok(Value::Real(op(*x))),
        _ => Err(RuntimeError::Bind),
    }
}

fn real_to_int(args: &[Value], op: impl Fn(f64) -> f64) -> EvalResult<Value> {
    match &args[0] {
        Value::Real(x) => {
            let rounded = op(*x);
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(RuntimeError::Overflow)
            }
        }
        _ => Err(RuntimeError::Bind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(call(BuiltIn::RealFloor, &[Value::Real(1.7)]), Ok(Value::Int(1)));
        assert_eq!(call(BuiltIn::RealCeil, &[Value::Real(1.2)]), Ok(Value::Int(2)));
        assert_eq!(call(BuiltIn::RealTrunc, &[Value::Real(-1.7)]), Ok(Value::Int(-1)));
        assert_eq!(call(BuiltIn::IntToReal, &[Value::Int(3)]), Ok(Value::Real(3.0)));
    }

    #[test]
    fn round_half_to_even() {
        assert_eq!(call(BuiltIn::RealRound, &[Value::Real(2.5)]), Ok(Value::Int(2)));
        assert_eq!(call(BuiltIn::RealRound, &[Value::Real(3.5)]), Ok(Value::Int(4)));
        assert_eq!(call(BuiltIn::RealRound, &[Value::Real(2.4)]), Ok(Value::Int(2)));
    }

    #[test]
    fn infinite_round_overflows() {
        assert_eq!(
            call(BuiltIn::RealFloor, &[Value::Real(f64::INFINITY)]),
            Err(RuntimeError::Overflow)
        );
    }
}
