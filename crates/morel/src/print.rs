//! Printing of values and types.
//!
//! Output follows the conventions of the ML family: `~` for negative
//! signs, `#"c"` characters, `[1,2,3]` lists, `{a=1,b=2}` records, and
//! type syntax with postfix constructors. The printer is type-directed so
//! record labels come from the type, not the value.

use crate::foreign::ForeignValue as _;
use crate::types::{DataType, Prim, Type};
use crate::value::Value;

/// Printing limits owned by the session.
#[derive(Debug, Clone)]
pub struct PrintConfig {
    /// Output lines longer than this hard-wrap with a two-space indent.
    pub line_width: usize,
    /// Nesting depth beyond which values print as `#`.
    pub print_depth: usize,
    /// List elements beyond this many print as `...`.
    pub print_length: usize,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            line_width: 79,
            print_depth: 8,
            print_length: 12,
        }
    }
}

/// Formats a real in ML syntax: `~` for the sign, always a fractional part
/// or an exponent, `E` for the exponent marker.
pub fn format_real(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_owned();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".to_owned() } else { "~inf".to_owned() };
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(x).replace('-', "~").replace('e', "E")
}

/// The display name of the `i`th quantified variable: `'a`, `'b`, ...,
/// then `'a1`, `'b1`, ...
fn gen_name(i: u32) -> String {
    let letter = char::from(b'a' + (i % 26) as u8);
    let round = i / 26;
    if round == 0 {
        format!("'{letter}")
    } else {
        format!("'{letter}{round}")
    }
}

pub fn format_type(ty: &Type) -> String {
    format_scheme(ty, &[])
}

/// Formats a scheme body; `eq_vars` marks which bound variables print as
/// `''a` equality variables.
pub fn format_scheme(ty: &Type, eq_vars: &[bool]) -> String {
    let mut out = String::new();
    fmt_type(ty, eq_vars, &mut out);
    out
}

fn fmt_type(ty: &Type, eq: &[bool], out: &mut String) {
    match ty {
        Type::Prim(p) => out.push_str(p.name()),
        Type::Gen(i) => {
            if eq.get(*i as usize).copied().unwrap_or(false) {
                out.push('\'');
            }
            out.push_str(&gen_name(*i));
        }
        Type::Var(v) => out.push_str(&gen_name(v.0)),
        Type::Fn(param, result) => {
            fmt_type_atom(param, matches!(param.as_ref(), Type::Fn(..)), eq, out);
            out.push_str(" -> ");
            fmt_type(result, eq, out);
        }
        Type::Tuple(elems) => {
            for (i, elem) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(" * ");
                }
                fmt_type_atom(elem, matches!(elem, Type::Fn(..) | Type::Tuple(_)), eq, out);
            }
        }
        Type::Record(fields) => {
            out.push('{');
            for (i, (label, field_ty)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(label);
                out.push(':');
                fmt_type(field_ty, eq, out);
            }
            out.push('}');
        }
        Type::List(element) => {
            fmt_postfix_arg(element, eq, out);
            out.push_str(" list");
        }
        Type::Data(data, args) => {
            match args.len() {
                0 => {}
                1 => {
                    fmt_postfix_arg(&args[0], eq, out);
                    out.push(' ');
                }
                _ => {
                    out.push('(');
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        fmt_type(arg, eq, out);
                    }
                    out.push_str(") ");
                }
            }
            out.push_str(&data.name);
        }
    }
}

fn fmt_postfix_arg(ty: &Type, eq: &[bool], out: &mut String) {
    fmt_type_atom(ty, matches!(ty, Type::Fn(..) | Type::Tuple(_)), eq, out);
}

fn fmt_type_atom(ty: &Type, parens: bool, eq: &[bool], out: &mut String) {
    if parens {
        out.push('(');
        fmt_type(ty, eq, out);
        out.push(')');
    } else {
        fmt_type(ty, eq, out);
    }
}

pub fn format_value(value: &Value, ty: &Type, config: &PrintConfig) -> String {
    let mut out = String::new();
    fmt_value(value, ty, config, 0, &mut out);
    out
}

fn fmt_value(value: &Value, ty: &Type, config: &PrintConfig, depth: usize, out: &mut String) {
    if depth > config.print_depth {
        out.push('#');
        return;
    }
    match value {
        Value::Unit => out.push_str("()"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(n) => {
            if *n < 0 {
                out.push('~');
                out.push_str(&n.unsigned_abs().to_string());
            } else {
                out.push_str(&n.to_string());
            }
        }
        Value::Real(x) => out.push_str(&format_real(*x)),
        Value::Char(c) => {
            out.push_str("#\"");
            out.push_str(&crate::ast::escape_char(*c));
            out.push('"');
        }
        Value::Str(s) => {
            out.push('"');
            out.push_str(&crate::ast::escape_str(s));
            out.push('"');
        }
        Value::List(items) => {
            let element_ty = match ty {
                Type::List(element) => element.as_ref(),
                other => other,
            };
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if i >= config.print_length {
                    out.push_str("...");
                    break;
                }
                fmt_value(item, element_ty, config, depth + 1, out);
            }
            out.push(']');
        }
        Value::Record(fields) => match ty {
            Type::Record(field_tys) if field_tys.len() == fields.len() => {
                out.push('{');
                for (i, ((label, field_ty), field)) in field_tys.iter().zip(fields.iter()).enumerate()
                {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(label);
                    out.push('=');
                    fmt_value(field, field_ty, config, depth + 1, out);
                }
                out.push('}');
            }
            _ => {
                let element_tys: Vec<&Type> = match ty {
                    Type::Tuple(elems) => elems.iter().collect(),
                    other => fields.iter().map(|_| other).collect(),
                };
                out.push('(');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let field_ty = element_tys.get(i).copied().unwrap_or(ty);
                    fmt_value(field, field_ty, config, depth + 1, out);
                }
                out.push(')');
            }
        },
        Value::Ctor(name, payload) => {
            out.push_str(name);
            if let Some(payload) = payload {
                out.push(' ');
                let payload_ty = ctor_payload_type(ty, name);
                let needs_parens = matches!(payload.as_ref(), Value::Ctor(_, Some(_)));
                if needs_parens {
                    out.push('(');
                }
                fmt_value(payload, &payload_ty, config, depth + 1, out);
                if needs_parens {
                    out.push(')');
                }
            }
        }
        Value::Closure(_)
        | Value::Builtin { .. }
        | Value::CtorFn(_)
        | Value::Selector { .. } => out.push_str("fn"),
        Value::Foreign(table) => {
            out.push('<');
            out.push_str(table.schema_name());
            out.push('>');
        }
    }
}

/// The payload type of `ctor` within a constructed value's datatype, with
/// the type arguments substituted in.
fn ctor_payload_type(ty: &Type, ctor: &str) -> Type {
    match ty {
        Type::Data(data, args) => payload_of(data, args, ctor),
        _ => ty.clone(),
    }
}

fn payload_of(data: &DataType, args: &[Type], ctor: &str) -> Type {
    data.payload(ctor, args).unwrap_or(Type::Prim(Prim::Unit))
}

/// Hard-wraps a line to the configured width, indenting continuations.
pub fn wrap_line(line: &str, width: usize) -> String {
    if line.chars().count() <= width || width < 8 {
        return line.to_owned();
    }
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::new();
    let mut start = 0;
    let mut first = true;
    while start < chars.len() {
        let take = if first { width } else { width - 2 };
        let end = (start + take).min(chars.len());
        if !first {
            out.push('\n');
            out.push_str("  ");
        }
        out.extend(&chars[start..end]);
        start = end;
        first = false;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record_type;

    #[test]
    fn reals_use_ml_syntax() {
        assert_eq!(format_real(1.0), "1.0");
        assert_eq!(format_real(-1.5), "~1.5");
        assert_eq!(format_real(1e30), "1E30");
    }

    #[test]
    fn types_print_with_postfix_constructors() {
        assert_eq!(format_type(&Type::list(Type::INT)), "int list");
        assert_eq!(
            format_type(&Type::func(Type::INT, Type::func(Type::INT, Type::BOOL))),
            "int -> int -> bool"
        );
        assert_eq!(
            format_type(&Type::func(Type::func(Type::INT, Type::INT), Type::INT)),
            "(int -> int) -> int"
        );
        assert_eq!(
            format_type(&Type::list(Type::Tuple(vec![Type::INT, Type::STRING]))),
            "(int * string) list"
        );
    }

    #[test]
    fn scheme_variables_are_letters() {
        let ty = Type::func(Type::Gen(0), Type::Gen(1));
        assert_eq!(format_type(&ty), "'a -> 'b");
    }

    #[test]
    fn values_print_with_labels_from_the_type() {
        let ty = record_type(vec![
            ("d".to_owned(), Type::STRING),
            ("c".to_owned(), Type::INT),
        ]);
        let value = Value::record(vec![Value::Int(2), Value::str("A")]);
        let config = PrintConfig::default();
        assert_eq!(format_value(&value, &ty, &config), "{c=2,d=\"A\"}");
    }

    #[test]
    fn long_lists_elide() {
        let config = PrintConfig {
            print_length: 3,
            ..PrintConfig::default()
        };
        let value = Value::list((0..10).map(Value::Int).collect());
        assert_eq!(
            format_value(&value, &Type::list(Type::INT), &config),
            "[0,1,2,...]"
        );
    }

    #[test]
    fn wrapping() {
        let wrapped = wrap_line(&"x".repeat(20), 10);
        assert_eq!(wrapped, format!("{}\n  {}\n  {}", "x".repeat(10), "x".repeat(8), "x".repeat(2)));
    }
}
