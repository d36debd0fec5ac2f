//! Runtime values.
//!
//! Values are persistent: lists and records share their contents through
//! `Rc`, and closures keep a reference to the environment they were created
//! in. Cloning a value is cheap everywhere.
//!
//! Equality, ordering, and hashing are structural and total. Reals compare
//! by normalized bit pattern (negative zero equals positive zero, NaN
//! equals itself) so that values can serve as grouping keys. Functions
//! compare equal only to themselves and order as equal; the type system
//! keeps them out of contexts where that would matter.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::builtins::BuiltIn;
use crate::error::{EvalResult, RuntimeError};
use crate::eval::{EvalEnv, FnCode};
use crate::foreign::ForeignValue;

#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Real(f64),
    Char(char),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    /// Tuples and records; fields are in the canonical label order of the
    /// value's type.
    Record(Rc<Vec<Value>>),
    /// A constructed datatype value.
    Ctor(Rc<str>, Option<Rc<Value>>),
    /// A unary constructor awaiting its payload.
    CtorFn(Rc<str>),
    /// A record field selector as a function; `slot` indexes the canonical
    /// field order.
    Selector { label: Rc<str>, slot: usize },
    Closure(Rc<Closure>),
    /// A built-in, possibly partially applied.
    Builtin { tag: BuiltIn, args: Rc<Vec<Value>> },
    /// An opaque tabular source provided by the host.
    Foreign(Rc<dyn ForeignValue>),
}

/// A function value: compiled parameter/body plus the captured environment.
pub struct Closure {
    pub func: Rc<FnCode>,
    pub env: EvalEnv,
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(values: Vec<Self>) -> Self {
        Self::List(Rc::new(values))
    }

    pub fn record(fields: Vec<Self>) -> Self {
        if fields.is_empty() {
            Self::Unit
        } else {
            Self::Record(Rc::new(fields))
        }
    }

    pub fn builtin(tag: BuiltIn) -> Self {
        Self::Builtin {
            tag,
            args: Rc::new(Vec::new()),
        }
    }

    /// True for values that are functions when applied.
    pub fn is_fn(&self) -> bool {
        matches!(
            self,
            Self::Closure(_) | Self::Builtin { .. } | Self::CtorFn(_) | Self::Selector { .. }
        )
    }

    pub fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(RuntimeError::Bind),
        }
    }

    pub fn as_int(&self) -> EvalResult<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            _ => Err(RuntimeError::Bind),
        }
    }

    /// The rows of a collection value: the elements of a list, or the
    /// materialized rows of a foreign table.
    pub fn rows(&self) -> EvalResult<Vec<Self>> {
        match self {
            Self::List(items) => Ok(items.as_ref().clone()),
            Self::Foreign(table) => table.rows(),
            _ => Err(RuntimeError::Bind),
        }
    }
}

fn real_bits(x: f64) -> u64 {
    // fold negative zero into positive zero so the two hash and compare
    // identically
    if x == 0.0 { 0.0f64.to_bits() } else { x.to_bits() }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Unit => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::Real(_) => 3,
        Value::Char(_) => 4,
        Value::Str(_) => 5,
        Value::List(_) => 6,
        Value::Record(_) => 7,
        Value::Ctor(..) => 8,
        Value::CtorFn(_) => 9,
        Value::Selector { .. } => 10,
        Value::Closure(_) => 11,
        Value::Builtin { .. } => 12,
        Value::Foreign(_) => 13,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => real_bits(*a) == real_bits(*b),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Ctor(n1, a1), Self::Ctor(n2, a2)) => n1 == n2 && a1 == a2,
            (Self::CtorFn(a), Self::CtorFn(b)) => a == b,
            (Self::Selector { label: a, .. }, Self::Selector { label: b, .. }) => a == b,
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (
                Self::Builtin { tag: t1, args: a1 },
                Self::Builtin { tag: t2, args: a2 },
            ) => t1 == t2 && a1 == a2,
            (Self::Foreign(a), Self::Foreign(b)) => a.same(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        rank(self).hash(state);
        match self {
            Self::Unit => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(n) => n.hash(state),
            Self::Real(x) => real_bits(*x).hash(state),
            Self::Char(c) => c.hash(state),
            Self::Str(s) => s.hash(state),
            Self::List(items) | Self::Record(items) => items.hash(state),
            Self::Ctor(name, arg) => {
                name.hash(state);
                arg.hash(state);
            }
            Self::CtorFn(name) => name.hash(state),
            Self::Selector { label, .. } => label.hash(state),
            Self::Closure(closure) => Rc::as_ptr(closure).hash(state),
            Self::Builtin { tag, args } => {
                tag.hash(state);
                args.hash(state);
            }
            Self::Foreign(table) => table.schema_name().hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Real(a), Self::Real(b)) => a.total_cmp(b),
            (Self::Char(a), Self::Char(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Record(a), Self::Record(b)) => a.cmp(b),
            (Self::Ctor(n1, a1), Self::Ctor(n2, a2)) => n1.cmp(n2).then_with(|| a1.cmp(a2)),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

/// Debug formatting mirrors the REPL's value syntax; the session's printer
/// in `print.rs` adds type-directed record labels and depth limits on top.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => {
                if *n < 0 {
                    write!(f, "~{}", n.unsigned_abs())
                } else {
                    write!(f, "{n}")
                }
            }
            Self::Real(x) => f.write_str(&crate::print::format_real(*x)),
            Self::Char(c) => write!(f, "#\"{}\"", crate::ast::escape_char(*c)),
            Self::Str(s) => write!(f, "\"{}\"", crate::ast::escape_str(s)),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Record(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item:?}")?;
                }
                f.write_str(")")
            }
            Self::Ctor(name, None) => f.write_str(name),
            Self::Ctor(name, Some(arg)) => write!(f, "{name} {arg:?}"),
            Self::CtorFn(name) => write!(f, "{name}"),
            Self::Selector { label, .. } => write!(f, "#{label}"),
            Self::Closure(_) | Self::Builtin { .. } => f.write_str("fn"),
            Self::Foreign(table) => write!(f, "<{}>", table.schema_name()),
        }
    }
}
