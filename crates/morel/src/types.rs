//! Types, type schemes, and the datatype registry.
//!
//! Record fields are kept in canonical label order everywhere: integer
//! labels compare numerically and sort before alphabetic labels, which
//! compare lexicographically. Every constructor of a record type goes
//! through [`record_type`] so that types which should be equal always
//! compare equal.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use ahash::AHashMap;
use ena::unify::{EqUnifyValue, UnifyKey};
use indexmap::IndexMap;

/// The built-in primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prim {
    Unit,
    Bool,
    Int,
    Real,
    Char,
    String,
}

impl Prim {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Real => "real",
            Self::Char => "char",
            Self::String => "string",
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "unit" => Some(Self::Unit),
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "real" => Some(Self::Real),
            "char" => Some(Self::Char),
            "string" => Some(Self::String),
            _ => None,
        }
    }
}

/// A unification variable: a key into the inference context's union-find
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TyVar(pub u32);

impl UnifyKey for TyVar {
    type Value = Option<Type>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        Self(u)
    }

    fn tag() -> &'static str {
        "TyVar"
    }
}

impl EqUnifyValue for Type {}

/// A type. `Var` is a unification variable owned by an inference context;
/// `Gen` is a variable bound by an enclosing [`Scheme`] or by the datatype
/// that owns a constructor's payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Prim(Prim),
    Var(TyVar),
    Gen(u32),
    Fn(Box<Type>, Box<Type>),
    /// At least two elements; smaller tuples normalize away.
    Tuple(Vec<Type>),
    /// Fields in canonical label order; never empty (that is `unit`).
    Record(Vec<(String, Type)>),
    List(Box<Type>),
    Data(Rc<DataType>, Vec<Type>),
}

impl Type {
    pub const UNIT: Self = Self::Prim(Prim::Unit);
    pub const BOOL: Self = Self::Prim(Prim::Bool);
    pub const INT: Self = Self::Prim(Prim::Int);
    pub const REAL: Self = Self::Prim(Prim::Real);
    pub const CHAR: Self = Self::Prim(Prim::Char);
    pub const STRING: Self = Self::Prim(Prim::String);

    pub fn func(param: Self, result: Self) -> Self {
        Self::Fn(Box::new(param), Box::new(result))
    }

    pub fn list(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// A tuple type; zero elements normalize to `unit`, one to the element.
    pub fn tuple(mut elements: Vec<Self>) -> Self {
        match elements.len() {
            0 => Self::UNIT,
            1 => elements.remove(0),
            _ => Self::Tuple(elements),
        }
    }

    /// True for record types whose labels are exactly `1..n`, which are the
    /// same type as the corresponding tuple.
    pub fn is_tuple_labels(fields: &[(String, Type)]) -> bool {
        fields
            .iter()
            .enumerate()
            .all(|(i, (label, _))| label == &(i + 1).to_string())
    }
}

/// Compares record labels: integer labels numerically, names
/// lexicographically, digits before letters.
pub fn label_compare(a: &str, b: &str) -> Ordering {
    let a_num = numeric_label(a);
    let b_num = numeric_label(b);
    match (a_num, b_num) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn numeric_label(label: &str) -> Option<u64> {
    if !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()) {
        label.parse().ok()
    } else {
        None
    }
}

/// Builds a record type in canonical order. Empty records are `unit`;
/// records labeled `1..n` are tuples.
pub fn record_type(mut fields: Vec<(String, Type)>) -> Type {
    fields.sort_by(|(a, _), (b, _)| label_compare(a, b));
    if fields.is_empty() {
        return Type::UNIT;
    }
    if fields.len() >= 2 && Type::is_tuple_labels(&fields) {
        return Type::Tuple(fields.into_iter().map(|(_, ty)| ty).collect());
    }
    Type::Record(fields)
}

/// A generalized type scheme: `arity` bound variables appearing in `ty` as
/// `Gen(0) .. Gen(arity-1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheme {
    pub arity: u32,
    pub ty: Type,
}

impl Scheme {
    /// A scheme with nothing quantified.
    pub fn mono(ty: Type) -> Self {
        Self { arity: 0, ty }
    }
}

/// A named algebraic datatype. Constructor payload types refer to the
/// datatype's own parameters as `Gen(0) .. Gen(arity-1)`.
///
/// Constructors live behind a `RefCell` because a recursive datatype's
/// payload types refer to the datatype itself: the registry interns an
/// empty shell first, resolves the payloads against it, then fills the
/// constructors exactly once.
#[derive(Debug)]
pub struct DataType {
    pub name: String,
    pub arity: u32,
    /// Constructors in declaration order.
    pub ctors: RefCell<IndexMap<String, Option<Type>>>,
}

impl DataType {
    pub fn shell(name: impl Into<String>, arity: u32) -> Self {
        Self {
            name: name.into(),
            arity,
            ctors: RefCell::new(IndexMap::new()),
        }
    }

    /// The payload type of `ctor`, with `args` substituted for the
    /// datatype's parameters. `None` for nullary constructors.
    pub fn payload(&self, ctor: &str, args: &[Type]) -> Option<Type> {
        self.ctors
            .borrow()
            .get(ctor)
            .and_then(|payload| payload.as_ref().map(|p| subst_gen(p, args)))
    }

    pub fn has_ctor(&self, ctor: &str) -> bool {
        self.ctors.borrow().contains_key(ctor)
    }

    pub fn ctor_names(&self) -> Vec<String> {
        self.ctors.borrow().keys().cloned().collect()
    }

    /// Whether `ctor` carries a payload.
    pub fn ctor_has_payload(&self, ctor: &str) -> bool {
        matches!(self.ctors.borrow().get(ctor), Some(Some(_)))
    }
}

/// Datatypes are interned, so two datatypes with the same name are the same
/// type; comparing by name keeps older `Rc`s equal to a re-registered
/// datatype of the same shape.
impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.arity == other.arity
    }
}

impl Eq for DataType {}

/// The registry of datatypes visible to one session, layered above a shared
/// base so that identical declarations across sessions intern to one
/// object.
#[derive(Debug, Default, Clone)]
pub struct DataTypeRegistry {
    types: AHashMap<String, Rc<DataType>>,
}

impl DataTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<DataType>> {
        self.types.get(name).cloned()
    }

    /// Registers a datatype, replacing any previous one of the same name.
    pub fn register(&mut self, data: Rc<DataType>) {
        self.types.insert(data.name.clone(), data);
    }

    /// The datatype that declared `ctor`. Constructor names are unique per
    /// registry because a re-declaration replaces the old datatype
    /// wholesale.
    pub fn datatype_of_ctor(&self, ctor: &str) -> Option<Rc<DataType>> {
        self.types.values().find(|data| data.has_ctor(ctor)).cloned()
    }
}

/// Substitutes `Gen(i)` by `args[i]` throughout `ty`. Used to instantiate
/// constructor payload types and type-alias bodies.
pub fn subst_gen(ty: &Type, args: &[Type]) -> Type {
    match ty {
        Type::Gen(i) => args
            .get(*i as usize)
            .cloned()
            .unwrap_or_else(|| ty.clone()),
        Type::Prim(_) | Type::Var(_) => ty.clone(),
        Type::Fn(p, r) => Type::func(subst_gen(p, args), subst_gen(r, args)),
        Type::Tuple(elems) => Type::Tuple(elems.iter().map(|t| subst_gen(t, args)).collect()),
        Type::Record(fields) => Type::Record(
            fields
                .iter()
                .map(|(l, t)| (l.clone(), subst_gen(t, args)))
                .collect(),
        ),
        Type::List(t) => Type::list(subst_gen(t, args)),
        Type::Data(data, data_args) => Type::Data(
            Rc::clone(data),
            data_args.iter().map(|t| subst_gen(t, args)).collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_ordering_is_numeric_then_lexicographic() {
        assert_eq!(label_compare("2", "10"), Ordering::Less);
        assert_eq!(label_compare("10", "a"), Ordering::Less);
        assert_eq!(label_compare("a", "b"), Ordering::Less);
        assert_eq!(label_compare("deptno", "dname"), Ordering::Greater);
    }

    #[test]
    fn record_normalization() {
        assert_eq!(record_type(vec![]), Type::UNIT);
        let ty = record_type(vec![
            ("2".to_owned(), Type::STRING),
            ("1".to_owned(), Type::INT),
        ]);
        assert_eq!(ty, Type::Tuple(vec![Type::INT, Type::STRING]));
        let ty = record_type(vec![
            ("b".to_owned(), Type::STRING),
            ("a".to_owned(), Type::INT),
        ]);
        let Type::Record(fields) = ty else {
            panic!("expected record");
        };
        assert_eq!(fields[0].0, "a");
        assert_eq!(fields[1].0, "b");
    }

    #[test]
    fn field_order_does_not_affect_equality() {
        let t1 = record_type(vec![
            ("a".to_owned(), Type::INT),
            ("b".to_owned(), Type::BOOL),
        ]);
        let t2 = record_type(vec![
            ("b".to_owned(), Type::BOOL),
            ("a".to_owned(), Type::INT),
        ]);
        assert_eq!(t1, t2);
    }
}
