//! The built-in library.
//!
//! Every built-in is identified by a [`BuiltIn`] tag. An implementation
//! declares its arity (the number of curried applications it consumes);
//! partial applications are values, and the curry adapters live in
//! `eval::apply`. Overloaded operators are resolved at compile time: the
//! resolver picks the tag whose instance type matches, so arithmetic never
//! type-tests at runtime.
//!
//! The basis — what names are in scope, with what schemes — is produced by
//! [`basis`] and consumed by the resolver and the session.

mod char_lib;
mod list;
mod math;
mod op;
mod relational;
mod string_lib;

use strum::{Display, IntoStaticStr};

use crate::error::EvalResult;
use crate::types::{Scheme, Type};
use crate::value::Value;

/// Tags for every interpreter-native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum BuiltIn {
    // overloaded operator instances
    OpPlusInt,
    OpPlusReal,
    OpMinusInt,
    OpMinusReal,
    OpTimesInt,
    OpTimesReal,
    OpDivideReal,
    OpDivInt,
    OpModInt,
    OpNegateInt,
    OpNegateReal,
    OpAbsInt,
    OpAbsReal,
    // polymorphic comparison and equality
    OpEq,
    OpNe,
    OpLt,
    OpLe,
    OpGt,
    OpGe,
    // other operators
    OpCaret,
    OpCons,
    OpAppend,
    OpCompose,
    OpNot,
    OpIgnore,
    // List
    ListMap,
    ListFilter,
    ListLength,
    ListRev,
    ListHd,
    ListTl,
    ListNull,
    ListNth,
    ListTake,
    ListDrop,
    ListConcat,
    ListFoldl,
    ListFoldr,
    ListExists,
    ListAll,
    ListTabulate,
    // String
    StringSize,
    StringSub,
    StringSubstring,
    StringConcat,
    StringImplode,
    StringExplode,
    StringIsPrefix,
    StringStr,
    // Math
    MathSqrt,
    MathSin,
    MathCos,
    MathAtan,
    MathExp,
    MathLn,
    MathPow,
    // Char
    CharOrd,
    CharChr,
    CharIsDigit,
    CharIsAlpha,
    // Relational aggregates
    RelCount,
    RelSumInt,
    RelSumReal,
    RelMax,
    RelMin,
    RelOnly,
    // conversions
    IntToReal,
    RealFloor,
    RealCeil,
    RealTrunc,
    RealRound,
}

impl BuiltIn {
    /// The number of curried applications this built-in consumes before it
    /// runs. Operators taking a pair consume it in one application.
    pub fn arity(self) -> u8 {
        match self {
            Self::ListMap
            | Self::ListFilter
            | Self::ListExists
            | Self::ListAll
            | Self::StringIsPrefix
            | Self::OpCompose => 2,
            Self::ListFoldl | Self::ListFoldr => 3,
            _ => 1,
        }
    }
}

/// Runs a built-in with a full argument vector.
pub fn call(tag: BuiltIn, args: &[Value]) -> EvalResult<Value> {
    use BuiltIn::*;
    match tag {
        OpPlusInt | OpPlusReal | OpMinusInt | OpMinusReal | OpTimesInt | OpTimesReal
        | OpDivideReal | OpDivInt | OpModInt | OpNegateInt | OpNegateReal | OpAbsInt
        | OpAbsReal | OpEq | OpNe | OpLt | OpLe | OpGt | OpGe | OpCaret | OpCons | OpAppend
        | OpCompose | OpNot | OpIgnore => op::call(tag, args),
        ListMap | ListFilter | ListLength | ListRev | ListHd | ListTl | ListNull | ListNth
        | ListTake | ListDrop | ListConcat | ListFoldl | ListFoldr | ListExists | ListAll
        | ListTabulate => list::call(tag, args),
        StringSize | StringSub | StringSubstring | StringConcat | StringImplode
        | StringExplode | StringIsPrefix | StringStr => string_lib::call(tag, args),
        MathSqrt | MathSin | MathCos | MathAtan | MathExp | MathLn | MathPow | IntToReal
        | RealFloor | RealCeil | RealTrunc | RealRound => math::call(tag, args),
        CharOrd | CharChr | CharIsDigit | CharIsAlpha => char_lib::call(tag, args),
        RelCount | RelSumInt | RelSumReal | RelMax | RelMin | RelOnly => relational::call(tag, args),
    }
}

// ── the basis ──────────────────────────────────────────────────────────

/// One instance of an overloaded name. At most one instance per name is
/// the default: when an argument type is still an unconstrained variable,
/// both numeric instances match and the default (the `int` one, following
/// ML convention) is selected instead of reporting an ambiguity.
pub struct OverloadInst {
    pub scheme: Scheme,
    pub value: Value,
    pub default: bool,
}

/// A basis binding: either an ordinary value with a scheme, or an
/// overloaded name with compile-time-selected instances.
pub enum BasisEntry {
    Val {
        scheme: Scheme,
        /// Which bound variables carry an equality constraint.
        eq_vars: Vec<bool>,
        value: Value,
    },
    Overload(Vec<OverloadInst>),
}

fn val(scheme: Scheme, tag: BuiltIn) -> BasisEntry {
    BasisEntry::Val {
        scheme,
        eq_vars: Vec::new(),
        value: Value::builtin(tag),
    }
}

fn mono(ty: Type, tag: BuiltIn) -> BasisEntry {
    val(Scheme::mono(ty), tag)
}

fn inst(ty: Type, tag: BuiltIn) -> OverloadInst {
    OverloadInst {
        scheme: Scheme::mono(ty),
        value: Value::builtin(tag),
        default: false,
    }
}

fn inst_default(ty: Type, tag: BuiltIn) -> OverloadInst {
    OverloadInst {
        default: true,
        ..inst(ty, tag)
    }
}

fn pair(a: Type, b: Type) -> Type {
    Type::Tuple(vec![a, b])
}

fn binary(operand: Type, result: Type) -> Type {
    Type::func(pair(operand.clone(), operand), result)
}

/// `'a` through `'c` in scheme bodies.
fn g(i: u32) -> Type {
    Type::Gen(i)
}

/// The initial environment: every built-in name with its scheme.
/// Structure-qualified names (`List.map`) and their conventional top-level
/// aliases are separate entries sharing one implementation.
pub fn basis() -> Vec<(&'static str, BasisEntry)> {
    use BuiltIn::*;
    let mut entries: Vec<(&'static str, BasisEntry)> = Vec::new();

    // arithmetic overloads; the int instance is the ML default
    let arith = |int_tag: BuiltIn, real_tag: BuiltIn| {
        BasisEntry::Overload(vec![
            inst_default(binary(Type::INT, Type::INT), int_tag),
            inst(binary(Type::REAL, Type::REAL), real_tag),
        ])
    };
    entries.push(("+", arith(OpPlusInt, OpPlusReal)));
    entries.push(("-", arith(OpMinusInt, OpMinusReal)));
    entries.push(("*", arith(OpTimesInt, OpTimesReal)));
    entries.push(("/", mono(binary(Type::REAL, Type::REAL), OpDivideReal)));
    entries.push(("div", mono(binary(Type::INT, Type::INT), OpDivInt)));
    entries.push(("mod", mono(binary(Type::INT, Type::INT), OpModInt)));
    entries.push((
        "~",
        BasisEntry::Overload(vec![
            inst_default(Type::func(Type::INT, Type::INT), OpNegateInt),
            inst(Type::func(Type::REAL, Type::REAL), OpNegateReal),
        ]),
    ));
    entries.push((
        "abs",
        BasisEntry::Overload(vec![
            inst_default(Type::func(Type::INT, Type::INT), OpAbsInt),
            inst(Type::func(Type::REAL, Type::REAL), OpAbsReal),
        ]),
    ));

    // comparisons are overloaded over the ordered primitives
    let compare = |tag: BuiltIn| {
        BasisEntry::Overload(
            [Type::INT, Type::REAL, Type::STRING, Type::CHAR]
                .into_iter()
                .enumerate()
                .map(|(i, ty)| {
                    if i == 0 {
                        inst_default(binary(ty, Type::BOOL), tag)
                    } else {
                        inst(binary(ty, Type::BOOL), tag)
                    }
                })
                .collect(),
        )
    };
    entries.push(("<", compare(OpLt)));
    entries.push(("<=", compare(OpLe)));
    entries.push((">", compare(OpGt)));
    entries.push((">=", compare(OpGe)));

    // polymorphic equality over equality types
    let eq_entry = |tag: BuiltIn| BasisEntry::Val {
        scheme: Scheme {
            arity: 1,
            ty: binary(g(0), Type::BOOL),
        },
        eq_vars: vec![true],
        value: Value::builtin(tag),
    };
    entries.push(("=", eq_entry(OpEq)));
    entries.push(("<>", eq_entry(OpNe)));

    entries.push(("^", mono(binary(Type::STRING, Type::STRING), OpCaret)));
    entries.push((
        "::",
        val(
            Scheme {
                arity: 1,
                ty: Type::func(pair(g(0), Type::list(g(0))), Type::list(g(0))),
            },
            OpCons,
        ),
    ));
    entries.push((
        "@",
        val(
            Scheme {
                arity: 1,
                ty: Type::func(pair(Type::list(g(0)), Type::list(g(0))), Type::list(g(0))),
            },
            OpAppend,
        ),
    ));
    entries.push((
        "o",
        val(
            Scheme {
                arity: 3,
                ty: Type::func(
                    pair(Type::func(g(1), g(2)), Type::func(g(0), g(1))),
                    Type::func(g(0), g(2)),
                ),
            },
            OpCompose,
        ),
    ));
    entries.push(("not", mono(Type::func(Type::BOOL, Type::BOOL), OpNot)));
    entries.push((
        "ignore",
        val(
            Scheme {
                arity: 1,
                ty: Type::func(g(0), Type::UNIT),
            },
            OpIgnore,
        ),
    ));

    // List
    let list_entries: Vec<(&'static str, Scheme, BuiltIn)> = vec![
        (
            "map",
            Scheme {
                arity: 2,
                ty: Type::func(
                    Type::func(g(0), g(1)),
                    Type::func(Type::list(g(0)), Type::list(g(1))),
                ),
            },
            ListMap,
        ),
        (
            "filter",
            Scheme {
                arity: 1,
                ty: Type::func(
                    Type::func(g(0), Type::BOOL),
                    Type::func(Type::list(g(0)), Type::list(g(0))),
                ),
            },
            ListFilter,
        ),
        (
            "length",
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(g(0)), Type::INT),
            },
            ListLength,
        ),
        (
            "rev",
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(g(0)), Type::list(g(0))),
            },
            ListRev,
        ),
        (
            "hd",
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(g(0)), g(0)),
            },
            ListHd,
        ),
        (
            "tl",
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(g(0)), Type::list(g(0))),
            },
            ListTl,
        ),
        (
            "null",
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(g(0)), Type::BOOL),
            },
            ListNull,
        ),
        (
            "nth",
            Scheme {
                arity: 1,
                ty: Type::func(pair(Type::list(g(0)), Type::INT), g(0)),
            },
            ListNth,
        ),
        (
            "take",
            Scheme {
                arity: 1,
                ty: Type::func(pair(Type::list(g(0)), Type::INT), Type::list(g(0))),
            },
            ListTake,
        ),
        (
            "drop",
            Scheme {
                arity: 1,
                ty: Type::func(pair(Type::list(g(0)), Type::INT), Type::list(g(0))),
            },
            ListDrop,
        ),
        (
            "concat",
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(Type::list(g(0))), Type::list(g(0))),
            },
            ListConcat,
        ),
        (
            "foldl",
            Scheme {
                arity: 2,
                ty: Type::func(
                    Type::func(pair(g(0), g(1)), g(1)),
                    Type::func(g(1), Type::func(Type::list(g(0)), g(1))),
                ),
            },
            ListFoldl,
        ),
        (
            "foldr",
            Scheme {
                arity: 2,
                ty: Type::func(
                    Type::func(pair(g(0), g(1)), g(1)),
                    Type::func(g(1), Type::func(Type::list(g(0)), g(1))),
                ),
            },
            ListFoldr,
        ),
        (
            "exists",
            Scheme {
                arity: 1,
                ty: Type::func(
                    Type::func(g(0), Type::BOOL),
                    Type::func(Type::list(g(0)), Type::BOOL),
                ),
            },
            ListExists,
        ),
        (
            "all",
            Scheme {
                arity: 1,
                ty: Type::func(
                    Type::func(g(0), Type::BOOL),
                    Type::func(Type::list(g(0)), Type::BOOL),
                ),
            },
            ListAll,
        ),
        (
            "tabulate",
            Scheme {
                arity: 1,
                ty: Type::func(pair(Type::INT, Type::func(Type::INT, g(0))), Type::list(g(0))),
            },
            ListTabulate,
        ),
    ];
    for (short, scheme, tag) in list_entries {
        entries.push((qualified("List", short), val(scheme.clone(), tag)));
        if matches!(
            short,
            "map" | "filter" | "length" | "rev" | "hd" | "tl" | "null"
        ) {
            entries.push((short, val(scheme, tag)));
        }
    }

    // String
    entries.push(("String.size", mono(Type::func(Type::STRING, Type::INT), StringSize)));
    entries.push(("size", mono(Type::func(Type::STRING, Type::INT), StringSize)));
    entries.push((
        "String.sub",
        mono(Type::func(pair(Type::STRING, Type::INT), Type::CHAR), StringSub),
    ));
    entries.push((
        "String.substring",
        mono(
            Type::func(
                Type::Tuple(vec![Type::STRING, Type::INT, Type::INT]),
                Type::STRING,
            ),
            StringSubstring,
        ),
    ));
    entries.push((
        "substring",
        mono(
            Type::func(
                Type::Tuple(vec![Type::STRING, Type::INT, Type::INT]),
                Type::STRING,
            ),
            StringSubstring,
        ),
    ));
    entries.push((
        "String.concat",
        mono(Type::func(Type::list(Type::STRING), Type::STRING), StringConcat),
    ));
    entries.push((
        "String.implode",
        mono(Type::func(Type::list(Type::CHAR), Type::STRING), StringImplode),
    ));
    entries.push((
        "implode",
        mono(Type::func(Type::list(Type::CHAR), Type::STRING), StringImplode),
    ));
    entries.push((
        "String.explode",
        mono(Type::func(Type::STRING, Type::list(Type::CHAR)), StringExplode),
    ));
    entries.push((
        "explode",
        mono(Type::func(Type::STRING, Type::list(Type::CHAR)), StringExplode),
    ));
    entries.push((
        "String.isPrefix",
        mono(
            Type::func(Type::STRING, Type::func(Type::STRING, Type::BOOL)),
            StringIsPrefix,
        ),
    ));
    entries.push(("String.str", mono(Type::func(Type::CHAR, Type::STRING), StringStr)));
    entries.push(("str", mono(Type::func(Type::CHAR, Type::STRING), StringStr)));

    // Math
    let real_fn = Type::func(Type::REAL, Type::REAL);
    for (name, tag) in [
        ("Math.sqrt", MathSqrt),
        ("Math.sin", MathSin),
        ("Math.cos", MathCos),
        ("Math.atan", MathAtan),
        ("Math.exp", MathExp),
        ("Math.ln", MathLn),
    ] {
        entries.push((name, mono(real_fn.clone(), tag)));
    }
    entries.push(("Math.pow", mono(binary(Type::REAL, Type::REAL), MathPow)));
    entries.push((
        "Math.pi",
        BasisEntry::Val {
            scheme: Scheme::mono(Type::REAL),
            eq_vars: Vec::new(),
            value: Value::Real(std::f64::consts::PI),
        },
    ));
    entries.push((
        "Math.e",
        BasisEntry::Val {
            scheme: Scheme::mono(Type::REAL),
            eq_vars: Vec::new(),
            value: Value::Real(std::f64::consts::E),
        },
    ));

    // Char
    entries.push(("Char.ord", mono(Type::func(Type::CHAR, Type::INT), CharOrd)));
    entries.push(("ord", mono(Type::func(Type::CHAR, Type::INT), CharOrd)));
    entries.push(("Char.chr", mono(Type::func(Type::INT, Type::CHAR), CharChr)));
    entries.push(("chr", mono(Type::func(Type::INT, Type::CHAR), CharChr)));
    entries.push(("Char.isDigit", mono(Type::func(Type::CHAR, Type::BOOL), CharIsDigit)));
    entries.push(("Char.isAlpha", mono(Type::func(Type::CHAR, Type::BOOL), CharIsAlpha)));

    // conversions
    entries.push(("real", mono(Type::func(Type::INT, Type::REAL), IntToReal)));
    entries.push(("floor", mono(Type::func(Type::REAL, Type::INT), RealFloor)));
    entries.push(("ceil", mono(Type::func(Type::REAL, Type::INT), RealCeil)));
    entries.push(("trunc", mono(Type::func(Type::REAL, Type::INT), RealTrunc)));
    entries.push(("round", mono(Type::func(Type::REAL, Type::INT), RealRound)));

    // Relational aggregates, usable bare in `compute` clauses
    let count_scheme = Scheme {
        arity: 1,
        ty: Type::func(Type::list(g(0)), Type::INT),
    };
    entries.push(("Relational.count", val(count_scheme.clone(), RelCount)));
    entries.push(("count", val(count_scheme, RelCount)));
    let sum_entry = || {
        BasisEntry::Overload(vec![
            inst_default(Type::func(Type::list(Type::INT), Type::INT), RelSumInt),
            inst(Type::func(Type::list(Type::REAL), Type::REAL), RelSumReal),
        ])
    };
    entries.push(("Relational.sum", sum_entry()));
    entries.push(("sum", sum_entry()));
    let extremum = |tag: BuiltIn| {
        val(
            Scheme {
                arity: 1,
                ty: Type::func(Type::list(g(0)), g(0)),
            },
            tag,
        )
    };
    entries.push(("Relational.max", extremum(RelMax)));
    entries.push(("max", extremum(RelMax)));
    entries.push(("Relational.min", extremum(RelMin)));
    entries.push(("min", extremum(RelMin)));
    entries.push(("Relational.only", extremum(RelOnly)));
    entries.push(("only", extremum(RelOnly)));

    entries
}

fn qualified(structure: &str, short: &'static str) -> &'static str {
    // the handful of qualified names are known statically
    match (structure, short) {
        ("List", "map") => "List.map",
        ("List", "filter") => "List.filter",
        ("List", "length") => "List.length",
        ("List", "rev") => "List.rev",
        ("List", "hd") => "List.hd",
        ("List", "tl") => "List.tl",
        ("List", "null") => "List.null",
        ("List", "nth") => "List.nth",
        ("List", "take") => "List.take",
        ("List", "drop") => "List.drop",
        ("List", "concat") => "List.concat",
        ("List", "foldl") => "List.foldl",
        ("List", "foldr") => "List.foldr",
        ("List", "exists") => "List.exists",
        ("List", "all") => "List.all",
        ("List", "tabulate") => "List.tabulate",
        _ => unreachable!("unknown qualified name {structure}.{short}"),
    }
}
