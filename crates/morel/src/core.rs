//! The typed core language.
//!
//! Core is strictly smaller than the surface tree: `if` is a two-arm
//! `case`, `fun` is a recursive `val` of nested lambdas, a multi-declaration
//! `let` is nested single-binding `Let`s, and record patterns have every
//! field materialized. Every node carries its inferred type.

use std::fmt;
use std::rc::Rc;

use crate::ast::Literal;
use crate::builtins::BuiltIn;
use crate::error::Pos;
use crate::types::{DataType, Type};

/// A named pattern: a binder's name plus an ordinal that disambiguates
/// shadowed bindings of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedPat {
    pub name: Rc<str>,
    pub ordinal: u32,
}

impl fmt::Display for NamedPat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct CoreExpr {
    pub pos: Pos,
    pub ty: Type,
    pub kind: CoreExprKind,
}

impl CoreExpr {
    pub fn new(pos: Pos, ty: Type, kind: CoreExprKind) -> Self {
        Self { pos, ty, kind }
    }
}

#[derive(Debug, Clone)]
pub enum CoreExprKind {
    Literal(Literal),
    /// A reference to a named pattern in scope.
    Id(NamedPat),
    /// A reference to a built-in implementation.
    Builtin(BuiltIn),
    /// A constructor used as a value (nullary) or a function (unary).
    Ctor { name: Rc<str>, data: Rc<DataType> },
    /// A record field selector with its slot resolved against the record's
    /// canonical field order.
    RecordSelector { label: Rc<str>, slot: usize },
    /// Tuples and records; fields are in canonical label order and the
    /// node's type tells the labels.
    Tuple(Vec<CoreExpr>),
    /// A list literal.
    List(Vec<CoreExpr>),
    Apply { func: Box<CoreExpr>, arg: Box<CoreExpr> },
    /// Short-circuit conjunction/disjunction keep dedicated nodes because
    /// they do not evaluate their right operand eagerly.
    AndAlso(Box<CoreExpr>, Box<CoreExpr>),
    OrElse(Box<CoreExpr>, Box<CoreExpr>),
    /// A single-argument lambda.
    Fn { param: CorePat, body: Box<CoreExpr> },
    Case { scrutinee: Box<CoreExpr>, arms: Vec<CoreArm> },
    /// One binding; multi-declaration `let`s nest.
    Let { decl: Box<CoreDecl>, body: Box<CoreExpr> },
    /// A datatype scoped to an expression (`let datatype ... in ... end`).
    Local { data: Rc<DataType>, body: Box<CoreExpr> },
    From(Box<CoreFrom>),
}

#[derive(Debug, Clone)]
pub struct CoreArm {
    pub pat: CorePat,
    pub exp: CoreExpr,
}

#[derive(Debug, Clone)]
pub struct CorePat {
    pub pos: Pos,
    pub ty: Type,
    pub kind: CorePatKind,
}

impl CorePat {
    pub fn new(pos: Pos, ty: Type, kind: CorePatKind) -> Self {
        Self { pos, ty, kind }
    }

    /// The named patterns this pattern binds, left to right.
    pub fn binders(&self) -> Vec<&NamedPat> {
        let mut out = Vec::new();
        self.collect_binders(&mut out);
        out
    }

    fn collect_binders<'a>(&'a self, out: &mut Vec<&'a NamedPat>) {
        match &self.kind {
            CorePatKind::Id(named) => out.push(named),
            CorePatKind::Wild | CorePatKind::Literal(_) => {}
            CorePatKind::Ctor { arg, .. } => {
                if let Some(arg) = arg {
                    arg.collect_binders(out);
                }
            }
            CorePatKind::Cons(hd, tl) => {
                hd.collect_binders(out);
                tl.collect_binders(out);
            }
            CorePatKind::List(elems) | CorePatKind::Tuple(elems) => {
                for p in elems {
                    p.collect_binders(out);
                }
            }
            CorePatKind::Record(fields) => {
                for (_, p) in fields {
                    p.collect_binders(out);
                }
            }
        }
    }

    /// True when this pattern matches every value of its type.
    pub fn is_irrefutable(&self) -> bool {
        match &self.kind {
            CorePatKind::Wild | CorePatKind::Id(_) => true,
            CorePatKind::Literal(Literal::Unit) => true,
            CorePatKind::Literal(_) | CorePatKind::Ctor { .. } | CorePatKind::Cons(..) | CorePatKind::List(_) => false,
            CorePatKind::Tuple(elems) => elems.iter().all(Self::is_irrefutable),
            CorePatKind::Record(fields) => fields.iter().all(|(_, p)| p.is_irrefutable()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CorePatKind {
    Wild,
    Id(NamedPat),
    Literal(Literal),
    Ctor {
        name: Rc<str>,
        data: Rc<DataType>,
        arg: Option<Box<CorePat>>,
    },
    Cons(Box<CorePat>, Box<CorePat>),
    List(Vec<CorePat>),
    Tuple(Vec<CorePat>),
    /// Every field materialized, in canonical label order.
    Record(Vec<(String, CorePat)>),
}

#[derive(Debug, Clone)]
pub enum CoreDecl {
    NonRecVal {
        pat: CorePat,
        exp: CoreExpr,
    },
    /// A group of mutually recursive, function-valued bindings.
    RecVal {
        binds: Vec<RecBind>,
    },
    Datatype(Vec<Rc<DataType>>),
    /// Aliases are fully expanded during resolution; the declaration is
    /// kept only so the session can report it.
    TypeAlias {
        name: String,
    },
    Over {
        name: Rc<str>,
    },
}

#[derive(Debug, Clone)]
pub struct RecBind {
    pub name: NamedPat,
    pub ty: Type,
    /// Always a `Fn` node; the compiler relies on this to install
    /// recursion cells that are resolved before first use.
    pub exp: CoreExpr,
}

/// Bindings plus the `atom`/`ordered` flags visible after a `from` step.
#[derive(Debug, Clone)]
pub struct StepEnv {
    /// In canonical label order, so record shaping and row layout agree.
    pub bindings: Vec<(NamedPat, Type)>,
    /// The step's output is a single unlabeled value per row.
    pub atom: bool,
    /// The output preserves a deterministic row order.
    pub ordered: bool,
}

impl StepEnv {
    pub fn empty() -> Self {
        Self {
            bindings: Vec::new(),
            atom: false,
            ordered: true,
        }
    }

    /// The row type this environment describes: the single binding's type
    /// for an atom step, otherwise a record keyed by binding names.
    pub fn row_type(&self) -> Type {
        if self.atom && self.bindings.len() == 1 {
            self.bindings[0].1.clone()
        } else {
            crate::types::record_type(
                self.bindings
                    .iter()
                    .map(|(named, ty)| (named.name.to_string(), ty.clone()))
                    .collect(),
            )
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoreFrom {
    pub steps: Vec<FromStep>,
    /// The element type of the result list.
    pub element_ty: Type,
}

impl CoreFrom {
    pub fn last_env(&self) -> StepEnv {
        self.steps
            .last()
            .map_or_else(StepEnv::empty, |step| step.env.clone())
    }
}

/// One step of a `from`, together with the environment after it.
#[derive(Debug, Clone)]
pub struct FromStep {
    pub pos: Pos,
    pub kind: FromStepKind,
    pub env: StepEnv,
}

#[derive(Debug, Clone)]
pub enum FromStepKind {
    /// Iterate a collection, binding `pat` per element. The optional
    /// filter is a pushed-down `where`.
    Scan {
        pat: CorePat,
        source: CoreExpr,
        filter: Option<CoreExpr>,
    },
    Where(CoreExpr),
    Skip(CoreExpr),
    Take(CoreExpr),
    Order(Vec<(CoreExpr, bool)>),
    Group {
        keys: Vec<(NamedPat, CoreExpr)>,
        aggs: Vec<CoreAgg>,
    },
    Yield(CoreExpr),
    Unorder,
    Union { distinct: bool, arg: CoreExpr },
    Intersect { distinct: bool, arg: CoreExpr },
    Except { distinct: bool, arg: CoreExpr },
}

#[derive(Debug, Clone)]
pub struct CoreAgg {
    pub name: NamedPat,
    pub func: CoreExpr,
    /// The per-row expression aggregated over; the whole row when absent.
    pub arg: Option<CoreExpr>,
}

/// Whether a step's output is ordered, given its input's orderedness.
///
/// `Scan` is handled at construction (ordered iff the input is ordered and
/// the scanned collection is a list); this table covers the rest.
pub fn step_preserves_order(kind: &FromStepKind, input_ordered: bool) -> bool {
    match kind {
        FromStepKind::Scan { .. } => input_ordered,
        FromStepKind::Where(_)
        | FromStepKind::Yield(_)
        | FromStepKind::Skip(_)
        | FromStepKind::Take(_) => input_ordered,
        FromStepKind::Order(_) => true,
        FromStepKind::Group { .. } | FromStepKind::Unorder => false,
        FromStepKind::Union { .. } | FromStepKind::Intersect { .. } | FromStepKind::Except { .. } => {
            input_ordered
        }
    }
}
