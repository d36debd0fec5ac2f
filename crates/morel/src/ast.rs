//! The surface abstract syntax tree.
//!
//! Every node carries the source position it was parsed from. The tree is
//! immutable once built; the resolver consumes it and produces core. The
//! `Display` implementations print parseable source, so
//! `parse(print(ast))` reproduces the tree up to positions.

use std::fmt;
use std::fmt::Display as _;
use std::rc::Rc;

use crate::error::Pos;

/// A literal constant. Shared between the surface tree and core.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Real(f64),
    Char(char),
    Str(Rc<str>),
}

impl fmt::Display for Literal {
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
            Self::Char(c) => write!(f, "#\"{}\"", escape_char(*c)),
            Self::Str(s) => write!(f, "\"{}\"", escape_str(s)),
        }
    }
}

pub(crate) fn escape_char(c: char) -> String {
    match c {
        '\n' => "\\n".to_owned(),
        '\t' => "\\t".to_owned(),
        '\r' => "\\r".to_owned(),
        '\\' => "\\\\".to_owned(),
        '"' => "\\\"".to_owned(),
        c => c.to_string(),
    }
}

pub(crate) fn escape_str(s: &str) -> String {
    s.chars().map(escape_char).collect()
}

/// Infix operators, in surface spelling, with their precedence. Used by the
/// parser to build applications and by the printer to reproduce them.
pub(crate) const INFIX_OPS: &[(&str, u8)] = &[
    ("o", 3),
    ("=", 4),
    ("<>", 4),
    ("<", 4),
    ("<=", 4),
    (">", 4),
    (">=", 4),
    ("::", 5),
    ("@", 5),
    ("+", 6),
    ("-", 6),
    ("^", 6),
    ("*", 7),
    ("/", 7),
    ("div", 7),
    ("mod", 7),
];

pub(crate) fn infix_precedence(name: &str) -> Option<u8> {
    INFIX_OPS.iter().find(|(op, _)| *op == name).map(|(_, p)| *p)
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub pos: Pos,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(pos: Pos, kind: ExprKind) -> Self {
        Self { pos, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    /// An identifier reference, possibly qualified (`List.map`).
    Id(String),
    /// `#label`, a first-class record field selector.
    RecordSelector(String),
    /// `(e1, e2, ...)` with at least two elements.
    Tuple(Vec<Expr>),
    /// `{a = e, b, #c r}`; labels may be implicit.
    Record(Vec<Field>),
    /// `[e1, e2, ...]`.
    List(Vec<Expr>),
    Apply(Box<Expr>, Box<Expr>),
    AndAlso(Box<Expr>, Box<Expr>),
    OrElse(Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Case(Box<Expr>, Vec<Match>),
    Fn(Vec<Match>),
    Let(Vec<Decl>, Box<Expr>),
    From(Box<FromExpr>),
    /// `e : ty`.
    Annotated(Box<Expr>, TypeExpr),
}

/// One record-expression field. A missing label is implicit: `y` has label
/// `y`, `#a r` has label `a`. The parser rejects fields with no derivable
/// label.
#[derive(Debug, Clone)]
pub struct Field {
    pub label: Option<String>,
    pub exp: Expr,
}

/// One arm of a `case`, `fn`, or `fun` match.
#[derive(Debug, Clone)]
pub struct Match {
    pub pos: Pos,
    pub pat: Pat,
    pub exp: Expr,
}

/// A `from` comprehension: one or more head scans, then a step list.
#[derive(Debug, Clone)]
pub struct FromExpr {
    pub scans: Vec<Scan>,
    pub steps: Vec<Step>,
}

/// `pat in e` scans a collection; `pat = e` binds a single value per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    In,
    Eq,
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub pat: Pat,
    pub kind: ScanKind,
    pub source: Expr,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub pos: Pos,
    pub kind: StepKind,
}

#[derive(Debug, Clone)]
pub enum StepKind {
    Where(Expr),
    Yield(Expr),
    Skip(Expr),
    Take(Expr),
    Unorder,
    Order(Vec<OrderItem>),
    Group { keys: Vec<GroupKey>, aggs: Vec<Agg> },
    Union { distinct: bool, arg: Expr },
    Intersect { distinct: bool, arg: Expr },
    Except { distinct: bool, arg: Expr },
    /// `distinct` alone: shorthand for grouping on the whole row.
    Distinct,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub exp: Expr,
    pub desc: bool,
}

/// `group d = #dept e`: binds key `d` per group.
#[derive(Debug, Clone)]
pub struct GroupKey {
    pub name: String,
    pub exp: Expr,
}

/// `compute c = count of e`: applies aggregate `func` to the collection of
/// `arg` values of each group (the whole row when `arg` is absent).
#[derive(Debug, Clone)]
pub struct Agg {
    pub name: String,
    pub func: Expr,
    pub arg: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Pat {
    pub pos: Pos,
    pub kind: PatKind,
}

impl Pat {
    pub fn new(pos: Pos, kind: PatKind) -> Self {
        Self { pos, kind }
    }
}

#[derive(Debug, Clone)]
pub enum PatKind {
    Wild,
    /// A lowercase binder or a nullary constructor; the resolver decides.
    Id(String),
    Literal(Literal),
    /// A constructor applied to an argument pattern, `SOME x`.
    Ctor(String, Box<Pat>),
    /// `hd :: tl`.
    Cons(Box<Pat>, Box<Pat>),
    List(Vec<Pat>),
    Tuple(Vec<Pat>),
    /// `{a, b = p, ...}`; a field with no pattern binds its own label.
    Record { fields: Vec<(String, Option<Pat>)>, ellipsis: bool },
    Annotated(Box<Pat>, TypeExpr),
}

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub pos: Pos,
    pub kind: TypeExprKind,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    /// `'a`, or `''a` for an equality type variable.
    Var { name: String, eq: bool },
    /// A type constructor applied to prefix arguments: `int`, `'a option`,
    /// `(int, string) pair`.
    Con { name: String, args: Vec<TypeExpr> },
    Fn(Box<TypeExpr>, Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    Record(Vec<(String, TypeExpr)>),
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub pos: Pos,
    pub kind: DeclKind,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Val { rec: bool, inst: bool, binds: Vec<ValBind> },
    Fun(Vec<FunBind>),
    Datatype(Vec<DatatypeBind>),
    TypeAlias { name: String, params: Vec<String>, ty: TypeExpr },
    Over(String),
}

#[derive(Debug, Clone)]
pub struct ValBind {
    pub pat: Pat,
    pub exp: Expr,
}

#[derive(Debug, Clone)]
pub struct FunBind {
    pub pos: Pos,
    pub name: String,
    pub arms: Vec<FunArm>,
}

#[derive(Debug, Clone)]
pub struct FunArm {
    pub pats: Vec<Pat>,
    pub ret: Option<TypeExpr>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct DatatypeBind {
    pub name: String,
    pub params: Vec<String>,
    pub ctors: Vec<CtorDef>,
}

#[derive(Debug, Clone)]
pub struct CtorDef {
    pub name: String,
    pub arg: Option<TypeExpr>,
}

/// One top-level statement: a declaration or a bare expression (which the
/// session wraps as `val it = e`).
#[derive(Debug, Clone)]
pub enum Statement {
    Decl(Decl),
    Expr(Expr),
}

// ── printing ───────────────────────────────────────────────────────────

/// Binding strength for printing: atoms are 10, application 9, infix
/// operators 3..=7, `andalso` 2, `orelse` 1, and the keyword forms 0.
const PREC_ATOM: u8 = 10;
const PREC_APPLY: u8 = 9;

impl Expr {
    /// The infix operator this expression prints as, if any.
    fn as_infix(&self) -> Option<(&str, u8, &Expr, &Expr)> {
        let ExprKind::Apply(func, arg) = &self.kind else {
            return None;
        };
        let (ExprKind::Id(name), ExprKind::Tuple(pair)) = (&func.kind, &arg.kind) else {
            return None;
        };
        if pair.len() != 2 {
            return None;
        }
        let prec = infix_precedence(name)?;
        Some((name, prec, &pair[0], &pair[1]))
    }

    fn prec(&self) -> u8 {
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::Id(_)
            | ExprKind::RecordSelector(_)
            | ExprKind::Tuple(_)
            | ExprKind::Record(_)
            | ExprKind::List(_)
            | ExprKind::Let(..) => PREC_ATOM,
            ExprKind::Apply(..) => self.as_infix().map_or(PREC_APPLY, |(_, prec, _, _)| prec),
            ExprKind::AndAlso(..) => 2,
            ExprKind::OrElse(..) => 1,
            ExprKind::If(..)
            | ExprKind::Case(..)
            | ExprKind::Fn(_)
            | ExprKind::From(_)
            | ExprKind::Annotated(..) => 0,
        }
    }

    /// Prints with enclosing-context precedence; parenthesizes when this
    /// expression binds looser than the context requires.
    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, ctx: u8) -> fmt::Result {
        if self.prec() < ctx {
            f.write_str("(")?;
            self.fmt_inner(f)?;
            f.write_str(")")
        } else {
            self.fmt_inner(f)
        }
    }

    fn fmt_inner(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => lit.fmt(f),
            ExprKind::Id(name) => f.write_str(name),
            ExprKind::RecordSelector(label) => write!(f, "#{label}"),
            ExprKind::Tuple(elems) => {
                f.write_str("(")?;
                fmt_comma_sep(f, elems)?;
                f.write_str(")")
            }
            ExprKind::Record(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &field.label {
                        Some(label) => write!(f, "{label} = {}", field.exp)?,
                        None => write!(f, "{}", field.exp)?,
                    }
                }
                f.write_str("}")
            }
            ExprKind::List(elems) => {
                f.write_str("[")?;
                fmt_comma_sep(f, elems)?;
                f.write_str("]")
            }
            ExprKind::Apply(func, arg) => {
                if let Some((name, prec, lhs, rhs)) = self.as_infix() {
                    // `::` and `@` are right-associative
                    let right_assoc = name == "::" || name == "@";
                    let (left_ctx, right_ctx) = if right_assoc {
                        (prec + 1, prec)
                    } else {
                        (prec, prec + 1)
                    };
                    lhs.fmt_prec(f, left_ctx)?;
                    write!(f, " {name} ")?;
                    return rhs.fmt_prec(f, right_ctx);
                }
                func.fmt_prec(f, PREC_APPLY)?;
                f.write_str(" ")?;
                arg.fmt_prec(f, PREC_ATOM)
            }
            ExprKind::AndAlso(a, b) => {
                a.fmt_prec(f, 2)?;
                f.write_str(" andalso ")?;
                b.fmt_prec(f, 3)
            }
            ExprKind::OrElse(a, b) => {
                a.fmt_prec(f, 1)?;
                f.write_str(" orelse ")?;
                b.fmt_prec(f, 2)
            }
            ExprKind::If(c, t, e) => write!(f, "if {c} then {t} else {e}"),
            ExprKind::Case(scrutinee, arms) => {
                write!(f, "case {scrutinee} of ")?;
                fmt_matches(f, arms)
            }
            ExprKind::Fn(arms) => {
                f.write_str("fn ")?;
                fmt_matches(f, arms)
            }
            ExprKind::Let(decls, body) => {
                f.write_str("let ")?;
                for decl in decls {
                    write!(f, "{decl} ")?;
                }
                write!(f, "in {body} end")
            }
            ExprKind::From(from) => from.fmt(f),
            ExprKind::Annotated(exp, ty) => {
                exp.fmt_prec(f, 1)?;
                write!(f, " : {ty}")
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

fn fmt_comma_sep<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.fmt(f)?;
    }
    Ok(())
}

fn fmt_matches(f: &mut fmt::Formatter<'_>, arms: &[Match]) -> fmt::Result {
    for (i, arm) in arms.iter().enumerate() {
        if i > 0 {
            f.write_str(" | ")?;
        }
        write!(f, "{} => ", arm.pat)?;
        // a keyword form in a non-final arm would swallow the following
        // arms when reparsed
        let ctx = if i + 1 == arms.len() { 0 } else { 1 };
        arm.exp.fmt_prec(f, ctx)?;
    }
    Ok(())
}

impl fmt::Display for FromExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("from ")?;
        for (i, scan) in self.scans.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            scan.fmt(f)?;
        }
        for step in &self.steps {
            write!(f, " {step}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScanKind::In => write!(f, "{} in {}", self.pat, self.source),
            ScanKind::Eq => write!(f, "{} = {}", self.pat, self.source),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StepKind::Where(e) => write!(f, "where {e}"),
            StepKind::Yield(e) => write!(f, "yield {e}"),
            StepKind::Skip(e) => write!(f, "skip {e}"),
            StepKind::Take(e) => write!(f, "take {e}"),
            StepKind::Unorder => f.write_str("unorder"),
            StepKind::Distinct => f.write_str("distinct"),
            StepKind::Order(items) => {
                f.write_str("order ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.exp.fmt_prec(f, 3)?;
                    if item.desc {
                        f.write_str(" desc")?;
                    }
                }
                Ok(())
            }
            StepKind::Group { keys, aggs } => {
                f.write_str("group ")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", key.name, key.exp)?;
                }
                if !aggs.is_empty() {
                    f.write_str(" compute {")?;
                    for (i, agg) in aggs.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{} = {}", agg.name, agg.func)?;
                        if let Some(arg) = &agg.arg {
                            write!(f, " of {arg}")?;
                        }
                    }
                    f.write_str("}")?;
                }
                Ok(())
            }
            StepKind::Union { distinct, arg } => fmt_set_op(f, "union", *distinct, arg),
            StepKind::Intersect { distinct, arg } => fmt_set_op(f, "intersect", *distinct, arg),
            StepKind::Except { distinct, arg } => fmt_set_op(f, "except", *distinct, arg),
        }
    }
}

fn fmt_set_op(f: &mut fmt::Formatter<'_>, op: &str, distinct: bool, arg: &Expr) -> fmt::Result {
    f.write_str(op)?;
    if distinct {
        f.write_str(" distinct")?;
    }
    f.write_str(" ")?;
    arg.fmt_prec(f, PREC_ATOM)
}

impl Pat {
    fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            PatKind::Wild
                | PatKind::Id(_)
                | PatKind::Literal(_)
                | PatKind::List(_)
                | PatKind::Tuple(_)
                | PatKind::Record { .. }
        )
    }

    fn fmt_atom(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atomic() {
            write!(f, "{self}")
        } else {
            write!(f, "({self})")
        }
    }
}

impl fmt::Display for Pat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PatKind::Wild => f.write_str("_"),
            PatKind::Id(name) => f.write_str(name),
            PatKind::Literal(lit) => lit.fmt(f),
            PatKind::Ctor(name, arg) => {
                write!(f, "{name} ")?;
                arg.fmt_atom(f)
            }
            PatKind::Cons(hd, tl) => {
                hd.fmt_atom(f)?;
                f.write_str(" :: ")?;
                tl.fmt_atom(f)
            }
            PatKind::List(elems) => {
                f.write_str("[")?;
                fmt_comma_sep(f, elems)?;
                f.write_str("]")
            }
            PatKind::Tuple(elems) => {
                f.write_str("(")?;
                fmt_comma_sep(f, elems)?;
                f.write_str(")")
            }
            PatKind::Record { fields, ellipsis } => {
                f.write_str("{")?;
                for (i, (label, pat)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match pat {
                        Some(p) => write!(f, "{label} = {p}")?,
                        None => f.write_str(label)?,
                    }
                }
                if *ellipsis {
                    if !fields.is_empty() {
                        f.write_str(", ")?;
                    }
                    f.write_str("...")?;
                }
                f.write_str("}")
            }
            PatKind::Annotated(pat, ty) => {
                pat.fmt_atom(f)?;
                write!(f, " : {ty}")
            }
        }
    }
}

impl TypeExpr {
    fn is_atomic(&self) -> bool {
        match &self.kind {
            TypeExprKind::Var { .. } | TypeExprKind::Record(_) => true,
            TypeExprKind::Con { args, .. } => args.len() <= 1,
            _ => false,
        }
    }

    fn fmt_atom(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atomic() {
            write!(f, "{self}")
        } else {
            write!(f, "({self})")
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeExprKind::Var { name, eq } => {
                if *eq {
                    write!(f, "''{name}")
                } else {
                    write!(f, "'{name}")
                }
            }
            TypeExprKind::Con { name, args } => {
                match args.len() {
                    0 => {}
                    1 => {
                        args[0].fmt_atom(f)?;
                        f.write_str(" ")?;
                    }
                    _ => {
                        f.write_str("(")?;
                        fmt_comma_sep(f, args)?;
                        f.write_str(") ")?;
                    }
                }
                f.write_str(name)
            }
            TypeExprKind::Fn(param, result) => {
                param.fmt_atom(f)?;
                write!(f, " -> {result}")
            }
            TypeExprKind::Tuple(elems) => {
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" * ")?;
                    }
                    elem.fmt_atom(f)?;
                }
                Ok(())
            }
            TypeExprKind::Record(fields) => {
                f.write_str("{")?;
                for (i, (label, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{label}:{ty}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DeclKind::Val { rec, inst, binds } => {
                f.write_str("val ")?;
                if *rec {
                    f.write_str("rec ")?;
                }
                if *inst {
                    f.write_str("inst ")?;
                }
                for (i, bind) in binds.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{} = {}", bind.pat, bind.exp)?;
                }
                Ok(())
            }
            DeclKind::Fun(binds) => {
                f.write_str("fun ")?;
                for (i, bind) in binds.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    for (j, arm) in bind.arms.iter().enumerate() {
                        if j > 0 {
                            f.write_str(" | ")?;
                        }
                        f.write_str(&bind.name)?;
                        for pat in &arm.pats {
                            f.write_str(" ")?;
                            pat.fmt_atom(f)?;
                        }
                        if let Some(ret) = &arm.ret {
                            write!(f, " : {ret}")?;
                        }
                        write!(f, " = {}", arm.body)?;
                    }
                }
                Ok(())
            }
            DeclKind::Datatype(binds) => {
                f.write_str("datatype ")?;
                for (i, bind) in binds.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    match bind.params.len() {
                        0 => {}
                        1 => write!(f, "'{} ", bind.params[0])?,
                        _ => {
                            f.write_str("(")?;
                            for (j, p) in bind.params.iter().enumerate() {
                                if j > 0 {
                                    f.write_str(", ")?;
                                }
                                write!(f, "'{p}")?;
                            }
                            f.write_str(") ")?;
                        }
                    }
                    write!(f, "{} = ", bind.name)?;
                    for (j, ctor) in bind.ctors.iter().enumerate() {
                        if j > 0 {
                            f.write_str(" | ")?;
                        }
                        f.write_str(&ctor.name)?;
                        if let Some(arg) = &ctor.arg {
                            write!(f, " of {arg}")?;
                        }
                    }
                }
                Ok(())
            }
            DeclKind::TypeAlias { name, params, ty } => {
                f.write_str("type ")?;
                match params.len() {
                    0 => {}
                    1 => write!(f, "'{} ", params[0])?,
                    _ => {
                        f.write_str("(")?;
                        for (j, p) in params.iter().enumerate() {
                            if j > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "'{p}")?;
                        }
                        f.write_str(") ")?;
                    }
                }
                write!(f, "{name} = {ty}")
            }
            DeclKind::Over(name) => write!(f, "over {name}"),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decl(d) => d.fmt(f),
            Self::Expr(e) => e.fmt(f),
        }
    }
}
