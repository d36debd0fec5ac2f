//! The tree-walking evaluator.
//!
//! Compilation produces a [`Code`] tree; every node evaluates against an
//! [`EvalEnv`], an immutable chain of frames looked up by name. Closures
//! capture the environment current at their creation. `val rec` frames are
//! initialized in place exactly once, before any contained closure can be
//! entered, and are treated as immutable afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::builtins;
use crate::core::CorePat;
use crate::error::{EvalResult, RuntimeError};
use crate::value::{Closure, Value};

// ── environments ───────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct EvalEnv(Option<Rc<Frame>>);

struct Frame {
    parent: EvalEnv,
    kind: FrameKind,
}

enum FrameKind {
    Plain(Vec<(Rc<str>, Value)>),
    /// Recursive bindings; the cells are written once during setup.
    Rec(RefCell<Vec<(Rc<str>, Value)>>),
}

impl EvalEnv {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn bind_all(&self, bindings: Vec<(Rc<str>, Value)>) -> Self {
        Self(Some(Rc::new(Frame {
            parent: self.clone(),
            kind: FrameKind::Plain(bindings),
        })))
    }

    pub fn bind(&self, name: Rc<str>, value: Value) -> Self {
        self.bind_all(vec![(name, value)])
    }

    fn bind_rec(&self, names: &[Rc<str>]) -> Self {
        let cells = names
            .iter()
            .map(|name| (Rc::clone(name), Value::Unit))
            .collect();
        Self(Some(Rc::new(Frame {
            parent: self.clone(),
            kind: FrameKind::Rec(RefCell::new(cells)),
        })))
    }

    fn set_rec(&self, name: &str, value: Value) {
        let Some(frame) = &self.0 else {
            unreachable!("set_rec on empty environment");
        };
        let FrameKind::Rec(cells) = &frame.kind else {
            unreachable!("set_rec on non-recursive frame");
        };
        let mut cells = cells.borrow_mut();
        for (cell_name, cell) in cells.iter_mut() {
            if cell_name.as_ref() == name {
                *cell = value;
                return;
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = self;
        while let Some(frame) = &current.0 {
            match &frame.kind {
                FrameKind::Plain(bindings) => {
                    // newest binding of a name wins
                    if let Some((_, value)) = bindings.iter().rev().find(|(n, _)| n.as_ref() == name) {
                        return Some(value.clone());
                    }
                }
                FrameKind::Rec(cells) => {
                    let cells = cells.borrow();
                    if let Some((_, value)) = cells.iter().rev().find(|(n, _)| n.as_ref() == name) {
                        return Some(value.clone());
                    }
                }
            }
            current = &frame.parent;
        }
        None
    }
}

// ── executable code ────────────────────────────────────────────────────

/// An executable tree; the compiler's output. Each node evaluates to a
/// value against an environment.
#[derive(Debug)]
pub enum Code {
    /// A constant, interned at compile time.
    Value(Value),
    Lookup(Rc<str>),
    Tuple(Vec<Code>),
    List(Vec<Code>),
    Apply(Box<Code>, Box<Code>),
    Fn(Rc<FnCode>),
    Case {
        scrutinee: Box<Code>,
        arms: Vec<(CorePat, Code)>,
    },
    Let {
        pat: CorePat,
        exp: Box<Code>,
        body: Box<Code>,
    },
    LetRec {
        binds: Vec<(Rc<str>, Rc<FnCode>)>,
        body: Box<Code>,
    },
    AndAlso(Box<Code>, Box<Code>),
    OrElse(Box<Code>, Box<Code>),
    From(Rc<FromCode>),
    Plan(Rc<crate::plan::Rel>),
}

#[derive(Debug)]
pub struct FnCode {
    pub param: CorePat,
    pub body: Code,
}

impl Code {
    pub fn eval(&self, env: &EvalEnv) -> EvalResult<Value> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Lookup(name) => env.lookup(name).ok_or(RuntimeError::Bind),
            Self::Tuple(elems) => {
                let values = elems.iter().map(|c| c.eval(env)).collect::<EvalResult<_>>()?;
                Ok(Value::record(values))
            }
            Self::List(elems) => {
                let values = elems.iter().map(|c| c.eval(env)).collect::<EvalResult<_>>()?;
                Ok(Value::list(values))
            }
            Self::Apply(func, arg) => {
                // call-by-value, argument first
                let arg = arg.eval(env)?;
                let func = func.eval(env)?;
                apply(&func, arg)
            }
            Self::Fn(func) => Ok(Value::Closure(Rc::new(Closure {
                func: Rc::clone(func),
                env: env.clone(),
            }))),
            Self::Case { scrutinee, arms } => {
                let value = scrutinee.eval(env)?;
                for (pat, body) in arms {
                    let mut bindings = Vec::new();
                    if bind_pat(pat, &value, &mut bindings) {
                        return body.eval(&env.bind_all(bindings));
                    }
                }
                Err(RuntimeError::Bind)
            }
            Self::Let { pat, exp, body } => {
                let value = exp.eval(env)?;
                let mut bindings = Vec::new();
                if bind_pat(pat, &value, &mut bindings) {
                    body.eval(&env.bind_all(bindings))
                } else {
                    Err(RuntimeError::Bind)
                }
            }
            Self::LetRec { binds, body } => {
                let env = eval_rec_binds(binds, env);
                body.eval(&env)
            }
            Self::AndAlso(a, b) => {
                if a.eval(env)?.as_bool()? {
                    b.eval(env)
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Self::OrElse(a, b) => {
                if a.eval(env)?.as_bool()? {
                    Ok(Value::Bool(true))
                } else {
                    b.eval(env)
                }
            }
            Self::From(from) => eval_from(from, env),
            Self::Plan(rel) => crate::plan::execute(rel, env),
        }
    }
}

/// Installs a group of mutually recursive closures: a cell per name is
/// created first, then each closure is built capturing the new frame, then
/// the cells are filled. All bindings are function-valued, so no cell is
/// read before this completes.
pub fn eval_rec_binds(binds: &[(Rc<str>, Rc<FnCode>)], env: &EvalEnv) -> EvalEnv {
    let names: Vec<Rc<str>> = binds.iter().map(|(name, _)| Rc::clone(name)).collect();
    let rec_env = env.bind_rec(&names);
    for (name, func) in binds {
        let closure = Value::Closure(Rc::new(Closure {
            func: Rc::clone(func),
            env: rec_env.clone(),
        }));
        rec_env.set_rec(name, closure);
    }
    rec_env
}

/// Applies a function value to an argument.
pub fn apply(func: &Value, arg: Value) -> EvalResult<Value> {
    match func {
        Value::Closure(closure) => {
            let mut bindings = Vec::new();
            if bind_pat(&closure.func.param, &arg, &mut bindings) {
                closure.func.body.eval(&closure.env.bind_all(bindings))
            } else {
                Err(RuntimeError::Bind)
            }
        }
        Value::CtorFn(name) => Ok(Value::Ctor(Rc::clone(name), Some(Rc::new(arg)))),
        Value::Selector { slot, .. } => match arg {
            Value::Record(fields) => fields.get(*slot).cloned().ok_or(RuntimeError::Bind),
            _ => Err(RuntimeError::Bind),
        },
        Value::Builtin { tag, args } => {
            let mut args = args.as_ref().clone();
            args.push(arg);
            if args.len() >= tag.arity() as usize {
                builtins::call(*tag, &args)
            } else {
                Ok(Value::Builtin {
                    tag: *tag,
                    args: Rc::new(args),
                })
            }
        }
        _ => Err(RuntimeError::Bind),
    }
}

/// Matches a value against a pattern, accumulating bindings. Returns false
/// without touching `out`'s earlier content when the match fails.
pub fn bind_pat(pat: &CorePat, value: &Value, out: &mut Vec<(Rc<str>, Value)>) -> bool {
    use crate::ast::Literal;
    use crate::core::CorePatKind;

    match &pat.kind {
        CorePatKind::Wild => true,
        CorePatKind::Id(named) => {
            out.push((Rc::clone(&named.name), value.clone()));
            true
        }
        CorePatKind::Literal(lit) => match (lit, value) {
            (Literal::Unit, Value::Unit) => true,
            (Literal::Bool(a), Value::Bool(b)) => a == b,
            (Literal::Int(a), Value::Int(b)) => a == b,
            (Literal::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Literal::Char(a), Value::Char(b)) => a == b,
            (Literal::Str(a), Value::Str(b)) => a == b,
            _ => false,
        },
        CorePatKind::Ctor { name, arg, .. } => match value {
            Value::Ctor(value_name, payload) => {
                if name != value_name {
                    return false;
                }
                match (arg, payload) {
                    (None, None) => true,
                    (Some(pat), Some(payload)) => bind_pat(pat, payload, out),
                    _ => false,
                }
            }
            _ => false,
        },
        CorePatKind::Cons(hd, tl) => match value {
            Value::List(items) if !items.is_empty() => {
                if !bind_pat(hd, &items[0], out) {
                    return false;
                }
                let tail = Value::list(items[1..].to_vec());
                bind_pat(tl, &tail, out)
            }
            _ => false,
        },
        CorePatKind::List(pats) => match value {
            Value::List(items) if items.len() == pats.len() => pats
                .iter()
                .zip(items.iter())
                .all(|(p, v)| bind_pat(p, v, out)),
            _ => false,
        },
        CorePatKind::Tuple(pats) => match value {
            Value::Record(fields) if fields.len() == pats.len() => pats
                .iter()
                .zip(fields.iter())
                .all(|(p, v)| bind_pat(p, v, out)),
            _ => false,
        },
        CorePatKind::Record(field_pats) => match value {
            // both sides are in canonical label order
            Value::Record(fields) if fields.len() == field_pats.len() => field_pats
                .iter()
                .zip(fields.iter())
                .all(|((_, p), v)| bind_pat(p, v, out)),
            Value::Unit if field_pats.is_empty() => true,
            _ => false,
        },
    }
}

// ── from evaluation ────────────────────────────────────────────────────

/// The names visible in a row, in canonical order, and whether the row is
/// a single unlabeled value.
#[derive(Debug, Clone)]
pub struct RowShape {
    pub names: Vec<Rc<str>>,
    pub atom: bool,
}

impl RowShape {
    pub fn empty() -> Self {
        Self {
            names: Vec::new(),
            atom: false,
        }
    }

    /// Converts a row to its output value.
    pub fn value_of(&self, row: Vec<Value>) -> Value {
        if self.atom && row.len() == 1 {
            row.into_iter().next().expect("one value")
        } else {
            Value::record(row)
        }
    }

    /// Converts an output value back to a row, for set operations that
    /// merge external collections into the stream.
    pub fn row_of(&self, value: Value) -> Vec<Value> {
        if self.atom && self.names.len() == 1 {
            vec![value]
        } else {
            match value {
                Value::Record(fields) => fields.as_ref().clone(),
                Value::Unit => Vec::new(),
                other => vec![other],
            }
        }
    }
}

#[derive(Debug)]
pub struct FromCode {
    pub steps: Vec<StepCode>,
    pub out: RowShape,
}

#[derive(Debug)]
pub struct AggCode {
    pub name: Rc<str>,
    pub func: Code,
    pub arg: Option<Code>,
}

#[derive(Debug)]
pub enum StepCode {
    Scan {
        pat: CorePat,
        source: Code,
        filter: Option<Code>,
        out: RowShape,
    },
    Where {
        cond: Code,
    },
    Skip {
        count: Code,
    },
    Take {
        count: Code,
    },
    Order {
        keys: Vec<(Code, bool)>,
    },
    Group {
        keys: Vec<(Rc<str>, Code)>,
        aggs: Vec<AggCode>,
        out: RowShape,
    },
    Yield {
        exp: Code,
        out: RowShape,
    },
    Unorder,
    Union {
        distinct: bool,
        arg: Code,
    },
    Intersect {
        distinct: bool,
        arg: Code,
    },
    Except {
        distinct: bool,
        arg: Code,
    },
}

fn row_env(env: &EvalEnv, shape: &RowShape, row: &[Value]) -> EvalEnv {
    let bindings = shape
        .names
        .iter()
        .zip(row.iter())
        .map(|(name, value)| (Rc::clone(name), value.clone()))
        .collect();
    env.bind_all(bindings)
}

fn eval_count(code: &Code, env: &EvalEnv) -> EvalResult<usize> {
    let n = code.eval(env)?.as_int()?;
    usize::try_from(n).map_err(|_| RuntimeError::Size)
}

fn eval_from(from: &FromCode, env: &EvalEnv) -> EvalResult<Value> {
    // the empty query has exactly one empty row
    let mut rows: Vec<Vec<Value>> = vec![Vec::new()];
    let mut shape = RowShape::empty();

    for step in &from.steps {
        match step {
            StepCode::Scan {
                pat,
                source,
                filter,
                out,
            } => {
                let mut next = Vec::new();
                for row in &rows {
                    let scan_env = row_env(env, &shape, row);
                    let collection = source.eval(&scan_env)?;
                    for element in collection.rows()? {
                        let mut bound = Vec::new();
                        if !bind_pat(pat, &element, &mut bound) {
                            // a refutable scan pattern filters the source
                            continue;
                        }
                        let mut pairs: Vec<(Rc<str>, Value)> = shape
                            .names
                            .iter()
                            .zip(row.iter())
                            .map(|(n, v)| (Rc::clone(n), v.clone()))
                            .collect();
                        pairs.extend(bound);
                        let new_row = reorder(&pairs, &out.names);
                        if let Some(filter) = filter {
                            let filter_env = row_env(env, out, &new_row);
                            if !filter.eval(&filter_env)?.as_bool()? {
                                continue;
                            }
                        }
                        next.push(new_row);
                    }
                }
                rows = next;
                shape = out.clone();
            }
            StepCode::Where { cond } => {
                let mut next = Vec::with_capacity(rows.len());
                for row in rows {
                    let env = row_env(env, &shape, &row);
                    if cond.eval(&env)?.as_bool()? {
                        next.push(row);
                    }
                }
                rows = next;
            }
            StepCode::Skip { count } => {
                let n = eval_count(count, env)?.min(rows.len());
                rows.drain(..n);
            }
            StepCode::Take { count } => {
                let n = eval_count(count, env)?;
                rows.truncate(n);
            }
            StepCode::Order { keys } => {
                let mut decorated = Vec::with_capacity(rows.len());
                for row in rows {
                    let env = row_env(env, &shape, &row);
                    let key: Vec<Value> = keys
                        .iter()
                        .map(|(code, _)| code.eval(&env))
                        .collect::<EvalResult<_>>()?;
                    decorated.push((key, row));
                }
                decorated.sort_by(|(k1, _), (k2, _)| {
                    for (i, (_, desc)) in keys.iter().enumerate() {
                        let ord = k1[i].cmp(&k2[i]);
                        let ord = if *desc { ord.reverse() } else { ord };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                rows = decorated.into_iter().map(|(_, row)| row).collect();
            }
            StepCode::Group { keys, aggs, out } => {
                let mut groups: IndexMap<Vec<Value>, Vec<Vec<Value>>> = IndexMap::new();
                for row in rows {
                    let env = row_env(env, &shape, &row);
                    let key: Vec<Value> = keys
                        .iter()
                        .map(|(_, code)| code.eval(&env))
                        .collect::<EvalResult<_>>()?;
                    groups.entry(key).or_default().push(row);
                }
                let mut next = Vec::with_capacity(groups.len());
                for (key, members) in groups {
                    let mut pairs: Vec<(Rc<str>, Value)> = keys
                        .iter()
                        .zip(key)
                        .map(|((name, _), value)| (Rc::clone(name), value))
                        .collect();
                    for agg in aggs {
                        let mut items = Vec::with_capacity(members.len());
                        for member in &members {
                            let env = row_env(env, &shape, member);
                            let item = match &agg.arg {
                                Some(arg) => arg.eval(&env)?,
                                None => shape.value_of(member.clone()),
                            };
                            items.push(item);
                        }
                        let func = agg.func.eval(env)?;
                        let result = apply(&func, Value::list(items))?;
                        pairs.push((Rc::clone(&agg.name), result));
                    }
                    next.push(reorder(&pairs, &out.names));
                }
                rows = next;
                shape = out.clone();
            }
            StepCode::Yield { exp, out } => {
                let mut next = Vec::with_capacity(rows.len());
                for row in rows {
                    let env = row_env(env, &shape, &row);
                    let value = exp.eval(&env)?;
                    if out.atom {
                        next.push(vec![value]);
                    } else {
                        next.push(out.row_of(value));
                    }
                }
                rows = next;
                shape = out.clone();
            }
            StepCode::Unorder => {}
            StepCode::Union { distinct, arg } => {
                for value in arg.eval(env)?.rows()? {
                    rows.push(shape.row_of(value));
                }
                if *distinct {
                    rows = dedupe(rows);
                }
            }
            StepCode::Intersect { distinct, arg } => {
                let mut counts = count_rows(arg.eval(env)?.rows()?, &shape);
                if *distinct {
                    rows = dedupe(rows);
                    rows.retain(|row| counts.contains_key(row));
                } else {
                    rows.retain(|row| match counts.get_mut(row) {
                        Some(n) if *n > 0 => {
                            *n -= 1;
                            true
                        }
                        _ => false,
                    });
                }
            }
            StepCode::Except { distinct, arg } => {
                let mut counts = count_rows(arg.eval(env)?.rows()?, &shape);
                if *distinct {
                    rows = dedupe(rows);
                    rows.retain(|row| !counts.contains_key(row));
                } else {
                    rows.retain(|row| match counts.get_mut(row) {
                        Some(n) if *n > 0 => {
                            *n -= 1;
                            false
                        }
                        _ => true,
                    });
                }
            }
        }
    }

    Ok(Value::list(
        rows.into_iter().map(|row| from.out.value_of(row)).collect(),
    ))
}

fn reorder(pairs: &[(Rc<str>, Value)], names: &[Rc<str>]) -> Vec<Value> {
    names
        .iter()
        .map(|name| {
            pairs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .expect("row binding present")
        })
        .collect()
}

fn dedupe(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut seen: ahash::AHashSet<Vec<Value>> = ahash::AHashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.clone())).collect()
}

fn count_rows(values: Vec<Value>, shape: &RowShape) -> AHashMap<Vec<Value>, usize> {
    let mut counts: AHashMap<Vec<Value>, usize> = AHashMap::new();
    for value in values {
        *counts.entry(shape.row_of(value)).or_insert(0) += 1;
    }
    counts
}
