//! The relational planner.
//!
//! A `from` whose steps reduce to select-project-join-aggregate-order-limit
//! is lowered to an algebra of relational operators instead of nested-loop
//! step code. The planner is chosen when the query joins several scans or
//! groups; simple single-scan pipelines stay on the direct path. Semantics
//! are fixed by the step code they replace: the observable multiset and
//! the declared ordering are identical on both paths.

use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::core::{CoreExpr, CoreExprKind, CoreFrom, CorePat, FromStepKind};
use crate::error::{CompileResult, EvalResult, RuntimeError};
use crate::eval::{AggCode, Code, EvalEnv, RowShape, bind_pat};
use crate::types::label_compare;
use crate::value::Value;

/// A relational operator tree. Every node knows the row shape it emits.
#[derive(Debug)]
pub enum Rel {
    /// Yields the rows of its source, in source order when the source is
    /// ordered.
    Scan {
        pat: CorePat,
        source: Code,
        out: RowShape,
    },
    /// Preserves order.
    Filter { input: Box<Rel>, pred: Code },
    /// A cartesian product with an optional post-filter; implemented as a
    /// nested loop, which trivially preserves the multiset contract.
    Join {
        left: Box<Rel>,
        right: Box<Rel>,
        cond: Option<Code>,
        out: RowShape,
    },
    /// Rebinds each row through an expression.
    Project {
        input: Box<Rel>,
        exp: Code,
        out: RowShape,
    },
    /// Groups by a key tuple; one output row per distinct key; unordered.
    Aggregate {
        input: Box<Rel>,
        keys: Vec<(Rc<str>, Code)>,
        aggs: Vec<AggCode>,
        out: RowShape,
    },
    /// Establishes the declared order.
    Sort { input: Box<Rel>, keys: Vec<(Code, bool)> },
    Limit { input: Box<Rel>, count: Code },
    Skip { input: Box<Rel>, count: Code },
    Union {
        input: Box<Rel>,
        arg: Code,
        distinct: bool,
    },
    Intersect {
        input: Box<Rel>,
        arg: Code,
        distinct: bool,
    },
    Except {
        input: Box<Rel>,
        arg: Code,
        distinct: bool,
    },
}

impl Rel {
    fn shape(&self) -> RowShape {
        match self {
            Self::Scan { out, .. }
            | Self::Join { out, .. }
            | Self::Project { out, .. }
            | Self::Aggregate { out, .. } => out.clone(),
            Self::Filter { input, .. }
            | Self::Sort { input, .. }
            | Self::Limit { input, .. }
            | Self::Skip { input, .. }
            | Self::Union { input, .. }
            | Self::Intersect { input, .. }
            | Self::Except { input, .. } => input.shape(),
        }
    }
}

/// Attempts to plan a query. Returns `None` when the shape does not
/// qualify (a single simple scan pipeline, or a correlated join the
/// algebra cannot express).
pub fn try_plan(from: &CoreFrom) -> CompileResult<Option<Rel>> {
    let mut scans = 0usize;
    let mut groups = 0usize;
    let mut scan_prefix = true;
    let mut bound: AHashSet<Rc<str>> = AHashSet::new();
    for step in &from.steps {
        match &step.kind {
            FromStepKind::Scan { source, pat, .. } => {
                if !scan_prefix {
                    return Ok(None);
                }
                // a later scan whose source mentions an earlier binder is
                // a correlated join; leave it to the step evaluator
                if scans > 0 && references_any(source, &bound) {
                    return Ok(None);
                }
                for named in pat.binders() {
                    bound.insert(Rc::clone(&named.name));
                }
                scans += 1;
            }
            FromStepKind::Group { .. } => {
                scan_prefix = false;
                groups += 1;
            }
            _ => scan_prefix = false,
        }
    }
    if scans == 0 || (scans < 2 && groups == 0) {
        return Ok(None);
    }

    let mut rel: Option<Rel> = None;
    for step in &from.steps {
        let out = crate::compile::shape_of(&step.env);
        rel = Some(match (&step.kind, rel) {
            (FromStepKind::Scan { pat, source, filter }, prior) => {
                let scan_shape = standalone_shape(pat);
                let scan = Rel::Scan {
                    pat: pat.clone(),
                    source: crate::compile::compile_expr(source)?,
                    out: scan_shape,
                };
                let joined = match prior {
                    None => scan,
                    Some(left) => Rel::Join {
                        left: Box::new(left),
                        right: Box::new(scan),
                        cond: None,
                        out,
                    },
                };
                match filter {
                    Some(filter) => Rel::Filter {
                        input: Box::new(joined),
                        pred: crate::compile::compile_expr(filter)?,
                    },
                    None => joined,
                }
            }
            (FromStepKind::Where(cond), Some(input)) => Rel::Filter {
                input: Box::new(input),
                pred: crate::compile::compile_expr(cond)?,
            },
            (FromStepKind::Yield(exp), Some(input)) => Rel::Project {
                input: Box::new(input),
                exp: crate::compile::compile_expr(exp)?,
                out,
            },
            (FromStepKind::Group { keys, aggs }, Some(input)) => Rel::Aggregate {
                input: Box::new(input),
                keys: keys
                    .iter()
                    .map(|(named, key)| {
                        Ok((Rc::clone(&named.name), crate::compile::compile_expr(key)?))
                    })
                    .collect::<CompileResult<_>>()?,
                aggs: crate::compile::compile_aggs(aggs)?,
                out,
            },
            (FromStepKind::Order(keys), Some(input)) => Rel::Sort {
                input: Box::new(input),
                keys: keys
                    .iter()
                    .map(|(key, desc)| Ok((crate::compile::compile_expr(key)?, *desc)))
                    .collect::<CompileResult<_>>()?,
            },
            (FromStepKind::Take(count), Some(input)) => Rel::Limit {
                input: Box::new(input),
                count: crate::compile::compile_expr(count)?,
            },
            (FromStepKind::Skip(count), Some(input)) => Rel::Skip {
                input: Box::new(input),
                count: crate::compile::compile_expr(count)?,
            },
            (FromStepKind::Unorder, Some(input)) => input,
            (FromStepKind::Union { distinct, arg }, Some(input)) => Rel::Union {
                input: Box::new(input),
                arg: crate::compile::compile_expr(arg)?,
                distinct: *distinct,
            },
            (FromStepKind::Intersect { distinct, arg }, Some(input)) => Rel::Intersect {
                input: Box::new(input),
                arg: crate::compile::compile_expr(arg)?,
                distinct: *distinct,
            },
            (FromStepKind::Except { distinct, arg }, Some(input)) => Rel::Except {
                input: Box::new(input),
                arg: crate::compile::compile_expr(arg)?,
                distinct: *distinct,
            },
            (_, None) => return Ok(None),
        });
    }
    Ok(rel)
}

/// The shape a scan emits on its own: its pattern's binders in canonical
/// order.
fn standalone_shape(pat: &CorePat) -> RowShape {
    let mut names: Vec<Rc<str>> = pat
        .binders()
        .iter()
        .map(|named| Rc::clone(&named.name))
        .collect();
    names.sort_by(|a, b| label_compare(a, b));
    let atom = names.len() == 1;
    RowShape { names, atom }
}

/// Whether an expression references any of the given names free.
fn references_any(exp: &CoreExpr, names: &AHashSet<Rc<str>>) -> bool {
    match &exp.kind {
        CoreExprKind::Id(named) => names.contains(&named.name),
        CoreExprKind::Literal(_)
        | CoreExprKind::Builtin(_)
        | CoreExprKind::Ctor { .. }
        | CoreExprKind::RecordSelector { .. } => false,
        CoreExprKind::Tuple(elems) | CoreExprKind::List(elems) => {
            elems.iter().any(|e| references_any(e, names))
        }
        CoreExprKind::Apply { func, arg } => {
            references_any(func, names) || references_any(arg, names)
        }
        CoreExprKind::AndAlso(a, b) | CoreExprKind::OrElse(a, b) => {
            references_any(a, names) || references_any(b, names)
        }
        // conservative: shadowing inside binders is ignored, which can
        // only cause a false positive and a fallback to step code
        CoreExprKind::Fn { body, .. } => references_any(body, names),
        CoreExprKind::Case { scrutinee, arms } => {
            references_any(scrutinee, names)
                || arms.iter().any(|arm| references_any(&arm.exp, names))
        }
        CoreExprKind::Let { decl, body } => {
            let decl_refs = match decl.as_ref() {
                crate::core::CoreDecl::NonRecVal { exp, .. } => references_any(exp, names),
                crate::core::CoreDecl::RecVal { binds } => {
                    binds.iter().any(|b| references_any(&b.exp, names))
                }
                _ => false,
            };
            decl_refs || references_any(body, names)
        }
        CoreExprKind::Local { body, .. } => references_any(body, names),
        CoreExprKind::From(from) => from.steps.iter().any(|step| match &step.kind {
            FromStepKind::Scan { source, filter, .. } => {
                references_any(source, names)
                    || filter.as_ref().is_some_and(|f| references_any(f, names))
            }
            FromStepKind::Where(e)
            | FromStepKind::Skip(e)
            | FromStepKind::Take(e)
            | FromStepKind::Yield(e)
            | FromStepKind::Union { arg: e, .. }
            | FromStepKind::Intersect { arg: e, .. }
            | FromStepKind::Except { arg: e, .. } => references_any(e, names),
            FromStepKind::Order(keys) => keys.iter().any(|(k, _)| references_any(k, names)),
            FromStepKind::Group { keys, aggs } => {
                keys.iter().any(|(_, k)| references_any(k, names))
                    || aggs.iter().any(|agg| {
                        references_any(&agg.func, names)
                            || agg.arg.as_ref().is_some_and(|a| references_any(a, names))
                    })
            }
            FromStepKind::Unorder => false,
        }),
    }
}

// ── execution ──────────────────────────────────────────────────────────

/// Runs a plan to a list value.
pub fn execute(rel: &Rel, env: &EvalEnv) -> EvalResult<Value> {
    let shape = rel.shape();
    let rows = run(rel, env)?;
    Ok(Value::list(
        rows.into_iter().map(|row| shape.value_of(row)).collect(),
    ))
}

type Rows = Vec<Vec<Value>>;

fn run(rel: &Rel, env: &EvalEnv) -> EvalResult<Rows> {
    match rel {
        Rel::Scan { pat, source, out } => {
            let collection = source.eval(env)?;
            let mut rows = Vec::new();
            for element in collection.rows()? {
                let mut bound = Vec::new();
                if bind_pat(pat, &element, &mut bound) {
                    rows.push(reorder(&bound, &out.names));
                }
            }
            Ok(rows)
        }
        Rel::Filter { input, pred } => {
            let shape = input.shape();
            let mut rows = run(input, env)?;
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows.drain(..) {
                let row_env = bind_row(env, &shape, &row);
                if pred.eval(&row_env)?.as_bool()? {
                    kept.push(row);
                }
            }
            Ok(kept)
        }
        Rel::Join { left, right, cond, out } => {
            let left_shape = left.shape();
            let right_shape = right.shape();
            let left_rows = run(left, env)?;
            let right_rows = run(right, env)?;
            let mut rows = Vec::new();
            for l in &left_rows {
                for r in &right_rows {
                    let mut pairs: Vec<(Rc<str>, Value)> = left_shape
                        .names
                        .iter()
                        .zip(l.iter())
                        .chain(right_shape.names.iter().zip(r.iter()))
                        .map(|(n, v)| (Rc::clone(n), v.clone()))
                        .collect();
                    pairs.sort_by(|(a, _), (b, _)| label_compare(a, b));
                    let row = reorder(&pairs, &out.names);
                    if let Some(cond) = cond {
                        let row_env = bind_row(env, out, &row);
                        if !cond.eval(&row_env)?.as_bool()? {
                            continue;
                        }
                    }
                    rows.push(row);
                }
            }
            Ok(rows)
        }
        Rel::Project { input, exp, out } => {
            let shape = input.shape();
            let rows = run(input, env)?;
            let mut projected = Vec::with_capacity(rows.len());
            for row in rows {
                let row_env = bind_row(env, &shape, &row);
                let value = exp.eval(&row_env)?;
                if out.atom {
                    projected.push(vec![value]);
                } else {
                    projected.push(out.row_of(value));
                }
            }
            Ok(projected)
        }
        Rel::Aggregate { input, keys, aggs, out } => {
            let shape = input.shape();
            let rows = run(input, env)?;
            let mut groups: IndexMap<Vec<Value>, Rows> = IndexMap::new();
            for row in rows {
                let row_env = bind_row(env, &shape, &row);
                let key: Vec<Value> = keys
                    .iter()
                    .map(|(_, code)| code.eval(&row_env))
                    .collect::<EvalResult<_>>()?;
                groups.entry(key).or_default().push(row);
            }
            let mut result = Vec::with_capacity(groups.len());
            for (key, members) in groups {
                let mut pairs: Vec<(Rc<str>, Value)> = keys
                    .iter()
                    .zip(key)
                    .map(|((name, _), value)| (Rc::clone(name), value))
                    .collect();
                for agg in aggs {
                    let mut items = Vec::with_capacity(members.len());
                    for member in &members {
                        let row_env = bind_row(env, &shape, member);
                        items.push(match &agg.arg {
                            Some(arg) => arg.eval(&row_env)?,
                            None => shape.value_of(member.clone()),
                        });
                    }
                    let func = agg.func.eval(env)?;
                    pairs.push((Rc::clone(&agg.name), crate::eval::apply(&func, Value::list(items))?));
                }
                result.push(reorder(&pairs, &out.names));
            }
            Ok(result)
        }
        Rel::Sort { input, keys } => {
            let shape = input.shape();
            let rows = run(input, env)?;
            let mut decorated = Vec::with_capacity(rows.len());
            for row in rows {
                let row_env = bind_row(env, &shape, &row);
                let key: Vec<Value> = keys
                    .iter()
                    .map(|(code, _)| code.eval(&row_env))
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
            Ok(decorated.into_iter().map(|(_, row)| row).collect())
        }
        Rel::Limit { input, count } => {
            let mut rows = run(input, env)?;
            let n = eval_count(count, env)?;
            rows.truncate(n);
            Ok(rows)
        }
        Rel::Skip { input, count } => {
            let mut rows = run(input, env)?;
            let n = eval_count(count, env)?.min(rows.len());
            rows.drain(..n);
            Ok(rows)
        }
        Rel::Union { input, arg, distinct } => {
            let shape = input.shape();
            let mut rows = run(input, env)?;
            for value in arg.eval(env)?.rows()? {
                rows.push(shape.row_of(value));
            }
            if *distinct {
                rows = dedupe(rows);
            }
            Ok(rows)
        }
        Rel::Intersect { input, arg, distinct } => {
            let shape = input.shape();
            let mut rows = run(input, env)?;
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
            Ok(rows)
        }
        Rel::Except { input, arg, distinct } => {
            let shape = input.shape();
            let mut rows = run(input, env)?;
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
            Ok(rows)
        }
    }
}

fn bind_row(env: &EvalEnv, shape: &RowShape, row: &[Value]) -> EvalEnv {
    env.bind_all(
        shape
            .names
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (Rc::clone(name), value.clone()))
            .collect(),
    )
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

fn eval_count(code: &Code, env: &EvalEnv) -> EvalResult<usize> {
    let n = code.eval(env)?.as_int()?;
    usize::try_from(n).map_err(|_| RuntimeError::Size)
}

fn dedupe(rows: Rows) -> Rows {
    let mut seen: AHashSet<Vec<Value>> = AHashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.clone())).collect()
}

fn count_rows(values: Vec<Value>, shape: &RowShape) -> ahash::AHashMap<Vec<Value>, usize> {
    let mut counts: ahash::AHashMap<Vec<Value>, usize> = ahash::AHashMap::new();
    for value in values {
        *counts.entry(shape.row_of(value)).or_insert(0) += 1;
    }
    counts
}
