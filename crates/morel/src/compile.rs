//! Lowering typed core to executable code.
//!
//! Every core variant compiles to a [`Code`] node. `from` expressions go
//! one of two ways: a query whose steps reduce to
//! select-project-join-aggregate and that scans more than one source or
//! groups is routed to the relational planner; everything else becomes
//! nested-loop step code.

use std::rc::Rc;

use crate::ast::Literal;
use crate::core::{
    CoreAgg, CoreDecl, CoreExpr, CoreExprKind, CoreFrom, CorePat, FromStepKind, StepEnv,
};
use crate::error::{CompileError, CompileResult};
use crate::eval::{AggCode, Code, FnCode, FromCode, RowShape, StepCode};
use crate::value::Value;

/// The executable form of a top-level declaration.
pub enum DeclCode {
    /// Evaluate `code`, match it against `pat`, commit the bindings.
    Val { pat: CorePat, code: Code },
    /// Install mutually recursive closures.
    Rec { binds: Vec<(Rc<str>, Rc<FnCode>)> },
    /// Purely static declarations (datatype, type, over).
    Nothing,
}

pub fn compile_decl(decl: &CoreDecl) -> CompileResult<DeclCode> {
    match decl {
        CoreDecl::NonRecVal { pat, exp } => Ok(DeclCode::Val {
            pat: pat.clone(),
            code: compile_expr(exp)?,
        }),
        CoreDecl::RecVal { binds } => {
            let binds = binds
                .iter()
                .map(|bind| {
                    let CoreExprKind::Fn { param, body } = &bind.exp.kind else {
                        return Err(CompileError::new(
                            bind.exp.pos.clone(),
                            "recursive binding is not a function",
                        ));
                    };
                    Ok((
                        Rc::clone(&bind.name.name),
                        Rc::new(FnCode {
                            param: param.clone(),
                            body: compile_expr(body)?,
                        }),
                    ))
                })
                .collect::<CompileResult<_>>()?;
            Ok(DeclCode::Rec { binds })
        }
        CoreDecl::Datatype(_) | CoreDecl::TypeAlias { .. } | CoreDecl::Over { .. } => {
            Ok(DeclCode::Nothing)
        }
    }
}

pub fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Unit => Value::Unit,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Real(x) => Value::Real(*x),
        Literal::Char(c) => Value::Char(*c),
        Literal::Str(s) => Value::Str(Rc::clone(s)),
    }
}

pub fn compile_expr(exp: &CoreExpr) -> CompileResult<Code> {
    match &exp.kind {
        CoreExprKind::Literal(lit) => Ok(Code::Value(literal_value(lit))),
        CoreExprKind::Id(named) => Ok(Code::Lookup(Rc::clone(&named.name))),
        CoreExprKind::Builtin(tag) => Ok(Code::Value(Value::builtin(*tag))),
        CoreExprKind::Ctor { name, data } => {
            if data.ctor_has_payload(name) {
                Ok(Code::Value(Value::CtorFn(Rc::clone(name))))
            } else {
                Ok(Code::Value(Value::Ctor(Rc::clone(name), None)))
            }
        }
        CoreExprKind::RecordSelector { label, slot } => Ok(Code::Value(Value::Selector {
            label: Rc::clone(label),
            slot: *slot,
        })),
        CoreExprKind::Tuple(elems) => Ok(Code::Tuple(compile_all(elems)?)),
        CoreExprKind::List(elems) => Ok(Code::List(compile_all(elems)?)),
        CoreExprKind::Apply { func, arg } => Ok(Code::Apply(
            Box::new(compile_expr(func)?),
            Box::new(compile_expr(arg)?),
        )),
        CoreExprKind::AndAlso(a, b) => Ok(Code::AndAlso(
            Box::new(compile_expr(a)?),
            Box::new(compile_expr(b)?),
        )),
        CoreExprKind::OrElse(a, b) => Ok(Code::OrElse(
            Box::new(compile_expr(a)?),
            Box::new(compile_expr(b)?),
        )),
        CoreExprKind::Fn { param, body } => Ok(Code::Fn(Rc::new(FnCode {
            param: param.clone(),
            body: compile_expr(body)?,
        }))),
        CoreExprKind::Case { scrutinee, arms } => {
            let arms = arms
                .iter()
                .map(|arm| Ok((arm.pat.clone(), compile_expr(&arm.exp)?)))
                .collect::<CompileResult<_>>()?;
            Ok(Code::Case {
                scrutinee: Box::new(compile_expr(scrutinee)?),
                arms,
            })
        }
        CoreExprKind::Let { decl, body } => {
            let body = Box::new(compile_expr(body)?);
            match compile_decl(decl)? {
                DeclCode::Val { pat, code } => Ok(Code::Let {
                    pat,
                    exp: Box::new(code),
                    body,
                }),
                DeclCode::Rec { binds } => Ok(Code::LetRec { binds, body }),
                DeclCode::Nothing => Ok(*body),
            }
        }
        CoreExprKind::Local { body, .. } => compile_expr(body),
        CoreExprKind::From(from) => compile_from(from),
    }
}

fn compile_all(exps: &[CoreExpr]) -> CompileResult<Vec<Code>> {
    exps.iter().map(compile_expr).collect()
}

pub fn shape_of(env: &StepEnv) -> RowShape {
    RowShape {
        names: env
            .bindings
            .iter()
            .map(|(named, _)| Rc::clone(&named.name))
            .collect(),
        atom: env.atom,
    }
}

fn compile_from(from: &CoreFrom) -> CompileResult<Code> {
    if let Some(rel) = crate::plan::try_plan(from)? {
        return Ok(Code::Plan(Rc::new(rel)));
    }
    let steps = from
        .steps
        .iter()
        .map(|step| {
            let out = shape_of(&step.env);
            Ok(match &step.kind {
                FromStepKind::Scan { pat, source, filter } => StepCode::Scan {
                    pat: pat.clone(),
                    source: compile_expr(source)?,
                    filter: filter.as_ref().map(compile_expr).transpose()?,
                    out,
                },
                FromStepKind::Where(cond) => StepCode::Where {
                    cond: compile_expr(cond)?,
                },
                FromStepKind::Skip(count) => StepCode::Skip {
                    count: compile_expr(count)?,
                },
                FromStepKind::Take(count) => StepCode::Take {
                    count: compile_expr(count)?,
                },
                FromStepKind::Order(keys) => StepCode::Order {
                    keys: keys
                        .iter()
                        .map(|(key, desc)| Ok((compile_expr(key)?, *desc)))
                        .collect::<CompileResult<_>>()?,
                },
                FromStepKind::Group { keys, aggs } => StepCode::Group {
                    keys: keys
                        .iter()
                        .map(|(named, key)| Ok((Rc::clone(&named.name), compile_expr(key)?)))
                        .collect::<CompileResult<_>>()?,
                    aggs: compile_aggs(aggs)?,
                    out,
                },
                FromStepKind::Yield(exp) => StepCode::Yield {
                    exp: compile_expr(exp)?,
                    out,
                },
                FromStepKind::Unorder => StepCode::Unorder,
                FromStepKind::Union { distinct, arg } => StepCode::Union {
                    distinct: *distinct,
                    arg: compile_expr(arg)?,
                },
                FromStepKind::Intersect { distinct, arg } => StepCode::Intersect {
                    distinct: *distinct,
                    arg: compile_expr(arg)?,
                },
                FromStepKind::Except { distinct, arg } => StepCode::Except {
                    distinct: *distinct,
                    arg: compile_expr(arg)?,
                },
            })
        })
        .collect::<CompileResult<Vec<_>>>()?;
    let out = shape_of(&from.last_env());
    Ok(Code::From(Rc::new(FromCode { steps, out })))
}

pub fn compile_aggs(aggs: &[CoreAgg]) -> CompileResult<Vec<AggCode>> {
    aggs.iter()
        .map(|agg| {
            Ok(AggCode {
                name: Rc::clone(&agg.name.name),
                func: compile_expr(&agg.func)?,
                arg: agg.arg.as_ref().map(compile_expr).transpose()?,
            })
        })
        .collect()
}
