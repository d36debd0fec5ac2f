//! Stateful builder for `from` cores.
//!
//! The resolver (and later rewrites) append steps here rather than
//! constructing [`CoreFrom`] directly: the builder maintains the
//! [`StepEnv`] after every step and applies the algebraic simplifications
//! that keep queries in normal form:
//!
//! - `where true` disappears, and a `where` directly after a scan becomes
//!   the scan's filter;
//! - `skip 0` and an empty `order` disappear;
//! - a yield that reproduces the incoming row shape exactly disappears,
//!   except that a single-field record yield `{x = x}` survives as the
//!   last step, where it wraps an atom into a singleton record;
//! - `from x in (from y in ys ...)` splices the inner query and rebinds
//!   its rows with a yield, which then disappears if it is trivial.

use crate::ast::Literal;
use crate::core::{
    CoreExpr, CoreExprKind, CoreFrom, CorePat, CorePatKind, FromStep, FromStepKind, NamedPat,
    StepEnv, step_preserves_order,
};
use crate::error::Pos;
use crate::types::{Type, label_compare};

pub struct FromBuilder {
    steps: Vec<FromStep>,
}

impl FromBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// The environment after the last appended step.
    pub fn env(&self) -> StepEnv {
        self.steps.last().map_or_else(StepEnv::empty, |s| s.env.clone())
    }

    pub fn build(self, element_ty: Type) -> CoreFrom {
        CoreFrom {
            steps: self.steps,
            element_ty,
        }
    }

    // ── steps ──────────────────────────────────────────────────────────

    pub fn scan(&mut self, pos: Pos, pat: CorePat, source: CoreExpr) {
        // flatten a nested from when it is the whole input
        if self.steps.is_empty() {
            if let (CoreExprKind::From(_), CorePatKind::Id(outer)) = (&source.kind, &pat.kind) {
                let outer = outer.clone();
                let inner_ty = pat.ty.clone();
                let CoreExprKind::From(inner) = source.kind else {
                    unreachable!()
                };
                self.splice_nested(pos, *inner, outer, inner_ty);
                return;
            }
        }
        let input = self.env();
        let mut bindings = input.bindings.clone();
        for named in pat.binders() {
            bindings.push((named.clone(), binder_type(&pat, named)));
        }
        sort_bindings(&mut bindings);
        let atom = bindings.len() == 1;
        let ordered = input.ordered;
        self.steps.push(FromStep {
            pos,
            kind: FromStepKind::Scan {
                pat,
                source,
                filter: None,
            },
            env: StepEnv {
                bindings,
                atom,
                ordered,
            },
        });
    }

    fn splice_nested(&mut self, pos: Pos, inner: CoreFrom, outer: NamedPat, outer_ty: Type) {
        let inner_env = inner.last_env();
        self.steps = inner.steps;
        // rebind the inner row under the outer name
        let row = self.row_expr(&pos, &inner_env);
        let exp = CoreExpr::new(
            pos.clone(),
            crate::types::record_type(vec![(outer.name.to_string(), outer_ty.clone())]),
            CoreExprKind::Tuple(vec![row]),
        );
        self.yield_step(pos, exp, vec![(outer, outer_ty)]);
    }

    /// An expression that evaluates to the current row: the single binding
    /// for an atom env, otherwise the record of all bindings.
    fn row_expr(&self, pos: &Pos, env: &StepEnv) -> CoreExpr {
        if env.atom && env.bindings.len() == 1 {
            let (named, ty) = &env.bindings[0];
            CoreExpr::new(pos.clone(), ty.clone(), CoreExprKind::Id(named.clone()))
        } else {
            let fields: Vec<CoreExpr> = env
                .bindings
                .iter()
                .map(|(named, ty)| {
                    CoreExpr::new(pos.clone(), ty.clone(), CoreExprKind::Id(named.clone()))
                })
                .collect();
            CoreExpr::new(pos.clone(), env.row_type(), CoreExprKind::Tuple(fields))
        }
    }

    pub fn where_step(&mut self, pos: Pos, cond: CoreExpr) {
        if matches!(cond.kind, CoreExprKind::Literal(Literal::Bool(true))) {
            return;
        }
        self.drop_pending_trivial_yield();
        // a filter directly after a scan belongs to the scan
        if let Some(FromStep {
            kind: FromStepKind::Scan { filter: filter @ None, .. },
            ..
        }) = self.steps.last_mut()
        {
            *filter = Some(cond);
            return;
        }
        let env = self.env();
        self.push(pos, FromStepKind::Where(cond), env);
    }

    pub fn skip(&mut self, pos: Pos, count: CoreExpr) {
        if matches!(cond_int(&count), Some(0)) {
            return;
        }
        self.drop_pending_trivial_yield();
        let env = self.env();
        self.push(pos, FromStepKind::Skip(count), env);
    }

    pub fn take(&mut self, pos: Pos, count: CoreExpr) {
        self.drop_pending_trivial_yield();
        let env = self.env();
        self.push(pos, FromStepKind::Take(count), env);
    }

    pub fn order(&mut self, pos: Pos, keys: Vec<(CoreExpr, bool)>) {
        if keys.is_empty() {
            return;
        }
        self.drop_pending_trivial_yield();
        let mut env = self.env();
        env.ordered = true;
        self.push(pos, FromStepKind::Order(keys), env);
    }

    pub fn unorder(&mut self, pos: Pos) {
        self.drop_pending_trivial_yield();
        let mut env = self.env();
        env.ordered = false;
        self.push(pos, FromStepKind::Unorder, env);
    }

    pub fn group(
        &mut self,
        pos: Pos,
        keys: Vec<(NamedPat, CoreExpr)>,
        aggs: Vec<crate::core::CoreAgg>,
    ) {
        self.drop_pending_trivial_yield();
        let mut bindings: Vec<(NamedPat, Type)> = keys
            .iter()
            .map(|(named, exp)| (named.clone(), exp.ty.clone()))
            .chain(aggs.iter().map(|agg| (agg.name.clone(), agg.func_result_type())))
            .collect();
        sort_bindings(&mut bindings);
        let atom = bindings.len() == 1;
        self.steps.push(FromStep {
            pos,
            kind: FromStepKind::Group { keys, aggs },
            env: StepEnv {
                bindings,
                atom,
                ordered: false,
            },
        });
    }

    /// Appends a yield. `bindings` are the names visible afterwards: the
    /// record fields for a record-typed yield, or the single atom binding.
    pub fn yield_step(&mut self, pos: Pos, exp: CoreExpr, bindings: Vec<(NamedPat, Type)>) {
        self.drop_pending_trivial_yield();
        let input = self.env();
        if !input.atom && self.is_trivial_yield(&exp, &input) {
            // reproduces the incoming record exactly; no effect on shape
            return;
        }
        if let (CoreExprKind::Id(named), true) = (&exp.kind, input.atom) {
            if input.bindings.len() == 1 && input.bindings[0].0 == *named {
                // `yield x` over the atom binding x
                return;
            }
        }
        let mut bindings = bindings;
        sort_bindings(&mut bindings);
        let atom = !matches!(exp.ty, Type::Record(_));
        let ordered = input.ordered;
        self.steps.push(FromStep {
            pos,
            kind: FromStepKind::Yield(exp),
            env: StepEnv {
                bindings,
                atom,
                ordered,
            },
        });
    }

    pub fn set_op(&mut self, pos: Pos, kind: SetOp, distinct: bool, arg: CoreExpr) {
        self.drop_pending_trivial_yield();
        let env = self.env();
        let step = match kind {
            SetOp::Union => FromStepKind::Union { distinct, arg },
            SetOp::Intersect => FromStepKind::Intersect { distinct, arg },
            SetOp::Except => FromStepKind::Except { distinct, arg },
        };
        self.push(pos, step, env);
    }

    // ── internals ──────────────────────────────────────────────────────

    fn push(&mut self, pos: Pos, kind: FromStepKind, mut env: StepEnv) {
        env.ordered = step_preserves_order(&kind, self.env().ordered) && env.ordered
            || matches!(kind, FromStepKind::Order(_));
        self.steps.push(FromStep { pos, kind, env });
    }

    /// A yield that only re-labels the current bindings matters solely as
    /// the last step, where a single-field `{x = x}` wraps an atom into a
    /// singleton record; appending anything after it removes it first.
    fn drop_pending_trivial_yield(&mut self) {
        let Some(last) = self.steps.last() else { return };
        let FromStepKind::Yield(exp) = &last.kind else {
            return;
        };
        if last.env.atom {
            return;
        }
        let input = if self.steps.len() >= 2 {
            self.steps[self.steps.len() - 2].env.clone()
        } else {
            StepEnv::empty()
        };
        if self.is_trivial_yield(exp, &input) {
            self.steps.pop();
        }
    }

    /// True when `exp` rebuilds the current bindings verbatim: a record of
    /// `label = label` references matching the input bindings one-to-one.
    /// Whether that makes the yield removable depends on the caller: over
    /// a record row it is a no-op, over an atom row it wraps.
    fn is_trivial_yield(&self, exp: &CoreExpr, input: &StepEnv) -> bool {
        let CoreExprKind::Tuple(fields) = &exp.kind else {
            return false;
        };
        let Type::Record(field_tys) = &exp.ty else {
            return false;
        };
        if field_tys.len() != input.bindings.len() {
            return false;
        }
        field_tys
            .iter()
            .zip(fields.iter())
            .zip(input.bindings.iter())
            .all(|(((label, _), field), (named, _))| {
                label == named.name.as_ref()
                    && matches!(&field.kind, CoreExprKind::Id(id) if id == named)
            })
    }
}

impl Default for FromBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

fn sort_bindings(bindings: &mut [(NamedPat, Type)]) {
    bindings.sort_by(|(a, _), (b, _)| label_compare(&a.name, &b.name));
}

fn cond_int(exp: &CoreExpr) -> Option<i64> {
    match &exp.kind {
        CoreExprKind::Literal(Literal::Int(n)) => Some(*n),
        _ => None,
    }
}

/// The type a binder has inside a pattern, found by walking the pattern's
/// type alongside its structure.
fn binder_type(pat: &CorePat, target: &NamedPat) -> Type {
    fn walk(pat: &CorePat, target: &NamedPat) -> Option<Type> {
        match &pat.kind {
            CorePatKind::Id(named) if named == target => Some(pat.ty.clone()),
            CorePatKind::Id(_) | CorePatKind::Wild | CorePatKind::Literal(_) => None,
            CorePatKind::Ctor { arg, .. } => arg.as_ref().and_then(|p| walk(p, target)),
            CorePatKind::Cons(hd, tl) => walk(hd, target).or_else(|| walk(tl, target)),
            CorePatKind::List(elems) | CorePatKind::Tuple(elems) => {
                elems.iter().find_map(|p| walk(p, target))
            }
            CorePatKind::Record(fields) => fields.iter().find_map(|(_, p)| walk(p, target)),
        }
    }
    walk(pat, target).unwrap_or_else(|| pat.ty.clone())
}

impl crate::core::CoreAgg {
    /// The result type of applying the aggregate to its argument list.
    pub fn func_result_type(&self) -> Type {
        match &self.func.ty {
            Type::Fn(_, result) => (**result).clone(),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::error::Pos;
    use crate::types::Type;

    fn named(name: &str, ordinal: u32) -> NamedPat {
        NamedPat {
            name: name.into(),
            ordinal,
        }
    }

    fn id_pat(name: &str, ordinal: u32, ty: Type) -> CorePat {
        CorePat::new(Pos::internal(), ty, CorePatKind::Id(named(name, ordinal)))
    }

    fn int_list() -> CoreExpr {
        CoreExpr::new(
            Pos::internal(),
            Type::list(Type::INT),
            CoreExprKind::List(vec![]),
        )
    }

    #[test]
    fn where_true_is_dropped() {
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        b.where_step(
            Pos::internal(),
            CoreExpr::new(
                Pos::internal(),
                Type::BOOL,
                CoreExprKind::Literal(Literal::Bool(true)),
            ),
        );
        let from = b.build(Type::INT);
        assert_eq!(from.steps.len(), 1);
        assert!(matches!(
            &from.steps[0].kind,
            FromStepKind::Scan { filter: None, .. }
        ));
    }

    #[test]
    fn where_after_scan_becomes_filter() {
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        let cond = CoreExpr::new(
            Pos::internal(),
            Type::BOOL,
            CoreExprKind::Id(named("x", 0)),
        );
        b.where_step(Pos::internal(), cond);
        let from = b.build(Type::INT);
        assert_eq!(from.steps.len(), 1);
        assert!(matches!(
            &from.steps[0].kind,
            FromStepKind::Scan { filter: Some(_), .. }
        ));
    }

    #[test]
    fn skip_zero_is_dropped() {
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        b.skip(
            Pos::internal(),
            CoreExpr::new(
                Pos::internal(),
                Type::INT,
                CoreExprKind::Literal(Literal::Int(0)),
            ),
        );
        assert_eq!(b.build(Type::INT).steps.len(), 1);
    }

    #[test]
    fn atom_identity_yield_is_dropped() {
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        let exp = CoreExpr::new(Pos::internal(), Type::INT, CoreExprKind::Id(named("x", 0)));
        b.yield_step(Pos::internal(), exp, vec![(named("x", 0), Type::INT)]);
        assert_eq!(b.build(Type::INT).steps.len(), 1);
    }

    #[test]
    fn singleton_record_yield_survives_only_at_the_end() {
        let wrap = |b: &mut FromBuilder| {
            let exp = CoreExpr::new(
                Pos::internal(),
                crate::types::record_type(vec![("x".to_owned(), Type::INT)]),
                CoreExprKind::Tuple(vec![CoreExpr::new(
                    Pos::internal(),
                    Type::INT,
                    CoreExprKind::Id(named("x", 0)),
                )]),
            );
            b.yield_step(Pos::internal(), exp, vec![(named("x", 0), Type::INT)]);
        };

        // as the last step it wraps the atom into a record
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        wrap(&mut b);
        assert_eq!(b.steps.len(), 2);

        // followed by another step it has no effect and is removed
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        wrap(&mut b);
        b.unorder(Pos::internal());
        let from = b.build(Type::INT);
        assert_eq!(from.steps.len(), 2);
        assert!(matches!(from.steps[1].kind, FromStepKind::Unorder));
    }

    #[test]
    fn group_output_is_unordered() {
        let mut b = FromBuilder::new();
        b.scan(Pos::internal(), id_pat("x", 0, Type::INT), int_list());
        b.order(
            Pos::internal(),
            vec![(
                CoreExpr::new(Pos::internal(), Type::INT, CoreExprKind::Id(named("x", 0))),
                false,
            )],
        );
        assert!(b.env().ordered);
        let key = (
            named("k", 1),
            CoreExpr::new(Pos::internal(), Type::INT, CoreExprKind::Id(named("x", 0))),
        );
        b.group(Pos::internal(), vec![key], vec![]);
        assert!(!b.env().ordered);
    }
}
