//! Unification and generalization.
//!
//! The inference context owns a union-find table of type variables (the
//! composed substitution of Algorithm W), the let-nesting level of every
//! variable, and the equality constraint of variables introduced by `''a`
//! annotations or by the polymorphic equality operator. Generalization is
//! level-based: a variable created at a deeper level than the binding being
//! generalized cannot escape into the environment, so quantifying exactly
//! the variables with `level > current` is the same as quantifying the
//! variables free in the type but not in the environment.

use ena::unify::InPlaceUnificationTable;

use crate::error::{Pos, TypeError, TypeErrorKind, TypeResult};
use crate::print::format_type;
use crate::types::{Scheme, TyVar, Type};

pub struct InferCtx {
    table: InPlaceUnificationTable<TyVar>,
    /// Level at which each variable was created, indexed by `TyVar.0`.
    var_levels: Vec<u32>,
    /// Whether each variable must resolve to an equality-admitting type.
    var_eq: Vec<bool>,
    current_level: u32,
}

impl InferCtx {
    pub fn new() -> Self {
        Self {
            table: InPlaceUnificationTable::new(),
            var_levels: Vec::new(),
            var_eq: Vec::new(),
            current_level: 0,
        }
    }

    // ── variables and levels ───────────────────────────────────────────

    pub fn fresh_var(&mut self) -> Type {
        Type::Var(self.new_var(false))
    }

    pub fn fresh_eq_var(&mut self) -> Type {
        Type::Var(self.new_var(true))
    }

    fn new_var(&mut self, eq: bool) -> TyVar {
        let var = self.table.new_key(None);
        let index = var.0 as usize;
        while self.var_levels.len() <= index {
            self.var_levels.push(0);
            self.var_eq.push(false);
        }
        self.var_levels[index] = self.current_level;
        self.var_eq[index] = eq;
        var
    }

    pub fn enter_level(&mut self) {
        self.current_level += 1;
    }

    pub fn leave_level(&mut self) {
        debug_assert!(self.current_level > 0, "cannot leave level 0");
        self.current_level -= 1;
    }

    fn level_of(&self, var: TyVar) -> u32 {
        self.var_levels.get(var.0 as usize).copied().unwrap_or(0)
    }

    fn is_eq_var(&self, var: TyVar) -> bool {
        self.var_eq.get(var.0 as usize).copied().unwrap_or(false)
    }

    // ── resolution ─────────────────────────────────────────────────────

    /// Applies the current substitution to a type, deeply. Unbound
    /// variables normalize to their union-find root so that two unified
    /// variables print and generalize as one.
    pub fn resolve(&mut self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.resolve(&inner),
                None => Type::Var(self.table.find(*v)),
            },
            Type::Prim(_) | Type::Gen(_) => ty.clone(),
            Type::Fn(p, r) => {
                let p = self.resolve(p);
                let r = self.resolve(r);
                Type::func(p, r)
            }
            Type::Tuple(elems) => Type::Tuple(elems.iter().map(|t| self.resolve(&t.clone())).collect()),
            Type::Record(fields) => Type::Record(
                fields
                    .clone()
                    .iter()
                    .map(|(l, t)| (l.clone(), self.resolve(t)))
                    .collect(),
            ),
            Type::List(t) => {
                let t = self.resolve(t);
                Type::list(t)
            }
            Type::Data(data, args) => {
                let args = args.clone().iter().map(|t| self.resolve(t)).collect();
                Type::Data(std::rc::Rc::clone(data), args)
            }
        }
    }

    /// Renders a type for an error message.
    pub fn render(&mut self, ty: &Type) -> String {
        format_type(&self.resolve(ty))
    }

    fn occurs_in(&mut self, var: TyVar, ty: &Type) -> bool {
        match ty {
            Type::Var(v) => {
                if self.table.find(*v) == self.table.find(var) {
                    return true;
                }
                match self.table.probe_value(*v) {
                    Some(inner) => self.occurs_in(var, &inner),
                    None => false,
                }
            }
            Type::Prim(_) | Type::Gen(_) => false,
            Type::Fn(p, r) => self.occurs_in(var, &p.clone()) || self.occurs_in(var, &r.clone()),
            Type::Tuple(elems) => elems.clone().iter().any(|t| self.occurs_in(var, t)),
            Type::Record(fields) => fields.clone().iter().any(|(_, t)| self.occurs_in(var, t)),
            Type::List(t) => self.occurs_in(var, &t.clone()),
            Type::Data(_, args) => args.clone().iter().any(|t| self.occurs_in(var, t)),
        }
    }

    /// Lowers the level of every unbound variable in `ty` to at most
    /// `level`. Binding a variable of level L to a type containing deeper
    /// variables would otherwise let those variables generalize while still
    /// reachable from level L.
    fn update_levels(&mut self, ty: &Type, level: u32) {
        match ty {
            Type::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.update_levels(&inner, level),
                None => {
                    let root = self.table.find(*v);
                    let index = root.0 as usize;
                    if self.var_levels[index] > level {
                        self.var_levels[index] = level;
                    }
                }
            },
            Type::Prim(_) | Type::Gen(_) => {}
            Type::Fn(p, r) => {
                self.update_levels(&p.clone(), level);
                self.update_levels(&r.clone(), level);
            }
            Type::Tuple(elems) => {
                for t in elems.clone() {
                    self.update_levels(&t, level);
                }
            }
            Type::Record(fields) => {
                for (_, t) in fields.clone() {
                    self.update_levels(&t, level);
                }
            }
            Type::List(t) => self.update_levels(&t.clone(), level),
            Type::Data(_, args) => {
                for t in args.clone() {
                    self.update_levels(&t, level);
                }
            }
        }
    }

    // ── equality constraints ───────────────────────────────────────────

    /// Whether a (resolved) type admits structural equality. Functions do
    /// not; everything else does if its components do. Unbound variables
    /// are constrained to equality and admit it.
    fn require_eq(&mut self, ty: &Type, pos: &Pos) -> TypeResult<()> {
        match ty {
            Type::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.require_eq(&inner, pos),
                None => {
                    let root = self.table.find(*v);
                    self.var_eq[root.0 as usize] = true;
                    Ok(())
                }
            },
            Type::Prim(_) | Type::Gen(_) => Ok(()),
            Type::Fn(..) => {
                let rendered = self.render(ty);
                Err(TypeError::new(
                    pos.clone(),
                    TypeErrorKind::Unify {
                        expected: "an equality type".to_owned(),
                        actual: rendered,
                    },
                ))
            }
            Type::Tuple(elems) => {
                for t in elems.clone() {
                    self.require_eq(&t, pos)?;
                }
                Ok(())
            }
            Type::Record(fields) => {
                for (_, t) in fields.clone() {
                    self.require_eq(&t, pos)?;
                }
                Ok(())
            }
            Type::List(t) => self.require_eq(&t.clone(), pos),
            Type::Data(_, args) => {
                for t in args.clone() {
                    self.require_eq(&t, pos)?;
                }
                Ok(())
            }
        }
    }

    // ── unification ────────────────────────────────────────────────────

    /// Unifies two types, recording the solution in the table. On success,
    /// applying the substitution to both arguments yields the same type.
    pub fn unify(&mut self, a: &Type, b: &Type, pos: &Pos) -> TypeResult<()> {
        let a = self.shallow(a);
        let b = self.shallow(b);
        match (&a, &b) {
            (Type::Var(v1), Type::Var(v2)) if v1 == v2 => Ok(()),
            (Type::Var(v1), Type::Var(v2)) => {
                let level = self.level_of(*v1).min(self.level_of(*v2));
                let eq = self.is_eq_var(*v1) || self.is_eq_var(*v2);
                self.table
                    .unify_var_var(*v1, *v2)
                    .expect("unifying two unbound variables cannot fail");
                let root = self.table.find(*v1);
                self.var_levels[root.0 as usize] = level;
                self.var_eq[root.0 as usize] = eq;
                Ok(())
            }
            (Type::Var(v), ty) | (ty, Type::Var(v)) => {
                let v = *v;
                let ty = ty.clone();
                if self.occurs_in(v, &ty) {
                    let rendered = self.render(&ty);
                    return Err(TypeError::new(pos.clone(), TypeErrorKind::Occurs { ty: rendered }));
                }
                if self.is_eq_var(v) {
                    self.require_eq(&ty, pos)?;
                }
                self.update_levels(&ty, self.level_of(v));
                self.table
                    .unify_var_value(v, Some(ty))
                    .expect("binding an unbound variable cannot fail");
                Ok(())
            }
            (Type::Prim(p1), Type::Prim(p2)) if p1 == p2 => Ok(()),
            (Type::Gen(i), Type::Gen(j)) if i == j => Ok(()),
            (Type::Fn(p1, r1), Type::Fn(p2, r2)) => {
                self.unify(p1, p2, pos)?;
                self.unify(r1, r2, pos)
            }
            (Type::List(t1), Type::List(t2)) => self.unify(t1, t2, pos),
            (Type::Tuple(e1), Type::Tuple(e2)) if e1.len() == e2.len() => {
                for (t1, t2) in e1.clone().iter().zip(e2.clone().iter()) {
                    self.unify(t1, t2, pos)?;
                }
                Ok(())
            }
            (Type::Record(f1), Type::Record(f2)) => {
                // both field lists are canonically ordered, so a single
                // pairwise walk decides set equality
                if f1.len() != f2.len() {
                    return Err(self.field_mismatch(&a, &b, pos));
                }
                for ((l1, _), (l2, _)) in f1.iter().zip(f2.iter()) {
                    if l1 != l2 {
                        return Err(self.field_mismatch(&a, &b, pos));
                    }
                }
                for ((_, t1), (_, t2)) in f1.clone().iter().zip(f2.clone().iter()) {
                    self.unify(t1, t2, pos)?;
                }
                Ok(())
            }
            (Type::Data(d1, a1), Type::Data(d2, a2)) if d1 == d2 && a1.len() == a2.len() => {
                for (t1, t2) in a1.clone().iter().zip(a2.clone().iter()) {
                    self.unify(t1, t2, pos)?;
                }
                Ok(())
            }
            _ => {
                let expected = self.render(&a);
                let actual = self.render(&b);
                Err(TypeError::new(
                    pos.clone(),
                    TypeErrorKind::Unify { expected, actual },
                ))
            }
        }
    }

    fn field_mismatch(&mut self, a: &Type, b: &Type, pos: &Pos) -> TypeError {
        // name a field present in one record but not the other
        let (Type::Record(f1), Type::Record(f2)) = (a, b) else {
            unreachable!("field_mismatch called on records");
        };
        let labels2: Vec<&String> = f2.iter().map(|(l, _)| l).collect();
        let missing = f1
            .iter()
            .map(|(l, _)| l)
            .find(|l| !labels2.contains(l))
            .cloned()
            .unwrap_or_else(|| f2[0].0.clone());
        let rendered = self.render(b);
        TypeError::new(
            pos.clone(),
            TypeErrorKind::FieldMismatch {
                label: missing,
                ty: rendered,
            },
        )
    }

    /// Follows variable indirection one step, leaving structure alone.
    fn shallow(&mut self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.table.probe_value(*v) {
                Some(inner) => self.shallow(&inner),
                None => Type::Var(self.table.find(*v)),
            },
            other => other.clone(),
        }
    }

    /// Tries a unification without committing anything. Used for overload
    /// instance selection.
    pub fn unifies(&mut self, a: &Type, b: &Type) -> bool {
        let snapshot = self.table.snapshot();
        let levels = self.var_levels.clone();
        let eqs = self.var_eq.clone();
        let ok = self.unify(a, b, &Pos::internal()).is_ok();
        self.table.rollback_to(snapshot);
        self.var_levels = levels;
        self.var_eq = eqs;
        ok
    }

    // ── generalization and instantiation ───────────────────────────────

    /// Generalizes a type into a scheme, quantifying every variable whose
    /// level is deeper than the current one. Also returns which quantified
    /// variables carry an equality constraint.
    pub fn generalize(&mut self, ty: &Type) -> (Scheme, Vec<bool>) {
        let resolved = self.resolve(ty);
        let mut quantified: Vec<TyVar> = Vec::new();
        collect_vars(&resolved, &mut quantified);
        quantified.retain(|v| self.level_of(*v) > self.current_level);
        let eq_vars = quantified.iter().map(|v| self.is_eq_var(*v)).collect();
        let body = map_vars(&resolved, &quantified);
        (
            Scheme {
                arity: quantified.len() as u32,
                ty: body,
            },
            eq_vars,
        )
    }

    /// Replaces the scheme's bound variables with fresh ones.
    pub fn instantiate(&mut self, scheme: &Scheme) -> Type {
        if scheme.arity == 0 {
            return scheme.ty.clone();
        }
        let fresh: Vec<Type> = (0..scheme.arity).map(|_| self.fresh_var()).collect();
        crate::types::subst_gen(&scheme.ty, &fresh)
    }
}

impl Default for InferCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects unbound variables in first-appearance order, deduplicated.
fn collect_vars(ty: &Type, out: &mut Vec<TyVar>) {
    match ty {
        Type::Var(v) => {
            if !out.contains(v) {
                out.push(*v);
            }
        }
        Type::Prim(_) | Type::Gen(_) => {}
        Type::Fn(p, r) => {
            collect_vars(p, out);
            collect_vars(r, out);
        }
        Type::Tuple(elems) => elems.iter().for_each(|t| collect_vars(t, out)),
        Type::Record(fields) => fields.iter().for_each(|(_, t)| collect_vars(t, out)),
        Type::List(t) => collect_vars(t, out),
        Type::Data(_, args) => args.iter().for_each(|t| collect_vars(t, out)),
    }
}

fn map_vars(ty: &Type, quantified: &[TyVar]) -> Type {
    match ty {
        Type::Var(v) => match quantified.iter().position(|q| q == v) {
            Some(i) => Type::Gen(i as u32),
            None => ty.clone(),
        },
        Type::Prim(_) | Type::Gen(_) => ty.clone(),
        Type::Fn(p, r) => Type::func(map_vars(p, quantified), map_vars(r, quantified)),
        Type::Tuple(elems) => Type::Tuple(elems.iter().map(|t| map_vars(t, quantified)).collect()),
        Type::Record(fields) => Type::Record(
            fields
                .iter()
                .map(|(l, t)| (l.clone(), map_vars(t, quantified)))
                .collect(),
        ),
        Type::List(t) => Type::list(map_vars(t, quantified)),
        Type::Data(data, args) => Type::Data(
            std::rc::Rc::clone(data),
            args.iter().map(|t| map_vars(t, quantified)).collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record_type;

    #[test]
    fn unify_binds_variables() {
        let mut ctx = InferCtx::new();
        let v = ctx.fresh_var();
        ctx.unify(&v, &Type::INT, &Pos::internal()).unwrap();
        assert_eq!(ctx.resolve(&v), Type::INT);
    }

    #[test]
    fn unification_is_sound() {
        // if unify(a, b) succeeds, the substitution maps both to one type
        let mut ctx = InferCtx::new();
        let v1 = ctx.fresh_var();
        let v2 = ctx.fresh_var();
        let a = Type::func(v1.clone(), Type::INT);
        let b = Type::func(Type::BOOL, v2.clone());
        ctx.unify(&a, &b, &Pos::internal()).unwrap();
        assert_eq!(ctx.resolve(&a), ctx.resolve(&b));
    }

    #[test]
    fn occurs_check_rejects_cyclic_substitution() {
        let mut ctx = InferCtx::new();
        let v = ctx.fresh_var();
        let cyclic = Type::func(v.clone(), Type::INT);
        assert!(ctx.unify(&v, &cyclic, &Pos::internal()).is_err());
    }

    #[test]
    fn record_fields_match_as_sets() {
        let mut ctx = InferCtx::new();
        let t1 = record_type(vec![
            ("a".to_owned(), Type::INT),
            ("b".to_owned(), Type::BOOL),
        ]);
        let t2 = record_type(vec![
            ("b".to_owned(), Type::BOOL),
            ("a".to_owned(), Type::INT),
        ]);
        ctx.unify(&t1, &t2, &Pos::internal()).unwrap();

        let t3 = record_type(vec![("a".to_owned(), Type::INT)]);
        assert!(ctx.unify(&t1, &t3, &Pos::internal()).is_err());
    }

    #[test]
    fn generalize_quantifies_inner_variables_only() {
        let mut ctx = InferCtx::new();
        let outer = ctx.fresh_var();
        ctx.enter_level();
        let inner = ctx.fresh_var();
        let ty = Type::func(inner.clone(), Type::func(outer.clone(), inner));
        ctx.leave_level();
        let (scheme, _) = ctx.generalize(&ty);
        assert_eq!(scheme.arity, 1);
        // the outer variable stays free in the scheme body
        let Type::Fn(_, rest) = &scheme.ty else {
            panic!("expected function");
        };
        let Type::Fn(param, _) = rest.as_ref() else {
            panic!("expected function");
        };
        assert!(matches!(param.as_ref(), Type::Var(_)));
    }

    #[test]
    fn instantiate_refreshes_bound_variables() {
        let mut ctx = InferCtx::new();
        let scheme = Scheme {
            arity: 1,
            ty: Type::func(Type::Gen(0), Type::Gen(0)),
        };
        let t1 = ctx.instantiate(&scheme);
        let t2 = ctx.instantiate(&scheme);
        // two instantiations are independent
        ctx.unify(&t1, &Type::func(Type::INT, Type::INT), &Pos::internal())
            .unwrap();
        ctx.unify(&t2, &Type::func(Type::BOOL, Type::BOOL), &Pos::internal())
            .unwrap();
    }

    #[test]
    fn equality_variables_reject_functions() {
        let mut ctx = InferCtx::new();
        let v = ctx.fresh_eq_var();
        let f = Type::func(Type::INT, Type::INT);
        assert!(ctx.unify(&v, &f, &Pos::internal()).is_err());
        let v2 = ctx.fresh_eq_var();
        ctx.unify(&v2, &Type::list(Type::INT), &Pos::internal()).unwrap();
    }
}
