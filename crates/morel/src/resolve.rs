//! Type resolution: surface tree + environment → typed core.
//!
//! One pass in evaluation order, Algorithm W style: the inference context
//! threads the substitution, every expression visit yields a typed core
//! node, and constraints are added by unification. Surface constructs
//! missing from core are lowered here: `if` to a two-arm `case`, `fun` to
//! `val rec` of nested lambdas, multi-declaration `let` to nested `Let`,
//! record patterns with `...` to fully materialized record patterns.
//!
//! The resolver works on clones of the session's environment and datatype
//! registry; the session commits them only when resolution (and later
//! evaluation) succeeds, which keeps top-level declarations transactional.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::ast::{
    self, Agg, DatatypeBind, Decl, DeclKind, Expr, ExprKind, FromExpr, FunBind, Literal, Match,
    Pat, PatKind, ScanKind, Statement, Step, StepKind, TypeExpr, TypeExprKind, ValBind,
};
use crate::builtins::{BasisEntry, BuiltIn};
use crate::core::{
    CoreAgg, CoreArm, CoreDecl, CoreExpr, CoreExprKind, CorePat, CorePatKind, NamedPat, RecBind,
    StepEnv,
};
use crate::error::{Pos, TypeError, TypeErrorKind, TypeResult, Warning};
use crate::from_builder::{FromBuilder, SetOp};
use crate::types::{DataType, DataTypeRegistry, Prim, Scheme, Type, record_type, subst_gen};
use crate::unify::InferCtx;

// ── the compile-time environment ───────────────────────────────────────

/// What a name means to the resolver.
#[derive(Clone)]
pub enum TBinding {
    /// An ordinary value binding (user-defined or basis).
    Val {
        named: NamedPat,
        scheme: Scheme,
        /// Which quantified variables require equality types.
        eq_vars: Vec<bool>,
    },
    /// A datatype constructor.
    Ctor { data: Rc<DataType> },
    /// An overloadable name and its instances.
    Over { instances: Vec<OverInst> },
}

#[derive(Clone)]
pub struct OverInst {
    pub scheme: Scheme,
    pub target: OverTarget,
    /// Chosen when several instances match an unconstrained argument (the
    /// ML default-to-int convention for the built-in operators).
    pub default: bool,
}

#[derive(Clone)]
pub enum OverTarget {
    Builtin(BuiltIn),
    Named(NamedPat),
}

/// Lexically scoped compile-time environment. The bottom scope is the
/// session's persistent one.
#[derive(Clone)]
pub struct TypeEnv {
    scopes: Vec<AHashMap<String, TBinding>>,
    aliases: AHashMap<String, (u32, Type)>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self {
            scopes: vec![AHashMap::new()],
            aliases: AHashMap::new(),
        }
    }

    /// The initial environment containing the whole basis.
    pub fn basis() -> Self {
        let mut env = Self::new();
        for (name, entry) in crate::builtins::basis() {
            let binding = match entry {
                BasisEntry::Val { scheme, eq_vars, .. } => TBinding::Val {
                    named: NamedPat {
                        name: name.into(),
                        ordinal: 0,
                    },
                    scheme,
                    eq_vars,
                },
                BasisEntry::Overload(instances) => TBinding::Over {
                    instances: instances
                        .into_iter()
                        .map(|inst| OverInst {
                            scheme: inst.scheme,
                            target: match inst.value {
                                crate::value::Value::Builtin { tag, .. } => OverTarget::Builtin(tag),
                                _ => unreachable!("basis overloads are built-ins"),
                            },
                            default: inst.default,
                        })
                        .collect(),
                },
            };
            env.insert(name.to_owned(), binding);
        }
        env
    }

    pub fn lookup(&self, name: &str) -> Option<&TBinding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn insert(&mut self, name: String, binding: TBinding) {
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .insert(name, binding);
    }

    fn push_scope(&mut self) {
        self.scopes.push(AHashMap::new());
    }

    fn pop_scope(&mut self) -> AHashMap<String, TBinding> {
        self.scopes.pop().expect("scope to pop")
    }

    pub fn alias(&self, name: &str) -> Option<&(u32, Type)> {
        self.aliases.get(name)
    }

    pub fn insert_alias(&mut self, name: String, arity: u32, ty: Type) {
        self.aliases.insert(name, (arity, ty));
    }
}

impl Default for TypeEnv {
    fn default() -> Self {
        Self::new()
    }
}

// ── resolver ───────────────────────────────────────────────────────────

/// One binding produced by a declaration, as the session reports it.
pub struct DeclBinding {
    /// The display name.
    pub name: String,
    /// The name the evaluator binds at runtime (mangled for overload
    /// instances).
    pub runtime_name: Rc<str>,
    pub scheme: Scheme,
    /// Which quantified variables are equality-constrained, for printing
    /// and re-instantiation.
    pub eq_vars: Vec<bool>,
}

pub struct Resolved {
    pub decl: CoreDecl,
    pub bindings: Vec<DeclBinding>,
    pub env: TypeEnv,
    pub registry: DataTypeRegistry,
    pub warnings: Vec<Warning>,
    pub next_ordinal: u32,
}

/// Resolves one top-level statement against copies of the session state.
pub fn resolve_statement(
    statement: &Statement,
    env: TypeEnv,
    registry: DataTypeRegistry,
    next_ordinal: u32,
) -> TypeResult<Resolved> {
    let decl = match statement {
        Statement::Decl(decl) => decl.clone(),
        Statement::Expr(exp) => Decl {
            pos: exp.pos.clone(),
            kind: DeclKind::Val {
                rec: false,
                inst: false,
                binds: vec![ValBind {
                    pat: Pat::new(exp.pos.clone(), PatKind::Id("it".to_owned())),
                    exp: exp.clone(),
                }],
            },
        },
    };
    let mut resolver = Resolver {
        ctx: InferCtx::new(),
        env,
        registry,
        warnings: Vec::new(),
        next_ordinal,
        tyvars: AHashMap::new(),
    };
    let (core, bindings) = resolver.resolve_decl(&decl)?;
    Ok(Resolved {
        decl: core,
        bindings,
        env: resolver.env,
        registry: resolver.registry,
        warnings: resolver.warnings,
        next_ordinal: resolver.next_ordinal,
    })
}

struct Resolver {
    ctx: InferCtx,
    env: TypeEnv,
    registry: DataTypeRegistry,
    warnings: Vec<Warning>,
    next_ordinal: u32,
    /// Named type variables of the current declaration, so every `'a` in
    /// one declaration means one variable.
    tyvars: AHashMap<String, Type>,
}

type Binders = Vec<(String, NamedPat, Type)>;

impl Resolver {
    fn fresh_named(&mut self, name: &str) -> NamedPat {
        self.next_ordinal += 1;
        NamedPat {
            name: name.into(),
            ordinal: self.next_ordinal,
        }
    }

    fn err(&self, pos: &Pos, kind: TypeErrorKind) -> TypeError {
        TypeError::new(pos.clone(), kind)
    }

    fn other(&self, pos: &Pos, message: impl Into<String>) -> TypeError {
        self.err(
            pos,
            TypeErrorKind::Other {
                message: message.into(),
            },
        )
    }

    /// Instantiates a binding's scheme, honoring equality constraints.
    fn instantiate_binding(&mut self, scheme: &Scheme, eq_vars: &[bool]) -> Type {
        if scheme.arity == 0 {
            return scheme.ty.clone();
        }
        let fresh: Vec<Type> = (0..scheme.arity)
            .map(|i| {
                if eq_vars.get(i as usize).copied().unwrap_or(false) {
                    self.ctx.fresh_eq_var()
                } else {
                    self.ctx.fresh_var()
                }
            })
            .collect();
        subst_gen(&scheme.ty, &fresh)
    }

    // ── declarations ───────────────────────────────────────────────────

    fn resolve_decl(&mut self, decl: &Decl) -> TypeResult<(CoreDecl, Vec<DeclBinding>)> {
        match &decl.kind {
            DeclKind::Val { rec, inst, binds } => {
                if *inst {
                    self.resolve_inst(&decl.pos, binds)
                } else if *rec {
                    self.resolve_val_rec(&decl.pos, binds)
                } else {
                    self.resolve_val(&decl.pos, binds)
                }
            }
            DeclKind::Fun(binds) => {
                let lowered = lower_fun(binds);
                self.resolve_val_rec(&decl.pos, &lowered)
            }
            DeclKind::Datatype(binds) => self.resolve_datatype(&decl.pos, binds),
            DeclKind::TypeAlias { name, params, ty } => {
                let mut gens = AHashMap::new();
                for (i, p) in params.iter().enumerate() {
                    gens.insert(p.clone(), i as u32);
                }
                let body = self.type_from_expr(ty, Some(&gens))?;
                self.env
                    .insert_alias(name.clone(), params.len() as u32, body);
                Ok((CoreDecl::TypeAlias { name: name.clone() }, Vec::new()))
            }
            DeclKind::Over(name) => {
                self.env
                    .insert(name.clone(), TBinding::Over { instances: Vec::new() });
                Ok((
                    CoreDecl::Over {
                        name: name.as_str().into(),
                    },
                    Vec::new(),
                ))
            }
        }
    }

    fn resolve_val(&mut self, pos: &Pos, binds: &[ValBind]) -> TypeResult<(CoreDecl, Vec<DeclBinding>)> {
        // `val p1 = e1 and p2 = e2` binds simultaneously; lower the group
        // to a single tuple binding
        let combined = if binds.len() == 1 {
            None
        } else {
            Some((
                Pat::new(
                    pos.clone(),
                    PatKind::Tuple(binds.iter().map(|b| b.pat.clone()).collect()),
                ),
                Expr::new(
                    pos.clone(),
                    ExprKind::Tuple(binds.iter().map(|b| b.exp.clone()).collect()),
                ),
            ))
        };
        let (pat_ast, exp_ast) = match &combined {
            Some((pat, exp)) => (pat, exp),
            None => (&binds[0].pat, &binds[0].exp),
        };

        self.ctx.enter_level();
        let exp = self.infer_expr(exp_ast);
        let pat = exp.as_ref().ok().map(|exp| {
            let mut binders: Binders = Vec::new();
            let pat = self.infer_pat(pat_ast, &exp.ty.clone(), &mut binders);
            (pat, binders)
        });
        self.ctx.leave_level();
        let exp = exp?;
        let (pat, binders) = pat.expect("pattern inferred when expression succeeded");
        let pat = pat?;

        // a refutable top-level pattern can raise Bind
        let resolved_ty = self.ctx.resolve(&exp.ty);
        if let Some(witness) = self.missing_witness(&resolved_ty, &[&pat]) {
            self.warnings.push(Warning::NonExhaustive {
                pos: pat.pos.clone(),
                witness,
            });
        }

        let mut bindings = Vec::new();
        for (name, named, ty) in binders {
            let (scheme, eq_vars) = self.ctx.generalize(&ty);
            self.env.insert(
                name.clone(),
                TBinding::Val {
                    named: named.clone(),
                    scheme: scheme.clone(),
                    eq_vars: eq_vars.clone(),
                },
            );
            bindings.push(DeclBinding {
                name,
                runtime_name: Rc::clone(&named.name),
                scheme,
                eq_vars,
            });
        }
        Ok((CoreDecl::NonRecVal { pat, exp }, bindings))
    }

    fn resolve_val_rec(&mut self, _pos: &Pos, binds: &[ValBind]) -> TypeResult<(CoreDecl, Vec<DeclBinding>)> {
        let mut names = Vec::with_capacity(binds.len());
        for bind in binds {
            let PatKind::Id(name) = &bind.pat.kind else {
                return Err(self.other(&bind.pat.pos, "val rec can only bind a name"));
            };
            if name == "ref" {
                return Err(self.other(&bind.pat.pos, "'ref' is reserved and cannot be bound"));
            }
            names.push(name.clone());
        }

        self.ctx.enter_level();
        let vars: Vec<Type> = names.iter().map(|_| self.ctx.fresh_var()).collect();
        let nameds: Vec<NamedPat> = names.iter().map(|n| self.fresh_named(n)).collect();
        self.env.push_scope();
        for ((name, named), var) in names.iter().zip(&nameds).zip(&vars) {
            self.env.insert(
                name.clone(),
                TBinding::Val {
                    named: named.clone(),
                    scheme: Scheme::mono(var.clone()),
                    eq_vars: Vec::new(),
                },
            );
        }
        let mut exps = Vec::with_capacity(binds.len());
        let mut failure = None;
        for (bind, var) in binds.iter().zip(&vars) {
            match self.infer_expr(&bind.exp) {
                Ok(exp) => {
                    if !matches!(exp.kind, CoreExprKind::Fn { .. }) {
                        failure = Some(self.other(
                            &bind.exp.pos,
                            "the right-hand side of val rec must be a function expression",
                        ));
                        break;
                    }
                    if let Err(e) = self.ctx.unify(var, &exp.ty, &bind.exp.pos) {
                        failure = Some(e);
                        break;
                    }
                    exps.push(exp);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.env.pop_scope();
        self.ctx.leave_level();
        if let Some(e) = failure {
            return Err(e);
        }

        let mut bindings = Vec::new();
        let mut rec_binds = Vec::new();
        for (((name, named), var), exp) in names.iter().zip(&nameds).zip(&vars).zip(exps) {
            let (scheme, eq_vars) = self.ctx.generalize(var);
            self.env.insert(
                name.clone(),
                TBinding::Val {
                    named: named.clone(),
                    scheme: scheme.clone(),
                    eq_vars: eq_vars.clone(),
                },
            );
            bindings.push(DeclBinding {
                name: name.clone(),
                runtime_name: Rc::clone(&named.name),
                scheme,
                eq_vars,
            });
            rec_binds.push(RecBind {
                name: named.clone(),
                ty: self.ctx.resolve(var),
                exp,
            });
        }
        Ok((CoreDecl::RecVal { binds: rec_binds }, bindings))
    }

    fn resolve_inst(&mut self, pos: &Pos, binds: &[ValBind]) -> TypeResult<(CoreDecl, Vec<DeclBinding>)> {
        let [bind] = binds else {
            return Err(self.other(pos, "val inst declares exactly one instance"));
        };
        let PatKind::Id(name) = &bind.pat.kind else {
            return Err(self.other(&bind.pat.pos, "val inst can only bind a name"));
        };
        let Some(TBinding::Over { .. }) = self.env.lookup(name) else {
            return Err(self.other(
                &bind.pat.pos,
                format!("'{name}' is not declared with over"),
            ));
        };

        self.ctx.enter_level();
        let exp = self.infer_expr(&bind.exp);
        self.ctx.leave_level();
        let exp = exp?;
        let (scheme, eq_vars) = self.ctx.generalize(&exp.ty);
        if !matches!(scheme.ty, Type::Fn(..)) {
            return Err(self.other(&bind.exp.pos, "an overload instance must be a function"));
        }

        // the runtime name is mangled so that every instance of an
        // overloaded name stays reachable
        self.next_ordinal += 1;
        let named = NamedPat {
            name: format!("{name}${}", self.next_ordinal).into(),
            ordinal: self.next_ordinal,
        };
        let mut instances = match self.env.lookup(name) {
            Some(TBinding::Over { instances }) => instances.clone(),
            _ => unreachable!("checked above"),
        };
        instances.push(OverInst {
            scheme: scheme.clone(),
            target: OverTarget::Named(named.clone()),
            default: false,
        });
        self.env.insert(name.clone(), TBinding::Over { instances });

        let pat = CorePat::new(
            bind.pat.pos.clone(),
            self.ctx.resolve(&exp.ty),
            CorePatKind::Id(named.clone()),
        );
        let bindings = vec![DeclBinding {
            name: name.clone(),
            runtime_name: Rc::clone(&named.name),
            scheme,
            eq_vars,
        }];
        Ok((CoreDecl::NonRecVal { pat, exp }, bindings))
    }

    fn resolve_datatype(
        &mut self,
        pos: &Pos,
        binds: &[DatatypeBind],
    ) -> TypeResult<(CoreDecl, Vec<DeclBinding>)> {
        // intern shells first so payload types can refer to the datatypes,
        // including mutually recursive groups
        let mut shells = Vec::with_capacity(binds.len());
        for bind in binds {
            let shell = Rc::new(DataType::shell(bind.name.clone(), bind.params.len() as u32));
            self.registry.register(Rc::clone(&shell));
            shells.push(shell);
        }
        for (bind, shell) in binds.iter().zip(&shells) {
            let mut gens = AHashMap::new();
            for (i, p) in bind.params.iter().enumerate() {
                if gens.insert(p.clone(), i as u32).is_some() {
                    return Err(self.other(pos, format!("duplicate type parameter '{p}")));
                }
            }
            let mut ctors: IndexMap<String, Option<Type>> = IndexMap::new();
            for ctor in &bind.ctors {
                let payload = match &ctor.arg {
                    Some(te) => Some(self.type_from_expr(te, Some(&gens))?),
                    None => None,
                };
                if ctors.insert(ctor.name.clone(), payload).is_some() {
                    return Err(self.other(
                        pos,
                        format!("duplicate constructor {} in datatype {}", ctor.name, bind.name),
                    ));
                }
                self.env
                    .insert(ctor.name.clone(), TBinding::Ctor { data: Rc::clone(shell) });
            }
            *shell.ctors.borrow_mut() = ctors;
        }
        Ok((CoreDecl::Datatype(shells), Vec::new()))
    }

    // ── types from syntax ──────────────────────────────────────────────

    fn type_from_expr(
        &mut self,
        te: &TypeExpr,
        gens: Option<&AHashMap<String, u32>>,
    ) -> TypeResult<Type> {
        match &te.kind {
            TypeExprKind::Var { name, eq } => {
                if let Some(gens) = gens {
                    return gens.get(name).map(|i| Type::Gen(*i)).ok_or_else(|| {
                        self.err(
                            &te.pos,
                            TypeErrorKind::UnknownType {
                                name: format!("'{name}"),
                            },
                        )
                    });
                }
                if let Some(ty) = self.tyvars.get(name) {
                    return Ok(ty.clone());
                }
                let var = if *eq {
                    self.ctx.fresh_eq_var()
                } else {
                    self.ctx.fresh_var()
                };
                self.tyvars.insert(name.clone(), var.clone());
                Ok(var)
            }
            TypeExprKind::Con { name, args } => {
                let args: Vec<Type> = args
                    .iter()
                    .map(|a| self.type_from_expr(a, gens))
                    .collect::<TypeResult<_>>()?;
                if args.is_empty() {
                    if let Some(prim) = Prim::by_name(name) {
                        return Ok(Type::Prim(prim));
                    }
                }
                if name == "list" {
                    if args.len() == 1 {
                        return Ok(Type::list(args.into_iter().next().expect("one arg")));
                    }
                    return Err(self.other(&te.pos, "type constructor list expects one argument"));
                }
                if let Some((arity, body)) = self.env.alias(name).cloned() {
                    if args.len() as u32 != arity {
                        return Err(self.other(
                            &te.pos,
                            format!("type alias {name} expects {arity} arguments"),
                        ));
                    }
                    return Ok(subst_gen(&body, &args));
                }
                if let Some(data) = self.registry.lookup(name) {
                    if args.len() as u32 != data.arity {
                        return Err(self.other(
                            &te.pos,
                            format!("datatype {name} expects {} arguments", data.arity),
                        ));
                    }
                    return Ok(Type::Data(data, args));
                }
                Err(self.err(&te.pos, TypeErrorKind::UnknownType { name: name.clone() }))
            }
            TypeExprKind::Fn(param, result) => Ok(Type::func(
                self.type_from_expr(param, gens)?,
                self.type_from_expr(result, gens)?,
            )),
            TypeExprKind::Tuple(elems) => Ok(Type::tuple(
                elems
                    .iter()
                    .map(|e| self.type_from_expr(e, gens))
                    .collect::<TypeResult<_>>()?,
            )),
            TypeExprKind::Record(fields) => {
                let fields = fields
                    .iter()
                    .map(|(label, fe)| Ok((label.clone(), self.type_from_expr(fe, gens)?)))
                    .collect::<TypeResult<Vec<_>>>()?;
                Ok(record_type(fields))
            }
        }
    }

    // ── expressions ────────────────────────────────────────────────────

    fn literal_type(&mut self, lit: &Literal) -> Type {
        match lit {
            Literal::Unit => Type::UNIT,
            Literal::Bool(_) => Type::BOOL,
            Literal::Int(_) => Type::INT,
            Literal::Real(_) => Type::REAL,
            Literal::Char(_) => Type::CHAR,
            Literal::Str(_) => Type::STRING,
        }
    }

    fn infer_expr(&mut self, exp: &Expr) -> TypeResult<CoreExpr> {
        let pos = exp.pos.clone();
        match &exp.kind {
            ExprKind::Literal(lit) => {
                let ty = self.literal_type(lit);
                Ok(CoreExpr::new(pos, ty, CoreExprKind::Literal(lit.clone())))
            }
            ExprKind::Id(name) => self.infer_id(&pos, name),
            ExprKind::RecordSelector(label) => Err(self.other(
                &pos,
                format!("record selector #{label} must be applied to a record"),
            )),
            ExprKind::Tuple(elems) => {
                let elems: Vec<CoreExpr> = elems
                    .iter()
                    .map(|e| self.infer_expr(e))
                    .collect::<TypeResult<_>>()?;
                let ty = Type::Tuple(elems.iter().map(|e| e.ty.clone()).collect());
                Ok(CoreExpr::new(pos, ty, CoreExprKind::Tuple(elems)))
            }
            ExprKind::Record(fields) => self.infer_record(&pos, fields),
            ExprKind::List(elems) => {
                let element = self.ctx.fresh_var();
                let elems: Vec<CoreExpr> = elems
                    .iter()
                    .map(|e| {
                        let core = self.infer_expr(e)?;
                        self.ctx.unify(&element, &core.ty, &core.pos)?;
                        Ok(core)
                    })
                    .collect::<TypeResult<_>>()?;
                Ok(CoreExpr::new(pos, Type::list(element), CoreExprKind::List(elems)))
            }
            ExprKind::Apply(func, arg) => self.infer_apply(&pos, func, arg),
            ExprKind::AndAlso(a, b) => {
                let a = self.infer_bool(a)?;
                let b = self.infer_bool(b)?;
                Ok(CoreExpr::new(
                    pos,
                    Type::BOOL,
                    CoreExprKind::AndAlso(Box::new(a), Box::new(b)),
                ))
            }
            ExprKind::OrElse(a, b) => {
                let a = self.infer_bool(a)?;
                let b = self.infer_bool(b)?;
                Ok(CoreExpr::new(
                    pos,
                    Type::BOOL,
                    CoreExprKind::OrElse(Box::new(a), Box::new(b)),
                ))
            }
            ExprKind::If(cond, then_exp, else_exp) => {
                // if c then a else b  ~~>  case c of true => a | _ => b
                let cond = self.infer_bool(cond)?;
                let then_core = self.infer_expr(then_exp)?;
                let else_core = self.infer_expr(else_exp)?;
                self.ctx.unify(&then_core.ty, &else_core.ty, &pos)?;
                let ty = then_core.ty.clone();
                let arms = vec![
                    CoreArm {
                        pat: CorePat::new(
                            then_exp.pos.clone(),
                            Type::BOOL,
                            CorePatKind::Literal(Literal::Bool(true)),
                        ),
                        exp: then_core,
                    },
                    CoreArm {
                        pat: CorePat::new(else_exp.pos.clone(), Type::BOOL, CorePatKind::Wild),
                        exp: else_core,
                    },
                ];
                Ok(CoreExpr::new(
                    pos,
                    ty,
                    CoreExprKind::Case {
                        scrutinee: Box::new(cond),
                        arms,
                    },
                ))
            }
            ExprKind::Case(scrutinee, arms) => {
                let scrutinee = self.infer_expr(scrutinee)?;
                let (arms, result) = self.infer_match_arms(&scrutinee.ty.clone(), arms)?;
                self.check_arms(&pos, &scrutinee.ty.clone(), &arms);
                Ok(CoreExpr::new(
                    pos,
                    result,
                    CoreExprKind::Case {
                        scrutinee: Box::new(scrutinee),
                        arms,
                    },
                ))
            }
            ExprKind::Fn(arms) => self.infer_fn(&pos, arms),
            ExprKind::Let(decls, body) => self.infer_let(&pos, decls, body),
            ExprKind::From(from) => self.resolve_from(&pos, from),
            ExprKind::Annotated(inner, te) => {
                let ty = self.type_from_expr(te, None)?;
                let core = self.infer_expr(inner)?;
                self.ctx.unify(&core.ty, &ty, &pos)?;
                Ok(core)
            }
        }
    }

    fn infer_bool(&mut self, exp: &Expr) -> TypeResult<CoreExpr> {
        let core = self.infer_expr(exp)?;
        self.ctx.unify(&core.ty, &Type::BOOL, &core.pos)?;
        Ok(core)
    }

    fn infer_id(&mut self, pos: &Pos, name: &str) -> TypeResult<CoreExpr> {
        if name == "nil" {
            let element = self.ctx.fresh_var();
            return Ok(CoreExpr::new(
                pos.clone(),
                Type::list(element),
                CoreExprKind::List(Vec::new()),
            ));
        }
        match self.env.lookup(name).cloned() {
            Some(TBinding::Val { named, scheme, eq_vars }) => {
                let ty = self.instantiate_binding(&scheme, &eq_vars);
                Ok(CoreExpr::new(pos.clone(), ty, CoreExprKind::Id(named)))
            }
            Some(TBinding::Ctor { data }) => {
                let args: Vec<Type> = (0..data.arity).map(|_| self.ctx.fresh_var()).collect();
                let result = Type::Data(Rc::clone(&data), args.clone());
                let ty = match data.payload(name, &args) {
                    Some(payload) => Type::func(payload, result),
                    None => result,
                };
                Ok(CoreExpr::new(
                    pos.clone(),
                    ty,
                    CoreExprKind::Ctor {
                        name: name.into(),
                        data,
                    },
                ))
            }
            Some(TBinding::Over { .. }) => Err(self.err(
                pos,
                TypeErrorKind::OverloadAmbiguous {
                    name: name.to_owned(),
                    ty: "an unapplied reference".to_owned(),
                },
            )),
            None => Err(self.err(
                pos,
                TypeErrorKind::Unbound {
                    name: name.to_owned(),
                },
            )),
        }
    }

    fn infer_record(&mut self, pos: &Pos, fields: &[ast::Field]) -> TypeResult<CoreExpr> {
        let mut resolved: Vec<(String, CoreExpr)> = Vec::with_capacity(fields.len());
        for field in fields {
            let label = match &field.label {
                Some(label) => label.clone(),
                None => crate::parse::derived_label(&field.exp)
                    .expect("parser rejected underivable labels"),
            };
            if resolved.iter().any(|(l, _)| *l == label) {
                return Err(self.other(pos, format!("duplicate record label {label}")));
            }
            resolved.push((label, self.infer_expr(&field.exp)?));
        }
        if resolved.is_empty() {
            return Ok(CoreExpr::new(pos.clone(), Type::UNIT, CoreExprKind::Literal(Literal::Unit)));
        }
        resolved.sort_by(|(a, _), (b, _)| crate::types::label_compare(a, b));
        let ty = record_type(
            resolved
                .iter()
                .map(|(label, core)| (label.clone(), core.ty.clone()))
                .collect(),
        );
        let elems = resolved.into_iter().map(|(_, core)| core).collect();
        Ok(CoreExpr::new(pos.clone(), ty, CoreExprKind::Tuple(elems)))
    }

    fn infer_apply(&mut self, pos: &Pos, func: &Expr, arg: &Expr) -> TypeResult<CoreExpr> {
        // record selection resolves the slot against the argument's type
        if let ExprKind::RecordSelector(label) = &func.kind {
            return self.infer_selection(pos, &func.pos, label, arg);
        }
        // two-phase overload resolution: infer the argument, then pick the
        // unique matching instance
        if let ExprKind::Id(name) = &func.kind {
            if let Some(TBinding::Over { instances }) = self.env.lookup(name).cloned() {
                let arg_core = self.infer_expr(arg)?;
                let func_core = self.select_instance(&func.pos, name, &instances, &arg_core.ty)?;
                let result = self.ctx.fresh_var();
                let expected = Type::func(arg_core.ty.clone(), result.clone());
                self.ctx.unify(&func_core.ty, &expected, pos)?;
                return Ok(CoreExpr::new(
                    pos.clone(),
                    result,
                    CoreExprKind::Apply {
                        func: Box::new(func_core),
                        arg: Box::new(arg_core),
                    },
                ));
            }
        }
        let arg_core = self.infer_expr(arg)?;
        let func_core = self.infer_expr(func)?;
        let result = self.ctx.fresh_var();
        let expected = Type::func(arg_core.ty.clone(), result.clone());
        self.ctx.unify(&func_core.ty, &expected, pos)?;
        Ok(CoreExpr::new(
            pos.clone(),
            result,
            CoreExprKind::Apply {
                func: Box::new(func_core),
                arg: Box::new(arg_core),
            },
        ))
    }

    /// Picks the unique overload instance whose parameter type accepts the
    /// inferred argument type.
    fn select_instance(
        &mut self,
        pos: &Pos,
        name: &str,
        instances: &[OverInst],
        arg_ty: &Type,
    ) -> TypeResult<CoreExpr> {
        let mut matching: Vec<(Type, &OverInst)> = Vec::new();
        for inst in instances {
            let ity = self.ctx.instantiate(&inst.scheme);
            let Type::Fn(param, _) = &ity else { continue };
            if self.ctx.unifies(param, arg_ty) {
                matching.push((ity, inst));
            }
        }
        if matching.is_empty() {
            let ty = self.ctx.render(arg_ty);
            return Err(self.err(
                pos,
                TypeErrorKind::OverloadNoMatch {
                    name: name.to_owned(),
                    ty,
                },
            ));
        }
        if matching.len() > 1 {
            // an unconstrained argument matches several instances; fall
            // back to the default one when the name declares it
            matching.retain(|(_, inst)| inst.default);
            if matching.len() != 1 {
                let ty = self.ctx.render(arg_ty);
                return Err(self.err(
                    pos,
                    TypeErrorKind::OverloadAmbiguous {
                        name: name.to_owned(),
                        ty,
                    },
                ));
            }
        }
        let (ity, inst) = matching.into_iter().next().expect("one match");
        let kind = match &inst.target {
            OverTarget::Builtin(tag) => CoreExprKind::Builtin(*tag),
            OverTarget::Named(named) => CoreExprKind::Id(named.clone()),
        };
        Ok(CoreExpr::new(pos.clone(), ity, kind))
    }

    fn infer_selection(
        &mut self,
        pos: &Pos,
        sel_pos: &Pos,
        label: &str,
        arg: &Expr,
    ) -> TypeResult<CoreExpr> {
        let arg_core = self.infer_expr(arg)?;
        let record_ty = self.ctx.resolve(&arg_core.ty);
        let (slot, field_ty) = match &record_ty {
            Type::Record(fields) => match fields.iter().position(|(l, _)| l == label) {
                Some(slot) => (slot, fields[slot].1.clone()),
                None => {
                    let ty = self.ctx.render(&record_ty);
                    return Err(self.err(
                        sel_pos,
                        TypeErrorKind::FieldMismatch {
                            label: label.to_owned(),
                            ty,
                        },
                    ));
                }
            },
            Type::Tuple(elems) => {
                let index: Option<usize> = label.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
                match index.and_then(|i| elems.get(i).map(|ty| (i, ty.clone()))) {
                    Some((slot, ty)) => (slot, ty),
                    None => {
                        let ty = self.ctx.render(&record_ty);
                        return Err(self.err(
                            sel_pos,
                            TypeErrorKind::FieldMismatch {
                                label: label.to_owned(),
                                ty,
                            },
                        ));
                    }
                }
            }
            _ => {
                return Err(self.other(
                    sel_pos,
                    format!("#{label} requires its argument's record type to be known here"),
                ));
            }
        };
        let func = CoreExpr::new(
            sel_pos.clone(),
            Type::func(record_ty, field_ty.clone()),
            CoreExprKind::RecordSelector {
                label: label.into(),
                slot,
            },
        );
        Ok(CoreExpr::new(
            pos.clone(),
            field_ty,
            CoreExprKind::Apply {
                func: Box::new(func),
                arg: Box::new(arg_core),
            },
        ))
    }

    fn infer_fn(&mut self, pos: &Pos, arms: &[Match]) -> TypeResult<CoreExpr> {
        if let [arm] = arms {
            let param_ty = self.ctx.fresh_var();
            self.env.push_scope();
            let result = (|| {
                let mut binders: Binders = Vec::new();
                let pat = self.infer_pat(&arm.pat, &param_ty, &mut binders)?;
                self.insert_binders(&binders);
                let body = self.infer_expr(&arm.exp)?;
                Ok((pat, body))
            })();
            self.env.pop_scope();
            let (pat, body) = result?;
            // a refutable parameter pattern can raise Bind
            let resolved = self.ctx.resolve(&param_ty);
            if let Some(witness) = self.missing_witness(&resolved, &[&pat]) {
                self.warnings.push(Warning::NonExhaustive {
                    pos: pat.pos.clone(),
                    witness,
                });
            }
            let ty = Type::func(param_ty, body.ty.clone());
            return Ok(CoreExpr::new(
                pos.clone(),
                ty,
                CoreExprKind::Fn {
                    param: pat,
                    body: Box::new(body),
                },
            ));
        }

        // multiple arms become a case over a synthesized parameter
        let param_ty = self.ctx.fresh_var();
        let hidden = self.fresh_named(&format!("$v{}", self.next_ordinal + 1));
        let (arms, result) = self.infer_match_arms(&param_ty, arms)?;
        self.check_arms(pos, &param_ty, &arms);
        let scrutinee = CoreExpr::new(pos.clone(), param_ty.clone(), CoreExprKind::Id(hidden.clone()));
        let body = CoreExpr::new(
            pos.clone(),
            result.clone(),
            CoreExprKind::Case {
                scrutinee: Box::new(scrutinee),
                arms,
            },
        );
        Ok(CoreExpr::new(
            pos.clone(),
            Type::func(param_ty.clone(), result),
            CoreExprKind::Fn {
                param: CorePat::new(pos.clone(), param_ty, CorePatKind::Id(hidden)),
                body: Box::new(body),
            },
        ))
    }

    fn infer_match_arms(
        &mut self,
        scrutinee_ty: &Type,
        arms: &[Match],
    ) -> TypeResult<(Vec<CoreArm>, Type)> {
        let result = self.ctx.fresh_var();
        let mut core_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            self.env.push_scope();
            let outcome = (|| {
                let mut binders: Binders = Vec::new();
                let pat = self.infer_pat(&arm.pat, scrutinee_ty, &mut binders)?;
                self.insert_binders(&binders);
                let exp = self.infer_expr(&arm.exp)?;
                self.ctx.unify(&result, &exp.ty, &arm.exp.pos)?;
                Ok(CoreArm { pat, exp })
            })();
            self.env.pop_scope();
            core_arms.push(outcome?);
        }
        Ok((core_arms, result))
    }

    fn infer_let(&mut self, pos: &Pos, decls: &[Decl], body: &Expr) -> TypeResult<CoreExpr> {
        self.env.push_scope();
        let result = self.infer_let_inner(pos, decls, body);
        self.env.pop_scope();
        result
    }

    fn infer_let_inner(&mut self, pos: &Pos, decls: &[Decl], body: &Expr) -> TypeResult<CoreExpr> {
        let Some((first, rest)) = decls.split_first() else {
            return self.infer_expr(body);
        };
        let (core_decl, _) = self.resolve_decl(first)?;
        let inner = self.infer_let_inner(pos, rest, body)?;
        let ty = inner.ty.clone();
        let kind = match core_decl {
            CoreDecl::Datatype(datas) => {
                // a datatype scoped to an expression
                let mut node = inner;
                for data in datas.into_iter().rev() {
                    let ty = node.ty.clone();
                    node = CoreExpr::new(
                        pos.clone(),
                        ty,
                        CoreExprKind::Local {
                            data,
                            body: Box::new(node),
                        },
                    );
                }
                return Ok(node);
            }
            CoreDecl::TypeAlias { .. } | CoreDecl::Over { .. } => return Ok(inner),
            decl => CoreExprKind::Let {
                decl: Box::new(decl),
                body: Box::new(inner),
            },
        };
        Ok(CoreExpr::new(pos.clone(), ty, kind))
    }

    fn insert_binders(&mut self, binders: &Binders) {
        for (name, named, ty) in binders {
            self.env.insert(
                name.clone(),
                TBinding::Val {
                    named: named.clone(),
                    scheme: Scheme::mono(ty.clone()),
                    eq_vars: Vec::new(),
                },
            );
        }
    }

    // ── patterns ───────────────────────────────────────────────────────

    fn infer_pat(&mut self, pat: &Pat, expected: &Type, binders: &mut Binders) -> TypeResult<CorePat> {
        let pos = pat.pos.clone();
        match &pat.kind {
            PatKind::Wild => Ok(CorePat::new(pos, expected.clone(), CorePatKind::Wild)),
            PatKind::Literal(lit) => {
                let ty = self.literal_type(lit);
                self.ctx.unify(expected, &ty, &pos)?;
                Ok(CorePat::new(pos, ty, CorePatKind::Literal(lit.clone())))
            }
            PatKind::Id(name) => {
                if name == "nil" {
                    let element = self.ctx.fresh_var();
                    self.ctx.unify(expected, &Type::list(element), &pos)?;
                    return Ok(CorePat::new(pos, expected.clone(), CorePatKind::List(Vec::new())));
                }
                if let Some(TBinding::Ctor { data }) = self.env.lookup(name).cloned() {
                    if data.ctor_has_payload(name) {
                        return Err(self.other(
                            &pos,
                            format!("constructor {name} requires an argument pattern"),
                        ));
                    }
                    let args: Vec<Type> = (0..data.arity).map(|_| self.ctx.fresh_var()).collect();
                    let ty = Type::Data(Rc::clone(&data), args);
                    self.ctx.unify(expected, &ty, &pos)?;
                    return Ok(CorePat::new(
                        pos,
                        ty,
                        CorePatKind::Ctor {
                            name: name.as_str().into(),
                            data,
                            arg: None,
                        },
                    ));
                }
                if name == "ref" {
                    return Err(self.other(&pos, "'ref' is reserved and cannot be bound"));
                }
                let named = self.fresh_named(name);
                binders.push((name.clone(), named.clone(), expected.clone()));
                Ok(CorePat::new(pos, expected.clone(), CorePatKind::Id(named)))
            }
            PatKind::Ctor(name, arg) => {
                let Some(TBinding::Ctor { data }) = self.env.lookup(name).cloned() else {
                    return Err(self.err(
                        &pos,
                        TypeErrorKind::Unbound {
                            name: name.to_owned(),
                        },
                    ));
                };
                let args: Vec<Type> = (0..data.arity).map(|_| self.ctx.fresh_var()).collect();
                let Some(payload_ty) = data.payload(name, &args) else {
                    return Err(self.other(&pos, format!("constructor {name} takes no argument")));
                };
                let arg_core = self.infer_pat(arg, &payload_ty, binders)?;
                let ty = Type::Data(Rc::clone(&data), args);
                self.ctx.unify(expected, &ty, &pos)?;
                Ok(CorePat::new(
                    pos,
                    ty,
                    CorePatKind::Ctor {
                        name: name.as_str().into(),
                        data,
                        arg: Some(Box::new(arg_core)),
                    },
                ))
            }
            PatKind::Cons(head, tail) => {
                let element = self.ctx.fresh_var();
                let list_ty = Type::list(element.clone());
                self.ctx.unify(expected, &list_ty, &pos)?;
                let head = self.infer_pat(head, &element, binders)?;
                let tail = self.infer_pat(tail, &list_ty, binders)?;
                Ok(CorePat::new(
                    pos,
                    list_ty,
                    CorePatKind::Cons(Box::new(head), Box::new(tail)),
                ))
            }
            PatKind::List(pats) => {
                let element = self.ctx.fresh_var();
                let list_ty = Type::list(element.clone());
                self.ctx.unify(expected, &list_ty, &pos)?;
                let pats = pats
                    .iter()
                    .map(|p| self.infer_pat(p, &element, binders))
                    .collect::<TypeResult<_>>()?;
                Ok(CorePat::new(pos, list_ty, CorePatKind::List(pats)))
            }
            PatKind::Tuple(pats) => {
                let elem_tys: Vec<Type> = pats.iter().map(|_| self.ctx.fresh_var()).collect();
                let ty = Type::Tuple(elem_tys.clone());
                self.ctx.unify(expected, &ty, &pos)?;
                let pats = pats
                    .iter()
                    .zip(&elem_tys)
                    .map(|(p, t)| self.infer_pat(p, t, binders))
                    .collect::<TypeResult<_>>()?;
                Ok(CorePat::new(pos, ty, CorePatKind::Tuple(pats)))
            }
            PatKind::Record { fields, ellipsis } => {
                self.infer_record_pat(&pos, fields, *ellipsis, expected, binders)
            }
            PatKind::Annotated(inner, te) => {
                let ty = self.type_from_expr(te, None)?;
                self.ctx.unify(expected, &ty, &pos)?;
                self.infer_pat(inner, &ty, binders)
            }
        }
    }

    fn infer_record_pat(
        &mut self,
        pos: &Pos,
        fields: &[(String, Option<Pat>)],
        ellipsis: bool,
        expected: &Type,
        binders: &mut Binders,
    ) -> TypeResult<CorePat> {
        if !ellipsis {
            let mut typed: Vec<(String, Type)> = Vec::with_capacity(fields.len());
            for (label, _) in fields {
                if typed.iter().any(|(l, _)| l == label) {
                    return Err(self.other(pos, format!("duplicate record label {label}")));
                }
                typed.push((label.clone(), self.ctx.fresh_var()));
            }
            let ty = record_type(typed.clone());
            self.ctx.unify(expected, &ty, pos)?;
            let mut sorted = fields.to_vec();
            sorted.sort_by(|(a, _), (b, _)| crate::types::label_compare(a, b));
            let core_fields = sorted
                .iter()
                .map(|(label, sub)| {
                    let field_ty = typed
                        .iter()
                        .find(|(l, _)| l == label)
                        .map(|(_, t)| t.clone())
                        .expect("label present");
                    let core = match sub {
                        Some(sub) => self.infer_pat(sub, &field_ty, binders)?,
                        None => {
                            // `{a, b}` binds each field to its own label
                            let named = self.fresh_named(label);
                            binders.push((label.clone(), named.clone(), field_ty.clone()));
                            CorePat::new(pos.clone(), field_ty.clone(), CorePatKind::Id(named))
                        }
                    };
                    Ok((label.clone(), core))
                })
                .collect::<TypeResult<Vec<_>>>()?;
            return Ok(CorePat::new(pos.clone(), ty, CorePatKind::Record(core_fields)));
        }

        // with `...` the full label set must already be known; materialize
        // the omitted fields as wildcards
        let resolved = self.ctx.resolve(expected);
        let known: Vec<(String, Type)> = match &resolved {
            Type::Record(known) => known.clone(),
            Type::Tuple(elems) => elems
                .iter()
                .enumerate()
                .map(|(i, t)| ((i + 1).to_string(), t.clone()))
                .collect(),
            _ => {
                return Err(self.other(
                    pos,
                    "cannot resolve a record pattern with '...'; add a type annotation",
                ));
            }
        };
        for (label, _) in fields {
            if !known.iter().any(|(l, _)| l == label) {
                let ty = self.ctx.render(&resolved);
                return Err(self.err(
                    pos,
                    TypeErrorKind::FieldMismatch {
                        label: label.clone(),
                        ty,
                    },
                ));
            }
        }
        let core_fields = known
            .iter()
            .map(|(label, field_ty)| {
                let core = match fields.iter().find(|(l, _)| l == label) {
                    Some((_, Some(sub))) => self.infer_pat(sub, field_ty, binders)?,
                    Some((_, None)) => {
                        let named = self.fresh_named(label);
                        binders.push((label.clone(), named.clone(), field_ty.clone()));
                        CorePat::new(pos.clone(), field_ty.clone(), CorePatKind::Id(named))
                    }
                    None => CorePat::new(pos.clone(), field_ty.clone(), CorePatKind::Wild),
                };
                Ok((label.clone(), core))
            })
            .collect::<TypeResult<Vec<_>>>()?;
        Ok(CorePat::new(pos.clone(), resolved, CorePatKind::Record(core_fields)))
    }

    // ── from expressions ───────────────────────────────────────────────

    fn resolve_from(&mut self, pos: &Pos, from: &FromExpr) -> TypeResult<CoreExpr> {
        self.env.push_scope();
        let result = self.resolve_from_inner(pos, from);
        self.env.pop_scope();
        result
    }

    fn resolve_from_inner(&mut self, pos: &Pos, from: &FromExpr) -> TypeResult<CoreExpr> {
        let mut builder = FromBuilder::new();

        for scan in &from.scans {
            let (source, element_ty) = match scan.kind {
                ScanKind::In => {
                    let source = self.infer_expr(&scan.source)?;
                    let element = self.ctx.fresh_var();
                    self.ctx
                        .unify(&source.ty, &Type::list(element.clone()), &scan.source.pos)?;
                    (source, element)
                }
                ScanKind::Eq => {
                    // `x = e` binds a single value per row: scan [e]
                    let exp = self.infer_expr(&scan.source)?;
                    let element = exp.ty.clone();
                    let source = CoreExpr::new(
                        exp.pos.clone(),
                        Type::list(element.clone()),
                        CoreExprKind::List(vec![exp]),
                    );
                    (source, element)
                }
            };
            let mut binders: Binders = Vec::new();
            let mut pat = self.infer_pat(&scan.pat, &element_ty, &mut binders)?;
            pat.ty = self.ctx.resolve(&pat.ty);
            self.insert_binders(&binders);
            builder.scan(scan.pat.pos.clone(), pat, source);
            self.check_unique_bindings(pos, &builder.env())?;
        }

        for step in &from.steps {
            self.resolve_step(step, &mut builder)?;
        }

        let element_ty = self.ctx.resolve(&builder.env().row_type());
        let from_core = builder.build(element_ty.clone());
        Ok(CoreExpr::new(
            pos.clone(),
            Type::list(element_ty),
            CoreExprKind::From(Box::new(from_core)),
        ))
    }

    fn resolve_step(&mut self, step: &Step, builder: &mut FromBuilder) -> TypeResult<()> {
        let pos = step.pos.clone();
        match &step.kind {
            StepKind::Where(exp) => {
                let cond = self.infer_bool(exp)?;
                builder.where_step(pos.clone(), cond);
            }
            StepKind::Skip(exp) => {
                let count = self.infer_int(exp)?;
                builder.skip(pos.clone(), count);
            }
            StepKind::Take(exp) => {
                let count = self.infer_int(exp)?;
                builder.take(pos.clone(), count);
            }
            StepKind::Unorder => builder.unorder(pos.clone()),
            StepKind::Order(items) => {
                let keys = items
                    .iter()
                    .map(|item| Ok((self.infer_expr(&item.exp)?, item.desc)))
                    .collect::<TypeResult<Vec<_>>>()?;
                builder.order(pos.clone(), keys);
            }
            StepKind::Yield(exp) => {
                let mut core = self.infer_expr(exp)?;
                core.ty = self.ctx.resolve(&core.ty);
                let bindings: Vec<(NamedPat, Type)> = match &core.ty {
                    Type::Record(fields) => fields
                        .iter()
                        .map(|(label, ty)| (self.fresh_named(label), ty.clone()))
                        .collect(),
                    _ => {
                        // an atom row; keep a referenced binder's name,
                        // otherwise expose the row as `current`
                        let name = match &core.kind {
                            CoreExprKind::Id(named) => named.name.to_string(),
                            _ => "current".to_owned(),
                        };
                        vec![(self.fresh_named(&name), core.ty.clone())]
                    }
                };
                builder.yield_step(pos.clone(), core, bindings.clone());
                self.replace_from_scope(&bindings);
            }
            StepKind::Group { keys, aggs } => {
                self.resolve_group(&pos, keys, aggs, builder)?;
            }
            StepKind::Distinct => {
                // `distinct` is grouping on the whole row
                let env = builder.env();
                let keys: Vec<(NamedPat, CoreExpr)> = env
                    .bindings
                    .iter()
                    .map(|(named, ty)| {
                        (
                            self.fresh_named(&named.name),
                            CoreExpr::new(pos.clone(), ty.clone(), CoreExprKind::Id(named.clone())),
                        )
                    })
                    .collect();
                let bindings: Vec<(NamedPat, Type)> = keys
                    .iter()
                    .map(|(named, exp)| (named.clone(), exp.ty.clone()))
                    .collect();
                builder.group(pos.clone(), keys, Vec::new());
                self.replace_from_scope(&bindings);
            }
            StepKind::Union { distinct, arg } => {
                self.resolve_set_op(&pos, SetOp::Union, *distinct, arg, builder)?;
            }
            StepKind::Intersect { distinct, arg } => {
                self.resolve_set_op(&pos, SetOp::Intersect, *distinct, arg, builder)?;
            }
            StepKind::Except { distinct, arg } => {
                self.resolve_set_op(&pos, SetOp::Except, *distinct, arg, builder)?;
            }
        }
        self.check_unique_bindings(&pos, &builder.env())
    }

    fn resolve_group(
        &mut self,
        pos: &Pos,
        keys: &[ast::GroupKey],
        aggs: &[Agg],
        builder: &mut FromBuilder,
    ) -> TypeResult<()> {
        let input_env = builder.env();
        let mut core_keys = Vec::with_capacity(keys.len());
        for key in keys {
            let mut exp = self.infer_expr(&key.exp)?;
            exp.ty = self.ctx.resolve(&exp.ty);
            core_keys.push((self.fresh_named(&key.name), exp));
        }
        let mut core_aggs = Vec::with_capacity(aggs.len());
        for agg in aggs {
            let arg = agg.arg.as_ref().map(|a| self.infer_expr(a)).transpose()?;
            let item_ty = match &arg {
                Some(arg) => arg.ty.clone(),
                None => input_env.row_type(),
            };
            let func = self.resolve_agg_func(&agg.func, &Type::list(item_ty))?;
            core_aggs.push(CoreAgg {
                name: self.fresh_named(&agg.name),
                func,
                arg,
            });
        }
        let mut bindings: Vec<(NamedPat, Type)> = core_keys
            .iter()
            .map(|(named, exp)| (named.clone(), exp.ty.clone()))
            .collect();
        for agg in &core_aggs {
            bindings.push((agg.name.clone(), self.ctx.resolve(&agg.func_result_type())));
        }
        builder.group(pos.clone(), core_keys, core_aggs);
        self.replace_from_scope(&bindings);
        Ok(())
    }

    /// Resolves an aggregate function against its collection argument
    /// type, going through overload selection when the name is overloaded
    /// (`sum` over int and real lists).
    fn resolve_agg_func(&mut self, func: &Expr, arg_ty: &Type) -> TypeResult<CoreExpr> {
        let core = if let ExprKind::Id(name) = &func.kind {
            if let Some(TBinding::Over { instances }) = self.env.lookup(name).cloned() {
                self.select_instance(&func.pos, name, &instances, arg_ty)?
            } else {
                self.infer_expr(func)?
            }
        } else {
            self.infer_expr(func)?
        };
        let result = self.ctx.fresh_var();
        self.ctx
            .unify(&core.ty, &Type::func(arg_ty.clone(), result), &func.pos)?;
        Ok(core)
    }

    fn resolve_set_op(
        &mut self,
        pos: &Pos,
        op: SetOp,
        distinct: bool,
        arg: &Expr,
        builder: &mut FromBuilder,
    ) -> TypeResult<()> {
        // the argument is an independent collection; row bindings are not
        // in scope inside it
        let saved = self.env.pop_scope();
        let arg_core = self.infer_expr(arg);
        self.env.scopes_push(saved);
        let arg_core = arg_core?;
        let row_ty = builder.env().row_type();
        self.ctx.unify(&arg_core.ty, &Type::list(row_ty), pos)?;
        builder.set_op(pos.clone(), op, distinct, arg_core);
        Ok(())
    }

    /// Replaces the from-scope bindings after a step that rebinds the row
    /// (yield, group, distinct).
    fn replace_from_scope(&mut self, bindings: &[(NamedPat, Type)]) {
        self.env.pop_scope();
        self.env.push_scope();
        for (named, ty) in bindings {
            self.env.insert(
                named.name.to_string(),
                TBinding::Val {
                    named: named.clone(),
                    scheme: Scheme::mono(ty.clone()),
                    eq_vars: Vec::new(),
                },
            );
        }
    }

    fn check_unique_bindings(&self, pos: &Pos, env: &StepEnv) -> TypeResult<()> {
        for (i, (named, _)) in env.bindings.iter().enumerate() {
            if env.bindings[..i].iter().any(|(other, _)| other.name == named.name) {
                return Err(self.other(
                    pos,
                    format!("duplicate binding '{}' in from", named.name),
                ));
            }
        }
        Ok(())
    }

    fn infer_int(&mut self, exp: &Expr) -> TypeResult<CoreExpr> {
        let core = self.infer_expr(exp)?;
        self.ctx.unify(&core.ty, &Type::INT, &core.pos)?;
        Ok(core)
    }

    // ── match analysis ─────────────────────────────────────────────────

    /// Emits non-exhaustiveness and redundancy warnings for a match.
    fn check_arms(&mut self, pos: &Pos, scrutinee_ty: &Type, arms: &[CoreArm]) {
        for (i, arm) in arms.iter().enumerate() {
            let redundant = arms[..i]
                .iter()
                .any(|earlier| subsumes(&earlier.pat, &arm.pat));
            if redundant {
                self.warnings.push(Warning::RedundantMatch {
                    pos: arm.pat.pos.clone(),
                });
            }
        }
        let resolved = self.ctx.resolve(scrutinee_ty);
        let pats: Vec<&CorePat> = arms.iter().map(|arm| &arm.pat).collect();
        if let Some(witness) = self.missing_witness(&resolved, &pats) {
            self.warnings.push(Warning::NonExhaustive {
                pos: pos.clone(),
                witness,
            });
        }
    }

    /// A pattern (in surface syntax) that no arm matches, or `None` when
    /// the arms cover the type. Constructor coverage is exact; tuple and
    /// record coverage follows the one-refutable-column rule.
    fn missing_witness(&mut self, ty: &Type, pats: &[&CorePat]) -> Option<String> {
        if pats.iter().any(|p| p.is_irrefutable()) {
            return None;
        }
        match ty {
            Type::Prim(Prim::Bool) => {
                for value in [true, false] {
                    let covered = pats.iter().any(
                        |p| matches!(&p.kind, CorePatKind::Literal(Literal::Bool(b)) if *b == value),
                    );
                    if !covered {
                        return Some(value.to_string());
                    }
                }
                None
            }
            Type::Prim(Prim::Unit) => {
                if pats.is_empty() { Some("()".to_owned()) } else { None }
            }
            Type::Prim(Prim::Int) => {
                let covered: Vec<i64> = pats
                    .iter()
                    .filter_map(|p| match &p.kind {
                        CorePatKind::Literal(Literal::Int(n)) => Some(*n),
                        _ => None,
                    })
                    .collect();
                let witness = (0i64..).find(|n| !covered.contains(n)).expect("some int free");
                Some(witness.to_string())
            }
            Type::Prim(_) => Some("_".to_owned()),
            Type::Data(data, args) => {
                for ctor in data.ctor_names() {
                    let payload_ty = data.payload(&ctor, args);
                    let mut sub_pats: Vec<&CorePat> = Vec::new();
                    let mut seen = false;
                    for pat in pats {
                        if let CorePatKind::Ctor { name, arg, .. } = &pat.kind {
                            if name.as_ref() == ctor {
                                seen = true;
                                if let Some(arg) = arg {
                                    sub_pats.push(arg);
                                }
                            }
                        }
                    }
                    match payload_ty {
                        None => {
                            if !seen {
                                return Some(ctor);
                            }
                        }
                        Some(payload_ty) => {
                            if !seen {
                                return Some(format!("{ctor} _"));
                            }
                            if let Some(inner) = self.missing_witness(&payload_ty, &sub_pats) {
                                return Some(format!("{ctor} ({inner})"));
                            }
                        }
                    }
                }
                None
            }
            Type::List(element) => {
                let empty_covered = pats
                    .iter()
                    .any(|p| matches!(&p.kind, CorePatKind::List(elems) if elems.is_empty()));
                if !empty_covered {
                    return Some("[]".to_owned());
                }
                let mut heads: Vec<&CorePat> = Vec::new();
                let mut tails: Vec<&CorePat> = Vec::new();
                for pat in pats {
                    if let CorePatKind::Cons(head, tail) = &pat.kind {
                        heads.push(head);
                        tails.push(tail);
                    }
                }
                if heads.is_empty() {
                    return Some("_ :: _".to_owned());
                }
                if self.missing_witness(element, &heads).is_some()
                    && !heads.iter().any(|p| p.is_irrefutable())
                {
                    return Some("_ :: _".to_owned());
                }
                let tail_ty = Type::list((**element).clone());
                if self.missing_witness(&tail_ty, &tails).is_some() {
                    return Some("_ :: _".to_owned());
                }
                None
            }
            Type::Tuple(elems) => {
                self.missing_columns_witness(elems.len(), pats, |i| elems[i].clone(), |parts| {
                    format!("({})", parts.join(", "))
                })
            }
            Type::Record(fields) => self.missing_columns_witness(
                fields.len(),
                pats,
                |i| fields[i].1.clone(),
                |parts| {
                    let rendered: Vec<String> = fields
                        .iter()
                        .zip(parts)
                        .map(|((label, _), part)| format!("{label} = {part}"))
                        .collect();
                    format!("{{{}}}", rendered.join(", "))
                },
            ),
            _ => Some("_".to_owned()),
        }
    }

    /// Coverage for product shapes. A match over tuples is recognized as
    /// exhaustive when some arm is all-irrefutable, or when exactly one
    /// column is refutable across all arms and that column's patterns are
    /// exhaustive on their own.
    fn missing_columns_witness(
        &mut self,
        width: usize,
        pats: &[&CorePat],
        column_ty: impl Fn(usize) -> Type,
        render: impl Fn(Vec<String>) -> String,
    ) -> Option<String> {
        let columns: Vec<Vec<&CorePat>> = (0..width)
            .map(|i| {
                pats.iter()
                    .filter_map(|p| match &p.kind {
                        CorePatKind::Tuple(elems) => elems.get(i),
                        CorePatKind::Record(fields) => fields.get(i).map(|(_, p)| p),
                        _ => None,
                    })
                    .collect()
            })
            .collect();
        for c in 0..width {
            let others_irrefutable = pats.iter().all(|p| {
                let elems: Vec<&CorePat> = match &p.kind {
                    CorePatKind::Tuple(elems) => elems.iter().collect(),
                    CorePatKind::Record(fields) => fields.iter().map(|(_, p)| p).collect(),
                    _ => return false,
                };
                elems
                    .iter()
                    .enumerate()
                    .all(|(i, e)| i == c || e.is_irrefutable())
            });
            if others_irrefutable {
                let ty = column_ty(c);
                return self.missing_witness(&ty, &columns[c]).map(|inner| {
                    let parts = (0..width)
                        .map(|i| if i == c { inner.clone() } else { "_".to_owned() })
                        .collect();
                    render(parts)
                });
            }
        }
        // no single refutable column; the all-irrefutable-arm case was
        // handled by the caller, so report a generic witness
        let parts = (0..width).map(|_| "_".to_owned()).collect();
        Some(render(parts))
    }
}

/// True when every value matched by `b` is also matched by `a`.
fn subsumes(a: &CorePat, b: &CorePat) -> bool {
    match (&a.kind, &b.kind) {
        (CorePatKind::Wild | CorePatKind::Id(_), _) => true,
        (CorePatKind::Literal(la), CorePatKind::Literal(lb)) => la == lb,
        (
            CorePatKind::Ctor { name: na, arg: aa, .. },
            CorePatKind::Ctor { name: nb, arg: ab, .. },
        ) => {
            na == nb
                && match (aa, ab) {
                    (None, None) => true,
                    (Some(aa), Some(ab)) => subsumes(aa, ab),
                    _ => false,
                }
        }
        (CorePatKind::Cons(ha, ta), CorePatKind::Cons(hb, tb)) => subsumes(ha, hb) && subsumes(ta, tb),
        (CorePatKind::List(ea), CorePatKind::List(eb)) => {
            ea.len() == eb.len() && ea.iter().zip(eb).all(|(x, y)| subsumes(x, y))
        }
        (CorePatKind::Tuple(ea), CorePatKind::Tuple(eb)) => {
            ea.len() == eb.len() && ea.iter().zip(eb).all(|(x, y)| subsumes(x, y))
        }
        (CorePatKind::Record(fa), CorePatKind::Record(fb)) => {
            fa.len() == fb.len()
                && fa
                    .iter()
                    .zip(fb)
                    .all(|((la, pa), (lb, pb))| la == lb && subsumes(pa, pb))
        }
        _ => false,
    }
}

/// Lowers `fun f p1 ... pn = e | ...` clauses into a recursive value
/// binding of nested lambdas over a tuple match.
fn lower_fun(binds: &[FunBind]) -> Vec<ValBind> {
    binds
        .iter()
        .map(|bind| {
            let pos = bind.pos.clone();
            let arity = bind.arms[0].pats.len();
            let body = if arity == 1 {
                let arms = bind
                    .arms
                    .iter()
                    .map(|arm| Match {
                        pos: arm.body.pos.clone(),
                        pat: arm.pats[0].clone(),
                        exp: annotate(arm.body.clone(), arm.ret.clone()),
                    })
                    .collect();
                Expr::new(pos.clone(), ExprKind::Fn(arms))
            } else {
                // fn $p0 => ... => fn $pN => case ($p0, ..., $pN) of ...
                let params: Vec<String> = (0..arity).map(|i| format!("$p{i}")).collect();
                let scrutinee = Expr::new(
                    pos.clone(),
                    ExprKind::Tuple(
                        params
                            .iter()
                            .map(|p| Expr::new(pos.clone(), ExprKind::Id(p.clone())))
                            .collect(),
                    ),
                );
                let arms = bind
                    .arms
                    .iter()
                    .map(|arm| Match {
                        pos: arm.body.pos.clone(),
                        pat: Pat::new(pos.clone(), PatKind::Tuple(arm.pats.clone())),
                        exp: annotate(arm.body.clone(), arm.ret.clone()),
                    })
                    .collect();
                let mut body = Expr::new(
                    pos.clone(),
                    ExprKind::Case(Box::new(scrutinee), arms),
                );
                for param in params.iter().rev() {
                    body = Expr::new(
                        pos.clone(),
                        ExprKind::Fn(vec![Match {
                            pos: pos.clone(),
                            pat: Pat::new(pos.clone(), PatKind::Id(param.clone())),
                            exp: body,
                        }]),
                    );
                }
                body
            };
            ValBind {
                pat: Pat::new(pos, PatKind::Id(bind.name.clone())),
                exp: body,
            }
        })
        .collect()
}

fn annotate(exp: Expr, ret: Option<TypeExpr>) -> Expr {
    match ret {
        Some(ty) => {
            let pos = exp.pos.clone();
            Expr::new(pos, ExprKind::Annotated(Box::new(exp), ty))
        }
        None => exp,
    }
}

impl TypeEnv {
    fn scopes_push(&mut self, scope: AHashMap<String, TBinding>) {
        self.scopes.push(scope);
    }
}
