//! The top-level driver.
//!
//! A session owns the accumulated environment (compile-time bindings,
//! datatype registry, runtime values) and executes statements
//! transactionally: the resolver and evaluator work against copies or
//! persistent extensions, and the session commits only when the whole
//! statement succeeds. A failed declaration leaves every piece of state
//! untouched.

use std::path::PathBuf;
use std::rc::Rc;

use crate::ast::{ExprKind, Literal, Statement};
use crate::compile::{DeclCode, compile_decl};
use crate::core::CoreDecl;
use crate::error::{MorelError, RuntimeError, TypeError, TypeErrorKind, Warning};
use crate::eval::{Code, EvalEnv, bind_pat, eval_rec_binds};
use crate::print::{PrintConfig, format_scheme, format_type, format_value, wrap_line};
use crate::resolve::{self, Resolved, TBinding, TypeEnv};
use crate::tracer::{NoopTracer, SessionTracer};
use crate::types::{DataType, DataTypeRegistry, Type};
use crate::value::Value;

pub struct Session {
    env: TypeEnv,
    registry: DataTypeRegistry,
    values: EvalEnv,
    next_ordinal: u32,
    pub config: PrintConfig,
    tracer: Box<dyn SessionTracer>,
    /// Base directory for relative `use` paths.
    directory: PathBuf,
    /// When set, non-exhaustive and redundant matches are errors.
    strict_matches: bool,
}

impl Session {
    pub fn new() -> Self {
        let env = TypeEnv::basis();
        let mut pairs: Vec<(Rc<str>, Value)> = Vec::new();
        for (name, entry) in crate::builtins::basis() {
            if let crate::builtins::BasisEntry::Val { value, .. } = entry {
                pairs.push((name.into(), value));
            }
        }
        Self {
            env,
            registry: DataTypeRegistry::new(),
            values: EvalEnv::empty().bind_all(pairs),
            next_ordinal: 0,
            config: PrintConfig::default(),
            tracer: Box::new(NoopTracer),
            directory: PathBuf::from("."),
            strict_matches: false,
        }
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn SessionTracer>) {
        self.tracer = tracer;
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
    }

    pub fn set_strict_matches(&mut self, strict: bool) {
        self.strict_matches = strict;
    }

    /// Registers a named foreign data source. Returns false when the name
    /// is unknown.
    pub fn load_foreign(&mut self, name: &str) -> bool {
        let Some(bindings) = crate::foreign::load(name) else {
            return false;
        };
        let mut pairs: Vec<(Rc<str>, Value)> = Vec::new();
        for binding in bindings {
            self.env.insert(
                binding.name.to_owned(),
                TBinding::Val {
                    named: crate::core::NamedPat {
                        name: binding.name.into(),
                        ordinal: 0,
                    },
                    scheme: crate::types::Scheme::mono(binding.ty),
                    eq_vars: Vec::new(),
                },
            );
            pairs.push((binding.name.into(), binding.value));
        }
        self.values = self.values.bind_all(pairs);
        true
    }

    /// Executes every statement in `source`, returning the printed output.
    /// Statements before an error commit; the failing one does not.
    pub fn execute(&mut self, source: &str, file: &str) -> Result<String, MorelError> {
        let statements = crate::parse::parse_statements(source, file)?;
        let mut output = Vec::new();
        for statement in statements {
            let lines = self.run_statement(&statement)?;
            if !lines.is_empty() {
                output.push(lines);
            }
        }
        Ok(output.join("\n"))
    }

    fn run_statement(&mut self, statement: &Statement) -> Result<String, MorelError> {
        self.tracer.on_parse(&statement.to_string());
        if let Some(path) = use_target(statement) {
            return self.run_use(&path);
        }

        let resolved = resolve::resolve_statement(
            statement,
            self.env.clone(),
            self.registry.clone(),
            self.next_ordinal,
        )?;
        if self.strict_matches {
            if let Some(warning) = resolved.warnings.first() {
                return Err(MorelError::Type(warning_to_error(warning)));
            }
        }
        self.tracer
            .on_resolve(&resolved.bindings.iter().map(|b| b.name.clone()).collect::<Vec<_>>());

        let code = compile_decl(&resolved.decl)?;
        let pairs = self.evaluate(&code)?;

        // evaluation succeeded; commit everything
        let Resolved {
            decl,
            bindings,
            env,
            registry,
            warnings,
            next_ordinal,
        } = resolved;
        self.env = env;
        self.registry = registry;
        self.next_ordinal = next_ordinal;
        if !pairs.is_empty() {
            self.values = self.values.bind_all(pairs);
        }

        let mut lines: Vec<String> = warnings.iter().map(Warning::to_string).collect();
        self.describe_decl(&decl, &mut lines);
        for binding in &bindings {
            let value = self
                .values
                .lookup(&binding.runtime_name)
                .expect("committed binding present");
            let rendered = format_value(&value, &binding.scheme.ty, &self.config);
            lines.push(format!(
                "val {} = {} : {}",
                binding.name,
                rendered,
                format_scheme(&binding.scheme.ty, &binding.eq_vars)
            ));
        }
        let output = lines
            .iter()
            .map(|line| wrap_line(line, self.config.line_width))
            .collect::<Vec<_>>()
            .join("\n");
        self.tracer.on_result(&output);
        Ok(output)
    }

    fn evaluate(&mut self, code: &DeclCode) -> Result<Vec<(Rc<str>, Value)>, MorelError> {
        match code {
            DeclCode::Val { pat, code } => {
                if uses_plan(code) {
                    self.tracer.on_plan();
                }
                let value = code.eval(&self.values)?;
                let mut pairs = Vec::new();
                if bind_pat(pat, &value, &mut pairs) {
                    Ok(pairs)
                } else {
                    Err(MorelError::Runtime(RuntimeError::Bind))
                }
            }
            DeclCode::Rec { binds } => {
                let rec_env = eval_rec_binds(binds, &self.values);
                let pairs = binds
                    .iter()
                    .map(|(name, _)| {
                        let value = rec_env.lookup(name).expect("recursive binding installed");
                        (Rc::clone(name), value)
                    })
                    .collect();
                Ok(pairs)
            }
            DeclCode::Nothing => Ok(Vec::new()),
        }
    }

    fn describe_decl(&self, decl: &CoreDecl, lines: &mut Vec<String>) {
        match decl {
            CoreDecl::Datatype(datas) => {
                for data in datas {
                    lines.push(describe_datatype(data));
                }
            }
            CoreDecl::TypeAlias { name } => {
                if let Some((arity, ty)) = self.env.alias(name) {
                    let mut prefix = String::new();
                    describe_params(*arity, &mut prefix);
                    lines.push(format!("type {prefix}{name} = {}", format_type(ty)));
                }
            }
            CoreDecl::Over { name } => lines.push(format!("over {name}")),
            CoreDecl::NonRecVal { .. } | CoreDecl::RecVal { .. } => {}
        }
    }

    fn run_use(&mut self, path: &str) -> Result<String, MorelError> {
        let full = self.directory.join(path);
        let source = std::fs::read_to_string(&full).map_err(|e| MorelError::Io {
            path: full.display().to_string(),
            message: e.to_string(),
        })?;
        let inner = self.execute(&source, path)?;
        let mut output = format!("[opening {path}]");
        if !inner.is_empty() {
            output.push('\n');
            output.push_str(&inner);
        }
        Ok(output)
    }

    /// Looks up the current value of a top-level name, mainly for tests.
    pub fn value_of(&self, name: &str) -> Option<Value> {
        self.values.lookup(name)
    }

    /// The type scheme of a top-level name, rendered.
    pub fn type_of(&self, name: &str) -> Option<String> {
        match self.env.lookup(name) {
            Some(TBinding::Val { scheme, .. }) => Some(format_type(&scheme.ty)),
            _ => None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// `use "file"` is handled by the session, not the pipeline.
fn use_target(statement: &Statement) -> Option<String> {
    let Statement::Expr(exp) = statement else {
        return None;
    };
    let ExprKind::Apply(func, arg) = &exp.kind else {
        return None;
    };
    let ExprKind::Id(name) = &func.kind else {
        return None;
    };
    if name != "use" {
        return None;
    }
    match &arg.kind {
        ExprKind::Literal(Literal::Str(path)) => Some(path.to_string()),
        _ => None,
    }
}

fn warning_to_error(warning: &Warning) -> TypeError {
    let (pos, message) = match warning {
        Warning::NonExhaustive { pos, witness } => {
            (pos.clone(), format!("match nonexhaustive, missing: {witness}"))
        }
        Warning::RedundantMatch { pos } => (pos.clone(), "match redundant".to_owned()),
    };
    TypeError::new(pos, TypeErrorKind::Other { message })
}

fn describe_datatype(data: &DataType) -> String {
    let mut out = String::from("datatype ");
    describe_params(data.arity, &mut out);
    out.push_str(&data.name);
    out.push_str(" = ");
    for (i, (ctor, payload)) in data.ctors.borrow().iter().enumerate() {
        if i > 0 {
            out.push_str(" | ");
        }
        out.push_str(ctor);
        if let Some(payload) = payload {
            out.push_str(" of ");
            out.push_str(&format_type(payload));
        }
    }
    out
}

fn describe_params(arity: u32, out: &mut String) {
    match arity {
        0 => {}
        1 => out.push_str("'a "),
        n => {
            out.push('(');
            for i in 0..n {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format_type(&Type::Gen(i)));
            }
            out.push_str(") ");
        }
    }
}

fn uses_plan(code: &Code) -> bool {
    match code {
        Code::Plan(_) => true,
        Code::Value(_) | Code::Lookup(_) => false,
        Code::Tuple(elems) | Code::List(elems) => elems.iter().any(uses_plan),
        Code::Apply(a, b) | Code::AndAlso(a, b) | Code::OrElse(a, b) => {
            uses_plan(a) || uses_plan(b)
        }
        Code::Fn(func) => uses_plan(&func.body),
        Code::Case { scrutinee, arms } => {
            uses_plan(scrutinee) || arms.iter().any(|(_, code)| uses_plan(code))
        }
        Code::Let { exp, body, .. } => uses_plan(exp) || uses_plan(body),
        Code::LetRec { binds, body } => {
            binds.iter().any(|(_, f)| uses_plan(&f.body)) || uses_plan(body)
        }
        Code::From(from) => from.steps.iter().any(|step| match step {
            crate::eval::StepCode::Scan { source, filter, .. } => {
                uses_plan(source) || filter.as_ref().is_some_and(uses_plan)
            }
            crate::eval::StepCode::Where { cond } => uses_plan(cond),
            crate::eval::StepCode::Skip { count } | crate::eval::StepCode::Take { count } => {
                uses_plan(count)
            }
            crate::eval::StepCode::Order { keys } => keys.iter().any(|(k, _)| uses_plan(k)),
            crate::eval::StepCode::Group { keys, aggs, .. } => {
                keys.iter().any(|(_, k)| uses_plan(k))
                    || aggs.iter().any(|agg| {
                        uses_plan(&agg.func) || agg.arg.as_ref().is_some_and(uses_plan)
                    })
            }
            crate::eval::StepCode::Yield { exp, .. } => uses_plan(exp),
            crate::eval::StepCode::Unorder => false,
            crate::eval::StepCode::Union { arg, .. }
            | crate::eval::StepCode::Intersect { arg, .. }
            | crate::eval::StepCode::Except { arg, .. } => uses_plan(arg),
        }),
    }
}
