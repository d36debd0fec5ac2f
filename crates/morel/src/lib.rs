#![doc = include_str!("../../../README.md")]

mod ast;
mod builtins;
mod compile;
mod core;
mod error;
mod eval;
mod foreign;
mod from_builder;
mod parse;
mod plan;
mod print;
mod resolve;
mod session;
mod token;
mod tracer;
mod types;
mod unify;
mod value;

pub use crate::{
    error::{
        CompileError, EvalResult, MorelError, ParseError, Pos, RuntimeError, TypeError,
        TypeErrorKind, Warning,
    },
    foreign::{ForeignValue, MemoryTable},
    print::PrintConfig,
    session::Session,
    token::statement_complete,
    tracer::{NoopTracer, SessionTracer, StderrTracer},
    types::{DataType, Prim, Scheme, TyVar, Type},
    value::Value,
};
