//! Error taxonomy for the interpreter pipeline.
//!
//! Errors are domain values, not host errors: each stage has its own error
//! type carrying the source position it arose at, and every type formats
//! exactly the way the REPL reports it. The top-level driver catches
//! [`MorelError`], prints it, and continues with the next input.

use std::fmt;
use std::rc::Rc;

/// A source position: file name plus a start/end line.column range.
///
/// Lines and columns are 1-based, matching what editors display. The end
/// position is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub file: Rc<str>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Pos {
    pub fn new(file: Rc<str>, start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            file,
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// A synthetic position for nodes the resolver invents (lowered sugar).
    pub fn internal() -> Self {
        Self::new("internal".into(), 0, 0, 0, 0)
    }

    /// The smallest range covering both positions.
    ///
    /// Used when a parent node spans two children in different parts of the
    /// source. The file of `self` wins; positions never mix files in practice.
    pub fn union(&self, other: &Self) -> Self {
        let (start_line, start_col) =
            if (self.start_line, self.start_col) <= (other.start_line, other.start_col) {
                (self.start_line, self.start_col)
            } else {
                (other.start_line, other.start_col)
            };
        let (end_line, end_col) = if (self.end_line, self.end_col) >= (other.end_line, other.end_col) {
            (self.end_line, self.end_col)
        } else {
            (other.end_line, other.end_col)
        };
        Self::new(Rc::clone(&self.file), start_line, start_col, end_line, end_col)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_line == self.end_line && self.start_col == self.end_col {
            write!(f, "{}:{}.{}", self.file, self.start_line, self.start_col)
        } else {
            write!(
                f,
                "{}:{}.{}-{}.{}",
                self.file, self.start_line, self.start_col, self.end_line, self.end_col
            )
        }
    }
}

/// A syntax error. Fatal for the current input; the session survives.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub pos: Pos,
    pub message: String,
}

impl ParseError {
    pub fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: parse error: {}", self.pos, self.message)
    }
}

/// What went wrong during type resolution.
///
/// Type payloads are carried pre-rendered so that errors stay printable
/// after the inference tables that produced them are gone.
#[derive(Debug, Clone)]
pub enum TypeErrorKind {
    /// Structural mismatch between two types.
    Unify { expected: String, actual: String },
    /// Occurs-check failure: a variable appears inside its own solution.
    Occurs { ty: String },
    /// Record field sets do not match.
    FieldMismatch { label: String, ty: String },
    /// Reference to a type constructor that is not in scope.
    UnknownType { name: String },
    /// Reference to a value identifier that is not in scope.
    Unbound { name: String },
    /// More than one overload instance matches the argument type.
    OverloadAmbiguous { name: String, ty: String },
    /// No overload instance matches the argument type.
    OverloadNoMatch { name: String, ty: String },
    /// A construct that is well-formed syntactically but rejected by the
    /// resolver, e.g. a record expression field with no derivable label.
    Other { message: String },
}

/// A type error at a source position. The declaration that produced it does
/// not extend the environment.
#[derive(Debug, Clone)]
pub struct TypeError {
    pub pos: Pos,
    pub kind: TypeErrorKind,
}

impl TypeError {
    pub fn new(pos: Pos, kind: TypeErrorKind) -> Self {
        Self { pos, kind }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: type error: ", self.pos)?;
        match &self.kind {
            TypeErrorKind::Unify { expected, actual } => {
                write!(f, "cannot unify {expected} with {actual}")
            }
            TypeErrorKind::Occurs { ty } => {
                write!(f, "circular type: a type variable occurs in {ty}")
            }
            TypeErrorKind::FieldMismatch { label, ty } => {
                write!(f, "no field '{label}' in record type {ty}")
            }
            TypeErrorKind::UnknownType { name } => write!(f, "unknown type constructor {name}"),
            TypeErrorKind::Unbound { name } => write!(f, "unbound variable or constructor: {name}"),
            TypeErrorKind::OverloadAmbiguous { name, ty } => {
                write!(f, "ambiguous overload: more than one instance of {name} matches {ty}")
            }
            TypeErrorKind::OverloadNoMatch { name, ty } => {
                write!(f, "no instance of {name} matches {ty}")
            }
            TypeErrorKind::Other { message } => f.write_str(message),
        }
    }
}

/// An invariant violation detected while lowering core to executable code.
///
/// These indicate bugs in the resolver or the core builder, not in user
/// programs; they are rare by construction.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub pos: Pos,
    pub message: String,
}

impl CompileError {
    pub fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: internal compile error: {}", self.pos, self.message)
    }
}

/// Runtime failures raised by the evaluator.
///
/// These unwind the current top-level expression; the session environment
/// and the type registry are unaffected.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// A match fell through every arm.
    Bind,
    /// Integer division or modulus by zero.
    Div,
    /// Integer arithmetic overflowed.
    Overflow,
    /// Index out of range (`String.sub`, `List.nth`).
    Subscript,
    /// A size argument was negative or too large (`List.tabulate`).
    Size,
    /// An operation on an empty collection that requires elements
    /// (`hd`, `tl`, `Relational.only`).
    Empty,
    /// A foreign tabular source failed while producing rows.
    Foreign(String),
}

impl RuntimeError {
    /// The exception constructor name, as the REPL reports it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bind => "Bind",
            Self::Div => "Div",
            Self::Overflow => "Overflow",
            Self::Subscript => "Subscript",
            Self::Size => "Size",
            Self::Empty => "Empty",
            Self::Foreign(_) => "Foreign",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreign(cause) => write!(f, "uncaught exception Foreign: {cause}"),
            other => write!(f, "uncaught exception {}", other.name()),
        }
    }
}

/// Non-fatal diagnostics the resolver can emit alongside a successful result.
#[derive(Debug, Clone)]
pub enum Warning {
    /// A `case` does not cover every shape of its scrutinee; `witness` is a
    /// pattern (in surface syntax) that no arm matches.
    NonExhaustive { pos: Pos, witness: String },
    /// A match arm that can never fire.
    RedundantMatch { pos: Pos },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonExhaustive { pos, witness } => {
                write!(f, "{pos}: warning: match nonexhaustive, missing: {witness}")
            }
            Self::RedundantMatch { pos } => write!(f, "{pos}: warning: match redundant"),
        }
    }
}

/// Any error the pipeline can produce, tagged by stage.
#[derive(Debug, Clone)]
pub enum MorelError {
    Parse(ParseError),
    Type(TypeError),
    Compile(CompileError),
    Runtime(RuntimeError),
    /// Failure reading a source file (`use`, CLI scripts).
    Io { path: String, message: String },
}

impl MorelError {
    /// The process exit code this error maps to in batch mode.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Runtime(_) => 1,
            Self::Parse(_) | Self::Type(_) | Self::Compile(_) => 2,
            Self::Io { .. } => 3,
        }
    }
}

impl fmt::Display for MorelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Type(e) => e.fmt(f),
            Self::Compile(e) => e.fmt(f),
            Self::Runtime(e) => e.fmt(f),
            Self::Io { path, message } => write!(f, "error reading {path}: {message}"),
        }
    }
}

impl From<ParseError> for MorelError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<TypeError> for MorelError {
    fn from(e: TypeError) -> Self {
        Self::Type(e)
    }
}

impl From<CompileError> for MorelError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<RuntimeError> for MorelError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
pub type TypeResult<T> = Result<T, TypeError>;
pub type CompileResult<T> = Result<T, CompileError>;
pub type EvalResult<T> = Result<T, RuntimeError>;
