//! Session tracing hooks.
//!
//! The interpreter never logs on its own; hosts that want visibility into
//! the pipeline install a tracer. `NoopTracer` is the default and
//! `StderrTracer` prints one line per stage, which is what `--trace`
//! wires up in the CLI.

/// Callbacks at the stage boundaries of one top-level statement.
pub trait SessionTracer {
    /// A statement was parsed successfully.
    fn on_parse(&mut self, statement: &str) {
        let _ = statement;
    }

    /// A statement resolved; `bindings` are the names it declares.
    fn on_resolve(&mut self, bindings: &[String]) {
        let _ = bindings;
    }

    /// A `from` was routed to the relational planner.
    fn on_plan(&mut self) {}

    /// A statement finished and printed `output`.
    fn on_result(&mut self, output: &str) {
        let _ = output;
    }
}

/// The default tracer; does nothing.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl SessionTracer for NoopTracer {}

/// Prints one line per stage to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl SessionTracer for StderrTracer {
    fn on_parse(&mut self, statement: &str) {
        eprintln!("[parse] {statement}");
    }

    fn on_resolve(&mut self, bindings: &[String]) {
        eprintln!("[resolve] {}", bindings.join(", "));
    }

    fn on_plan(&mut self) {
        eprintln!("[plan] relational");
    }

    fn on_result(&mut self, output: &str) {
        eprintln!("[result] {}", output.replace('\n', " "));
    }
}
