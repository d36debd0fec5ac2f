//! The `morel` command-line interpreter.
//!
//! Runs script files in order, evaluates a single `--eval` expression, or
//! reads statements from stdin. Exit codes: 0 on clean termination, 1 on
//! an uncaught evaluation error, 2 on a parse or type error, 3 on an I/O
//! error for a source file.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use morel::{MorelError, Session, StderrTracer, statement_complete};

#[derive(Parser)]
#[command(name = "morel", version, about = "An interpreter for an ML-family language with relational queries")]
struct Args {
    /// Source files, evaluated in order.
    scripts: Vec<PathBuf>,

    /// Evaluate a single expression, print, and exit.
    #[arg(long, value_name = "EXPR")]
    eval: Option<String>,

    /// Resolve relative `use` imports against this directory.
    #[arg(long, value_name = "PATH")]
    directory: Option<PathBuf>,

    /// Load a named foreign data source (e.g. `scott`).
    #[arg(long, value_name = "NAME")]
    foreign: Vec<String>,

    /// Echo each input line before its result.
    #[arg(long)]
    echo: bool,

    /// Print pipeline stages to stderr.
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mut session = Session::new();
    if args.trace {
        session.set_tracer(Box::new(StderrTracer));
    }
    if let Some(directory) = &args.directory {
        session.set_directory(directory.clone());
    }
    for name in &args.foreign {
        if !session.load_foreign(name) {
            eprintln!("morel: unknown foreign data source '{name}'");
            return ExitCode::from(3);
        }
    }

    if let Some(expr) = &args.eval {
        return match run_chunk(&mut session, expr, "expr", args.echo) {
            Ok(()) => ExitCode::SUCCESS,
            Err(code) => code,
        };
    }

    if args.scripts.is_empty() {
        return repl(&mut session, args.echo);
    }

    for script in &args.scripts {
        let source = match std::fs::read_to_string(script) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("morel: error reading {}: {e}", script.display());
                return ExitCode::from(3);
            }
        };
        let name = script.display().to_string();
        if let Err(code) = run_chunk(&mut session, &source, &name, args.echo) {
            return code;
        }
    }
    ExitCode::SUCCESS
}

fn run_chunk(session: &mut Session, source: &str, name: &str, echo: bool) -> Result<(), ExitCode> {
    if echo {
        for line in source.lines() {
            println!("{line}");
        }
    }
    match session.execute(source, name) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            Ok(())
        }
        Err(error) => {
            eprintln!("morel: {error}");
            Err(ExitCode::from(error.exit_code()))
        }
    }
}

/// Reads `;`-terminated statements from stdin, accumulating lines until a
/// statement is complete. Errors are printed and the session continues.
fn repl(session: &mut Session, echo: bool) -> ExitCode {
    let stdin = std::io::stdin();
    let mut pending = String::new();
    loop {
        if pending.is_empty() {
            print!("- ");
        } else {
            print!("= ");
        }
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => return ExitCode::SUCCESS,
            Ok(_) => {}
            Err(e) => {
                eprintln!("morel: {e}");
                return ExitCode::from(3);
            }
        }
        if echo {
            print!("{line}");
        }
        if line.trim().is_empty() && pending.is_empty() {
            continue;
        }
        pending.push_str(&line);
        if !statement_complete(&pending) {
            continue;
        }
        let source = std::mem::take(&mut pending);
        match session.execute(&source, "stdin") {
            Ok(output) => {
                if !output.is_empty() {
                    println!("{output}");
                }
            }
            Err(error) => report(&error),
        }
    }
}

fn report(error: &MorelError) {
    eprintln!("morel: {error}");
}
