//! Replays the script corpus under `tests/script/`.
//!
//! A script interleaves REPL input (statements terminated by `;`, possibly
//! spanning lines) with expected output lines prefixed `> `. Each input
//! runs through one shared session per file, so scripts exercise the
//! accumulated environment the same way an interactive session does.
//! Errors print on the same channel as results, with their `Display` form.

use std::path::Path;

use pretty_assertions::assert_eq;

fn run_script(path: &Path) -> datatest_stable::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut session = morel::Session::new();
    // expected lines in the corpus are written unwrapped
    session.config.line_width = 400;
    session.load_foreign("scott");
    if let Some(dir) = path.parent() {
        session.set_directory(dir);
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }
        let statement_line = i + 1;
        let mut statement = String::new();
        while i < lines.len() {
            statement.push_str(lines[i]);
            statement.push('\n');
            i += 1;
            if morel::statement_complete(&statement) {
                break;
            }
        }
        let mut expected: Vec<String> = Vec::new();
        while i < lines.len() {
            if let Some(rest) = lines[i].strip_prefix("> ") {
                expected.push(rest.to_owned());
                i += 1;
            } else {
                break;
            }
        }
        let actual = match session.execute(&statement, "script") {
            Ok(output) => output,
            Err(error) => error.to_string(),
        };
        let actual: Vec<String> = if actual.is_empty() {
            Vec::new()
        } else {
            actual.lines().map(str::to_owned).collect()
        };
        assert_eq!(
            actual,
            expected,
            "statement at {}:{statement_line}",
            path.display()
        );
    }
    Ok(())
}

datatest_stable::harness!(run_script, "tests/script", r"^.*\.sml$");
