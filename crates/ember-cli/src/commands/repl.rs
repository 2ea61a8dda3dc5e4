//! Interactive REPL: line editing, history, and multi-line input on top of
//! a persistent [`Session`].

use crate::output;
use ember_runtime::{Config, Session};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

const PROMPT: &str = "ember> ";
const CONTINUATION_PROMPT: &str = "  ... ";

pub fn execute(config: &Config) -> i32 {
    let mut session = Session::new(config);
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("ember: cannot start line editor: {err}");
            return output::EXIT_FAILURE;
        }
    };

    let history_path = history_path();
    if let Some(ref path) = history_path {
        let _ = editor.load_history(path);
    }

    println!("ember {} REPL", env!("CARGO_PKG_VERSION"));
    println!("Type help for help, exit to quit\n");

    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            PROMPT
        } else {
            CONTINUATION_PROMPT
        };

        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();

                if trimmed.is_empty() {
                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    continue;
                }

                // REPL commands only apply outside multi-line mode.
                if buffer.is_empty() && is_command(trimmed) {
                    let _ = editor.add_history_entry(&line);
                    if handle_command(trimmed, &mut session, config) {
                        break;
                    }
                    continue;
                }

                if buffer.is_empty() {
                    buffer = line.clone();
                } else {
                    buffer.push('\n');
                    buffer.push_str(&line);
                }

                if is_incomplete(&buffer) {
                    continue;
                }

                let code = std::mem::take(&mut buffer);
                let _ = editor.add_history_entry(&code);

                match session.eval(&code) {
                    Ok(value) => output::print_result(&value, config.unbuffered),
                    Err(err) => {
                        output::report_failure(&err);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C: discard the multi-line buffer or hint at exit.
                if !buffer.is_empty() {
                    buffer.clear();
                    println!();
                } else {
                    println!("\n(To exit, press Ctrl+D or type exit)");
                }
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("ember: {err}");
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.save_history(path);
    }

    output::EXIT_OK
}

fn history_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ember").join("repl_history"))
}

fn is_command(input: &str) -> bool {
    matches!(
        input.split_whitespace().next(),
        Some("exit" | "quit" | "help" | "clear" | "load")
    )
}

/// Handle a REPL command. Returns true if the REPL should exit.
fn handle_command(cmd: &str, session: &mut Session, config: &Config) -> bool {
    match cmd {
        "exit" | "quit" => return true,
        "help" => {
            println!("Commands:");
            println!("  help            Show this help");
            println!("  clear           Reset session (discard all state)");
            println!("  load <file>     Load and execute a source file");
            println!("  exit            Exit the REPL (also Ctrl-D)");
        }
        "clear" => {
            session.reset(config);
            println!("Session cleared.");
        }
        _ if cmd.starts_with("load ") => {
            let path = cmd.strip_prefix("load ").unwrap().trim();
            if path.is_empty() {
                eprintln!("Usage: load <file>");
            } else {
                match std::fs::read_to_string(path) {
                    Ok(source) => match session.eval(&source) {
                        Ok(_) => println!("Loaded: {path}"),
                        Err(err) => {
                            output::report_failure(&err);
                        }
                    },
                    Err(err) => eprintln!("Cannot read {path}: {err}"),
                }
            }
        }
        _ => {
            eprintln!("Unknown command: {cmd}");
            eprintln!("Type help for available commands.");
        }
    }
    false
}

/// Count open delimiters, skipping those inside strings and line comments.
/// Returns true if the buffered input cannot be a complete program yet.
fn is_incomplete(code: &str) -> bool {
    let mut depth = 0i32;
    let mut chars = code.chars().peekable();
    let mut in_string = false;
    let mut in_comment = false;

    while let Some(c) = chars.next() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if in_string {
            if c == '\\' {
                chars.next();
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '/' if chars.peek() == Some(&'/') => {
                chars.next();
                in_comment = true;
            }
            '{' | '(' => depth += 1,
            '}' | ')' => depth -= 1,
            _ => {}
        }
    }

    depth > 0 || in_string
}
