//! Interactive REPL: one persistent `Vm`, so a `var` or `fun` defined on one
//! line is visible on the next. Errors are printed but never exit the loop —
//! only EOF (Ctrl-D) or an explicit interrupt does.

use corvid_runtime::{InterpretError, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub fn run() {
    println!("corvid {}", env!("CARGO_PKG_VERSION"));
    let mut vm = Vm::new();
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("failed to start line editor: {err}");
            return;
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match vm.interpret(&line) {
                    Ok(()) => {}
                    Err(InterpretError::Compile(errors)) => {
                        for e in errors {
                            eprintln!("[line {}] {}", e.line, e.message);
                        }
                    }
                    Err(InterpretError::Runtime(message)) => eprintln!("{message}"),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        }
    }
}
