//! Runs a single source file against a fresh `Vm`.

use anyhow::Context;
use corvid_runtime::{CompileError, InterpretError, Vm};

pub enum RunError {
    /// The file itself couldn't be read; carries full `anyhow` context
    /// (distinct from a language-level error, per the CLI's exit-code contract).
    Read(anyhow::Error),
    Compile(Vec<CompileError>),
    Runtime(String),
}

pub fn run_file(path: &str) -> Result<(), RunError> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script '{path}'"))
        .map_err(RunError::Read)?;

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => Ok(()),
        Err(InterpretError::Compile(errors)) => Err(RunError::Compile(errors)),
        Err(InterpretError::Runtime(message)) => Err(RunError::Runtime(message)),
    }
}
