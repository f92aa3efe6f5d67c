//! Command-line entry point: `corvid [script]`.
//!
//! - No arguments: starts a REPL backed by one persistent `Vm`, so definitions
//!   made on one line are visible to the next.
//! - One argument: runs it as a script with a fresh `Vm`, exiting with a
//!   sysexits-style code that distinguishes compile errors from runtime ones.
//! - More than one argument: prints usage to stderr and exits 64.

mod commands;
mod repl;

use std::process::ExitCode;

const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            repl::run();
            ExitCode::SUCCESS
        }
        [path] => match commands::run::run_file(path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(commands::run::RunError::Read(err)) => {
                eprintln!("{err:?}");
                ExitCode::from(EX_IOERR)
            }
            Err(commands::run::RunError::Compile(errors)) => {
                for e in errors {
                    eprintln!("[line {}] {}", e.line, e.message);
                }
                ExitCode::from(EX_DATAERR)
            }
            Err(commands::run::RunError::Runtime(message)) => {
                eprintln!("{message}");
                ExitCode::from(EX_SOFTWARE)
            }
        },
        _ => {
            eprintln!("Usage: corvid [path]");
            ExitCode::from(EX_USAGE)
        }
    }
}
