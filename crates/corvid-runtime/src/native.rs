//! Native-function boundary.
//!
//! A native is a bare function pointer with an arity-unchecked calling
//! convention, registered into globals by name. Natives can signal failure:
//! returning `Err` surfaces as a runtime error through the normal reporting
//! path, same as any other runtime fault.

use std::time::Instant;

use crate::value::Value;

/// `clock()` — seconds elapsed since the VM started, as an `f64`.
pub fn clock_native(_argc: u8, _args: &[Value]) -> Result<Value, String> {
    CLOCK_START.with(|start| Ok(Value::Number(start.elapsed().as_secs_f64())))
}

thread_local! {
    static CLOCK_START: Instant = Instant::now();
}

/// Exercised only by tests: always fails, proving the error channel reaches the
/// VM as a normal runtime error rather than propagating a bad `Value`.
pub fn always_errors_native(_argc: u8, _args: &[Value]) -> Result<Value, String> {
    Err("synthetic native failure".to_string())
}
