//! The bytecode interpreter: a stack machine with one `CallFrame` per active
//! closure call. Owns the heap and drives both compilation (so it can hand
//! the compiler its own roots for a mid-compile collection) and execution.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::bytecode::{disasm, OpCode};
use crate::compiler::{self, CompileError};
use crate::gc::Heap;
use crate::native::{always_errors_native, clock_native};
use crate::object::{
    GcRef, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjNative,
    ObjString, ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

/// Where `print` statements go. Shared and lockable so a caller can swap in a
/// buffer and read it back after `interpret` returns, without forking a
/// process just to capture stdout.
pub type OutputWriter = Arc<Mutex<Box<dyn Write + Send>>>;

fn stdout_writer() -> OutputWriter {
    Arc::new(Mutex::new(Box::new(io::stdout())))
}

/// Every way a running program can fault. Each variant's `#[error]` text is
/// the exact message a user sees; `Vm::runtime_error` prepends the per-frame
/// `[line N] in <fn>` trace below it before the program gives up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Expected {arity} arguments but got {argc}.")]
    ArityMismatch { arity: u8, argc: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Undefined property '{name}' on '{class}'.")]
    UndefinedProperty { name: String, class: String },
    #[error("Only instances have properties.")]
    NotAnInstanceForGet,
    #[error("Only instances have fields.")]
    NotAnInstanceForSet,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be two numbers or two strings.")]
    OperandsMustBeNumbersOrStrings,
    #[error("Unknown opcode {0}.")]
    UnknownOpcode(u8),
    /// A native function's own reported failure, passed through verbatim.
    #[error("{0}")]
    Native(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime(String),
}

pub type InterpretResult = Result<(), InterpretError>;

struct CallFrame {
    closure: GcRef<ObjClosure>,
    ip: usize,
    /// Index into the VM's value stack where this frame's window starts — slot
    /// 0 is the callee itself (or `this`, for a bound method call).
    slot_base: usize,
}

/// The whole interpreter: value stack, call frames, globals, heap, and the
/// open-upvalue list. One `Vm` can run many `interpret` calls back to back,
/// sharing globals across them (the REPL's use case).
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    heap: Heap,
    open_upvalues: Vec<GcRef<ObjUpvalue>>,
    init_string: GcRef<ObjString>,
    output: OutputWriter,
    pub trace_execution: bool,
    pub stress_gc: bool,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern(b"init".to_vec());
        let mut vm = Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            heap,
            open_upvalues: Vec::new(),
            init_string,
            output: stdout_writer(),
            trace_execution: false,
            stress_gc: false,
        };
        vm.define_native("clock", clock_native);
        vm.define_native("__always_errors", always_errors_native);
        vm
    }

    /// Redirects `print` output, e.g. to an in-memory buffer for tests.
    pub fn set_output_writer(&mut self, writer: OutputWriter) {
        self.output = writer;
    }

    fn define_native(&mut self, name: &str, function: crate::object::NativeFn) {
        let name_ref = self.heap.intern(name.as_bytes().to_vec());
        let native = self.heap.alloc_native(ObjNative { name: name_ref, function });
        let hash = self.heap.string(name_ref).hash;
        self.globals.set(name_ref, hash, Value::Obj(native.erase()));
    }

    pub fn format_value(&self, value: Value) -> String {
        self.heap.format_value(value)
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Obj(r) => self.heap.obj(r).type_name(),
        }
    }

    /// Reads a global by name, for embedders inspecting state after a script
    /// runs (and for this crate's own integration tests).
    pub fn global(&mut self, name: &str) -> Option<Value> {
        let key = self.heap.intern(name.as_bytes().to_vec());
        let hash = self.heap.string(key).hash;
        self.globals.get(key, hash)
    }

    /// Compiles and runs `source` as a fresh top-level script.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = compiler::compile(source, &mut self.heap, &self.globals, self.init_string, self.stress_gc)
            .map_err(InterpretError::Compile)?;

        let closure = self.heap.alloc_closure(ObjClosure { function, upvalues: Vec::new() });
        self.stack.push(Value::Obj(closure.erase()));
        self.call(closure, 0).map_err(|e| InterpretError::Runtime(e.to_string()))?;
        self.run().map_err(InterpretError::Runtime)
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn runtime_error(&mut self, error: RuntimeError) -> String {
        let mut report = error.to_string();
        for frame in self.frames.iter().rev() {
            let closure = self.heap.closure(frame.closure);
            let function = self.heap.function(closure.function);
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(n) => self.heap.string(n).as_str().into_owned(),
                None => "script".to_string(),
            };
            report.push_str(&format!("\n[line {line}] in {name}"));
        }
        self.reset_stack();
        report
    }

    // ---- calling convention -----------------------------------------------------

    fn call(&mut self, closure: GcRef<ObjClosure>, argc: u8) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            return Err(RuntimeError::ArityMismatch { arity, argc });
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        let slot_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        let Value::Obj(r) = callee else {
            return Err(RuntimeError::NotCallable);
        };
        match self.heap.obj(r) {
            Obj::Closure(_) => self.call(r.cast(), argc),
            Obj::Native(native) => {
                let function = native.function;
                let base = self.stack.len() - argc as usize;
                let result = function(argc, &self.stack[base..]);
                self.stack.truncate(base - 1);
                match result {
                    Ok(value) => {
                        self.push(value);
                        Ok(())
                    }
                    Err(message) => Err(RuntimeError::Native(message)),
                }
            }
            Obj::Class(_) => {
                let class: GcRef<ObjClass> = r.cast();
                let instance = self.heap.alloc_instance(ObjInstance::new(class));
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = Value::Obj(instance.erase());
                if let Some(initializer) = self.find_method(class, self.init_string) {
                    self.call(initializer, argc)
                } else if argc != 0 {
                    Err(RuntimeError::ArityMismatch { arity: 0, argc })
                } else {
                    Ok(())
                }
            }
            Obj::BoundMethod(bound) => {
                let method = bound.method;
                let receiver = bound.receiver;
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = receiver;
                self.call(method, argc)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn find_method(&self, class: GcRef<ObjClass>, name: GcRef<ObjString>) -> Option<GcRef<ObjClosure>> {
        let hash = self.heap.string(name).hash;
        let value = self.heap.class(class).methods.get(name, hash)?;
        value.as_obj().map(|r| r.cast())
    }

    fn bind_method(&mut self, class: GcRef<ObjClass>, name: GcRef<ObjString>) -> Result<(), RuntimeError> {
        let Some(method) = self.find_method(class, name) else {
            let class_name = self.heap.string(self.heap.class(class).name).as_str().into_owned();
            let prop_name = self.heap.string(name).as_str().into_owned();
            return Err(RuntimeError::UndefinedProperty { name: prop_name, class: class_name });
        };
        let receiver = self.pop();
        let bound = self.heap.alloc_bound_method(ObjBoundMethod { receiver, method });
        self.push(Value::Obj(bound.erase()));
        Ok(())
    }

    fn define_method(&mut self, name: GcRef<ObjString>) {
        let method = self.pop();
        let Value::Obj(r) = self.peek(0) else { unreachable!("class must be on stack") };
        let class: GcRef<ObjClass> = r.cast();
        let hash = self.heap.string(name).hash;
        self.heap.class_mut(class).methods.set(name, hash, method);
    }

    // ---- upvalues -----------------------------------------------------

    /// Reuses an existing open upvalue for `stack_slot`, or inserts a new one.
    /// `open_upvalues` is kept sorted by strictly decreasing `location` (spec
    /// invariant 3), so the search doubles as finding the insertion point: the
    /// first entry whose slot is already less than `stack_slot` is where the
    /// new upvalue belongs.
    fn capture_upvalue(&mut self, stack_slot: usize) -> GcRef<ObjUpvalue> {
        let mut insert_at = self.open_upvalues.len();
        for (i, &existing) in self.open_upvalues.iter().enumerate() {
            if let ObjUpvalue::Open(slot) = self.heap.upvalue(existing) {
                if *slot == stack_slot {
                    return existing;
                }
                if *slot < stack_slot {
                    insert_at = i;
                    break;
                }
            }
        }
        let created = self.heap.alloc_upvalue(ObjUpvalue::Open(stack_slot));
        self.open_upvalues.insert(insert_at, created);
        created
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        let mut remaining = Vec::with_capacity(self.open_upvalues.len());
        for &r in self.open_upvalues.iter() {
            let should_close = matches!(self.heap.upvalue(r), ObjUpvalue::Open(slot) if *slot >= from_slot);
            if should_close {
                let slot = match self.heap.upvalue(r) {
                    ObjUpvalue::Open(slot) => *slot,
                    ObjUpvalue::Closed(_) => unreachable!(),
                };
                let value = self.stack[slot];
                *self.heap.upvalue_mut(r) = ObjUpvalue::Closed(value);
            } else {
                remaining.push(r);
            }
        }
        self.open_upvalues = remaining;
    }

    // ---- GC -----------------------------------------------------

    fn maybe_collect(&mut self) {
        if !self.heap.should_collect(self.stress_gc) {
            return;
        }
        let stack = self.stack.clone();
        let closures: Vec<GcRef<ObjClosure>> = self.frames.iter().map(|f| f.closure).collect();
        let open_upvalues = self.open_upvalues.clone();
        let init_string = self.init_string;
        let globals = std::mem::take(&mut self.globals);
        self.heap.collect_garbage(|heap, gray| {
            for &v in &stack {
                heap.mark_value(v, gray);
            }
            for &c in &closures {
                heap.mark_object(c.erase(), gray);
            }
            for &u in &open_upvalues {
                heap.mark_object(u.erase(), gray);
            }
            heap.mark_object(init_string.erase(), gray);
            for (k, v) in globals.iter() {
                heap.mark_object(k.erase(), gray);
                heap.mark_value(v, gray);
            }
        });
        self.globals = globals;
    }

    // ---- main loop -----------------------------------------------------

    fn run(&mut self) -> Result<(), String> {
        loop {
            if self.trace_execution {
                self.trace_current_instruction();
            }

            let frame_idx = self.frames.len() - 1;
            let byte = self.read_byte(frame_idx);
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(b) => return Err(self.runtime_error(RuntimeError::UnknownOpcode(b))),
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant(frame_idx);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte(frame_idx) as usize;
                    let base = self.frames[frame_idx].slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte(frame_idx) as usize;
                    let base = self.frames[frame_idx].slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant(frame_idx);
                    let hash = self.heap.string(name).hash;
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let n = self.heap.string(name).as_str().into_owned();
                            return Err(self.runtime_error(RuntimeError::UndefinedVariable(n)));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string_constant(frame_idx);
                    let hash = self.heap.string(name).hash;
                    let value = self.pop();
                    self.globals.set(name, hash, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant(frame_idx);
                    let hash = self.heap.string(name).hash;
                    if self.globals.set(name, hash, self.peek(0)) {
                        self.globals.delete(name, hash);
                        let n = self.heap.string(name).as_str().into_owned();
                        return Err(self.runtime_error(RuntimeError::UndefinedVariable(n)));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte(frame_idx) as usize;
                    let closure = self.frames[frame_idx].closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = match self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(stack_slot) => self.stack[*stack_slot],
                        ObjUpvalue::Closed(v) => *v,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte(frame_idx) as usize;
                    let closure = self.frames[frame_idx].closure;
                    let upvalue = self.heap.closure(closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalue_mut(upvalue) {
                        ObjUpvalue::Open(stack_slot) => self.stack[*stack_slot] = value,
                        ObjUpvalue::Closed(slot_value) => *slot_value = value,
                    }
                }
                OpCode::GetProperty => {
                    let Value::Obj(r) = self.peek(0) else {
                        return Err(self.runtime_error(RuntimeError::NotAnInstanceForGet));
                    };
                    if !matches!(self.heap.obj(r), Obj::Instance(_)) {
                        return Err(self.runtime_error(RuntimeError::NotAnInstanceForGet));
                    }
                    let instance: GcRef<ObjInstance> = r.cast();
                    let name = self.read_string_constant(frame_idx);
                    let hash = self.heap.string(name).hash;
                    let field = self.heap.instance(instance).fields.get(name, hash);
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name).map_err(|e| self.runtime_error(e))?;
                    }
                }
                OpCode::SetProperty => {
                    let Value::Obj(r) = self.peek(1) else {
                        return Err(self.runtime_error(RuntimeError::NotAnInstanceForSet));
                    };
                    if !matches!(self.heap.obj(r), Obj::Instance(_)) {
                        return Err(self.runtime_error(RuntimeError::NotAnInstanceForSet));
                    }
                    let instance: GcRef<ObjInstance> = r.cast();
                    let name = self.read_string_constant(frame_idx);
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number_op(frame_idx, |a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number_op(frame_idx, |a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add(frame_idx)?,
                OpCode::Subtract => self.binary_number_op(frame_idx, |a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number_op(frame_idx, |a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number_op(frame_idx, |a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => {
                    let Value::Number(n) = self.peek(0) else {
                        return Err(self.runtime_error(RuntimeError::OperandMustBeNumber));
                    };
                    self.pop();
                    self.push(Value::Number(-n));
                }
                OpCode::Print => {
                    let value = self.pop();
                    let formatted = self.heap.format_value(value);
                    let mut out = self.output.lock().expect("output writer poisoned");
                    writeln!(out, "{formatted}").expect("write to output sink failed");
                }
                OpCode::Jump => {
                    let offset = self.read_u16(frame_idx);
                    self.frames[frame_idx].ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16(frame_idx);
                    if self.peek(0).is_falsey() {
                        self.frames[frame_idx].ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16(frame_idx);
                    self.frames[frame_idx].ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte(frame_idx);
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc).map_err(|e| self.runtime_error(e))?;
                }
                OpCode::Closure => {
                    let value = self.read_constant(frame_idx);
                    let Value::Obj(r) = value else { unreachable!("closure constant must be a function") };
                    let function: GcRef<ObjFunction> = r.cast();
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte(frame_idx) != 0;
                        let index = self.read_byte(frame_idx) as usize;
                        if is_local {
                            let base = self.frames[frame_idx].slot_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            let enclosing = self.frames[frame_idx].closure;
                            upvalues.push(self.heap.closure(enclosing).upvalues[index]);
                        }
                    }
                    let closure = self.heap.alloc_closure(ObjClosure { function, upvalues });
                    self.push(Value::Obj(closure.erase()));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return with no active frame");
                    self.close_upvalues(frame.slot_base);
                    if self.frames.is_empty() {
                        self.pop(); // the top-level closure itself
                        return Ok(());
                    }
                    self.stack.truncate(frame.slot_base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string_constant(frame_idx);
                    let class = self.heap.alloc_class(ObjClass::new(name));
                    self.push(Value::Obj(class.erase()));
                }
                OpCode::Method => {
                    let name = self.read_string_constant(frame_idx);
                    self.define_method(name);
                }
            }

            self.maybe_collect();
        }
    }

    fn add(&mut self, frame_idx: usize) -> Result<(), String> {
        match (self.peek(0), self.peek(1)) {
            (Value::Number(_), Value::Number(_)) => self.binary_number_op(frame_idx, |a, b| Value::Number(a + b)),
            (Value::Obj(a), Value::Obj(b))
                if matches!(self.heap.obj(a), Obj::String(_)) && matches!(self.heap.obj(b), Obj::String(_)) =>
            {
                let b = self.pop();
                let a = self.pop();
                let (Value::Obj(a), Value::Obj(b)) = (a, b) else { unreachable!() };
                let mut bytes = self.heap.string(a.cast()).bytes.to_vec();
                bytes.extend_from_slice(&self.heap.string(b.cast()).bytes);
                let r = self.heap.intern(bytes);
                self.push(Value::Obj(r.erase()));
                Ok(())
            }
            _ => Err(self.runtime_error(RuntimeError::OperandsMustBeNumbersOrStrings)),
        }
    }

    fn binary_number_op(&mut self, _frame_idx: usize, op: impl FnOnce(f64, f64) -> Value) -> Result<(), String> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(self.runtime_error(RuntimeError::OperandsMustBeNumbers));
        };
        self.pop();
        self.pop();
        self.push(op(a, b));
        Ok(())
    }

    // ---- instruction decoding -----------------------------------------------------

    fn read_byte(&mut self, frame_idx: usize) -> u8 {
        let frame = &mut self.frames[frame_idx];
        let closure = self.heap.closure(frame.closure);
        let function = self.heap.function(closure.function);
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self, frame_idx: usize) -> u16 {
        let hi = self.read_byte(frame_idx) as u16;
        let lo = self.read_byte(frame_idx) as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self, frame_idx: usize) -> Value {
        let idx = self.read_byte(frame_idx) as usize;
        let frame = &self.frames[frame_idx];
        let closure = self.heap.closure(frame.closure);
        self.heap.function(closure.function).chunk.constants[idx]
    }

    fn read_string_constant(&mut self, frame_idx: usize) -> GcRef<ObjString> {
        let Value::Obj(r) = self.read_constant(frame_idx) else {
            unreachable!("string constant must be an object")
        };
        r.cast()
    }

    fn trace_current_instruction(&self) {
        let Some(frame) = self.frames.last() else { return };
        let closure = self.heap.closure(frame.closure);
        let function = self.heap.function(closure.function);
        let (line, _) = disasm::disassemble_instruction(&function.chunk, frame.ip, &self.heap);
        eprintln!("          {line}");
    }

    /// Dumps disassembled bytecode for `source` without executing it (used by
    /// embedders and by this crate's own disassembler tests).
    pub fn disassemble(&mut self, source: &str) -> Result<String, Vec<CompileError>> {
        let function =
            compiler::compile(source, &mut self.heap, &self.globals, self.init_string, self.stress_gc)?;
        Ok(disasm::disassemble_chunk(&self.heap.function(function).chunk, "script", &self.heap))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Vm {
        let mut vm = Vm::new();
        vm.interpret(source).expect("script should run");
        vm
    }

    fn global(vm: &mut Vm, name: &str) -> Option<Value> {
        vm.global(name)
    }

    #[test]
    fn arithmetic_precedence() {
        let mut vm = run("var x = 1 + 2 * 3;");
        assert_eq!(global(&mut vm, "x"), Some(Value::Number(7.0)));
    }

    #[test]
    fn string_concatenation_interns_result() {
        let mut vm = run(r#"var s = "foo" + "bar";"#);
        let expected = vm.heap.intern(b"foobar".to_vec());
        let Some(Value::Obj(r)) = global(&mut vm, "s") else { panic!("expected string") };
        assert!(r.cast::<ObjString>().same_slot(expected));
    }

    #[test]
    fn undefined_global_is_runtime_error() {
        let mut vm = Vm::new();
        let err = vm.interpret("print nope;").unwrap_err();
        match err {
            InterpretError::Runtime(message) => assert!(message.contains("Undefined variable 'nope'")),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn recursive_fibonacci() {
        let mut vm = run(
            r#"
            fun fib(n) {
                if (n < 2) return n;
                return fib(n - 1) + fib(n - 2);
            }
            var result = fib(10);
            "#,
        );
        assert_eq!(global(&mut vm, "result"), Some(Value::Number(55.0)));
    }

    #[test]
    fn open_upvalues_stay_sorted_by_descending_stack_slot() {
        // Captured out of order; the list must end up sorted by strictly
        // decreasing `location` regardless of insertion order (spec invariant 3).
        let mut vm = Vm::new();
        vm.capture_upvalue(3);
        vm.capture_upvalue(7);
        vm.capture_upvalue(1);
        vm.capture_upvalue(5);
        let slots: Vec<usize> = vm
            .open_upvalues
            .iter()
            .map(|&r| match vm.heap.upvalue(r) {
                ObjUpvalue::Open(slot) => *slot,
                ObjUpvalue::Closed(_) => unreachable!(),
            })
            .collect();
        assert_eq!(slots, vec![7, 5, 3, 1]);
    }

    #[test]
    fn native_error_surfaces_as_runtime_error() {
        let mut vm = Vm::new();
        let err = vm.interpret("__always_errors();").unwrap_err();
        match err {
            InterpretError::Runtime(message) => assert!(message.contains("synthetic native failure")),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }
}
