//! Textual bytecode dumps. Not part of the correctness contract — used by
//! `Vm::disassemble` for embedders/tests and the VM's optional execution trace.

use std::fmt::Write as _;

use super::{Chunk, OpCode};
use crate::gc::Heap;

/// Disassembles every instruction in `chunk`, prefixed by a `=== name ===` header.
pub fn disassemble_chunk(chunk: &Chunk, name: &str, heap: &Heap) -> String {
    let mut out = String::new();
    writeln!(out, "== {name} ==").unwrap();
    let mut offset = 0;
    while offset < chunk.len() {
        let (line, next) = disassemble_instruction(chunk, offset, heap);
        writeln!(out, "{line}").unwrap();
        offset = next;
    }
    out
}

/// Disassembles the single instruction at `offset`. Returns the formatted line
/// and the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> (String, usize) {
    let mut out = format!("{offset:04} ");
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        out.push_str("   | ");
    } else {
        write!(out, "{:4} ", chunk.line_at(offset)).unwrap();
    }

    let byte = chunk.code[offset];
    let op = match OpCode::try_from(byte) {
        Ok(op) => op,
        Err(b) => {
            write!(out, "Unknown opcode {b}").unwrap();
            return (out, offset + 1);
        }
    };

    let next = match op {
        OpCode::Constant | OpCode::GetGlobal | OpCode::DefineGlobal | OpCode::SetGlobal => {
            constant_instruction(&mut out, op, chunk, offset, heap)
        }
        OpCode::GetProperty | OpCode::SetProperty | OpCode::Class | OpCode::Method => {
            constant_instruction(&mut out, op, chunk, offset, heap)
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(&mut out, op, chunk, offset),
        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(&mut out, op, chunk, offset, 1),
        OpCode::Loop => jump_instruction(&mut out, op, chunk, offset, -1),
        OpCode::Closure => closure_instruction(&mut out, chunk, offset, heap),
        _ => simple_instruction(&mut out, op, offset),
    };
    (out, next)
}

fn simple_instruction(out: &mut String, op: OpCode, offset: usize) -> usize {
    write!(out, "{op:?}").unwrap();
    offset + 1
}

fn byte_instruction(out: &mut String, op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    write!(out, "{op:?} {slot}").unwrap();
    offset + 2
}

fn constant_instruction(
    out: &mut String,
    op: OpCode,
    chunk: &Chunk,
    offset: usize,
    heap: &Heap,
) -> usize {
    let idx = chunk.code[offset + 1] as usize;
    let value = chunk.constants.get(idx).copied();
    let rendered = value.map(|v| heap.format_value(v)).unwrap_or_else(|| "?".into());
    write!(out, "{op:?} {idx} '{rendered}'").unwrap();
    offset + 2
}

fn jump_instruction(
    out: &mut String,
    op: OpCode,
    chunk: &Chunk,
    offset: usize,
    sign: i32,
) -> usize {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = ((hi << 8) | lo) as i32;
    let target = offset as i32 + 3 + sign * jump;
    write!(out, "{op:?} {offset} -> {target}").unwrap();
    offset + 3
}

fn closure_instruction(out: &mut String, chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    let idx = chunk.code[offset + 1] as usize;
    let value = chunk.constants.get(idx).copied();
    let rendered = value.map(|v| heap.format_value(v)).unwrap_or_else(|| "?".into());
    write!(out, "Closure {idx} '{rendered}'").unwrap();

    let upvalue_count = match value.and_then(|v| v.as_obj()) {
        Some(r) => match heap.obj(r) {
            crate::object::Obj::Function(f) => f.upvalue_count,
            _ => 0,
        },
        None => 0,
    };

    let mut next = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next];
        let index = chunk.code[next + 1];
        write!(
            out,
            "\n{next:04}      | {} {index}",
            if is_local != 0 { "local" } else { "upvalue" }
        )
        .unwrap();
        next += 2;
    }
    next
}
