//! Textual-dump tests for the disassembler. Pinned to exact strings rather
//! than `insta` snapshot fixtures: this workspace is built without running
//! the toolchain, so there is no way to generate `.snap` goldens ahead of
//! time, and a missing/mismatched fixture would fail on first run
//! regardless of whether the disassembler itself is correct. The
//! disassembler's output isn't a public contract — these assertions exist
//! to catch accidental format drift in the opcodes under test, not to pin
//! the format down forever.

use corvid_runtime::Vm;
use pretty_assertions::assert_eq;

#[test]
fn disassembles_arithmetic_expression() {
    let mut vm = Vm::new();
    let dump = vm.disassemble("print 1 + 2 * 3;").expect("script should compile");
    assert_eq!(
        dump,
        "\
== script ==
0000    1 Constant 0 '1'
0002    | Constant 1 '2'
0004    | Constant 2 '3'
0006    | Multiply
0007    | Add
0008    | Print
0009    | Nil
0010    | Return
"
    );
}

#[test]
fn disassembles_if_else() {
    let mut vm = Vm::new();
    let dump =
        vm.disassemble("if (true) { print 1; } else { print 2; }").expect("script should compile");
    assert_eq!(
        dump,
        "\
== script ==
0000    1 True
0001    | JumpIfFalse 1 -> 11
0004    | Pop
0005    | Constant 0 '1'
0007    | Print
0008    | Jump 8 -> 15
0011    | Pop
0012    | Constant 1 '2'
0014    | Print
0015    | Nil
0016    | Return
"
    );
}

#[test]
fn disassembles_while_loop() {
    let mut vm = Vm::new();
    let dump =
        vm.disassemble("var i = 0; while (i < 3) { i = i + 1; }").expect("script should compile");
    assert_eq!(
        dump,
        "\
== script ==
0000    1 Constant 1 '0'
0002    | DefineGlobal 0 'i'
0004    | GetGlobal 2 'i'
0006    | Constant 3 '3'
0008    | Less
0009    | JumpIfFalse 9 -> 24
0012    | Pop
0013    | GetGlobal 5 'i'
0015    | Constant 6 '1'
0017    | Add
0018    | SetGlobal 4 'i'
0020    | Pop
0021    | Loop 21 -> 4
0024    | Pop
0025    | Nil
0026    | Return
"
    );
}

#[test]
fn disassembles_closure_upvalues() {
    let mut vm = Vm::new();
    let dump = vm
        .disassemble("fun outer() { var x = 1; fun inner() { return x; } return inner; }")
        .expect("script should compile");
    // The top-level chunk only holds the declaration of `outer` itself — its
    // body (and `inner`'s upvalue-capturing closure) lives in nested chunks
    // this dump doesn't descend into.
    assert_eq!(
        dump,
        "\
== script ==
0000    1 Closure 1 '<fn outer>'
0002    | DefineGlobal 0 'outer'
0004    | Nil
0005    | Return
"
    );
}
