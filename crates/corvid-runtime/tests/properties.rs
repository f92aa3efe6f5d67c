//! Property-based checks for the algebraic invariants spec §8 calls out
//! ("Round-trip / algebraic"): double negation, equality/inequality
//! consistency, and string-concat associativity — checked over randomly
//! generated numbers, booleans, and strings rather than a handful of
//! hand-picked cases.

use corvid_runtime::{Value, Vm};
use proptest::prelude::*;

fn run_and_get(source: &str, name: &str) -> Value {
    let mut vm = Vm::new();
    vm.interpret(source).unwrap_or_else(|e| panic!("generated program should run: {e:?}\n{source}"));
    vm.global(name).expect("global should be defined")
}

proptest! {
    /// Numbers are always truthy (only `nil`/`false` are falsey), so
    /// `NOT NOT v` collapses to `BOOL(!falsey(v))` = `BOOL(true)` for any
    /// number `v`, regardless of its value.
    #[test]
    fn double_negation_of_any_number_is_true(n in -1.0e9f64..1.0e9f64) {
        let source = format!("var v = !!({n});");
        let result = run_and_get(&source, "v");
        prop_assert_eq!(result, Value::Bool(true));
    }

    /// For booleans, `falsey(b) == !b`, so `NOT NOT b` is the identity.
    #[test]
    fn double_negation_of_a_bool_is_identity(b in any::<bool>()) {
        let source = format!("var v = !!({b});");
        let result = run_and_get(&source, "v");
        prop_assert_eq!(result, Value::Bool(b));
    }

    /// `a == b ⇒ !(a != b)` for numbers.
    #[test]
    fn equal_numbers_are_never_reported_unequal(n in -1.0e9f64..1.0e9f64) {
        let source = format!("var eq = ({n} == {n}); var neq = ({n} != {n}); var v = eq == !neq;");
        let result = run_and_get(&source, "v");
        prop_assert_eq!(result, Value::Bool(true));
    }

    /// String concatenation is associative and the interner makes both
    /// groupings produce the identical `abc`-shaped heap string, so `==`
    /// (reference identity for interned strings) reports them equal.
    #[test]
    fn string_concatenation_is_associative(
        a in "[a-zA-Z]{0,6}", b in "[a-zA-Z]{0,6}", c in "[a-zA-Z]{0,6}"
    ) {
        let source = format!(
            "var left = (\"{a}\" + \"{b}\") + \"{c}\"; \
             var right = \"{a}\" + (\"{b}\" + \"{c}\"); \
             var same = left == right;"
        );
        let result = run_and_get(&source, "same");
        prop_assert_eq!(result, Value::Bool(true));
    }
}
