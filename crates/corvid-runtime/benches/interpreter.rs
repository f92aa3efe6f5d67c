//! Benchmarks the call/return path with a recursive fib(25): mostly calls,
//! comparisons, and arithmetic, exercising frame push/pop without touching
//! the heap much beyond the closures themselves.

use corvid_runtime::Vm;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const SOURCE: &str = r#"
fun fib(n) {
    if (n < 2) return n;
    return fib(n - 1) + fib(n - 2);
}
var result = fib(25);
"#;

fn fib_benchmark(c: &mut Criterion) {
    c.bench_function("fib_25", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(SOURCE)).expect("benchmark script must run cleanly");
        });
    });
}

criterion_group!(benches, fib_benchmark);
criterion_main!(benches);
