use criterion::{black_box, criterion_group, criterion_main, Criterion};
use derkjs::vm::DispatchPolicy;
use derkjs::{Driver, DriverInfo};

fn run(code: &str, policy: DispatchPolicy) {
    let mut driver = Driver::with_defaults(DriverInfo::default()).unwrap();
    driver.set_dispatch(policy);
    driver.set_console_sink(Box::new(std::io::sink()));
    black_box(driver.run_source("bench.js", code).unwrap());
}

fn bench_fib(c: &mut Criterion) {
    // Iterative fibonacci keeps frame depth flat for both cores.
    let code = r#"
        function fib(n) {
            if (n <= 1) { return n; }
            var a = 0;
            var b = 1;
            var i = 2;
            while (i <= n) {
                var t = a + b;
                a = b;
                b = t;
                i += 1;
            }
            return b;
        }
        var sum = 0;
        var k = 0;
        while (k < 100) {
            sum += fib(30);
            k += 1;
        }
    "#;

    c.bench_function("fib_iter loop-switch", |b| {
        b.iter(|| run(code, DispatchPolicy::LoopSwitch))
    });
    c.bench_function("fib_iter tail", |b| b.iter(|| run(code, DispatchPolicy::Tail)));
}

fn bench_tail_recursion(c: &mut Criterion) {
    let code = r#"
        function count(n) {
            if (n === 0) { return 0; }
            return count(n - 1);
        }
        count(50000);
    "#;

    c.bench_function("tail recursion 50k", |b| {
        b.iter(|| run(code, DispatchPolicy::Tail))
    });
}

fn bench_array_push(c: &mut Criterion) {
    let code = r#"
        var arr = [];
        var i = 0;
        while (i < 10000) {
            arr.push(i);
            i += 1;
        }
    "#;

    c.bench_function("array push 10k", |b| {
        b.iter(|| run(code, DispatchPolicy::Tail))
    });
}

criterion_group!(benches, bench_fib, bench_tail_recursion, bench_array_push);
criterion_main!(benches);
