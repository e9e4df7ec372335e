//! Dispatch overhead of contexts and pools
//!
//! Run with: cargo bench -p tether-runtime

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{Criterion, criterion_group, criterion_main};
use tether_runtime::{Context, Pool};

fn bench_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("context");
    let cx = Context::new().expect("context");
    cx.define_function("add", |a: i64, b: i64| a + b)
        .expect("define add");

    group.bench_function("eval_int", |b| {
        b.iter(|| black_box(cx.eval::<i64>("20 + 22").expect("eval")));
    });

    group.bench_function("host_call", |b| {
        b.iter(|| black_box(cx.eval::<i64>("add(20, 22)").expect("eval")));
    });

    group.bench_function("exec_loop", |b| {
        b.iter(|| {
            cx.exec("for (let i = 0, s = 0; i < 1000; i++) { s += i; }")
                .expect("exec")
        });
    });

    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");
    let pool = Arc::new(Pool::new(4).expect("pool"));
    pool.define_function("add", |a: i64, b: i64| a + b)
        .expect("define add");

    group.bench_function("eval_single_caller", |b| {
        b.iter(|| black_box(pool.eval::<i64>("add(20, 22)").expect("eval")));
    });

    group.bench_function("eval_4_callers_x_100", |b| {
        b.iter(|| {
            let callers: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            black_box(pool.eval::<i64>("add(20, 22)").expect("eval"));
                        }
                    })
                })
                .collect();
            for caller in callers {
                caller.join().expect("caller thread failed");
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_context, bench_pool);
criterion_main!(benches);
