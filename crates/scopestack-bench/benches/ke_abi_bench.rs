//! `ke_*` boundary benchmarks.

use std::ptr;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use scopestack_abi::ke_abi::{ke_free, ke_init, ke_pop_scope, ke_push_elem, ke_push_scope};

unsafe extern "C" fn noop() {}

fn bench_ke_callbacks(c: &mut Criterion) {
    let counts: &[usize] = &[1, 16, 256];
    let mut group = c.benchmark_group("ke_callbacks");
    ke_init();

    for &count in counts {
        group.bench_with_input(BenchmarkId::new("push_pop_scope", count), &count, |b, &n| {
            b.iter(|| {
                ke_push_scope(false);
                for _ in 0..n {
                    // SAFETY: null pointer plus a valid callback.
                    unsafe { ke_push_elem(ptr::null_mut(), Some(noop)) };
                }
                ke_pop_scope();
            });
        });
    }

    group.finish();
    ke_free();
}

fn bench_ke_malloc_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("ke_malloc_release");
    ke_init();

    group.bench_function("64B", |b| {
        b.iter(|| {
            ke_push_scope(false);
            // SAFETY: the block is handed to the stack and freed on pop.
            unsafe { ke_push_elem(libc::malloc(64), None) };
            ke_pop_scope();
        });
    });

    group.finish();
    ke_free();
}

criterion_group!(benches, bench_ke_callbacks, bench_ke_malloc_release);
criterion_main!(benches);
