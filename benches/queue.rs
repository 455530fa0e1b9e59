use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use turnbuf::{Bounded, Dynamic, DynamicOptions};

fn uncontended_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended_round_trip");
    for capacity in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(
            BenchmarkId::new("bounded", capacity),
            &capacity,
            |b, &capacity| {
                let queue = Bounded::new(capacity);
                b.iter(|| {
                    for value in 0..capacity {
                        queue.try_push(value).unwrap();
                    }
                    for _ in 0..capacity {
                        criterion::black_box(queue.try_pop().unwrap());
                    }
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("dynamic", capacity),
            &capacity,
            |b, &capacity| {
                let queue = Dynamic::with_options(
                    capacity,
                    DynamicOptions {
                        max_capacity: capacity,
                        growth_factor: 2,
                    },
                );
                b.iter(|| {
                    for value in 0..capacity {
                        queue.try_push(value).unwrap();
                    }
                    for _ in 0..capacity {
                        criterion::black_box(queue.try_pop().unwrap());
                    }
                });
            },
        );
    }
    group.finish();
}

fn contended_throughput(c: &mut Criterion) {
    const PER_PRODUCER: usize = 4096;

    let mut group = c.benchmark_group("contended_throughput");
    for producers in [1usize, 2, 4] {
        group.throughput(Throughput::Elements((producers * PER_PRODUCER) as u64));
        group.bench_with_input(
            BenchmarkId::new("bounded", producers),
            &producers,
            |b, &producers| {
                b.iter(|| {
                    let queue = Arc::new(Bounded::new(1024));
                    let handles: Vec<_> = (0..producers)
                        .map(|producer| {
                            let queue = queue.clone();
                            std::thread::spawn(move || {
                                for sequence in 0..PER_PRODUCER {
                                    let mut item = producer * PER_PRODUCER + sequence;
                                    loop {
                                        match queue.try_push(item) {
                                            Ok(()) => break,
                                            Err(full) => {
                                                item = full.into_inner();
                                                std::hint::spin_loop();
                                            }
                                        }
                                    }
                                }
                            })
                        })
                        .collect();

                    let mut received = 0;
                    while received < producers * PER_PRODUCER {
                        if queue.try_pop().is_ok() {
                            received += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, uncontended_round_trip, contended_throughput);
criterion_main!(benches);
