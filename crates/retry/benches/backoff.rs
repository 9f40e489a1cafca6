use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use colorforge_retry::RetryConfig;

fn backoff_delay(c: &mut Criterion) {
    let config = RetryConfig::default()
        .with_base_delay(Duration::from_millis(1000))
        .with_max_delay(Duration::from_secs(60));

    c.bench_function("delay_for_attempt", |b| {
        b.iter(|| {
            for attempt in 0..10u32 {
                black_box(config.delay_for_attempt(black_box(attempt)));
            }
        })
    });
}

criterion_group!(benches, backoff_delay);
criterion_main!(benches);
