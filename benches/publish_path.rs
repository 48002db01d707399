//! Publish Path Benchmarks
//!
//! Cost of the reliability shell on the in-memory driver, with and without
//! subscribers and with every gate enabled.

use courier::reliability::RateLimitStrategy;
use courier::{PubSubConfig, PubSubService, PublishOptions, SubscribeOptions, handler_fn};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    // Subscription queues drain on worker threads while the bench publishes
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn connected(rt: &tokio::runtime::Runtime, config: PubSubConfig) -> PubSubService {
    let service = PubSubService::new(config).unwrap();
    rt.block_on(service.connect()).unwrap();
    service
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(3));
    group.warm_up_time(Duration::from_secs(1));
    group.throughput(Throughput::Elements(1));

    let rt = runtime();
    let payload = json!({"id": "u1", "email": "user@example.com", "plan": "pro"});

    let bare = connected(&rt, PubSubConfig::default());
    group.bench_function("no_subscribers", |b| {
        b.to_async(&rt).iter(|| async {
            std::hint::black_box(
                bare.publish("user.created", payload.clone(), PublishOptions::default())
                    .await
                    .unwrap(),
            )
        })
    });

    let fanout = connected(&rt, PubSubConfig::default());
    rt.block_on(async {
        for _ in 0..4 {
            fanout
                .subscribe(
                    "user.created",
                    handler_fn(|_msg| async { Ok(()) }),
                    SubscribeOptions::default(),
                )
                .await
                .unwrap();
        }
    });
    group.bench_function("four_handlers", |b| {
        b.to_async(&rt).iter(|| async {
            std::hint::black_box(
                fanout
                    .publish("user.created", payload.clone(), PublishOptions::default())
                    .await
                    .unwrap(),
            )
        })
    });

    let mut gated_config = PubSubConfig::default();
    gated_config.namespace = Some("bench".into());
    gated_config.max_message_size = Some(64 * 1024);
    gated_config.rate_limiter.enabled = true;
    gated_config.rate_limiter.max_requests_per_window = u32::MAX;
    gated_config.rate_limiter.strategy = RateLimitStrategy::TokenBucket;
    gated_config.backpressure.enabled = true;
    gated_config.log_sampling_rate = 0.01;
    let gated = connected(&rt, gated_config);
    group.bench_function("all_gates", |b| {
        b.to_async(&rt).iter(|| async {
            std::hint::black_box(
                gated
                    .publish("user.created", payload.clone(), PublishOptions::default())
                    .await
                    .unwrap(),
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_publish);
criterion_main!(benches);
