//! Performance benchmarks for frame encoding and decoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eventlink::protocol::TriggeredEvents;
use eventlink::{ClientFrame, ServerFrame, SharedEvent, SubscriptionDefinition, SubscriptionId};
use serde_json::json;

fn attribute_event(i: usize) -> SharedEvent {
    SharedEvent::new("attribute")
        .with("ref", json!({ "id": format!("asset-{i}"), "name": "temperature" }))
        .with("value", 20.0 + i as f64 / 10.0)
        .with("timestamp", 1_700_000_000_000u64 + i as u64)
}

/// Decode inbound EVENT frames carrying batches of varying size
fn bench_decode_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_events");

    for batch in [1, 10, 100, 1000] {
        let frame = ServerFrame::Event(TriggeredEvents {
            subscription_id: SubscriptionId::from("sub-1"),
            events: (0..batch).map(attribute_event).collect(),
        });
        let text = frame.encode().unwrap();

        group.bench_with_input(BenchmarkId::new("batch", batch), &text, |b, text| {
            b.iter(|| black_box(ServerFrame::decode(text).unwrap()));
        });
    }

    group.finish();
}

/// Encode outbound SUBSCRIBE frames with filters of varying size
fn bench_encode_subscribe(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_subscribe");

    for assets in [1, 50, 500] {
        let ids: Vec<String> = (0..assets).map(|i| format!("asset-{i}")).collect();
        let mut definition = SubscriptionDefinition::filtered(
            "asset",
            json!({ "filterType": "asset", "assetIds": ids }),
        );
        definition.subscription_id = Some(SubscriptionId::from("sub-1"));
        let frame = ClientFrame::Subscribe(definition);

        group.bench_with_input(BenchmarkId::new("asset_ids", assets), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_encode_renew(c: &mut Criterion) {
    let ids: Vec<SubscriptionId> = (0..200).map(|i| SubscriptionId(format!("sub-{i}"))).collect();
    let frame = ClientFrame::Renew(ids);

    c.bench_function("encode_renew_200", |b| {
        b.iter(|| black_box(frame.encode().unwrap()));
    });
}

fn bench_decode_subscribed(c: &mut Criterion) {
    let text = r#"SUBSCRIBED:{"eventType":"attribute","filter":{"filterType":"asset","assetIds":["a1"],"attributeNames":["temperature"]},"subscriptionId":"sub-1"}"#;

    c.bench_function("decode_subscribed", |b| {
        b.iter(|| black_box(ServerFrame::decode(text).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_decode_events,
    bench_encode_subscribe,
    bench_encode_renew,
    bench_decode_subscribed,
);
criterion_main!(benches);
