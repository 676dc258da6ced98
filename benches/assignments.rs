use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use eppo_client::{AttributeValue, Client, ClientConfig, Configuration};

fn configuration() -> Configuration {
    let flags = json!({
        "createdAt": "2024-07-18T00:00:00Z",
        "environment": {"name": "Bench"},
        "flags": {
            "rollout": {
                "key": "rollout",
                "enabled": true,
                "variationType": "BOOLEAN",
                "variations": {"on": {"key": "on", "value": true}},
                "allocations": [{
                    "key": "us-half",
                    "rules": [{"conditions": [
                        {"attribute": "country", "operator": "ONE_OF", "value": ["US"]}
                    ]}],
                    "splits": [{
                        "variationKey": "on",
                        "shards": [{"salt": "rollout", "ranges": [{"start": 0, "end": 5000}]}]
                    }],
                    "doLog": true
                }],
                "totalShards": 10000
            }
        }
    });
    Configuration::from_json(flags.to_string().as_bytes(), None)
        .expect("benchmark configuration should parse")
}

fn criterion_benchmark(c: &mut Criterion) {
    let client = Client::new();
    client
        .init(
            ClientConfig::from_api_key("bench")
                .enable_polling(false)
                .initial_configuration(configuration()),
        )
        .expect("benchmark config should be valid");

    let mut group = c.benchmark_group("rollout");
    group.throughput(Throughput::Elements(1));
    let attributes = HashMap::from([("country".to_owned(), AttributeValue::from("US"))]);
    group.bench_function("get_boolean_assignment", |b| {
        b.iter(|| {
            client.get_boolean_assignment(
                black_box("rollout"),
                black_box("subject1"),
                black_box(&attributes),
                false,
            )
        })
    });
    group.bench_function("get_boolean_assignment_details", |b| {
        b.iter(|| {
            client.get_boolean_assignment_details(
                black_box("rollout"),
                black_box("subject1"),
                black_box(&attributes),
                false,
            )
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
