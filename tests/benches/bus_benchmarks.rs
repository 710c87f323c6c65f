//! # Ebus Router Benchmarks
//!
//! | Path | Measured |
//! |------|----------|
//! | notify + receive | one unicast frame end to end |
//! | broadcast | fan-out to N-1 mailboxes, then drain |
//! | indicate + respond + receive | full correlated round trip |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ebus::{handler_fn, Bus, BusConfig, Envelope, Node, NodeEvent, Wait};
use std::time::Duration;

fn quiet_node(bus: &Bus, name: &str) -> Node {
    bus.register(name, handler_fn(|_: &Node, _: NodeEvent<'_>| {}))
        .unwrap()
}

fn echo_node(bus: &Bus, name: &str) -> Node {
    bus.register(
        name,
        handler_fn(|node: &Node, event: NodeEvent<'_>| {
            if let NodeEvent::IndicationReceived { message, requester } = event {
                let reply = Envelope::reply_to(message, message.payload()).unwrap();
                node.respond(&requester, reply).unwrap();
            }
        }),
    )
    .unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_unicast(c: &mut Criterion) {
    let mut group = c.benchmark_group("ebus-unicast");
    group.measurement_time(Duration::from_secs(5));

    let rt = runtime();
    let bus = Bus::with_defaults();
    let a = quiet_node(&bus, "A");
    let mut b = quiet_node(&bus, "B");
    let payload = Envelope::new(0x8002, &[1, 2, 3, 4]).unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("notify_receive", |bench| {
        bench.iter(|| {
            a.notify("B", payload).unwrap();
            black_box(rt.block_on(b.receive(Wait::NoWait)).unwrap());
        })
    });

    group.finish();
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("ebus-broadcast");
    group.measurement_time(Duration::from_secs(5));

    let rt = runtime();
    for nodes in [2usize, 4, 8, 16] {
        let bus = Bus::new(BusConfig {
            max_nodes: nodes,
            ..BusConfig::default()
        })
        .unwrap();
        let mut all: Vec<Node> = (0..nodes)
            .map(|i| quiet_node(&bus, &format!("n{i}")))
            .collect();

        group.throughput(Throughput::Elements((nodes - 1) as u64));
        group.bench_with_input(BenchmarkId::new("fan_out", nodes), &nodes, |bench, _| {
            bench.iter(|| {
                all[0].broadcast(Envelope::event(0x8001)).unwrap();
                for node in all.iter_mut().skip(1) {
                    black_box(rt.block_on(node.receive(Wait::NoWait)).unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ebus-indication");
    group.measurement_time(Duration::from_secs(5));

    let rt = runtime();
    let bus = Bus::with_defaults();
    let mut a = quiet_node(&bus, "A");
    let mut b = echo_node(&bus, "B");

    group.bench_function("indicate_respond_receive", |bench| {
        bench.iter(|| {
            a.indicate_async("B", Envelope::event(0x8004)).unwrap();
            rt.block_on(b.receive(Wait::NoWait)).unwrap();
            black_box(rt.block_on(a.receive(Wait::NoWait)).unwrap());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_unicast, bench_broadcast, bench_round_trip);
criterion_main!(benches);
