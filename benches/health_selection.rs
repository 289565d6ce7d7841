use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard::config::BackendConfig;
use switchboard::core::{Backend, Connector, SessionRegistry};
use switchboard::health::{HealthPolicy, NodeHealthSnapshot, WsrepLocalState};
use switchboard::monitor::{choose_active, choose_inactive};

fn create_backends(count: usize) -> Vec<Arc<Backend>> {
    let configs: Vec<BackendConfig> = (0..count)
        .map(|i| BackendConfig {
            name: format!("mysql-{}", i),
            host: format!("10.0.{}.{}", i / 250, i % 250 + 1),
            port: 3306,
            status_port: 9200,
            status_endpoint: "api/v1/status".to_string(),
        })
        .collect();
    Backend::from_configs(&configs, &Connector::default())
}

/// Health predicate over a mix of node states
fn bench_health_predicate(c: &mut Criterion) {
    let states = [
        WsrepLocalState::Joining,
        WsrepLocalState::DonorDesynced,
        WsrepLocalState::Joined,
        WsrepLocalState::Synced,
        WsrepLocalState::Unrecognized(9),
    ];
    let snapshots: Vec<NodeHealthSnapshot> = states
        .iter()
        .flat_map(|state| {
            [false, true].into_iter().map(move |read_only| NodeHealthSnapshot {
                local_index: 0,
                local_state: *state,
                read_only,
                maintenance_enabled: false,
            })
        })
        .collect();
    let policy = HealthPolicy::new(true, false);

    c.bench_function("is_healthy", |b| {
        b.iter(|| {
            let healthy = snapshots.iter().filter(|s| policy.evaluate(black_box(s))).count();
            black_box(healthy);
        })
    });
}

/// Selection over clusters where only the last two nodes are healthy
fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");

    for backend_count in [3, 9, 99].iter() {
        let backends = create_backends(*backend_count);
        let mut healthy = vec![false; *backend_count];
        healthy[*backend_count - 1] = true;
        healthy[*backend_count - 2] = true;
        let primary = Some(Arc::clone(&backends[*backend_count - 2]));

        group.bench_with_input(
            BenchmarkId::new("choose_active", backend_count),
            backend_count,
            |b, _| b.iter(|| black_box(choose_active(&backends, black_box(&healthy)))),
        );

        group.bench_with_input(
            BenchmarkId::new("choose_inactive", backend_count),
            backend_count,
            |b, _| b.iter(|| black_box(choose_inactive(&backends, black_box(&healthy), &primary))),
        );
    }

    group.finish();
}

/// Session registration and severing, the work done per accept and per failover
fn bench_sessions(c: &mut Criterion) {
    let mut group = c.benchmark_group("sessions");
    let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();

    for session_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("open_and_sever", session_count),
            session_count,
            |b, &session_count| {
                b.iter(|| {
                    let registry = SessionRegistry::new();
                    let sessions: Vec<_> =
                        (0..session_count).map(|_| registry.open(client)).collect();
                    let severed = registry.sever_all();
                    black_box(severed.len());
                    drop(sessions);
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_health_predicate, bench_selection, bench_sessions);
criterion_main!(benches);
