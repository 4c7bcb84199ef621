//! Readers never observe a half-applied event while the consumer churns.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use axum::http::HeaderMap;
use common::{api, cluster, engine};
use gateway_dispatch::meta::{Bind, Server, Status};
use gateway_dispatch::routing::{DispatchRequest, Dispatcher, EventConsumer, RoutingTable};
use gateway_dispatch::store::{Event, EventSource, EventType, EventValue, StoreSnapshot};

fn server(id: u64) -> Server {
    Server {
        id,
        addr: format!("127.0.0.1:{}", 9000 + id),
        max_qps: 100,
        weight: 1,
        status: Status::Up,
        health_check: None,
        circuit_breaker: None,
    }
}

#[test]
fn test_snapshots_stay_consistent_under_churn() {
    let table = Arc::new(RoutingTable::new());
    let mut consumer = EventConsumer::new(table.clone(), engine());
    consumer.load(StoreSnapshot {
        clusters: vec![cluster(1)],
        servers: (1..=4).map(server).collect(),
        binds: (1..=4)
            .map(|id| Bind {
                cluster_id: 1,
                server_id: id,
            })
            .collect(),
        apis: vec![api(1, "/orders/{id}", 1)],
        ..Default::default()
    });

    let stop = Arc::new(AtomicBool::new(false));
    let dispatched = Arc::new(AtomicUsize::new(0));
    let dispatcher = Arc::new(Dispatcher::new());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let table = table.clone();
            let stop = stop.clone();
            let dispatched = dispatched.clone();
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                let headers = HeaderMap::new();
                let req = DispatchRequest {
                    method: "GET",
                    path: "/orders/7",
                    query: None,
                    headers: &headers,
                };
                while !stop.load(Ordering::Relaxed) {
                    let snapshot = table.load();
                    assert!(snapshot.is_consistent());
                    // an empty active list is a legal state mid-churn
                    if let Ok(node) = dispatcher.dispatch(&snapshot, &req) {
                        let actives = snapshot.actives(1).expect("cluster 1 has binds");
                        assert!(actives.ids().any(|id| id == node.server.id));
                        dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for round in 0..2_000u64 {
        let id = round % 4 + 1;
        let status = if round % 3 == 0 { Status::Down } else { Status::Up };
        consumer.apply(Event::status_changed(id, status));

        if round % 50 == 0 {
            let bind = Bind {
                cluster_id: 1,
                server_id: id,
            };
            consumer.apply(Event::delete_bind(bind));
            consumer.apply(Event::new(EventSource::Bind, EventType::New, bind.key(), EventValue::Bind(bind)));
        }
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    let snapshot = table.load();
    assert!(snapshot.is_consistent());
    assert!(dispatched.load(Ordering::Relaxed) > 0);
}
