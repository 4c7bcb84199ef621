//! End-to-end request flow through a running gateway.

mod common;

use common::*;
use gateway_dispatch::meta::{Bind, IpAccessControl, Routing, Status};
use gateway_dispatch::store::{Event, EventSource, EventType, EventValue};

#[tokio::test]
async fn test_request_forwarded_to_backend() {
    let backend = start_backend("alpha").await;
    let store = store_with(&[backend]);
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&["prepare", "header", "x-forward"]), store).await;
    let response = reqwest::Client::new()
        .post(gw.url("/orders?page=2"))
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-backend"], "alpha");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "alpha POST /orders?page=2 payload");
    gw.stop().await;
}

#[tokio::test]
async fn test_url_rewrite_with_path_param() {
    let backend = start_backend("alpha").await;
    let store = store_with(&[backend]);
    let mut users = api(1, "/users/{id}", 1);
    users.nodes[0].url_rewrite = Some("/v2/accounts/$(param.id)".into());
    store.put_api(users).unwrap();

    let gw = TestGateway::start(config(&[]), store).await;
    let body = reqwest::get(gw.url("/users/42")).await.unwrap().text().await.unwrap();

    assert_eq!(body, "alpha GET /v2/accounts/42 ");
    gw.stop().await;
}

#[tokio::test]
async fn test_unmatched_request_is_404() {
    let backend = start_backend("alpha").await;
    let store = store_with(&[backend]);
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&[]), store).await;
    let response = reqwest::get(gw.url("/nothing/here")).await.unwrap();

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], 404);
    gw.stop().await;
}

#[tokio::test]
async fn test_cluster_without_active_server_is_503() {
    let backend = start_backend("alpha").await;
    let store = store_with(&[backend]);
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&[]), store).await;
    gw.apply(Event::status_changed(11, Status::Down)).await;

    let response = reqwest::get(gw.url("/orders")).await.unwrap();
    assert_eq!(response.status(), 503);
    gw.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_is_502() {
    let dead = closed_addr().await;
    let store = store_with(&[dead]);
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&["analysis"]), store).await;
    let response = reqwest::get(gw.url("/orders")).await.unwrap();

    assert_eq!(response.status(), 502);
    gw.stop().await;
}

#[tokio::test]
async fn test_backend_error_passes_through() {
    let backend = start_status_backend(500).await;
    let store = store_with(&[backend]);
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&["analysis"]), store).await;
    let response = reqwest::get(gw.url("/orders")).await.unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "backend says no");
    gw.stop().await;
}

#[tokio::test]
async fn test_blacklisted_client_is_rejected() {
    let backend = start_backend("alpha").await;
    let store = store_with(&[backend]);
    let mut orders = api(1, "/orders", 1);
    orders.ip_access = Some(IpAccessControl {
        whitelist: Vec::new(),
        blacklist: vec!["127.0.0.*".into()],
    });
    store.put_api(orders).unwrap();

    let gw = TestGateway::start(config(&["black-list"]), store).await;
    let response = reqwest::get(gw.url("/orders")).await.unwrap();

    assert_eq!(response.status(), 403);
    gw.stop().await;
}

#[tokio::test]
async fn test_status_flap_moves_traffic() {
    let alpha = start_backend("alpha").await;
    let beta = start_backend("beta").await;
    let store = store_with(&[alpha]);
    store.put_server(server(12, beta)).unwrap();
    store.put_bind(Bind {
        cluster_id: 1,
        server_id: 12,
    });
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&[]), store).await;
    gw.apply(Event::status_changed(11, Status::Down)).await;

    let client = reqwest::Client::new();
    for _ in 0..4 {
        let response = client.get(gw.url("/orders")).send().await.unwrap();
        assert_eq!(response.headers()["x-backend"], "beta");
    }

    gw.apply(Event::status_changed(11, Status::Up)).await;
    let mut seen = Vec::new();
    for _ in 0..4 {
        let response = client.get(gw.url("/orders")).send().await.unwrap();
        seen.push(response.headers()["x-backend"].to_str().unwrap().to_string());
    }
    assert!(seen.iter().any(|b| b == "alpha"));
    assert!(seen.iter().any(|b| b == "beta"));
    gw.stop().await;
}

#[tokio::test]
async fn test_routing_diverts_all_traffic() {
    let alpha = start_backend("alpha").await;
    let beta = start_backend("beta").await;
    let store = store_with(&[alpha, beta]);
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&[]), store).await;
    gw.apply(Event::new(
        EventSource::Routing,
        EventType::New,
        "5",
        EventValue::Routing(Routing {
            id: 5,
            name: "canary".into(),
            api_id: 1,
            cluster_id: 2,
            traffic_rate: 100,
        }),
    ))
    .await;

    for _ in 0..3 {
        let response = reqwest::get(gw.url("/orders")).await.unwrap();
        assert_eq!(response.headers()["x-backend"], "beta");
    }
    gw.stop().await;
}

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let backend = start_backend("alpha").await;
    let store = store_with(&[backend]);
    let mut slow = server(11, backend);
    slow.max_qps = 2;
    store.put_server(slow).unwrap();
    store.put_api(api(1, "/orders", 1)).unwrap();

    let gw = TestGateway::start(config(&["rate-limiting"]), store).await;
    let client = reqwest::Client::new();
    let mut statuses = Vec::new();
    for _ in 0..6 {
        statuses.push(client.get(gw.url("/orders")).send().await.unwrap().status().as_u16());
    }

    assert_eq!(statuses[0], 200);
    assert!(statuses.contains(&429));
    gw.stop().await;
}
