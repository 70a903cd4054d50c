use std::sync::Arc;
use std::time::Duration;

use globalcat_api::app::services::AppServices;
use globalcat_core::{CatalogConfig, ConsistencyPolicy, ItemKey, ProductId, ReadMode, RegionCode, WarehouseId};
use globalcat_store::RegionalStore;
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let mut config = CatalogConfig::new(
            RegionCode::new("us-east-1").unwrap(),
            RegionCode::new("eu-west-1").unwrap(),
            ConsistencyPolicy::StrongLocal,
        );
        config.replication_lag = Duration::from_millis(50);
        config.heartbeat_interval = Duration::from_secs(60);

        // Same app as prod, bound to an ephemeral port.
        let app = globalcat_api::app::build_app(config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = app.router;
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            services: app.services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Poll `path` until `done` accepts the JSON body.
async fn get_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    path: &str,
    done: impl Fn(StatusCode, &Value) -> bool,
) -> Value {
    // Replication is asynchronous; poll briefly until it catches up.
    for _ in 0..200 {
        let res = client.get(srv.url(path)).send().await.unwrap();
        let status = res.status();
        let body: Value = res.json().await.unwrap_or(Value::Null);
        if done(status, &body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("{path} did not converge within timeout");
}

async fn put_product(client: &reqwest::Client, srv: &TestServer, product_id: &str, region: &str, title: &str) {
    let res = client
        .put(srv.url("/products"))
        .json(&json!({
            "product_id": product_id,
            "region_code": region,
            "title": title,
            "currency": "USD",
            "price": 19.99,
            "attrs": {"color": "blue"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_home_region_with_observability_headers() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let headers = res.headers().clone();
    assert_eq!(headers["x-region"], "us-east-1");
    assert_eq!(headers["x-consistency"], "strong-local");
    let process_ms: f64 = headers["x-server-processms"].to_str().unwrap().parse().unwrap();
    assert!(process_ms >= 0.0);
    let request_id = uuid::Uuid::parse_str(headers["x-request-id"].to_str().unwrap()).unwrap();
    assert_eq!(request_id.get_version_num(), 7);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok", "region": "us-east-1"}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incoming_request_id_is_echoed() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/explain-consistency"))
        .header("X-Request-Id", "trace-abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-abc");

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["policy"], "strong-local");
    assert!(body["how_to_change"].as_str().unwrap().contains("READ_CONSISTENCY"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn home_region_product_write_is_read_back_strongly() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    put_product(&client, &srv, "p-100", "us-east-1", "Mug").await;

    let res = client.get(srv.url("/products/p-100/us-east-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["found"], true);
    assert_eq!(body["consistency"], "strong");
    assert_eq!(body["region"], "us-east-1");
    assert_eq!(body["item"]["PK"], "PRODUCT#p-100");
    assert_eq!(body["item"]["SK"], "REGION#us-east-1");
    assert_eq!(body["item"]["title"], "Mug");
    assert_eq!(body["item"]["attrs"]["color"], "blue");
    assert_eq!(body["item"]["last_writer_region"], "us-east-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_region_product_reads_are_eventual() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    put_product(&client, &srv, "p-200", "eu-west-1", "Teapot").await;

    let body = get_eventually(&client, &srv, "/products/p-200/eu-west-1", |status, _| {
        status == StatusCode::OK
    })
    .await;
    assert_eq!(body["consistency"], "eventual");
    assert_eq!(body["item"]["title"], "Teapot");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_product_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/products/nope/us-east-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.headers()["x-region"], "us-east-1");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_identifiers_are_validation_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/products/p-1/us_east_1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inventory_deltas_merge_across_calls() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/inventory"))
        .json(&json!({"product_id": "p-300", "warehouse_id": "wh-1", "region_code": "us-east-1", "inc": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["merged_qty"], 10);

    let res = client
        .post(srv.url("/inventory"))
        .json(&json!({"product_id": "p-300", "warehouse_id": "wh-1", "region_code": "us-east-1", "dec": 3}))
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["merged_qty"], 7);
    assert_eq!(body["item"]["inc_us_east_1"], 10);
    assert_eq!(body["item"]["dec_us_east_1"], 3);

    let res = client.get(srv.url("/inventory/p-300/wh-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["qty"], 7);
    assert_eq!(body["region"], "us-east-1");

    let res = client
        .post(srv.url("/inventory"))
        .json(&json!({"product_id": "p-300", "warehouse_id": "wh-2", "region_code": "eu-west-1", "inc": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/inventory/p-300")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["product_id"], "p-300");
    assert_eq!(body["total_qty"], 12);
    assert_eq!(
        body["locations"],
        json!([
            {"sk": "INV#wh-1#us-east-1", "qty": 7},
            {"sk": "INV#wh-2#eu-west-1", "qty": 5},
        ])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn negative_delta_is_rejected_without_writing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/inventory"))
        .json(&json!({"product_id": "p-400", "warehouse_id": "wh-1", "region_code": "us-east-1", "inc": -1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_delta");

    let res = client
        .get(srv.url("/inventory/p-400/wh-1?region=us-east-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn product_without_locations_reports_zero() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/inventory/p-empty")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total_qty"], 0);
    assert_eq!(body["locations"], json!([]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observer_materializes_merged_quantity() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/inventory"))
        .json(&json!({"product_id": "p-500", "warehouse_id": "wh-1", "region_code": "us-east-1", "inc": 4, "dec": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let key = ItemKey::merged(
        &ProductId::new("p-500").unwrap(),
        &WarehouseId::new("wh-1").unwrap(),
        &RegionCode::new("us-east-1").unwrap(),
    );
    let store = srv.services.inventory.store();
    for _ in 0..200 {
        if let Some(row) = store.get(&key, ReadMode::Strong).await.unwrap() {
            assert_eq!(row.get("merged_qty"), Some(&json!(3)));
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("merged quantity was never materialized");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulated_conflict_converges_to_the_later_writer() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/simulate-conflict?product_id=p-600&region_code=us-east-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["written_local"]["title"], "LOCAL_TITLE");
    assert_eq!(body["written_local"]["last_writer_region"], "us-east-1");
    assert_eq!(body["written_remote"]["title"], "REMOTE_TITLE");
    assert_eq!(body["written_remote"]["last_writer_region"], "eu-west-1");
    assert_eq!(body["note"], "Read back after ~1-2s to see winner.");

    let body = get_eventually(&client, &srv, "/explain-merge/p-600/us-east-1", |status, body| {
        status == StatusCode::OK && body["winner_region"] == "eu-west-1"
    })
    .await;
    assert_eq!(body["current"]["title"], "REMOTE_TITLE");
    assert_eq!(body["current"]["price"], 101.0);
    assert!(body["explanation"].as_str().unwrap().contains("later update"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn conflict_body_variant_accepts_custom_values() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/simulate-conflict-body"))
        .json(&json!({
            "product_id": "p-700",
            "title_local": "Kettle (US)",
            "price_local": 30.0,
            "title_remote": "Kettle (EU)",
            "price_remote": 28.5,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["written_local"]["SK"], "REGION#us-east-1");
    assert_eq!(body["written_remote"]["price"], 28.5);

    let body = get_eventually(&client, &srv, "/explain-merge/p-700/us-east-1", |status, body| {
        status == StatusCode::OK && body["winner_region"] == "eu-west-1"
    })
    .await;
    assert_eq!(body["current"]["title"], "Kettle (EU)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn explain_merge_on_missing_product_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/explain-merge/ghost/us-east-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_product_write_keeps_only_supplied_fields() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .put(srv.url("/products"))
        .json(&json!({"product_id": "p-800", "region_code": "us-east-1", "title": "Mug"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .put(srv.url("/products"))
        .json(&json!({
            "product_id": "p-801",
            "region_code": "us-east-1",
            "title": "Cup",
            "currency": null,
            "price": null,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/products/p-800/us-east-1")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["item"]["title"], "Mug");
    assert!(body["item"].get("currency").is_none());
    assert!(body["item"].get("price").is_none());

    let res = client.get(srv.url("/products/p-801/us-east-1")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["item"]["title"], "Cup");
    assert!(body["item"].get("currency").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_bodies_get_json_error_bodies() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/inventory"))
        .json(&json!({"product_id": "p-900", "inc": "ten"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.headers()["x-region"], "us-east-1");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].is_string());

    let res = client.post(srv.url("/simulate-conflict")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}
