use async_trait::async_trait;
use serde_json::{json, Value};
use station_explorer::config::Config;
use station_explorer::db::{DbError, Record, RecordStore};
use station_explorer::query_compiler::{ParamValue, QueryDescriptor};
use station_explorer::server::{router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// In-memory store that records every descriptor it receives
#[derive(Default)]
struct RecordingStore {
    rows: Vec<Record>,
    fail: bool,
    seen: Mutex<Vec<QueryDescriptor>>,
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<Vec<Record>, DbError> {
        self.seen.lock().unwrap().push(descriptor.clone());
        if self.fail {
            return Err(DbError::PoolTimeout);
        }
        Ok(self.rows.clone())
    }
}

fn row(sn: &str, op10: Option<i32>) -> Record {
    let value = json!({ "SN": sn, "StartTime": "2024-01-01T11:59:00.000Z", "OP10Result": op10 });
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

async fn spawn(store: Arc<RecordingStore>, data_file: PathBuf) -> SocketAddr {
    let mut config = Config::default();
    config.database.host = "db.internal".to_string();
    config.database.password = "secret".to_string();
    config.server.dashboard_data_file = data_file;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(&config, store));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_status_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn(Arc::default(), dir.path().join("data.json")).await;

    let response = reqwest::get(format!("http://{}/api/status", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["message"].as_str().unwrap().contains("TS70"));
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_config_endpoint_hides_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn(Arc::default(), dir.path().join("data.json")).await;

    let body: Value = reqwest::get(format!("http://{}/api/config", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "server": "db.internal", "database": "TS70_246K" }));
}

#[tokio::test]
async fn test_filters_endpoint_lists_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn(Arc::default(), dir.path().join("data.json")).await;

    let body: Value = reqwest::get(format!("http://{}/api/filters", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["stations"].as_array().unwrap().len(), 9);
    assert_eq!(body["stations"][0]["key"], "OP10");
    assert!(body["presets"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["key"] == "TODAY"));
    assert_eq!(body["defaultLimit"], 100);
    assert_eq!(body["maxLimit"], 500);
}

#[tokio::test]
async fn test_search_returns_rows_and_binds_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore {
        rows: vec![row("SN001", Some(1)), row("SN002", None)],
        ..Default::default()
    });
    let addr = spawn(store.clone(), dir.path().join("data.json")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/search", addr))
        .json(&json!({
            "startTime": "2024-01-01T00:00:00.000Z",
            "stationFilters": [{ "key": "OP10", "statuses": ["OK"] }],
            "sn": "SN0",
            "limit": 10000
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["data"][0]["SN"], "SN001");
    assert_eq!(body["data"][1]["OP10Result"], Value::Null);

    let seen = store.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let descriptor = &seen[0];
    assert!(descriptor.query_text.starts_with("SELECT TOP (500) "));
    assert!(!descriptor.query_text.contains("SN0"));
    assert_eq!(descriptor.parameters["sn"], ParamValue::Text("%SN0%".to_string()));
    assert_eq!(descriptor.parameters["station_0_0"], ParamValue::Int(1));
}

#[tokio::test]
async fn test_search_ignores_relation_in_body() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore::default());
    let addr = spawn(store.clone(), dir.path().join("data.json")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/search", addr))
        .json(&json!({ "tableSchema": "sys", "tableName": "sql_logins" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let seen = store.seen.lock().unwrap();
    let query_text = &seen[0].query_text;
    assert!(query_text.contains(r#"FROM "dbo"."TS70_246K""#));
    assert!(!query_text.contains("sql_logins"));
    assert!(!query_text.contains(r#""sys""#));
}

#[tokio::test]
async fn test_search_failure_is_generic() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore {
        fail: true,
        ..Default::default()
    });
    let addr = spawn(store, dir.path().join("data.json")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/search", addr))
        .json(&json!({ "sn": "X" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Unable to execute search" }));
}

#[tokio::test]
async fn test_dashboard_data_upload() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("production-dashboard-data.json");
    let addr = spawn(Arc::default(), data_file.clone()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/production-dashboard-data", addr);

    let response = client
        .post(&url)
        .header("content-type", "text/plain")
        .body("{\"line\": \"TS70\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "status": "ok" }));
    assert_eq!(
        std::fs::read_to_string(&data_file).unwrap(),
        "{\"line\": \"TS70\"}\n"
    );

    let empty = client.post(&url).body("   ").send().await.unwrap();
    assert_eq!(empty.status(), 400);
    assert_eq!(empty.json::<Value>().await.unwrap(), json!({ "error": "Empty payload" }));

    let invalid = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
    assert_eq!(
        invalid.json::<Value>().await.unwrap(),
        json!({ "error": "Invalid JSON payload" })
    );

    // failed uploads leave the previous snapshot in place
    assert_eq!(
        std::fs::read_to_string(&data_file).unwrap(),
        "{\"line\": \"TS70\"}\n"
    );
}
