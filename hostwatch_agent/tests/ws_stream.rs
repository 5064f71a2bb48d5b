//! HTTP routes through `oneshot`; WebSocket against a live router on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use hostwatch_agent::hub::BroadcastHub;
use hostwatch_agent::normalize::{normalize, GpuSelection};
use hostwatch_agent::source::{shared, CollectError, MetricsSource};
use hostwatch_agent::state::AppState;
use hostwatch_agent::types::{MemoryUsage, MetricsSnapshot, RawMetrics};
use hostwatch_agent::ws::router;

struct Fixed(Option<f64>);

impl MetricsSource for Fixed {
    fn collect(&mut self) -> Result<RawMetrics, CollectError> {
        let cpu = self
            .0
            .ok_or_else(|| CollectError::Unavailable("sensors offline".into()))?;
        Ok(raw(cpu))
    }
}

fn raw(cpu: f64) -> RawMetrics {
    RawMetrics {
        cpu_load_percent: cpu,
        memory: MemoryUsage {
            used: 1,
            total: 4,
        },
        ..RawMetrics::default()
    }
}

fn snap(cpu: f64) -> MetricsSnapshot {
    normalize(&raw(cpu), Utc::now(), GpuSelection::Last)
}

fn app(source: Fixed) -> (axum::Router, Arc<BroadcastHub>) {
    let hub = Arc::new(BroadcastHub::new());
    let app = router(AppState {
        hub: hub.clone(),
        source: shared(source),
        gpu_selection: GpuSelection::Last,
    });
    (app, hub)
}

async fn start(source: Fixed) -> (SocketAddr, Arc<BroadcastHub>) {
    let (app, hub) = app(source);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hub)
}

async fn get_metrics(app: axum::Router) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn next_json<S>(ws: &mut S) -> serde_json::Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within deadline")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn metrics_endpoint_serves_latest_snapshot() {
    let (app, hub) = app(Fixed(Some(5.0)));
    hub.broadcast(snap(64.5));

    let (status, v) = get_metrics(app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["cpu_load_percent"], 64.5);
    assert_eq!(v["memory_used_percent"], 25.0);
    assert!(v["cpu_temp_c"].is_null());
    assert!(v["gpu_model"].is_null());
}

#[tokio::test]
async fn metrics_endpoint_collects_on_cold_start() {
    let (app, hub) = app(Fixed(Some(42.0)));
    let (status, v) = get_metrics(app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["cpu_load_percent"], 42.0);
    // on-demand snapshots are not broadcast
    assert!(hub.latest().is_none());
}

#[tokio::test]
async fn metrics_endpoint_reports_collection_failure() {
    let (app, _hub) = app(Fixed(None));
    let (status, v) = get_metrics(app).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let err = v["error"].as_str().unwrap();
    assert!(err.starts_with("Failed to fetch metrics\n"));
    assert!(err.contains("sensors offline"));
}

#[tokio::test]
async fn websocket_backfills_then_streams_broadcasts() {
    let (addr, hub) = start(Fixed(Some(5.0))).await;
    hub.broadcast(snap(1.0));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // backfill arrives after registration, so the next broadcast reaches us
    assert_eq!(next_json(&mut ws).await["cpu_load_percent"], 1.0);
    assert_eq!(hub.subscriber_count(), 1);

    hub.broadcast(snap(2.0));
    assert_eq!(next_json(&mut ws).await["cpu_load_percent"], 2.0);

    ws.send(Message::Text("get_metrics".into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["cpu_load_percent"], 2.0);

    ws.close(None).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while hub.subscriber_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hub.subscriber_count(), 0);
}
