//! HTTP control surface
//!
//! Read-only views and a few developer controls. Handlers never touch the
//! pipeline's flow state directly: dumps and forced updates go through the
//! controller's command channel, and the anomaly ring and notification log
//! are read under their own short-lived locks.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use crate::anomaly::AnomalyRing;
use crate::notify::NotifyLog;
use crate::pipeline::ControlCommand;
use crate::publish::{topic_uuid, TOPIC_NAME};

/// Shared state behind the HTTP handlers
#[derive(Clone)]
pub struct ApiState {
    pub cmd_tx: mpsc::Sender<ControlCommand>,
    pub ring: Arc<Mutex<AnomalyRing>>,
    pub notify: NotifyLog,
    pub learning: Arc<AtomicBool>,
    pub local_ips: Vec<Ipv4Addr>,
    pub started_at: DateTime<Utc>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/log", get(log_tail))
        .route("/mark-benign/:uuid", get(mark_benign))
        .route("/dev/diag", get(dev_diag))
        .route("/dev/aud-update", get(dev_aud_update))
        .route("/dev/connlist", get(dev_connlist))
        .route("/dev/force-stop-learning", get(dev_stop_learning))
        .with_state(state)
}

/// Serve the control surface until shutdown
pub async fn serve(
    listen: &str,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind control surface to {}", listen))?;

    info!("Control surface listening on {}", listen);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .with_context(|| "Control surface error")
}

async fn status(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let anomalies = state.ring.lock().snapshot();

    Json(serde_json::json!({
        "RequestPostTopicUUID": {
            "topic_name": TOPIC_NAME,
            "topic_uuid": topic_uuid().to_string(),
            "value": {
                "description": "aud_manager",
                "started": state.started_at.to_rfc3339(),
                "learning": state.learning.load(Ordering::Relaxed),
            },
            "local_ip": state.local_ips.iter().map(|ip| ip.to_string()).collect::<Vec<_>>(),
            "anomalies": anomalies,
        }
    }))
}

async fn log_tail(State(state): State<ApiState>) -> String {
    state.notify.tail()
}

async fn mark_benign(
    State(state): State<ApiState>,
    Path(uuid): Path<String>,
) -> Json<serde_json::Value> {
    let result = state.ring.lock().mark_benign(&uuid);

    let response = match result {
        Ok(()) => "OK".to_string(),
        Err(e) => e.to_string(),
    };

    Json(serde_json::json!({ "response": response }))
}

async fn dev_diag(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let (reply_tx, reply_rx) = oneshot::channel();

    if state.cmd_tx.send(ControlCommand::Diag(reply_tx)).await.is_err() {
        return Json(serde_json::json!({ "response": "controller unavailable" }));
    }

    match reply_rx.await {
        Ok(dump) => Json(dump),
        Err(_) => Json(serde_json::json!({ "response": "controller unavailable" })),
    }
}

async fn dev_aud_update(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let (reply_tx, reply_rx) = oneshot::channel();

    if state.cmd_tx.send(ControlCommand::ForceUpdate(reply_tx)).await.is_err()
        || reply_rx.await.is_err()
    {
        return Json(serde_json::json!({ "response": "controller unavailable" }));
    }

    Json(serde_json::json!({ "response": "OK" }))
}

async fn dev_connlist(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let (reply_tx, reply_rx) = oneshot::channel();

    if state.cmd_tx.send(ControlCommand::ConnList(reply_tx)).await.is_err() {
        return Json(serde_json::json!({ "response": "controller unavailable" }));
    }

    match reply_rx.await {
        Ok(dump) => Json(dump),
        Err(_) => Json(serde_json::json!({ "response": "controller unavailable" })),
    }
}

async fn dev_stop_learning(State(state): State<ApiState>) -> Json<serde_json::Value> {
    state.learning.store(false, Ordering::Relaxed);
    state.notify.notify("AUD learning ended (via /dev/force-stop-learning)");

    Json(serde_json::json!({ "response": "OK" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{Anomaly, Category};
    use crate::aud::AclKey;
    use crate::capture::packet::Direction;

    fn acl() -> AclKey {
        AclKey {
            ip_ver: 4,
            direction: Direction::Outbound,
            proto: 6,
            addr: Ipv4Addr::new(10, 0, 0, 5),
            svc_port: 443,
        }
    }

    fn state() -> (ApiState, mpsc::Receiver<ControlCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let state = ApiState {
            cmd_tx,
            ring: Arc::new(Mutex::new(AnomalyRing::new(100))),
            notify: NotifyLog::new(),
            learning: Arc::new(AtomicBool::new(true)),
            local_ips: vec![Ipv4Addr::new(192, 168, 1, 10)],
            started_at: Utc::now(),
        };
        (state, cmd_rx)
    }

    #[tokio::test]
    async fn test_status_envelope() {
        let (state, _cmd_rx) = state();
        state.ring.lock().push(Anomaly::new(Category::NovelFlow, 0.0, acl()));

        let Json(body) = status(State(state)).await;
        let inner = &body["RequestPostTopicUUID"];

        assert_eq!(inner["topic_name"], TOPIC_NAME);
        assert_eq!(inner["value"]["description"], "aud_manager");
        assert_eq!(inner["value"]["learning"], true);
        assert_eq!(inner["local_ip"][0], "192.168.1.10");
        assert_eq!(inner["anomalies"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_benign_roundtrip() {
        let (state, _cmd_rx) = state();
        let anomaly = Anomaly::new(Category::NovelFlow, 0.0, acl());
        let uuid = anomaly.uuid.to_string();
        state.ring.lock().push(anomaly);

        let Json(body) = mark_benign(State(state.clone()), Path(uuid.clone())).await;
        assert_eq!(body["response"], "OK");

        let Json(body) = mark_benign(State(state.clone()), Path(uuid)).await;
        assert_eq!(body["response"], "anomaly UUID not found");

        let Json(body) = mark_benign(State(state), Path("junk".to_string())).await;
        assert!(body["response"].as_str().unwrap().starts_with("malformed anomaly UUID"));
    }

    #[tokio::test]
    async fn test_mark_benign_all() {
        let (state, _cmd_rx) = state();
        for _ in 0..3 {
            state.ring.lock().push(Anomaly::new(Category::NovelFlow, 0.0, acl()));
        }

        let Json(body) = mark_benign(State(state.clone()), Path("all".to_string())).await;
        assert_eq!(body["response"], "OK");
        assert!(state.ring.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_learning() {
        let (state, _cmd_rx) = state();

        let Json(body) = dev_stop_learning(State(state.clone())).await;
        assert_eq!(body["response"], "OK");
        assert!(!state.learning.load(Ordering::Relaxed));
        assert!(state.notify.tail().contains("AUD learning ended"));
    }

    #[tokio::test]
    async fn test_connlist_roundtrip() {
        let (state, mut cmd_rx) = state();

        // Stand-in for the controller answering the command
        tokio::spawn(async move {
            if let Some(ControlCommand::ConnList(reply)) = cmd_rx.recv().await {
                let _ = reply.send(serde_json::json!({ "count": 0, "conns": [] }));
            }
        });

        let Json(body) = dev_connlist(State(state)).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_command_channel_down() {
        let (state, cmd_rx) = state();
        drop(cmd_rx);

        let Json(body) = dev_aud_update(State(state)).await;
        assert_eq!(body["response"], "controller unavailable");
    }
}
