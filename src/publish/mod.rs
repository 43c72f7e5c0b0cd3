//! Downstream anomaly publisher
//!
//! Serializes anomalies into the result envelope and sends them over the
//! configured transport. Fire-and-forget: a failed send is logged at debug
//! level and never reaches the pipeline.

use std::net::Ipv4Addr;
use std::time::Duration;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use uuid::Uuid;

use crate::anomaly::Anomaly;
use crate::config::PublishConfig;

pub const TOPIC_NAME: &str = "SIFIS:AUD_Manager_Results";

/// Deterministic topic UUID derived from the topic name
pub fn topic_uuid() -> Uuid {
    Uuid::new_v3(&Uuid::NAMESPACE_OID, TOPIC_NAME.as_bytes())
}

/// Build the publish envelope for one anomaly
pub fn envelope(local_ip: Ipv4Addr, anomaly: &Anomaly) -> serde_json::Value {
    serde_json::json!({
        "RequestPostTopicUUID": {
            "topic_name": TOPIC_NAME,
            "topic_uuid": topic_uuid().to_string(),
            "value": {
                "description": "AUD Anomaly",
                "subject_ip": local_ip.to_string(),
                "anomaly": anomaly.as_json(),
            }
        }
    })
}

/// Outbound publisher task
pub struct Publisher {
    config: PublishConfig,
    local_ip: Ipv4Addr,
    http: reqwest::Client,
}

impl Publisher {
    /// Spawn the publisher. Returns the sender the anomaly engine feeds and
    /// the task handle.
    pub fn spawn(config: PublishConfig, local_ip: Ipv4Addr) -> (mpsc::Sender<Anomaly>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let publisher = Self { config, local_ip, http };

        let handle = tokio::spawn(async move {
            publisher.run(rx).await;
        });

        (tx, handle)
    }

    async fn run(self, mut rx: mpsc::Receiver<Anomaly>) {
        info!("Publisher started, endpoint {}", self.config.url);

        while let Some(anomaly) = rx.recv().await {
            let payload = envelope(self.local_ip, &anomaly);

            if let Err(e) = self.send(&payload).await {
                debug!("Anomaly publish failed: {}", e);
            }
        }

        info!("Publisher stopped");
    }

    async fn send(&self, payload: &serde_json::Value) -> anyhow::Result<()> {
        let url = &self.config.url;
        let timeout = Duration::from_millis(self.config.timeout_ms);

        if url.starts_with("ws://") || url.starts_with("wss://") {
            tokio::time::timeout(timeout, self.send_ws(url, payload))
                .await
                .map_err(|_| anyhow::anyhow!("WebSocket send timed out"))?
        } else {
            self.send_http(url, payload).await
        }
    }

    async fn send_ws(&self, url: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let (mut ws, _response) = connect_async(url).await?;
        ws.send(Message::Text(payload.to_string())).await?;
        let _ = ws.close(None).await;
        Ok(())
    }

    async fn send_http(&self, url: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        let response = self.http.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Endpoint returned {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Category;
    use crate::aud::AclKey;
    use crate::capture::packet::Direction;

    #[test]
    fn test_topic_uuid_stable() {
        // uuid3 of a fixed name in a fixed namespace never changes
        assert_eq!(topic_uuid(), topic_uuid());
        assert_eq!(topic_uuid().get_version_num(), 3);
    }

    #[test]
    fn test_envelope_shape() {
        let acl = AclKey {
            ip_ver: 4,
            direction: Direction::Outbound,
            proto: 6,
            addr: Ipv4Addr::new(10, 0, 0, 5),
            svc_port: 443,
        };
        let anomaly = Anomaly::new(Category::NovelFlow, 0.0, acl);
        let local_ip = Ipv4Addr::new(192, 168, 1, 10);

        let env = envelope(local_ip, &anomaly);
        let inner = &env["RequestPostTopicUUID"];

        assert_eq!(inner["topic_name"], TOPIC_NAME);
        assert_eq!(inner["topic_uuid"], topic_uuid().to_string());
        assert_eq!(inner["value"]["description"], "AUD Anomaly");
        assert_eq!(inner["value"]["subject_ip"], "192.168.1.10");
        assert_eq!(inner["value"]["anomaly"]["category"], "NovelFlow");
        assert_eq!(inner["value"]["anomaly"]["uuid"], anomaly.uuid.to_string());
    }
}
