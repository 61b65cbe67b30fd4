//! Local stand-ins for the bus, display and buttons.
//!
//! The control loop only sees [`GatewayTransport`] and [`PanelDisplay`];
//! everything that arrives over HTTP is queued as an [`Inbound`] item and
//! handled by the loop one at a time.
//!
//! ```text
//!   HTTP ──▶ Inbound (bounded mpsc) ──▶ control loop ──▶ GatewayTransport
//!                                            │                 │
//!                                            ▼                 ├─▶ Outbox (recent history)
//!                                      PanelDisplay (watch)    └─▶ BridgeForwarder ──▶ bridge_url
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use deskunit_core::{BusConfig, ButtonCommand, Display, Transport, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::logging::DISPLAY_TARGET;

/// How long the forwarder waits for the bridge per message.
const BRIDGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Work for the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message delivered by the bus.
    BusMessage {
        /// Topic it arrived on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// A button press.
    Button(ButtonCommand),
    /// Set or clear the manual presence override.
    Override(Option<bool>),
    /// Drop the tracked consultation without publishing an action.
    Reset,
}

/// Gateway setup errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// `bus.bridge_url` does not parse.
    #[error("invalid bridge URL: {0}")]
    InvalidBridgeUrl(#[from] url::ParseError),

    /// The HTTP client could not be built.
    #[error("failed to build bridge client: {0}")]
    Client(#[from] reqwest::Error),
}

// ============================================================================
// Outbox
// ============================================================================

/// A message the node published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "sequence": 12,
    "topic": "consultease/faculty/1/response",
    "payload": {"action": "accepted", "consultationId": 7},
    "published_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct OutboundMessage {
    /// Increments per published message.
    pub sequence: u64,

    /// Topic.
    pub topic: String,

    /// Payload as JSON.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,

    /// When it was published.
    pub published_at_utc: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct OutboxInner {
    next_sequence: u64,
    recent: VecDeque<OutboundMessage>,
}

/// Bounded history of published messages.
#[derive(Debug)]
pub struct Outbox {
    capacity: usize,
    inner: Mutex<OutboxInner>,
}

impl Outbox {
    /// Keep at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(OutboxInner::default()),
        }
    }

    /// History size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, evicting the oldest when full.
    pub fn record(&self, topic: &str, payload: &str) -> OutboundMessage {
        let payload = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_sequence += 1;
        let message = OutboundMessage {
            sequence: inner.next_sequence,
            topic: topic.to_string(),
            payload,
            published_at_utc: Utc::now(),
        };
        if inner.recent.len() == self.capacity {
            inner.recent.pop_front();
        }
        inner.recent.push_back(message.clone());
        message
    }

    /// Recent messages, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<OutboundMessage> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.recent.iter().cloned().collect()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Transport that records to the outbox and queues for the bridge.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    outbox: Arc<Outbox>,
    forward: Option<mpsc::Sender<OutboundMessage>>,
}

impl GatewayTransport {
    /// Build from its parts.
    #[must_use]
    pub const fn new(outbox: Arc<Outbox>, forward: Option<mpsc::Sender<OutboundMessage>>) -> Self {
        Self { outbox, forward }
    }
}

impl Transport for GatewayTransport {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let message = self.outbox.record(topic, payload);
        debug!(topic, sequence = message.sequence, "Published");

        let Some(forward) = &self.forward else {
            return Ok(());
        };
        forward.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure {
                capacity: forward.max_capacity(),
            },
            TrySendError::Closed(_) => TransportError::Unavailable {
                message: "bridge forwarder stopped".to_string(),
            },
        })
    }
}

/// Build the outbound side from bus settings.
///
/// The receiver is `Some` only when a bridge URL is configured.
#[must_use]
pub fn outbound(
    config: &BusConfig,
) -> (
    GatewayTransport,
    Arc<Outbox>,
    Option<mpsc::Receiver<OutboundMessage>>,
) {
    let outbox = Arc::new(Outbox::new(config.outbox_capacity));
    let (forward, receiver) = if config.bridge_url.is_some() {
        let (tx, rx) = mpsc::channel(config.outbox_capacity.max(1));
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    (
        GatewayTransport::new(Arc::clone(&outbox), forward),
        outbox,
        receiver,
    )
}

// ============================================================================
// Display
// ============================================================================

/// What the panel currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status_line": "Status (BLE): Available",
    "message": "Request ID: 7\nStatus: PENDING\nStudent: Ada\nMessage: Thesis review",
    "updated_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct PanelText {
    /// Single-line status area.
    pub status_line: String,

    /// Multi-line message area.
    pub message: String,

    /// Last change.
    pub updated_at_utc: Option<DateTime<Utc>>,
}

/// Display that publishes panel text on a watch channel and logs it.
#[derive(Debug)]
pub struct PanelDisplay {
    tx: watch::Sender<PanelText>,
}

impl PanelDisplay {
    /// Create a display and a receiver for the gateway.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<PanelText>) {
        let (tx, rx) = watch::channel(PanelText::default());
        (Self { tx }, rx)
    }
}

impl Display for PanelDisplay {
    fn show_status(&mut self, text: &str) {
        info!(target: DISPLAY_TARGET, status = text, "Panel status");
        self.tx.send_modify(|panel| {
            panel.status_line = text.to_string();
            panel.updated_at_utc = Some(Utc::now());
        });
    }

    fn show_message(&mut self, text: &str) {
        debug!(target: DISPLAY_TARGET, message = text, "Panel message");
        self.tx.send_modify(|panel| {
            panel.message = text.to_string();
            panel.updated_at_utc = Some(Utc::now());
        });
    }
}

// ============================================================================
// Bridge forwarder
// ============================================================================

#[derive(Debug, Serialize)]
struct BridgePublish<'a> {
    topic: &'a str,
    payload: &'a serde_json::Value,
}

/// Posts published messages to the broker bridge.
#[derive(Debug, Clone)]
pub struct BridgeForwarder {
    client: reqwest::Client,
    endpoint: Url,
}

impl BridgeForwarder {
    /// Forward to `<bridge_url>/publish`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or the client cannot be built.
    pub fn new(bridge_url: &str) -> Result<Self, GatewayError> {
        let mut base = Url::parse(bridge_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(BRIDGE_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: base.join("publish")?,
        })
    }

    /// Where messages are posted.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Drain `rx` until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<OutboundMessage>) {
        info!(endpoint = %self.endpoint, "Bus bridge forwarder started");
        while let Some(message) = rx.recv().await {
            if let Err(e) = self.forward(&message).await {
                warn!(
                    error = %e,
                    topic = %message.topic,
                    sequence = message.sequence,
                    "Failed to forward message to bus bridge"
                );
            }
        }
        info!("Bus bridge forwarder stopped");
    }

    async fn forward(&self, message: &OutboundMessage) -> Result<(), reqwest::Error> {
        self.client
            .post(self.endpoint.clone())
            .json(&BridgePublish {
                topic: &message.topic,
                payload: &message.payload,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_evicts_oldest() {
        let outbox = Outbox::new(2);
        outbox.record("a", "{\"n\":1}");
        outbox.record("b", "{\"n\":2}");
        outbox.record("c", "not json");

        let recent = outbox.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].topic, "b");
        assert_eq!(recent[0].payload["n"], 2);
        assert_eq!(recent[1].sequence, 3);
        assert_eq!(recent[1].payload, serde_json::json!("not json"));
    }

    #[test]
    fn test_transport_without_bridge_only_records() {
        let (mut transport, outbox, rx) = outbound(&BusConfig::default());
        assert!(rx.is_none());

        transport.publish("t", "{}").unwrap();
        assert_eq!(outbox.recent().len(), 1);
    }

    #[test]
    fn test_full_forward_queue_is_backpressure() {
        let outbox = Arc::new(Outbox::new(8));
        let (tx, _rx) = mpsc::channel(1);
        let mut transport = GatewayTransport::new(Arc::clone(&outbox), Some(tx));

        transport.publish("t", "{}").unwrap();
        let err = transport.publish("t", "{}").unwrap_err();

        assert!(matches!(err, TransportError::Backpressure { capacity: 1 }));
        assert_eq!(outbox.recent().len(), 2);
    }

    #[test]
    fn test_closed_forwarder_is_unavailable() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut transport = GatewayTransport::new(Arc::new(Outbox::new(4)), Some(tx));

        assert!(matches!(
            transport.publish("t", "{}"),
            Err(TransportError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_panel_display_updates_watch() {
        let (mut display, rx) = PanelDisplay::new();
        display.show_status("Status (BLE): Available");
        display.show_message("Request ID: 1");

        let panel = rx.borrow().clone();
        assert_eq!(panel.status_line, "Status (BLE): Available");
        assert_eq!(panel.message, "Request ID: 1");
        assert!(panel.updated_at_utc.is_some());
    }

    #[test]
    fn test_forwarder_endpoint_keeps_base_path() {
        let forwarder = BridgeForwarder::new("http://broker.local:8080/bus").unwrap();
        assert_eq!(
            forwarder.endpoint().as_str(),
            "http://broker.local:8080/bus/publish"
        );
        assert!(BridgeForwarder::new("not a url").is_err());
    }

    #[test]
    fn test_forwarder_stops_when_senders_drop() {
        let forwarder = BridgeForwarder::new("http://127.0.0.1:9").unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        tokio_test::block_on(forwarder.run(rx));
    }
}
