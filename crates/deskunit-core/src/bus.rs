//! Message bus topics, payloads and the transport seam.
//!
//! The node publishes status, action and heartbeat messages and subscribes
//! to consultation requests:
//!
//! ```text
//! <namespace>/faculty/<id>/status     (publish)
//! <namespace>/faculty/<id>/request    (subscribe)
//! <namespace>/faculty/<id>/response   (publish)
//! <namespace>/faculty/<id>/heartbeat  (publish)
//! ```
//!
//! Inbound JSON is validated here, once. Nothing past [`RequestPayload::parse`]
//! ever looks at raw strings again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::consultation::{
    ConsultationAction, ConsultationRequest, ConsultationStatus, RequestMessage, StudentLabel,
};
use crate::scheduler::ScanMode;

/// Label used when a request names no student.
pub const DEFAULT_STUDENT_LABEL: &str = "Unknown Student";

/// Message used when a request carries no text.
pub const DEFAULT_REQUEST_MESSAGE: &str = "No message provided";

// =============================================================================
// Topics
// =============================================================================

/// The four per-faculty topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// Presence status.
    pub status: String,
    /// Inbound consultation requests.
    pub request: String,
    /// Outbound consultation actions.
    pub response: String,
    /// Liveness.
    pub heartbeat: String,
}

/// Which topic a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Status topic.
    Status,
    /// Request topic.
    Request,
    /// Response topic.
    Response,
    /// Heartbeat topic.
    Heartbeat,
}

impl Topics {
    /// Build the topic set for one faculty member.
    #[must_use]
    pub fn new(namespace: &str, faculty_id: u32) -> Self {
        let base = format!("{namespace}/faculty/{faculty_id}");
        Self {
            status: format!("{base}/status"),
            request: format!("{base}/request"),
            response: format!("{base}/response"),
            heartbeat: format!("{base}/heartbeat"),
        }
    }

    /// Classify a topic string.
    #[must_use]
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        [
            (&self.status, TopicKind::Status),
            (&self.request, TopicKind::Request),
            (&self.response, TopicKind::Response),
            (&self.heartbeat, TopicKind::Heartbeat),
        ]
        .into_iter()
        .find_map(|(candidate, kind)| (candidate == topic).then_some(kind))
    }
}

// =============================================================================
// Status
// =============================================================================

/// Reported availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    /// Present and taking requests.
    Available,
    /// Absent.
    Away,
}

impl Availability {
    /// From a presence flag.
    #[must_use]
    pub const fn from_present(present: bool) -> Self {
        if present {
            Self::Available
        } else {
            Self::Away
        }
    }
}

/// Where the reported availability came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PresenceSource {
    /// Beacon detector.
    Ble,
    /// Manual override.
    Manual,
}

/// Status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    /// Reported presence.
    pub present: bool,
    /// Same as `present`, as a label.
    pub status: Availability,
    /// Whether the detector is in a grace period.
    pub in_grace_period: bool,
    /// Time left in the grace period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_remaining_ms: Option<u64>,
    /// Faculty id.
    pub faculty_id: u32,
    /// Faculty display name.
    pub faculty_name: String,
    /// Detector or manual override.
    pub source: PresenceSource,
    /// Node monotonic time in milliseconds.
    pub timestamp_ms: u64,
}

// =============================================================================
// Requests
// =============================================================================

/// Why an inbound request was rejected.
#[derive(Debug, Error)]
pub enum RequestParseError {
    /// Not JSON, or a field had the wrong type.
    #[error("malformed request JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// No `id` field.
    #[error("request has no consultation id")]
    MissingId,

    /// `id` was zero or negative.
    #[error("consultation id {0} is not positive")]
    InvalidId(i64),

    /// `status` was present but not a string.
    #[error("consultation status must be a string, got {0}")]
    NonStringStatus(String),

    /// Addressed to another faculty member.
    #[error("request is for faculty {found}, not {expected}")]
    WrongFaculty {
        /// This node's faculty id.
        expected: u32,
        /// Id in the request.
        found: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FacultyRef {
    Number(u64),
    Text(String),
}

impl FacultyRef {
    fn matches(&self, faculty_id: u32) -> bool {
        match self {
            Self::Number(n) => *n == u64::from(faculty_id),
            Self::Text(text) => text.trim().parse::<u32>() == Ok(faculty_id),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    #[serde(alias = "consultation_id")]
    id: Option<i64>,
    #[serde(alias = "student_name")]
    student_label: Option<String>,
    #[serde(alias = "request_message")]
    message: Option<String>,
    #[serde(alias = "consultation_status")]
    status: Option<Value>,
    #[serde(alias = "faculty_id")]
    faculty_id: Option<FacultyRef>,
}

/// A validated consultation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPayload {
    /// The request, ready for the lifecycle.
    pub request: ConsultationRequest,
    /// Raw status text when it was coerced to `unknown`.
    pub unrecognized_status: Option<String>,
    /// Whether label or message were cut to fit.
    pub truncated: bool,
}

impl RequestPayload {
    /// Parse and validate an inbound request for `faculty_id`.
    ///
    /// A missing status means `pending`. An unrecognised status string is
    /// coerced to [`ConsultationStatus::Unknown`] and reported through
    /// `unrecognized_status`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestParseError`] for malformed JSON, a missing or
    /// non-positive id, a non-string status, or another faculty's request.
    pub fn parse(payload: &[u8], faculty_id: u32) -> Result<Self, RequestParseError> {
        let wire: WireRequest = serde_json::from_slice(payload)?;

        if let Some(target) = &wire.faculty_id {
            if !target.matches(faculty_id) {
                return Err(RequestParseError::WrongFaculty {
                    expected: faculty_id,
                    found: target.describe(),
                });
            }
        }

        let raw_id = wire.id.ok_or(RequestParseError::MissingId)?;
        let id = u64::try_from(raw_id)
            .ok()
            .filter(|id| *id > 0)
            .ok_or(RequestParseError::InvalidId(raw_id))?;

        let (status, unrecognized_status) = match wire.status {
            None | Some(Value::Null) => (ConsultationStatus::Pending, None),
            Some(Value::String(raw)) => match ConsultationStatus::from_wire(&raw) {
                Some(status) => (status, None),
                None => (ConsultationStatus::Unknown, Some(raw)),
            },
            Some(other) => return Err(RequestParseError::NonStringStatus(other.to_string())),
        };

        let label = wire
            .student_label
            .unwrap_or_else(|| DEFAULT_STUDENT_LABEL.to_string());
        let message = wire
            .message
            .unwrap_or_else(|| DEFAULT_REQUEST_MESSAGE.to_string());
        let truncated = StudentLabel::would_truncate(&label) || RequestMessage::would_truncate(&message);

        Ok(Self {
            request: ConsultationRequest {
                id,
                student_label: StudentLabel::truncating(&label),
                message: RequestMessage::truncating(&message),
                status,
            },
            unrecognized_status,
            truncated,
        })
    }
}

// =============================================================================
// Actions and heartbeat
// =============================================================================

/// Outbound consultation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    /// What happened.
    pub action: ConsultationAction,
    /// Which consultation.
    pub consultation_id: u64,
}

/// Periodic liveness message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    /// Faculty id.
    pub faculty_id: u32,
    /// Changes on every process start.
    pub boot_id: Uuid,
    /// Increments per heartbeat, starting at 1.
    pub sequence: u64,
    /// Milliseconds since start.
    pub uptime_ms: u64,
    /// Reported presence.
    pub present: bool,
    /// Current scan mode.
    pub scan_mode: ScanMode,
    /// Tracked consultation status.
    pub consultation_status: Option<ConsultationStatus>,
    /// Wall clock time of sending.
    pub sent_at_utc: DateTime<Utc>,
}

// =============================================================================
// Transport
// =============================================================================

/// Why a publish failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Outbound queue is full.
    #[error("outbound queue full ({capacity} messages)")]
    Backpressure {
        /// Queue capacity.
        capacity: usize,
    },

    /// Not connected, or the link is down.
    #[error("transport unavailable: {message}")]
    Unavailable {
        /// Reason.
        message: String,
    },

    /// Payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish side of the message bus.
///
/// Implementations must not block: connection management and retries live
/// behind this trait, outside the control loop.
pub trait Transport {
    /// Queue `payload` for delivery on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message could not be queued.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Encode `message` as JSON and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] or any error from [`Self::publish`].
    fn publish_json<T: Serialize>(&mut self, topic: &str, message: &T) -> Result<(), TransportError> {
        let payload = serde_json::to_string(message)?;
        self.publish(topic, &payload)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        (**self).publish(topic, payload)
    }
}
