//! The desk unit controller.
//!
//! [`DeskUnit`] owns every state machine and collaborator of one node and is
//! driven by a single cooperative loop:
//!
//! 1. [`DeskUnit::run_scan_cycle`] when [`DeskUnit::scan_due`]
//! 2. [`DeskUnit::handle_bus_message`] for one inbound message per pump
//! 3. [`DeskUnit::handle_button`] for local input
//! 4. [`DeskUnit::poll_housekeeping`] for grace expiry, status refresh and
//!    heartbeats
//!
//! Nothing here spawns tasks or takes locks. All state is owned by the
//! controller and only derived values leave it.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bluetooth::BeaconScanner;
use crate::bus::{
    ActionPayload, Availability, HeartbeatPayload, PresenceSource, RequestParseError,
    RequestPayload, StatusPayload, TopicKind, Topics, Transport,
};
use crate::clock::{Clock, Timestamp};
use crate::config::NodeConfig;
use crate::consultation::{
    ButtonCommand, CommandOutcome, ConsultationAction, ConsultationLifecycle, ConsultationRequest,
    Ingress, LifecycleCommand,
};
use crate::display::{availability_line, faculty_card, Display};
use crate::error::DeskError;
use crate::presence::{DetectorConfig, PresenceDetector, PresenceEvent, PresenceSnapshot};
use crate::scheduler::{AdaptiveScheduler, ScanMode};
use crate::types::BeaconObservation;

/// What one scan cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Scanner result.
    pub observation: Option<BeaconObservation>,
    /// Whether the observation passed the RSSI threshold.
    pub detected: bool,
    /// Presence flip, if any.
    pub event: Option<PresenceEvent>,
    /// New scan mode, if it changed.
    pub mode_change: Option<ScanMode>,
}

/// What happened to an inbound bus message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// Not on the request topic.
    NotForUs,
    /// Rejected at the parse boundary.
    Malformed(RequestParseError),
    /// Valid, but nobody is at the desk.
    IgnoredAway {
        /// Request id.
        id: u64,
    },
    /// Handed to the lifecycle.
    Routed(Ingress),
}

/// What one housekeeping pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Housekeeping {
    /// Grace period expired since the last scan.
    pub event: Option<PresenceEvent>,
    /// Periodic status republished.
    pub status_refreshed: bool,
    /// Heartbeat published.
    pub heartbeat_sent: bool,
}

/// Read-only view of the whole node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeskSnapshot {
    /// Faculty id.
    pub faculty_id: u32,
    /// Faculty display name.
    pub faculty_name: String,
    /// Availability as reported on the bus.
    pub reported_present: bool,
    /// Where `reported_present` came from.
    pub source: PresenceSource,
    /// Manual override, if set.
    pub manual_override: Option<bool>,
    /// Detector internals.
    pub presence: PresenceSnapshot,
    /// Current scan mode.
    pub scan_mode: ScanMode,
    /// Tracked consultation.
    pub consultation: Option<ConsultationRequest>,
    /// Milliseconds since start.
    pub uptime_ms: u64,
}

/// One faculty desk unit.
pub struct DeskUnit<S, T, D, C> {
    faculty_id: u32,
    faculty_name: String,
    department: Option<String>,
    topics: Topics,
    status_refresh: Duration,
    heartbeat_every: Duration,
    scanner: S,
    detector: PresenceDetector<C>,
    scheduler: AdaptiveScheduler<C>,
    lifecycle: ConsultationLifecycle,
    transport: T,
    display: D,
    clock: C,
    manual_override: Option<bool>,
    boot_id: Uuid,
    started_at: Timestamp,
    heartbeat_sequence: u64,
    last_status_at: Option<Timestamp>,
    last_heartbeat_at: Option<Timestamp>,
}

impl<S, T, D, C> DeskUnit<S, T, D, C>
where
    S: BeaconScanner,
    T: Transport,
    D: Display,
    C: Clock + Clone,
{
    /// Assemble a desk unit from validated configuration.
    pub fn new(config: &NodeConfig, scanner: S, transport: T, display: D, clock: C) -> Self {
        let detector = PresenceDetector::new(
            DetectorConfig::from_config(&config.presence, &config.bluetooth),
            clock.clone(),
        );
        let scheduler = AdaptiveScheduler::new(&config.scheduler, &config.presence, clock.clone());

        Self {
            faculty_id: config.faculty.id,
            faculty_name: config.faculty.name.clone(),
            department: config.faculty.department.clone(),
            topics: Topics::new(&config.bus.namespace, config.faculty.id),
            status_refresh: config.bus.status_refresh(),
            heartbeat_every: config.bus.heartbeat(),
            scanner,
            detector,
            scheduler,
            lifecycle: ConsultationLifecycle::new(),
            transport,
            display,
            started_at: clock.now(),
            clock,
            manual_override: None,
            boot_id: Uuid::new_v4(),
            heartbeat_sequence: 0,
            last_status_at: None,
            last_heartbeat_at: None,
        }
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Availability as reported to the bus and used to gate requests.
    #[must_use]
    pub fn reported_presence(&self) -> bool {
        self.manual_override
            .unwrap_or_else(|| self.detector.effective_presence())
    }

    /// Where the reported availability comes from.
    #[must_use]
    pub const fn presence_source(&self) -> PresenceSource {
        if self.manual_override.is_some() {
            PresenceSource::Manual
        } else {
            PresenceSource::Ble
        }
    }

    /// Set or clear the manual override.
    ///
    /// Publishes a status message when the reported availability changes.
    /// Returns whether it did.
    pub fn set_manual_override(&mut self, value: Option<bool>) -> bool {
        let before = self.reported_presence();
        self.manual_override = value;
        let after = self.reported_presence();
        info!(
            manual_override = ?value,
            reported = after,
            "Manual presence override updated"
        );

        self.display
            .show_status(&availability_line(after, value.is_some()));
        if before == after {
            return false;
        }
        self.publish_status();
        true
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Whether the scheduler wants a scan now.
    #[must_use]
    pub fn scan_due(&self) -> bool {
        self.scheduler.is_due(self.detector.is_in_grace_period())
    }

    /// Time until the scheduler wants the next scan.
    #[must_use]
    pub fn time_until_next_scan(&self) -> Duration {
        self.scheduler
            .time_until_next_scan(self.detector.is_in_grace_period())
    }

    /// Run one scan and push its consequences through detector, scheduler,
    /// bus and display.
    pub async fn run_scan_cycle(&mut self) -> ScanReport {
        let cadence = self.scheduler.cadence(self.detector.is_in_grace_period());
        let observation = self.scanner.scan(cadence.window).await;

        let detected = observation
            .as_ref()
            .is_some_and(|obs| self.detector.is_qualifying(obs));
        let event = self.detector.observe(observation.as_ref());
        let snapshot = self.detector.snapshot();
        let mode_change = self.scheduler.record(detected, &snapshot);

        debug!(
            rssi = observation.as_ref().map(|obs| obs.rssi),
            detected,
            mode = %self.scheduler.mode(),
            in_grace = snapshot.in_grace_period,
            "Scan cycle complete"
        );

        if let Some(event) = event {
            self.on_presence_event(event);
        }

        ScanReport {
            observation,
            detected,
            event,
            mode_change,
        }
    }

    fn on_presence_event(&mut self, event: PresenceEvent) {
        if let Some(value) = self.manual_override {
            info!(
                detected = event.present,
                reported = value,
                "Presence changed under manual override"
            );
            return;
        }
        info!(present = event.present, at_ms = event.at.as_millis(), "Presence changed");
        self.display
            .show_status(&availability_line(event.present, false));
        self.publish_status();
    }

    // =========================================================================
    // Bus and buttons
    // =========================================================================

    /// Handle one inbound bus message.
    pub fn handle_bus_message(&mut self, topic: &str, payload: &[u8]) -> MessageOutcome {
        if self.topics.classify(topic) != Some(TopicKind::Request) {
            debug!(topic, "Ignoring message on non-request topic");
            return MessageOutcome::NotForUs;
        }

        let parsed = match RequestPayload::parse(payload, self.faculty_id) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Rejected consultation request");
                self.display.show_status("Invalid request received");
                return MessageOutcome::Malformed(e);
            }
        };

        let id = parsed.request.id;
        let closes_tracked = parsed.request.status.is_terminal()
            && self.lifecycle.current().is_some_and(|current| current.id == id);
        if !self.reported_presence() && !closes_tracked {
            info!(id, "Faculty away, ignoring consultation request");
            return MessageOutcome::IgnoredAway { id };
        }

        if let Some(raw) = &parsed.unrecognized_status {
            warn!(id, status = %raw, "Unrecognised consultation status, treating as unknown");
            self.display.show_status("Invalid status received");
        }
        if parsed.truncated {
            debug!(id, "Consultation request text truncated");
        }

        let ingress = self.lifecycle.receive(parsed.request);
        match ingress {
            Ingress::Tracked | Ingress::Refreshed | Ingress::Replaced { .. } => {
                if let Some(current) = self.lifecycle.current() {
                    self.display.show_message(&current.detail_text());
                }
                if parsed.unrecognized_status.is_none() {
                    self.display.show_status("New consultation request");
                }
            }
            Ingress::Cleared { status } => {
                self.display.show_message("");
                self.display
                    .show_status(&format!("Request {id} {status}"));
            }
            Ingress::RejectedBusy { active_id, .. } => {
                self.display
                    .show_status(&format!("Busy with request {active_id}"));
            }
            Ingress::IgnoredTerminal => {}
        }

        MessageOutcome::Routed(ingress)
    }

    /// Handle a physical button press.
    pub fn handle_button(&mut self, button: ButtonCommand) -> CommandOutcome {
        let command = self.lifecycle.resolve_button(button);
        self.handle_command(command)
    }

    /// Apply a lifecycle command, publishing the resulting action.
    pub fn handle_command(&mut self, command: LifecycleCommand) -> CommandOutcome {
        let outcome = self.lifecycle.apply(command);

        match outcome {
            CommandOutcome::Transitioned { id, action, .. } => {
                self.publish_action(id, action);
                match self.lifecycle.current() {
                    Some(current) => self.display.show_message(&current.detail_text()),
                    None => self.display.show_message(""),
                }
                self.display
                    .show_status(&format!("Request {}", action.as_str()));
            }
            CommandOutcome::NoOp { command, .. } => {
                self.display
                    .show_status(no_op_line(command, self.lifecycle.current().is_some()));
            }
        }

        outcome
    }

    /// Drop the tracked consultation without publishing.
    pub fn reset_consultation(&mut self) -> Option<ConsultationRequest> {
        let dropped = self.lifecycle.reset();
        match &dropped {
            Some(request) => {
                info!(id = request.id, status = %request.status, "Consultation reset by operator");
                self.display.show_message("");
                self.display.show_status("Request cleared");
            }
            None => debug!("Consultation reset with nothing tracked"),
        }
        dropped
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// Announce the node: one status message and one heartbeat.
    ///
    /// An idle unit also shows the faculty card in the message area.
    pub fn publish_initial_status(&mut self) {
        self.display.show_status(&availability_line(
            self.reported_presence(),
            self.manual_override.is_some(),
        ));
        if self.lifecycle.current().is_none() {
            self.display
                .show_message(&faculty_card(&self.faculty_name, self.department.as_deref()));
        }
        self.publish_status();
        self.publish_heartbeat();
    }

    /// Expire grace by time and send whatever periodic messages are due.
    pub fn poll_housekeeping(&mut self) -> Housekeeping {
        let now = self.clock.now();
        let mut report = Housekeeping::default();

        if let Some(event) = self.detector.poll() {
            self.on_presence_event(event);
            report.event = Some(event);
        }

        if remaining(now, self.last_status_at, self.status_refresh).is_zero() {
            debug!("Periodic status refresh");
            self.publish_status();
            report.status_refreshed = true;
        }
        if remaining(now, self.last_heartbeat_at, self.heartbeat_every).is_zero() {
            self.publish_heartbeat();
            report.heartbeat_sent = true;
        }

        report
    }

    /// Time until [`Self::poll_housekeeping`] has something to do.
    #[must_use]
    pub fn time_until_housekeeping(&self) -> Duration {
        let now = self.clock.now();
        let periodic = remaining(now, self.last_status_at, self.status_refresh)
            .min(remaining(now, self.last_heartbeat_at, self.heartbeat_every));
        self.detector
            .grace_remaining()
            .map_or(periodic, |grace| grace.min(periodic))
    }

    /// Read-only view for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> DeskSnapshot {
        DeskSnapshot {
            faculty_id: self.faculty_id,
            faculty_name: self.faculty_name.clone(),
            reported_present: self.reported_presence(),
            source: self.presence_source(),
            manual_override: self.manual_override,
            presence: self.detector.snapshot(),
            scan_mode: self.scheduler.mode(),
            consultation: self.lifecycle.current().cloned(),
            uptime_ms: self.uptime().as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    /// Topics this unit publishes and subscribes on.
    #[must_use]
    pub const fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Transport, for inspection.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Display, for inspection.
    #[must_use]
    pub const fn display(&self) -> &D {
        &self.display
    }

    /// Scanner, for inspection.
    #[must_use]
    pub const fn scanner(&self) -> &S {
        &self.scanner
    }

    fn uptime(&self) -> Duration {
        self.clock.now().saturating_elapsed_since(self.started_at)
    }

    fn status_payload(&self) -> StatusPayload {
        let present = self.reported_presence();
        let in_grace = self.detector.is_in_grace_period();
        StatusPayload {
            present,
            status: Availability::from_present(present),
            in_grace_period: in_grace,
            grace_remaining_ms: self
                .detector
                .grace_remaining()
                .map(|remaining| remaining.as_millis().try_into().unwrap_or(u64::MAX)),
            faculty_id: self.faculty_id,
            faculty_name: self.faculty_name.clone(),
            source: self.presence_source(),
            timestamp_ms: self.clock.now().as_millis(),
        }
    }

    fn publish_status(&mut self) {
        let payload = self.status_payload();
        self.last_status_at = Some(self.clock.now());
        if let Err(e) = self.transport.publish_json(&self.topics.status, &payload) {
            let err = DeskError::from(e);
            warn!(
                error = %err,
                code = err.error_code(),
                recoverable = err.is_recoverable(),
                present = payload.present,
                "Failed to publish status"
            );
        }
    }

    fn publish_action(&mut self, id: u64, action: ConsultationAction) {
        let payload = ActionPayload {
            action,
            consultation_id: id,
        };
        if let Err(e) = self.transport.publish_json(&self.topics.response, &payload) {
            let err = DeskError::from(e);
            warn!(
                error = %err,
                code = err.error_code(),
                recoverable = err.is_recoverable(),
                id,
                action = action.as_str(),
                "Failed to publish consultation action, keeping local state"
            );
        }
    }

    fn publish_heartbeat(&mut self) {
        self.heartbeat_sequence += 1;
        self.last_heartbeat_at = Some(self.clock.now());
        let payload = HeartbeatPayload {
            faculty_id: self.faculty_id,
            boot_id: self.boot_id,
            sequence: self.heartbeat_sequence,
            uptime_ms: self.uptime().as_millis().try_into().unwrap_or(u64::MAX),
            present: self.reported_presence(),
            scan_mode: self.scheduler.mode(),
            consultation_status: self.lifecycle.status(),
            sent_at_utc: chrono::Utc::now(),
        };
        if let Err(e) = self.transport.publish_json(&self.topics.heartbeat, &payload) {
            let err = DeskError::from(e);
            warn!(
                error = %err,
                code = err.error_code(),
                recoverable = err.is_recoverable(),
                sequence = payload.sequence,
                "Failed to publish heartbeat"
            );
        }
    }
}

fn remaining(now: Timestamp, last: Option<Timestamp>, every: Duration) -> Duration {
    last.map_or(Duration::ZERO, |last| {
        every.saturating_sub(now.saturating_elapsed_since(last))
    })
}

const fn no_op_line(command: LifecycleCommand, has_request: bool) -> &'static str {
    if !has_request {
        return "No active request";
    }
    match command {
        LifecycleCommand::Accept => "No pending request to accept",
        LifecycleCommand::Reject => "No pending request to reject",
        LifecycleCommand::Start => "Request not accepted yet",
        LifecycleCommand::Complete => "Consultation not started",
        LifecycleCommand::Cancel => "Nothing to cancel",
    }
}
