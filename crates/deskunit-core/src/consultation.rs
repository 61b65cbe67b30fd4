//! Consultation request lifecycle.
//!
//! A single-slot state machine:
//!
//! ```text
//! NONE --(request received)--> PENDING
//! PENDING --accept--> ACCEPTED --start--> STARTED --complete--> NONE
//! PENDING --reject--> NONE
//! ACCEPTED --cancel--> NONE
//! STARTED  --cancel--> NONE
//! ```
//!
//! Every other (state, command) pair is a no-op. The lifecycle never talks
//! to the bus itself; the desk controller publishes the [`ConsultationAction`]
//! carried by a [`CommandOutcome::Transitioned`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::types::BoundedText;

/// Student label, at most 48 characters.
pub type StudentLabel = BoundedText<48>;

/// Request message, at most 256 characters.
pub type RequestMessage = BoundedText<256>;

/// Consultation status as carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    /// Waiting for the faculty member.
    Pending,
    /// Accepted, not yet started.
    Accepted,
    /// In progress.
    Started,
    /// Finished.
    Completed,
    /// Cancelled after acceptance.
    Cancelled,
    /// Declined.
    Rejected,
    /// Unrecognised status received on an otherwise valid request.
    Unknown,
}

impl ConsultationStatus {
    /// Parse the closed wire set. Returns `None` for anything else.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        Some(match raw {
            "pending" => Self::Pending,
            "accepted" => Self::Accepted,
            "started" => Self::Started,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "rejected" => Self::Rejected,
            "unknown" => Self::Unknown,
            _ => return None,
        })
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this status ends a consultation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action published in response to an accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationAction {
    /// `PENDING → ACCEPTED`.
    Accepted,
    /// `PENDING → NONE`.
    Rejected,
    /// `ACCEPTED → STARTED`.
    Started,
    /// `STARTED → NONE`.
    Completed,
    /// `ACCEPTED | STARTED → NONE`.
    Cancelled,
}

impl ConsultationAction {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommand {
    /// Accept a pending request.
    Accept,
    /// Reject a pending request.
    Reject,
    /// Start an accepted consultation.
    Start,
    /// Complete a started consultation.
    Complete,
    /// Cancel an accepted or started consultation.
    Cancel,
}

impl LifecycleCommand {
    /// All commands, for exhaustive checks.
    pub const ALL: [Self; 5] = [
        Self::Accept,
        Self::Reject,
        Self::Start,
        Self::Complete,
        Self::Cancel,
    ];
}

/// The two physical inputs on the desk unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ButtonCommand {
    /// Positive button: accept, start or complete.
    Accept,
    /// Negative button: reject or cancel.
    Reject,
}

/// The tracked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRequest {
    /// Externally assigned id, always positive.
    pub id: u64,
    /// Who asked.
    pub student_label: StudentLabel,
    /// What they asked.
    pub message: RequestMessage,
    /// Current status.
    pub status: ConsultationStatus,
}

impl ConsultationRequest {
    /// Multi-line detail for the display.
    #[must_use]
    pub fn detail_text(&self) -> String {
        format!(
            "Request ID: {}\nStatus: {}\nStudent: {}\nMessage: {}",
            self.id,
            self.status.as_str().to_ascii_uppercase(),
            self.student_label,
            self.message
        )
    }
}

/// What happened to an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingress {
    /// The slot was empty and now tracks the request.
    Tracked,
    /// Same id as the tracked request; label and message were updated.
    Refreshed,
    /// An unanswered request was replaced.
    Replaced {
        /// Id of the dropped request.
        previous_id: u64,
    },
    /// The tracked request reached a terminal status remotely.
    Cleared {
        /// Terminal status received.
        status: ConsultationStatus,
    },
    /// A consultation is already accepted or started.
    RejectedBusy {
        /// Id of the request holding the slot.
        active_id: u64,
        /// Its status.
        active_status: ConsultationStatus,
    },
    /// Terminal status for a request that is not tracked.
    IgnoredTerminal,
}

impl Ingress {
    /// Whether the slot now holds the inbound request.
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        matches!(
            self,
            Self::Tracked | Self::Refreshed | Self::Replaced { .. }
        )
    }
}

/// Result of applying a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A table transition happened and `action` must be published.
    Transitioned {
        /// Request id.
        id: u64,
        /// Action to publish.
        action: ConsultationAction,
        /// Status after the transition; `None` when the slot was cleared.
        status: Option<ConsultationStatus>,
    },
    /// Not in the transition table; nothing changed.
    NoOp {
        /// Rejected command.
        command: LifecycleCommand,
        /// Status at the time.
        status: Option<ConsultationStatus>,
    },
}

/// Single-slot consultation state machine.
#[derive(Debug, Default)]
pub struct ConsultationLifecycle {
    slot: Option<ConsultationRequest>,
}

impl ConsultationLifecycle {
    /// Empty lifecycle.
    #[must_use]
    pub const fn new() -> Self {
        Self { slot: None }
    }

    /// The tracked request, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&ConsultationRequest> {
        self.slot.as_ref()
    }

    /// Status of the tracked request, `None` when idle.
    #[must_use]
    pub fn status(&self) -> Option<ConsultationStatus> {
        self.slot.as_ref().map(|request| request.status)
    }

    /// Route an inbound request into the slot.
    ///
    /// A redelivery of the tracked id updates the label and message only;
    /// the local status moves through [`Self::apply`] or a terminal status.
    /// Unanswered requests (`pending`, `unknown`) are replaced by a newer
    /// one; an accepted or started consultation keeps the slot and the
    /// newcomer is rejected.
    pub fn receive(&mut self, request: ConsultationRequest) -> Ingress {
        let tracked = self.slot.as_ref().map(|r| (r.id, r.status));

        match tracked {
            Some((id, _)) if id == request.id && request.status.is_terminal() => {
                info!(id, status = %request.status, "Consultation closed remotely");
                self.slot = None;
                Ingress::Cleared {
                    status: request.status,
                }
            }
            Some((id, status)) if id == request.id => {
                if request.status != status {
                    debug!(
                        id,
                        local = %status,
                        remote = %request.status,
                        "Keeping local status on redelivered request"
                    );
                }
                info!(id, "Consultation request refreshed");
                if let Some(current) = self.slot.as_mut() {
                    current.student_label = request.student_label;
                    current.message = request.message;
                }
                Ingress::Refreshed
            }
            _ if request.status.is_terminal() => {
                info!(
                    id = request.id,
                    status = %request.status,
                    "Ignoring terminal status for untracked consultation"
                );
                Ingress::IgnoredTerminal
            }
            Some((active_id, active_status))
                if matches!(
                    active_status,
                    ConsultationStatus::Accepted | ConsultationStatus::Started
                ) =>
            {
                warn!(
                    id = request.id,
                    active_id,
                    active_status = %active_status,
                    "Consultation in progress, rejecting new request"
                );
                Ingress::RejectedBusy {
                    active_id,
                    active_status,
                }
            }
            Some((previous_id, _)) => {
                info!(
                    id = request.id,
                    previous_id, "Replacing unanswered consultation request"
                );
                self.slot = Some(request);
                Ingress::Replaced { previous_id }
            }
            None => {
                info!(id = request.id, status = %request.status, "Consultation request received");
                self.slot = Some(request);
                Ingress::Tracked
            }
        }
    }

    /// Apply a command against the transition table.
    pub fn apply(&mut self, command: LifecycleCommand) -> CommandOutcome {
        use ConsultationAction as A;
        use ConsultationStatus as S;
        use LifecycleCommand as Cmd;

        let status = self.status();
        let transition = match (status, command) {
            (Some(S::Pending), Cmd::Accept) => Some((A::Accepted, Some(S::Accepted))),
            (Some(S::Pending), Cmd::Reject) => Some((A::Rejected, None)),
            (Some(S::Accepted), Cmd::Start) => Some((A::Started, Some(S::Started))),
            (Some(S::Accepted | S::Started), Cmd::Cancel) => Some((A::Cancelled, None)),
            (Some(S::Started), Cmd::Complete) => Some((A::Completed, None)),
            _ => None,
        };

        let (Some((action, next)), Some(request)) = (transition, self.slot.as_mut()) else {
            warn!(?command, status = ?status, "Command not valid in current consultation state");
            return CommandOutcome::NoOp { command, status };
        };

        let id = request.id;
        match next {
            Some(next) => request.status = next,
            None => self.slot = None,
        }
        info!(id, action = action.as_str(), "Consultation transition");

        CommandOutcome::Transitioned {
            id,
            action,
            status: next,
        }
    }

    /// Map a physical button to the command it means right now.
    #[must_use]
    pub fn resolve_button(&self, button: ButtonCommand) -> LifecycleCommand {
        use ConsultationStatus as S;

        match (self.status(), button) {
            (Some(S::Accepted), ButtonCommand::Accept) => LifecycleCommand::Start,
            (Some(S::Started), ButtonCommand::Accept) => LifecycleCommand::Complete,
            (Some(S::Accepted | S::Started), ButtonCommand::Reject) => LifecycleCommand::Cancel,
            (_, ButtonCommand::Accept) => LifecycleCommand::Accept,
            (_, ButtonCommand::Reject) => LifecycleCommand::Reject,
        }
    }

    /// Drop the tracked request without publishing anything.
    pub fn reset(&mut self) -> Option<ConsultationRequest> {
        self.slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64, status: ConsultationStatus) -> ConsultationRequest {
        ConsultationRequest {
            id,
            student_label: StudentLabel::truncating("A"),
            message: RequestMessage::truncating("m"),
            status,
        }
    }

    fn lifecycle_in(status: Option<ConsultationStatus>) -> ConsultationLifecycle {
        let mut lifecycle = ConsultationLifecycle::new();
        if let Some(status) = status {
            lifecycle.slot = Some(request(7, status));
        }
        lifecycle
    }

    #[test]
    fn test_status_parse_is_closed() {
        assert_eq!(
            ConsultationStatus::from_wire("pending"),
            Some(ConsultationStatus::Pending)
        );
        assert_eq!(
            ConsultationStatus::from_wire("unknown"),
            Some(ConsultationStatus::Unknown)
        );
        assert_eq!(ConsultationStatus::from_wire("PENDING"), None);
        assert_eq!(ConsultationStatus::from_wire("bogus"), None);
    }

    #[test]
    fn test_happy_path_accept_start_complete() {
        let mut lifecycle = ConsultationLifecycle::new();
        assert_eq!(
            lifecycle.receive(request(7, ConsultationStatus::Pending)),
            Ingress::Tracked
        );

        let accept = lifecycle.apply(LifecycleCommand::Accept);
        assert_eq!(
            accept,
            CommandOutcome::Transitioned {
                id: 7,
                action: ConsultationAction::Accepted,
                status: Some(ConsultationStatus::Accepted),
            }
        );
        lifecycle.apply(LifecycleCommand::Start);
        assert_eq!(lifecycle.status(), Some(ConsultationStatus::Started));

        let complete = lifecycle.apply(LifecycleCommand::Complete);
        assert!(matches!(
            complete,
            CommandOutcome::Transitioned {
                action: ConsultationAction::Completed,
                status: None,
                ..
            }
        ));
        assert!(lifecycle.current().is_none());
    }

    /// Every (state, command) pair outside the table leaves the slot alone.
    #[test]
    fn test_transition_table_conformance() {
        use ConsultationAction as A;
        use ConsultationStatus as S;
        use LifecycleCommand as Cmd;

        let states = [
            None,
            Some(S::Pending),
            Some(S::Accepted),
            Some(S::Started),
            Some(S::Unknown),
        ];
        let table = [
            (S::Pending, Cmd::Accept, A::Accepted, Some(S::Accepted)),
            (S::Pending, Cmd::Reject, A::Rejected, None),
            (S::Accepted, Cmd::Start, A::Started, Some(S::Started)),
            (S::Accepted, Cmd::Cancel, A::Cancelled, None),
            (S::Started, Cmd::Complete, A::Completed, None),
            (S::Started, Cmd::Cancel, A::Cancelled, None),
        ];

        for state in states {
            for command in LifecycleCommand::ALL {
                let mut lifecycle = lifecycle_in(state);
                let before = lifecycle.current().cloned();
                let outcome = lifecycle.apply(command);

                let expected = table
                    .iter()
                    .find(|(s, c, _, _)| Some(*s) == state && *c == command);
                match expected {
                    Some(&(_, _, action, next)) => {
                        assert_eq!(
                            outcome,
                            CommandOutcome::Transitioned {
                                id: 7,
                                action,
                                status: next
                            },
                            "{state:?} + {command:?}"
                        );
                        assert_eq!(lifecycle.status(), next);
                    }
                    None => {
                        assert_eq!(
                            outcome,
                            CommandOutcome::NoOp {
                                command,
                                status: state
                            },
                            "{state:?} + {command:?}"
                        );
                        assert_eq!(lifecycle.current().cloned(), before);
                    }
                }
            }
        }
    }

    #[test]
    fn test_pending_request_is_replaced() {
        let mut lifecycle = ConsultationLifecycle::new();
        lifecycle.receive(request(7, ConsultationStatus::Pending));

        assert_eq!(
            lifecycle.receive(request(8, ConsultationStatus::Pending)),
            Ingress::Replaced { previous_id: 7 }
        );
        assert_eq!(lifecycle.current().map(|r| r.id), Some(8));
    }

    #[test]
    fn test_active_consultation_rejects_newcomer() {
        let mut lifecycle = lifecycle_in(Some(ConsultationStatus::Started));

        let ingress = lifecycle.receive(request(9, ConsultationStatus::Pending));
        assert_eq!(
            ingress,
            Ingress::RejectedBusy {
                active_id: 7,
                active_status: ConsultationStatus::Started
            }
        );
        assert!(!ingress.is_tracked());
        assert_eq!(lifecycle.current().map(|r| r.id), Some(7));
    }

    #[test]
    fn test_redelivery_refreshes_and_terminal_clears() {
        let mut lifecycle = lifecycle_in(Some(ConsultationStatus::Pending));

        let mut updated = request(7, ConsultationStatus::Accepted);
        updated.message = RequestMessage::truncating("updated");
        assert_eq!(lifecycle.receive(updated), Ingress::Refreshed);
        assert_eq!(lifecycle.current().unwrap().message.as_str(), "updated");
        assert_eq!(lifecycle.status(), Some(ConsultationStatus::Pending));

        assert_eq!(
            lifecycle.receive(request(99, ConsultationStatus::Cancelled)),
            Ingress::IgnoredTerminal
        );
        assert_eq!(
            lifecycle.receive(request(7, ConsultationStatus::Cancelled)),
            Ingress::Cleared {
                status: ConsultationStatus::Cancelled
            }
        );
        assert!(lifecycle.current().is_none());
    }

    #[test]
    fn test_redelivery_never_moves_status() {
        use ConsultationStatus as S;

        let mut lifecycle = ConsultationLifecycle::new();
        lifecycle.receive(request(7, S::Pending));
        lifecycle.apply(LifecycleCommand::Accept);
        lifecycle.apply(LifecycleCommand::Start);

        for remote in [S::Pending, S::Accepted, S::Unknown] {
            assert_eq!(lifecycle.receive(request(7, remote)), Ingress::Refreshed);
            assert_eq!(lifecycle.status(), Some(S::Started), "{remote:?}");
        }
        assert_eq!(
            lifecycle.apply(LifecycleCommand::Accept),
            CommandOutcome::NoOp {
                command: LifecycleCommand::Accept,
                status: Some(S::Started)
            }
        );
    }

    #[test]
    fn test_buttons_follow_status() {
        use ConsultationStatus as S;

        let cases = [
            (None, ButtonCommand::Accept, LifecycleCommand::Accept),
            (Some(S::Pending), ButtonCommand::Accept, LifecycleCommand::Accept),
            (Some(S::Pending), ButtonCommand::Reject, LifecycleCommand::Reject),
            (Some(S::Accepted), ButtonCommand::Accept, LifecycleCommand::Start),
            (Some(S::Accepted), ButtonCommand::Reject, LifecycleCommand::Cancel),
            (Some(S::Started), ButtonCommand::Accept, LifecycleCommand::Complete),
            (Some(S::Started), ButtonCommand::Reject, LifecycleCommand::Cancel),
        ];
        for (status, button, expected) in cases {
            assert_eq!(lifecycle_in(status).resolve_button(button), expected);
        }
    }

    #[test]
    fn test_reset_clears_without_outcome() {
        let mut lifecycle = lifecycle_in(Some(ConsultationStatus::Accepted));
        assert_eq!(lifecycle.reset().map(|r| r.id), Some(7));
        assert!(lifecycle.status().is_none());
    }

    #[test]
    fn test_detail_text() {
        let text = request(7, ConsultationStatus::Pending).detail_text();
        assert_eq!(text, "Request ID: 7\nStatus: PENDING\nStudent: A\nMessage: m");
    }
}
