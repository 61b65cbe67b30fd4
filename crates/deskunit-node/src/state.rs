//! Application state shared across handlers.
//!
//! Handlers never touch the desk unit directly. They read the latest
//! snapshots published by the control loop and queue [`Inbound`] work for it.

use std::sync::Arc;

use deskunit_core::DeskSnapshot;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::gateway::{Inbound, Outbox, OutboundMessage, PanelText};

/// Shared application state.
pub type SharedState = Arc<AppState>;

/// Why inbound work could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The control loop is behind.
    #[error("control loop inbox is full ({capacity} items)")]
    InboxFull {
        /// Inbox capacity.
        capacity: usize,
    },

    /// The control loop has exited.
    #[error("control loop is not running")]
    LoopStopped,
}

/// Channels between the HTTP gateway and the control loop.
#[derive(Debug)]
pub struct AppState {
    inbox: mpsc::Sender<Inbound>,
    snapshot: watch::Receiver<DeskSnapshot>,
    panel: watch::Receiver<PanelText>,
    outbox: Arc<Outbox>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        inbox: mpsc::Sender<Inbound>,
        snapshot: watch::Receiver<DeskSnapshot>,
        panel: watch::Receiver<PanelText>,
        outbox: Arc<Outbox>,
    ) -> SharedState {
        Arc::new(Self {
            inbox,
            snapshot,
            panel,
            outbox,
        })
    }

    /// Latest desk snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DeskSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current panel text.
    #[must_use]
    pub fn panel(&self) -> PanelText {
        self.panel.borrow().clone()
    }

    /// Recently published messages.
    #[must_use]
    pub fn outbox(&self) -> Vec<OutboundMessage> {
        self.outbox.recent()
    }

    /// Outbox history size.
    #[must_use]
    pub fn outbox_capacity(&self) -> usize {
        self.outbox.capacity()
    }

    /// Queue work for the control loop without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] if the inbox is full or the loop has stopped.
    pub fn submit(&self, item: Inbound) -> Result<(), SubmitError> {
        self.inbox.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::InboxFull {
                capacity: self.inbox.max_capacity(),
            },
            TrySendError::Closed(_) => SubmitError::LoopStopped,
        })
    }
}
