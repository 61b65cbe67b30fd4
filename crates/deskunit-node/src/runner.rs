//! The control loop.
//!
//! One cooperative loop owns the [`DeskUnit`]. Each pass it scans if the
//! scheduler says so, runs housekeeping, publishes a snapshot, then waits
//! for whichever comes first: shutdown, one inbound item, or the next
//! deadline. Only the scan itself suspends the loop for any length of time.

use std::future::Future;

use deskunit_core::{
    BeaconScanner, Clock, DeskSnapshot, DeskUnit, Display, MessageOutcome, Transport,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::gateway::Inbound;

/// Drive `unit` until `shutdown` resolves, then hand it back.
pub async fn run<S, T, D, C, F>(
    mut unit: DeskUnit<S, T, D, C>,
    mut inbox: mpsc::Receiver<Inbound>,
    snapshots: watch::Sender<DeskSnapshot>,
    shutdown: F,
) -> DeskUnit<S, T, D, C>
where
    S: BeaconScanner,
    T: Transport,
    D: Display,
    C: Clock + Clone,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut inbox_open = true;

    unit.publish_initial_status();
    info!(topics = ?unit.topics(), "Control loop started");

    loop {
        if unit.scan_due() {
            let report = unit.run_scan_cycle().await;
            if let Some(mode) = report.mode_change {
                debug!(%mode, "Scan mode changed");
            }
        }
        unit.poll_housekeeping();
        snapshots.send_replace(unit.snapshot());

        let wait = unit
            .time_until_next_scan()
            .min(unit.time_until_housekeeping());

        tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("Shutdown requested, stopping control loop");
                break;
            }
            item = inbox.recv(), if inbox_open => match item {
                Some(item) => dispatch(&mut unit, item),
                None => {
                    warn!("Gateway inbox closed, continuing without inbound traffic");
                    inbox_open = false;
                }
            },
            () = tokio::time::sleep(wait) => {}
        }
    }

    snapshots.send_replace(unit.snapshot());
    unit
}

fn dispatch<S, T, D, C>(unit: &mut DeskUnit<S, T, D, C>, item: Inbound)
where
    S: BeaconScanner,
    T: Transport,
    D: Display,
    C: Clock + Clone,
{
    match item {
        Inbound::BusMessage { topic, payload } => {
            match unit.handle_bus_message(&topic, &payload) {
                MessageOutcome::Routed(ingress) => debug!(?ingress, "Request routed"),
                MessageOutcome::IgnoredAway { id } => debug!(id, "Request ignored"),
                MessageOutcome::Malformed(_) | MessageOutcome::NotForUs => {}
            }
        }
        Inbound::Button(button) => {
            let outcome = unit.handle_button(button);
            debug!(?button, ?outcome, "Button handled");
        }
        Inbound::Override(value) => {
            unit.set_manual_override(value);
        }
        Inbound::Reset => {
            if let Some(dropped) = unit.reset_consultation() {
                debug!(id = dropped.id, "Consultation slot cleared");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::{outbound, PanelDisplay};
    use deskunit_core::bluetooth::MockScanner;
    use deskunit_core::{ButtonCommand, ConsultationStatus, ManualClock, NodeConfig};

    const BEACON: &str = "51:00:25:04:02:A2";

    #[tokio::test(start_paused = true)]
    async fn test_loop_processes_inbox_in_order() {
        let mut config = NodeConfig::default();
        config.bluetooth.target_address = BEACON.to_string();
        let clock = ManualClock::new();

        let scanner = MockScanner::new(BEACON, clock.clone()).unwrap();
        let (transport, outbox, _) = outbound(&config.bus);
        let (display, panel) = PanelDisplay::new();
        let unit = DeskUnit::new(&config, scanner, transport, display, clock);
        let (snapshot_tx, snapshot_rx) = watch::channel(unit.snapshot());
        let (inbox_tx, inbox_rx) = mpsc::channel(8);

        let request_topic = unit.topics().request.clone();
        inbox_tx.try_send(Inbound::Override(Some(true))).unwrap();
        inbox_tx
            .try_send(Inbound::BusMessage {
                topic: request_topic,
                payload: br#"{"id":4,"studentLabel":"Ada","message":"Thesis"}"#.to_vec(),
            })
            .unwrap();
        inbox_tx.try_send(Inbound::Button(ButtonCommand::Accept)).unwrap();
        drop(inbox_tx);

        let unit = run(
            unit,
            inbox_rx,
            snapshot_tx,
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;

        let snapshot = snapshot_rx.borrow().clone();
        assert!(snapshot.reported_present);
        assert_eq!(
            snapshot.consultation.map(|c| c.status),
            Some(ConsultationStatus::Accepted)
        );
        assert_eq!(unit.scanner().requested_windows().len(), 1);

        let topics: Vec<_> = outbox.recent().into_iter().map(|m| m.topic).collect();
        assert!(topics.iter().any(|t| t.ends_with("/response")));
        assert!(topics.iter().any(|t| t.ends_with("/heartbeat")));
        assert_eq!(panel.borrow().status_line, "Request accepted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reset_clears_slot_silently() {
        let mut config = NodeConfig::default();
        config.bluetooth.target_address = BEACON.to_string();
        let clock = ManualClock::new();

        let scanner = MockScanner::new(BEACON, clock.clone()).unwrap();
        let (transport, outbox, _) = outbound(&config.bus);
        let (display, panel) = PanelDisplay::new();
        let unit = DeskUnit::new(&config, scanner, transport, display, clock);
        let (snapshot_tx, snapshot_rx) = watch::channel(unit.snapshot());
        let (inbox_tx, inbox_rx) = mpsc::channel(8);

        let request_topic = unit.topics().request.clone();
        inbox_tx.try_send(Inbound::Override(Some(true))).unwrap();
        inbox_tx
            .try_send(Inbound::BusMessage {
                topic: request_topic,
                payload: br#"{"id":5,"studentLabel":"Ada","message":"Lab"}"#.to_vec(),
            })
            .unwrap();
        inbox_tx.try_send(Inbound::Button(ButtonCommand::Accept)).unwrap();
        inbox_tx.try_send(Inbound::Reset).unwrap();
        drop(inbox_tx);

        run(
            unit,
            inbox_rx,
            snapshot_tx,
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;

        assert!(snapshot_rx.borrow().consultation.is_none());
        let responses = outbox
            .recent()
            .into_iter()
            .filter(|m| m.topic.ends_with("/response"))
            .count();
        assert_eq!(responses, 1);
        assert_eq!(panel.borrow().status_line, "Request cleared");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_publishes_on_configured_topics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut saved = NodeConfig::default();
        saved.faculty.id = 9;
        saved.bus.namespace = "lab".to_string();
        saved.bluetooth.target_address = BEACON.to_string();
        saved.save(&path).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        let clock = ManualClock::new();
        let mut scanner = MockScanner::new(BEACON, clock.clone()).unwrap();
        scanner.set_fallback(Some(-50));
        let (transport, outbox, _) = outbound(&config.bus);
        let (display, _panel) = PanelDisplay::new();
        let unit = DeskUnit::new(&config, scanner, transport, display, clock);
        let (snapshot_tx, _snapshot_rx) = watch::channel(unit.snapshot());
        let (_inbox_tx, inbox_rx) = mpsc::channel(1);

        run(
            unit,
            inbox_rx,
            snapshot_tx,
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;

        let messages = outbox.recent();
        assert!(!messages.is_empty());
        assert!(messages
            .iter()
            .all(|m| m.topic.starts_with("lab/faculty/9/")));
    }
}
