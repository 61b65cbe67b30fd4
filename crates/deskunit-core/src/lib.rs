//! # deskunit-core
//!
//! Presence detection and consultation handling for a faculty desk unit.
//!
//! This crate provides:
//! - BLE beacon scanning behind a narrow scanner trait
//! - A hysteresis and grace-period presence detector
//! - Adaptive scan scheduling driven by detection confidence
//! - A single-slot consultation request lifecycle
//! - Message bus topics and payloads, and the transport/display seams
//!
//! ## Architecture
//!
//! - [`bluetooth`] - Beacon scanner trait, BlueZ scanner, scripted mock
//! - [`presence`] - Presence detector state machine
//! - [`scheduler`] - Scan mode and cadence selection
//! - [`consultation`] - Consultation lifecycle state machine
//! - [`bus`] - Topics, wire payloads and the [`Transport`] trait
//! - [`display`] - The [`Display`] trait
//! - [`desk`] - [`DeskUnit`], which owns and drives all of the above
//! - [`clock`] - Monotonic time abstraction
//! - [`config`] - Node configuration loading, saving and validation
//! - [`error`] - Unified error types
//! - [`types`] - Shared value types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod bus;
pub mod clock;
pub mod config;
pub mod consultation;
pub mod desk;
pub mod display;
pub mod error;
pub mod presence;
pub mod scheduler;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerScanner;
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use bluetooth::MockScanner;
pub use bluetooth::{BeaconScanner, BluetoothError, BluetoothResult};
pub use bus::{
    ActionPayload, Availability, HeartbeatPayload, PresenceSource, RequestParseError,
    RequestPayload, StatusPayload, Topics, Transport, TransportError,
};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::{
    default_config_path, is_valid_mac_address, BluetoothConfig, BusConfig, ConfigError,
    ConfigResult, FacultyConfig, NodeConfig, PresenceConfig, SchedulerConfig, ServerConfig,
};
pub use consultation::{
    ButtonCommand, CommandOutcome, ConsultationAction, ConsultationLifecycle,
    ConsultationRequest, ConsultationStatus, Ingress, LifecycleCommand,
};
pub use desk::{DeskSnapshot, DeskUnit, Housekeeping, MessageOutcome, ScanReport};
pub use display::Display;
pub use error::{DeskError, Result};
pub use presence::{DetectorConfig, PresenceDetector, PresenceEvent, PresenceSnapshot, PresenceState};
pub use scheduler::{AdaptiveScheduler, ScanCadence, ScanMode};
pub use types::BeaconObservation;
