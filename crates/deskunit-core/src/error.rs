//! Unified error type for the desk unit core library.
//!
//! Each module keeps its own error enum ([`BluetoothError`], [`ConfigError`],
//! [`TransportError`]). [`DeskError`] wraps whichever of them crosses a
//! component boundary and gives every failure a stable code for log fields.
//!
//! Expected operational noise (a missed scan, a malformed bus message, a
//! button press with nothing to act on) is never an error here: those are
//! modelled as `Option`s or state no-ops by the owning state machine.

use thiserror::Error;

use crate::bluetooth::BluetoothError;
use crate::bus::TransportError;
use crate::config::ConfigError;

/// The unified error type for desk unit operations.
#[derive(Debug, Error)]
pub enum DeskError {
    /// Radio setup failed.
    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),

    /// Configuration could not be loaded, validated or written.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A publish did not reach the bus.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A specialized [`Result`] type for desk unit operations.
pub type Result<T> = std::result::Result<T, DeskError>;

impl DeskError {
    /// Machine-readable code, stable across message wording changes.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Bluetooth(BluetoothError::AdapterNotFound) => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::Bluetooth(BluetoothError::AdapterPoweredOff) => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::Bluetooth(BluetoothError::InvalidAddress { .. }) => "INVALID_BEACON_ADDRESS",
            Self::Bluetooth(
                BluetoothError::SessionInitFailed { .. } | BluetoothError::DiscoveryFailed { .. },
            ) => "BLUETOOTH_UNAVAILABLE",
            Self::Config(ConfigError::NotFound(_)) => "CONFIG_NOT_FOUND",
            Self::Config(ConfigError::LoadError(_) | ConfigError::SerializeError(_)) => {
                "CONFIG_PARSE_ERROR"
            }
            Self::Config(ConfigError::WriteError { .. }) => "CONFIG_WRITE_ERROR",
            Self::Config(
                ConfigError::ValidationError { .. } | ConfigError::MultipleValidationErrors(_),
            ) => "CONFIG_VALIDATION_ERROR",
            Self::Transport(TransportError::Backpressure { .. }) => "TRANSPORT_BACKPRESSURE",
            Self::Transport(TransportError::Unavailable { .. }) => "TRANSPORT_UNAVAILABLE",
            Self::Transport(TransportError::Encode(_)) => "TRANSPORT_ENCODE_FAILED",
        }
    }

    /// Whether retrying later may succeed without operator action.
    ///
    /// The node keeps running through recoverable publish failures and
    /// exits on anything else during startup.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Backpressure { .. } | TransportError::Unavailable { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codes_follow_source() {
        let err: DeskError = TransportError::Backpressure { capacity: 16 }.into();
        assert_eq!(err.error_code(), "TRANSPORT_BACKPRESSURE");
        assert!(err.is_recoverable());

        let err: DeskError = ConfigError::NotFound(PathBuf::from("/etc/deskunit/x.toml")).into();
        assert_eq!(err.error_code(), "CONFIG_NOT_FOUND");
        assert!(!err.is_recoverable());

        let err: DeskError = BluetoothError::InvalidAddress {
            address: "zz".into(),
        }
        .into();
        assert_eq!(err.error_code(), "INVALID_BEACON_ADDRESS");
    }

    #[test]
    fn test_validation_errors_share_a_code() {
        let single: DeskError = ConfigError::ValidationError {
            field: "faculty.id",
            message: "must be positive".into(),
        }
        .into();
        let many: DeskError = ConfigError::MultipleValidationErrors(vec![]).into();
        assert_eq!(single.error_code(), many.error_code());
    }

    #[test]
    fn test_display_is_the_source_message() {
        let err: DeskError = TransportError::Unavailable {
            message: "link down".into(),
        }
        .into();
        assert_eq!(err.to_string(), "transport unavailable: link down");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<DeskError>();
        assert_sync::<DeskError>();
    }
}
