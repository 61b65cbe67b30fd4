//! Bluetooth Low Energy beacon scanning.
//!
//! This module provides:
//! - The [`BeaconScanner`] seam the desk controller scans through
//! - [`BluerScanner`], a BlueZ-backed scanner (feature `bluetooth`)
//! - [`MockScanner`], a scripted scanner for tests and simulation
//!
//! A scan either yields the strongest sighting of the configured beacon
//! within the scan window or nothing. Radio failures are logged here and
//! degrade to "no observation"; they never propagate to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::types::BeaconObservation;

/// Bluetooth errors raised while setting up or driving the radio.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No adapter could be opened.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter refused to power on.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The configured beacon address does not parse.
    #[error("invalid Bluetooth address: {address}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },

    /// The BlueZ session could not be opened.
    #[error("failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Underlying error text.
        message: String,
    },

    /// Discovery could not be started or was interrupted.
    #[error("Bluetooth discovery failed: {message}")]
    DiscoveryFailed {
        /// Underlying error text.
        message: String,
    },
}

/// Result alias for Bluetooth operations.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// A bounded-duration radio scan for one target beacon.
///
/// Callers must not start another scan until the previous call has returned.
#[allow(async_fn_in_trait)]
pub trait BeaconScanner {
    /// Scan for at most `window` and return the strongest sighting of the
    /// target beacon, or `None` if it was not seen or the radio failed.
    async fn scan(&mut self, window: Duration) -> Option<BeaconObservation>;
}

/// Normalise a configured address to upper-case, validating its format.
///
/// # Errors
///
/// Returns [`BluetoothError::InvalidAddress`] if the address is malformed.
pub fn normalize_address(address: &str) -> BluetoothResult<String> {
    if crate::config::is_valid_mac_address(address) {
        Ok(address.to_ascii_uppercase())
    } else {
        Err(BluetoothError::InvalidAddress {
            address: address.to_string(),
        })
    }
}

#[cfg(feature = "bluetooth")]
pub use self::bluez::BluerScanner;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::time::Duration;

    use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
    use futures::StreamExt;
    use tracing::{debug, info, warn};

    use super::{normalize_address, BeaconScanner, BluetoothError, BluetoothResult};
    use crate::clock::Clock;
    use crate::config::BluetoothConfig;
    use crate::types::BeaconObservation;

    /// BlueZ-backed beacon scanner.
    ///
    /// The session and adapter are opened lazily on the first scan and
    /// dropped after any radio error so the next scan starts clean.
    pub struct BluerScanner<C> {
        target: Address,
        target_text: String,
        adapter_name: Option<String>,
        session: Option<Session>,
        adapter: Option<Adapter>,
        clock: C,
    }

    impl<C: Clock> BluerScanner<C> {
        /// Create a scanner for the configured beacon.
        ///
        /// # Errors
        ///
        /// Returns [`BluetoothError::InvalidAddress`] if the target is malformed.
        pub fn new(config: &BluetoothConfig, clock: C) -> BluetoothResult<Self> {
            let target_text = normalize_address(&config.target_address)?;
            let target: Address =
                target_text
                    .parse()
                    .map_err(|_| BluetoothError::InvalidAddress {
                        address: config.target_address.clone(),
                    })?;

            Ok(Self {
                target,
                target_text,
                adapter_name: config.adapter.clone(),
                session: None,
                adapter: None,
                clock,
            })
        }

        async fn ensure_adapter(&mut self) -> BluetoothResult<Adapter> {
            if let Some(adapter) = &self.adapter {
                return Ok(adapter.clone());
            }

            let session = Session::new()
                .await
                .map_err(|e| BluetoothError::SessionInitFailed {
                    message: e.to_string(),
                })?;

            let adapter = match &self.adapter_name {
                Some(name) => session
                    .adapter(name)
                    .map_err(|_| BluetoothError::AdapterNotFound)?,
                None => session
                    .default_adapter()
                    .await
                    .map_err(|_| BluetoothError::AdapterNotFound)?,
            };

            adapter
                .set_powered(true)
                .await
                .map_err(|_| BluetoothError::AdapterPoweredOff)?;

            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            };
            adapter
                .set_discovery_filter(filter)
                .await
                .map_err(|e| BluetoothError::DiscoveryFailed {
                    message: e.to_string(),
                })?;

            info!(adapter = adapter.name(), target = %self.target_text, "Bluetooth adapter ready");

            self.session = Some(session);
            self.adapter = Some(adapter.clone());
            Ok(adapter)
        }

        async fn strongest_rssi(&mut self, window: Duration) -> BluetoothResult<Option<i16>> {
            let adapter = self.ensure_adapter().await?;
            let events = adapter
                .discover_devices_with_changes()
                .await
                .map_err(|e| BluetoothError::DiscoveryFailed {
                    message: e.to_string(),
                })?;
            futures::pin_mut!(events);

            let deadline = tokio::time::Instant::now() + window;
            let mut strongest: Option<i16> = None;

            loop {
                let event = match tokio::time::timeout_at(deadline, events.next()).await {
                    Ok(Some(event)) => event,
                    Ok(None) | Err(_) => break,
                };

                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                if address != self.target {
                    continue;
                }

                let device = adapter
                    .device(address)
                    .map_err(|e| BluetoothError::DiscoveryFailed {
                        message: e.to_string(),
                    })?;
                match device.rssi().await {
                    Ok(Some(rssi)) => {
                        strongest = Some(strongest.map_or(rssi, |best| best.max(rssi)));
                    }
                    Ok(None) => debug!(target = %self.target_text, "Beacon seen without RSSI"),
                    Err(e) => debug!(error = %e, "Failed to read beacon RSSI"),
                }
            }

            Ok(strongest)
        }
    }

    impl<C: Clock> BeaconScanner for BluerScanner<C> {
        async fn scan(&mut self, window: Duration) -> Option<BeaconObservation> {
            match self.strongest_rssi(window).await {
                Ok(Some(rssi)) => Some(BeaconObservation {
                    address: self.target_text.clone(),
                    rssi,
                    timestamp: self.clock.now(),
                }),
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "Beacon scan failed, counting as a miss");
                    self.adapter = None;
                    self.session = None;
                    None
                }
            }
        }
    }
}

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use self::mock::MockScanner;

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::{normalize_address, BeaconScanner, BluetoothResult};
    use crate::clock::Clock;
    use crate::types::BeaconObservation;

    /// Scripted scanner that replays RSSI readings for the target beacon.
    ///
    /// Each scan pops one reading; `None` is a miss. Once the script is
    /// exhausted every scan returns the fallback reading.
    #[derive(Debug, Clone)]
    pub struct MockScanner<C> {
        address: String,
        script: VecDeque<Option<i16>>,
        fallback: Option<i16>,
        windows: Vec<Duration>,
        clock: C,
    }

    impl<C: Clock> MockScanner<C> {
        /// Create a scanner that never sees the beacon until scripted.
        ///
        /// # Errors
        ///
        /// Returns an error if `address` is malformed.
        pub fn new(address: &str, clock: C) -> BluetoothResult<Self> {
            Ok(Self {
                address: normalize_address(address)?,
                script: VecDeque::new(),
                fallback: None,
                windows: Vec::new(),
                clock,
            })
        }

        /// Append readings to the script.
        pub fn extend<I: IntoIterator<Item = Option<i16>>>(&mut self, readings: I) {
            self.script.extend(readings);
        }

        /// Reading returned after the script runs out.
        pub fn set_fallback(&mut self, reading: Option<i16>) {
            self.fallback = reading;
        }

        /// Scan windows requested so far, oldest first.
        #[must_use]
        pub fn requested_windows(&self) -> &[Duration] {
            &self.windows
        }
    }

    impl<C: Clock> BeaconScanner for MockScanner<C> {
        async fn scan(&mut self, window: Duration) -> Option<BeaconObservation> {
            self.windows.push(window);
            let reading = self.script.pop_front().unwrap_or(self.fallback);
            reading.map(|rssi| BeaconObservation {
                address: self.address.clone(),
                rssi,
                timestamp: self.clock.now(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, Timestamp};

    #[test]
    fn test_normalize_address_uppercases() {
        assert_eq!(
            normalize_address("51:00:25:04:02:a2").unwrap(),
            "51:00:25:04:02:A2"
        );
        assert!(matches!(
            normalize_address("beacon"),
            Err(BluetoothError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_scanner_replays_script_then_fallback() {
        let clock = ManualClock::new();
        let mut scanner = MockScanner::new("51:00:25:04:02:A2", clock.clone()).unwrap();
        scanner.extend([Some(-60), None]);
        scanner.set_fallback(Some(-70));

        clock.set(Timestamp::from_millis(250));
        let first = scanner.scan(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.rssi, -60);
        assert_eq!(first.timestamp, Timestamp::from_millis(250));
        assert_eq!(first.address, "51:00:25:04:02:A2");

        assert!(scanner.scan(Duration::from_secs(1)).await.is_none());
        assert_eq!(scanner.scan(Duration::from_secs(2)).await.unwrap().rssi, -70);
        assert_eq!(scanner.requested_windows().len(), 3);
    }

    #[test]
    fn test_mock_scanner_misses_without_script() {
        let mut scanner = MockScanner::new("51:00:25:04:02:A2", ManualClock::new()).unwrap();
        let result = tokio_test::block_on(scanner.scan(Duration::from_millis(500)));
        assert!(result.is_none());
        assert_eq!(scanner.requested_windows(), &[Duration::from_millis(500)]);
    }

    #[test]
    fn test_mock_scanner_rejects_bad_address() {
        assert!(MockScanner::new("not-an-address", ManualClock::new()).is_err());
    }
}
