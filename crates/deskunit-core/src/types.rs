//! Shared value types.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize};

use crate::clock::Timestamp;

/// A single sighting of the target beacon produced by one scan cycle.
///
/// Ephemeral: consumed immediately by the presence detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconObservation {
    /// Beacon address, upper-case `XX:XX:XX:XX:XX:XX`.
    pub address: String,

    /// Received signal strength in dBm.
    pub rssi: i16,

    /// When the sighting was recorded.
    pub timestamp: Timestamp,
}

/// Text with a compile-time maximum length in characters.
///
/// Oversize input is truncated at a character boundary on construction, so
/// the backing allocation never grows past `N` characters after ingress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct BoundedText<const N: usize>(String);

impl<const N: usize> BoundedText<N> {
    /// Build from arbitrary input, truncating past `N` characters.
    #[must_use]
    pub fn truncating(input: &str) -> Self {
        let end = input
            .char_indices()
            .nth(N)
            .map_or(input.len(), |(index, _)| index);
        let mut text = String::with_capacity(end);
        text.push_str(&input[..end]);
        Self(text)
    }

    /// Whether `input` would be truncated.
    #[must_use]
    pub fn would_truncate(input: &str) -> bool {
        input.chars().nth(N).is_some()
    }

    /// Borrow as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> Deref for BoundedText<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<'de, const N: usize> Deserialize<'de> for BoundedText<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::truncating(&raw))
    }
}

impl<const N: usize> fmt::Display for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_text_keeps_short_input() {
        let text = BoundedText::<8>::truncating("short");
        assert_eq!(text.as_str(), "short");
        assert!(!BoundedText::<8>::would_truncate("short"));
    }

    #[test]
    fn test_bounded_text_truncates_on_char_boundary() {
        let text = BoundedText::<3>::truncating("héllo");
        assert_eq!(text.as_str(), "hél");
        assert!(BoundedText::<3>::would_truncate("héllo"));
    }

    #[test]
    fn test_bounded_text_serializes_as_plain_string() {
        let text = BoundedText::<16>::truncating("Ada");
        assert_eq!(serde_json::to_string(&text).unwrap(), "\"Ada\"");
    }

    #[test]
    fn test_bounded_text_deserialize_truncates() {
        let text: BoundedText<4> = serde_json::from_str("\"overflowing\"").unwrap();
        assert_eq!(text.as_str(), "over");
    }
}
