//! Connection status of a telemetry session

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the connection to one telemetry source.
///
/// `ScanError` and `ConnectionLost` are re-enterable: the next `start()`
/// begins a fresh scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Receiving,
    ConnectionLost,
    ScanError,
}

impl ConnectionStatus {
    /// User-facing status label
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "Idle",
            ConnectionStatus::Scanning => "Scanning...",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Receiving => "Receiving Data",
            ConnectionStatus::ConnectionLost => "Connection Lost",
            ConnectionStatus::ScanError => "Scan Error (Check BLE)",
        }
    }

    /// A scan or connection is in flight or established
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Scanning | ConnectionStatus::Connecting | ConnectionStatus::Receiving
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::ConnectionLost | ConnectionStatus::ScanError
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(ConnectionStatus::Scanning.label(), "Scanning...");
        assert_eq!(ConnectionStatus::Receiving.to_string(), "Receiving Data");
        assert_eq!(
            ConnectionStatus::ScanError.label(),
            "Scan Error (Check BLE)"
        );
    }

    #[test]
    fn test_activity_classes() {
        assert!(ConnectionStatus::Connecting.is_active());
        assert!(!ConnectionStatus::Idle.is_active());
        assert!(ConnectionStatus::ConnectionLost.is_error());
        assert!(!ConnectionStatus::ConnectionLost.is_active());
    }
}
