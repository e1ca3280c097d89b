//! BLE link configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the btleplug link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleLinkConfig {
    /// Which adapter to use when the host has several
    pub adapter_index: usize,
    /// How long to scan for a peripheral the adapter has not seen yet
    pub scan_timeout_ms: u64,
    /// Request a write acknowledgement from the peripheral
    pub write_with_response: bool,
}

impl Default for BleLinkConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            scan_timeout_ms: 5_000,
            write_with_response: false,
        }
    }
}

impl BleLinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set adapter index
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Set scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable acknowledged writes
    pub fn with_write_with_response(mut self, enabled: bool) -> Self {
        self.write_with_response = enabled;
        self
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_setters() {
        let config = BleLinkConfig::new()
            .with_adapter_index(1)
            .with_scan_timeout(Duration::from_secs(2))
            .with_write_with_response(true);
        assert_eq!(config.adapter_index, 1);
        assert_eq!(config.scan_timeout(), Duration::from_secs(2));
        assert!(config.write_with_response);
    }
}
