// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the engine

use std::time::Duration;

/// Engine-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long the modem holds all traffic after a retryable nack (default: 1 s)
    pub nack_back_off: Duration,

    /// Number of sent commands remembered per device
    pub history_depth: usize,

    /// Maximum number of devices in the roster
    pub max_devices: usize,

    /// First record address of a legacy (byte-peek) ALDB scan
    pub legacy_scan_start: (u8, u8),

    /// Link code used when the modem starts linking
    pub link_code: u8,

    /// Group used for modem/device linking
    pub link_group: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nack_back_off: Duration::from_secs(1),
            history_depth: 16,
            max_devices: 256,
            legacy_scan_start: (0x0F, 0xF8),
            link_code: 0x01, // modem is controller
            link_group: 0x00,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with a custom nack back-off
    pub fn with_back_off(nack_back_off: Duration) -> Self {
        Self {
            nack_back_off,
            ..Default::default()
        }
    }

    /// Create a configuration with a custom roster limit
    pub fn with_max_devices(max_devices: usize) -> Self {
        Self {
            max_devices,
            ..Default::default()
        }
    }

    /// Configuration for tests and simulations: no back-off
    pub fn immediate() -> Self {
        Self::with_back_off(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.nack_back_off, Duration::from_secs(1));
        assert_eq!(config.history_depth, 16);
        assert_eq!(config.legacy_scan_start, (0x0F, 0xF8));
        assert_eq!(config.link_code, 0x01);
    }

    #[test]
    fn test_with_constructors() {
        let config = EngineConfig::with_max_devices(4);
        assert_eq!(config.max_devices, 4);
        assert_eq!(config.history_depth, 16);

        let config = EngineConfig::immediate();
        assert_eq!(config.nack_back_off, Duration::ZERO);
    }
}
