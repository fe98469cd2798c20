// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the Insteon engine
//!
//! Protocol anomalies (spurious responses, nacks, unmatched records) are not
//! errors: they are logged and handled as ordinary branches. The types here
//! cover misuse of the API itself.

use thiserror::Error;

use crate::protocol::Address;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, InsteonError>;

/// Main error type for engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InsteonError {
    /// Command schema error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Device roster or modem error
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Malformed device address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors while building requests from command templates
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// No template registered under this name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The template has no field with this name or alias
    #[error("Command {command} has no field named {field}")]
    UnknownField { command: String, field: String },

    /// The field name does not parse
    #[error("Invalid field name: {0}")]
    InvalidField(String),
}

/// Errors related to the device roster and the shared modem
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// No device with this address
    #[error("Device not found: {0}")]
    UnknownDevice(Address),

    /// Device already registered
    #[error("Device already exists: {0}")]
    DeviceExists(Address),

    /// Roster is full
    #[error("Maximum devices ({max}) reached")]
    MaxDevicesReached { max: usize },

    /// Modem acknowledgment without a transmission in flight
    #[error("No transmission in flight")]
    NothingInFlight,

    /// Watchdog action on a device with nothing outstanding
    #[error("No outstanding request for {0}")]
    NoOutstandingRequest(Address),

    /// Inbound message carries no source address
    #[error("Message has no source address")]
    NoSourceAddress,
}
