// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Insteon Engine
//!
//! The device side of an Insteon home-automation stack: everything between a
//! decoded modem message and the next message handed back to the modem.
//!
//! ## Key Features
//!
//! - **Request correlation**: one outstanding request per device, matched
//!   against every ack or nack the device sends back
//! - **Recovery**: nack taxonomy with resend, back-off and relinking
//! - **ALDB sequencing**: legacy byte-peek scans, extended record scans,
//!   record writes and delta tracking
//! - **Triggers**: one-shot continuations fired by matching inbound messages
//!
//! The serial codec, the transport and any timers live outside this crate.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Instant;
//! use insteon::{Address, EngineConfig, InboundMessage, MessageType, Network};
//!
//! let modem = Address::new(0x44, 0x55, 0x66);
//! let lamp = Address::new(0x11, 0x22, 0x33);
//!
//! let mut network = Network::with_config(modem, EngineConfig::immediate());
//! network.add_device(lamp).unwrap();
//! network.with_device(lamp, |ctx| ctx.turn_on(0xFF)).unwrap().unwrap();
//!
//! // Hand the message to the modem, then report the modem's echo
//! let tx = network.next_transmission(Instant::now()).unwrap();
//! assert_eq!(tx.command, "on");
//! network.modem_ack().unwrap();
//!
//! // The device answers
//! let ack = InboundMessage::standard(lamp, modem, MessageType::DirectAck, 0x11, 0xFF);
//! network.receive(ack).unwrap();
//! assert!(!network.device(lamp).unwrap().has_outstanding());
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Addresses, message types, fields and inbound messages
//! - [`schema`]: Command templates
//! - [`request`]: Outbound requests and their acknowledgment state
//! - [`device`]: Per-device state and the handler context
//! - [`modem`]: The shared modem and its back-off
//! - [`trigger`]: Message-matching continuations
//! - [`classifier`]: Ack and nack classification
//! - [`dispatch`]: Inbound message routing
//! - [`sequence`]: Multi-step ALDB and linking procedures
//! - [`network`]: Device roster and transmission scheduling

// Modules
pub mod aldb;
pub mod classifier;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod modem;
pub mod network;
pub mod protocol;
pub mod request;
pub mod schema;
pub mod send;
pub mod sequence;
pub mod trigger;

// Re-exports for convenient access
pub use aldb::{Aldb, AldbRecord};
pub use classifier::{AckHandler, AckOutcome, NackCode, NackOutcome, SpuriousReason};
pub use config::EngineConfig;
pub use device::{
    Continuation, Device, DeviceCtx, DeviceVersion, Lifecycle, NoopLifecycle, StateTag,
};
pub use error::{InsteonError, NetworkError, Result, SchemaError};
pub use modem::Modem;
pub use network::Network;
pub use protocol::{Address, Field, Fields, Generation, InboundMessage, LengthClass, MessageType};
pub use request::{Destination, Request, SentCommand, SentHistory, Transmission};
pub use schema::{CommandSchema, CommandTemplate, TemplateTarget};
pub use sequence::{Sequence, SequenceState};
pub use trigger::{Predicate, Trigger, TriggerRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_basic_exchange() {
        let modem = Address::new(0x44, 0x55, 0x66);
        let dev = Address::new(0x11, 0x22, 0x33);
        let mut network = Network::with_config(modem, EngineConfig::immediate());
        network.add_device(dev).unwrap();
        network.with_device(dev, |ctx| ctx.turn_off()).unwrap().unwrap();

        let tx = network.next_transmission(Instant::now()).unwrap();
        assert_eq!(tx.destination, Destination::Device(dev));
        assert_eq!(tx.field(Field::Cmd1), protocol::CMD_OFF);
        network.modem_ack().unwrap();

        let ack = InboundMessage::standard(dev, modem, MessageType::DirectAck, 0x13, 0x00);
        network.receive(ack).unwrap();
        assert!(network.is_idle());
    }
}
