// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Protocol definitions
//!
//! This module defines the core types shared by every layer of the engine:
//! - Device addresses
//! - Insteon message types and length classes
//! - Named message fields and field maps
//! - The inbound message envelope produced by the codec

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{InsteonError, SchemaError};

/// Modem command: standard message received
pub const MODEM_STANDARD_RECEIVED: u8 = 0x50;
/// Modem command: extended message received
pub const MODEM_EXTENDED_RECEIVED: u8 = 0x51;
/// Modem command: all-link complete
pub const MODEM_LINK_COMPLETE: u8 = 0x53;
/// Modem command: start all-linking
pub const MODEM_START_LINKING: u8 = 0x64;

/// Device command: product data request
pub const CMD_PRODUCT_DATA: u8 = 0x03;
/// Device command: enter linking mode
pub const CMD_ENTER_LINK_MODE: u8 = 0x09;
/// Device command: engine version query
pub const CMD_ENGINE_VERSION: u8 = 0x0D;
/// Device command: id request (answered by a set-button-pressed broadcast)
pub const CMD_ID_REQUEST: u8 = 0x10;
/// Device command: on
pub const CMD_ON: u8 = 0x11;
/// Device command: off
pub const CMD_OFF: u8 = 0x13;
/// Device command: light status request
pub const CMD_STATUS_REQUEST: u8 = 0x19;
/// Device command: set ALDB address MSB (generation 1)
pub const CMD_SET_ADDRESS_MSB: u8 = 0x28;
/// Device command: peek one ALDB byte (generation 1)
pub const CMD_PEEK_ONE_BYTE: u8 = 0x2B;
/// Device command: extended read/write ALDB (generation 2)
pub const CMD_EXTENDED_ALDB: u8 = 0x2F;

/// Broadcast: set button pressed, responder
pub const BROADCAST_SET_BUTTON_RESPONDER: u8 = 0x01;
/// Broadcast: set button pressed, controller
pub const BROADCAST_SET_BUTTON_CONTROLLER: u8 = 0x02;

/// A three-byte Insteon device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 3]);

impl Address {
    /// Create an address from its three bytes
    pub const fn new(hi: u8, mid: u8, low: u8) -> Self {
        Self([hi, mid, low])
    }

    /// High byte
    pub fn hi(&self) -> u8 {
        self.0[0]
    }

    /// Middle byte
    pub fn mid(&self) -> u8 {
        self.0[1]
    }

    /// Low byte
    pub fn low(&self) -> u8 {
        self.0[2]
    }

    /// Raw bytes, high first
    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}.{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Address {
    type Err = InsteonError;

    /// Parses `AA.BB.CC` or `AABBCC`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '.').collect();
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(InsteonError::InvalidAddress(s.to_string()));
        }
        let mut bytes = [0u8; 3];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| InsteonError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// Device protocol generation, as far as it has been inferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Generation {
    /// Not yet known
    #[default]
    Unknown,
    /// Legacy dialect: byte-by-byte peek of the ALDB
    Gen1,
    /// Extended dialect: one ALDB record per extended message
    Gen2,
}

impl Generation {
    /// Map an engine-version reply to a generation
    pub fn from_engine_version(version: u8) -> Self {
        match version {
            0x00 => Generation::Gen1,
            _ => Generation::Gen2,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Unknown => write!(f, "unknown"),
            Generation::Gen1 => write!(f, "gen1"),
            Generation::Gen2 => write!(f, "gen2"),
        }
    }
}

/// Insteon message types, encoded in the top three bits of the flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Direct = 0b000,
    DirectAck = 0b001,
    AllLinkCleanup = 0b010,
    AllLinkCleanupAck = 0b011,
    Broadcast = 0b100,
    DirectNack = 0b101,
    AllLinkBroadcast = 0b110,
    AllLinkCleanupNack = 0b111,
}

impl MessageType {
    /// Decode the message type from an Insteon flags byte
    pub fn from_flags(flags: u8) -> Self {
        match flags >> 5 {
            0b000 => MessageType::Direct,
            0b001 => MessageType::DirectAck,
            0b010 => MessageType::AllLinkCleanup,
            0b011 => MessageType::AllLinkCleanupAck,
            0b100 => MessageType::Broadcast,
            0b101 => MessageType::DirectNack,
            0b110 => MessageType::AllLinkBroadcast,
            _ => MessageType::AllLinkCleanupNack,
        }
    }

    /// Flags byte for this message type with the given length class
    pub fn flags(&self, length: LengthClass) -> u8 {
        let extended = match length {
            LengthClass::Standard => 0x00,
            LengthClass::Extended => 0x10,
        };
        ((*self as u8) << 5) | extended
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Direct => "direct",
            MessageType::DirectAck => "direct_ack",
            MessageType::AllLinkCleanup => "alllink_cleanup",
            MessageType::AllLinkCleanupAck => "alllink_cleanup_ack",
            MessageType::Broadcast => "broadcast",
            MessageType::DirectNack => "direct_nack",
            MessageType::AllLinkBroadcast => "alllink_broadcast",
            MessageType::AllLinkCleanupNack => "alllink_cleanup_nack",
        };
        write!(f, "{}", name)
    }
}

/// Standard (9 byte) or extended (23 byte) Insteon message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LengthClass {
    #[default]
    Standard,
    Extended,
}

/// Named message field
///
/// The byte offsets belong to the codec; the engine only ever refers to
/// fields by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// Modem command byte of the frame carrying the message
    ModemCmd,
    FromHi,
    FromMid,
    FromLow,
    ToHi,
    ToMid,
    ToLow,
    /// Insteon flags byte
    Flags,
    Cmd1,
    Cmd2,
    /// Extended user data, 1 through 14
    Usr(u8),
    /// All-link code (modem linking commands and events)
    LinkCode,
    /// All-link group (modem linking commands and events)
    Group,
}

impl Field {
    /// Parse a canonical field name such as `cmd_1` or `usr_14`
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "plm_cmd" => Field::ModemCmd,
            "from_addr_hi" => Field::FromHi,
            "from_addr_mid" => Field::FromMid,
            "from_addr_low" => Field::FromLow,
            "to_addr_hi" => Field::ToHi,
            "to_addr_mid" => Field::ToMid,
            "to_addr_low" => Field::ToLow,
            "msg_flags" => Field::Flags,
            "cmd_1" => Field::Cmd1,
            "cmd_2" => Field::Cmd2,
            "link_code" => Field::LinkCode,
            "group" => Field::Group,
            other => {
                let n: u8 = other.strip_prefix("usr_")?.parse().ok()?;
                if !(1..=14).contains(&n) {
                    return None;
                }
                Field::Usr(n)
            }
        };
        Some(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::ModemCmd => write!(f, "plm_cmd"),
            Field::FromHi => write!(f, "from_addr_hi"),
            Field::FromMid => write!(f, "from_addr_mid"),
            Field::FromLow => write!(f, "from_addr_low"),
            Field::ToHi => write!(f, "to_addr_hi"),
            Field::ToMid => write!(f, "to_addr_mid"),
            Field::ToLow => write!(f, "to_addr_low"),
            Field::Flags => write!(f, "msg_flags"),
            Field::Cmd1 => write!(f, "cmd_1"),
            Field::Cmd2 => write!(f, "cmd_2"),
            Field::Usr(n) => write!(f, "usr_{}", n),
            Field::LinkCode => write!(f, "link_code"),
            Field::Group => write!(f, "group"),
        }
    }
}

impl FromStr for Field {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::from_name(s).ok_or_else(|| SchemaError::InvalidField(s.to_string()))
    }
}

/// Named byte values of a message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fields(BTreeMap<Field, u8>);

impl Fields {
    /// Create an empty field map
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field, if present
    pub fn get(&self, field: Field) -> Option<u8> {
        self.0.get(&field).copied()
    }

    /// Set a field
    pub fn set(&mut self, field: Field, value: u8) {
        self.0.insert(field, value);
    }

    /// Set the three source address fields
    pub fn set_from(&mut self, address: Address) {
        self.set(Field::FromHi, address.hi());
        self.set(Field::FromMid, address.mid());
        self.set(Field::FromLow, address.low());
    }

    /// Set the three destination address fields
    pub fn set_to(&mut self, address: Address) {
        self.set(Field::ToHi, address.hi());
        self.set(Field::ToMid, address.mid());
        self.set(Field::ToLow, address.low());
    }

    /// Iterate in field order
    pub fn iter(&self) -> impl Iterator<Item = (Field, u8)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of fields set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no field is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Field, u8)> for Fields {
    fn from_iter<I: IntoIterator<Item = (Field, u8)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An inbound message as classified by the codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Insteon message type; `None` for modem events such as all-link complete
    pub message_type: Option<MessageType>,
    /// Standard or extended
    pub length: LengthClass,
    /// Named field values
    pub fields: Fields,
    /// Cleared by handlers to keep a spurious response away from triggers
    pub allow_trigger: bool,
}

impl InboundMessage {
    /// Build a standard-length Insteon message received by the modem
    pub fn standard(
        from: Address,
        to: Address,
        message_type: MessageType,
        cmd_1: u8,
        cmd_2: u8,
    ) -> Self {
        let mut fields = Fields::new();
        fields.set(Field::ModemCmd, MODEM_STANDARD_RECEIVED);
        fields.set_from(from);
        fields.set_to(to);
        fields.set(Field::Flags, message_type.flags(LengthClass::Standard));
        fields.set(Field::Cmd1, cmd_1);
        fields.set(Field::Cmd2, cmd_2);
        Self {
            message_type: Some(message_type),
            length: LengthClass::Standard,
            fields,
            allow_trigger: true,
        }
    }

    /// Build an extended-length Insteon message received by the modem
    pub fn extended(
        from: Address,
        to: Address,
        message_type: MessageType,
        cmd_1: u8,
        cmd_2: u8,
        user_data: [u8; 14],
    ) -> Self {
        let mut fields = Fields::new();
        fields.set(Field::ModemCmd, MODEM_EXTENDED_RECEIVED);
        fields.set_from(from);
        fields.set_to(to);
        fields.set(Field::Flags, message_type.flags(LengthClass::Extended));
        fields.set(Field::Cmd1, cmd_1);
        fields.set(Field::Cmd2, cmd_2);
        for (i, byte) in user_data.iter().enumerate() {
            fields.set(Field::Usr(i as u8 + 1), *byte);
        }
        Self {
            message_type: Some(message_type),
            length: LengthClass::Extended,
            fields,
            allow_trigger: true,
        }
    }

    /// Build an all-link complete event reported by the modem
    pub fn link_complete(from: Address, link_code: u8, group: u8) -> Self {
        let mut fields = Fields::new();
        fields.set(Field::ModemCmd, MODEM_LINK_COMPLETE);
        fields.set_from(from);
        fields.set(Field::LinkCode, link_code);
        fields.set(Field::Group, group);
        Self {
            message_type: None,
            length: LengthClass::Standard,
            fields,
            allow_trigger: true,
        }
    }

    /// Value of a named field
    pub fn get(&self, field: Field) -> Option<u8> {
        self.fields.get(field)
    }

    /// Value of a named field, zero when absent
    pub fn byte(&self, field: Field) -> u8 {
        self.fields.get(field).unwrap_or(0)
    }

    /// Source address, if all three bytes are present
    pub fn from_address(&self) -> Option<Address> {
        Some(Address::new(
            self.get(Field::FromHi)?,
            self.get(Field::FromMid)?,
            self.get(Field::FromLow)?,
        ))
    }

    /// Check if the message is an extended message
    pub fn is_extended(&self) -> bool {
        self.length == LengthClass::Extended
    }
}
