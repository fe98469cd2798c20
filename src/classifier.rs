// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Acknowledgment classification
//!
//! This module decides what a direct ack or direct nack means for the
//! device's outstanding request. Classification is split in two steps:
//!
//! 1. a pure function of the device state and the inbound message returns
//!    an outcome ([`AckOutcome`], [`NackOutcome`]);
//! 2. the outcome is applied to the [`DeviceCtx`].
//!
//! Positive acks are routed by opcode to a typed [`AckHandler`].

use std::fmt;

use log::{debug, info, warn};

use crate::device::{Continuation, Device, DeviceCtx, StateTag};
use crate::protocol::{
    Field, Generation, InboundMessage, CMD_ENGINE_VERSION, CMD_EXTENDED_ALDB, CMD_ID_REQUEST,
    CMD_PEEK_ONE_BYTE, CMD_SET_ADDRESS_MSB,
};
use crate::request::Request;
use crate::sequence::{link, Sequence};

/// The light status request carries the ALDB delta in the `cmd_1` of its ack
const LIGHT_STATUS_REQUEST: &str = "light_status_request";

/// Why a response was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpuriousReason {
    /// Nothing was sent to the device
    NoOutstandingRequest,
    /// The response answers another command
    CommandMismatch { sent: u8, received: u8 },
    /// The response arrived before the modem accepted the request
    NotModemAcknowledged,
    /// The request was already acknowledged
    AlreadyAcknowledged,
    /// `set_address_msb` echoed another MSB
    MsbMismatch { requested: u8, echoed: u8 },
    /// No `set_address_msb` was ever sent
    NoAddressMsb,
    /// ALDB data while no scan is running
    NotScanning,
    /// ALDB write ack while no write is running
    NotWriting,
    /// The outstanding request is not waiting for this record
    UnexpectedRecord,
    /// The echoed record address is not the one requested
    RecordMismatch { msb: u8, lsb: u8 },
    /// Set-button broadcast without an id request waiting for it
    UnsolicitedBroadcast,
}

impl fmt::Display for SpuriousReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpuriousReason::NoOutstandingRequest => write!(f, "no request outstanding"),
            SpuriousReason::CommandMismatch { sent, received } => write!(
                f,
                "cmd_1 {:02X} does not match sent {:02X}",
                received, sent
            ),
            SpuriousReason::NotModemAcknowledged => {
                write!(f, "request not yet accepted by the modem")
            }
            SpuriousReason::AlreadyAcknowledged => write!(f, "request already acknowledged"),
            SpuriousReason::MsbMismatch { requested, echoed } => write!(
                f,
                "MSB {:02X} echoed, {:02X} requested",
                echoed, requested
            ),
            SpuriousReason::NoAddressMsb => write!(f, "peek without a selected MSB"),
            SpuriousReason::NotScanning => write!(f, "no ALDB scan running"),
            SpuriousReason::NotWriting => write!(f, "no ALDB write running"),
            SpuriousReason::UnexpectedRecord => write!(f, "no ALDB read waiting for a record"),
            SpuriousReason::RecordMismatch { msb, lsb } => {
                write!(f, "record {:02X}{:02X} was not requested", msb, lsb)
            }
            SpuriousReason::UnsolicitedBroadcast => {
                write!(f, "no id request waiting for a set-button broadcast")
            }
        }
    }
}

/// Result of classifying a direct ack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Discard the message and keep it away from triggers
    Spurious(SpuriousReason),
    /// First phase of a two-phase command
    Preliminary,
    /// Request complete
    Acknowledge,
    /// Engine version reply: record the generation and complete
    EngineVersion(Generation),
    /// Legacy peek reply: store the byte; the scan completes the request
    PeekedByte { msb: u8, lsb: u8, byte: u8 },
}

/// Typed handler for the direct ack of one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckHandler {
    /// `0x0D` get engine version
    EngineVersion,
    /// `0x10` id request
    IdRequest,
    /// `0x28` set ALDB address MSB
    SetAddressMsb,
    /// `0x2B` peek one ALDB byte
    PeekOneByte,
    /// `0x2F` extended ALDB read/write
    ExtendedAldb,
    /// Every other command
    Generic,
}

impl AckHandler {
    /// Handler for an opcode
    pub fn for_opcode(cmd_1: u8) -> Self {
        match cmd_1 {
            CMD_ENGINE_VERSION => AckHandler::EngineVersion,
            CMD_ID_REQUEST => AckHandler::IdRequest,
            CMD_SET_ADDRESS_MSB => AckHandler::SetAddressMsb,
            CMD_PEEK_ONE_BYTE => AckHandler::PeekOneByte,
            CMD_EXTENDED_ALDB => AckHandler::ExtendedAldb,
            _ => AckHandler::Generic,
        }
    }

    /// Classify an ack of `request`, already known to be well timed
    pub fn classify(&self, device: &Device, request: &Request, msg: &InboundMessage) -> AckOutcome {
        match self {
            AckHandler::EngineVersion => {
                AckOutcome::EngineVersion(Generation::from_engine_version(msg.byte(Field::Cmd2)))
            }
            AckHandler::IdRequest => {
                if request.preliminary_acknowledged() {
                    AckOutcome::Spurious(SpuriousReason::AlreadyAcknowledged)
                } else {
                    AckOutcome::Preliminary
                }
            }
            AckHandler::SetAddressMsb => {
                let requested = request.field(Field::Cmd2);
                let echoed = msg.byte(Field::Cmd2);
                if requested == echoed {
                    AckOutcome::Acknowledge
                } else {
                    AckOutcome::Spurious(SpuriousReason::MsbMismatch { requested, echoed })
                }
            }
            AckHandler::PeekOneByte => {
                if !device.has_state(StateTag::QueryAldb) {
                    return AckOutcome::Spurious(SpuriousReason::NotScanning);
                }
                let msb = device
                    .history()
                    .latest("set_address_msb")
                    .and_then(|sent| sent.fields.get(Field::Cmd2));
                match msb {
                    Some(msb) => AckOutcome::PeekedByte {
                        msb,
                        lsb: request.field(Field::Cmd2),
                        byte: msg.byte(Field::Cmd2),
                    },
                    None => AckOutcome::Spurious(SpuriousReason::NoAddressMsb),
                }
            }
            AckHandler::ExtendedAldb => {
                if request.preliminary_acknowledged() || request.device_acknowledged() {
                    return AckOutcome::Spurious(SpuriousReason::AlreadyAcknowledged);
                }
                if request.field(Field::Usr(2)) == 0x00 {
                    // read: the record follows in a direct extended message
                    AckOutcome::Preliminary
                } else if device.has_state(StateTag::WriteAldb) {
                    AckOutcome::Acknowledge
                } else {
                    AckOutcome::Spurious(SpuriousReason::NotWriting)
                }
            }
            AckHandler::Generic => AckOutcome::Acknowledge,
        }
    }
}

/// Check that a response is well timed for the outstanding request
pub fn check_outstanding<'d>(
    device: &'d Device,
    msg: &InboundMessage,
) -> Result<&'d Request, SpuriousReason> {
    let request = device
        .last_sent()
        .ok_or(SpuriousReason::NoOutstandingRequest)?;
    let sent = request.field(Field::Cmd1);
    let received = msg.byte(Field::Cmd1);
    if request.command() != LIGHT_STATUS_REQUEST && sent != received {
        return Err(SpuriousReason::CommandMismatch { sent, received });
    }
    if !request.plm_acknowledged() {
        return Err(SpuriousReason::NotModemAcknowledged);
    }
    if request.device_acknowledged() {
        return Err(SpuriousReason::AlreadyAcknowledged);
    }
    Ok(request)
}

/// Classify a direct ack
pub fn classify_ack(device: &Device, msg: &InboundMessage) -> AckOutcome {
    let request = match check_outstanding(device, msg) {
        Ok(request) => request,
        Err(reason) => return AckOutcome::Spurious(reason),
    };
    if request.command() == LIGHT_STATUS_REQUEST {
        return AckOutcome::Acknowledge;
    }
    AckHandler::for_opcode(msg.byte(Field::Cmd1)).classify(device, request, msg)
}

/// Apply a direct ack outcome
pub fn apply_ack(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage, outcome: AckOutcome) {
    let address = ctx.address();
    match outcome {
        AckOutcome::Spurious(reason) => {
            msg.allow_trigger = false;
            warn!(
                "{}: spurious ack cmd_1={:02X} cmd_2={:02X}: {}",
                address,
                msg.byte(Field::Cmd1),
                msg.byte(Field::Cmd2),
                reason
            );
        }
        AckOutcome::Preliminary => {
            if let Some(request) = ctx.device.last_sent.as_mut() {
                request.acknowledge_preliminary();
                debug!("{}: {} preliminary ack", address, request.command());
            }
        }
        AckOutcome::Acknowledge => {
            ctx.acknowledge();
        }
        AckOutcome::EngineVersion(generation) => {
            info!("{}: engine version reports {}", address, generation);
            ctx.device.set_generation(generation);
            ctx.acknowledge();
        }
        AckOutcome::PeekedByte { msb, lsb, byte } => {
            ctx.device.aldb.store_peeked_byte(msb, lsb, byte);
        }
    }
}

/// Classify and apply a direct ack
pub fn handle_ack(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage) {
    let outcome = classify_ack(ctx.device, msg);
    apply_ack(ctx, msg, outcome);
}

/// Nack reason codes carried in `cmd_2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NackCode {
    /// `0xFF`: sender's address not in the device's database
    NotInDatabase,
    /// `0xFE`: no load detected
    NoLoad,
    /// `0xFD`: checksum incorrect
    Checksum,
    /// `0xFC`: pre-nack, database search took too long
    PreNack,
    /// `0xFB`: illegal value in command
    IllegalValue,
    /// Unspecified
    Other(u8),
}

impl From<u8> for NackCode {
    fn from(code: u8) -> Self {
        match code {
            0xFF => NackCode::NotInDatabase,
            0xFE => NackCode::NoLoad,
            0xFD => NackCode::Checksum,
            0xFC => NackCode::PreNack,
            0xFB => NackCode::IllegalValue,
            other => NackCode::Other(other),
        }
    }
}

impl fmt::Display for NackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackCode::NotInDatabase => write!(f, "sender not in device database"),
            NackCode::NoLoad => write!(f, "no load detected"),
            NackCode::Checksum => write!(f, "checksum incorrect"),
            NackCode::PreNack => write!(f, "database search took too long"),
            NackCode::IllegalValue => write!(f, "illegal value in command"),
            NackCode::Other(code) => write!(f, "unspecified ({:02X})", code),
        }
    }
}

/// Result of classifying a direct nack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Discard the message and keep it away from triggers
    Spurious(SpuriousReason),
    /// Send the request again after the modem back-off
    Resend { generation: Option<Generation> },
    /// Treat the request as complete
    Acknowledge { generation: Generation },
    /// Complete the request and link the modem to the device
    Relink,
}

/// Classify a direct nack
pub fn classify_nack(device: &Device, msg: &InboundMessage) -> NackOutcome {
    if let Err(reason) = check_outstanding(device, msg) {
        return NackOutcome::Spurious(reason);
    }
    if device.generation() == Generation::Gen1 {
        return NackOutcome::Resend { generation: None };
    }
    match NackCode::from(msg.byte(Field::Cmd2)) {
        NackCode::NotInDatabase => NackOutcome::Relink,
        NackCode::NoLoad | NackCode::PreNack | NackCode::IllegalValue => NackOutcome::Acknowledge {
            generation: Generation::Gen2,
        },
        NackCode::Checksum => NackOutcome::Resend {
            generation: Some(Generation::Gen2),
        },
        NackCode::Other(_) => NackOutcome::Resend { generation: None },
    }
}

/// Apply a direct nack outcome
pub fn apply_nack(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage, outcome: NackOutcome) {
    let address = ctx.address();
    let code = NackCode::from(msg.byte(Field::Cmd2));
    match outcome {
        NackOutcome::Spurious(reason) => {
            msg.allow_trigger = false;
            warn!("{}: spurious nack ({}): {}", address, code, reason);
        }
        NackOutcome::Resend { generation } => {
            warn!("{}: nack ({}), resending", address, code);
            if let Some(generation) = generation {
                ctx.device.set_generation(generation);
            }
            ctx.resend();
        }
        NackOutcome::Acknowledge { generation } => {
            warn!("{}: nack ({}), not resending", address, code);
            ctx.device.set_generation(generation);
            ctx.acknowledge();
            // a sequence step cannot continue past a final nack
            if let Some(failure) = take_failure(ctx) {
                failure(ctx);
            }
        }
        NackOutcome::Relink => {
            warn!("{}: nack ({}), linking modem", address, code);
            ctx.device.set_generation(Generation::Gen2);
            relink(ctx);
        }
    }
}

/// Classify and apply a direct nack
pub fn handle_nack(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage) {
    let outcome = classify_nack(ctx.device, msg);
    apply_nack(ctx, msg, outcome);
}

/// Close the nacked request without success and start link establishment
fn relink(ctx: &mut DeviceCtx<'_>) {
    let (tag, failure) = match ctx.device.last_sent.as_mut() {
        Some(request) => {
            request.acknowledge();
            // acknowledged so it is not sent again, but it did not succeed
            request.take_device_ack();
            (request.state(), request.take_failure())
        }
        None => return,
    };
    if let Some(tag) = tag {
        ctx.remove_state(tag);
    }
    if let Some(failure) = failure {
        failure(ctx);
    }
    if tag == Some(StateTag::Linking) || ctx.device.has_state(StateTag::Linking) {
        debug!("{}: link already in progress", ctx.address());
        return;
    }
    link::start(ctx, Sequence::new("link modem->device"));
}

/// Take the failure continuation of the outstanding request
///
/// A request that carries one belongs to a sequence; its device-ack
/// continuation is dropped with it.
fn take_failure(ctx: &mut DeviceCtx<'_>) -> Option<Continuation> {
    let request = ctx.device.last_sent.as_mut()?;
    let failure = request.take_failure()?;
    request.take_device_ack();
    Some(failure)
}
