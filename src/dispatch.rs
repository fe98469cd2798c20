// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Receive dispatcher
//!
//! Entry point for every inbound message addressed to a device: handle it by
//! message type, offer it to the device's triggers, then settle the
//! outstanding request.

use log::{debug, warn};

use crate::aldb::{Aldb, AldbRecord};
use crate::classifier::{self, check_outstanding, SpuriousReason};
use crate::device::{Device, DeviceCtx, DeviceVersion, StateTag};
use crate::protocol::{
    Field, InboundMessage, MessageType, BROADCAST_SET_BUTTON_CONTROLLER,
    BROADCAST_SET_BUTTON_RESPONDER, CMD_EXTENDED_ALDB, CMD_ID_REQUEST,
};

/// Process one inbound message for the device
pub fn receive(ctx: &mut DeviceCtx<'_>, mut msg: InboundMessage) {
    ctx.device.last_rcvd = Some(msg.clone());
    dispatch(ctx, &mut msg);
    ctx.run_triggers(&msg);
    ctx.settle();
}

/// Handle a message according to its type
pub fn dispatch(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage) {
    match msg.message_type {
        Some(MessageType::Direct) => handle_direct(ctx, msg),
        Some(MessageType::DirectAck) => classifier::handle_ack(ctx, msg),
        Some(MessageType::DirectNack) => classifier::handle_nack(ctx, msg),
        Some(MessageType::Broadcast) => handle_broadcast(ctx, msg),
        Some(MessageType::AllLinkCleanupAck) => handle_cleanup_ack(ctx, msg),
        Some(other) => debug!(
            "{}: {} cmd_1={:02X} not handled",
            ctx.address(),
            other,
            msg.byte(Field::Cmd1)
        ),
        None => debug!(
            "{}: modem event {:02X}",
            ctx.address(),
            msg.byte(Field::ModemCmd)
        ),
    }
}

fn handle_direct(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage) {
    if !(msg.is_extended() && msg.byte(Field::Cmd1) == CMD_EXTENDED_ALDB) {
        debug!(
            "{}: unhandled direct message cmd_1={:02X}",
            ctx.address(),
            msg.byte(Field::Cmd1)
        );
        return;
    }
    match classify_record(ctx.device, msg) {
        Ok((key, record)) => {
            debug!("{}: ALDB record {:04X} received", ctx.address(), key);
            ctx.device.aldb.edit(key, record);
            ctx.acknowledge();
        }
        Err(reason) => {
            msg.allow_trigger = false;
            warn!("{}: spurious ALDB record: {}", ctx.address(), reason);
        }
    }
}

/// Validate an extended ALDB record against the outstanding read
pub fn classify_record(
    device: &Device,
    msg: &InboundMessage,
) -> Result<(u16, AldbRecord), SpuriousReason> {
    if !device.has_state(StateTag::QueryAldb) {
        return Err(SpuriousReason::NotScanning);
    }
    let request = device
        .last_sent()
        .ok_or(SpuriousReason::NoOutstandingRequest)?;
    if request.field(Field::Cmd1) != CMD_EXTENDED_ALDB
        || !request.preliminary_acknowledged()
        || request.device_acknowledged()
    {
        return Err(SpuriousReason::UnexpectedRecord);
    }

    let msb = msg.byte(Field::Usr(3));
    let lsb = msg.byte(Field::Usr(4));
    let read = device
        .history()
        .latest("read_aldb")
        .ok_or(SpuriousReason::UnexpectedRecord)?;
    let requested = (
        read.fields.get(Field::Usr(3)).unwrap_or(0),
        read.fields.get(Field::Usr(4)).unwrap_or(0),
    );
    if requested != (0x00, 0x00) && requested != (msb, lsb) {
        return Err(SpuriousReason::RecordMismatch { msb, lsb });
    }

    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = msg.byte(Field::Usr(6 + i as u8));
    }
    Ok((Aldb::key(msb, lsb), AldbRecord::new(bytes)))
}

fn handle_broadcast(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage) {
    let cmd_1 = msg.byte(Field::Cmd1);
    if cmd_1 != BROADCAST_SET_BUTTON_RESPONDER && cmd_1 != BROADCAST_SET_BUTTON_CONTROLLER {
        debug!(
            "{}: unrecognized broadcast cmd_1={:02X}",
            ctx.address(),
            cmd_1
        );
        return;
    }

    let waiting = ctx.device.last_sent().map_or(false, |req| {
        req.field(Field::Cmd1) == CMD_ID_REQUEST
            && req.preliminary_acknowledged()
            && !req.device_acknowledged()
    });
    if !waiting {
        msg.allow_trigger = false;
        warn!(
            "{}: spurious broadcast: {}",
            ctx.address(),
            SpuriousReason::UnsolicitedBroadcast
        );
        return;
    }

    // the to-address of a set-button broadcast carries the device identity
    let version = DeviceVersion {
        category: msg.byte(Field::ToHi),
        sub_category: msg.byte(Field::ToMid),
        firmware: msg.byte(Field::ToLow),
    };
    debug!(
        "{}: category {:02X} sub-category {:02X} firmware {:02X}",
        ctx.address(),
        version.category,
        version.sub_category,
        version.firmware
    );
    ctx.device.version = Some(version);
    ctx.acknowledge();
}

fn handle_cleanup_ack(ctx: &mut DeviceCtx<'_>, msg: &mut InboundMessage) {
    let cmd_1 = msg.byte(Field::Cmd1);
    let cmd_2 = msg.byte(Field::Cmd2);
    let same = |fields: (u8, u8)| fields == (cmd_1, cmd_2);

    let before = ctx.device.queue.len();
    ctx.device.queue.retain(|req| {
        req.message_type() != Some(MessageType::AllLinkCleanup)
            || !same((req.field(Field::Cmd1), req.field(Field::Cmd2)))
    });
    let dropped = before - ctx.device.queue.len();
    if dropped > 0 {
        debug!(
            "{}: dropped {} queued cleanup messages",
            ctx.address(),
            dropped
        );
    }

    let outstanding = check_outstanding(ctx.device, msg)
        .map_or(false, |req| same((req.field(Field::Cmd1), req.field(Field::Cmd2))));
    if outstanding {
        ctx.acknowledge();
    } else {
        debug!(
            "{}: cleanup ack cmd_1={:02X} cmd_2={:02X} matches nothing outstanding",
            ctx.address(),
            cmd_1,
            cmd_2
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::device::{Device, NoopLifecycle};
    use crate::modem::Modem;
    use crate::protocol::Address;
    use crate::request::Request;
    use crate::schema::CommandTemplate;
    use std::time::Instant;

    const DEV: Address = Address::new(0x11, 0x22, 0x33);
    const MODEM: Address = Address::new(0x44, 0x55, 0x66);

    fn sent(device: &mut Device, request: Request) {
        let mut request = request;
        request.mark_plm_acknowledged();
        device.mark_sent(request, Instant::now());
    }

    fn request(device: &Device, name: &str, fields: &[(&str, u8)]) -> Request {
        Request::from_template(device.schema().template(name).unwrap(), DEV)
            .with_fields(fields)
            .unwrap()
    }

    fn record_msg(msb: u8, lsb: u8, record: [u8; 8]) -> InboundMessage {
        let mut usr = [0u8; 14];
        usr[1] = 0x01;
        usr[2] = msb;
        usr[3] = lsb;
        usr[5..13].copy_from_slice(&record);
        InboundMessage::extended(DEV, MODEM, MessageType::Direct, CMD_EXTENDED_ALDB, 0x00, usr)
    }

    fn run(device: &mut Device, msg: InboundMessage) {
        let mut modem = Modem::new(MODEM);
        let mut lifecycle = NoopLifecycle;
        let config = EngineConfig::default();
        let mut ctx = DeviceCtx {
            device,
            modem: &mut modem,
            lifecycle: &mut lifecycle,
            config: &config,
        };
        receive(&mut ctx, msg);
    }

    #[test]
    fn test_record_stored_and_acknowledged() {
        let mut device = Device::new(DEV);
        device.add_state(StateTag::QueryAldb);
        let mut read = request(&device, "read_aldb", &[]);
        read.acknowledge_preliminary();
        sent(&mut device, read);

        let bytes = [0xE2, 0x01, 0x44, 0x55, 0x66, 0x03, 0x1C, 0x01];
        run(&mut device, record_msg(0x0F, 0xFF, bytes));
        assert_eq!(device.aldb().get(0x0FFF).unwrap().bytes(), bytes);
        assert!(device.last_sent().unwrap().device_acknowledged());
        assert!(device.last_received().is_some());
    }

    #[test]
    fn test_record_without_scan_is_spurious() {
        let mut device = Device::new(DEV);
        let mut read = request(&device, "read_aldb", &[]);
        read.acknowledge_preliminary();
        sent(&mut device, read);

        let msg = record_msg(0x0F, 0xFF, [0xE2; 8]);
        assert_eq!(
            classify_record(&device, &msg),
            Err(SpuriousReason::NotScanning)
        );
        run(&mut device, msg);
        assert!(device.aldb().is_empty());
        assert!(!device.last_sent().unwrap().device_acknowledged());
    }

    #[test]
    fn test_record_address_must_match_read() {
        let mut device = Device::new(DEV);
        device.add_state(StateTag::QueryAldb);
        let mut read = request(&device, "read_aldb", &[("msb", 0x0F), ("lsb", 0xF7)]);
        read.acknowledge_preliminary();
        sent(&mut device, read);

        assert_eq!(
            classify_record(&device, &record_msg(0x0F, 0xEF, [0xE2; 8])),
            Err(SpuriousReason::RecordMismatch {
                msb: 0x0F,
                lsb: 0xEF
            })
        );
        assert!(classify_record(&device, &record_msg(0x0F, 0xF7, [0xE2; 8])).is_ok());
    }

    #[test]
    fn test_record_before_preliminary_is_spurious() {
        let mut device = Device::new(DEV);
        device.add_state(StateTag::QueryAldb);
        let read = request(&device, "read_aldb", &[]);
        sent(&mut device, read);
        assert_eq!(
            classify_record(&device, &record_msg(0x0F, 0xFF, [0xE2; 8])),
            Err(SpuriousReason::UnexpectedRecord)
        );
    }

    #[test]
    fn test_set_button_broadcast_completes_id_request() {
        let mut device = Device::new(DEV);
        let mut id = request(&device, "id_request", &[]);
        id.acknowledge_preliminary();
        sent(&mut device, id);

        let to = Address::new(0x01, 0x20, 0x45);
        let msg = InboundMessage::standard(DEV, to, MessageType::Broadcast, 0x01, 0x00);
        run(&mut device, msg);
        let version = device.version().unwrap();
        assert_eq!(version.category, 0x01);
        assert_eq!(version.sub_category, 0x20);
        assert_eq!(version.firmware, 0x45);
        assert!(device.last_sent().unwrap().device_acknowledged());
    }

    #[test]
    fn test_unsolicited_broadcast_ignored() {
        let mut device = Device::new(DEV);
        let to = Address::new(0x01, 0x20, 0x45);
        run(
            &mut device,
            InboundMessage::standard(DEV, to, MessageType::Broadcast, 0x02, 0x00),
        );
        assert!(device.version().is_none());
    }

    #[test]
    fn test_cleanup_ack_drops_duplicates() {
        let mut device = Device::new(DEV);
        let template = CommandTemplate::cleanup("cleanup_on")
            .field(Field::Cmd1, 0x11)
            .field(Field::Cmd2, 0x01);
        sent(&mut device, Request::from_template(&template, DEV));
        device.enqueue(Request::from_template(&template, DEV));
        device.enqueue(request(&device, "off", &[]));

        let msg = InboundMessage::standard(DEV, MODEM, MessageType::AllLinkCleanupAck, 0x11, 0x01);
        run(&mut device, msg);
        assert!(device.last_sent().unwrap().device_acknowledged());
        assert_eq!(device.queue_len(), 1);
        assert_eq!(device.queue().next().unwrap().command(), "off");
    }
}
