// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! ALDB scans
//!
//! Two strategies read a device's link database into the local store:
//!
//! - **Legacy** (generation 1): select a page with `set_address_msb`, then
//!   `peek_one_byte` each of the 8 record bytes. The MSB is only sent again
//!   when the scan crosses a page boundary.
//! - **Extended** (generation 2): one `read_aldb` per record. The first read
//!   asks for `(0, 0)`, meaning "first record"; the device echoes the real
//!   address in `usr_3/usr_4`.
//!
//! Both walk downwards by the record width and stop on the sentinel record.

use log::{debug, info};

use crate::aldb::{Aldb, RECORD_WIDTH};
use crate::device::{DeviceCtx, StateTag};
use crate::protocol::{
    Field, LengthClass, MessageType, CMD_EXTENDED_ALDB, CMD_PEEK_ONE_BYTE, CMD_SET_ADDRESS_MSB,
};
use crate::sequence::{delta, Sequence};
use crate::trigger::Trigger;

const SCAN_TRIGGER: &str = "query_aldb";

/// Start a legacy byte-peek scan
pub(crate) fn start_legacy(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let (msb, lsb) = ctx.config.legacy_scan_start;
    // peeks address one record at a time from its first byte
    if Aldb::key(msb, lsb) % RECORD_WIDTH != 0 {
        return seq.fail(
            ctx,
            format!("legacy scan start {:02X}{:02X} is not record aligned", msb, lsb),
        );
    }
    info!(
        "{}: legacy ALDB scan from {:02X}{:02X}",
        ctx.address(),
        msb,
        lsb
    );
    ctx.device.aldb.clear();
    ctx.add_state(StateTag::QueryAldb);
    request_record(ctx, seq, msb, lsb, None);
}

/// Start an extended scan
pub(crate) fn start_extended(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    info!("{}: extended ALDB scan", ctx.address());
    ctx.device.aldb.clear();
    ctx.add_state(StateTag::QueryAldb);
    read_record(ctx, seq, 0x00, 0x00);
}

fn fail_scan(ctx: &mut DeviceCtx<'_>, seq: Sequence, reason: impl Into<String>) {
    seq.fail(ctx, reason);
    ctx.remove_state(StateTag::QueryAldb);
}

/// Legacy: read the record at `(msb, lsb)`; `page` is the MSB already selected
fn request_record(ctx: &mut DeviceCtx<'_>, seq: Sequence, msb: u8, lsb: u8, page: Option<u8>) {
    if page == Some(msb) {
        peek_byte(ctx, seq, msb, lsb, 0);
        return;
    }

    let next = seq.clone();
    let trigger = Trigger::from_device(ctx.address(), move |ctx| peek_byte(ctx, next, msb, lsb, 0))
        .message_type(MessageType::DirectAck)
        .field(Field::Cmd1, CMD_SET_ADDRESS_MSB)
        .field(Field::Cmd2, msb)
        .while_sent("set_address_msb")
        .tagged(StateTag::QueryAldb)
        .on_cancel(seq.fail_with("ALDB scan cancelled"));
    ctx.register_trigger(SCAN_TRIGGER, trigger);

    if let Err(e) = ctx.set_aldb_msb(msb, &seq) {
        fail_scan(ctx, seq, e.to_string());
    }
}

/// Legacy: peek byte `offset` of the record at `(msb, lsb)`
fn peek_byte(ctx: &mut DeviceCtx<'_>, seq: Sequence, msb: u8, lsb: u8, offset: u8) {
    let next = seq.clone();
    let trigger = Trigger::from_device(ctx.address(), move |ctx| {
        on_peek(ctx, next, msb, lsb, offset)
    })
    .message_type(MessageType::DirectAck)
    .field(Field::Cmd1, CMD_PEEK_ONE_BYTE)
    .while_sent("peek_one_byte")
    .tagged(StateTag::QueryAldb)
    .on_cancel(seq.fail_with("ALDB scan cancelled"));
    ctx.register_trigger(SCAN_TRIGGER, trigger);

    if let Err(e) = ctx.peek_aldb(lsb.wrapping_add(offset), &seq) {
        fail_scan(ctx, seq, e.to_string());
    }
}

fn on_peek(ctx: &mut DeviceCtx<'_>, seq: Sequence, msb: u8, lsb: u8, offset: u8) {
    // the classifier stored the byte; the peek is only complete here
    ctx.acknowledge();

    let key = Aldb::key(msb, lsb);
    if offset == 0 && ctx.device.aldb.is_last(key) {
        finish_legacy(ctx, seq);
        return;
    }
    if offset < 7 {
        peek_byte(ctx, seq, msb, lsb, offset + 1);
        return;
    }

    if let Some(record) = ctx.device.aldb.get(key) {
        debug!("{}: ALDB {:04X} {}", ctx.address(), key, record);
    }
    match Aldb::next_address(msb, lsb) {
        Some((next_msb, next_lsb)) => request_record(ctx, seq, next_msb, next_lsb, Some(msb)),
        None => fail_scan(ctx, seq, "ALDB address underflow"),
    }
}

fn finish_legacy(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    ctx.remove_state(StateTag::QueryAldb);
    info!(
        "{}: ALDB scan complete, {} records",
        ctx.address(),
        ctx.device.aldb.len()
    );
    delta::start(ctx, seq.child("set ALDB delta"));
}

/// Extended: read the record at `(msb, lsb)`
fn read_record(ctx: &mut DeviceCtx<'_>, seq: Sequence, msb: u8, lsb: u8) {
    let next = seq.clone();
    let mut trigger = Trigger::from_device(ctx.address(), move |ctx| on_record(ctx, next))
        .message_type(MessageType::Direct)
        .length(LengthClass::Extended)
        .field(Field::Cmd1, CMD_EXTENDED_ALDB)
        .while_sent("read_aldb")
        .tagged(StateTag::QueryAldb)
        .on_cancel(seq.fail_with("ALDB scan cancelled"));
    if (msb, lsb) != (0x00, 0x00) {
        trigger = trigger.field(Field::Usr(3), msb).field(Field::Usr(4), lsb);
    }
    ctx.register_trigger(SCAN_TRIGGER, trigger);

    if let Err(e) = ctx.read_aldb(msb, lsb, &seq) {
        fail_scan(ctx, seq, e.to_string());
    }
}

fn on_record(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let echoed = ctx
        .device
        .last_received()
        .map(|msg| (msg.byte(Field::Usr(3)), msg.byte(Field::Usr(4))));
    let (msb, lsb) = match echoed {
        Some(address) => address,
        None => return fail_scan(ctx, seq, "ALDB record without a message"),
    };

    let key = Aldb::key(msb, lsb);
    let record = match ctx.device.aldb.get(key) {
        Some(record) => *record,
        None => return fail_scan(ctx, seq, format!("no ALDB record stored at {:04X}", key)),
    };

    if record.is_last() {
        ctx.remove_state(StateTag::QueryAldb);
        info!(
            "{}: ALDB scan complete, {} records",
            ctx.address(),
            ctx.device.aldb.len()
        );
        seq.succeed(ctx);
        return;
    }

    debug!("{}: ALDB {:04X} {}", ctx.address(), key, record);
    match Aldb::next_address(msb, lsb) {
        Some((next_msb, next_lsb)) => read_record(ctx, seq, next_msb, next_lsb),
        None => fail_scan(ctx, seq, "ALDB address underflow"),
    }
}
