// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! ALDB record write
//!
//! Generation 2 devices take a whole record in one extended `write_aldb`
//! message and answer with a standard direct ack. Generation 1 devices
//! would need byte pokes, which are not supported.

use log::info;

use crate::aldb::{Aldb, AldbRecord};
use crate::device::{DeviceCtx, StateTag};
use crate::error::Result;
use crate::protocol::{Field, Generation, LengthClass, MessageType, CMD_EXTENDED_ALDB};
use crate::request::Request;
use crate::sequence::{delta, Sequence};
use crate::trigger::Trigger;

/// Start writing `record` at `(msb, lsb)`
pub(crate) fn start(ctx: &mut DeviceCtx<'_>, msb: u8, lsb: u8, record: AldbRecord, seq: Sequence) {
    if ctx.device.generation == Generation::Gen1 {
        return seq.fail(ctx, "ALDB writes are not supported on generation 1 devices");
    }

    let request = match build_request(ctx, msb, lsb, &record) {
        Ok(request) => {
            let failed = seq.clone();
            request
                .with_state(StateTag::WriteAldb)
                .on_failure(move |ctx: &mut DeviceCtx<'_>| {
                    failed.fail(ctx, "write_aldb abandoned");
                    ctx.remove_state(StateTag::WriteAldb);
                })
        }
        Err(e) => return seq.fail(ctx, e.to_string()),
    };
    info!(
        "{}: write ALDB {:02X}{:02X} {}",
        ctx.address(),
        msb,
        lsb,
        record
    );
    ctx.add_state(StateTag::WriteAldb);

    let next = seq.clone();
    let trigger = Trigger::from_device(ctx.address(), move |ctx| {
        ctx.device.aldb.edit(Aldb::key(msb, lsb), record);
        ctx.remove_state(StateTag::WriteAldb);
        delta::start(ctx, next.child("set ALDB delta"));
    })
    .message_type(MessageType::DirectAck)
    .length(LengthClass::Standard)
    .field(Field::Cmd1, CMD_EXTENDED_ALDB)
    .field(Field::Cmd2, 0x00)
    .while_sent("write_aldb")
    .tagged(StateTag::WriteAldb)
    .on_cancel(seq.fail_with("ALDB write cancelled"));
    ctx.register_trigger("write_aldb", trigger);
    ctx.enqueue(request);
}

/// Compile a record into the `write_aldb` field layout
fn build_request(ctx: &DeviceCtx<'_>, msb: u8, lsb: u8, record: &AldbRecord) -> Result<Request> {
    let peer = record.address();
    let [data_1, data_2, data_3] = record.data();
    let request = ctx.create_request("write_aldb")?.with_fields(&[
        ("msb", msb),
        ("lsb", lsb),
        ("link_flags", record.link_flags()),
        ("group", record.group()),
        ("dev_addr_hi", peer.hi()),
        ("dev_addr_mid", peer.mid()),
        ("dev_addr_low", peer.low()),
        ("data_1", data_1),
        ("data_2", data_2),
        ("data_3", data_3),
    ])?;
    Ok(request)
}
