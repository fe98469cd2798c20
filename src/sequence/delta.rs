// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! ALDB delta refresh
//!
//! A light status request is answered with the ALDB delta in `cmd_1` and
//! the on-level in `cmd_2`.

use log::debug;

use crate::device::DeviceCtx;
use crate::protocol::{Field, MessageType};
use crate::sequence::Sequence;
use crate::trigger::Trigger;

const DELTA_TRIGGER: &str = "set_aldb_delta";

/// Start a delta refresh
pub(crate) fn start(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let request = match ctx.create_request("light_status_request") {
        Ok(request) => {
            let failed = seq.clone();
            request.on_failure(move |ctx: &mut DeviceCtx<'_>| {
                failed.fail(ctx, "light_status_request abandoned");
                ctx.cancel_trigger(DELTA_TRIGGER);
            })
        }
        Err(e) => return seq.fail(ctx, e.to_string()),
    };

    let next = seq.clone();
    let trigger = Trigger::from_device(ctx.address(), move |ctx| {
        let delta = ctx
            .device
            .last_received()
            .map(|msg| msg.byte(Field::Cmd1))
            .unwrap_or_default();
        debug!("{}: ALDB delta {:02X}", ctx.address(), delta);
        ctx.device.aldb.set_delta(delta);
        next.succeed(ctx);
    })
    .message_type(MessageType::DirectAck)
    .while_sent("light_status_request")
    .on_cancel(seq.fail_with("ALDB delta refresh cancelled"));
    ctx.register_trigger(DELTA_TRIGGER, trigger);
    ctx.enqueue(request);
}
