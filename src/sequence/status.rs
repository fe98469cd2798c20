// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Status request
//!
//! Records the on-level and compares the reported ALDB delta with the one
//! stored locally. A mismatch means the local ALDB copy is stale: the full
//! scan runs before the status request completes.

use log::info;

use crate::device::{DeviceCtx, StateTag};
use crate::protocol::{Field, MessageType};
use crate::sequence::Sequence;
use crate::trigger::Trigger;

/// Start a status request
pub(crate) fn start(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let request = match ctx.create_request("light_status_request") {
        Ok(request) => {
            let failed = seq.clone();
            request
                .with_state(StateTag::Status)
                .on_failure(move |ctx: &mut DeviceCtx<'_>| {
                    failed.fail(ctx, "status request abandoned");
                    ctx.remove_state(StateTag::Status);
                })
        }
        Err(e) => return seq.fail(ctx, e.to_string()),
    };
    ctx.add_state(StateTag::Status);

    let next = seq.clone();
    let trigger = Trigger::from_device(ctx.address(), move |ctx| on_status(ctx, next))
        .message_type(MessageType::DirectAck)
        .while_sent("light_status_request")
        .tagged(StateTag::Status)
        .on_cancel(seq.fail_with("status request cancelled"));
    ctx.register_trigger("status_request", trigger);
    ctx.enqueue(request);
}

fn on_status(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let (delta, level) = match ctx.device.last_received() {
        Some(msg) => (msg.byte(Field::Cmd1), msg.byte(Field::Cmd2)),
        None => {
            seq.fail(ctx, "status reply without a message");
            return ctx.remove_state(StateTag::Status);
        }
    };
    ctx.device.status = Some(level);
    ctx.remove_state(StateTag::Status);

    if ctx.device.aldb.delta() == Some(delta) {
        seq.succeed(ctx);
        return;
    }

    info!(
        "{}: ALDB delta {:02X} differs from stored {:?}, rescanning",
        ctx.address(),
        delta,
        ctx.device.aldb.delta()
    );
    let parent = seq.clone();
    let scan = Sequence::new("query_aldb")
        .with_success(move |ctx| {
            ctx.device.aldb.set_delta(delta);
            parent.succeed(ctx);
        })
        .with_failure(seq.fail_with("ALDB rescan failed"));
    ctx.query_aldb(scan);
}
