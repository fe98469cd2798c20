// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Modem to device link establishment
//!
//! 1. modem `all_link_start` (modem becomes controller)
//! 2. device `enter_link_mode`
//! 3. wait for the modem's all-link complete event for the device
//! 4. clear the linking tags and resume device initialization
//!
//! A failing step clears the tags and fails the sequence. Nothing is retried.

use log::info;

use crate::device::{DeviceCtx, StateTag};
use crate::error::Result;
use crate::protocol::{Field, MODEM_LINK_COMPLETE};
use crate::request::Request;
use crate::sequence::Sequence;
use crate::trigger::Trigger;

/// Start linking the modem to the device
pub(crate) fn start(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    info!("{}: linking modem to device", ctx.address());
    ctx.add_state(StateTag::Linking);
    ctx.modem.add_state(StateTag::Linking);

    let request = match start_linking(ctx) {
        Ok(request) => request,
        Err(e) => return fail_link(ctx, seq, e.to_string()),
    };
    let (next, failed) = (seq.clone(), seq);
    let request = request
        .on_modem_ack(move |ctx| step_2(ctx, next))
        .on_failure(move |ctx| fail_link(ctx, failed, "modem did not start linking"));
    ctx.enqueue(request);
}

fn start_linking(ctx: &DeviceCtx<'_>) -> Result<Request> {
    let request = ctx
        .create_request("all_link_start")?
        .with_fields(&[
            ("link_code", ctx.config.link_code),
            ("group", ctx.config.link_group),
        ])?
        .with_state(StateTag::Linking);
    Ok(request)
}

fn step_2(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let group = ctx.config.link_group;
    let request = match ctx
        .create_request("enter_link_mode")
        .and_then(|r| Ok(r.with_fields(&[("group", group)])?))
    {
        Ok(request) => request.with_state(StateTag::Linking),
        Err(e) => return fail_link(ctx, seq, e.to_string()),
    };
    let (next, failed) = (seq.clone(), seq);
    let request = request
        .on_device_ack(move |ctx| step_3(ctx, next))
        .on_failure(move |ctx| fail_link(ctx, failed, "device did not enter linking mode"));
    ctx.enqueue(request);
}

fn step_3(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    let (next, cancelled) = (seq.clone(), seq);
    let trigger = Trigger::from_device(ctx.address(), move |ctx| step_4(ctx, next))
        .field(Field::ModemCmd, MODEM_LINK_COMPLETE)
        .field(Field::LinkCode, ctx.config.link_code)
        .tagged(StateTag::Linking)
        .on_cancel(move |ctx| fail_link(ctx, cancelled, "link cancelled"));
    ctx.register_trigger("add_modem_step_3", trigger);
}

fn step_4(ctx: &mut DeviceCtx<'_>, seq: Sequence) {
    ctx.remove_state(StateTag::Linking);
    ctx.modem.remove_state(StateTag::Linking);
    info!("{}: modem linked", ctx.address());
    ctx.lifecycle.advance_initialization(ctx.device);
    seq.succeed(ctx);
}

fn fail_link(ctx: &mut DeviceCtx<'_>, seq: Sequence, reason: impl Into<String>) {
    seq.fail(ctx, reason);
    ctx.remove_state(StateTag::Linking);
    ctx.modem.remove_state(StateTag::Linking);
}
