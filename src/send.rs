// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Send handler
//!
//! Builds requests from command templates and queues them, and exposes the
//! sequence entry points. Everything here runs against a [`DeviceCtx`];
//! nothing is transmitted until the network polls for the next
//! transmission.

use log::debug;

use crate::aldb::AldbRecord;
use crate::device::{DeviceCtx, StateTag};
use crate::error::Result;
use crate::protocol::Generation;
use crate::request::{Destination, Request};
use crate::sequence::{delta, link, scan, status, write, Sequence};

impl<'a> DeviceCtx<'a> {
    /// Build a request from the device's command schema
    pub fn create_request(&self, name: &str) -> Result<Request> {
        let template = self.device.schema.template(name)?;
        Ok(Request::from_template(template, self.device.address))
    }

    /// Queue a request on the device, or on the modem for modem commands
    pub fn enqueue(&mut self, request: Request) {
        debug!("{}: queue {}", self.device.address, request.command());
        match request.destination() {
            Destination::Device(_) => self.device.enqueue(request),
            Destination::Modem { .. } => self.modem.enqueue(request),
        }
    }

    /// Queue a command with default field values
    pub fn send_command(&mut self, name: &str, tag: Option<StateTag>) -> Result<()> {
        let mut request = self.create_request(name)?;
        if let Some(tag) = tag {
            request = request.with_state(tag);
        }
        self.enqueue(request);
        Ok(())
    }

    /// Ask the device for its engine version; the reply sets the generation
    pub fn get_engine_version(&mut self) -> Result<()> {
        self.send_command("get_engine_version", None)
    }

    /// Ask the device for its category, sub-category and firmware
    pub fn get_device_version(&mut self) -> Result<()> {
        self.send_command("id_request", None)
    }

    /// Turn the device on at `level`
    pub fn turn_on(&mut self, level: u8) -> Result<()> {
        let request = self.create_request("on")?.with_fields(&[("level", level)])?;
        self.enqueue(request);
        Ok(())
    }

    /// Turn the device off
    pub fn turn_off(&mut self) -> Result<()> {
        self.send_command("off", None)
    }

    /// Request the on-level; rescans the ALDB if its delta changed
    pub fn get_status(&mut self, seq: Sequence) {
        status::start(self, seq);
    }

    /// Refresh the stored ALDB delta
    pub fn refresh_aldb_delta(&mut self, seq: Sequence) {
        delta::start(self, seq);
    }

    /// Read the whole ALDB into the local store
    ///
    /// The strategy follows the generation known at call time: byte peeks
    /// for generation 1, extended reads otherwise.
    pub fn query_aldb(&mut self, seq: Sequence) {
        match self.device.generation {
            Generation::Gen1 => scan::start_legacy(self, seq),
            Generation::Gen2 | Generation::Unknown => scan::start_extended(self, seq),
        }
    }

    /// Write one record at `(msb, lsb)`
    pub fn write_aldb_record(&mut self, msb: u8, lsb: u8, record: AldbRecord, seq: Sequence) {
        write::start(self, msb, lsb, record, seq);
    }

    /// Link the modem to the device as controller
    pub fn add_modem_to_device_link(&mut self, seq: Sequence) {
        link::start(self, seq);
    }

    /// Select the ALDB page for the following peeks
    pub(crate) fn set_aldb_msb(&mut self, msb: u8, seq: &Sequence) -> Result<()> {
        let request = self
            .create_request("set_address_msb")?
            .with_fields(&[("msb", msb)])?
            .with_state(StateTag::QueryAldb)
            .on_failure(abandon_scan(seq, "set_address_msb"));
        self.enqueue(request);
        Ok(())
    }

    /// Peek one ALDB byte in the selected page
    pub(crate) fn peek_aldb(&mut self, lsb: u8, seq: &Sequence) -> Result<()> {
        let request = self
            .create_request("peek_one_byte")?
            .with_fields(&[("lsb", lsb)])?
            .with_state(StateTag::QueryAldb)
            .on_failure(abandon_scan(seq, "peek_one_byte"));
        self.enqueue(request);
        Ok(())
    }

    /// Read one ALDB record; `(0, 0)` asks for the first record
    pub(crate) fn read_aldb(&mut self, msb: u8, lsb: u8, seq: &Sequence) -> Result<()> {
        let request = self
            .create_request("read_aldb")?
            .with_fields(&[("msb", msb), ("lsb", lsb)])?
            .with_state(StateTag::QueryAldb)
            .on_failure(abandon_scan(seq, "read_aldb"));
        self.enqueue(request);
        Ok(())
    }
}

/// Failure continuation of a scan request: fail the scan and end it
fn abandon_scan(
    seq: &Sequence,
    command: &'static str,
) -> impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static {
    let seq = seq.clone();
    move |ctx: &mut DeviceCtx<'_>| {
        seq.fail(ctx, format!("{} abandoned", command));
        ctx.remove_state(StateTag::QueryAldb);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::device::{Device, DeviceCtx, NoopLifecycle};
    use crate::error::{InsteonError, SchemaError};
    use crate::modem::Modem;
    use crate::protocol::{Address, Field};

    #[test]
    fn test_requests_queue_in_order() {
        let mut device = Device::new(Address::new(1, 2, 3));
        let mut modem = Modem::new(Address::new(4, 5, 6));
        let mut lifecycle = NoopLifecycle;
        let config = EngineConfig::default();
        let mut ctx = DeviceCtx {
            device: &mut device,
            modem: &mut modem,
            lifecycle: &mut lifecycle,
            config: &config,
        };

        ctx.get_engine_version().unwrap();
        ctx.turn_on(0x7F).unwrap();
        ctx.send_command("all_link_start", None).unwrap();
        let err = ctx.send_command("dance", None).unwrap_err();
        assert_eq!(
            err,
            InsteonError::Schema(SchemaError::UnknownCommand("dance".to_string()))
        );

        assert_eq!(ctx.modem.queue_len(), 1);
        let commands: Vec<&str> = ctx.device.queue().map(|r| r.command()).collect();
        assert_eq!(commands, vec!["get_engine_version", "on"]);
        let on = ctx.device.queue().nth(1).unwrap();
        assert_eq!(on.field(Field::Cmd2), 0x7F);
    }
}
