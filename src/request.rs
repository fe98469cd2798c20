// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Outgoing requests
//!
//! A [`Request`] is one outgoing command plus everything needed to correlate
//! the responses it provokes: the three acknowledgment flags, the state tag
//! it was issued under and the continuations to run at each stage.
//!
//! ## Acknowledgment phases
//!
//! ```text
//! queued -> sent -> plm_acknowledged -> [preliminary_acknowledged] -> device_acknowledged
//! ```
//!
//! The preliminary phase only exists for two-phase commands (`id_request`,
//! `read_aldb`), which are answered by an ack followed by a second message.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use crate::device::{Continuation, DeviceCtx, StateTag};
use crate::error::SchemaError;
use crate::protocol::{Address, Field, Fields, LengthClass, MessageType};
use crate::schema::{CommandTemplate, TemplateTarget};

/// Where a request is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// An Insteon device
    Device(Address),
    /// The modem, on behalf of a device
    Modem {
        /// Device whose sequence issued the request
        owner: Address,
    },
}

impl Destination {
    /// Device the request belongs to
    pub fn owner(&self) -> Address {
        match self {
            Destination::Device(address) => *address,
            Destination::Modem { owner } => *owner,
        }
    }

    /// Check if the request goes to the modem
    pub fn is_modem(&self) -> bool {
        matches!(self, Destination::Modem { .. })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Device(address) => write!(f, "{}", address),
            Destination::Modem { owner } => write!(f, "modem (for {})", owner),
        }
    }
}

/// One outgoing command and its acknowledgment state
pub struct Request {
    template: CommandTemplate,
    destination: Destination,
    fields: Fields,
    plm_acknowledged: bool,
    preliminary_acknowledged: bool,
    device_acknowledged: bool,
    state: Option<StateTag>,
    attempts: u32,
    sent_at: Option<Instant>,
    on_modem_ack: Option<Continuation>,
    on_device_ack: Option<Continuation>,
    on_failure: Option<Continuation>,
}

impl Request {
    /// Build a request from a template, filling in the default bytes
    pub fn from_template(template: &CommandTemplate, owner: Address) -> Self {
        let mut fields: Fields = template
            .fields
            .iter()
            .map(|spec| (spec.field, spec.default))
            .collect();
        let destination = match template.target {
            TemplateTarget::Device => {
                fields.set_to(owner);
                if let Some(message_type) = template.message_type {
                    fields.set(Field::Flags, message_type.flags(template.length));
                }
                Destination::Device(owner)
            }
            TemplateTarget::Modem => Destination::Modem { owner },
        };
        Self {
            template: template.clone(),
            destination,
            fields,
            plm_acknowledged: false,
            preliminary_acknowledged: false,
            device_acknowledged: false,
            state: None,
            attempts: 0,
            sent_at: None,
            on_modem_ack: None,
            on_device_ack: None,
            on_failure: None,
        }
    }

    /// Set fields by name or alias
    pub fn set_fields(&mut self, values: &[(&str, u8)]) -> Result<(), SchemaError> {
        for (name, value) in values {
            let field = self.template.resolve(name)?;
            self.fields.set(field, *value);
        }
        Ok(())
    }

    /// Builder form of [`Request::set_fields`]
    pub fn with_fields(mut self, values: &[(&str, u8)]) -> Result<Self, SchemaError> {
        self.set_fields(values)?;
        Ok(self)
    }

    /// Tag the request with a device state
    pub fn with_state(mut self, tag: StateTag) -> Self {
        self.state = Some(tag);
        self
    }

    /// Run `f` once the modem accepts the request
    pub fn on_modem_ack(mut self, f: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        self.on_modem_ack = Some(Box::new(f));
        self
    }

    /// Run `f` once the device acknowledges the request
    pub fn on_device_ack(mut self, f: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        self.on_device_ack = Some(Box::new(f));
        self
    }

    /// Run `f` if the request is abandoned
    pub fn on_failure(mut self, f: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Command name
    pub fn command(&self) -> &str {
        &self.template.name
    }

    /// Destination
    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Insteon message type (`None` for modem commands)
    pub fn message_type(&self) -> Option<MessageType> {
        self.template.message_type
    }

    /// Length class
    pub fn length(&self) -> LengthClass {
        self.template.length
    }

    /// Check if the command completes in two phases
    pub fn is_two_phase(&self) -> bool {
        self.template.two_phase
    }

    /// Field values
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Value of one field, zero when absent
    pub fn field(&self, field: Field) -> u8 {
        self.fields.get(field).unwrap_or(0)
    }

    /// State tag the request was issued under
    pub fn state(&self) -> Option<StateTag> {
        self.state
    }

    /// Number of times the request was resent
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the request was last handed to the modem
    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    /// Check if the modem accepted the request
    pub fn plm_acknowledged(&self) -> bool {
        self.plm_acknowledged
    }

    /// Check if the first phase of a two-phase command completed
    pub fn preliminary_acknowledged(&self) -> bool {
        self.preliminary_acknowledged
    }

    /// Check if the device acknowledged the request
    pub fn device_acknowledged(&self) -> bool {
        self.device_acknowledged
    }

    /// Mark the request device-acknowledged
    ///
    /// Returns `true` only on the transition; later calls are no-ops.
    pub fn acknowledge(&mut self) -> bool {
        if self.device_acknowledged {
            return false;
        }
        self.device_acknowledged = true;
        if self.template.two_phase {
            self.preliminary_acknowledged = true;
        }
        true
    }

    /// Mark the first phase of a two-phase command complete
    pub fn acknowledge_preliminary(&mut self) -> bool {
        if self.preliminary_acknowledged {
            return false;
        }
        self.preliminary_acknowledged = true;
        true
    }

    pub(crate) fn mark_plm_acknowledged(&mut self) {
        self.plm_acknowledged = true;
    }

    pub(crate) fn mark_sent(&mut self, now: Instant) {
        self.sent_at = Some(now);
    }

    /// Clear the acknowledgment state before sending the request again
    pub(crate) fn reset_for_resend(&mut self) {
        self.plm_acknowledged = false;
        self.preliminary_acknowledged = false;
        self.device_acknowledged = false;
        self.sent_at = None;
        self.attempts += 1;
    }

    pub(crate) fn take_modem_ack(&mut self) -> Option<Continuation> {
        self.on_modem_ack.take()
    }

    pub(crate) fn take_device_ack(&mut self) -> Option<Continuation> {
        self.on_device_ack.take()
    }

    pub(crate) fn take_failure(&mut self) -> Option<Continuation> {
        self.on_failure.take()
    }

    /// Envelope handed to the codec
    pub fn transmission(&self) -> Transmission {
        Transmission {
            destination: self.destination,
            command: self.template.name.clone(),
            message_type: self.template.message_type,
            length: self.template.length,
            fields: self.fields.clone(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.template.name)
            .field("destination", &self.destination)
            .field("fields", &self.fields)
            .field("plm_acknowledged", &self.plm_acknowledged)
            .field("preliminary_acknowledged", &self.preliminary_acknowledged)
            .field("device_acknowledged", &self.device_acknowledged)
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("on_modem_ack", &self.on_modem_ack.is_some())
            .field("on_device_ack", &self.on_device_ack.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Outgoing message envelope for the codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Device or modem
    pub destination: Destination,
    /// Command name
    pub command: String,
    /// Insteon message type (`None` for modem commands)
    pub message_type: Option<MessageType>,
    /// Standard or extended
    pub length: LengthClass,
    /// Field values
    pub fields: Fields,
}

impl Transmission {
    /// Value of one field, zero when absent
    pub fn field(&self, field: Field) -> u8 {
        self.fields.get(field).unwrap_or(0)
    }
}

/// Record of a command handed to the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    /// Command name
    pub command: String,
    /// Field values as sent
    pub fields: Fields,
    /// When it was sent
    pub sent_at: Instant,
}

/// Bounded history of sent commands
///
/// The most recent command of each name is kept even after it leaves the
/// bounded window: a legacy scan peeks hundreds of bytes under one
/// `set_address_msb`.
#[derive(Debug, Clone)]
pub struct SentHistory {
    recent: VecDeque<SentCommand>,
    latest: HashMap<String, SentCommand>,
    depth: usize,
}

impl SentHistory {
    /// Create a history keeping `depth` recent commands
    pub fn new(depth: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(depth),
            latest: HashMap::new(),
            depth,
        }
    }

    /// Record a sent request
    pub fn push(&mut self, request: &Request, now: Instant) {
        let entry = SentCommand {
            command: request.command().to_string(),
            fields: request.fields().clone(),
            sent_at: now,
        };
        self.latest.insert(entry.command.clone(), entry.clone());
        if self.depth == 0 {
            return;
        }
        if self.recent.len() == self.depth {
            self.recent.pop_front();
        }
        self.recent.push_back(entry);
    }

    /// Most recent command sent under this name
    pub fn latest(&self, command: &str) -> Option<&SentCommand> {
        self.latest.get(command)
    }

    /// Recent commands, newest first
    pub fn recent(&self) -> impl Iterator<Item = &SentCommand> {
        self.recent.iter().rev()
    }

    /// Number of commands in the bounded window
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// Check if nothing was sent yet
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CommandSchema;

    const DEV: Address = Address::new(0x11, 0x22, 0x33);

    fn request(name: &str) -> Request {
        let schema = CommandSchema::generic();
        Request::from_template(schema.template(name).unwrap(), DEV)
    }

    #[test]
    fn test_defaults_and_addressing() {
        let req = request("read_aldb");
        assert_eq!(req.destination(), Destination::Device(DEV));
        assert_eq!(req.field(Field::Cmd1), 0x2F);
        assert_eq!(req.field(Field::Usr(5)), 0x01);
        assert_eq!(req.field(Field::ToMid), 0x22);
        assert_eq!(req.field(Field::Flags) & 0x10, 0x10);
        assert!(req.is_two_phase());
    }

    #[test]
    fn test_set_fields_by_alias() {
        let mut req = request("read_aldb");
        req.set_fields(&[("msb", 0x0F), ("lsb", 0xF7)]).unwrap();
        assert_eq!(req.field(Field::Usr(3)), 0x0F);
        assert_eq!(req.field(Field::Usr(4)), 0xF7);
        assert!(req.set_fields(&[("level", 1)]).is_err());
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut req = request("on");
        assert!(req.acknowledge());
        assert!(!req.acknowledge());
        assert!(req.device_acknowledged());
        // single-phase commands never need the preliminary flag
        assert!(!req.preliminary_acknowledged());
    }

    #[test]
    fn test_acknowledge_two_phase_sets_preliminary() {
        let mut req = request("id_request");
        assert!(req.acknowledge());
        assert!(req.preliminary_acknowledged());
    }

    #[test]
    fn test_reset_for_resend() {
        let mut req = request("get_engine_version");
        req.mark_plm_acknowledged();
        req.mark_sent(Instant::now());
        req.acknowledge();
        req.reset_for_resend();
        assert!(!req.plm_acknowledged());
        assert!(!req.device_acknowledged());
        assert!(req.sent_at().is_none());
        assert_eq!(req.attempts(), 1);
    }

    #[test]
    fn test_modem_request() {
        let req = request("all_link_start");
        assert!(req.destination().is_modem());
        assert_eq!(req.destination().owner(), DEV);
        assert_eq!(req.message_type(), None);
        assert_eq!(req.fields().get(Field::ToHi), None);
        assert_eq!(req.transmission().field(Field::ModemCmd), 0x64);
    }

    #[test]
    fn test_history_keeps_latest_per_command() {
        let mut history = SentHistory::new(2);
        let now = Instant::now();
        let mut msb = request("set_address_msb");
        msb.set_fields(&[("msb", 0x0F)]).unwrap();
        history.push(&msb, now);
        for _ in 0..5 {
            history.push(&request("peek_one_byte"), now);
        }
        assert_eq!(history.len(), 2);
        assert!(history.recent().all(|c| c.command == "peek_one_byte"));
        let latest = history.latest("set_address_msb").unwrap();
        assert_eq!(latest.fields.get(Field::Cmd2), Some(0x0F));
    }
}
