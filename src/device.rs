// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-device state and the device context
//!
//! A [`Device`] owns everything the engine knows about one Insteon device.
//! Handlers, triggers and sequences never reach it through shared state:
//! they receive a [`DeviceCtx`], which bundles the device with the modem
//! and the lifecycle hook for the duration of one call.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use log::debug;

use crate::aldb::Aldb;
use crate::config::EngineConfig;
use crate::modem::Modem;
use crate::protocol::{Address, Generation, InboundMessage};
use crate::request::{Request, SentHistory};
use crate::schema::CommandSchema;
use crate::trigger::{Trigger, TriggerRegistry};

/// A suspended piece of a choreography
pub type Continuation = Box<dyn FnOnce(&mut DeviceCtx<'_>) + Send>;

/// Device activity tags
///
/// Tags gate which responses are meaningful: an ALDB record arriving without
/// `QueryAldb` set is spurious. Clearing a tag cancels the triggers that
/// carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTag {
    /// An ALDB scan is running
    QueryAldb,
    /// An ALDB record is being written
    WriteAldb,
    /// Modem and device are being linked
    Linking,
    /// A status request is running
    Status,
}

impl StateTag {
    /// Tag name as used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            StateTag::QueryAldb => "query_aldb",
            StateTag::WriteAldb => "write_aldb",
            StateTag::Linking => "link modem->device",
            StateTag::Status => "status",
        }
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook into the externally owned device initialization
pub trait Lifecycle: Send {
    /// Called after the modem and the device were linked
    fn advance_initialization(&mut self, _device: &mut Device) {}
}

/// Lifecycle hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {}

/// Category, sub-category and firmware reported by an id request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceVersion {
    /// Device category
    pub category: u8,
    /// Device sub-category
    pub sub_category: u8,
    /// Firmware revision
    pub firmware: u8,
}

/// State of one Insteon device
pub struct Device {
    pub(crate) address: Address,
    pub(crate) generation: Generation,
    pub(crate) version: Option<DeviceVersion>,
    pub(crate) status: Option<u8>,
    pub(crate) last_sent: Option<Request>,
    pub(crate) last_rcvd: Option<InboundMessage>,
    pub(crate) queue: VecDeque<Request>,
    pub(crate) history: SentHistory,
    pub(crate) states: Vec<StateTag>,
    pub(crate) aldb: Aldb,
    pub(crate) triggers: TriggerRegistry,
    pub(crate) schema: Arc<CommandSchema>,
}

impl Device {
    /// Create a device using the generic command set
    pub fn new(address: Address) -> Self {
        Self::with_schema(address, Arc::new(CommandSchema::generic()), 16)
    }

    /// Create a device with a shared command schema
    pub fn with_schema(address: Address, schema: Arc<CommandSchema>, history_depth: usize) -> Self {
        Self {
            address,
            generation: Generation::Unknown,
            version: None,
            status: None,
            last_sent: None,
            last_rcvd: None,
            queue: VecDeque::new(),
            history: SentHistory::new(history_depth),
            states: Vec::new(),
            aldb: Aldb::new(),
            triggers: TriggerRegistry::new(),
            schema,
        }
    }

    /// Device address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Protocol generation as inferred so far
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Set the protocol generation
    pub fn set_generation(&mut self, generation: Generation) {
        if self.generation != generation {
            debug!("{}: generation {} -> {}", self.address, self.generation, generation);
        }
        self.generation = generation;
    }

    /// Category, sub-category and firmware, once learned
    pub fn version(&self) -> Option<DeviceVersion> {
        self.version
    }

    /// Last reported on-level
    pub fn status(&self) -> Option<u8> {
        self.status
    }

    /// Request currently outstanding, or last completed
    pub fn last_sent(&self) -> Option<&Request> {
        self.last_sent.as_ref()
    }

    /// Most recent inbound message
    pub fn last_received(&self) -> Option<&InboundMessage> {
        self.last_rcvd.as_ref()
    }

    /// Check if a request is waiting for the device's acknowledgment
    pub fn has_outstanding(&self) -> bool {
        self.last_sent
            .as_ref()
            .map_or(false, |req| !req.device_acknowledged())
    }

    /// Requests waiting to be sent
    pub fn queue(&self) -> impl Iterator<Item = &Request> {
        self.queue.iter()
    }

    /// Number of requests waiting to be sent
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Sent command history
    pub fn history(&self) -> &SentHistory {
        &self.history
    }

    /// Active state tags, oldest first
    pub fn states(&self) -> &[StateTag] {
        &self.states
    }

    /// Check if a state tag is active
    pub fn has_state(&self, tag: StateTag) -> bool {
        self.states.contains(&tag)
    }

    /// Local ALDB copy
    pub fn aldb(&self) -> &Aldb {
        &self.aldb
    }

    /// Mutable local ALDB copy
    pub fn aldb_mut(&mut self) -> &mut Aldb {
        &mut self.aldb
    }

    /// Pending triggers
    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    /// Command schema
    pub fn schema(&self) -> &CommandSchema {
        &self.schema
    }

    pub(crate) fn add_state(&mut self, tag: StateTag) {
        if !self.states.contains(&tag) {
            self.states.push(tag);
        }
    }

    /// Remove a tag and return the triggers it cancels
    pub(crate) fn take_state(&mut self, tag: StateTag) -> Vec<Trigger> {
        self.states.retain(|t| *t != tag);
        self.triggers.cancel_tagged(tag)
    }

    pub(crate) fn enqueue(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    /// Next request to send: requests under an active tag go first
    pub(crate) fn pop_next(&mut self) -> Option<Request> {
        let preferred = self.queue.iter().position(|req| {
            req.state()
                .map_or(false, |tag| self.states.contains(&tag))
        });
        match preferred {
            Some(index) => self.queue.remove(index),
            None => self.queue.pop_front(),
        }
    }

    /// Make `request` the outstanding request
    pub(crate) fn mark_sent(&mut self, mut request: Request, now: Instant) {
        request.mark_sent(now);
        self.history.push(&request, now);
        self.last_sent = Some(request);
    }

    /// Put the outstanding request back at the front of the queue
    pub(crate) fn requeue_last_sent(&mut self) -> bool {
        match self.last_sent.take() {
            Some(mut request) => {
                request.reset_for_resend();
                self.queue.push_front(request);
                true
            }
            None => false,
        }
    }

    /// Name of the outstanding (or last) request
    pub(crate) fn last_sent_command(&self) -> Option<&str> {
        self.last_sent.as_ref().map(|req| req.command())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("generation", &self.generation)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("last_sent", &self.last_sent)
            .field("queue", &self.queue.len())
            .field("states", &self.states)
            .field("aldb", &self.aldb.len())
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

/// Everything a handler may touch while processing one event for a device
pub struct DeviceCtx<'a> {
    /// The device being processed
    pub device: &'a mut Device,
    /// The shared modem
    pub modem: &'a mut Modem,
    /// Device initialization hook
    pub lifecycle: &'a mut dyn Lifecycle,
    /// Engine configuration
    pub config: &'a EngineConfig,
}

impl<'a> DeviceCtx<'a> {
    /// Device address
    pub fn address(&self) -> Address {
        self.device.address
    }

    /// Run a continuation against this context
    pub fn run(&mut self, continuation: Continuation) {
        continuation(self);
    }

    /// Set a state tag on the device
    pub fn add_state(&mut self, tag: StateTag) {
        debug!("{}: enter state {}", self.device.address, tag);
        self.device.add_state(tag);
    }

    /// Clear a state tag and cancel the triggers carrying it
    pub fn remove_state(&mut self, tag: StateTag) {
        if self.device.has_state(tag) {
            debug!("{}: leave state {}", self.device.address, tag);
        }
        for trigger in self.device.take_state(tag) {
            if let Some(cancel) = trigger.into_cancel() {
                cancel(self);
            }
        }
    }

    /// Register a trigger on the device
    pub fn register_trigger(&mut self, name: impl Into<String>, trigger: Trigger) {
        let name = name.into();
        if self.device.triggers.register(name.clone(), trigger).is_some() {
            debug!("{}: trigger {} replaced", self.device.address, name);
        }
    }

    /// Cancel a trigger by name, running its cancel continuation
    pub fn cancel_trigger(&mut self, name: &str) -> bool {
        match self.device.triggers.cancel(name) {
            Some(trigger) => {
                if let Some(cancel) = trigger.into_cancel() {
                    cancel(self);
                }
                true
            }
            None => false,
        }
    }

    /// Acknowledge the outstanding request
    pub fn acknowledge(&mut self) -> bool {
        self.device
            .last_sent
            .as_mut()
            .map_or(false, Request::acknowledge)
    }

    /// Resend the outstanding request after the modem back-off
    pub fn resend(&mut self) {
        if self.device.requeue_last_sent() {
            self.modem.back_off();
        }
    }

    /// Run every trigger matching `msg`, in registration order
    pub(crate) fn run_triggers(&mut self, msg: &InboundMessage) {
        let last_sent = self.device.last_sent_command().map(str::to_string);
        let fired = self.device.triggers.take_matching(msg, last_sent.as_deref());
        for (name, trigger) in fired {
            debug!("{}: trigger {} fired", self.device.address, name);
            let action = trigger.into_action();
            action(self);
        }
    }

    /// Run the device-ack continuation once the outstanding request is acknowledged
    pub(crate) fn settle(&mut self) {
        let continuation = match self.device.last_sent.as_mut() {
            Some(req) if req.device_acknowledged() => req.take_device_ack(),
            _ => None,
        };
        if let Some(continuation) = continuation {
            continuation(self);
        }
    }
}
