// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Trigger registry
//!
//! A trigger is a named, one-shot continuation waiting for an inbound message
//! that satisfies all of its predicates. Sequences suspend by registering a
//! trigger and returning; the device runs the continuation when the awaited
//! message arrives.

use std::fmt;

use crate::device::{Continuation, DeviceCtx, StateTag};
use crate::protocol::{Address, Field, InboundMessage, LengthClass, MessageType};

/// A condition on an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Named field equals a value; a missing field never matches
    Field(Field, u8),
    /// Insteon message type equals
    MessageType(MessageType),
    /// Length class equals
    Length(LengthClass),
}

impl Predicate {
    /// Check the predicate against a message
    pub fn holds(&self, msg: &InboundMessage) -> bool {
        match self {
            Predicate::Field(field, value) => msg.get(*field) == Some(*value),
            Predicate::MessageType(message_type) => msg.message_type == Some(*message_type),
            Predicate::Length(length) => msg.length == *length,
        }
    }
}

/// A pending one-shot continuation
pub struct Trigger {
    predicates: Vec<Predicate>,
    command: Option<String>,
    tag: Option<StateTag>,
    action: Continuation,
    on_cancel: Option<Continuation>,
}

impl Trigger {
    /// Create a trigger with no predicates
    pub fn new(action: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        Self {
            predicates: Vec::new(),
            command: None,
            tag: None,
            action: Box::new(action),
            on_cancel: None,
        }
    }

    /// Create a trigger matching messages sent by `address`
    pub fn from_device(
        address: Address,
        action: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static,
    ) -> Self {
        Self::new(action)
            .field(Field::FromHi, address.hi())
            .field(Field::FromMid, address.mid())
            .field(Field::FromLow, address.low())
    }

    /// Require a field value
    pub fn field(mut self, field: Field, value: u8) -> Self {
        self.predicates.push(Predicate::Field(field, value));
        self
    }

    /// Require a message type
    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.predicates.push(Predicate::MessageType(message_type));
        self
    }

    /// Require a length class
    pub fn length(mut self, length: LengthClass) -> Self {
        self.predicates.push(Predicate::Length(length));
        self
    }

    /// Only fire while the device's last sent request is `command`
    pub fn while_sent(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Cancel the trigger when `tag` is cleared
    pub fn tagged(mut self, tag: StateTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Run `f` if the trigger is cancelled before it fires
    pub fn on_cancel(mut self, f: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(f));
        self
    }

    /// Predicates
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// State tag
    pub fn tag(&self) -> Option<StateTag> {
        self.tag
    }

    /// Check whether the trigger fires for `msg`
    pub fn matches(&self, msg: &InboundMessage, last_sent: Option<&str>) -> bool {
        if !msg.allow_trigger {
            return false;
        }
        if let Some(command) = &self.command {
            if last_sent != Some(command.as_str()) {
                return false;
            }
        }
        self.predicates.iter().all(|p| p.holds(msg))
    }

    pub(crate) fn into_action(self) -> Continuation {
        self.action
    }

    pub(crate) fn into_cancel(self) -> Option<Continuation> {
        self.on_cancel
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("predicates", &self.predicates)
            .field("command", &self.command)
            .field("tag", &self.tag)
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

/// Triggers pending on one device, in registration order
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    entries: Vec<(String, Trigger)>,
}

impl TriggerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger, replacing any trigger of the same name
    ///
    /// Returns the replaced trigger. The new trigger takes the end of the
    /// registration order.
    pub fn register(&mut self, name: impl Into<String>, trigger: Trigger) -> Option<Trigger> {
        let name = name.into();
        let replaced = self.remove(&name);
        self.entries.push((name, trigger));
        replaced
    }

    /// Remove and return every trigger that fires for `msg`, in order
    pub fn take_matching(
        &mut self,
        msg: &InboundMessage,
        last_sent: Option<&str>,
    ) -> Vec<(String, Trigger)> {
        if !msg.allow_trigger {
            return Vec::new();
        }
        let mut matched = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for (name, trigger) in self.entries.drain(..) {
            if trigger.matches(msg, last_sent) {
                matched.push((name, trigger));
            } else {
                kept.push((name, trigger));
            }
        }
        self.entries = kept;
        matched
    }

    /// Remove a trigger by name
    pub fn cancel(&mut self, name: &str) -> Option<Trigger> {
        self.remove(name)
    }

    /// Remove every trigger carrying `tag`
    pub fn cancel_tagged(&mut self, tag: StateTag) -> Vec<Trigger> {
        let (cancelled, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|(_, trigger)| trigger.tag == Some(tag));
        self.entries = kept;
        cancelled.into_iter().map(|(_, trigger)| trigger).collect()
    }

    /// Check if a trigger is pending under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Names of pending triggers, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Pending triggers with their names, in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Trigger)> {
        self.entries.iter().map(|(name, trigger)| (name.as_str(), trigger))
    }

    /// Number of pending triggers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no trigger is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, name: &str) -> Option<Trigger> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }
}
