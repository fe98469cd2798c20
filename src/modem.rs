// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! The shared modem (PLM)
//!
//! The modem is the only resource shared by all devices. It serializes
//! physical transmissions: one message in flight at a time, and no message
//! at all while it is backing off after a retryable nack.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;

use crate::device::StateTag;
use crate::protocol::Address;
use crate::request::Request;

/// The message currently handed to the modem
#[derive(Debug)]
pub(crate) enum InFlight {
    /// Outstanding request of this device
    Device(Address),
    /// A modem command issued on behalf of a device
    Modem(Request),
}

/// Modem state
#[derive(Debug)]
pub struct Modem {
    address: Address,
    states: Vec<StateTag>,
    pub(crate) queue: VecDeque<Request>,
    pub(crate) in_flight: Option<InFlight>,
    back_off: Duration,
    wait_to_send: Option<Duration>,
    hold_until: Option<Instant>,
}

impl Modem {
    /// Create a modem with the default one second nack back-off
    pub fn new(address: Address) -> Self {
        Self::with_back_off(address, Duration::from_secs(1))
    }

    /// Create a modem with a custom nack back-off
    pub fn with_back_off(address: Address, back_off: Duration) -> Self {
        Self {
            address,
            states: Vec::new(),
            queue: VecDeque::new(),
            in_flight: None,
            back_off,
            wait_to_send: None,
            hold_until: None,
        }
    }

    /// Modem address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Active state tags
    pub fn states(&self) -> &[StateTag] {
        &self.states
    }

    /// Check if a state tag is active
    pub fn has_state(&self, tag: StateTag) -> bool {
        self.states.contains(&tag)
    }

    /// Set a state tag
    pub fn add_state(&mut self, tag: StateTag) {
        if !self.states.contains(&tag) {
            self.states.push(tag);
        }
    }

    /// Clear a state tag
    pub fn remove_state(&mut self, tag: StateTag) {
        self.states.retain(|t| *t != tag);
    }

    /// Queue a modem command
    pub fn enqueue(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    /// Number of queued modem commands
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Check if a message is in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Hold all transmissions for the back-off period
    ///
    /// The period starts when the next transmission is polled.
    pub fn back_off(&mut self) {
        debug!("modem {}: backing off {:?}", self.address, self.back_off);
        self.wait_to_send = Some(self.back_off);
    }

    /// Check if a back-off is pending or running at `now`
    pub fn is_holding(&self, now: Instant) -> bool {
        self.wait_to_send.is_some() || self.hold_until.map_or(false, |until| now < until)
    }

    /// Check if the modem may start a transmission at `now`
    ///
    /// Starts a pending back-off period as a side effect.
    pub(crate) fn ready(&mut self, now: Instant) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        if let Some(wait) = self.wait_to_send.take() {
            self.hold_until = Some(now + wait);
        }
        match self.hold_until {
            Some(until) if now < until => false,
            Some(_) => {
                self.hold_until = None;
                true
            }
            None => true,
        }
    }

    /// Take the in-flight marker if it belongs to `address`
    pub(crate) fn release(&mut self, address: Address) -> Option<InFlight> {
        let owned = match &self.in_flight {
            Some(InFlight::Device(owner)) => *owner == address,
            Some(InFlight::Modem(req)) => req.destination().owner() == address,
            None => false,
        };
        if owned {
            self.in_flight.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEM: Address = Address::new(0x44, 0x55, 0x66);

    #[test]
    fn test_ready_when_idle() {
        let mut modem = Modem::new(MODEM);
        assert!(modem.ready(Instant::now()));
        modem.in_flight = Some(InFlight::Device(Address::new(1, 2, 3)));
        assert!(!modem.ready(Instant::now()));
        assert!(modem.is_busy());
    }

    #[test]
    fn test_back_off_starts_on_poll() {
        let mut modem = Modem::with_back_off(MODEM, Duration::from_millis(500));
        let start = Instant::now();
        modem.back_off();
        assert!(modem.is_holding(start));
        assert!(!modem.ready(start));
        assert!(!modem.ready(start + Duration::from_millis(499)));
        assert!(modem.ready(start + Duration::from_millis(500)));
        assert!(!modem.is_holding(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_zero_back_off() {
        let mut modem = Modem::with_back_off(MODEM, Duration::ZERO);
        modem.back_off();
        assert!(modem.ready(Instant::now()));
    }

    #[test]
    fn test_release_only_owner() {
        let mut modem = Modem::new(MODEM);
        let dev = Address::new(1, 2, 3);
        modem.in_flight = Some(InFlight::Device(dev));
        assert!(modem.release(Address::new(9, 9, 9)).is_none());
        assert!(modem.release(dev).is_some());
        assert!(!modem.is_busy());
    }

    #[test]
    fn test_state_tags() {
        let mut modem = Modem::new(MODEM);
        modem.add_state(StateTag::Linking);
        modem.add_state(StateTag::Linking);
        assert_eq!(modem.states(), &[StateTag::Linking]);
        modem.remove_state(StateTag::Linking);
        assert!(!modem.has_state(StateTag::Linking));
    }
}
