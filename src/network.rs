// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device roster and transmission scheduling
//!
//! The [`Network`] owns the modem, every device and the lifecycle hook. It is
//! driven from outside by three kinds of events:
//! - [`Network::receive`]: an inbound message decoded by the codec
//! - [`Network::next_transmission`]: the transport is ready to send
//! - [`Network::modem_ack`]: the modem accepted the message in flight
//!
//! `next_transmission` is the single point where the next message is picked:
//! at most one message is in flight, and a device only gets a new message
//! once its outstanding request was acknowledged.
//!
//! There are no timeouts here. A watchdog polls [`Network::stalled`] and
//! decides between [`Network::resend_request`] and [`Network::fail_request`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::EngineConfig;
use crate::device::{Device, DeviceCtx, Lifecycle, NoopLifecycle};
use crate::dispatch;
use crate::error::{NetworkError, Result};
use crate::modem::{InFlight, Modem};
use crate::protocol::{Address, InboundMessage};
use crate::request::Transmission;
use crate::schema::CommandSchema;

/// Roster of devices sharing one modem
pub struct Network {
    config: EngineConfig,
    modem: Modem,
    devices: BTreeMap<Address, Device>,
    lifecycle: Box<dyn Lifecycle>,
    schema: Arc<CommandSchema>,
    cursor: Option<Address>,
}

impl Network {
    /// Create a network with default configuration
    pub fn new(modem_address: Address) -> Self {
        Self::with_config(modem_address, EngineConfig::default())
    }

    /// Create a network with custom configuration
    pub fn with_config(modem_address: Address, config: EngineConfig) -> Self {
        Self {
            modem: Modem::with_back_off(modem_address, config.nack_back_off),
            config,
            devices: BTreeMap::new(),
            lifecycle: Box::new(NoopLifecycle),
            schema: Arc::new(CommandSchema::generic()),
            cursor: None,
        }
    }

    /// Install the device initialization hook
    pub fn with_lifecycle(mut self, lifecycle: impl Lifecycle + 'static) -> Self {
        self.lifecycle = Box::new(lifecycle);
        self
    }

    /// Use a custom command schema for devices added from now on
    pub fn with_schema(mut self, schema: CommandSchema) -> Self {
        self.schema = Arc::new(schema);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared modem
    pub fn modem(&self) -> &Modem {
        &self.modem
    }

    /// Add a device to the roster
    pub fn add_device(&mut self, address: Address) -> Result<&mut Device> {
        if self.devices.contains_key(&address) {
            return Err(NetworkError::DeviceExists(address).into());
        }
        if self.devices.len() >= self.config.max_devices {
            return Err(NetworkError::MaxDevicesReached {
                max: self.config.max_devices,
            }
            .into());
        }
        let device = Device::with_schema(address, self.schema.clone(), self.config.history_depth);
        Ok(self.devices.entry(address).or_insert(device))
    }

    /// Remove a device and everything it had queued
    pub fn remove_device(&mut self, address: Address) -> Result<Device> {
        let device = self
            .devices
            .remove(&address)
            .ok_or(NetworkError::UnknownDevice(address))?;
        self.modem.release(address);
        self.modem
            .queue
            .retain(|req| req.destination().owner() != address);
        Ok(device)
    }

    /// Device by address
    pub fn device(&self, address: Address) -> Option<&Device> {
        self.devices.get(&address)
    }

    /// Mutable device by address
    pub fn device_mut(&mut self, address: Address) -> Option<&mut Device> {
        self.devices.get_mut(&address)
    }

    /// All devices, in address order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the roster is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Check if nothing is queued, in flight or waiting for an ack
    pub fn is_idle(&self) -> bool {
        !self.modem.is_busy()
            && self.modem.queue_len() == 0
            && self
                .devices
                .values()
                .all(|d| d.queue_len() == 0 && !d.has_outstanding())
    }

    /// Run `f` against a device context
    pub fn with_device<R>(
        &mut self,
        address: Address,
        f: impl FnOnce(&mut DeviceCtx<'_>) -> R,
    ) -> Result<R> {
        let mut ctx = self.ctx(address)?;
        Ok(f(&mut ctx))
    }

    /// Process a message received from the modem
    ///
    /// The message is routed by its source address.
    pub fn receive(&mut self, msg: InboundMessage) -> Result<()> {
        let address = msg.from_address().ok_or(NetworkError::NoSourceAddress)?;
        let mut ctx = match self.ctx(address) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!("message from unknown device {}", address);
                return Err(e);
            }
        };
        dispatch::receive(&mut ctx, msg);
        Ok(())
    }

    /// Pick the next message to hand to the modem
    ///
    /// Returns `None` while a message is in flight, while the modem backs
    /// off, or when nothing is eligible. Modem commands go first, then
    /// devices in round-robin order.
    pub fn next_transmission(&mut self, now: Instant) -> Option<Transmission> {
        if !self.modem.ready(now) {
            return None;
        }

        if let Some(mut request) = self.modem.queue.pop_front() {
            request.mark_sent(now);
            let transmission = request.transmission();
            debug!("send {} to {}", transmission.command, transmission.destination);
            self.modem.in_flight = Some(InFlight::Modem(request));
            return Some(transmission);
        }

        let address = self.next_eligible()?;
        let device = self.devices.get_mut(&address)?;
        let request = device.pop_next()?;
        let transmission = request.transmission();
        debug!("send {} to {}", transmission.command, transmission.destination);
        device.mark_sent(request, now);
        self.modem.in_flight = Some(InFlight::Device(address));
        self.cursor = Some(address);
        Some(transmission)
    }

    /// The modem accepted the message in flight
    pub fn modem_ack(&mut self) -> Result<()> {
        let in_flight = self
            .modem
            .in_flight
            .take()
            .ok_or(NetworkError::NothingInFlight)?;
        match in_flight {
            InFlight::Device(address) => {
                let mut ctx = self.ctx(address)?;
                let continuation = match ctx.device.last_sent.as_mut() {
                    Some(request) => {
                        request.mark_plm_acknowledged();
                        request.take_modem_ack()
                    }
                    None => None,
                };
                if let Some(continuation) = continuation {
                    continuation(&mut ctx);
                }
                ctx.settle();
            }
            InFlight::Modem(mut request) => {
                request.mark_plm_acknowledged();
                if let Some(continuation) = request.take_modem_ack() {
                    let mut ctx = self.ctx(request.destination().owner())?;
                    continuation(&mut ctx);
                }
            }
        }
        Ok(())
    }

    /// Devices whose request has waited at least `max_age` for an ack
    pub fn stalled(&self, now: Instant, max_age: Duration) -> Vec<Address> {
        let old = |sent_at: Option<Instant>| {
            sent_at.map_or(false, |t| now.saturating_duration_since(t) >= max_age)
        };
        let mut stalled: Vec<Address> = self
            .devices
            .values()
            .filter(|d| {
                d.last_sent()
                    .map_or(false, |req| !req.device_acknowledged() && old(req.sent_at()))
            })
            .map(|d| d.address())
            .collect();
        if let Some(InFlight::Modem(request)) = &self.modem.in_flight {
            let owner = request.destination().owner();
            if old(request.sent_at()) && !stalled.contains(&owner) {
                stalled.push(owner);
            }
        }
        stalled
    }

    /// Send a stalled request again
    pub fn resend_request(&mut self, address: Address) -> Result<()> {
        if let Some(InFlight::Modem(mut request)) = self.modem.release(address) {
            request.reset_for_resend();
            self.modem.queue.push_front(request);
            return Ok(());
        }
        let device = self
            .devices
            .get_mut(&address)
            .ok_or(NetworkError::UnknownDevice(address))?;
        if !device.has_outstanding() {
            return Err(NetworkError::NoOutstandingRequest(address).into());
        }
        debug!("{}: resending {:?}", address, device.last_sent_command());
        device.requeue_last_sent();
        Ok(())
    }

    /// Abandon a stalled request and run its failure continuation
    pub fn fail_request(&mut self, address: Address) -> Result<()> {
        if let Some(InFlight::Modem(mut request)) = self.modem.release(address) {
            let failure = request.take_failure();
            let mut ctx = self.ctx(address)?;
            if let Some(failure) = failure {
                failure(&mut ctx);
            }
            return Ok(());
        }

        let mut ctx = self.ctx(address)?;
        if !ctx.device.has_outstanding() {
            return Err(NetworkError::NoOutstandingRequest(address).into());
        }
        let failure = ctx
            .device
            .last_sent
            .take()
            .and_then(|mut request| request.take_failure());
        debug!("{}: request abandoned", address);
        if let Some(failure) = failure {
            failure(&mut ctx);
        }
        Ok(())
    }

    fn ctx(&mut self, address: Address) -> Result<DeviceCtx<'_>> {
        let device = self
            .devices
            .get_mut(&address)
            .ok_or(NetworkError::UnknownDevice(address))?;
        Ok(DeviceCtx {
            device,
            modem: &mut self.modem,
            lifecycle: self.lifecycle.as_mut(),
            config: &self.config,
        })
    }

    fn next_eligible(&self) -> Option<Address> {
        let cursor = self.cursor;
        let after = self
            .devices
            .iter()
            .filter(move |(address, _)| cursor.map_or(true, |c| **address > c));
        let before = self
            .devices
            .iter()
            .filter(move |(address, _)| cursor.map_or(false, |c| **address <= c));
        after
            .chain(before)
            .find(|(_, device)| device.queue_len() > 0 && !device.has_outstanding())
            .map(|(address, _)| *address)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("config", &self.config)
            .field("modem", &self.modem)
            .field("devices", &self.devices.len())
            .finish()
    }
}
