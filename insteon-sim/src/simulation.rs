// Insteon Sim - Simulated devices for the Insteon engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Modem pump
//!
//! Plays the modem and the powerline for a [`Network`]: polls the next
//! transmission, echoes the modem ack, delivers it to the simulated device
//! and feeds every reply back into the network.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use insteon::protocol::CMD_ENTER_LINK_MODE;
use insteon::{
    Address, Destination, DeviceCtx, EngineConfig, Field, InboundMessage, Lifecycle, MessageType,
    Network, Result, Transmission,
};
use log::{debug, warn};

use crate::device::SimulatedDevice;

/// Upper bound on transmissions per [`Simulation::run`]
pub const MAX_STEPS: usize = 100_000;

/// A network wired to simulated devices
pub struct Simulation {
    network: Network,
    devices: BTreeMap<Address, SimulatedDevice>,
    clock: Instant,
    back_off: Duration,
    linking: Option<(u8, u8)>,
    log: Vec<Transmission>,
}

impl Simulation {
    /// Create a simulation with zero back-off
    pub fn new(modem: Address) -> Self {
        Self::with_config(modem, EngineConfig::immediate())
    }

    /// Create a simulation with custom engine configuration
    pub fn with_config(modem: Address, config: EngineConfig) -> Self {
        Self {
            back_off: config.nack_back_off,
            network: Network::with_config(modem, config),
            devices: BTreeMap::new(),
            clock: Instant::now(),
            linking: None,
            log: Vec::new(),
        }
    }

    /// Install the device initialization hook
    pub fn with_lifecycle(mut self, lifecycle: impl Lifecycle + 'static) -> Self {
        self.network = self.network.with_lifecycle(lifecycle);
        self
    }

    /// Register a simulated device with the network
    pub fn add_device(&mut self, device: SimulatedDevice) -> Result<()> {
        self.network.add_device(device.address())?;
        self.devices.insert(device.address(), device);
        Ok(())
    }

    /// The engine under test
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Mutable engine under test
    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Simulated device by address
    pub fn device(&self, address: Address) -> Option<&SimulatedDevice> {
        self.devices.get(&address)
    }

    /// Mutable simulated device by address
    pub fn device_mut(&mut self, address: Address) -> Option<&mut SimulatedDevice> {
        self.devices.get_mut(&address)
    }

    /// Run `f` against the engine's device context
    pub fn with_device<R>(
        &mut self,
        address: Address,
        f: impl FnOnce(&mut DeviceCtx<'_>) -> R,
    ) -> Result<R> {
        self.network.with_device(address, f)
    }

    /// Simulated time
    pub fn now(&self) -> Instant {
        self.clock
    }

    /// Move simulated time forward
    pub fn advance(&mut self, by: Duration) {
        self.clock += by;
    }

    /// Every transmission so far, in order
    pub fn transmissions(&self) -> &[Transmission] {
        &self.log
    }

    /// Forget the transmission log
    pub fn clear_transmissions(&mut self) {
        self.log.clear();
    }

    /// Transmissions of one command
    pub fn count(&self, command: &str) -> usize {
        self.log.iter().filter(|tx| tx.command == command).count()
    }

    /// Send one message and deliver its replies
    pub fn step(&mut self) -> Option<Transmission> {
        let tx = match self.network.next_transmission(self.clock) {
            Some(tx) => tx,
            None if self.network.modem().is_holding(self.clock) => {
                self.clock += self.back_off;
                self.network.next_transmission(self.clock)?
            }
            None => return None,
        };
        if let Err(e) = self.network.modem_ack() {
            warn!("sim: modem ack rejected: {}", e);
        }

        let replies = match tx.destination {
            Destination::Device(address) => self.deliver(address, &tx),
            Destination::Modem { owner } => {
                if tx.command == "all_link_start" {
                    debug!("sim: modem linking for {}", owner);
                    self.linking = Some((tx.field(Field::LinkCode), tx.field(Field::Group)));
                }
                Vec::new()
            }
        };
        for msg in replies {
            if let Err(e) = self.network.receive(msg) {
                warn!("sim: reply rejected: {}", e);
            }
        }

        self.log.push(tx.clone());
        Some(tx)
    }

    /// Step until nothing is left to send; returns the number of transmissions
    pub fn run(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS && self.step().is_some() {
            steps += 1;
        }
        if steps == MAX_STEPS {
            warn!("sim: stopped after {} transmissions", MAX_STEPS);
        }
        steps
    }

    fn deliver(&mut self, address: Address, tx: &Transmission) -> Vec<InboundMessage> {
        let modem = self.network.modem().address();
        let device = match self.devices.get_mut(&address) {
            Some(device) => device,
            None => return Vec::new(),
        };
        let mut replies = device.respond(tx, modem);

        let accepted = replies
            .first()
            .map_or(false, |msg| msg.message_type == Some(MessageType::DirectAck));
        if tx.field(Field::Cmd1) == CMD_ENTER_LINK_MODE && accepted {
            if let Some((link_code, group)) = self.linking.take() {
                replies.push(InboundMessage::link_complete(address, link_code, group));
            }
        }
        replies
    }
}
