// Insteon Sim - Simulated devices for the Insteon engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Insteon Sim
//!
//! Simulated Insteon devices and a modem pump, for exercising the `insteon`
//! engine end to end without hardware.
//!
//! ## Quick Start
//!
//! ```rust
//! use insteon::{Address, Sequence, SequenceState};
//! use insteon_sim::{SimulatedDevice, Simulation};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let modem = Address::new(0x44, 0x55, 0x66);
//! let dev = Address::new(0x11, 0x22, 0x33);
//! let mut rng = StdRng::seed_from_u64(7);
//!
//! let mut sim = Simulation::new(modem);
//! sim.add_device(SimulatedDevice::gen2(dev).with_random_links(&mut rng, 5)).unwrap();
//!
//! let scan = Sequence::new("query_aldb");
//! let handle = scan.clone();
//! sim.with_device(dev, move |ctx| ctx.query_aldb(scan)).unwrap();
//! sim.run();
//!
//! assert_eq!(handle.state(), SequenceState::Succeeded);
//! assert_eq!(sim.network().device(dev).unwrap().aldb().links().count(), 5);
//! ```

pub mod device;
pub mod simulation;

pub use device::{SimulatedDevice, GEN1_FIRST_RECORD, GEN2_FIRST_RECORD};
pub use simulation::{Simulation, MAX_STEPS};
