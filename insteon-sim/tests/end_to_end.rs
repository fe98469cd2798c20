// Insteon Sim - End-to-end tests
//
// Every test wires a Network to simulated devices and lets the pump run
// until nothing is left to send. ALDB contents come from a seeded StdRng so
// failures reproduce.

use std::sync::{Arc, Mutex};

use insteon::{
    Address, AldbRecord, Device, Generation, Lifecycle, Sequence, SequenceState, StateTag,
};
use insteon_sim::{SimulatedDevice, Simulation, GEN2_FIRST_RECORD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MODEM: Address = Address::new(0x44, 0x55, 0x66);
const DEV: Address = Address::new(0x11, 0x22, 0x33);
const OTHER: Address = Address::new(0x21, 0x32, 0x43);

fn simulation(device: SimulatedDevice) -> Simulation {
    let mut sim = Simulation::new(MODEM);
    sim.add_device(device).unwrap();
    sim
}

fn start_scan(sim: &mut Simulation, address: Address) -> Sequence {
    let scan = Sequence::new("query_aldb");
    let handle = scan.clone();
    sim.with_device(address, move |ctx| ctx.query_aldb(scan)).unwrap();
    handle
}

fn assert_store_matches(sim: &Simulation, address: Address) {
    let expected: Vec<(u16, AldbRecord)> = sim.device(address).unwrap().records().collect();
    let device = sim.network().device(address).unwrap();
    let stored: Vec<(u16, AldbRecord)> = device.aldb().links().map(|(k, r)| (k, *r)).collect();
    assert_eq!(stored, expected);
}

// ============================================================================
// Scans
// ============================================================================

#[test]
fn test_extended_scan_reads_every_record() {
    let mut rng = StdRng::seed_from_u64(0x1F2E);
    for count in [0usize, 1, 7, 30] {
        let mut sim = simulation(SimulatedDevice::gen2(DEV).with_random_links(&mut rng, count));
        sim.network_mut().device_mut(DEV).unwrap().set_generation(Generation::Gen2);

        let scan = start_scan(&mut sim, DEV);
        sim.run();

        assert_eq!(scan.state(), SequenceState::Succeeded, "{} records", count);
        assert_eq!(sim.count("read_aldb"), count + 1);
        assert_store_matches(&sim, DEV);
        let device = sim.network().device(DEV).unwrap();
        assert!(!device.has_state(StateTag::QueryAldb));
        assert!(device.triggers().is_empty());
    }
}

#[test]
fn test_legacy_scan_reads_every_byte() {
    let mut rng = StdRng::seed_from_u64(0x0BAD);
    let count = rng.gen_range(40..60);
    let mut sim = simulation(
        SimulatedDevice::gen1(DEV)
            .with_random_links(&mut rng, count)
            .with_delta(0x2C),
    );
    sim.network_mut().device_mut(DEV).unwrap().set_generation(Generation::Gen1);

    let scan = start_scan(&mut sim, DEV);
    sim.run();

    assert_eq!(scan.state(), SequenceState::Succeeded);
    assert_store_matches(&sim, DEV);
    // 8 bytes per record, the sentinel's flags byte, then the delta refresh
    assert_eq!(sim.count("peek_one_byte"), count * 8 + 1);
    assert_eq!(sim.count("light_status_request"), 1);
    assert_eq!(sim.network().device(DEV).unwrap().aldb().delta(), Some(0x2C));

    // the page is only selected again after crossing a 256-byte boundary
    let last_page = 0x0FF8u16 - 8 * count as u16;
    let pages = (0x0F - (last_page >> 8)) as usize + 1;
    assert_eq!(sim.count("set_address_msb"), pages);
}

#[test]
fn test_scan_strategy_follows_engine_version() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut sim = Simulation::new(MODEM);
    sim.add_device(SimulatedDevice::gen1(DEV).with_random_links(&mut rng, 3))
        .unwrap();
    sim.add_device(SimulatedDevice::gen2(OTHER).with_random_links(&mut rng, 3))
        .unwrap();
    for address in [DEV, OTHER] {
        sim.with_device(address, |ctx| ctx.get_engine_version())
            .unwrap()
            .unwrap();
    }
    sim.run();
    assert_eq!(sim.network().device(DEV).unwrap().generation(), Generation::Gen1);
    assert_eq!(sim.network().device(OTHER).unwrap().generation(), Generation::Gen2);

    let legacy = start_scan(&mut sim, DEV);
    let extended = start_scan(&mut sim, OTHER);
    sim.run();

    assert_eq!(legacy.state(), SequenceState::Succeeded);
    assert_eq!(extended.state(), SequenceState::Succeeded);
    assert!(sim.device(DEV).unwrap().received().iter().all(|c| c != "read_aldb"));
    assert!(sim.device(OTHER).unwrap().received().iter().all(|c| c != "peek_one_byte"));
    assert_store_matches(&sim, DEV);
    assert_store_matches(&sim, OTHER);
}

#[test]
fn test_nothing_sent_after_sentinel() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut sim = simulation(SimulatedDevice::gen2(DEV).with_random_links(&mut rng, 4));
    let scan = start_scan(&mut sim, DEV);
    let sent = sim.run();

    assert_eq!(scan.state(), SequenceState::Succeeded);
    assert_eq!(sent, 5);
    assert!(sim.step().is_none());
    assert!(sim.network().is_idle());
}

#[test]
fn test_scan_survives_retryable_nacks() {
    let mut rng = StdRng::seed_from_u64(77);
    let mut sim = simulation(SimulatedDevice::gen2(DEV).with_random_links(&mut rng, 6));
    for _ in 0..3 {
        sim.device_mut(DEV).unwrap().nack_next(0xFD);
    }

    let scan = start_scan(&mut sim, DEV);
    sim.run();

    assert_eq!(scan.state(), SequenceState::Succeeded);
    assert_eq!(sim.count("read_aldb"), 7 + 3);
    assert_store_matches(&sim, DEV);
}

// ============================================================================
// Writes and status
// ============================================================================

#[test]
fn test_write_then_rescan_agree() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut sim = simulation(SimulatedDevice::gen2(DEV).with_random_links(&mut rng, 2));
    sim.network_mut().device_mut(DEV).unwrap().set_generation(Generation::Gen2);

    let record = AldbRecord::from_parts(0xE2, 0x01, MODEM, [0x03, 0x1F, 0x01]);
    let (msb, lsb) = insteon::Aldb::split(GEN2_FIRST_RECORD - 16);
    let write = Sequence::new("write_aldb");
    let handle = write.clone();
    sim.with_device(DEV, move |ctx| ctx.write_aldb_record(msb, lsb, record, write))
        .unwrap();
    sim.run();

    assert_eq!(handle.state(), SequenceState::Succeeded);
    let delta = sim.device(DEV).unwrap().delta();
    assert_eq!(sim.network().device(DEV).unwrap().aldb().delta(), Some(delta));

    let scan = start_scan(&mut sim, DEV);
    sim.run();
    assert_eq!(scan.state(), SequenceState::Succeeded);
    assert_store_matches(&sim, DEV);
}

#[test]
fn test_status_rescans_stale_database() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut sim = simulation(
        SimulatedDevice::gen2(DEV)
            .with_random_links(&mut rng, 3)
            .with_delta(0x40),
    );

    let first = Sequence::new("status");
    let handle = first.clone();
    sim.with_device(DEV, move |ctx| ctx.get_status(first)).unwrap();
    sim.run();
    assert_eq!(handle.state(), SequenceState::Succeeded);
    assert_eq!(sim.count("read_aldb"), 4);
    assert_eq!(sim.network().device(DEV).unwrap().aldb().delta(), Some(0x40));

    // unchanged delta: no scan
    sim.clear_transmissions();
    let second = Sequence::new("status");
    let handle = second.clone();
    sim.with_device(DEV, move |ctx| ctx.get_status(second)).unwrap();
    sim.run();
    assert_eq!(handle.state(), SequenceState::Succeeded);
    assert_eq!(sim.count("read_aldb"), 0);

    // changed behind the engine's back
    sim.device_mut(DEV).unwrap().touch_aldb();
    sim.clear_transmissions();
    let third = Sequence::new("status");
    sim.with_device(DEV, move |ctx| ctx.get_status(third)).unwrap();
    sim.run();
    assert_eq!(sim.count("read_aldb"), 4);
    assert_eq!(sim.network().device(DEV).unwrap().aldb().delta(), Some(0x41));
}

#[test]
fn test_on_level_reported_by_status() {
    let mut sim = simulation(SimulatedDevice::gen2(DEV));
    sim.with_device(DEV, |ctx| ctx.turn_on(0x7F)).unwrap().unwrap();
    let status = Sequence::new("status");
    sim.with_device(DEV, move |ctx| ctx.get_status(status)).unwrap();
    sim.run();
    assert_eq!(sim.network().device(DEV).unwrap().status(), Some(0x7F));
}

// ============================================================================
// Identity and linking
// ============================================================================

#[test]
fn test_id_request_records_version() {
    let mut sim = simulation(SimulatedDevice::gen2(DEV).with_identity(0x02, 0x2A, 0x45));
    sim.with_device(DEV, |ctx| ctx.get_device_version())
        .unwrap()
        .unwrap();
    sim.run();

    let version = sim.network().device(DEV).unwrap().version().unwrap();
    assert_eq!(version.category, 0x02);
    assert_eq!(version.sub_category, 0x2A);
    assert_eq!(version.firmware, 0x45);
    assert!(sim.network().is_idle());
}

#[derive(Clone, Default)]
struct Initialized(Arc<Mutex<Vec<Address>>>);

impl Lifecycle for Initialized {
    fn advance_initialization(&mut self, device: &mut Device) {
        if let Ok(mut seen) = self.0.lock() {
            seen.push(device.address());
        }
    }
}

#[test]
fn test_unlinked_device_is_relinked() {
    let seen = Initialized::default();
    let mut rng = StdRng::seed_from_u64(3);
    let mut sim = Simulation::new(MODEM).with_lifecycle(seen.clone());
    sim.add_device(SimulatedDevice::gen2(DEV).unlinked().with_random_links(&mut rng, 2))
        .unwrap();

    let scan = start_scan(&mut sim, DEV);
    sim.run();
    assert_eq!(scan.state(), SequenceState::Failed);
    assert!(sim.device(DEV).unwrap().is_linked());
    assert_eq!(sim.count("all_link_start"), 1);
    assert_eq!(sim.count("enter_link_mode"), 1);
    assert_eq!(sim.count("read_aldb"), 1);
    assert!(!sim.network().modem().has_state(StateTag::Linking));
    assert!(!sim.network().device(DEV).unwrap().has_state(StateTag::Linking));
    assert_eq!(*seen.0.lock().unwrap(), vec![DEV]);

    // linked now: the same scan goes through
    let retry = start_scan(&mut sim, DEV);
    sim.run();
    assert_eq!(retry.state(), SequenceState::Succeeded);
    assert_store_matches(&sim, DEV);
}

#[test]
fn test_explicit_link_runs_all_steps() {
    let mut sim = simulation(SimulatedDevice::gen2(DEV));
    let link = Sequence::new("link modem->device");
    let handle = link.clone();
    sim.with_device(DEV, move |ctx| ctx.add_modem_to_device_link(link))
        .unwrap();
    sim.run();

    assert_eq!(handle.state(), SequenceState::Succeeded);
    let commands: Vec<&str> = sim.transmissions().iter().map(|tx| tx.command.as_str()).collect();
    assert_eq!(commands, vec!["all_link_start", "enter_link_mode"]);
}

#[test]
fn test_silent_device_left_to_watchdog() {
    let mut sim = simulation(SimulatedDevice::gen2(DEV));
    sim.device_mut(DEV).unwrap().ignore_next();
    let scan = start_scan(&mut sim, DEV);
    assert_eq!(sim.run(), 1);
    assert!(scan.is_active());

    let max_age = std::time::Duration::from_secs(3);
    sim.advance(max_age);
    let now = sim.now();
    assert_eq!(sim.network().stalled(now, max_age), vec![DEV]);

    sim.network_mut().resend_request(DEV).unwrap();
    sim.run();
    assert_eq!(scan.state(), SequenceState::Succeeded);
}

#[test]
fn test_abandoned_request_fails_scan() {
    let mut sim = simulation(SimulatedDevice::gen2(DEV));
    sim.device_mut(DEV).unwrap().ignore_next();
    let scan = start_scan(&mut sim, DEV);
    sim.run();

    sim.network_mut().fail_request(DEV).unwrap();
    assert_eq!(scan.state(), SequenceState::Failed);
    assert!(sim.network().is_idle());
    let device = sim.network().device(DEV).unwrap();
    assert!(!device.has_state(StateTag::QueryAldb));
    assert!(device.triggers().is_empty());
}
