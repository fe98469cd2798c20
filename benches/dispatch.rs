//! Benchmarks for inbound message handling

use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use insteon::protocol::CMD_EXTENDED_ALDB;
use insteon::{
    Address, Aldb, AldbRecord, EngineConfig, Field, InboundMessage, MessageType, Network, Sequence,
    Trigger, TriggerRegistry,
};

const MODEM: Address = Address::new(0x44, 0x55, 0x66);
const DEV: Address = Address::new(0x11, 0x22, 0x33);

fn generate_acks(count: usize) -> Vec<InboundMessage> {
    (0..count)
        .map(|i| InboundMessage::standard(DEV, MODEM, MessageType::DirectAck, 0x11, i as u8))
        .collect()
}

fn record_message(key: u16, record: AldbRecord) -> InboundMessage {
    let (msb, lsb) = Aldb::split(key);
    let mut user_data = [0u8; 14];
    user_data[1] = 0x01;
    user_data[2] = msb;
    user_data[3] = lsb;
    user_data[5..13].copy_from_slice(&record.bytes());
    InboundMessage::extended(DEV, MODEM, MessageType::Direct, CMD_EXTENDED_ALDB, 0x00, user_data)
}

fn bench_trigger_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("triggers");

    let messages = generate_acks(1000);
    let mut registry = TriggerRegistry::new();
    for i in 0..32u8 {
        let trigger = Trigger::from_device(DEV, |_| {})
            .message_type(MessageType::DirectAck)
            .field(Field::Cmd1, 0x11)
            .field(Field::Cmd2, 0xF0 | (i & 0x0F))
            .while_sent("on");
        registry.register(format!("watch_{}", i), trigger);
    }

    group.throughput(Throughput::Elements(1000));

    group.bench_function("match_1000_against_32", |b| {
        b.iter(|| {
            let mut hits = 0;
            for msg in &messages {
                for (_, trigger) in registry.iter() {
                    if trigger.matches(msg, Some("on")) {
                        hits += 1;
                    }
                }
            }
            black_box(hits);
        })
    });

    group.finish();
}

fn bench_ack_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    group.throughput(Throughput::Elements(1000));

    group.bench_function("send_and_ack_1000", |b| {
        b.iter(|| {
            let mut net = Network::with_config(MODEM, EngineConfig::immediate());
            net.add_device(DEV).unwrap();
            let now = Instant::now();
            for _ in 0..1000 {
                net.with_device(DEV, |ctx| ctx.turn_off()).unwrap().unwrap();
                net.next_transmission(now).unwrap();
                net.modem_ack().unwrap();
                let ack = InboundMessage::standard(DEV, MODEM, MessageType::DirectAck, 0x13, 0x00);
                net.receive(ack).unwrap();
            }
            black_box(net.is_idle());
        })
    });

    group.finish();
}

fn bench_extended_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    let records: Vec<AldbRecord> = (0..100u8)
        .map(|i| AldbRecord::from_parts(0xE2, i, Address::new(0x20, 0x30, i), [0x03, 0x1F, i]))
        .collect();

    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("extended_scan_100_records", |b| {
        b.iter(|| {
            let mut net = Network::with_config(MODEM, EngineConfig::immediate());
            net.add_device(DEV).unwrap();
            let scan = Sequence::new("query_aldb");
            let handle = scan.clone();
            net.with_device(DEV, move |ctx| ctx.query_aldb(scan)).unwrap();

            let now = Instant::now();
            let mut key = 0x0FFFu16;
            let mut next = records.iter();
            while let Some(_tx) = net.next_transmission(now) {
                net.modem_ack().unwrap();
                let record = next.next().copied().unwrap_or_else(AldbRecord::sentinel);
                let ack = InboundMessage::standard(
                    DEV,
                    MODEM,
                    MessageType::DirectAck,
                    CMD_EXTENDED_ALDB,
                    0,
                );
                net.receive(ack).unwrap();
                net.receive(record_message(key, record)).unwrap();
                key -= 8;
            }
            black_box(handle.state());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_trigger_matching,
    bench_ack_round_trip,
    bench_extended_scan,
);
criterion_main!(benches);
