// Insteon Sim - Simulated devices for the Insteon engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simulated device
//!
//! Answers the generic command set the way real hardware does: direct acks
//! for every command, an extended record after a `read_aldb` ack, a
//! set-button broadcast after an id request, and `0xFF` nacks while the
//! modem is not in the device's link database.

use std::collections::{BTreeMap, VecDeque};

use insteon::protocol::{
    BROADCAST_SET_BUTTON_RESPONDER, CMD_ENGINE_VERSION, CMD_ENTER_LINK_MODE, CMD_EXTENDED_ALDB,
    CMD_ID_REQUEST, CMD_OFF, CMD_ON, CMD_PEEK_ONE_BYTE, CMD_SET_ADDRESS_MSB, CMD_STATUS_REQUEST,
};
use insteon::{
    Address, Aldb, AldbRecord, Field, Generation, InboundMessage, MessageType, Transmission,
};
use log::debug;
use rand::Rng;

/// First record address of a generation 1 database
pub const GEN1_FIRST_RECORD: u16 = 0x0FF8;

/// First record address of a generation 2 database
pub const GEN2_FIRST_RECORD: u16 = 0x0FFF;

/// A device answering engine transmissions
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    address: Address,
    generation: Generation,
    identity: Address,
    records: BTreeMap<u16, [u8; 8]>,
    first: u16,
    delta: u8,
    level: u8,
    linked: bool,
    page: u8,
    nacks: VecDeque<u8>,
    ignore: usize,
    received: Vec<String>,
}

impl SimulatedDevice {
    /// Generation 1 device: byte peeks, no extended messages
    pub fn gen1(address: Address) -> Self {
        Self::new(address, Generation::Gen1, GEN1_FIRST_RECORD)
    }

    /// Generation 2 device: extended ALDB reads and writes
    pub fn gen2(address: Address) -> Self {
        Self::new(address, Generation::Gen2, GEN2_FIRST_RECORD)
    }

    fn new(address: Address, generation: Generation, first: u16) -> Self {
        Self {
            address,
            generation,
            identity: Address::new(0x01, 0x20, 0x41),
            records: BTreeMap::new(),
            first,
            delta: 0x00,
            level: 0x00,
            linked: true,
            page: 0x00,
            nacks: VecDeque::new(),
            ignore: 0,
            received: Vec::new(),
        }
    }

    /// Append a record below the existing ones
    pub fn with_record(mut self, record: AldbRecord) -> Self {
        let key = self.first.saturating_sub(8 * self.records.len() as u16);
        self.records.insert(key, record.bytes());
        self
    }

    /// Append `count` random in-use records
    pub fn with_random_links(mut self, rng: &mut impl Rng, count: usize) -> Self {
        for _ in 0..count {
            let controller = if rng.gen_bool(0.5) { 0x40 } else { 0x00 };
            let record = AldbRecord::from_parts(
                0xA2 | controller,
                rng.gen(),
                Address::new(rng.gen(), rng.gen(), rng.gen()),
                rng.gen(),
            );
            self = self.with_record(record);
        }
        self
    }

    /// Category, sub-category and firmware reported by the id broadcast
    pub fn with_identity(mut self, category: u8, sub_category: u8, firmware: u8) -> Self {
        self.identity = Address::new(category, sub_category, firmware);
        self
    }

    /// Initial ALDB delta
    pub fn with_delta(mut self, delta: u8) -> Self {
        self.delta = delta;
        self
    }

    /// The modem is missing from the device's database
    pub fn unlinked(mut self) -> Self {
        self.linked = false;
        self
    }

    /// Nack the next direct command with `code`
    pub fn nack_next(&mut self, code: u8) {
        self.nacks.push_back(code);
    }

    /// Drop the next direct command without answering
    pub fn ignore_next(&mut self) {
        self.ignore += 1;
    }

    /// Device address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Protocol generation
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Current ALDB delta
    pub fn delta(&self) -> u8 {
        self.delta
    }

    /// Current on-level
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Check if the modem is linked
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Stored records, highest address first
    pub fn records(&self) -> impl Iterator<Item = (u16, AldbRecord)> + '_ {
        self.records
            .iter()
            .rev()
            .map(|(key, bytes)| (*key, AldbRecord::new(*bytes)))
    }

    /// Command names received so far
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// Change the database without telling the engine
    pub fn touch_aldb(&mut self) {
        self.delta = self.delta.wrapping_add(1);
    }

    /// Answer one transmission
    pub fn respond(&mut self, tx: &Transmission, modem: Address) -> Vec<InboundMessage> {
        self.received.push(tx.command.clone());
        if self.ignore > 0 {
            self.ignore -= 1;
            debug!("sim {}: ignoring {}", self.address, tx.command);
            return Vec::new();
        }

        let cmd_1 = tx.field(Field::Cmd1);
        let cmd_2 = tx.field(Field::Cmd2);
        if let Some(code) = self.nacks.pop_front() {
            return vec![self.reply(modem, MessageType::DirectNack, cmd_1, code)];
        }
        if !self.linked && cmd_1 != CMD_ENTER_LINK_MODE {
            return vec![self.reply(modem, MessageType::DirectNack, cmd_1, 0xFF)];
        }

        match cmd_1 {
            CMD_ENGINE_VERSION => {
                let version = match self.generation {
                    Generation::Gen1 => 0x00,
                    _ => 0x01,
                };
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, version)]
            }
            CMD_ID_REQUEST => vec![
                self.reply(modem, MessageType::DirectAck, cmd_1, cmd_2),
                InboundMessage::standard(
                    self.address,
                    self.identity,
                    MessageType::Broadcast,
                    BROADCAST_SET_BUTTON_RESPONDER,
                    0x00,
                ),
            ],
            CMD_ON => {
                self.level = cmd_2;
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, cmd_2)]
            }
            CMD_OFF => {
                self.level = 0x00;
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, 0x00)]
            }
            CMD_STATUS_REQUEST => {
                vec![self.reply(modem, MessageType::DirectAck, self.delta, self.level)]
            }
            CMD_ENTER_LINK_MODE => {
                self.linked = true;
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, cmd_2)]
            }
            CMD_SET_ADDRESS_MSB => {
                self.page = cmd_2;
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, cmd_2)]
            }
            CMD_PEEK_ONE_BYTE => {
                let byte = self.peek(Aldb::key(self.page, cmd_2));
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, byte)]
            }
            CMD_EXTENDED_ALDB if self.generation == Generation::Gen1 => {
                vec![self.reply(modem, MessageType::DirectNack, cmd_1, 0xFD)]
            }
            CMD_EXTENDED_ALDB if tx.field(Field::Usr(2)) == 0x02 => {
                self.write(tx);
                vec![self.reply(modem, MessageType::DirectAck, cmd_1, 0x00)]
            }
            CMD_EXTENDED_ALDB => vec![
                self.reply(modem, MessageType::DirectAck, cmd_1, 0x00),
                self.read(tx, modem),
            ],
            _ => vec![self.reply(modem, MessageType::DirectAck, cmd_1, cmd_2)],
        }
    }

    fn reply(
        &self,
        modem: Address,
        message_type: MessageType,
        cmd_1: u8,
        cmd_2: u8,
    ) -> InboundMessage {
        InboundMessage::standard(self.address, modem, message_type, cmd_1, cmd_2)
    }

    fn peek(&self, address: u16) -> u8 {
        self.records
            .range(..=address)
            .next_back()
            .and_then(|(key, bytes)| bytes.get((address - key) as usize).copied())
            .unwrap_or(0x00)
    }

    fn read(&self, tx: &Transmission, modem: Address) -> InboundMessage {
        let requested = (tx.field(Field::Usr(3)), tx.field(Field::Usr(4)));
        let key = match requested {
            (0x00, 0x00) => self.first,
            (msb, lsb) => Aldb::key(msb, lsb),
        };
        let bytes = self.records.get(&key).copied().unwrap_or([0u8; 8]);
        let (msb, lsb) = Aldb::split(key);

        let mut user_data = [0u8; 14];
        user_data[1] = 0x01;
        user_data[2] = msb;
        user_data[3] = lsb;
        user_data[5..13].copy_from_slice(&bytes);
        InboundMessage::extended(
            self.address,
            modem,
            MessageType::Direct,
            CMD_EXTENDED_ALDB,
            0x00,
            user_data,
        )
    }

    fn write(&mut self, tx: &Transmission) {
        let key = Aldb::key(tx.field(Field::Usr(3)), tx.field(Field::Usr(4)));
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = tx.field(Field::Usr(6 + i as u8));
        }
        self.records.insert(key, bytes);
        self.delta = self.delta.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insteon::{CommandSchema, Request};

    const DEV: Address = Address::new(0x11, 0x22, 0x33);
    const MODEM: Address = Address::new(0x44, 0x55, 0x66);

    fn tx(name: &str, values: &[(&str, u8)]) -> Transmission {
        let schema = CommandSchema::generic();
        Request::from_template(schema.template(name).unwrap(), DEV)
            .with_fields(values)
            .unwrap()
            .transmission()
    }

    fn record(group: u8) -> AldbRecord {
        AldbRecord::from_parts(0xE2, group, Address::new(0x0A, 0x0B, 0x0C), [0x03, 0x1F, 0x01])
    }

    #[test]
    fn test_engine_version_by_generation() {
        let mut gen1 = SimulatedDevice::gen1(DEV);
        let mut gen2 = SimulatedDevice::gen2(DEV);
        let request = tx("get_engine_version", &[]);
        assert_eq!(gen1.respond(&request, MODEM)[0].byte(Field::Cmd2), 0x00);
        assert_eq!(gen2.respond(&request, MODEM)[0].byte(Field::Cmd2), 0x01);
    }

    #[test]
    fn test_peek_walks_memory() {
        let mut sim = SimulatedDevice::gen1(DEV).with_record(record(0x05));
        sim.respond(&tx("set_address_msb", &[("msb", 0x0F)]), MODEM);

        let flags = sim.respond(&tx("peek_one_byte", &[("lsb", 0xF8)]), MODEM);
        assert_eq!(flags[0].byte(Field::Cmd2), 0xE2);
        let group = sim.respond(&tx("peek_one_byte", &[("lsb", 0xF9)]), MODEM);
        assert_eq!(group[0].byte(Field::Cmd2), 0x05);
        let sentinel = sim.respond(&tx("peek_one_byte", &[("lsb", 0xF0)]), MODEM);
        assert_eq!(sentinel[0].byte(Field::Cmd2), 0x00);
    }

    #[test]
    fn test_read_first_record() {
        let mut sim = SimulatedDevice::gen2(DEV).with_record(record(0x07));
        let replies = sim.respond(&tx("read_aldb", &[]), MODEM);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].message_type, Some(MessageType::DirectAck));

        let data = &replies[1];
        assert!(data.is_extended());
        assert_eq!(data.byte(Field::Usr(3)), 0x0F);
        assert_eq!(data.byte(Field::Usr(4)), 0xFF);
        assert_eq!(data.byte(Field::Usr(6)), 0xE2);
        assert_eq!(data.byte(Field::Usr(7)), 0x07);
    }

    #[test]
    fn test_write_bumps_delta() {
        let mut sim = SimulatedDevice::gen2(DEV).with_delta(0x10);
        let request = tx(
            "write_aldb",
            &[("msb", 0x0F), ("lsb", 0xFF), ("link_flags", 0xA2), ("group", 0x01)],
        );
        sim.respond(&request, MODEM);
        assert_eq!(sim.delta(), 0x11);
        let (key, stored) = sim.records().next().unwrap();
        assert_eq!(key, 0x0FFF);
        assert_eq!(stored.group(), 0x01);
    }

    #[test]
    fn test_unlinked_nacks_until_link_mode() {
        let mut sim = SimulatedDevice::gen2(DEV).unlinked();
        let nack = sim.respond(&tx("on", &[]), MODEM);
        assert_eq!(nack[0].message_type, Some(MessageType::DirectNack));
        assert_eq!(nack[0].byte(Field::Cmd2), 0xFF);

        sim.respond(&tx("enter_link_mode", &[]), MODEM);
        assert!(sim.is_linked());
        let ack = sim.respond(&tx("on", &[]), MODEM);
        assert_eq!(ack[0].message_type, Some(MessageType::DirectAck));
    }

    #[test]
    fn test_scripted_nack_and_silence() {
        let mut sim = SimulatedDevice::gen2(DEV);
        sim.nack_next(0xFD);
        sim.ignore_next();
        assert!(sim.respond(&tx("off", &[]), MODEM).is_empty());
        let nack = sim.respond(&tx("off", &[]), MODEM);
        assert_eq!(nack[0].byte(Field::Cmd2), 0xFD);
        assert_eq!(sim.received().len(), 2);
    }
}
