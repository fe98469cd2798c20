// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! All-Link Database (ALDB) record store
//!
//! Local copy of a device's link database. Records are 8 bytes wide and
//! keyed by their two-byte memory address; the database grows downwards
//! from the top of memory, so a scan visits keys in decreasing order.

use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::Address;

/// Width of one ALDB record in bytes
pub const RECORD_WIDTH: u16 = 8;

/// Link flags bit: record in use
pub const FLAG_IN_USE: u8 = 0x80;
/// Link flags bit: device is controller for this link
pub const FLAG_CONTROLLER: u8 = 0x40;

/// One 8-byte ALDB record
///
/// Layout: link flags, group, peer address (3 bytes), data 1..3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AldbRecord([u8; 8]);

impl AldbRecord {
    /// Create a record from its raw bytes
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Create a record from its parts
    pub fn from_parts(link_flags: u8, group: u8, address: Address, data: [u8; 3]) -> Self {
        let [hi, mid, low] = address.bytes();
        Self([link_flags, group, hi, mid, low, data[0], data[1], data[2]])
    }

    /// The sentinel record that ends a database
    pub const fn sentinel() -> Self {
        Self([0; 8])
    }

    /// Link flags byte
    pub fn link_flags(&self) -> u8 {
        self.0[0]
    }

    /// All-link group
    pub fn group(&self) -> u8 {
        self.0[1]
    }

    /// Peer device address
    pub fn address(&self) -> Address {
        Address::new(self.0[2], self.0[3], self.0[4])
    }

    /// Data bytes 1..3
    pub fn data(&self) -> [u8; 3] {
        [self.0[5], self.0[6], self.0[7]]
    }

    /// Raw bytes
    pub fn bytes(&self) -> [u8; 8] {
        self.0
    }

    /// Check if the record is in use
    pub fn in_use(&self) -> bool {
        self.0[0] & FLAG_IN_USE != 0
    }

    /// Check if the device is controller for this link
    pub fn is_controller(&self) -> bool {
        self.0[0] & FLAG_CONTROLLER != 0
    }

    /// Check if this is the last-entry sentinel
    ///
    /// The sentinel is a record whose link flags byte is zero. Both scan
    /// strategies stop on it.
    pub fn is_last(&self) -> bool {
        self.0[0] == 0x00
    }

    pub(crate) fn set_byte(&mut self, offset: usize, byte: u8) {
        if let Some(slot) = self.0.get_mut(offset) {
            *slot = byte;
        }
    }
}

impl fmt::Display for AldbRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = if self.is_controller() { "C" } else { "R" };
        let data = self.data();
        write!(
            f,
            "{:02X} {} grp {:02X} {} [{:02X} {:02X} {:02X}]",
            self.link_flags(),
            role,
            self.group(),
            self.address(),
            data[0],
            data[1],
            data[2]
        )
    }
}

/// Local copy of a device's ALDB
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aldb {
    records: BTreeMap<u16, AldbRecord>,
    delta: Option<u8>,
}

impl Aldb {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine an address pair into an ordering-preserving key
    pub fn key(msb: u8, lsb: u8) -> u16 {
        u16::from_be_bytes([msb, lsb])
    }

    /// Split a key back into its address pair
    pub fn split(key: u16) -> (u8, u8) {
        let [msb, lsb] = key.to_be_bytes();
        (msb, lsb)
    }

    /// Address of the record below `(msb, lsb)`
    ///
    /// Returns `None` when the subtraction would run below address zero.
    pub fn next_address(msb: u8, lsb: u8) -> Option<(u8, u8)> {
        Self::key(msb, lsb)
            .checked_sub(RECORD_WIDTH)
            .map(Self::split)
    }

    /// Insert or overwrite a record
    pub fn edit(&mut self, key: u16, record: AldbRecord) {
        self.records.insert(key, record);
    }

    /// Record at `key`
    pub fn get(&self, key: u16) -> Option<&AldbRecord> {
        self.records.get(&key)
    }

    /// Check if the record at `key` is the sentinel
    ///
    /// A missing record is not the sentinel.
    pub fn is_last(&self, key: u16) -> bool {
        self.records.get(&key).map_or(false, AldbRecord::is_last)
    }

    /// Store one byte read by a legacy peek
    ///
    /// The record base is the address rounded down to the record width.
    pub fn store_peeked_byte(&mut self, msb: u8, lsb: u8, byte: u8) {
        let address = Self::key(msb, lsb);
        let base = address & !(RECORD_WIDTH - 1);
        let offset = (address & (RECORD_WIDTH - 1)) as usize;
        self.records.entry(base).or_default().set_byte(offset, byte);
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records in scan order (descending keys)
    pub fn iter(&self) -> impl Iterator<Item = (u16, &AldbRecord)> {
        self.records.iter().rev().map(|(key, record)| (*key, record))
    }

    /// Records in use, stopping at the sentinel
    pub fn links(&self) -> impl Iterator<Item = (u16, &AldbRecord)> {
        self.iter()
            .take_while(|(_, record)| !record.is_last())
            .filter(|(_, record)| record.in_use())
    }

    /// Number of stored records, sentinel included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Last known ALDB delta
    pub fn delta(&self) -> Option<u8> {
        self.delta
    }

    /// Record the ALDB delta reported by the device
    pub fn set_delta(&mut self, delta: u8) {
        self.delta = Some(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        assert_eq!(Aldb::key(0x0F, 0xF8), 0x0FF8);
        assert!(Aldb::key(0x0F, 0x00) > Aldb::key(0x0E, 0xFF));
        assert_eq!(Aldb::split(0x0FF8), (0x0F, 0xF8));
    }

    #[test]
    fn test_next_address_carry() {
        assert_eq!(Aldb::next_address(0x0F, 0x00), Some((0x0E, 0xF8)));
        assert_eq!(Aldb::next_address(0x0F, 0xF8), Some((0x0F, 0xF0)));
        assert_eq!(Aldb::next_address(0x0F, 0xFF), Some((0x0F, 0xF7)));
        assert_eq!(Aldb::next_address(0x00, 0x08), Some((0x00, 0x00)));
        assert_eq!(Aldb::next_address(0x00, 0x07), None);
    }

    #[test]
    fn test_is_last_only_for_sentinel() {
        let mut aldb = Aldb::new();
        let peer = Address::new(0x44, 0x85, 0x11);
        aldb.edit(0x0FF8, AldbRecord::from_parts(0xE2, 0x01, peer, [3, 28, 1]));
        aldb.edit(0x0FF0, AldbRecord::sentinel());
        // flags clear but other bytes set is still the sentinel
        aldb.edit(0x0FE8, AldbRecord::new([0x00, 0x01, 0, 0, 0, 0, 0, 0]));
        // in-use bit clear but flags nonzero is not
        aldb.edit(0x0FE0, AldbRecord::new([0x02, 0, 0, 0, 0, 0, 0, 0]));

        assert!(!aldb.is_last(0x0FF8));
        assert!(aldb.is_last(0x0FF0));
        assert!(aldb.is_last(0x0FE8));
        assert!(!aldb.is_last(0x0FE0));
        assert!(!aldb.is_last(0x0100));
    }

    #[test]
    fn test_store_peeked_bytes() {
        let mut aldb = Aldb::new();
        let bytes = [0xA2, 0x00, 0x11, 0x22, 0x33, 0xFF, 0x1C, 0x01];
        for (i, byte) in bytes.iter().enumerate() {
            aldb.store_peeked_byte(0x0F, 0xF8 + i as u8, *byte);
        }
        let record = aldb.get(0x0FF8).unwrap();
        assert_eq!(record.bytes(), bytes);
        assert_eq!(record.address(), Address::new(0x11, 0x22, 0x33));
        assert!(record.in_use());
        assert!(record.is_controller());
        assert_eq!(aldb.len(), 1);
    }

    #[test]
    fn test_iteration_descending_and_links() {
        let mut aldb = Aldb::new();
        let peer = Address::new(1, 2, 3);
        aldb.edit(0x0FE8, AldbRecord::sentinel());
        aldb.edit(0x0FF8, AldbRecord::from_parts(0xA2, 1, peer, [0; 3]));
        aldb.edit(0x0FF0, AldbRecord::from_parts(0x22, 2, peer, [0; 3]));
        let keys: Vec<u16> = aldb.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![0x0FF8, 0x0FF0, 0x0FE8]);
        assert_eq!(aldb.links().count(), 1);
    }

    #[test]
    fn test_clear_keeps_delta() {
        let mut aldb = Aldb::new();
        aldb.edit(0x0FF8, AldbRecord::sentinel());
        aldb.set_delta(0x2A);
        aldb.clear();
        assert!(aldb.is_empty());
        assert_eq!(aldb.delta(), Some(0x2A));
    }
}
