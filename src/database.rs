//! Device all-link database model: persistent per-device all-link records
//! with an in-memory index, delta-based staleness, and incremental
//! fetch/add/remove primitives, spec.md §3/§4.6.
//!
//! Record field layout grounded on `Aehmlo-insteon-serial::link::LinkResult`
//! (controller/responder/group/address/data byte shape); the modem-side
//! analogue is `plm::frame::AllLinkRecord` (teacher). File persistence has
//! no teacher analogue — grounded in the pack's general use of
//! `serde`/`serde_json` for structured persistence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::constants::{DB_RECORD_SIZE, DB_TOP_ADDRESS};
use crate::error::Error;
use crate::flags::AllLinkFlags;
use crate::frame::AllLinkRecord;

/// A single all-link database record, spec.md §3: `{in_use, is_controller,
/// group, remote_address, data1, data2, data3, mem_addr}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbEntry {
    pub in_use: bool,
    pub is_controller: bool,
    pub group: u8,
    pub remote_address: Address,
    pub data1: u8,
    pub data2: u8,
    pub data3: u8,
    pub mem_addr: u16,
}

impl DbEntry {
    fn from_record(record: &AllLinkRecord, mem_addr: u16) -> Self {
        DbEntry {
            in_use: record.flags.contains(AllLinkFlags::IN_USE),
            is_controller: record.flags.contains(AllLinkFlags::IS_CONTROLLER),
            group: record.group,
            remote_address: record.to,
            data1: record.data[0],
            data2: record.data[1],
            data3: record.data[2],
            mem_addr,
        }
    }

}

/// The on-disk/in-memory representation of one device's all-link database,
/// spec.md §6: `{delta: byte, entries: [record], meta: {namespace:
/// object}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    /// Increments on every successful device-side modification; used to
    /// detect staleness without a full re-download, spec.md §4.6.
    delta: u8,
    /// `true` only when `delta` is known to match the device's own delta.
    /// A freshly constructed or loaded database starts stale: it must be
    /// confirmed (or replaced) by a `DeviceRefresh` before it is trusted.
    #[serde(skip)]
    delta_confirmed: bool,
    entries: Vec<DbEntry>,
    meta: HashMap<String, serde_json::Value>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    pub fn delta(&self) -> u8 {
        self.delta
    }

    /// Spec.md §3 invariant: "the record list is authoritative only when
    /// `delta_matches_device == true`".
    pub fn is_current(&self) -> bool {
        self.delta_confirmed
    }

    /// Called once a `DeviceRefresh` confirms the local delta matches the
    /// device's reported delta.
    pub fn confirm_current(&mut self, device_delta: u8) {
        self.delta_confirmed = self.delta == device_delta;
    }

    pub fn mark_stale(&mut self) {
        self.delta_confirmed = false;
    }

    pub fn entries(&self) -> &[DbEntry] {
        &self.entries
    }

    pub fn find(&self, addr: Address, group: u8, is_controller: bool) -> Option<&DbEntry> {
        self.entries
            .iter()
            .find(|e| e.in_use && e.remote_address == addr && e.group == group && e.is_controller == is_controller)
    }

    /// Replaces the entry list wholesale, as happens after a `DeviceDbGet`
    /// download completes, spec.md §4.4.
    pub fn replace_all(&mut self, records: Vec<AllLinkRecord>) {
        self.entries = records
            .iter()
            .enumerate()
            .map(|(i, r)| DbEntry::from_record(r, DB_TOP_ADDRESS - (i as u16) * DB_RECORD_SIZE))
            .collect();
    }

    /// Finds the next unused memory slot, scanning descending from the top
    /// of the address space, spec.md §4.6.
    fn next_free_mem_addr(&self) -> u16 {
        let lowest_used = self
            .entries
            .iter()
            .map(|e| e.mem_addr)
            .min()
            .unwrap_or(DB_TOP_ADDRESS + DB_RECORD_SIZE);
        lowest_used - DB_RECORD_SIZE
    }

    /// Builds the all-link record that would add `addr` as a controller of
    /// this device on `group`. The caller is responsible for sending it
    /// through a `DeviceDbModify` handler and calling
    /// [Database::commit_write] only on ACK, spec.md §4.6: "on failure, do
    /// not mutate in-memory state."
    pub fn add_ctrl_of(&self, addr: Address, group: u8, data: [u8; 3]) -> (u16, AllLinkRecord) {
        self.build_write(addr, group, true, data)
    }

    pub fn add_resp_of(&self, addr: Address, group: u8, data: [u8; 3]) -> (u16, AllLinkRecord) {
        self.build_write(addr, group, false, data)
    }

    fn build_write(&self, addr: Address, group: u8, is_controller: bool, data: [u8; 3]) -> (u16, AllLinkRecord) {
        let mem_addr = self.next_free_mem_addr();
        let mut flags = AllLinkFlags::IN_USE;
        if is_controller {
            flags |= AllLinkFlags::IS_CONTROLLER;
        }
        (
            mem_addr,
            AllLinkRecord {
                flags,
                group,
                to: addr,
                data,
            },
        )
    }

    /// Applies a write that the modem has ACK'd: updates the in-memory
    /// list and increments `delta`, spec.md §4.6.
    pub fn commit_write(&mut self, mem_addr: u16, record: AllLinkRecord) {
        let entry = DbEntry::from_record(&record, mem_addr);
        match self.entries.iter_mut().find(|e| e.mem_addr == mem_addr) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.delta = self.delta.wrapping_add(1);
        self.delta_confirmed = false;
    }

    /// Marks `entry`'s slot unused, leaving it reusable, spec.md §4.6:
    /// "Deletion marks `in_use=false` and leaves the slot as reusable."
    pub fn delete(&mut self, mem_addr: u16) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.mem_addr == mem_addr) {
            entry.in_use = false;
            self.delta = self.delta.wrapping_add(1);
            self.delta_confirmed = false;
        }
    }

    pub fn get_meta(&self, namespace: &str) -> Option<&serde_json::Value> {
        self.meta.get(namespace)
    }

    pub fn set_meta(&mut self, namespace: impl Into<String>, value: serde_json::Value) {
        self.meta.insert(namespace.into(), value);
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read(path.as_ref())?;
        let mut db: Database = serde_json::from_slice(&data).map_err(|_| Error::Parse)?;
        db.delta_confirmed = false;
        Ok(db)
    }

    /// Writes atomically: write a temp file in the same directory, then
    /// rename over the destination, spec.md §5 ("Resources").
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path: PathBuf = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("db")
        ));

        let data = serde_json::to_vec_pretty(self).map_err(|_| Error::Parse)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        debug!("saved device database to {}", path.display());
        Ok(())
    }
}

/// Computes the conventional per-device database file path: `{dir}/{addr}.json`.
pub fn path_for_address(dir: impl AsRef<Path>, addr: Address) -> PathBuf {
    dir.as_ref().join(format!("{}.json", addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn fresh_database_is_not_current() {
        let db = Database::new();
        assert!(!db.is_current());
    }

    #[test]
    fn confirm_current_matches_delta() {
        let mut db = Database::new();
        db.confirm_current(0);
        assert!(db.is_current());
        db.confirm_current(1);
        assert!(!db.is_current());
    }

    #[test]
    fn commit_write_increments_delta_and_marks_stale_again() {
        let mut db = Database::new();
        db.confirm_current(0);
        assert!(db.is_current());

        let addr = Address::from_str("11.22.33").unwrap();
        let (mem_addr, record) = db.add_resp_of(addr, 1, [0, 0, 0]);
        db.commit_write(mem_addr, record);

        assert_eq!(db.delta(), 1);
        assert!(!db.is_current());
        assert!(db.find(addr, 1, false).is_some());
    }

    #[test]
    fn delete_marks_in_use_false_and_leaves_slot() {
        let mut db = Database::new();
        let addr = Address::from_str("11.22.33").unwrap();
        let (mem_addr, record) = db.add_ctrl_of(addr, 2, [1, 2, 3]);
        db.commit_write(mem_addr, record);
        assert!(db.find(addr, 2, true).is_some());

        db.delete(mem_addr);
        assert!(db.find(addr, 2, true).is_none());
        assert_eq!(db.entries().len(), 1);
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut db = Database::new();
        let addr = Address::from_str("11.22.33").unwrap();
        let (mem_addr, record) = db.add_resp_of(addr, 1, [0, 0, 0]);
        db.commit_write(mem_addr, record);
        db.set_meta("Remote", serde_json::json!({"battery_voltage": 3.7}));

        let dir = std::env::temp_dir();
        let path = dir.join(format!("insteon-core-test-{}.json", std::process::id()));
        db.save_to_file(&path).unwrap();

        let loaded = Database::load_from_file(&path).unwrap();
        assert_eq!(loaded.delta(), db.delta());
        assert_eq!(loaded.entries(), db.entries());
        assert!(!loaded.is_current());

        std::fs::remove_file(&path).ok();
    }
}
