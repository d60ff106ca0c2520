//! The PLM itself as a device object: scene triggers, the modem-side
//! all-link database, and participation in pairing as a controller or
//! responder, spec.md §2 component 6/§4.7.
//!
//! The connection-level responsibilities the teacher's old `Modem` held
//! (serial open, retry-on-timeout, framing) now live in [crate::link] and
//! [crate::engine]; this `Modem` is the address-0 device the gateway talks
//! to, not the transport.

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::Address;
use crate::database::Database;
use crate::engine::CommandSink;
use crate::flags::AllLinkFlags;
use crate::frame::AllLinkRecord;
use crate::handler::{DeviceDbGet, DeviceDbModify, Handler, HandlerPayload};
use crate::message::{Command, Message, ModemCommand};

/// The modem's own all-link database and scene-trigger surface, spec.md
/// §4.7. Addressed implicitly: frames targeting the modem carry no
/// INSTEON [Address] of their own, so this struct has none either.
pub struct Modem {
    address: Address,
    db: Database,
}

impl Modem {
    pub fn new(address: Address) -> Self {
        Modem {
            address,
            db: Database::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Fires an all-link group from the modem itself, spec.md §4.7 (Modem
    /// scene trigger): every device linked as a responder on `group` reacts
    /// as if the command came from a real controller.
    pub fn trigger_scene(sink: &mut dyn CommandSink, group: u8, cmd1: Command, cmd2: Command, handler: Handler) {
        let frame = Message::OutAllLinkTrigger { group, cmd1, cmd2 }.to_frame();
        sink.enqueue(frame, handler, false);
    }

    /// Downloads the modem's own all-link database, spec.md §4.4/§4.6:
    /// driven by repeated `GetFirstAllLinkRecord`/`GetNextAllLinkRecord`
    /// frames, terminating when [DeviceDbGet] has seen enough empty
    /// replies.
    pub fn refresh_db(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let this_clone = this.clone();
        let handler = Handler::DeviceDbGet(DeviceDbGet::new(move |success, text, payload| {
            if success {
                if let HandlerPayload::Records(records) = payload.clone() {
                    this_clone.borrow_mut().db.replace_all(records);
                }
            }
            on_done(success, text, payload);
        }));

        let frame = ModemCommand::GetFirstAllLinkRecord.to_frame();
        sink.enqueue(frame, handler, false);
    }

    /// Adds `device` as a responder of the modem on `group`: the modem
    /// controls the device, spec.md §4.8 step "ensure device is responder
    /// of modem."
    pub fn link_as_controller_of(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        device: Address,
        group: u8,
        data: [u8; 3],
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        Modem::write_link(this, sink, device, group, data, true, on_done);
    }

    /// Adds `device` as a controller of the modem on `group`, spec.md
    /// §4.8 step "add device as controller of modem."
    pub fn link_as_responder_of(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        device: Address,
        group: u8,
        data: [u8; 3],
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        Modem::write_link(this, sink, device, group, data, false, on_done);
    }

    fn write_link(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        device: Address,
        group: u8,
        data: [u8; 3],
        is_controller: bool,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let (mem_addr, record) = if is_controller {
            this.borrow().db.add_ctrl_of(device, group, data)
        } else {
            this.borrow().db.add_resp_of(device, group, data)
        };

        let this_clone = this.clone();
        let record_clone = record.clone();
        let handler = Handler::DeviceDbModify(DeviceDbModify::new(move |success, text, payload| {
            if success {
                this_clone.borrow_mut().db.commit_write(mem_addr, record_clone);
            }
            on_done(success, text, payload);
        }));

        let mut flags = AllLinkFlags::IN_USE;
        if is_controller {
            flags |= AllLinkFlags::IS_CONTROLLER;
        }
        let frame = ModemCommand::WriteAllLinkRecord {
            flags,
            group,
            to: device,
            data,
        }
        .to_frame();
        sink.enqueue(frame, handler, false);
    }
}

impl Default for Modem {
    fn default() -> Self {
        Modem::new(Address::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn refresh_db_replaces_entries_from_records() {
        let modem = Rc::new(RefCell::new(Modem::new(Address::from_str("aa.bb.cc").unwrap())));
        let addr = Address::from_str("11.22.33").unwrap();
        let record = AllLinkRecord {
            flags: AllLinkFlags::IN_USE | AllLinkFlags::IS_CONTROLLER,
            group: 1,
            to: addr,
            data: [0, 0, 0],
        };
        modem.borrow_mut().db.replace_all(vec![record]);
        assert_eq!(modem.borrow().db().entries().len(), 1);
    }
}
