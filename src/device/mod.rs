//! Device objects: stateful entities keyed by Insteon address, spec.md §2
//! component 6/§4.7.
//!
//! Module boundary (`Responder`/capability split) named after
//! `original_source/insteon_mqtt/device/functions/{Responder,State}.py`
//! (filenames only — bodies were filtered from the retrieved pack, so the
//! trait *names* are grounded there; the implementations are built from
//! spec.md §4.7 directly).

pub mod dimmer;
pub mod onoff;
pub mod outlet;
pub mod remote;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::address::Address;
use crate::database::Database;
use crate::engine::CommandSink;
use crate::flags::MessageFlags;
use crate::handler::{DeviceDbModify, Handler, HandlerPayload};
use crate::message::{Command, Message};
use crate::signal::Signal;

/// Provenance carried alongside a state change, spec.md §9: "A typed
/// tagged variant is the portable equivalent" of the source's string tags
/// (`"device"`, `"command"`, `"refresh"`, `"scene"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateReason {
    Device,
    Command,
    Refresh,
    Scene,
}

/// The operating mode a command is sent or reported with, spec.md §4.7
/// (dimmer RAMP mode; on/off fast vs. normal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Fast,
    /// Transition encoded as a 4-bit field, spec.md §4.7. Devices without
    /// ramp support coerce this to `Normal`, spec.md §7.
    Ramp(u8),
}

/// Emitted through a device's `signal_state`, spec.md §4.7: "inbound
/// message → Device.handle_* → `_set_state` → emit `signal_state`."
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateChange {
    pub group: u8,
    pub is_on: bool,
    pub level: u8,
    pub mode: Mode,
    pub reason: StateReason,
}

/// Capability shared by every device that can be the target of an all-link
/// group broadcast (a scene), spec.md glossary "Scene": "a fan-out to
/// linked-device `handle_group_cmd`."
pub trait Responder {
    fn handle_group_cmd(&mut self, group: u8, cmd1: Command, cmd2: Command, reason: StateReason);
}

/// Capability shared by every device that tracks on/off/level state and
/// reports it through a signal, spec.md §4.7's "state update pathway."
pub trait State {
    fn signal_state(&mut self) -> &mut Signal<StateChange>;
    fn set_state(&mut self, group: u8, is_on: bool, level: u8, mode: Mode, reason: StateReason) {
        let change = StateChange {
            group,
            is_on,
            level,
            mode,
            reason,
        };
        self.signal_state().emit(change);
    }
}

/// Owns every device, keyed by address, spec.md §3 ("Devices are owned by
/// a top-level registry keyed by Address").
#[derive(Default)]
pub struct DeviceRegistry {
    responders: HashMap<(Address, u8), Box<dyn Responder>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Registers `device` to receive group broadcasts on `(address,
    /// group)`, spec.md §3 ("Group map is an integer-keyed table `group
    /// -> handler`").
    pub fn register_group(&mut self, address: Address, group: u8, device: Box<dyn Responder>) {
        self.responders.insert((address, group), device);
    }

    pub fn unregister_group(&mut self, address: Address, group: u8) {
        self.responders.remove(&(address, group));
    }

    pub fn dispatch_group_cmd(&mut self, address: Address, group: u8, cmd1: Command, cmd2: Command) {
        if let Some(device) = self.responders.get_mut(&(address, group)) {
            device.handle_group_cmd(group, cmd1, cmd2, StateReason::Scene);
        }
    }
}

/// Capability required by [crate::pairing::pair]: a device that has an
/// address, an own all-link database, and a refresh operation, spec.md
/// §4.8.
pub trait Pairable: State {
    fn address(&self) -> Address;
    fn db_mut(&mut self) -> &mut Database;

    /// Issues a refresh, spec.md §4.7; boxed rather than generic so
    /// `pairing::pair` can call it without becoming generic over the
    /// refresh closure's concrete type.
    fn refresh(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        force: bool,
        on_done: Box<dyn FnOnce(bool, String, HandlerPayload)>,
    ) where
        Self: Sized;
}

/// Writes a link record into `this`'s own all-link database (not the
/// modem's), by sending an extended command to the device itself, spec.md
/// §4.8's "add modem as responder of device on group g." No teacher
/// analogue: the teacher never models a device's own database, only the
/// modem's (`ModemCommand::WriteAllLinkRecord`); this generalizes that
/// write path to an arbitrary device address.
pub(crate) fn write_own_link<D: Pairable + 'static>(
    this: &Rc<RefCell<D>>,
    sink: &mut dyn CommandSink,
    remote: Address,
    group: u8,
    is_controller: bool,
    data: [u8; 3],
    on_done: Box<dyn FnOnce(bool, String, HandlerPayload)>,
) {
    let (mem_addr, record) = {
        let mut device = this.borrow_mut();
        let db = device.db_mut();
        if is_controller {
            db.add_ctrl_of(remote, group, data)
        } else {
            db.add_resp_of(remote, group, data)
        }
    };

    let address = this.borrow().address();

    let this_clone = this.clone();
    let record_clone = record.clone();
    let handler = Handler::DeviceDbModify(DeviceDbModify::new_for_device_write(
        address,
        Command::ExtendedGetSet,
        move |success, text, payload| {
            if success {
                this_clone.borrow_mut().db_mut().commit_write(mem_addr, record_clone);
            }
            on_done(success, text, payload);
        },
    ));

    let mut data14 = [0u8; 14];
    data14[0] = group;
    data14[1] = u8::from(is_controller);

    let frame = Message::OutExtended {
        to: address,
        flags: MessageFlags::direct_extended(),
        cmd1: Command::ExtendedGetSet,
        cmd2: Command::Other(0x00),
        data: data14,
    }
    .to_frame();
    sink.enqueue(frame, handler, false);
}

/// Helper shared by the concrete device modules: builds a `StandardCmd`
/// send and enqueues it, returning through `done` once the reply settles.
/// Not part of the public surface — each device module calls this through
/// its own `on`/`off`/`refresh` methods.
pub(crate) fn send_standard(
    sink: &mut dyn CommandSink,
    to: Address,
    flags: crate::flags::MessageFlags,
    cmd1: Command,
    cmd2: Command,
    handler: crate::handler::Handler,
    high_priority: bool,
) {
    let frame = crate::message::Message::OutStandard { to, flags, cmd1, cmd2 }.to_frame();
    sink.enqueue(frame, handler, high_priority);
}
