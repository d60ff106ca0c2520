//! An on/off switch device, spec.md §4.7.

use std::rc::Rc;
use std::cell::RefCell;

use crate::address::Address;
use crate::database::Database;
use crate::device::{Mode, Pairable, Responder, State, StateChange, StateReason};
use crate::engine::CommandSink;
use crate::flags::MessageFlags;
use crate::handler::{DeviceRefresh, Handler, HandlerPayload, StandardCmd};
use crate::message::Command;
use crate::signal::Signal;

fn flags_for(_mode: Mode) -> MessageFlags {
    MessageFlags::direct_standard()
}

fn cmd_for(is_on: bool, mode: Mode) -> Command {
    match (is_on, mode) {
        (true, Mode::Fast) => Command::OnFast,
        (true, _) => Command::On,
        (false, Mode::Fast) => Command::OffFast,
        (false, _) => Command::Off,
    }
}

/// A simple on/off switch: one group (1), one on/off state, spec.md §4.7.
pub struct OnOff {
    address: Address,
    name: String,
    db: Database,
    is_on: bool,
    level: u8,
    signal_state: Signal<StateChange>,
}

impl OnOff {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        OnOff {
            address,
            name: name.into(),
            db: Database::new(),
            is_on: false,
            level: 0,
            signal_state: Signal::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Sends an on/off command to group 1, spec.md §4.7/§8 scenario 1.
    pub fn set(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        is_on: bool,
        level: u8,
        mode: Mode,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let address = this.borrow().address;
        let cmd1 = cmd_for(is_on, mode);
        let cmd2 = Command::Other(level);
        let this = this.clone();

        let handler = Handler::StandardCmd(StandardCmd::new(address, cmd1, move |success, text, payload| {
            if success {
                this.borrow_mut().set_state(1, is_on, level, mode, reason);
            }
            on_done(success, text, payload);
        }));

        let frame = crate::message::Message::OutStandard {
            to: address,
            flags: flags_for(mode),
            cmd1,
            cmd2,
        }
        .to_frame();
        sink.enqueue(frame, handler, false);
    }

    pub fn on(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        level: u8,
        mode: Mode,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        OnOff::set(this, sink, true, level, mode, reason, on_done);
    }

    pub fn off(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        mode: Mode,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        OnOff::set(this, sink, false, 0, mode, reason, on_done);
    }

    /// Issues a status request; on ACK, updates state from `cmd2`, spec.md
    /// §4.7/§8 scenario 2.
    pub fn refresh(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        force: bool,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let (address, local_delta, is_current) = {
            let this = this.borrow();
            (this.address, this.db.delta(), this.db.is_current())
        };

        if !force && is_current {
            on_done(true, "current".to_string(), HandlerPayload::None);
            return;
        }

        let this_clone = this.clone();
        let handler = Handler::DeviceRefresh(DeviceRefresh::new(address, local_delta, move |success, text, payload| {
            if success {
                if let HandlerPayload::Cmd2(state) = payload {
                    let is_on = state != 0;
                    this_clone.borrow_mut().set_state(1, is_on, state, Mode::Normal, StateReason::Refresh);
                }
                if text == "current" {
                    this_clone.borrow_mut().db.confirm_current(local_delta);
                } else {
                    this_clone.borrow_mut().db.mark_stale();
                }
            }
            on_done(success, text, payload);
        }));

        let frame = crate::message::Message::OutStandard {
            to: address,
            flags: MessageFlags::direct_standard(),
            cmd1: Command::StatusRequest,
            cmd2: Command::Other(0x01),
        }
        .to_frame();
        sink.enqueue(frame, handler, false);
    }
}

impl State for OnOff {
    fn signal_state(&mut self) -> &mut Signal<StateChange> {
        &mut self.signal_state
    }

    fn set_state(&mut self, group: u8, is_on: bool, level: u8, mode: Mode, reason: StateReason) {
        self.is_on = is_on;
        self.level = level;
        let change = StateChange {
            group,
            is_on,
            level,
            mode,
            reason,
        };
        self.signal_state.emit(change);
    }
}

impl Pairable for OnOff {
    fn address(&self) -> Address {
        self.address
    }

    fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    fn refresh(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        force: bool,
        on_done: Box<dyn FnOnce(bool, String, HandlerPayload)>,
    ) {
        OnOff::refresh(this, sink, force, move |s, t, p| on_done(s, t, p));
    }
}

impl Responder for OnOff {
    fn handle_group_cmd(&mut self, group: u8, cmd1: Command, _cmd2: Command, reason: StateReason) {
        let is_on = !matches!(cmd1, Command::Off | Command::OffFast);
        self.set_state(group, is_on, if is_on { 0xff } else { 0 }, Mode::Normal, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn cmd_for_picks_fast_variant() {
        assert_eq!(cmd_for(true, Mode::Fast), Command::OnFast);
        assert_eq!(cmd_for(false, Mode::Fast), Command::OffFast);
        assert_eq!(cmd_for(true, Mode::Normal), Command::On);
    }

    #[test]
    fn handle_group_cmd_updates_state_and_emits() {
        let address = Address::from_str("11.22.33").unwrap();
        let mut device = OnOff::new(address, "switch");
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        device.signal_state().connect(move |change: &StateChange| {
            *s.borrow_mut() = Some(*change);
        });

        device.handle_group_cmd(1, Command::On, Command::Other(0), StateReason::Scene);

        assert!(device.is_on());
        assert_eq!(seen.borrow().unwrap().reason, StateReason::Scene);
    }
}
