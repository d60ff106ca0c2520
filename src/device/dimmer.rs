//! A dimmable switch, spec.md §4.7: layers a 0-255 brightness level and a
//! 4-bit RAMP-rate mode on top of the plain on/off model.

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::Address;
use crate::database::Database;
use crate::device::{Mode, Pairable, Responder, State, StateChange, StateReason};
use crate::engine::CommandSink;
use crate::flags::MessageFlags;
use crate::handler::{DeviceRefresh, Handler, HandlerPayload, StandardCmd};
use crate::message::{Command, Message};
use crate::signal::Signal;

const CMD_RAMP_ON: u8 = 0x2e;
const CMD_RAMP_OFF: u8 = 0x2f;

/// Coerces `Ramp` to `Normal` for devices that don't advertise ramp support,
/// spec.md §7: "devices without ramp support coerce RAMP to NORMAL."
fn coerce_mode(mode: Mode, supports_ramp: bool) -> Mode {
    match mode {
        Mode::Ramp(_) if !supports_ramp => Mode::Normal,
        other => other,
    }
}

fn cmd_for(is_on: bool, mode: Mode) -> Command {
    match (is_on, mode) {
        (true, Mode::Fast) => Command::OnFast,
        (true, Mode::Ramp(_)) => Command::Other(CMD_RAMP_ON),
        (true, Mode::Normal) => Command::On,
        (false, Mode::Fast) => Command::OffFast,
        (false, Mode::Ramp(_)) => Command::Other(CMD_RAMP_OFF),
        (false, Mode::Normal) => Command::Off,
    }
}

fn cmd2_for(level: u8, mode: Mode) -> u8 {
    match mode {
        // A ramp send packs the high nibble of level with the low nibble
        // of the rate, spec.md §4.7.
        Mode::Ramp(rate) => (level & 0xf0) | (rate & 0x0f),
        _ => level,
    }
}

/// A dimmable load: one group (1), level 0-255, spec.md §4.7.
pub struct Dimmer {
    address: Address,
    name: String,
    db: Database,
    is_on: bool,
    level: u8,
    supports_ramp: bool,
    signal_state: Signal<StateChange>,
}

impl Dimmer {
    pub fn new(address: Address, name: impl Into<String>, supports_ramp: bool) -> Self {
        Dimmer {
            address,
            name: name.into(),
            db: Database::new(),
            is_on: false,
            level: 0,
            supports_ramp,
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

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn set(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        is_on: bool,
        level: u8,
        mode: Mode,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let (address, supports_ramp) = {
            let this = this.borrow();
            (this.address, this.supports_ramp)
        };
        let mode = coerce_mode(mode, supports_ramp);
        let cmd1 = cmd_for(is_on, mode);
        let cmd2 = Command::Other(cmd2_for(level, mode));
        let this_clone = this.clone();

        let handler = Handler::StandardCmd(StandardCmd::new(address, cmd1, move |success, text, payload| {
            if success {
                this_clone.borrow_mut().set_state(1, is_on, level, mode, reason);
            }
            on_done(success, text, payload);
        }));

        let frame = Message::OutStandard {
            to: address,
            flags: MessageFlags::direct_standard(),
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
        Dimmer::set(this, sink, true, level, mode, reason, on_done);
    }

    pub fn off(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        mode: Mode,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        Dimmer::set(this, sink, false, 0, mode, reason, on_done);
    }

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
                if let HandlerPayload::Cmd2(level) = payload {
                    let is_on = level != 0;
                    this_clone.borrow_mut().set_state(1, is_on, level, Mode::Normal, StateReason::Refresh);
                }
                if text == "current" {
                    this_clone.borrow_mut().db.confirm_current(local_delta);
                } else {
                    this_clone.borrow_mut().db.mark_stale();
                }
            }
            on_done(success, text, payload);
        }));

        let frame = Message::OutStandard {
            to: address,
            flags: MessageFlags::direct_standard(),
            cmd1: Command::StatusRequest,
            cmd2: Command::Other(0x01),
        }
        .to_frame();
        sink.enqueue(frame, handler, false);
    }
}

impl Pairable for Dimmer {
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
        Dimmer::refresh(this, sink, force, move |s, t, p| on_done(s, t, p));
    }
}

impl State for Dimmer {
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

impl Responder for Dimmer {
    fn handle_group_cmd(&mut self, group: u8, cmd1: Command, cmd2: Command, reason: StateReason) {
        let is_on = !matches!(cmd1, Command::Off | Command::OffFast);
        let level = match cmd2 {
            Command::Other(v) => v,
            _ => {
                if is_on {
                    0xff
                } else {
                    0
                }
            }
        };
        self.set_state(group, is_on, level, Mode::Normal, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn coerce_mode_drops_ramp_when_unsupported() {
        assert_eq!(coerce_mode(Mode::Ramp(5), false), Mode::Normal);
        assert_eq!(coerce_mode(Mode::Ramp(5), true), Mode::Ramp(5));
    }

    #[test]
    fn cmd2_for_ramp_packs_level_and_rate() {
        assert_eq!(cmd2_for(0xa0, Mode::Ramp(0x3)), 0xa3);
        assert_eq!(cmd2_for(0x80, Mode::Normal), 0x80);
    }

    #[test]
    fn handle_group_cmd_reads_level_from_cmd2() {
        let address = Address::from_str("11.22.33").unwrap();
        let mut device = Dimmer::new(address, "dimmer", true);
        device.handle_group_cmd(1, Command::On, Command::Other(0x40), StateReason::Scene);
        assert!(device.is_on());
        assert_eq!(device.level(), 0x40);
    }
}
