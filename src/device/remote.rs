//! A battery-powered one-way remote, spec.md §4.7: "processes inbound
//! broadcasts only (it cannot be addressed while asleep); reads battery
//! voltage via an extended flags request."

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::Address;
use crate::constants::{REMOTE_BATTERY_DIVISOR, REMOTE_BATTERY_FULL_SCALE, REMOTE_META_NAMESPACE};
use crate::database::Database;
use crate::device::{Mode, Responder, State, StateChange, StateReason};
use crate::engine::CommandSink;
use crate::flags::MessageFlags;
use crate::handler::{ExtendedCmdResponse, Handler, HandlerPayload};
use crate::message::{Command, Message};
use crate::signal::Signal;

/// D1 of the extended flags request: 0x01 asks for the extended device
/// status that carries battery voltage in D11, spec.md §4.7.
const EXTENDED_FLAGS_REQUEST_D1: u8 = 0x01;

/// A one-way battery remote: no direct commands accepted, spec.md §4.7.
pub struct Remote {
    address: Address,
    name: String,
    db: Database,
    signal_state: Signal<StateChange>,
}

impl Remote {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Remote {
            address,
            name: name.into(),
            db: Database::new(),
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

    /// Battery voltage last read via [Remote::read_battery], in volts, if
    /// any has been recorded, spec.md §4.7.
    pub fn battery_voltage(&self) -> Option<f32> {
        self.db
            .get_meta(REMOTE_META_NAMESPACE)
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
    }

    /// Sends the extended flags request and, on the matching extended
    /// reply, decodes D11 into volts (`raw / 50.0`, full scale 3.7V) and
    /// stores it in the per-device database under the `"Remote"`
    /// namespace, spec.md §4.7/§8 scenario 3.
    pub fn read_battery(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let address = this.borrow().address;
        let this_clone = this.clone();

        let handler = Handler::ExtendedCmdResponse(ExtendedCmdResponse::new(
            address,
            Command::ExtendedGetSet,
            Command::ExtendedGetSet,
            move |success, text, payload| {
                if success {
                    if let HandlerPayload::Byte(raw) = payload {
                        let volts = (raw as f32 / REMOTE_BATTERY_DIVISOR).min(REMOTE_BATTERY_FULL_SCALE);
                        this_clone
                            .borrow_mut()
                            .db
                            .set_meta(REMOTE_META_NAMESPACE, serde_json::json!(volts));
                    }
                }
                on_done(success, text, payload);
            },
        ));

        let mut data = [0u8; 14];
        data[0] = EXTENDED_FLAGS_REQUEST_D1;

        let frame = Message::OutExtended {
            to: address,
            flags: MessageFlags::direct_extended(),
            cmd1: Command::ExtendedGetSet,
            cmd2: Command::Other(0x00),
            data,
        }
        .to_frame();
        sink.enqueue(frame, handler, false);
    }
}

impl State for Remote {
    fn signal_state(&mut self) -> &mut Signal<StateChange> {
        &mut self.signal_state
    }
}

impl Responder for Remote {
    fn handle_group_cmd(&mut self, group: u8, cmd1: Command, _cmd2: Command, reason: StateReason) {
        // A remote's buttons report on/off via broadcast only; there is no
        // addressable state to hold beyond the most recent press.
        let is_on = !matches!(cmd1, Command::Off | Command::OffFast);
        self.set_state(group, is_on, if is_on { 0xff } else { 0 }, Mode::Normal, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn battery_voltage_divides_raw_byte_and_caps_at_full_scale() {
        let address = Address::from_str("11.22.33").unwrap();
        let mut device = Remote::new(address, "remote");
        device.db.set_meta(REMOTE_META_NAMESPACE, serde_json::json!(0xc8 as f32 / REMOTE_BATTERY_DIVISOR));
        let volts = device.battery_voltage().unwrap();
        assert!((volts - 4.0).abs() < 0.01);
    }

    #[test]
    fn handle_group_cmd_emits_without_persisting_level() {
        let address = Address::from_str("11.22.33").unwrap();
        let mut device = Remote::new(address, "remote");
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        device.signal_state().connect(move |change: &StateChange| {
            *s.borrow_mut() = Some(*change);
        });
        device.handle_group_cmd(3, Command::On, Command::Other(0), StateReason::Scene);
        assert_eq!(seen.borrow().unwrap().group, 3);
    }
}
