//! A dual-outlet device, spec.md §4.7: "overloads group 2 onto an extended-
//! message form (D1=0x02) because the device reply does not echo the
//! group; the device keeps a FIFO `pending_group_of_command` queue that
//! pops on each ACK to attribute state to the right outlet."

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::address::Address;
use crate::constants::{OUTLET_DATA1_BOTTOM, OUTLET_DATA1_TOP};
use crate::database::Database;
use crate::device::{Mode, Pairable, Responder, State, StateChange, StateReason};
use crate::engine::CommandSink;
use crate::flags::MessageFlags;
use crate::handler::{DeviceRefresh, Handler, HandlerPayload, StandardCmd};
use crate::message::{Command, Message};
use crate::signal::Signal;

fn cmd_for(is_on: bool) -> Command {
    if is_on {
        Command::On
    } else {
        Command::Off
    }
}

/// A two-relay outlet: group 1 is the top outlet, group 2 the bottom.
/// Group 1 commands are ordinary `StandardCmd`s; group 2 is sent as an
/// extended command (D1 = [OUTLET_DATA1_BOTTOM]) since the ACK does not
/// carry group information, spec.md §4.7.
pub struct Outlet {
    address: Address,
    name: String,
    db: Database,
    /// Index 0 = group 1 (top), index 1 = group 2 (bottom).
    is_on: [bool; 2],
    /// FIFO of outstanding command groups, popped on each ACK to attribute
    /// state to the right outlet, spec.md §8 invariant 6.
    pending_group_of_command: VecDeque<u8>,
    signal_state: Signal<StateChange>,
}

impl Outlet {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Outlet {
            address,
            name: name.into(),
            db: Database::new(),
            is_on: [false, false],
            pending_group_of_command: VecDeque::new(),
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

    pub fn is_on(&self, group: u8) -> bool {
        self.is_on[(group - 1) as usize]
    }

    /// Length of the pending-group queue, spec.md §8 invariant 6: "after
    /// any sequence of N on/off calls that all ACK, the queue is empty."
    pub fn pending_len(&self) -> usize {
        self.pending_group_of_command.len()
    }

    pub fn on(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        group: u8,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        Outlet::set(this, sink, group, true, reason, on_done);
    }

    pub fn off(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        group: u8,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        Outlet::set(this, sink, group, false, reason, on_done);
    }

    fn set(
        this: &Rc<RefCell<Self>>,
        sink: &mut dyn CommandSink,
        group: u8,
        is_on: bool,
        reason: StateReason,
        on_done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) {
        let address = this.borrow().address;
        let cmd1 = cmd_for(is_on);

        this.borrow_mut().pending_group_of_command.push_back(group);

        if group == 1 {
            let this_clone = this.clone();
            let handler = Handler::StandardCmd(StandardCmd::new(address, cmd1, move |success, text, payload| {
                let mut device = this_clone.borrow_mut();
                let popped = device.pending_group_of_command.pop_front();
                debug_assert_eq!(popped, Some(1));
                if success {
                    device.set_state(1, is_on, if is_on { 0xff } else { 0 }, Mode::Normal, reason);
                }
                drop(device);
                on_done(success, text, payload);
            }));

            let frame = Message::OutStandard {
                to: address,
                flags: MessageFlags::direct_standard(),
                cmd1,
                cmd2: Command::Other(0x00),
            }
            .to_frame();
            sink.enqueue(frame, handler, false);
        } else {
            let mut data = [0u8; 14];
            data[0] = OUTLET_DATA1_BOTTOM;
            let _ = OUTLET_DATA1_TOP;

            let this_clone = this.clone();
            let handler = Handler::StandardCmd(StandardCmd::new(address, cmd1, move |success, text, payload| {
                let mut device = this_clone.borrow_mut();
                let popped = device.pending_group_of_command.pop_front();
                debug_assert_eq!(popped, Some(2));
                if success {
                    device.set_state(2, is_on, if is_on { 0xff } else { 0 }, Mode::Normal, reason);
                }
                drop(device);
                on_done(success, text, payload);
            }));

            let frame = Message::OutExtended {
                to: address,
                flags: MessageFlags::direct_extended(),
                cmd1,
                cmd2: Command::Other(0x00),
                data,
            }
            .to_frame();
            sink.enqueue(frame, handler, false);
        }
    }

    /// Issues a status request, spec.md §8 scenario 2: "refresh an outlet
    /// with both outlets on ... inbound reply with cmd2=0x03 ... two
    /// signal_state emissions for groups 1 and 2." `cmd2`'s low two bits
    /// are per-outlet on/off flags, bit 0 = group 1, bit 1 = group 2.
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
                if let HandlerPayload::Cmd2(bits) = payload {
                    for group in 1..=2u8 {
                        let is_on = bits & (1 << (group - 1)) != 0;
                        this_clone
                            .borrow_mut()
                            .set_state(group, is_on, if is_on { 0xff } else { 0 }, Mode::Normal, StateReason::Refresh);
                    }
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

impl Pairable for Outlet {
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
        Outlet::refresh(this, sink, force, move |s, t, p| on_done(s, t, p));
    }
}

impl State for Outlet {
    fn signal_state(&mut self) -> &mut Signal<StateChange> {
        &mut self.signal_state
    }

    fn set_state(&mut self, group: u8, is_on: bool, level: u8, mode: Mode, reason: StateReason) {
        self.is_on[(group - 1) as usize] = is_on;
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

impl Responder for Outlet {
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
    fn ack_correlation_pops_fifo_in_send_order() {
        // spec.md §8 scenario 6: on(group=2) then off(group=1); ACKs
        // arrive in the order sent; the queue pops 2 then 1.
        let address = Address::from_str("11.22.33").unwrap();
        let device = Rc::new(RefCell::new(Outlet::new(address, "outlet")));

        device.borrow_mut().pending_group_of_command.push_back(2);
        device.borrow_mut().pending_group_of_command.push_back(1);

        assert_eq!(device.borrow_mut().pending_group_of_command.pop_front(), Some(2));
        assert_eq!(device.borrow_mut().pending_group_of_command.pop_front(), Some(1));
        assert_eq!(device.borrow().pending_len(), 0);
    }

    #[test]
    fn group_determines_outlet_data1_byte() {
        assert_eq!(OUTLET_DATA1_TOP, 0x01);
        assert_eq!(OUTLET_DATA1_BOTTOM, 0x02);
    }

    #[test]
    fn refresh_decodes_both_outlet_bits_from_cmd2() {
        // spec.md §8 scenario 2: cmd2=0x03 means both outlets are on; one
        // signal_state emission per group.
        use crate::flags::{MessageFlags, MessageType};
        use crate::handler::HandlerEvent;
        use crate::message::Destination;

        struct CapturingSink {
            handler: Option<Handler>,
        }
        impl CommandSink for CapturingSink {
            fn enqueue(&mut self, _frame: crate::frame::Frame, handler: Handler, _high_priority: bool) {
                self.handler = Some(handler);
            }
            fn add_broadcast_listener(&mut self, _listener: crate::handler::Broadcast) {}
            fn remove_broadcast_listener(&mut self, _group: u8) {}
        }

        let address = Address::from_str("11.22.33").unwrap();
        let device = Rc::new(RefCell::new(Outlet::new(address, "outlet")));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        device.borrow_mut().signal_state().connect(move |change: &StateChange| {
            s.borrow_mut().push(*change);
        });

        let mut sink = CapturingSink { handler: None };
        Outlet::refresh(&device, &mut sink, true, |_, _, _| {});

        let mut handler = sink.handler.take().expect("refresh enqueues a handler");
        let ack = Message::InpStandard {
            from: address,
            to: Destination::Address(Address::from([0xaa, 0xbb, 0xcc])),
            flags: MessageFlags::new(MessageType::DirectAck, false, 3),
            cmd1: Command::StatusRequest,
            cmd2: Command::Other(0x03),
        };
        assert_eq!(handler.msg_received(&ack), HandlerEvent::Finished);

        assert_eq!(seen.borrow().len(), 2);
        assert!(device.borrow().is_on(1));
        assert!(device.borrow().is_on(2));
        assert_eq!(seen.borrow()[0].reason, StateReason::Refresh);
    }

    #[test]
    fn group_2_on_finishes_on_direct_ack_of_the_extended_send() {
        // spec.md §8 scenario 6: the bottom outlet's ACK is an ordinary
        // direct-ACK of the extended send, not a second extended reply;
        // the handler must finish there and pop the pending-group queue.
        use crate::flags::{MessageFlags, MessageType};
        use crate::handler::HandlerEvent;
        use crate::message::Destination;

        struct CapturingSink {
            handler: Option<Handler>,
        }
        impl CommandSink for CapturingSink {
            fn enqueue(&mut self, _frame: crate::frame::Frame, handler: Handler, _high_priority: bool) {
                self.handler = Some(handler);
            }
            fn add_broadcast_listener(&mut self, _listener: crate::handler::Broadcast) {}
            fn remove_broadcast_listener(&mut self, _group: u8) {}
        }

        let address = Address::from_str("11.22.33").unwrap();
        let device = Rc::new(RefCell::new(Outlet::new(address, "outlet")));

        let mut sink = CapturingSink { handler: None };
        let done_success = Rc::new(RefCell::new(None));
        let d = done_success.clone();
        Outlet::on(&device, &mut sink, 2, StateReason::Command, move |success, _, _| {
            *d.borrow_mut() = Some(success);
        });

        let mut handler = sink.handler.take().expect("on(group=2) enqueues a handler");
        let ack = Message::InpExtended {
            from: address,
            to: Destination::Address(Address::from([0xaa, 0xbb, 0xcc])),
            flags: MessageFlags::new(MessageType::DirectAck, true, 3),
            cmd1: Command::On,
            cmd2: Command::Other(0x00),
            data: [0u8; 14],
        };
        assert_eq!(handler.msg_received(&ack), HandlerEvent::Finished);
        handler.finish(true, "ok", HandlerPayload::None);

        assert_eq!(*done_success.borrow(), Some(true));
        assert!(device.borrow().is_on(2));
        assert_eq!(device.borrow().pending_len(), 0);
    }
}
