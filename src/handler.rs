//! Message handlers: pluggable per-request objects that consume inbound
//! [Message]s and decide whether a request is satisfied, spec.md §4.4.
//!
//! Modeled as a closed tagged enum rather than `Box<dyn Handler>` (spec.md
//! §9, "Dynamic dispatch of handlers": "the set of handler variants is
//! small and closed, prefer a tagged variant for predictability").

use std::time::Duration;

use log::{trace, warn};

use crate::address::Address;
use crate::constants::*;
use crate::frame::AllLinkRecord;
use crate::message::{Command, Message};

/// Result of feeding an inbound message to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerEvent {
    Unknown,
    Continue,
    Finished,
}

/// Result of a handler's timeout callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    Retry,
    Fail,
}

/// The payload passed to a handler's terminal callback, spec.md §4.4/§8
/// scenario 3 ("battery at raw 185").
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerPayload {
    None,
    Cmd2(u8),
    Byte(u8),
    Records(Vec<AllLinkRecord>),
}

/// `done` callbacks are invoked exactly once per handler, spec.md §8
/// invariant 1. `HandlerCore` carries that guard plus the shared
/// retry/timeout bookkeeping every handler variant needs.
struct HandlerCore {
    retries_remaining: u8,
    timeout: Duration,
    done: Option<Box<dyn FnOnce(bool, String, HandlerPayload)>>,
}

impl HandlerCore {
    fn new(timeout: Duration, retries: u8, done: impl FnOnce(bool, String, HandlerPayload) + 'static) -> Self {
        HandlerCore {
            retries_remaining: retries,
            timeout,
            done: Some(Box::new(done)),
        }
    }

    /// Invokes the terminal callback, if it has not already fired.
    fn finish(&mut self, success: bool, text: impl Into<String>, payload: HandlerPayload) {
        match self.done.take() {
            Some(done) => done(success, text.into(), payload),
            None => warn!("handler on_done invoked more than once; ignoring"),
        }
    }

    fn on_timeout(&mut self) -> TimeoutAction {
        if self.retries_remaining > 0 {
            self.retries_remaining -= 1;
            TimeoutAction::Retry
        } else {
            TimeoutAction::Fail
        }
    }
}

/// Matches a single direct-ACK or direct-NAK from `target` with matching
/// `cmd1`, spec.md §4.4.
pub struct StandardCmd {
    core: HandlerCore,
    target: Address,
    cmd1: Command,
}

impl StandardCmd {
    pub fn new(
        target: Address,
        cmd1: Command,
        done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) -> Self {
        StandardCmd {
            core: HandlerCore::new(DEFAULT_STANDARD_TIMEOUT, DEFAULT_RETRIES, done),
            target,
            cmd1,
        }
    }

    fn msg_received(&mut self, msg: &Message) -> HandlerEvent {
        if msg.is_direct_reply_to(self.target, self.cmd1) {
            HandlerEvent::Finished
        } else {
            HandlerEvent::Unknown
        }
    }
}

/// First matches the direct-ACK of the outbound extended command, then
/// waits for the subsequent `InpExtended` whose `cmd1` equals the response
/// code, spec.md §4.4.
pub struct ExtendedCmdResponse {
    core: HandlerCore,
    target: Address,
    cmd1: Command,
    response_cmd1: Command,
    acked: bool,
}

impl ExtendedCmdResponse {
    pub fn new(
        target: Address,
        cmd1: Command,
        response_cmd1: Command,
        done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) -> Self {
        ExtendedCmdResponse {
            core: HandlerCore::new(DEFAULT_EXTENDED_TIMEOUT, DEFAULT_RETRIES, done),
            target,
            cmd1,
            response_cmd1,
            acked: false,
        }
    }

    fn msg_received(&mut self, msg: &Message) -> HandlerEvent {
        if !self.acked {
            if msg.is_direct_reply_to(self.target, self.cmd1) {
                self.acked = true;
                HandlerEvent::Continue
            } else {
                HandlerEvent::Unknown
            }
        } else {
            match msg {
                Message::InpExtended { from, cmd1, data, .. }
                    if *from == self.target && *cmd1 == self.response_cmd1 =>
                {
                    self.core.finish(true, "ok", HandlerPayload::Byte(data[10]));
                    HandlerEvent::Finished
                }
                _ => HandlerEvent::Unknown,
            }
        }
    }
}

/// Issues `0x19 0x01` (status request); on ACK captures `cmd2` (state) and
/// compares the hop-stripped flags' delta-carrying byte against the local
/// database delta, spec.md §4.4.
pub struct DeviceRefresh {
    core: HandlerCore,
    target: Address,
    local_delta: u8,
}

/// Outcome of a [DeviceRefresh], reported through its terminal callback as
/// `HandlerPayload::Cmd2(state)`, with `stale` conveyed via the success
/// text ("stale"/"current") since the payload type is shared across
/// handler variants.
impl DeviceRefresh {
    pub fn new(
        target: Address,
        local_delta: u8,
        done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) -> Self {
        DeviceRefresh {
            core: HandlerCore::new(DEFAULT_STANDARD_TIMEOUT, DEFAULT_RETRIES, done),
            target,
            local_delta,
        }
    }

    fn msg_received(&mut self, msg: &Message) -> HandlerEvent {
        match msg {
            Message::InpStandard {
                from, flags, cmd2, ..
            } if *from == self.target && flags.message_type.is_ack() => {
                let device_delta = flags.hops_left;
                let text = if device_delta == self.local_delta { "current" } else { "stale" };
                self.core.finish(true, text, HandlerPayload::Cmd2(u8::from(*cmd2)));
                HandlerEvent::Finished
            }
            Message::InpStandard { from, flags, .. } if *from == self.target && flags.message_type.is_nak() => {
                self.core.finish(false, "nak", HandlerPayload::None);
                HandlerEvent::Finished
            }
            _ => HandlerEvent::Unknown,
        }
    }
}

/// Iteratively walks the modem's reported all-link records for `target`'s
/// own database (requested via repeated `GetNextAllLinkRecord`), spec.md
/// §4.4: "terminates on a response whose record has `in_use=false` ... or
/// after N empty records."
pub struct DeviceDbGet {
    core: HandlerCore,
    records: Vec<AllLinkRecord>,
    empty_seen: u8,
}

impl DeviceDbGet {
    pub fn new(done: impl FnOnce(bool, String, HandlerPayload) + 'static) -> Self {
        DeviceDbGet {
            core: HandlerCore::new(DEFAULT_EXTENDED_TIMEOUT, DEFAULT_RETRIES, done),
            records: Vec::new(),
            empty_seen: 0,
        }
    }

    /// Called by the engine with each decoded `AllLinkRecord` frame as it
    /// arrives (these are modem-command replies, not `Message`s, so this
    /// handler is driven directly rather than through `msg_received`).
    pub fn record_received(&mut self, record: Option<AllLinkRecord>) -> HandlerEvent {
        match record {
            Some(record) if record.flags.contains(crate::flags::AllLinkFlags::IN_USE) => {
                self.empty_seen = 0;
                self.records.push(record);
                HandlerEvent::Continue
            }
            Some(_) | None => {
                self.empty_seen += 1;
                if self.empty_seen >= DB_GET_MAX_EMPTY_RECORDS {
                    let records = std::mem::take(&mut self.records);
                    self.core.finish(true, "ok", HandlerPayload::Records(records));
                    HandlerEvent::Finished
                } else {
                    HandlerEvent::Continue
                }
            }
        }
    }

    fn msg_received(&mut self, _msg: &Message) -> HandlerEvent {
        HandlerEvent::Unknown
    }
}

/// Writes (or deletes) a single database record, spec.md §4.6: "on ACK,
/// update the in-memory list; on failure, do not mutate in-memory state."
///
/// Two write paths share this handler: a modem-side write
/// (`ModemCommand::WriteAllLinkRecord`) completes when the engine sees the
/// modem echo the record back (driven directly via [DeviceDbModify::ack_received],
/// since that echo is a modem-command reply, never a [Message]); a
/// device-side write (an extended send to the device's own address)
/// completes on the device's ordinary direct-ACK/NAK of that send, matched
/// here through `msg_received` like any other direct command.
pub struct DeviceDbModify {
    core: HandlerCore,
    device_write: Option<(Address, Command)>,
}

impl DeviceDbModify {
    /// For a modem-side write: finished only via [DeviceDbModify::ack_received].
    pub fn new(done: impl FnOnce(bool, String, HandlerPayload) + 'static) -> Self {
        DeviceDbModify {
            core: HandlerCore::new(DEFAULT_EXTENDED_TIMEOUT, DEFAULT_RETRIES, done),
            device_write: None,
        }
    }

    /// For a device-side write: `target`/`cmd1` identify the extended send
    /// whose direct-ACK/NAK finishes this handler, spec.md §4.6.
    pub fn new_for_device_write(
        target: Address,
        cmd1: Command,
        done: impl FnOnce(bool, String, HandlerPayload) + 'static,
    ) -> Self {
        DeviceDbModify {
            core: HandlerCore::new(DEFAULT_EXTENDED_TIMEOUT, DEFAULT_RETRIES, done),
            device_write: Some((target, cmd1)),
        }
    }

    /// Called directly by the engine once the `WriteAllLinkRecord`
    /// modem-command ACK/NAK is known.
    pub fn ack_received(&mut self, acked: bool) -> HandlerEvent {
        self.core.finish(acked, if acked { "ok" } else { "nak" }, HandlerPayload::None);
        HandlerEvent::Finished
    }

    fn msg_received(&mut self, msg: &Message) -> HandlerEvent {
        match self.device_write {
            Some((target, cmd1)) if msg.is_direct_reply_to(target, cmd1) => {
                let acked = !msg.is_nak();
                self.core.finish(acked, if acked { "ok" } else { "nak" }, HandlerPayload::None);
                HandlerEvent::Finished
            }
            _ => HandlerEvent::Unknown,
        }
    }
}

/// A stateless listener registered against a broadcast group, spec.md
/// §4.3/§4.4: "lives in the listener registry, not the active slot."
/// Unlike the other variants it is never installed as the engine's active
/// handler, so `msg_received`/`on_timeout` are unreachable and only exist
/// to satisfy the shared `Handler` surface.
pub struct Broadcast {
    pub group: u8,
    callback: Box<dyn FnMut(&Message)>,
}

impl Broadcast {
    pub fn new(group: u8, callback: impl FnMut(&Message) + 'static) -> Self {
        Broadcast {
            group,
            callback: Box::new(callback),
        }
    }

    pub fn invoke(&mut self, msg: &Message) {
        (self.callback)(msg);
    }
}

/// The closed set of handler variants the protocol engine can install as
/// its single active handler, spec.md §4.3/§4.4.
pub enum Handler {
    StandardCmd(StandardCmd),
    ExtendedCmdResponse(ExtendedCmdResponse),
    DeviceRefresh(DeviceRefresh),
    DeviceDbGet(DeviceDbGet),
    DeviceDbModify(DeviceDbModify),
}

impl Handler {
    pub fn msg_received(&mut self, msg: &Message) -> HandlerEvent {
        trace!("dispatching message to handler: {:02x?}", msg);
        match self {
            Handler::StandardCmd(h) => h.msg_received(msg),
            Handler::ExtendedCmdResponse(h) => h.msg_received(msg),
            Handler::DeviceRefresh(h) => h.msg_received(msg),
            Handler::DeviceDbGet(h) => h.msg_received(msg),
            Handler::DeviceDbModify(h) => h.msg_received(msg),
        }
    }

    pub fn on_timeout(&mut self) -> TimeoutAction {
        self.core_mut().on_timeout()
    }

    pub fn timeout(&self) -> Duration {
        self.core().timeout
    }

    /// Invokes the terminal callback exactly once, used by the engine when
    /// a handler is FINISHED, NAK'd, canceled, or retries are exhausted.
    pub fn finish(&mut self, success: bool, text: impl Into<String>, payload: HandlerPayload) {
        self.core_mut().finish(success, text, payload);
    }

    fn core(&self) -> &HandlerCore {
        match self {
            Handler::StandardCmd(h) => &h.core,
            Handler::ExtendedCmdResponse(h) => &h.core,
            Handler::DeviceRefresh(h) => &h.core,
            Handler::DeviceDbGet(h) => &h.core,
            Handler::DeviceDbModify(h) => &h.core,
        }
    }

    fn core_mut(&mut self) -> &mut HandlerCore {
        match self {
            Handler::StandardCmd(h) => &mut h.core,
            Handler::ExtendedCmdResponse(h) => &mut h.core,
            Handler::DeviceRefresh(h) => &mut h.core,
            Handler::DeviceDbGet(h) => &mut h.core,
            Handler::DeviceDbModify(h) => &mut h.core,
        }
    }
}
