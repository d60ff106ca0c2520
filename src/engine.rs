//! The protocol engine: the heart of the system, spec.md §4.3. Mediates
//! between [crate::link::PlmLink] and everything above it — maintains the
//! single in-flight handler slot, the outbound priority queue, the
//! broadcast-suppression cache, and the timeout pump.
//!
//! Generalizes `plm::modem::Modem::{send_frame, send_message_with_timeout}`
//! (teacher): the teacher issues one blocking call with N retries per
//! invocation; here the same retry-with-timeout policy is lifted into a
//! persistent queue a single event loop drives indefinitely.

use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::address::Address;
use crate::constants::DEFAULT_BROADCAST_SUPPRESSION_WINDOW;
use crate::error::Error;
use crate::frame::{AllLinkRecord, Frame};
use crate::handler::{Broadcast, Handler, HandlerEvent, HandlerPayload, TimeoutAction};
use crate::link::PlmLink;
use crate::message::Message;

use tokio::io::{AsyncRead, AsyncWrite};

/// A transport-erased handle to a [ProtocolEngine], so device objects
/// (spec.md §2 component 6) can enqueue work without being generic over the
/// link's underlying transport, per spec.md §9 ("Cyclic references between
/// Device, Modem, and Protocol": "pass non-owning handles to Devices").
pub trait CommandSink {
    fn enqueue(&mut self, frame: Frame, handler: Handler, high_priority: bool);
    fn add_broadcast_listener(&mut self, listener: Broadcast);
    fn remove_broadcast_listener(&mut self, group: u8);
}

impl<T> CommandSink for ProtocolEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn enqueue(&mut self, frame: Frame, handler: Handler, high_priority: bool) {
        self.send(frame, handler, high_priority);
    }

    fn add_broadcast_listener(&mut self, listener: Broadcast) {
        self.add_handler(listener);
    }

    fn remove_broadcast_listener(&mut self, group: u8) {
        self.remove_handler(group);
    }
}

/// A queued outbound frame plus the handler that will consume its reply,
/// spec.md §3 ("Outbound Entry").
struct OutboundEntry {
    frame: Frame,
    handler: Handler,
}

struct ActiveHandler {
    frame: Frame,
    handler: Handler,
    deadline: Instant,
}

/// Mediates between the link and the rest of the system. Holds no
/// `Arc`/`Mutex`; one owner drives `pump`/`on_frame` directly, per spec.md
/// §5.
pub struct ProtocolEngine<T> {
    link: PlmLink<T>,
    high_priority: VecDeque<OutboundEntry>,
    normal_priority: VecDeque<OutboundEntry>,
    active: Option<ActiveHandler>,
    broadcast_listeners: Vec<Broadcast>,
    recent_broadcasts: HashMap<(Address, u8, u8), Instant>,
    suppression_window: Duration,
}

impl<T> ProtocolEngine<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(link: PlmLink<T>) -> Self {
        Self::with_suppression_window(link, DEFAULT_BROADCAST_SUPPRESSION_WINDOW)
    }

    pub fn with_suppression_window(link: PlmLink<T>, suppression_window: Duration) -> Self {
        ProtocolEngine {
            link,
            high_priority: VecDeque::new(),
            normal_priority: VecDeque::new(),
            active: None,
            broadcast_listeners: Vec::new(),
            recent_broadcasts: HashMap::new(),
            suppression_window,
        }
    }

    /// Enqueues `frame` with `handler` to consume its reply. High-priority
    /// entries jump ahead of normal ones but preserve relative order among
    /// themselves, spec.md §3.
    pub fn send(&mut self, frame: Frame, handler: Handler, high_priority: bool) {
        let entry = OutboundEntry { frame, handler };
        if high_priority {
            self.high_priority.push_back(entry);
        } else {
            self.normal_priority.push_back(entry);
        }
    }

    /// Registers a listener that stays in the broadcast registry across
    /// multiple replies, spec.md §4.3 ("Broadcast listener registry").
    pub fn add_handler(&mut self, listener: Broadcast) {
        self.broadcast_listeners.push(listener);
    }

    pub fn remove_handler(&mut self, group: u8) {
        self.broadcast_listeners.retain(|l| l.group != group);
    }

    /// Drives one iteration: if idle and the queue is non-empty, installs
    /// the next entry as active; writes its bytes. Call this after `send`
    /// and after each `on_frame`/`pump_timeouts`.
    pub async fn pump(&mut self) -> Result<(), Error> {
        if self.active.is_some() {
            return Ok(());
        }

        let entry = self.high_priority.pop_front().or_else(|| self.normal_priority.pop_front());

        if let Some(OutboundEntry { frame, handler }) = entry {
            let deadline = Instant::now() + handler.timeout();
            self.link.write(frame.clone()).await?;
            self.active = Some(ActiveHandler { frame, handler, deadline });
        }

        Ok(())
    }

    /// Checks the active handler's deadline and fires `on_timeout` if it
    /// has passed, per spec.md §4.3 state table.
    pub async fn pump_timeouts(&mut self) -> Result<(), Error> {
        let expired = matches!(&self.active, Some(active) if Instant::now() >= active.deadline);

        if !expired {
            return Ok(());
        }

        let mut active = self.active.take().unwrap();
        match active.handler.on_timeout() {
            TimeoutAction::Retry => {
                warn!("handler timed out, retrying");
                self.link.write(active.frame.clone()).await?;
                active.deadline = Instant::now() + active.handler.timeout();
                self.active = Some(active);
            }
            TimeoutAction::Fail => {
                warn!("handler timed out, retries exhausted");
                active.handler.finish(false, "timeout", HandlerPayload::None);
            }
        }

        Ok(())
    }

    /// Reads the next inbound frame from the link and dispatches it,
    /// returning `false` once the link has closed.
    pub async fn on_frame(&mut self) -> Result<bool, Error> {
        match self.link.poll().await {
            Some(Ok(frame)) => {
                self.dispatch(frame).await?;
                Ok(true)
            }
            Some(Err(Error::NoAck)) => {
                self.handle_nak().await?;
                Ok(true)
            }
            Some(Err(e)) => {
                self.fail_all("link closed");
                Err(e)
            }
            None => {
                self.fail_all("link closed");
                Ok(false)
            }
        }
    }

    /// Dispatches one inbound frame. `AllLinkRecord`/`WriteAllLinkRecord`
    /// replies never convert to a [Message] (they're modem-command
    /// replies, not INSTEON traffic), so the engine feeds them to
    /// `DeviceDbGet`/`DeviceDbModify` directly, per those handlers' own
    /// doc comments in `handler.rs`. Everything else goes through the
    /// usual `msg_received` path.
    async fn dispatch(&mut self, frame: Frame) -> Result<(), Error> {
        match frame {
            Frame::AllLinkRecord(record) => {
                self.feed_db_get(Some(record)).await?;
                return Ok(());
            }
            Frame::WriteAllLinkRecord { .. } if self.active_is_db_modify() => {
                self.finish_db_modify(true);
                return Ok(());
            }
            _ => {}
        }

        let msg = match Message::try_from(frame.clone()) {
            Ok(msg) => msg,
            Err(_) => {
                trace!("ignoring non-Message frame in dispatch: {:02x?}", frame);
                return Ok(());
            }
        };

        if let Some(active) = self.active.as_mut() {
            match active.handler.msg_received(&msg) {
                HandlerEvent::Finished => {
                    let mut active = self.active.take().unwrap();
                    active.handler.finish(true, "ok", HandlerPayload::None);
                    return Ok(());
                }
                HandlerEvent::Continue => return Ok(()),
                HandlerEvent::Unknown => {}
            }
        }

        self.dispatch_broadcast(&msg);
        Ok(())
    }

    fn active_is_db_modify(&self) -> bool {
        matches!(&self.active, Some(active) if matches!(active.handler, Handler::DeviceDbModify(_)))
    }

    fn active_is_db_get(&self) -> bool {
        matches!(&self.active, Some(active) if matches!(active.handler, Handler::DeviceDbGet(_)))
    }

    /// `DeviceDbModify::ack_received` invokes its terminal callback itself;
    /// the engine only needs to free the active slot once it has.
    fn finish_db_modify(&mut self, acked: bool) {
        if let Some(active) = self.active.as_mut() {
            if let Handler::DeviceDbModify(h) = &mut active.handler {
                h.ack_received(acked);
            }
        }
        self.active.take();
    }

    /// Feeds one record (or `None` for a NAK/empty reply) to the active
    /// `DeviceDbGet`, requesting the next record if it isn't done yet.
    /// Like `ack_received`, `record_received` invokes its own terminal
    /// callback on `Finished`.
    async fn feed_db_get(&mut self, record: Option<AllLinkRecord>) -> Result<(), Error> {
        let event = match self.active.as_mut() {
            Some(active) => match &mut active.handler {
                Handler::DeviceDbGet(h) => h.record_received(record),
                _ => return Ok(()),
            },
            None => return Ok(()),
        };

        match event {
            HandlerEvent::Finished => {
                self.active.take();
            }
            HandlerEvent::Continue => self.request_next_record().await?,
            HandlerEvent::Unknown => {}
        }

        Ok(())
    }

    /// Writes `GetNextAllLinkRecord` to continue an in-progress
    /// `DeviceDbGet` walk, keeping the same handler active.
    async fn request_next_record(&mut self) -> Result<(), Error> {
        let timeout = match &self.active {
            Some(active) => active.handler.timeout(),
            None => return Ok(()),
        };

        let frame = Frame::GetNextAllLinkRecord;
        self.link.write(frame.clone()).await?;

        if let Some(active) = self.active.as_mut() {
            active.frame = frame;
            active.deadline = Instant::now() + timeout;
        }

        Ok(())
    }

    /// A NAK on the active handler's outbound frame normally fails it
    /// immediately rather than waiting out the deadline — except for
    /// `DeviceDbGet`, where a NAK'd `GetFirstAllLinkRecord`/
    /// `GetNextAllLinkRecord` just means "no record here," handled the
    /// same way as an empty reply.
    async fn handle_nak(&mut self) -> Result<(), Error> {
        if self.active_is_db_get() {
            return self.feed_db_get(None).await;
        }

        if let Some(mut active) = self.active.take() {
            active.handler.finish(false, "nak", HandlerPayload::None);
        }

        Ok(())
    }

    fn dispatch_broadcast(&mut self, msg: &Message) {
        let key = match msg.broadcast_key() {
            Some(key) => key,
            None => {
                debug!("unhandled inbound message: {:02x?}", msg);
                return;
            }
        };

        let now = Instant::now();
        if let Some(seen_at) = self.recent_broadcasts.get(&key) {
            if now.duration_since(*seen_at) < self.suppression_window {
                trace!("suppressing duplicate broadcast {:?}", key);
                return;
            }
        }
        self.recent_broadcasts.insert(key, now);
        self.recent_broadcasts.retain(|_, seen_at| now.duration_since(*seen_at) < self.suppression_window);

        let group = key.1;
        for listener in self.broadcast_listeners.iter_mut().filter(|l| l.group == group) {
            listener.invoke(msg);
        }
    }

    /// Fails every queued and active handler, used on link closure, spec.md
    /// §5 ("on shutdown every queued and active handler's `on_done` is
    /// invoked exactly once").
    fn fail_all(&mut self, text: &str) {
        if let Some(mut active) = self.active.take() {
            active.handler.finish(false, text, HandlerPayload::None);
        }
        for mut entry in self.high_priority.drain(..) {
            entry.handler.finish(false, text, HandlerPayload::None);
        }
        for mut entry in self.normal_priority.drain(..) {
            entry.handler.finish(false, text, HandlerPayload::None);
        }
    }

    /// Cancels the active handler, if any, per spec.md §5 ("may be canceled
    /// by calling `on_done(false, "canceled", none)` and clearing the
    /// slot").
    pub fn cancel_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.handler.finish(false, "canceled", HandlerPayload::None);
        }
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.high_priority.len() + self.normal_priority.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::flags::{MessageFlags, MessageType};
    use crate::handler::StandardCmd;
    use crate::message::Command;
    use std::io;
    use std::pin::Pin;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    struct MemPipe {
        inbound: std::collections::VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl AsyncRead for MemPipe {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
            let n = std::cmp::min(buf.len(), self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Poll::Ready(Ok(n))
        }
    }

    impl AsyncWrite for MemPipe {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.outbound.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn standard_send_frame(to: Address) -> Frame {
        Frame::StandardInsteonSend {
            to,
            flags: u8::from(MessageFlags::new(MessageType::Direct, false, 3)),
            cmd1: Command::On.into(),
            cmd2: 0x80,
        }
    }

    fn direct_ack_bytes(from: Address) -> Vec<u8> {
        let mut bytes = bytes::BytesMut::new();
        let frame = Frame::StandardInsteonReceive {
            from,
            to_raw: [0xaa, 0xbb, 0xcc],
            flags: u8::from(MessageFlags::new(MessageType::DirectAck, false, 3)),
            cmd1: Command::On.into(),
            cmd2: 0x80,
        };
        frame.to_bytes(&mut bytes);
        bytes.to_vec()
    }

    #[tokio::test]
    async fn pump_installs_queued_entry_and_writes_it() {
        let pipe = MemPipe {
            inbound: std::collections::VecDeque::new(),
            outbound: Vec::new(),
        };
        let link = PlmLink::new(pipe);
        let mut engine = ProtocolEngine::new(link);

        let target = Address::from_str("11.22.33").unwrap();
        let handler = Handler::StandardCmd(StandardCmd::new(target, Command::On, |_, _, _| {}));
        engine.send(standard_send_frame(target), handler, false);

        assert!(!engine.has_active());
        engine.pump().await.unwrap();
        assert!(engine.has_active());
        assert_eq!(engine.queue_len(), 0);
    }

    #[tokio::test]
    async fn matching_ack_finishes_handler_and_clears_slot() {
        let target = Address::from_str("11.22.33").unwrap();
        let mut inbound = std::collections::VecDeque::new();
        inbound.extend(direct_ack_bytes(target));

        let pipe = MemPipe {
            inbound,
            outbound: Vec::new(),
        };
        let link = PlmLink::new(pipe);
        let mut engine = ProtocolEngine::new(link);

        let result = Arc::new(Mutex::new(None));
        let r = result.clone();
        let handler = Handler::StandardCmd(StandardCmd::new(target, Command::On, move |s, _, _| {
            *r.lock().unwrap() = Some(s);
        }));
        engine.send(standard_send_frame(target), handler, false);
        engine.pump().await.unwrap();
        assert!(engine.has_active());

        engine.on_frame().await.unwrap();
        assert!(!engine.has_active());
        assert_eq!(*result.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn device_db_get_walks_records_until_two_empty_replies() {
        use crate::flags::AllLinkFlags;
        use crate::handler::DeviceDbGet;

        let to = Address::from_str("11.22.33").unwrap();

        let mut inbound = std::collections::VecDeque::new();
        // GetFirstAllLinkRecord's own ACK carries no record; only the
        // unsolicited AllLinkRecord frame and the two terminating NAKs
        // carry information the handler reacts to. `AllLinkRecord` is a
        // host-incoming-only frame (`to_bytes` doesn't serialize it), so
        // its wire bytes are built by hand, matching `from_bytes`'s parse
        // arm: tag, flags, group, to(3), data(3), no trailing ack byte.
        inbound.extend(vec![
            crate::constants::START,
            crate::constants::ALL_LINK_RECORD,
            AllLinkFlags::IN_USE.bits(),
            4,
        ]);
        inbound.extend(to.bytes());
        inbound.extend(vec![0, 0, 0]);
        inbound.extend(vec![
            crate::constants::START,
            crate::constants::GET_NEXT_ALL_LINK_RECORD,
            crate::constants::NAK,
        ]);
        inbound.extend(vec![
            crate::constants::START,
            crate::constants::GET_NEXT_ALL_LINK_RECORD,
            crate::constants::NAK,
        ]);

        let pipe = MemPipe {
            inbound,
            outbound: Vec::new(),
        };
        let link = PlmLink::new(pipe);
        let mut engine = ProtocolEngine::new(link);

        let result = Arc::new(Mutex::new(None));
        let r = result.clone();
        let handler = Handler::DeviceDbGet(DeviceDbGet::new(move |s, t, p| {
            *r.lock().unwrap() = Some((s, t, p));
        }));
        engine.send(Frame::GetFirstAllLinkRecord, handler, false);
        engine.pump().await.unwrap();
        assert!(engine.has_active());

        engine.on_frame().await.unwrap();
        assert!(engine.has_active(), "one in-use record keeps the walk going");

        engine.on_frame().await.unwrap();
        assert!(engine.has_active(), "first empty reply is not enough to finish");

        engine.on_frame().await.unwrap();
        assert!(!engine.has_active(), "second empty reply finishes the walk");

        let (success, _text, payload) = result.lock().unwrap().clone().unwrap();
        assert!(success);
        match payload {
            HandlerPayload::Records(records) => assert_eq!(records.len(), 1),
            other => panic!("expected Records payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn device_db_modify_finishes_on_write_ack() {
        use crate::flags::AllLinkFlags;
        use crate::handler::DeviceDbModify;

        let to = Address::from_str("11.22.33").unwrap();
        let ack_frame = Frame::WriteAllLinkRecord {
            flags: AllLinkFlags::IN_USE,
            group: 1,
            to,
            data: [0, 0, 0],
        };
        let mut bytes = bytes::BytesMut::new();
        ack_frame.to_bytes(&mut bytes);
        // `to_bytes` serializes the host->modem request; the modem's echo
        // back appends the trailing ACK byte `from_bytes` expects.
        let mut wire = bytes.to_vec();
        wire.push(crate::constants::ACK);

        let pipe = MemPipe {
            inbound: wire.into(),
            outbound: Vec::new(),
        };
        let link = PlmLink::new(pipe);
        let mut engine = ProtocolEngine::new(link);

        let result = Arc::new(Mutex::new(None));
        let r = result.clone();
        let handler = Handler::DeviceDbModify(DeviceDbModify::new(move |s, t, _| {
            *r.lock().unwrap() = Some((s, t));
        }));
        engine.send(ack_frame.clone(), handler, false);
        engine.pump().await.unwrap();

        engine.on_frame().await.unwrap();
        assert!(!engine.has_active());
        let (success, text) = result.lock().unwrap().clone().unwrap();
        assert!(success);
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn broadcast_suppression_invokes_listener_once() {
        let pipe = MemPipe {
            inbound: std::collections::VecDeque::new(),
            outbound: Vec::new(),
        };
        let link = PlmLink::new(pipe);
        let mut engine = ProtocolEngine::new(link);

        let from = Address::from_str("11.22.33").unwrap();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        engine.add_handler(Broadcast::new(1, move |_msg| {
            *c.lock().unwrap() += 1;
        }));

        let frame = Frame::StandardInsteonReceive {
            from,
            to_raw: [0x01, 0x10, 0x01],
            flags: u8::from(MessageFlags::new(MessageType::AllLinkBroadcast, false, 3)),
            cmd1: 0x11,
            cmd2: 0x00,
        };
        let msg = Message::try_from(frame.clone()).unwrap();

        engine.dispatch_broadcast(&msg);
        engine.dispatch_broadcast(&msg);

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
