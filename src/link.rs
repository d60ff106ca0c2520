//! The PLM link layer: owns the byte transport to the modem, assembles
//! inbound frames from the byte stream, and paces outbound writes,
//! spec.md §4.2.
//!
//! Grounded on `plm::broker::{Broker, event_loop}` (teacher), restructured
//! from a backgrounded-thread actor into a cooperative object the owning
//! event loop drives directly (spec.md §5: "single-threaded cooperative",
//! "no shared state requires locking").

use std::io;
use std::path::Path;

use futures::stream::StreamExt;
use log::debug;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, Serial, SerialPortSettings, StopBits};
use tokio_util::codec::Framed;

use crate::error::*;
use crate::frame::*;
use crate::signal::Signal;

/// The baud rate and framing every known PLM uses, spec.md §4.2.
const BAUD_RATE: u32 = 19200;

fn plm_serial_settings() -> SerialPortSettings {
    SerialPortSettings {
        baud_rate: BAUD_RATE,
        data_bits: DataBits::Eight,
        flow_control: FlowControl::None,
        parity: Parity::None,
        stop_bits: StopBits::One,
        timeout: std::time::Duration::from_millis(100),
    }
}

/// Owns the duplex byte transport to the PLM. `T` is any async
/// read/write handle — a serial port or a TCP stream, per spec.md §4.2.
pub struct PlmLink<T> {
    framed: Framed<T, FrameCodec>,
    connected: bool,
    /// Fires once, the first time a frame is successfully read or
    /// written after construction.
    pub on_connected: Signal<()>,
    /// Fires when the transport is closed or a read/write fails.
    pub on_disconnected: Signal<Error>,
}

impl<T> PlmLink<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(handle: T) -> Self {
        PlmLink {
            framed: Framed::new(handle, FrameCodec()),
            connected: false,
            on_connected: Signal::new(),
            on_disconnected: Signal::new(),
        }
    }

    fn mark_connected(&mut self) {
        if !self.connected {
            self.connected = true;
            self.on_connected.emit(());
        }
    }

    fn mark_disconnected(&mut self, err: Error) {
        self.connected = false;
        self.on_disconnected.emit(err);
    }

    /// Non-blocking read: waits for the next decoded [Frame], or `None`
    /// once the transport has closed. Distinct framing errors (an
    /// unrecognized type byte) are already resynced by [FrameCodec]; what
    /// reaches here is either a successfully decoded frame, a NAK'd
    /// command, or a genuine transport failure.
    pub async fn poll(&mut self) -> Option<Result<Frame, Error>> {
        match self.framed.next().await {
            Some(Ok(frame)) => {
                debug!("Received Frame: {:02x?}", frame);
                self.mark_connected();
                Some(Ok(frame))
            }
            Some(Err(Error::NoAck)) => Some(Err(Error::NoAck)),
            Some(Err(e)) => {
                self.mark_disconnected(e.clone());
                Some(Err(e))
            }
            None => {
                self.mark_disconnected(Error::Disconnected);
                None
            }
        }
    }

    /// Writes a single frame. Insteon frames are written one at a time;
    /// callers (the protocol engine) must not interleave writes, spec.md
    /// §4.2.
    pub async fn write(&mut self, frame: Frame) -> Result<(), Error> {
        use futures::sink::SinkExt;
        debug!("Sending Frame: {:02x?}", frame);
        match self.framed.send(frame).await {
            Ok(()) => {
                self.mark_connected();
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected(e.clone());
                Err(e)
            }
        }
    }
}

impl PlmLink<Serial> {
    /// Opens a serial PLM at `path`, e.g. `/dev/ttyUSB0`.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        debug!("Opening PLM link at {}", path.as_ref().display());
        let port = Serial::from_path(path.as_ref(), &plm_serial_settings())?;
        Ok(PlmLink::new(port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// An in-memory duplex stream used to exercise `PlmLink` without a
    /// real serial port.
    struct MemPipe {
        inbound: std::collections::VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl AsyncRead for MemPipe {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            let n = std::cmp::min(buf.len(), self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Poll::Ready(Ok(n))
        }
    }

    impl AsyncWrite for MemPipe {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
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

    #[tokio::test]
    async fn reads_a_frame_and_fires_connected() {
        let mut inbound = std::collections::VecDeque::new();
        inbound.extend(&[crate::constants::START, crate::constants::CANCEL_ALL_LINK, crate::constants::ACK]);

        let pipe = MemPipe {
            inbound,
            outbound: Vec::new(),
        };

        let mut link = PlmLink::new(pipe);

        let connected = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let c = connected.clone();
        link.on_connected.connect(move |_| c.store(true, std::sync::atomic::Ordering::SeqCst));

        let frame = link.poll().await;
        assert_eq!(frame, Some(Ok(Frame::CancelAllLink)));
        assert!(connected.load(std::sync::atomic::Ordering::SeqCst));
    }
}
