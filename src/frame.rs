//! Wire-level PLM frames: the byte-for-byte commands and responses
//! exchanged with the PowerLinc Modem, spec.md §3/§4.1.

use bytes::{Buf, BufMut, BytesMut};

use nom::{self, alt, cond, do_parse, named, number::streaming::be_u8, one_of, tag, take};
use tokio_util::codec::{Decoder, Encoder};

use crate::address::Address;
use crate::constants::*;
use crate::error::*;
use crate::flags::{AllLinkFlags, AllLinkMode, ModemInfo};

/// This represents a single link record in the modem's own all-link
/// database (distinct from a device's all-link database, spec.md §4.6,
/// which is modeled in `database.rs`).
#[derive(Debug, Clone, PartialEq)]
pub struct AllLinkRecord {
    pub flags: AllLinkFlags,
    pub group: u8,
    pub to: Address,
    pub data: [u8; 3],
}

/// This represents the result of a completed link, spec.md §4.8.
#[derive(Debug, Clone, PartialEq)]
pub struct AllLinkComplete {
    pub mode: AllLinkMode,
    pub group: u8,
    pub address: Address,
    pub category: u8,
    pub sub_category: u8,
    pub firmware_version: u8,
}

fn clone_from_slice<A, T>(slice: &[T]) -> A
where
    A: Default + AsMut<[T]>,
    T: Clone,
{
    let mut a = Default::default();
    <A as AsMut<[T]>>::as_mut(&mut a).clone_from_slice(slice);
    a
}

/// This represents a single command or response to and from the modem.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Fetches the info for the current modem. The response is a
    /// `ModemInfo` frame.
    GetModemInfo,
    ModemInfo(ModemInfo),
    /// Send a standard-length INSTEON message. `flags` carries the raw
    /// flags byte (type/extended/hops); the codec does not interpret it.
    StandardInsteonSend {
        to: Address,
        flags: u8,
        cmd1: u8,
        cmd2: u8,
    },
    /// Send an extended-length INSTEON message.
    ExtendedInsteonSend {
        to: Address,
        flags: u8,
        cmd1: u8,
        cmd2: u8,
        data: [u8; 14],
    },
    /// Produced when a standard INSTEON message is received.
    StandardInsteonReceive {
        from: Address,
        /// Either the destination address (direct messages) or
        /// `(group, devcat, subcat)` packed as 3 bytes (broadcast
        /// messages) — see [crate::message::Message] for the
        /// flag-dependent interpretation, spec.md §3.
        to_raw: [u8; 3],
        flags: u8,
        cmd1: u8,
        cmd2: u8,
    },
    /// Produced when an extended INSTEON message is received.
    ExtendedInsteonReceive {
        from: Address,
        to_raw: [u8; 3],
        flags: u8,
        cmd1: u8,
        cmd2: u8,
        data: [u8; 14],
    },
    /// Puts the modem into linking mode.
    StartAllLink {
        mode: AllLinkMode,
        group: u8,
    },
    /// Exits linking mode.
    CancelAllLink,
    AllLinkComplete(AllLinkComplete),
    GetFirstAllLinkRecord,
    GetNextAllLinkRecord,
    AllLinkRecord(AllLinkRecord),
    /// Writes a record into the *modem's* all-link database. A device's
    /// own all-link database (spec.md §4.6) is instead written through an
    /// `ExtendedInsteonSend`/`ExtendedInsteonReceive` round trip, modeled
    /// in `database.rs`.
    WriteAllLinkRecord {
        flags: AllLinkFlags,
        group: u8,
        to: Address,
        data: [u8; 3],
    },
    Reset,
    AllLinkCommand {
        group: u8,
        cmd1: u8,
        cmd2: u8,
    },
    /// The modem reports that the user pressed the physical reset button.
    UserReset,
    Unknown {
        buf: Vec<u8>,
    },
}

impl Frame {
    /// Returns true if `other` is a response to self.
    pub fn is_response(&self, other: &Frame) -> bool {
        match (self, other) {
            (Frame::GetModemInfo, Frame::ModemInfo { .. }) => true,
            _ => ::std::mem::discriminant(self) == ::std::mem::discriminant(other),
        }
    }

    pub fn from_slice(src: &[u8]) -> Result<Option<Frame>, Error> {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(src);
        Self::from_bytes(&mut bytes)
    }

    /// Parse a frame. Returns `Ok(None)` if more bytes are needed
    /// ("NeedMore" in spec.md §4.1 terms) without consuming anything, or
    /// `Ok(Some(frame))` having consumed exactly the bytes that made up
    /// the frame. An unrecognized type byte yields `Err(Error::Parse)`;
    /// the caller (`FrameCodec`) resyncs by discarding one byte and
    /// retrying, per spec.md §4.1/§4.2.
    ///
    /// # Arguments
    /// * `src` - The buffer to parse.
    pub fn from_bytes(src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        const TERMS: [u8; 2] = [ACK, NAK];

        #[rustfmt::skip]
        named!(parse_frame<(u8, Frame)>,
            alt!(
                // ModemInfo
                do_parse!(
                    tag!(&[START, GETIMINFO][..])  >>
                    address: take!(3)              >>
                    category: be_u8                >>
                    sub_category: be_u8            >>
                    firmware_version: be_u8        >>
                    ack: one_of!(TERMS)            >>
                    (ack as u8, Frame::ModemInfo(ModemInfo {
                        address: address.into(),
                        category, sub_category, firmware_version
                    }))
                ) |
                // StandardInsteonReceive
                do_parse!(
                    tag!(&[START, STANDARD_INSTEON_RECV][..]) >>
                    from: take!(3)                            >>
                    to: take!(3)                              >>
                    flags: be_u8                              >>
                    cmd1: be_u8                               >>
                    cmd2: be_u8                               >>
                    (ACK, Frame::StandardInsteonReceive {
                        from: from.into(),
                        to_raw: clone_from_slice(to),
                        flags, cmd1, cmd2
                    })
                ) |
                // ExtendedInsteonReceive
                do_parse!(
                    tag!(&[START, EXTENDED_INSTEON_RECV][..]) >>
                    from: take!(3)                            >>
                    to: take!(3)                              >>
                    flags: be_u8                              >>
                    cmd1: be_u8                               >>
                    cmd2: be_u8                               >>
                    data: take!(14)                           >>
                    (ACK, Frame::ExtendedInsteonReceive {
                        from: from.into(),
                        to_raw: clone_from_slice(to),
                        flags, cmd1, cmd2, data: clone_from_slice(data)
                    })
                ) |
                // StandardInsteonSend / ExtendedInsteonSend share a tag
                // byte; which one follows is determined by the extended
                // bit in `flags` (bit 4), not by backtracking on the ACK
                // byte, since an extended data byte could otherwise
                // coincide with ACK/NAK and misparse.
                do_parse!(
                    tag!(&[START, INSTEON_SEND][..])                   >>
                    to: take!(3)                                       >>
                    flags: be_u8                                       >>
                    cmd1: be_u8                                        >>
                    cmd2: be_u8                                        >>
                    data: cond!((flags & 0b0001_0000) != 0, take!(14)) >>
                    ack: one_of!(TERMS)                                >>
                    (ack as u8, match data {
                        Some(data) => Frame::ExtendedInsteonSend {
                            to: to.into(), flags, cmd1, cmd2, data: clone_from_slice(data),
                        },
                        None => Frame::StandardInsteonSend { to: to.into(), flags, cmd1, cmd2 },
                    })
                ) |
                // StartAllLink
                do_parse!(
                    tag!(&[START, START_ALL_LINK][..]) >>
                    mode: be_u8                        >>
                    group: be_u8                       >>
                    ack: one_of!(TERMS)                >>
                    (ack as u8, Frame::StartAllLink {
                        mode: mode.into(), group
                    })
                ) |
                // CancelAllLink
                do_parse!(
                    tag!(&[START, CANCEL_ALL_LINK][..])  >>
                    ack: one_of!(TERMS)                  >>
                    (ack as u8, Frame::CancelAllLink)
                ) |
                // AllLinkComplete
                do_parse!(
                    tag!(&[START, ALL_LINK_COMPLETE][..])  >>
                    mode: be_u8                            >>
                    group: be_u8                           >>
                    from: take!(3)                         >>
                    category: be_u8                        >>
                    sub_category: be_u8                    >>
                    firmware_version: be_u8                >>
                    (ACK, Frame::AllLinkComplete(AllLinkComplete{
                        mode: mode.into(),
                        group,
                        address: from.into(),
                        category, sub_category, firmware_version
                    }))
                ) |
                // GetFirstAllLinkRecord
                do_parse!(
                    tag!(&[START, GET_FIRST_ALL_LINK_RECORD][..])  >>
                    ack: one_of!(TERMS)                            >>
                    (ack as u8, Frame::GetFirstAllLinkRecord)
                ) |
                // GetNextAllLinkRecord
                do_parse!(
                    tag!(&[START, GET_NEXT_ALL_LINK_RECORD][..])  >>
                    ack: one_of!(TERMS)                           >>
                    (ack as u8, Frame::GetNextAllLinkRecord)
                ) |
                // AllLinkRecord
                do_parse!(
                    tag!(&[START, ALL_LINK_RECORD][..])  >>
                    flags: be_u8                         >>
                    group: be_u8                         >>
                    to: take!(3)                         >>
                    data: take!(3)                       >>
                    (ACK, Frame::AllLinkRecord(AllLinkRecord {
                        flags: AllLinkFlags::from_bits_truncate(flags),
                        group,
                        to: to.into(),
                        data: [data[0], data[1], data[2]]
                    }))
                ) |
                // WriteAllLinkRecord
                do_parse!(
                    tag!(&[START, WRITE_ALL_LINK_RECORD][..])  >>
                    flags: be_u8                                >>
                    group: be_u8                                >>
                    to: take!(3)                                >>
                    data: take!(3)                              >>
                    ack: one_of!(TERMS)                         >>
                    (ack as u8, Frame::WriteAllLinkRecord {
                        flags: AllLinkFlags::from_bits_truncate(flags),
                        group,
                        to: to.into(),
                        data: [data[0], data[1], data[2]]
                    })
                ) |
                // Reset
                do_parse!(
                    tag!(&[START, RESET][..])  >>
                    ack: one_of!(TERMS)        >>
                    (ack as u8, Frame::Reset)
                ) |
                // AllLinkCommand
                do_parse!(
                    tag!(&[START, ALL_LINK_SEND][..]) >>
                    group: be_u8                      >>
                    cmd1: be_u8                       >>
                    cmd2: be_u8                       >>
                    ack: one_of!(TERMS)               >>
                    (ack as u8, Frame::AllLinkCommand {
                        group, cmd1, cmd2
                    })
                ) |
                // UserReset
                do_parse!(
                    tag!(&[START, USER_RESET][..])  >>
                    (ACK, Frame::UserReset)
                )
            )
        );

        match parse_frame(src) {
            Ok((remainder, (ack, frame))) => {
                let consumed = src.len() - remainder.len();
                src.advance(consumed);
                if ack != ACK {
                    Err(Error::NoAck)
                } else {
                    Ok(Some(frame))
                }
            }
            Err(nom::Err::Incomplete(_)) => Ok(None),
            Err(nom::Err::Error((_, nom::error::ErrorKind::Alt))) => Err(Error::Parse),
            Err(nom::Err::Error((_, kind))) => Err(kind.into()),
            Err(nom::Err::Failure((_, kind))) => Err(kind.into()),
        }
    }

    /// Serializes the `Frame` into `bytes`. For `ExtendedInsteonSend`
    /// the trailing checksum byte (D14) is computed per spec.md §3 unless
    /// the caller already populated a non-zero D14.
    pub fn to_bytes(&self, bytes: &mut BytesMut) {
        bytes.put_u8(START);
        match *self {
            Frame::GetModemInfo { .. } => bytes.put_u8(GETIMINFO),
            Frame::StandardInsteonSend {
                ref to,
                ref flags,
                ref cmd1,
                ref cmd2,
            } => {
                bytes.put_u8(INSTEON_SEND);
                bytes.put_slice(&to.bytes());
                bytes.put_u8(*flags);
                bytes.put_u8(*cmd1);
                bytes.put_u8(*cmd2);
            }
            Frame::ExtendedInsteonSend {
                ref to,
                ref flags,
                ref cmd1,
                ref cmd2,
                ref data,
            } => {
                bytes.put_u8(INSTEON_SEND);
                bytes.put_slice(&to.bytes());
                bytes.put_u8(*flags);
                bytes.put_u8(*cmd1);
                bytes.put_u8(*cmd2);
                bytes.put_slice(&data[..]);

                if data[13] == 0 {
                    // Two's complement of the sum of cmd1, cmd2, D1..D13.
                    let sum = bytes[6..bytes.len() - 1]
                        .iter()
                        .fold(0u32, |sum, x| sum + u32::from(*x));
                    *(bytes.last_mut().unwrap()) = ((!sum).wrapping_add(1) & 255) as u8;
                }
            }
            Frame::StartAllLink { ref mode, ref group } => {
                bytes.put_u8(START_ALL_LINK);
                bytes.put_u8((*mode).into());
                bytes.put_u8(*group);
            }
            Frame::CancelAllLink => bytes.put_u8(CANCEL_ALL_LINK),
            Frame::GetFirstAllLinkRecord => bytes.put_u8(GET_FIRST_ALL_LINK_RECORD),
            Frame::GetNextAllLinkRecord => bytes.put_u8(GET_NEXT_ALL_LINK_RECORD),
            Frame::WriteAllLinkRecord {
                ref flags,
                ref group,
                ref to,
                ref data,
            } => {
                bytes.put_u8(WRITE_ALL_LINK_RECORD);
                bytes.put_u8(flags.bits());
                bytes.put_u8(*group);
                bytes.put_slice(&to.bytes());
                bytes.put_slice(&data[..]);
            }
            Frame::Reset => bytes.put_u8(RESET),
            Frame::AllLinkCommand {
                ref group,
                ref cmd1,
                ref cmd2,
            } => {
                bytes.put_u8(ALL_LINK_SEND);
                bytes.put_u8(*group);
                bytes.put_u8(*cmd1);
                bytes.put_u8(*cmd2);
            }
            _ => unimplemented!("{:?} is a host-incoming-only frame", self),
        }
    }
}

pub struct FrameCodec();

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match Frame::from_bytes(src) {
                Ok(val) => return Ok(val),
                // An unrecognized type byte: resync by discarding the
                // leading START byte and retrying, per spec.md §4.1.
                Err(Error::Parse) if !src.is_empty() => {
                    src.advance(1);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.to_bytes(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command() {
        let buf = &[START][..];
        assert_eq!(Frame::from_slice(buf), Ok(None));
    }

    #[test]
    fn no_terminator() {
        let buf = &[START, GETIMINFO][..];
        assert_eq!(Frame::from_slice(&buf), Ok(None));
    }

    #[test]
    fn unknown_command() {
        let buf = &[START, 0x95u8][..];
        assert_eq!(Frame::from_slice(&buf), Err(Error::Parse));
    }

    #[test]
    fn garbage() {
        let buf = &[0x1u8; 128][..];
        assert_eq!(Frame::from_slice(&buf), Err(Error::Parse));
    }

    #[test]
    fn valid() {
        let buf = &[START, CANCEL_ALL_LINK, ACK][..];
        assert_eq!(Frame::from_slice(&buf), Ok(Some(Frame::CancelAllLink)));
    }

    #[test]
    fn nak_is_reported() {
        let buf = &[START, CANCEL_ALL_LINK, NAK][..];
        assert_eq!(Frame::from_slice(&buf), Err(Error::NoAck));
    }

    #[test]
    fn resync_on_unknown_byte() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[START, 0x95u8, START, CANCEL_ALL_LINK, ACK]);
        let mut codec = FrameCodec();
        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(Frame::CancelAllLink));
    }

    #[test]
    fn extended_send_checksum() {
        let mut bytes = BytesMut::new();
        let frame = Frame::ExtendedInsteonSend {
            to: Address::from([0x11, 0x22, 0x33]),
            flags: 0x1f,
            cmd1: 0x2e,
            cmd2: 0x00,
            data: [0u8; 14],
        };
        frame.to_bytes(&mut bytes);
        // sum(cmd1, cmd2, D1..D14) mod 256 == 0 (spec.md §8 property 3).
        let sum: u32 = bytes[6..].iter().map(|b| u32::from(*b)).sum();
        assert_eq!(sum % 256, 0);
    }
}
