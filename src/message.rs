//! Higher-level request/reply model built on top of the wire-level
//! [Frame]: [Message], [Command], and the broadcast/direct destination
//! split required by spec.md §3.

use std::{convert::TryFrom, fmt};

use crate::address::Address;
use crate::constants::*;
use crate::error::*;
use crate::flags::{AllLinkFlags, AllLinkMode, MessageFlags, ModemInfo};
use crate::frame::{AllLinkComplete, AllLinkRecord, Frame};

/// A [Command] (two, actually) is sent in a [Message]. This type has some
/// commonly used ones, but arbitrary values can be sent via
/// [Command::Other].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    On,
    OnFast,
    Off,
    OffFast,
    Ping,
    VersionQuery,
    CancelLinking,
    StartLinking,
    StatusRequest,
    Beep,
    /// The extended get/set command (0x2e), used for device database
    /// operations, ramp-rate sets, and the extended-flags request that
    /// `Remote` uses to read battery voltage (spec.md §4.7).
    ExtendedGetSet,
    Other(u8),
    None,
}

impl Default for Command {
    fn default() -> Self {
        Command::None
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<u8> for Command {
    fn from(b: u8) -> Self {
        use Command::*;
        match b {
            CMD_ENTER_UNLINKING_MODE => CancelLinking,
            CMD_ENTER_LINKING_MODE => StartLinking,
            CMD_PING => Ping,
            CMD_STATUS_REQUEST => StatusRequest,
            CMD_ON => On,
            CMD_ON_FAST => OnFast,
            CMD_OFF => Off,
            CMD_OFF_FAST => OffFast,
            CMD_EXTENDED_GET_SET => ExtendedGetSet,
            CMD_BEEP => Beep,
            0 => None,
            _ => Other(b),
        }
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> Self {
        use Command::*;
        match c {
            On => CMD_ON,
            OnFast => CMD_ON_FAST,
            Off => CMD_OFF,
            OffFast => CMD_OFF_FAST,
            Ping => CMD_PING,
            VersionQuery => 0x0du8,
            CancelLinking => CMD_ENTER_UNLINKING_MODE,
            StartLinking => CMD_ENTER_LINKING_MODE,
            StatusRequest => CMD_STATUS_REQUEST,
            ExtendedGetSet => CMD_EXTENDED_GET_SET,
            Beep => CMD_BEEP,
            Other(cmd) => cmd,
            None => 0u8,
        }
    }
}

/// The destination of an inbound message: a direct address, or — for
/// broadcast/all-link messages — the group and the sender's device/sub
/// category, packed into the same 3 bytes the wire format uses for a
/// destination address (spec.md §3: "decoding must branch on flag type").
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Destination {
    Address(Address),
    Group { group: u8, devcat: u8, subcat: u8 },
}

impl Destination {
    pub fn address(self) -> Option<Address> {
        match self {
            Destination::Address(a) => Some(a),
            Destination::Group { .. } => None,
        }
    }

    pub fn group(self) -> Option<u8> {
        match self {
            Destination::Group { group, .. } => Some(group),
            Destination::Address(_) => None,
        }
    }
}

/// A decoded, higher-level INSTEON message, spec.md §3.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    OutStandard {
        to: Address,
        flags: MessageFlags,
        cmd1: Command,
        cmd2: Command,
    },
    OutExtended {
        to: Address,
        flags: MessageFlags,
        cmd1: Command,
        cmd2: Command,
        /// D1..D14; D14 is recomputed on encode unless already non-zero,
        /// spec.md §3/§4.1.
        data: [u8; 14],
    },
    InpStandard {
        from: Address,
        to: Destination,
        flags: MessageFlags,
        cmd1: Command,
        cmd2: Command,
    },
    InpExtended {
        from: Address,
        to: Destination,
        flags: MessageFlags,
        cmd1: Command,
        cmd2: Command,
        data: [u8; 14],
    },
    /// Trigger an all-link group from the modem itself, spec.md §4.7
    /// (Modem scene trigger).
    OutAllLinkTrigger {
        group: u8,
        cmd1: Command,
        cmd2: Command,
    },
    InpUserReset,
    InpAllLinkComplete(AllLinkComplete),
}

impl Message {
    /// Returns true if `self` is a standard or extended direct-ACK/NAK
    /// reply to a message sent `to` with the given `cmd1`.
    pub fn is_direct_reply_to(&self, to: Address, cmd1: Command) -> bool {
        match self {
            Message::InpStandard {
                from, flags, cmd1: reply_cmd1, ..
            }
            | Message::InpExtended {
                from, flags, cmd1: reply_cmd1, ..
            } => *from == to && (flags.message_type.is_ack() || flags.message_type.is_nak()) && *reply_cmd1 == cmd1,
            _ => false,
        }
    }

    pub fn is_nak(&self) -> bool {
        match self {
            Message::InpStandard { flags, .. } | Message::InpExtended { flags, .. } => {
                flags.message_type.is_nak()
            }
            _ => false,
        }
    }

    /// For an all-link broadcast, returns `(from, group, cmd1)` used as the
    /// broadcast-suppression key, spec.md §4.3.
    pub fn broadcast_key(&self) -> Option<(Address, u8, u8)> {
        match self {
            Message::InpStandard {
                from,
                to: Destination::Group { group, .. },
                flags,
                cmd1,
                ..
            } if flags.message_type.is_broadcast() => Some((*from, *group, u8::from(*cmd1))),
            _ => None,
        }
    }

    pub fn to_frame(&self) -> Frame {
        match *self {
            Message::OutStandard { to, flags, cmd1, cmd2 } => Frame::StandardInsteonSend {
                to,
                flags: u8::from(flags),
                cmd1: cmd1.into(),
                cmd2: cmd2.into(),
            },
            Message::OutExtended {
                to,
                flags,
                cmd1,
                cmd2,
                data,
            } => Frame::ExtendedInsteonSend {
                to,
                flags: u8::from(flags),
                cmd1: cmd1.into(),
                cmd2: cmd2.into(),
                data,
            },
            Message::OutAllLinkTrigger { group, cmd1, cmd2 } => Frame::AllLinkCommand {
                group,
                cmd1: cmd1.into(),
                cmd2: cmd2.into(),
            },
            _ => unimplemented!("{:?} is an inbound-only message", self),
        }
    }
}

impl TryFrom<Frame> for Message {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        match frame {
            Frame::StandardInsteonReceive {
                from,
                to_raw,
                flags,
                cmd1,
                cmd2,
            } => {
                let flags = MessageFlags::from(flags);
                Ok(Message::InpStandard {
                    from,
                    to: decode_destination(to_raw, flags),
                    flags,
                    cmd1: cmd1.into(),
                    cmd2: cmd2.into(),
                })
            }
            Frame::ExtendedInsteonReceive {
                from,
                to_raw,
                flags,
                cmd1,
                cmd2,
                data,
            } => {
                let flags = MessageFlags::from(flags);
                Ok(Message::InpExtended {
                    from,
                    to: decode_destination(to_raw, flags),
                    flags,
                    cmd1: cmd1.into(),
                    cmd2: cmd2.into(),
                    data,
                })
            }
            Frame::UserReset => Ok(Message::InpUserReset),
            Frame::AllLinkComplete(info) => Ok(Message::InpAllLinkComplete(info)),
            _ => Err(Error::UnexpectedResponse),
        }
    }
}

fn decode_destination(to_raw: [u8; 3], flags: MessageFlags) -> Destination {
    if flags.message_type.is_broadcast() {
        Destination::Group {
            group: to_raw[0],
            devcat: to_raw[1],
            subcat: to_raw[2],
        }
    } else {
        Destination::Address(Address::from(to_raw))
    }
}

/// Modem-local commands that do not address a device: modeled separately
/// from [Message] since they never carry an INSTEON `Address`/`Command`
/// pair, spec.md §3 ("modem local commands").
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModemCommand {
    GetInfo,
    Info(ModemInfo),
    StartAllLink { mode: AllLinkMode, group: u8 },
    CancelAllLink,
    Reset,
    GetFirstAllLinkRecord,
    GetNextAllLinkRecord,
    AllLinkRecord(AllLinkRecord),
    WriteAllLinkRecord {
        flags: AllLinkFlags,
        group: u8,
        to: Address,
        data: [u8; 3],
    },
}

impl ModemCommand {
    pub fn to_frame(&self) -> Frame {
        match self.clone() {
            ModemCommand::GetInfo => Frame::GetModemInfo,
            ModemCommand::StartAllLink { mode, group } => Frame::StartAllLink { mode, group },
            ModemCommand::CancelAllLink => Frame::CancelAllLink,
            ModemCommand::Reset => Frame::Reset,
            ModemCommand::GetFirstAllLinkRecord => Frame::GetFirstAllLinkRecord,
            ModemCommand::GetNextAllLinkRecord => Frame::GetNextAllLinkRecord,
            ModemCommand::WriteAllLinkRecord {
                flags,
                group,
                to,
                data,
            } => Frame::WriteAllLinkRecord {
                flags,
                group,
                to,
                data,
            },
            _ => unimplemented!("{:?} is an inbound-only modem command", self),
        }
    }
}

impl TryFrom<Frame> for ModemCommand {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        match frame {
            Frame::ModemInfo(info) => Ok(ModemCommand::Info(info)),
            Frame::AllLinkRecord(record) => Ok(ModemCommand::AllLinkRecord(record)),
            _ => Err(Error::UnexpectedResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn command_round_trips() {
        for cmd in [
            Command::On,
            Command::OnFast,
            Command::Off,
            Command::OffFast,
            Command::Ping,
            Command::StatusRequest,
            Command::ExtendedGetSet,
            Command::Beep,
            Command::Other(0x42),
        ] {
            assert_eq!(cmd, Command::from(u8::from(cmd)));
        }
    }

    #[test]
    fn direct_ack_matches() {
        let to = Address::from_str("11.22.33").unwrap();
        let reply = Message::InpStandard {
            from: to,
            to: Destination::Address(Address::from_str("aa.bb.cc").unwrap()),
            flags: MessageFlags::new(crate::flags::MessageType::DirectAck, false, 3),
            cmd1: Command::On,
            cmd2: Command::Other(0x80),
        };
        assert!(reply.is_direct_reply_to(to, Command::On));
    }

    #[test]
    fn broadcast_decodes_group() {
        let frame = Frame::StandardInsteonReceive {
            from: Address::from_str("11.22.33").unwrap(),
            to_raw: [0x01, 0x10, 0x01],
            flags: u8::from(MessageFlags::new(crate::flags::MessageType::AllLinkBroadcast, false, 3)),
            cmd1: 0x11,
            cmd2: 0x01,
        };
        let msg = Message::try_from(frame).unwrap();
        match msg {
            Message::InpStandard {
                to: Destination::Group { group, .. },
                ..
            } => assert_eq!(group, 1),
            _ => panic!("expected a group destination"),
        }
    }

    #[test]
    fn extended_on_example_from_spec() {
        // spec.md §8 scenario 1: turn on group 1 of a dimmer at level
        // 0x80, normal mode -> outbound bytes 02 62 11 22 33 0F 11 80.
        let to = Address::from_str("11.22.33").unwrap();
        let msg = Message::OutStandard {
            to,
            flags: MessageFlags::new(crate::flags::MessageType::Direct, false, 3),
            cmd1: Command::On,
            cmd2: Command::Other(0x80),
        };
        let frame = msg.to_frame();
        let mut bytes = bytes::BytesMut::new();
        frame.to_bytes(&mut bytes);
        assert_eq!(&bytes[..], &[0x02, 0x62, 0x11, 0x22, 0x33, 0x0f, 0x11, 0x80]);
    }
}
