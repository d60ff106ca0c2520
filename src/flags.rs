use std::fmt;

use bitflags::bitflags;

use crate::constants::*;

/// The 3-bit message-type field of an INSTEON flags byte, spec.md §3.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageType {
    Direct,
    DirectAck,
    AllLinkCleanup,
    AllLinkCleanupAck,
    Broadcast,
    DirectNak,
    AllLinkBroadcast,
    AllLinkCleanupNak,
}

impl MessageType {
    pub fn is_ack(self) -> bool {
        matches!(self, MessageType::DirectAck | MessageType::AllLinkCleanupAck)
    }

    pub fn is_nak(self) -> bool {
        matches!(self, MessageType::DirectNak | MessageType::AllLinkCleanupNak)
    }

    pub fn is_broadcast(self) -> bool {
        matches!(self, MessageType::Broadcast | MessageType::AllLinkBroadcast)
    }
}

impl From<u8> for MessageType {
    fn from(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => MessageType::Direct,
            0b001 => MessageType::DirectAck,
            0b010 => MessageType::AllLinkCleanup,
            0b011 => MessageType::AllLinkCleanupAck,
            0b100 => MessageType::Broadcast,
            0b101 => MessageType::DirectNak,
            0b110 => MessageType::AllLinkBroadcast,
            _ => MessageType::AllLinkCleanupNak,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Direct => 0b000,
            MessageType::DirectAck => 0b001,
            MessageType::AllLinkCleanup => 0b010,
            MessageType::AllLinkCleanupAck => 0b011,
            MessageType::Broadcast => 0b100,
            MessageType::DirectNak => 0b101,
            MessageType::AllLinkBroadcast => 0b110,
            MessageType::AllLinkCleanupNak => 0b111,
        }
    }
}

/// The full INSTEON message-flags byte: `type<<5 | extended<<4 |
/// max_hops<<2 | hops_left`, spec.md §3.
///
/// Invariant: `hops_left <= max_hops`. [MessageFlags::new] clamps to
/// maintain it; callers that build a value by hand should use
/// [MessageFlags::is_valid] to check.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MessageFlags {
    pub message_type: MessageType,
    pub extended: bool,
    pub max_hops: u8,
    pub hops_left: u8,
}

impl MessageFlags {
    pub fn new(message_type: MessageType, extended: bool, max_hops: u8) -> Self {
        let max_hops = max_hops & 0b11;
        MessageFlags {
            message_type,
            extended,
            max_hops,
            hops_left: max_hops,
        }
    }

    pub fn direct_standard() -> Self {
        MessageFlags::new(MessageType::Direct, false, 3)
    }

    pub fn direct_extended() -> Self {
        MessageFlags::new(MessageType::Direct, true, 3)
    }

    pub fn is_valid(self) -> bool {
        self.hops_left <= self.max_hops
    }

    /// Equality ignoring hop-count fields, as required when matching a
    /// reply against an expectation (spec.md §4.1: "Decoders must strip
    /// hop information for equality comparisons").
    pub fn eq_ignoring_hops(self, other: Self) -> bool {
        self.message_type == other.message_type && self.extended == other.extended
    }
}

impl Default for MessageFlags {
    fn default() -> Self {
        MessageFlags::direct_standard()
    }
}

impl From<u8> for MessageFlags {
    fn from(byte: u8) -> Self {
        MessageFlags {
            message_type: MessageType::from(byte >> 5),
            extended: (byte & 0b0001_0000) != 0,
            max_hops: (byte >> 2) & 0b11,
            hops_left: byte & 0b11,
        }
    }
}

impl From<MessageFlags> for u8 {
    fn from(flags: MessageFlags) -> Self {
        let mut byte = u8::from(flags.message_type) << 5;
        if flags.extended {
            byte |= 0b0001_0000;
        }
        byte |= (flags.max_hops & 0b11) << 2;
        byte |= flags.hops_left & 0b11;
        byte
    }
}

bitflags! {
    /// Flags on an all-link database record, spec.md §3/§4.6.
    pub struct AllLinkFlags: u8 {
        const IN_USE        = 1 << 7;
        /// When present, this end of the link is a controller. If absent,
        /// it is a responder.
        const IS_CONTROLLER = 1 << 6;
        const HAS_BEEN_USED  = 1 << 1;
        const NONE           = 0;
    }
}

/// Link modes used when putting the modem or a device into linking mode,
/// and when writing all-link database records (spec.md §4.6/§4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllLinkMode {
    Responder,
    Controller,
    Auto,
    Delete,
    None,
}

impl fmt::Display for AllLinkMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<u8> for AllLinkMode {
    fn from(mode: u8) -> Self {
        match mode {
            LINK_MODE_RESPONDER => AllLinkMode::Responder,
            LINK_MODE_CONTROLLER => AllLinkMode::Controller,
            LINK_MODE_AUTO => AllLinkMode::Auto,
            LINK_MODE_DELETE => AllLinkMode::Delete,
            _ => AllLinkMode::None,
        }
    }
}

impl From<AllLinkMode> for u8 {
    fn from(mode: AllLinkMode) -> Self {
        match mode {
            AllLinkMode::Responder => LINK_MODE_RESPONDER,
            AllLinkMode::Controller => LINK_MODE_CONTROLLER,
            AllLinkMode::Auto => LINK_MODE_AUTO,
            AllLinkMode::Delete => LINK_MODE_DELETE,
            AllLinkMode::None => LINK_MODE_DELETE,
        }
    }
}

/// Information about the attached modem, spec.md §4.7 (Modem).
#[derive(Debug, Clone, PartialEq)]
pub struct ModemInfo {
    pub address: crate::address::Address,
    pub category: u8,
    pub sub_category: u8,
    pub firmware_version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_types() {
        for bits in 0u8..8 {
            let t = MessageType::from(bits);
            assert_eq!(bits, u8::from(t));
        }
    }

    #[test]
    fn byte_round_trip_modulo_hops() {
        let original = MessageFlags::new(MessageType::AllLinkBroadcast, true, 3);
        let byte = u8::from(original);
        let decoded = MessageFlags::from(byte);
        assert!(decoded.eq_ignoring_hops(original));
        assert_eq!(decoded.extended, original.extended);
    }

    #[test]
    fn hops_left_invariant() {
        let flags = MessageFlags::new(MessageType::Direct, false, 2);
        assert!(flags.is_valid());
        assert_eq!(flags.hops_left, 2);
    }
}
