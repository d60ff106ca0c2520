use std::time::Duration;

pub const START: u8 = 0x02u8;
pub const ACK: u8 = 0x06u8;
pub const NAK: u8 = 0x15u8;

// PLM -> Host commands
pub const STANDARD_INSTEON_RECV: u8 = 0x50u8;
pub const EXTENDED_INSTEON_RECV: u8 = 0x51u8;
pub const ALL_LINK_COMPLETE: u8 = 0x53u8;
pub const USER_RESET: u8 = 0x55u8;
pub const ALL_LINK_RECORD: u8 = 0x57u8;
pub const GETIMINFO: u8 = 0x60u8;

// Host -> PLM commands
pub const ALL_LINK_SEND: u8 = 0x61u8;
pub const INSTEON_SEND: u8 = 0x62u8;
pub const START_ALL_LINK: u8 = 0x64u8;
pub const CANCEL_ALL_LINK: u8 = 0x65u8;
pub const RESET: u8 = 0x67u8;
pub const GET_FIRST_ALL_LINK_RECORD: u8 = 0x69u8;
pub const GET_NEXT_ALL_LINK_RECORD: u8 = 0x6au8;
pub const WRITE_ALL_LINK_RECORD: u8 = 0x6fu8;

// Linking modes
pub const LINK_MODE_RESPONDER: u8 = 0x00;
pub const LINK_MODE_CONTROLLER: u8 = 0x01;
pub const LINK_MODE_AUTO: u8 = 0x03;
pub const LINK_MODE_DELETE: u8 = 0xff;

// Known cmd1 values used by the device/handler layer.
pub const CMD_ON: u8 = 0x11;
pub const CMD_ON_FAST: u8 = 0x12;
pub const CMD_OFF: u8 = 0x13;
pub const CMD_OFF_FAST: u8 = 0x14;
pub const CMD_STATUS_REQUEST: u8 = 0x19;
pub const CMD_EXTENDED_GET_SET: u8 = 0x2e;
pub const CMD_ENTER_LINKING_MODE: u8 = 0x09;
pub const CMD_ENTER_UNLINKING_MODE: u8 = 0x08;
pub const CMD_PING: u8 = 0x0f;
pub const CMD_BEEP: u8 = 0x30;

/// Outlet-specific all-link database record layout: D1 selects which
/// outlet (1 or 2) an extended on/off command targets.
pub const OUTLET_DATA1_TOP: u8 = 0x01;
pub const OUTLET_DATA1_BOTTOM: u8 = 0x02;

/// Memory address the all-link database is walked down from, per
/// spec.md §3 ("Ordered by memory address descending from 0x0FFF").
pub const DB_TOP_ADDRESS: u16 = 0x0FFF;
pub const DB_RECORD_SIZE: u16 = 8;

/// Default handler timeout/retry policy, spec.md §4.3.
pub const DEFAULT_STANDARD_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_EXTENDED_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRIES: u8 = 3;

/// Broadcast-duplicate suppression window, spec.md §4.3/§9.
pub const DEFAULT_BROADCAST_SUPPRESSION_WINDOW: Duration = Duration::from_millis(500);

/// Terminate a database download after this many consecutive empty/absent
/// records, spec.md §4.4 (DeviceDbGet).
pub const DB_GET_MAX_EMPTY_RECORDS: u8 = 2;

/// Battery-voltage scale for Remote devices, spec.md §4.7: raw byte / 50,
/// full scale 3.7V.
pub const REMOTE_BATTERY_DIVISOR: f32 = 50.0;
pub const REMOTE_BATTERY_FULL_SCALE: f32 = 3.7;

/// Meta namespace used by Remote devices to stash battery voltage in the
/// per-device database, spec.md §4.7.
pub const REMOTE_META_NAMESPACE: &str = "Remote";
