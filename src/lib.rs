#![recursion_limit = "256"]

//! Core device-interaction engine for an INSTEON-to-MQTT gateway: wire
//! codec, PLM link, protocol engine, per-device all-link database, and the
//! device state machines built on top of them.
//!
//! # Example
//! ```no_run
//! # use std::str::FromStr;
//! # use insteon_core::address::Address;
//! # use insteon_core::link::PlmLink;
//! # use insteon_core::engine::ProtocolEngine;
//! # use insteon_core::Error;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Error>  {
//! // Connect to the modem attached to /dev/ttyUSB0 and drive its engine.
//! let link = PlmLink::from_path("/dev/ttyUSB0")?;
//! let mut engine = ProtocolEngine::new(link);
//! while engine.on_frame().await? {}
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod admin;
pub mod constants;
pub mod database;
pub mod device;
pub mod engine;
pub mod error;
pub mod flags;
pub mod frame;
pub mod handler;
pub mod link;
pub mod message;
pub mod modem;
pub mod pairing;
pub mod sequence;
pub mod signal;

pub use error::Error;
