//! nmea-core: sentence framing, parsing and contact tracking for NMEA/AIS.
//!
//! No async, no I/O beyond the config file: just parsers and the contact
//! database. `nmea-server` owns the transports, persistence and REST API.

pub mod aivdm;
pub mod config;
pub mod contact_db;
pub mod csv;
pub mod dispatch;
pub mod framer;
pub mod geo;
pub mod nmea;
pub mod types;

// Re-export commonly used types at crate root
pub use aivdm::{AisDecoder, AivdmDecoder};
pub use contact_db::{CacheStore, ContactDb, Track, TrackPoint};
pub use dispatch::{Dispatched, Dispatcher};
pub use framer::SentenceFramer;
pub use nmea::SentenceKind;
pub use types::*;
