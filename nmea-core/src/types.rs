//! Shared types, error enum, and contact delta types for nmea-core.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by nmea-core.
#[derive(Debug, Error)]
pub enum NmeaError {
    #[error("empty sentence")]
    Empty,
    #[error("checksum mismatch: expected {expected:02X}, computed {actual:02X}")]
    Checksum { expected: u8, actual: u8 },
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("malformed sentence: {0}")]
    Malformed(String),
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
    #[error("no position fix")]
    NoFix,
    #[error("unsupported record: {0}")]
    Unsupported(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NmeaError>;

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Sentence prefix helpers
// ---------------------------------------------------------------------------

/// Characters that start an NMEA (`$`) or encapsulated AIS (`!`) sentence.
pub const SENTENCE_PREFIXES: [char; 2] = ['$', '!'];

/// True when the text starts with `$` or `!`.
pub fn has_sentence_prefix(s: &str) -> bool {
    s.starts_with(SENTENCE_PREFIXES)
}

// ---------------------------------------------------------------------------
// Contact data
// ---------------------------------------------------------------------------

/// Parser family that last touched a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    Tll,
    Gga,
    Hdt,
    Ttm,
    Ais,
    Csv,
}

impl ContactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactSource::Tll => "tll",
            ContactSource::Gga => "gga",
            ContactSource::Hdt => "hdt",
            ContactSource::Ttm => "ttm",
            ContactSource::Ais => "ais",
            ContactSource::Csv => "csv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tll" => Some(ContactSource::Tll),
            "gga" => Some(ContactSource::Gga),
            "hdt" => Some(ContactSource::Hdt),
            "ttm" => Some(ContactSource::Ttm),
            "ais" => Some(ContactSource::Ais),
            "csv" => Some(ContactSource::Csv),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static and voyage data from AIS types 5, 19 and 24.
///
/// Every field is optional because class B vessels send the data in two
/// halves; [`ShipStatic::merge`] folds the halves together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipStatic {
    pub ship_type: Option<u8>,
    pub callsign: Option<String>,
    pub imo: Option<u32>,
    pub destination: Option<String>,
    pub to_bow: Option<u16>,
    pub to_stern: Option<u16>,
    pub to_port: Option<u16>,
    pub to_starboard: Option<u16>,
}

impl ShipStatic {
    /// Overwrite fields that are present in `other`.
    pub fn merge(&mut self, other: &ShipStatic) {
        if other.ship_type.is_some() {
            self.ship_type = other.ship_type;
        }
        if other.callsign.is_some() {
            self.callsign = other.callsign.clone();
        }
        if other.imo.is_some() {
            self.imo = other.imo;
        }
        if other.destination.is_some() {
            self.destination = other.destination.clone();
        }
        if other.to_bow.is_some() {
            self.to_bow = other.to_bow;
        }
        if other.to_stern.is_some() {
            self.to_stern = other.to_stern;
        }
        if other.to_port.is_some() {
            self.to_port = other.to_port;
        }
        if other.to_starboard.is_some() {
            self.to_starboard = other.to_starboard;
        }
    }

    /// Overall length in metres, when both bow and stern offsets are known.
    pub fn length_m(&self) -> Option<u16> {
        Some(self.to_bow? + self.to_stern?)
    }

    /// Overall beam in metres, when both port and starboard offsets are known.
    pub fn beam_m(&self) -> Option<u16> {
        Some(self.to_port? + self.to_starboard?)
    }
}

/// A delta produced by one parsed sentence. Only `Some` fields are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactUpdate {
    pub source: ContactSource,
    pub position: Option<(f64, f64)>,
    pub heading_deg: Option<f64>,
    pub cog_deg: Option<f64>,
    pub sog_kts: Option<f64>,
    pub name: Option<String>,
    pub mmsi: Option<u32>,
    pub ship: Option<ShipStatic>,
}

impl ContactUpdate {
    pub fn new(source: ContactSource) -> Self {
        ContactUpdate {
            source,
            position: None,
            heading_deg: None,
            cog_deg: None,
            sog_kts: None,
            name: None,
            mmsi: None,
            ship: None,
        }
    }

    pub fn with_position(mut self, lat: f64, lon: f64) -> Self {
        self.position = Some((lat, lon));
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }
}

/// Label plus delta: the unit every parser and decoder emits.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedContact {
    pub label: String,
    pub update: ContactUpdate,
}

impl DecodedContact {
    pub fn new(label: impl Into<String>, update: ContactUpdate) -> Self {
        DecodedContact {
            label: label.into(),
            update,
        }
    }
}

/// A tracked vessel or object.
///
/// `lat == 0 && lon == 0` means no fix has been received yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub label: String,
    pub name: Option<String>,
    pub mmsi: Option<u32>,
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: Option<f64>,
    pub cog_deg: Option<f64>,
    pub sog_kts: Option<f64>,
    pub ship: Option<ShipStatic>,
    pub source: ContactSource,
    pub first_seen: f64,
    pub last_update: f64,
}

impl Contact {
    pub fn new(label: &str, source: ContactSource, timestamp: f64) -> Self {
        Contact {
            label: label.to_string(),
            name: None,
            mmsi: None,
            lat: 0.0,
            lon: 0.0,
            heading_deg: None,
            cog_deg: None,
            sog_kts: None,
            ship: None,
            source,
            first_seen: timestamp,
            last_update: timestamp,
        }
    }

    /// Merge a delta into this contact and stamp `last_update`.
    ///
    /// Non-finite numbers are dropped field by field so a contact never
    /// holds a value the cache cannot store.
    pub fn apply(&mut self, update: &ContactUpdate, timestamp: f64) {
        self.source = update.source;
        if let Some((lat, lon)) = update.position.filter(|(a, b)| a.is_finite() && b.is_finite()) {
            self.lat = lat;
            self.lon = lon;
        }
        if let Some(h) = finite(update.heading_deg) {
            self.heading_deg = Some(h);
        }
        if let Some(c) = finite(update.cog_deg) {
            self.cog_deg = Some(c);
        }
        if let Some(v) = finite(update.sog_kts) {
            self.sog_kts = Some(v);
        }
        if update.name.is_some() {
            self.name = update.name.clone();
        }
        if update.mmsi.is_some() {
            self.mmsi = update.mmsi;
        }
        if let Some(ship) = &update.ship {
            self.ship.get_or_insert_with(ShipStatic::default).merge(ship);
        }
        self.last_update = timestamp;
    }

    pub fn has_fix(&self) -> bool {
        !(self.lat == 0.0 && self.lon == 0.0)
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.has_fix().then_some((self.lat, self.lon))
    }

    /// Heading for display: true heading when valid, else course over ground.
    pub fn display_heading(&self) -> Option<f64> {
        self.heading_deg.or(self.cog_deg)
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_update
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
