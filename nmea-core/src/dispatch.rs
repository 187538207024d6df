//! Route framed lines to the right parser and apply the result.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::aivdm::{AisDecoder, AivdmDecoder};
use crate::contact_db::ContactDb;
use crate::csv;
use crate::nmea::{self, SentenceKind};
use crate::types::*;

/// Default label for the contact fed by GGA/HDT.
pub const DEFAULT_OWN_SHIP_LABEL: &str = "own-ship";

/// Outcome of one successfully handled line.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub kind: SentenceKind,
    /// Labels of the contacts created or updated. Empty for fragments and
    /// AIS messages that carry no contact data.
    pub labels: Vec<String>,
}

/// Shared entry point for every transport and the inbound bus.
///
/// Parsers are stateless and run concurrently; the AIS decoder keeps
/// fragment state and is serialised behind one lock.
pub struct Dispatcher {
    db: Arc<ContactDb>,
    decoder: Mutex<Box<dyn AisDecoder>>,
    own_ship_label: String,
}

impl Dispatcher {
    pub fn new(db: Arc<ContactDb>, own_ship_label: &str) -> Self {
        Self::with_decoder(db, own_ship_label, Box::new(AivdmDecoder::new()))
    }

    pub fn with_decoder(
        db: Arc<ContactDb>,
        own_ship_label: &str,
        decoder: Box<dyn AisDecoder>,
    ) -> Self {
        Dispatcher {
            db,
            decoder: Mutex::new(decoder),
            own_ship_label: own_ship_label.to_string(),
        }
    }

    pub fn db(&self) -> &Arc<ContactDb> {
        &self.db
    }

    pub fn own_ship_label(&self) -> &str {
        &self.own_ship_label
    }

    /// Parse one line and apply it to the contact database.
    ///
    /// Failures are returned as values; the database is untouched on error.
    pub fn dispatch(&self, line: &str) -> Result<Dispatched> {
        let line = line.trim();
        if line.is_empty() {
            return Err(NmeaError::Empty);
        }

        let kind = nmea::classify(line);
        let decoded = match kind {
            SentenceKind::Tll => vec![nmea::decode_tll(line)?],
            SentenceKind::Gga => {
                let fix = nmea::decode_gga(line)?;
                vec![DecodedContact::new(
                    self.own_ship_label.as_str(),
                    ContactUpdate::new(ContactSource::Gga).with_position(fix.lat, fix.lon),
                )]
            }
            SentenceKind::Hdt => {
                let heading = nmea::decode_hdt(line)?;
                vec![DecodedContact::new(
                    self.own_ship_label.as_str(),
                    ContactUpdate::new(ContactSource::Hdt).with_heading(heading),
                )]
            }
            SentenceKind::Ttm => {
                let target = nmea::decode_ttm(line)?;
                let own_ship = self.db.get(&self.own_ship_label);
                vec![target.resolve(own_ship.as_ref())]
            }
            SentenceKind::Ais => self.decoder.lock().process(line)?,
            SentenceKind::Csv => vec![csv::decode_record(line)?],
        };

        let labels = decoded
            .into_iter()
            .map(|c| {
                self.db.upsert(&c.label, &c.update);
                c.label
            })
            .collect();

        Ok(Dispatched { kind, labels })
    }
}
