//! AIVDM/AIVDO decoding: six-bit payload armor, multi-fragment reassembly,
//! and the message types that carry position or vessel particulars.
//!
//! - Types 1, 2, 3: class A position report
//! - Type 5:        class A static and voyage data (usually two fragments)
//! - Type 18:       class B position report
//! - Type 19:       class B extended position report
//! - Type 24:       class B static data, part A (name) or part B (type, dims)
//!
//! The decoder keeps fragment state between calls and is therefore not
//! reentrant; the dispatcher serialises every caller through one lock.

use std::collections::HashMap;

use crate::nmea;
use crate::types::*;

/// Six-bit ASCII table used for text fields.
const SIXBIT_CHARSET: &[u8; 64] =
    b"@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_ !\"#$%&'()*+,-./0123456789:;<=>?";

/// Incomplete multi-fragment messages kept at most.
const MAX_PENDING_FRAGMENTS: usize = 32;

const HEADING_NA: u32 = 511;
const SOG_NA: u32 = 1023;
const COG_NA: u32 = 3600;
const LON_NA: i32 = 181 * 600_000;
const LAT_NA: i32 = 91 * 600_000;

/// The generic AIS decoder seam: one sentence in, zero or more contact
/// deltas out. Implementations may keep state across calls.
pub trait AisDecoder: Send {
    fn process(&mut self, sentence: &str) -> Result<Vec<DecodedContact>>;
}

// ---------------------------------------------------------------------------
// Bit access
// ---------------------------------------------------------------------------

/// Payload de-armored into one bit per element.
struct Bits {
    bits: Vec<u8>,
}

impl Bits {
    fn from_armor(payload: &str, fill_bits: u8) -> Result<Self> {
        let mut bits = Vec::with_capacity(payload.len() * 6);
        for c in payload.bytes() {
            let v = match c {
                b'0'..=b'W' => c - 48,
                b'`'..=b'w' => c - 56,
                _ => {
                    return Err(NmeaError::Malformed(format!(
                        "bad armor char '{}'",
                        c as char
                    )))
                }
            };
            for shift in (0..6).rev() {
                bits.push((v >> shift) & 1);
            }
        }
        let keep = bits.len().saturating_sub(fill_bits as usize);
        bits.truncate(keep);
        Ok(Bits { bits })
    }

    fn len(&self) -> usize {
        self.bits.len()
    }

    fn uint(&self, start: usize, len: usize) -> Option<u32> {
        let slice = self.bits.get(start..start + len)?;
        Some(slice.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32))
    }

    fn int(&self, start: usize, len: usize) -> Option<i32> {
        let raw = self.uint(start, len)?;
        let shift = 32 - len as u32;
        Some(((raw << shift) as i32) >> shift)
    }

    /// Six-bit text. Truncated payloads yield the characters that fit.
    fn text(&self, start: usize, len: usize) -> Option<String> {
        let avail = self.len().saturating_sub(start).min(len);
        let chars = avail / 6;
        if chars == 0 {
            return None;
        }
        let mut s = String::with_capacity(chars);
        for i in 0..chars {
            let idx = self.uint(start + i * 6, 6)? as usize;
            s.push(SIXBIT_CHARSET[idx] as char);
        }
        let trimmed = s.trim_end_matches(['@', ' ']).trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

// ---------------------------------------------------------------------------
// Field conversions
// ---------------------------------------------------------------------------

fn position(bits: &Bits, lon_at: usize, lat_at: usize) -> Option<(f64, f64)> {
    let lon = bits.int(lon_at, 28)?;
    let lat = bits.int(lat_at, 27)?;
    if lon == LON_NA || lat == LAT_NA || (lon == 0 && lat == 0) {
        return None;
    }
    let (lat, lon) = (lat as f64 / 600_000.0, lon as f64 / 600_000.0);
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

fn sog(bits: &Bits, at: usize) -> Option<f64> {
    bits.uint(at, 10)
        .filter(|&v| v != SOG_NA)
        .map(|v| v as f64 / 10.0)
}

fn cog(bits: &Bits, at: usize) -> Option<f64> {
    bits.uint(at, 12)
        .filter(|&v| v < COG_NA)
        .map(|v| v as f64 / 10.0)
}

fn heading(bits: &Bits, at: usize) -> Option<f64> {
    bits.uint(at, 9)
        .filter(|&v| v != HEADING_NA && v < 360)
        .map(|v| v as f64)
}

fn nonzero_u16(bits: &Bits, at: usize, len: usize) -> Option<u16> {
    bits.uint(at, len).filter(|&v| v != 0).map(|v| v as u16)
}

fn dimensions(bits: &Bits, at: usize, ship: &mut ShipStatic) {
    ship.to_bow = nonzero_u16(bits, at, 9);
    ship.to_stern = nonzero_u16(bits, at + 9, 9);
    ship.to_port = nonzero_u16(bits, at + 18, 6);
    ship.to_starboard = nonzero_u16(bits, at + 24, 6);
}

// ---------------------------------------------------------------------------
// Message decoding
// ---------------------------------------------------------------------------

fn require(bits: &Bits, min_len: usize, msg_type: u32) -> Result<()> {
    if bits.len() < min_len {
        return Err(NmeaError::Malformed(format!(
            "type {msg_type} payload too short: {} bits",
            bits.len()
        )));
    }
    Ok(())
}

fn decode_message(bits: &Bits) -> Result<Option<DecodedContact>> {
    let msg_type = bits.uint(0, 6).ok_or(NmeaError::Empty)?;
    let mmsi = bits
        .uint(8, 30)
        .ok_or_else(|| NmeaError::Malformed("payload too short for MMSI".into()))?;

    let mut update = ContactUpdate::new(ContactSource::Ais);
    update.mmsi = Some(mmsi);

    match msg_type {
        1..=3 => {
            require(bits, 137, msg_type)?;
            update.sog_kts = sog(bits, 50);
            update.position = position(bits, 61, 89);
            update.cog_deg = cog(bits, 116);
            update.heading_deg = heading(bits, 128);
        }
        5 => {
            require(bits, 270, msg_type)?;
            let mut ship = ShipStatic {
                imo: bits.uint(40, 30).filter(|&v| v != 0),
                callsign: bits.text(70, 42),
                ship_type: bits.uint(232, 8).filter(|&v| v != 0).map(|v| v as u8),
                destination: bits.text(302, 120),
                ..Default::default()
            };
            dimensions(bits, 240, &mut ship);
            update.name = bits.text(112, 120);
            update.ship = Some(ship);
        }
        18 | 19 => {
            require(bits, 133, msg_type)?;
            update.sog_kts = sog(bits, 46);
            update.position = position(bits, 57, 85);
            update.cog_deg = cog(bits, 112);
            update.heading_deg = heading(bits, 124);
            if msg_type == 19 && bits.len() >= 301 {
                let mut ship = ShipStatic {
                    ship_type: bits.uint(263, 8).filter(|&v| v != 0).map(|v| v as u8),
                    ..Default::default()
                };
                dimensions(bits, 271, &mut ship);
                update.name = bits.text(143, 120);
                update.ship = Some(ship);
            }
        }
        24 => {
            let part = bits
                .uint(38, 2)
                .ok_or_else(|| NmeaError::Malformed("type 24 without part number".into()))?;
            match part {
                0 => {
                    update.name = bits.text(40, 120);
                }
                1 => {
                    require(bits, 162, msg_type)?;
                    let mut ship = ShipStatic {
                        ship_type: bits.uint(40, 8).filter(|&v| v != 0).map(|v| v as u8),
                        callsign: bits.text(90, 42),
                        ..Default::default()
                    };
                    dimensions(bits, 132, &mut ship);
                    update.ship = Some(ship);
                }
                _ => return Ok(None),
            }
        }
        _ => return Ok(None),
    }

    Ok(Some(DecodedContact::new(mmsi.to_string(), update)))
}

// ---------------------------------------------------------------------------
// Sentence layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    sequence: String,
    channel: String,
}

#[derive(Debug)]
struct PendingMessage {
    total: u8,
    next: u8,
    payload: String,
}

/// Stateful AIVDM/AIVDO decoder.
#[derive(Debug, Default)]
pub struct AivdmDecoder {
    pending: HashMap<FragmentKey, PendingMessage>,
    /// Messages decoded (complete payloads).
    pub messages: u64,
    /// Complete payloads of a type that carries no contact data.
    pub ignored: u64,
}

impl AivdmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments waiting for the rest of their message.
    pub fn pending_fragments(&self) -> usize {
        self.pending.len()
    }

    fn decode_payload(&mut self, payload: &str, fill: u8) -> Result<Vec<DecodedContact>> {
        let bits = Bits::from_armor(payload, fill)?;
        self.messages += 1;
        match decode_message(&bits)? {
            Some(c) => Ok(vec![c]),
            None => {
                self.ignored += 1;
                Ok(Vec::new())
            }
        }
    }
}

impl AisDecoder for AivdmDecoder {
    fn process(&mut self, sentence: &str) -> Result<Vec<DecodedContact>> {
        let f = nmea::fields(sentence)?;
        let token = f[0];
        if !(token.ends_with("VDM") || token.ends_with("VDO")) {
            return Err(NmeaError::Unsupported(token.to_string()));
        }
        if f.len() < 7 {
            return Err(NmeaError::Malformed(format!("{token}: expected 7 fields")));
        }

        let parse_u8 = |idx: usize, name: &'static str| -> Result<u8> {
            f[idx]
                .trim()
                .parse::<u8>()
                .map_err(|_| NmeaError::Malformed(format!("{name}: '{}'", f[idx])))
        };
        let total = parse_u8(1, "fragment count")?;
        let number = parse_u8(2, "fragment number")?;
        let payload = f[5];
        let fill = if f[6].trim().is_empty() {
            0
        } else {
            parse_u8(6, "fill bits")?
        };

        if total == 0 || number == 0 || number > total {
            return Err(NmeaError::Malformed(format!(
                "fragment {number} of {total}"
            )));
        }
        if total == 1 {
            return self.decode_payload(payload, fill);
        }

        let key = FragmentKey {
            sequence: f[3].to_string(),
            channel: f[4].to_string(),
        };

        if number == 1 {
            if self.pending.len() >= MAX_PENDING_FRAGMENTS {
                self.pending.clear();
            }
            self.pending.insert(
                key,
                PendingMessage {
                    total,
                    next: 2,
                    payload: payload.to_string(),
                },
            );
            return Ok(Vec::new());
        }

        let in_order = self
            .pending
            .get(&key)
            .is_some_and(|p| p.total == total && p.next == number);
        if !in_order {
            self.pending.remove(&key);
            return Err(NmeaError::Malformed(format!(
                "unexpected fragment {number} of {total}"
            )));
        }

        if number < total {
            if let Some(p) = self.pending.get_mut(&key) {
                p.payload.push_str(payload);
                p.next += 1;
            }
            return Ok(Vec::new());
        }

        match self.pending.remove(&key) {
            Some(mut p) => {
                p.payload.push_str(payload);
                self.decode_payload(&p.payload, fill)
            }
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TYPE1: &str = "!AIVDM,1,1,,A,13aEOK001swH`N0GRuD9sGvt0000,0*4C";
    const TYPE3_NA: &str = "!AIVDM,1,1,,B,33aEOK@0?wdtSF0l4Q@>4?vt0000,0*76";
    const TYPE5_A: &str =
        "!AIVDM,2,1,3,A,53aEOK02;=`10848000pu9@R1=@5800000000016?0N:<4000031BF3iDh00,0*0A";
    const TYPE5_B: &str = "!AIVDM,2,2,3,A,00000000000,2*27";
    const TYPE18: &str = "!AIVDM,1,1,,B,B>eq`d@0=h<12h8TIb0pCwP00000,0*68";
    const TYPE24_A: &str = "!AIVDM,1,1,,B,H>eq`dA<D6098DE`D0000000000,2*5A";
    const TYPE24_B: &str = "!AIVDM,1,1,,B,H>eq`dDU0000000<1ijkl0104220,0*5E";
    const TYPE1_VDO: &str = "!AIVDO,1,1,,A,13aEOK001swH`N0GRuD9sGvt0000,0*4E";

    fn one(decoder: &mut AivdmDecoder, s: &str) -> DecodedContact {
        let mut out = decoder.process(s).expect("decodes");
        assert_eq!(out.len(), 1, "expected one contact from {s}");
        out.remove(0)
    }

    #[test]
    fn test_type1_position_report() {
        let mut d = AivdmDecoder::new();
        let c = one(&mut d, TYPE1);
        assert_eq!(c.label, "244670316");
        assert_eq!(c.update.mmsi, Some(244670316));
        assert_eq!(c.update.position, Some((41.15, -8.6)));
        assert_eq!(c.update.sog_kts, Some(12.3));
        assert_eq!(c.update.cog_deg, Some(254.1));
        assert_eq!(c.update.heading_deg, Some(255.0));
        assert_eq!(c.update.source, ContactSource::Ais);
    }

    #[test]
    fn test_type3_not_available_values() {
        let mut d = AivdmDecoder::new();
        let c = one(&mut d, TYPE3_NA);
        assert_eq!(c.label, "244670317");
        assert_eq!(c.update.position, None);
        assert_eq!(c.update.sog_kts, None);
        assert_eq!(c.update.cog_deg, None);
        assert_eq!(c.update.heading_deg, None);
    }

    #[test]
    fn test_type5_two_fragments() {
        let mut d = AivdmDecoder::new();
        assert!(d.process(TYPE5_A).unwrap().is_empty());
        assert_eq!(d.pending_fragments(), 1);

        let c = one(&mut d, TYPE5_B);
        assert_eq!(d.pending_fragments(), 0);
        assert_eq!(c.label, "244670316");
        assert_eq!(c.update.name.as_deref(), Some("NORTH STAR"));
        let ship = c.update.ship.unwrap();
        assert_eq!(ship.imo, Some(9123456));
        assert_eq!(ship.callsign.as_deref(), Some("PBAB"));
        assert_eq!(ship.ship_type, Some(70));
        assert_eq!(ship.destination.as_deref(), Some("LEIXOES"));
        assert_eq!(ship.length_m(), Some(150));
        assert_eq!(ship.beam_m(), Some(22));
        assert!(c.update.position.is_none());
    }

    #[test]
    fn test_fragment_out_of_order_is_dropped() {
        let mut d = AivdmDecoder::new();
        assert!(d.process(TYPE5_B).is_err());
        assert_eq!(d.pending_fragments(), 0);
    }

    #[test]
    fn test_type18_class_b() {
        let mut d = AivdmDecoder::new();
        let c = one(&mut d, TYPE18);
        assert_eq!(c.label, "987654321");
        assert_eq!(c.update.position, Some((59.9, 10.5)));
        assert_eq!(c.update.sog_kts, Some(5.5));
        assert_eq!(c.update.cog_deg, Some(90.0));
        assert_eq!(c.update.heading_deg, None);
    }

    #[test]
    fn test_type24_parts() {
        let mut d = AivdmDecoder::new();
        let a = one(&mut d, TYPE24_A);
        assert_eq!(a.update.name.as_deref(), Some("SEA BREEZE"));
        assert!(a.update.ship.is_none());

        let b = one(&mut d, TYPE24_B);
        let ship = b.update.ship.unwrap();
        assert_eq!(ship.ship_type, Some(37));
        assert_eq!(ship.callsign.as_deref(), Some("LA1234"));
        assert_eq!(ship.length_m(), Some(12));
        assert_eq!(ship.beam_m(), Some(4));
    }

    #[test]
    fn test_own_vessel_report() {
        let mut d = AivdmDecoder::new();
        let c = one(&mut d, TYPE1_VDO);
        assert_eq!(c.update.position, Some((41.15, -8.6)));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut d = AivdmDecoder::new();
        let bad = TYPE1.replace("*4C", "*4D");
        assert!(matches!(d.process(&bad), Err(NmeaError::Checksum { .. })));
        assert_eq!(d.messages, 0);
    }

    #[test]
    fn test_non_ais_sentence_unsupported() {
        let mut d = AivdmDecoder::new();
        assert!(matches!(
            d.process("$GPRMC,120000,A"),
            Err(NmeaError::Unsupported(_))
        ));
    }

    #[test]
    fn test_bits_signed() {
        let bits = Bits::from_armor("w", 0).unwrap(); // 111111
        assert_eq!(bits.uint(0, 6), Some(63));
        assert_eq!(bits.int(0, 6), Some(-1));
        assert_eq!(bits.uint(4, 6), None);
    }
}
