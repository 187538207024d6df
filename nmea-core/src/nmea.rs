//! NMEA 0183 sentence helpers and the specialized sentence decoders.
//!
//! Handles:
//! - `$--TLL`: target latitude/longitude (standard and split-decimal layouts)
//! - `$--GGA`: GPS fix for own ship
//! - `$--HDT`: own-ship true heading
//! - `$--TTM`: radar tracked target (range/bearing from own ship)
//!
//! Everything else carrying a prefix is handed to the AIS decoder by the
//! dispatcher.

use crate::geo;
use crate::types::*;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Route chosen for a framed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceKind {
    Tll,
    Gga,
    Hdt,
    Ttm,
    /// Any other prefixed sentence; goes to the AIS decoder.
    Ais,
    /// Un-prefixed line; goes to the CSV contact parser.
    Csv,
}

impl std::fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SentenceKind::Tll => "TLL",
            SentenceKind::Gga => "GGA",
            SentenceKind::Hdt => "HDT",
            SentenceKind::Ttm => "TTM",
            SentenceKind::Ais => "AIS",
            SentenceKind::Csv => "CSV",
        };
        f.write_str(s)
    }
}

/// Sentence type token: everything up to the first field delimiter,
/// prefix included (`"$GPGGA"`, `"$A-TLL"`, `"!AIVDM"`).
pub fn sentence_type(s: &str) -> &str {
    let end = s.find([',', '*']).unwrap_or(s.len());
    &s[..end]
}

/// Classify a trimmed line.
pub fn classify(s: &str) -> SentenceKind {
    if !has_sentence_prefix(s) {
        return SentenceKind::Csv;
    }
    let token = sentence_type(s);
    if !token.starts_with('$') || token.len() < 4 {
        return SentenceKind::Ais;
    }
    // Tokens come from lossily decoded bytes; match on the suffix rather
    // than slicing at a byte offset.
    [
        ("TLL", SentenceKind::Tll),
        ("GGA", SentenceKind::Gga),
        ("HDT", SentenceKind::Hdt),
        ("TTM", SentenceKind::Ttm),
    ]
    .into_iter()
    .find_map(|(suffix, kind)| token.ends_with(suffix).then_some(kind))
    .unwrap_or(SentenceKind::Ais)
}

// ---------------------------------------------------------------------------
// Checksum and field splitting
// ---------------------------------------------------------------------------

/// XOR of all bytes in `body`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Strip and verify an optional `*hh` suffix.
///
/// Returns the sentence without the checksum. Sentences without a `*` are
/// accepted as-is; some tracking sources never send one.
pub fn strip_checksum(s: &str) -> Result<&str> {
    let s = s.trim();
    let Some(star) = s.rfind('*') else {
        return Ok(s);
    };
    let (data, tail) = (&s[..star], &s[star + 1..]);
    let hex = tail.get(..2).unwrap_or(tail);
    let expected = u8::from_str_radix(hex, 16)
        .map_err(|_| NmeaError::Malformed(format!("bad checksum digits '{tail}'")))?;
    let actual = checksum(data.get(1..).unwrap_or(""));
    if expected != actual {
        return Err(NmeaError::Checksum { expected, actual });
    }
    Ok(data)
}

/// Verify the checksum and split into comma-separated fields.
/// Field 0 is the type token.
pub fn fields(s: &str) -> Result<Vec<&str>> {
    let data = strip_checksum(s)?;
    if data.is_empty() {
        return Err(NmeaError::Empty);
    }
    Ok(data.split(',').collect())
}

fn field<'a>(f: &[&'a str], idx: usize, name: &'static str) -> Result<&'a str> {
    match f.get(idx).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(NmeaError::MissingField(name)),
    }
}

fn opt_field<'a>(f: &[&'a str], idx: usize) -> Option<&'a str> {
    f.get(idx).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Numeric field. `NaN` and `inf` parse as `f64` but are never valid data.
fn parse_f64(value: &str, name: &'static str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| NmeaError::Malformed(format!("{name}: '{value}'")))
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Convert an NMEA `ddmm.mmmm` / `dddmm.mmmm` value plus hemisphere letter
/// to signed decimal degrees.
pub fn parse_coordinate(value: &str, hemisphere: &str, is_lat: bool) -> Result<f64> {
    let raw = parse_f64(value, "coordinate")?;
    if raw < 0.0 {
        return Err(NmeaError::InvalidCoordinate(value.to_string()));
    }
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let magnitude = degrees + minutes / 60.0;

    let sign = match (hemisphere, is_lat) {
        ("N", true) | ("E", false) => 1.0,
        ("S", true) | ("W", false) => -1.0,
        _ => {
            return Err(NmeaError::InvalidCoordinate(format!(
                "{value},{hemisphere}"
            )))
        }
    };

    let limit = if is_lat { 90.0 } else { 180.0 };
    if magnitude > limit {
        return Err(NmeaError::InvalidCoordinate(format!("{value},{hemisphere}")));
    }
    Ok(sign * magnitude)
}

fn is_lat_hemisphere(s: &str) -> bool {
    matches!(s.trim(), "N" | "S")
}

// ---------------------------------------------------------------------------
// TLL: target latitude and longitude
// ---------------------------------------------------------------------------

/// Decode a TLL report into a contact delta.
///
/// Two layouts are in use: the standard one with `llll.ll` in a single
/// field, and one where integer and fractional parts are separate fields
/// (`$A-TLL,01,123,4567,N,00987,6543,W,NAME,...`).
pub fn decode_tll(s: &str) -> Result<DecodedContact> {
    let f = fields(s)?;
    let target = field(&f, 1, "target number")?;

    let (lat, lon, name_idx) = if f.get(3).is_some_and(|v| is_lat_hemisphere(v)) {
        let lat = parse_coordinate(field(&f, 2, "latitude")?, field(&f, 3, "N/S")?, true)?;
        let lon = parse_coordinate(field(&f, 4, "longitude")?, field(&f, 5, "E/W")?, false)?;
        (lat, lon, 6)
    } else if f.get(4).is_some_and(|v| is_lat_hemisphere(v)) {
        let lat_text = format!("{}.{}", field(&f, 2, "latitude")?, field(&f, 3, "latitude")?);
        let lon_text = format!("{}.{}", field(&f, 5, "longitude")?, field(&f, 6, "longitude")?);
        let lat = parse_coordinate(&lat_text, field(&f, 4, "N/S")?, true)?;
        let lon = parse_coordinate(&lon_text, field(&f, 7, "E/W")?, false)?;
        (lat, lon, 8)
    } else {
        return Err(NmeaError::Malformed(format!("unrecognized TLL layout: {s}")));
    };

    let name = opt_field(&f, name_idx);
    let label = match name {
        Some(n) => n.to_string(),
        None => format!("TLL-{target}"),
    };

    let mut update = ContactUpdate::new(ContactSource::Tll).with_position(lat, lon);
    update.name = name.map(str::to_string);
    Ok(DecodedContact::new(label, update))
}

// ---------------------------------------------------------------------------
// GGA: GPS fix
// ---------------------------------------------------------------------------

/// Own-ship GPS fix.
#[derive(Debug, Clone, PartialEq)]
pub struct GgaFix {
    pub lat: f64,
    pub lon: f64,
    pub quality: u8,
    pub satellites: Option<u8>,
    pub altitude_m: Option<f64>,
}

pub fn decode_gga(s: &str) -> Result<GgaFix> {
    let f = fields(s)?;
    let quality = opt_field(&f, 6)
        .and_then(|q| q.parse::<u8>().ok())
        .unwrap_or(0);
    if quality == 0 || opt_field(&f, 2).is_none() || opt_field(&f, 4).is_none() {
        return Err(NmeaError::NoFix);
    }

    let lat = parse_coordinate(field(&f, 2, "latitude")?, field(&f, 3, "N/S")?, true)?;
    let lon = parse_coordinate(field(&f, 4, "longitude")?, field(&f, 5, "E/W")?, false)?;

    Ok(GgaFix {
        lat,
        lon,
        quality,
        satellites: opt_field(&f, 7).and_then(|v| v.parse().ok()),
        altitude_m: opt_field(&f, 9).and_then(|v| v.parse().ok()),
    })
}

// ---------------------------------------------------------------------------
// HDT: true heading
// ---------------------------------------------------------------------------

pub fn decode_hdt(s: &str) -> Result<f64> {
    let f = fields(s)?;
    let heading = parse_f64(field(&f, 1, "heading")?, "heading")?;
    if !(0.0..=360.0).contains(&heading) {
        return Err(NmeaError::Malformed(format!("heading out of range: {heading}")));
    }
    Ok(geo::normalize_deg(heading))
}

// ---------------------------------------------------------------------------
// TTM: tracked target message
// ---------------------------------------------------------------------------

/// Radar tracked target, expressed relative to own ship.
#[derive(Debug, Clone, PartialEq)]
pub struct TtmTarget {
    pub number: String,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub bearing_relative: bool,
    pub speed_kts: Option<f64>,
    pub course_deg: Option<f64>,
    pub course_relative: bool,
    pub name: Option<String>,
    pub status: Option<char>,
}

impl TtmTarget {
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => format!("TTM-{}", self.number),
        }
    }

    /// Build the contact delta, placing the target from own ship when the
    /// own-ship fix (and, for relative bearings, heading) is known.
    pub fn resolve(&self, own_ship: Option<&Contact>) -> DecodedContact {
        let own_heading = own_ship.and_then(|c| c.heading_deg);
        let to_true = |angle: f64, relative: bool| -> Option<f64> {
            if relative {
                own_heading.map(|h| geo::normalize_deg(angle + h))
            } else {
                Some(geo::normalize_deg(angle))
            }
        };

        let mut update = ContactUpdate::new(ContactSource::Ttm);
        update.sog_kts = self.speed_kts;
        update.cog_deg = self
            .course_deg
            .and_then(|c| to_true(c, self.course_relative));
        update.name = self.name.clone();

        if let (Some((lat, lon)), Some(bearing)) = (
            own_ship.and_then(Contact::position),
            to_true(self.bearing_deg, self.bearing_relative),
        ) {
            let (tlat, tlon) = geo::destination(lat, lon, bearing, self.distance_m);
            update.position = Some((tlat, tlon));
        }

        DecodedContact::new(self.label(), update)
    }
}

/// Distance unit letter to metres per unit.
fn unit_to_meters(unit: &str) -> Result<f64> {
    match unit {
        "N" => Ok(geo::METERS_PER_NM),
        "K" => Ok(1000.0),
        "S" => Ok(1609.344),
        other => Err(NmeaError::Malformed(format!("unknown TTM unit '{other}'"))),
    }
}

pub fn decode_ttm(s: &str) -> Result<TtmTarget> {
    let f = fields(s)?;
    let number = field(&f, 1, "target number")?.to_string();
    let distance = parse_f64(field(&f, 2, "distance")?, "distance")?;
    let bearing = parse_f64(field(&f, 3, "bearing")?, "bearing")?;
    let unit = opt_field(&f, 10).unwrap_or("N");
    let meters_per_unit = unit_to_meters(unit)?;

    // Speed is given per hour in the same unit as distance.
    let speed_kts = opt_field(&f, 5)
        .map(|v| parse_f64(v, "speed"))
        .transpose()?
        .map(|v| v * meters_per_unit / geo::METERS_PER_NM);
    let course_deg = opt_field(&f, 6)
        .map(|v| parse_f64(v, "course"))
        .transpose()?;

    Ok(TtmTarget {
        number,
        distance_m: distance * meters_per_unit,
        bearing_deg: bearing,
        bearing_relative: opt_field(&f, 4) == Some("R"),
        speed_kts,
        course_deg,
        course_relative: opt_field(&f, 7) == Some("R"),
        name: opt_field(&f, 11).map(str::to_string),
        status: opt_field(&f, 12).and_then(|v| v.chars().next()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str =
        "$GPGGA,120000.00,4110.0000,N,00840.0000,W,1,08,0.9,10.0,M,50.0,M,,*40";
    const TTM: &str =
        "$RATTM,07,2.0,090.0,T,12.5,180.0,T,0.5,10.0,N,RADAR7,T,,120000.00,A*70";

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_sentence_type() {
        assert_eq!(sentence_type("$A-TLL,01,2"), "$A-TLL");
        assert_eq!(sentence_type("!AIVDM,1,1"), "!AIVDM");
        assert_eq!(sentence_type("$GPHDT*03"), "$GPHDT");
        assert_eq!(sentence_type("$GPHDT"), "$GPHDT");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("$A-TLL,01"), SentenceKind::Tll);
        assert_eq!(classify("$B-TLL,01"), SentenceKind::Tll);
        assert_eq!(classify("$GPGGA,1"), SentenceKind::Gga);
        assert_eq!(classify("$GNGGA,1"), SentenceKind::Gga);
        assert_eq!(classify("$RATTM,1"), SentenceKind::Ttm);
        assert_eq!(classify("$GPHDT,1"), SentenceKind::Hdt);
        assert_eq!(classify("!AIVDM,1"), SentenceKind::Ais);
        assert_eq!(classify("$GPRMC,1"), SentenceKind::Ais);
        assert_eq!(classify("AIS,Node_Name=X"), SentenceKind::Csv);
    }

    #[test]
    fn test_classify_non_ascii_token() {
        assert_eq!(classify("$\u{FFFD}B,1"), SentenceKind::Ais);
        assert_eq!(classify("$\u{FFFD}\u{FFFD},1"), SentenceKind::Ais);
        assert_eq!(classify("$é-TLL,01"), SentenceKind::Tll);
        assert_eq!(classify("!\u{FFFD}"), SentenceKind::Ais);
    }

    #[test]
    fn test_checksum_valid_and_invalid() {
        assert_eq!(strip_checksum("$GPHDT,274.07,T*03").unwrap(), "$GPHDT,274.07,T");
        assert!(matches!(
            strip_checksum("$GPHDT,274.07,T*04"),
            Err(NmeaError::Checksum { expected: 0x04, actual: 0x03 })
        ));
        assert_eq!(strip_checksum("$GPHDT,274.07,T").unwrap(), "$GPHDT,274.07,T");
        assert!(strip_checksum("$GPHDT,274.07,T*ZZ").is_err());
    }

    #[test]
    fn test_parse_coordinate() {
        assert!(approx(parse_coordinate("4110.0000", "N", true).unwrap(), 41.0 + 10.0 / 60.0));
        assert!(approx(parse_coordinate("00840.0000", "W", false).unwrap(), -(8.0 + 40.0 / 60.0)));
        assert!(parse_coordinate("4110.0", "E", true).is_err());
        assert!(parse_coordinate("9500.0", "N", true).is_err());
        assert!(parse_coordinate("abc", "N", true).is_err());
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        assert!(parse_coordinate("NaN", "N", true).is_err());
        assert!(parse_coordinate("inf", "E", false).is_err());
        assert!(decode_tll("$GPTLL,02,NaN,N,00987.6543,W,BAD,,,").is_err());
        assert!(decode_tll("$A-TLL,01,NaN,0,N,00987,6543,W,BAD,,,").is_err());
        assert!(decode_hdt("$GPHDT,NaN,T").is_err());
        assert!(decode_ttm("$RATTM,07,NaN,090.0,T,,,T,,,N,,T,,,A").is_err());
        assert!(decode_ttm("$RATTM,07,1.0,inf,T,,,T,,,N,,T,,,A").is_err());
        assert!(decode_ttm("$RATTM,07,1.0,090.0,T,NaN,,T,,,N,,T,,,A").is_err());
    }

    #[test]
    fn test_tll_split_decimal_layout() {
        let c = decode_tll("$A-TLL,01,123,4567,N,00987,6543,W,VESSEL1,,,").unwrap();
        assert_eq!(c.label, "VESSEL1");
        let (lat, lon) = c.update.position.unwrap();
        assert!(approx(lat, 1.0 + 23.4567 / 60.0));
        assert!(approx(lon, -(9.0 + 87.6543 / 60.0)));
        assert_eq!(c.update.source, ContactSource::Tll);
    }

    #[test]
    fn test_tll_standard_layout() {
        let c = decode_tll("$RATLL,03,4110.500,N,00840.250,W,BUOY,120000.00,T,").unwrap();
        assert_eq!(c.label, "BUOY");
        let (lat, lon) = c.update.position.unwrap();
        assert!(approx(lat, 41.0 + 10.5 / 60.0));
        assert!(approx(lon, -(8.0 + 40.25 / 60.0)));
    }

    #[test]
    fn test_tll_unnamed_target_uses_number() {
        let c = decode_tll("$B-TLL,12,123,4567,S,00987,6543,E,,,,").unwrap();
        assert_eq!(c.label, "TLL-12");
        assert!(c.update.name.is_none());
        assert!(c.update.position.unwrap().0 < 0.0);
    }

    #[test]
    fn test_tll_malformed() {
        assert!(decode_tll("$A-TLL,01").is_err());
        assert!(decode_tll("$A-TLL,01,xx,yy,Q,zz").is_err());
    }

    #[test]
    fn test_gga() {
        let fix = decode_gga(GGA).unwrap();
        assert!(approx(fix.lat, 41.0 + 10.0 / 60.0));
        assert!(approx(fix.lon, -(8.0 + 40.0 / 60.0)));
        assert_eq!(fix.quality, 1);
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.altitude_m, Some(10.0));
    }

    #[test]
    fn test_gga_without_fix() {
        assert!(matches!(
            decode_gga("$GPGGA,120000.00,,,,,0,00,,,M,,M,,*4B"),
            Err(NmeaError::NoFix)
        ));
    }

    #[test]
    fn test_hdt() {
        assert!(approx(decode_hdt("$GPHDT,274.07,T*03").unwrap(), 274.07));
        assert!(decode_hdt("$GPHDT,,T").is_err());
        assert!(decode_hdt("$GPHDT,400,T").is_err());
    }

    #[test]
    fn test_ttm_decode() {
        let t = decode_ttm(TTM).unwrap();
        assert_eq!(t.number, "07");
        assert!(approx(t.distance_m, 2.0 * geo::METERS_PER_NM));
        assert_eq!(t.bearing_deg, 90.0);
        assert!(!t.bearing_relative);
        assert_eq!(t.speed_kts, Some(12.5));
        assert_eq!(t.course_deg, Some(180.0));
        assert_eq!(t.label(), "RADAR7");
        assert_eq!(t.status, Some('T'));
    }

    #[test]
    fn test_ttm_resolve_with_own_ship() {
        let t = decode_ttm(TTM).unwrap();
        let mut own = Contact::new("own-ship", ContactSource::Gga, 1.0);
        own.lat = 41.0;
        own.lon = -8.0;

        let c = t.resolve(Some(&own));
        let (lat, lon) = c.update.position.unwrap();
        assert!((lat - 41.0).abs() < 1e-3);
        assert!(lon > -8.0);
        let d = geo::distance_m(41.0, -8.0, lat, lon);
        assert!((d - 2.0 * geo::METERS_PER_NM).abs() < 1.0);
    }

    #[test]
    fn test_ttm_resolve_without_own_ship() {
        let t = decode_ttm(TTM).unwrap();
        let c = t.resolve(None);
        assert!(c.update.position.is_none());
        assert_eq!(c.update.cog_deg, Some(180.0));
    }

    #[test]
    fn test_ttm_relative_bearing_needs_heading() {
        let t = decode_ttm("$RATTM,08,1.0,010.0,R,10.0,020.0,R,,,K,,T,,,A").unwrap();
        assert!(t.bearing_relative && t.course_relative);
        // km/h to knots
        assert!(approx(t.speed_kts.unwrap(), 10.0 * 1000.0 / geo::METERS_PER_NM));

        let mut own = Contact::new("own-ship", ContactSource::Gga, 1.0);
        own.lat = 41.0;
        own.lon = -8.0;
        assert!(t.resolve(Some(&own)).update.position.is_none());

        own.heading_deg = Some(350.0);
        let c = t.resolve(Some(&own));
        assert!(c.update.position.is_some());
        assert_eq!(c.update.cog_deg, Some(10.0));
        assert_eq!(c.label, "TTM-08");
    }
}
