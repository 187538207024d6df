//! Un-prefixed contact records: `TYPE,key=value,key=value,...`.
//!
//! Only `AIS` records describe a contact. Keys are matched
//! case-insensitively; unknown keys are ignored.

use crate::types::*;

/// Parse one un-prefixed line into a contact delta.
pub fn decode_record(line: &str) -> Result<DecodedContact> {
    let line = line.trim();
    if line.is_empty() {
        return Err(NmeaError::Empty);
    }

    let mut parts = line.split(',');
    let kind = parts.next().unwrap_or_default().trim();
    if !kind.eq_ignore_ascii_case("AIS") {
        return Err(NmeaError::Unsupported(kind.to_string()));
    }

    let mut update = ContactUpdate::new(ContactSource::Csv);
    let mut name: Option<String> = None;
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;

    for part in parts {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "node_name" | "name" => name = Some(value.to_string()),
            "mmsi" => update.mmsi = Some(parse_num(value, "MMSI")?),
            "latitude" | "lat" => lat = Some(parse_float(value, "latitude")?),
            "longitude" | "lon" => lon = Some(parse_float(value, "longitude")?),
            "speed" | "sog" => update.sog_kts = Some(parse_float(value, "speed")?),
            "course" | "cog" => update.cog_deg = Some(parse_float(value, "course")?),
            "heading" | "hdg" => update.heading_deg = Some(parse_float(value, "heading")?),
            "type" => {
                let ship_type: u8 = parse_num(value, "type")?;
                update.ship = Some(ShipStatic {
                    ship_type: Some(ship_type),
                    ..Default::default()
                });
            }
            _ => {}
        }
    }

    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(NmeaError::InvalidCoordinate(format!("{lat},{lon}")));
            }
            update.position = Some((lat, lon));
        }
        (None, None) => {}
        _ => return Err(NmeaError::MissingField("latitude/longitude pair")),
    }

    let label = match (&name, update.mmsi) {
        (Some(n), _) => n.clone(),
        (None, Some(mmsi)) => mmsi.to_string(),
        (None, None) => return Err(NmeaError::MissingField("name or MMSI")),
    };
    update.name = name;

    Ok(DecodedContact::new(label, update))
}

fn parse_num<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| NmeaError::Malformed(format!("{name}: '{value}'")))
}

fn parse_float(value: &str, name: &str) -> Result<f64> {
    let v: f64 = parse_num(value, name)?;
    if !v.is_finite() {
        return Err(NmeaError::Malformed(format!("{name}: '{value}'")));
    }
    Ok(v)
}
