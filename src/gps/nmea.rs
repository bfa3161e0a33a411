// src/gps/nmea.rs
//! NMEA sentence parsing

use super::data::Fix;

/// User equivalent range error used to turn HDOP into meters
pub const UERE_METERS: f64 = 5.0;

/// Outcome of parsing one NMEA sentence.
#[derive(Debug, Clone, PartialEq)]
pub enum NmeaSentence {
    /// A GGA sentence with a valid position
    Fix(Fix),
    /// The receiver reports it has no fix
    NoFix,
    /// Anything else, including sentences with a bad checksum
    Ignored,
}

/// Parse a single NMEA sentence.
///
/// Fixes are stamped with the time of parsing; GGA only carries a time of day.
pub fn parse_nmea_sentence(line: &str) -> NmeaSentence {
    let line = line.trim();
    if !checksum_ok(line) {
        return NmeaSentence::Ignored;
    }

    let body = line.split('*').next().unwrap_or(line);
    let parts: Vec<&str> = body.split(',').collect();

    if line.starts_with("$GPGGA") || line.starts_with("$GNGGA") {
        parse_gga(&parts)
    } else if line.starts_with("$GPRMC") || line.starts_with("$GNRMC") {
        parse_rmc(&parts)
    } else {
        NmeaSentence::Ignored
    }
}

/// Verify the `*hh` checksum when one is present.
fn checksum_ok(line: &str) -> bool {
    let Some(payload) = line.strip_prefix('$') else {
        return false;
    };
    match payload.split_once('*') {
        Some((data, checksum)) => {
            let computed = data.bytes().fold(0u8, |acc, b| acc ^ b);
            u8::from_str_radix(checksum.trim(), 16).map_or(false, |expected| expected == computed)
        }
        None => true,
    }
}

/// Convert `ddmm.mmmm` plus hemisphere into signed decimal degrees.
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => Some(-decimal),
        "N" | "E" => Some(decimal),
        _ => None,
    }
}

/// Parse GGA (Global Positioning System Fix Data) sentence
fn parse_gga(parts: &[&str]) -> NmeaSentence {
    if parts.len() < 10 {
        return NmeaSentence::Ignored;
    }

    // Fix quality (field 6)
    match parts[6].parse::<u8>() {
        Ok(0) | Err(_) => return NmeaSentence::NoFix,
        Ok(_) => {}
    }

    // Latitude (fields 2, 3) and longitude (fields 4, 5)
    let (Some(latitude), Some(longitude)) = (
        parse_coordinate(parts[2], parts[3]),
        parse_coordinate(parts[4], parts[5]),
    ) else {
        return NmeaSentence::NoFix;
    };

    // HDOP (field 8)
    let hdop = parts[8].parse::<f64>().unwrap_or(1.0);
    let mut fix = Fix::now(latitude, longitude, hdop * UERE_METERS);

    // Altitude (field 9)
    if let Ok(alt) = parts[9].parse::<f64>() {
        fix = fix.with_altitude(alt);
    }

    NmeaSentence::Fix(fix)
}

/// Parse RMC (Recommended Minimum) sentence; only its status is used
fn parse_rmc(parts: &[&str]) -> NmeaSentence {
    if parts.len() < 3 {
        return NmeaSentence::Ignored;
    }

    // Status (field 2): A = active, V = void
    if parts[2] == "V" {
        NmeaSentence::NoFix
    } else {
        NmeaSentence::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gga_parsing() {
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

        let NmeaSentence::Fix(fix) = parse_nmea_sentence(gga) else {
            panic!("expected a fix");
        };
        assert!((fix.latitude - 48.1173).abs() < 0.0001);
        assert!((fix.longitude - 11.516_667).abs() < 0.0001);
        assert_eq!(fix.altitude, Some(545.4));
        assert!((fix.accuracy_meters - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let parts = ["$GPGGA", "123519", "3352.128", "S", "15112.558", "W", "1", "08", "0.9", "10.0"];
        let NmeaSentence::Fix(fix) = parse_gga(&parts) else {
            panic!("expected a fix");
        };
        assert!(fix.latitude < -33.8);
        assert!(fix.longitude < -151.2);
    }

    #[test]
    fn test_no_fix_sentences() {
        assert_eq!(
            parse_nmea_sentence("$GPGGA,123519,,,,,0,00,,,M,,M,,*6B"),
            NmeaSentence::NoFix
        );
        assert_eq!(
            parse_nmea_sentence("$GPRMC,123519,V,,,,,,,230394,,*33"),
            NmeaSentence::NoFix
        );
    }

    #[test]
    fn test_active_rmc_is_ignored() {
        let rmc = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        assert_eq!(parse_nmea_sentence(rmc), NmeaSentence::Ignored);
    }

    #[test]
    fn test_bad_checksum() {
        let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48";
        assert_eq!(parse_nmea_sentence(gga), NmeaSentence::Ignored);
    }

    #[test]
    fn test_invalid_sentence() {
        assert_eq!(parse_nmea_sentence("$INVALID,123,456"), NmeaSentence::Ignored);
        assert_eq!(parse_nmea_sentence("garbage"), NmeaSentence::Ignored);
    }
}
