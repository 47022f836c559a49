//! Parsing of the relaxed "`<number> <unit>`" memory and CPU frequency
//! strings accepted in host inventory and job manifests.
//!
//! Memory units: `MB`, `GB`, `TB` (default `MB`). CPU units: `MHZ`, `GHZ`,
//! `THZ` (default `MHZ`). Both accept a bare number (interpreted in the
//! default unit) and are case-insensitive.

use super::{Error, Result};

/// Parse a memory string into whole megabytes.
///
/// ```text
/// "512"     -> 512
/// "512 MB"  -> 512
/// "2gb"     -> 2048
/// "1 TB"    -> 1048576
/// ```
pub fn parse_memory_mb(s: &str) -> Result<u64> {
    let (digits, unit) = split_number_unit(s);
    let n: f64 = digits
        .parse()
        .map_err(|_| Error::from(format!("'{}' is not a valid memory value", s)))?;
    let mb = match unit.as_str() {
        "" | "mb" => n,
        "gb" => n * 1024.0,
        "tb" => n * 1024.0 * 1024.0,
        other => bail!("Unknown memory unit '{}' in '{}'", other, s),
    };
    Ok(mb.round() as u64)
}

/// Parse a CPU frequency string into whole megahertz.
pub fn parse_cpu_mhz(s: &str) -> Result<u64> {
    let (digits, unit) = split_number_unit(s);
    let n: f64 = digits
        .parse()
        .map_err(|_| Error::from(format!("'{}' is not a valid CPU value", s)))?;
    let mhz = match unit.as_str() {
        "" | "mhz" => n,
        "ghz" => n * 1000.0,
        "thz" => n * 1000.0 * 1000.0,
        other => bail!("Unknown CPU unit '{}' in '{}'", other, s),
    };
    Ok(mhz.round() as u64)
}

// Split "1.5 GB" / "1.5GB" / "1.5" into its numeric and unit parts,
// lower-casing and trimming the unit for case-insensitive matching.
fn split_number_unit(s: &str) -> (String, String) {
    let s = s.trim();
    let digits: String = s
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    let unit: String = s
        .chars()
        .skip(digits.len())
        .collect::<String>()
        .trim()
        .to_lowercase();
    (digits, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_defaults_to_mb() {
        assert_eq!(parse_memory_mb("512").unwrap(), 512);
        assert_eq!(parse_cpu_mhz("1500").unwrap(), 1500);
    }

    #[test]
    fn units_are_case_insensitive() {
        assert_eq!(parse_memory_mb("2 gb").unwrap(), 2048);
        assert_eq!(parse_memory_mb("2GB").unwrap(), 2048);
        assert_eq!(parse_memory_mb("2 Gb").unwrap(), 2048);
        assert_eq!(parse_cpu_mhz("2 ghz").unwrap(), 2000);
        assert_eq!(parse_cpu_mhz("2GHZ").unwrap(), 2000);
    }

    #[test]
    fn tb_and_thz() {
        assert_eq!(parse_memory_mb("1 TB").unwrap(), 1024 * 1024);
        assert_eq!(parse_cpu_mhz("1 THZ").unwrap(), 1_000_000);
    }

    #[test]
    fn unknown_unit_fails() {
        assert!(parse_memory_mb("4 PB").is_err());
        assert!(parse_cpu_mhz("4 KHZ").is_err());
    }

    #[test]
    fn garbage_number_fails() {
        assert!(parse_memory_mb("abc").is_err());
    }
}
