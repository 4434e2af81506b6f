//! Human-readable size thresholds such as `"10 GB"` or `"500MiB"`.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Threshold used when the config does not set `indexes.larger_than`
pub const DEFAULT_THRESHOLD: &str = "10 GB";

/// A byte count parsed from `"<integer><unit>"`
///
/// Whitespace anywhere in the literal is ignored and units are matched
/// case-insensitively. SI units are powers of 1000, IEC units powers of 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeThreshold(i64);

impl SizeThreshold {
    /// Threshold from a raw byte count
    pub const fn from_bytes(bytes: i64) -> Self {
        Self(bytes)
    }

    /// Byte count, bound as a `bigint` parameter
    pub const fn bytes(self) -> i64 {
        self.0
    }
}

impl Default for SizeThreshold {
    fn default() -> Self {
        Self(10_000_000_000)
    }
}

impl fmt::Display for SizeThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

fn unit_multiplier(unit: &str) -> Option<i64> {
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "b" | "byte" | "bytes" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        "pb" => 1_000_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        "pib" => 1 << 50,
        _ => return None,
    };
    Some(multiplier)
}

impl FromStr for SizeThreshold {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let split = compact
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(compact.len());
        let (digits, unit) = compact.split_at(split);

        if digits.is_empty() {
            return Err(Error::config(format!(
                "invalid size '{s}': expected '<integer><unit>', e.g. '10 GB'"
            )));
        }
        if unit.is_empty() {
            return Err(Error::config(format!(
                "invalid size '{s}': missing unit (B, kB, MB, GB, TB, PB, KiB, MiB, GiB, TiB, PiB)"
            )));
        }

        let magnitude: i64 = digits
            .parse()
            .map_err(|_| Error::config(format!("invalid size '{s}': number out of range")))?;
        let multiplier = unit_multiplier(unit)
            .ok_or_else(|| Error::config(format!("invalid size '{s}': unknown unit '{unit}'")))?;

        magnitude
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| Error::config(format!("invalid size '{s}': value overflows")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ten_gigabytes() {
        let parsed: SizeThreshold = DEFAULT_THRESHOLD.parse().unwrap();
        assert_eq!(parsed.bytes(), 10_000_000_000);
        assert_eq!(parsed, SizeThreshold::default());
    }

    #[test]
    fn test_whitespace_is_ignored() {
        let spaced: SizeThreshold = "500 MB".parse().unwrap();
        let compact: SizeThreshold = "500MB".parse().unwrap();
        assert_eq!(spaced, compact);
        assert_eq!(compact.bytes(), 500_000_000);
        assert_eq!(" 1 0 kB ".parse::<SizeThreshold>().unwrap().bytes(), 10_000);
    }

    #[test]
    fn test_units() {
        let cases = [
            ("7B", 7),
            ("7 bytes", 7),
            ("1 byte", 1),
            ("2kB", 2_000),
            ("2KB", 2_000),
            ("3 TB", 3_000_000_000_000),
            ("1 PB", 1_000_000_000_000_000),
            ("1KiB", 1_024),
            ("8 MiB", 8 * 1_048_576),
            ("1 gib", 1_073_741_824),
            ("2 TiB", 2 * 1_099_511_627_776),
            ("1PiB", 1_125_899_906_842_624),
        ];
        for (input, expected) in cases {
            assert_eq!(
                input.parse::<SizeThreshold>().unwrap().bytes(),
                expected,
                "{input}"
            );
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!("".parse::<SizeThreshold>().is_err());
        assert!("GB".parse::<SizeThreshold>().is_err());
        assert!("10".parse::<SizeThreshold>().is_err());
        assert!("10 parsecs".parse::<SizeThreshold>().is_err());
        assert!("-5 GB".parse::<SizeThreshold>().is_err());
        assert!("1.5 GB".parse::<SizeThreshold>().is_err());
        assert!("99999 PB".parse::<SizeThreshold>().is_err());
        assert!("99999999999999999999 B".parse::<SizeThreshold>().is_err());
    }
}
