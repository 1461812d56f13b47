//! Conversion between Kubernetes storage quantities and byte counts.

use core::error::Error;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const KI: u64 = 1024;
pub const MI: u64 = 1024 * KI;
pub const GI: u64 = 1024 * MI;
pub const TI: u64 = 1024 * GI;

#[derive(Debug, derive_more::Display)]
pub enum QuantityError {
    #[display("Invalid quantity format: {value}")]
    InvalidFormat { value: String },
    #[display("Unsupported quantity suffix: {suffix}")]
    UnsupportedSuffix { suffix: String },
}

impl Error for QuantityError {}

/// Parses a quantity such as `10Gi`, `500M`, `1e9` or `1073741824` into bytes.
pub fn parse_bytes(value: &str) -> Result<u64, Report<QuantityError>> {
    let value = value.trim();

    if let Ok(bytes) = value.parse::<u64>() {
        return Ok(bytes);
    }

    let Some(pos) = value.find(|c: char| c.is_ascii_alphabetic()) else {
        return Err(Report::new(QuantityError::InvalidFormat {
            value: value.to_string(),
        }));
    };
    let (numeric_part, suffix) = value.split_at(pos);

    let numeric_value: f64 = numeric_part
        .parse::<f64>()
        .change_context_lazy(|| QuantityError::InvalidFormat {
            value: value.to_string(),
        })?;
    if numeric_value < 0.0 {
        return Err(Report::new(QuantityError::InvalidFormat {
            value: value.to_string(),
        }));
    }

    let scale = match suffix {
        "Ki" => KI as f64,
        "Mi" => MI as f64,
        "Gi" => GI as f64,
        "Ti" => TI as f64,
        "Pi" => (1024 * TI) as f64,
        "Ei" => (1024 * 1024 * TI) as f64,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => match decimal_exponent(suffix) {
            Some(exponent) => 10_f64.powi(exponent),
            None => {
                return Err(Report::new(QuantityError::UnsupportedSuffix {
                    suffix: suffix.to_string(),
                }));
            }
        },
    };

    let bytes = numeric_value * scale;
    // fractions of a byte round up, like the apiserver does
    if scale < 1.0 {
        return Ok(bytes.ceil() as u64);
    }
    Ok(bytes as u64)
}

/// Exponent of the `1e9` / `1E9` notation, `None` for any other suffix.
fn decimal_exponent(suffix: &str) -> Option<i32> {
    let digits = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    digits.parse().ok()
}

pub fn parse_quantity(quantity: &Quantity) -> Result<u64, Report<QuantityError>> {
    parse_bytes(&quantity.0)
}

/// Formats bytes with the largest binary suffix that divides them exactly.
pub fn format_bytes(bytes: u64) -> Quantity {
    let formatted = [("Ti", TI), ("Gi", GI), ("Mi", MI), ("Ki", KI)]
        .into_iter()
        .find(|(_, unit)| bytes != 0 && bytes % unit == 0)
        .map(|(suffix, unit)| format!("{}{suffix}", bytes / unit))
        .unwrap_or_else(|| bytes.to_string());

    Quantity(formatted)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(parse_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_bytes(" 0 ").unwrap(), 0);
    }

    #[test]
    fn parse_binary_suffixes() {
        assert_eq!(parse_bytes("1Ki").unwrap(), KI);
        assert_eq!(parse_bytes("1Mi").unwrap(), MI);
        assert_eq!(parse_bytes("10Gi").unwrap(), 10 * GI);
        assert_eq!(parse_bytes("1.5Gi").unwrap(), GI + GI / 2);
        assert_eq!(parse_bytes("1Ti").unwrap(), TI);
    }

    #[test]
    fn parse_decimal_suffixes() {
        assert_eq!(parse_bytes("1k").unwrap(), 1000);
        assert_eq!(parse_bytes("5G").unwrap(), 5_000_000_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("Gi").is_err());
        assert!(parse_bytes("10Xi").is_err());
        assert!(parse_bytes("-1Gi").is_err());
        assert!(parse_bytes("1e").is_err());
        assert!(parse_bytes("1ex").is_err());
    }

    #[test]
    fn parse_exponent_notation() {
        assert_eq!(parse_bytes("1e9").unwrap(), 1_000_000_000);
        assert_eq!(parse_bytes("1E3").unwrap(), 1000);
        assert_eq!(parse_bytes("1.5e3").unwrap(), 1500);
        assert_eq!(parse_bytes("2e+3").unwrap(), 2000);
        assert_eq!(parse_bytes("1E").unwrap(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn parse_sub_byte_suffixes_round_up() {
        assert_eq!(parse_bytes("500m").unwrap(), 1);
        assert_eq!(parse_bytes("2000m").unwrap(), 2);
        assert_eq!(parse_bytes("2500m").unwrap(), 3);
        assert_eq!(parse_bytes("0m").unwrap(), 0);
    }

    #[test]
    fn format_picks_largest_exact_unit() {
        assert_eq!(format_bytes(11 * GI), Quantity("11Gi".to_string()));
        assert_eq!(format_bytes(GI + MI), Quantity("1025Mi".to_string()));
        assert_eq!(format_bytes(2 * TI), Quantity("2Ti".to_string()));
        assert_eq!(format_bytes(1000), Quantity("1000".to_string()));
        assert_eq!(format_bytes(0), Quantity("0".to_string()));
    }

    #[test]
    fn format_then_parse_is_stable() {
        let bytes = 7 * GI;
        assert_eq!(parse_quantity(&format_bytes(bytes)).unwrap(), bytes);
    }
}
