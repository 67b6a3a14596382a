//! Price and identifier normalization.
//!
//! Vendor quotes and scraped listings carry prices in every format a
//! human can type: currency symbols, thousands separators, European
//! comma-decimals, doubled decimal points. [`parse_price`] reduces all
//! of them to an exact two-decimal [`Decimal`] and never fails; a value
//! that cannot be salvaged becomes `0.00` so one bad line never aborts
//! a whole quote.
//!
//! [`normalize_identifier`] produces the canonical form of a part
//! number used for equality comparison. The canonical form is never
//! stored or displayed.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Parse a messy price string into a non-negative two-decimal value.
/// Unparseable input yields `0.00`.
pub fn parse_price(raw: &str) -> Decimal {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',').collect();
    if cleaned.is_empty() {
        return zero_price();
    }

    // Doubled decimal points are a common OCR artifact
    let mut s = cleaned;
    while s.contains("..") {
        s = s.replace("..", ".");
    }

    let has_comma = s.contains(',');
    let has_dot = s.contains('.');

    let normalized = if has_comma && has_dot {
        // The separator appearing last is the decimal point
        let last_comma = s.rfind(',').unwrap_or(0);
        let last_dot = s.rfind('.').unwrap_or(0);
        if last_comma > last_dot {
            s.replace('.', "").replace(',', ".")
        } else {
            s.replace(',', "")
        }
    } else if has_comma {
        disambiguate_separator(&s, ',')
    } else if has_dot {
        // Multiple dots with no commas: keep the last as the decimal point
        if s.matches('.').count() > 1 {
            let last = s.rfind('.').unwrap_or(0);
            let mut rebuilt = String::with_capacity(s.len());
            for (i, c) in s.char_indices() {
                if c != '.' || i == last {
                    rebuilt.push(c);
                }
            }
            s = rebuilt;
        }
        disambiguate_separator(&s, '.')
    } else {
        s
    };

    // A bare trailing or leading point confuses the decimal parser
    let normalized = normalized.trim_end_matches('.');
    let normalized = if normalized.starts_with('.') {
        format!("0{normalized}")
    } else {
        normalized.to_string()
    };

    match Decimal::from_str(&normalized) {
        Ok(v) => {
            let mut rounded = v.abs().round_dp(2);
            rounded.rescale(2);
            rounded
        }
        Err(_) => zero_price(),
    }
}

/// Decide whether the trailing separator is a decimal point or a
/// thousands separator: two or fewer digits after it means decimal.
fn disambiguate_separator(s: &str, sep: char) -> String {
    let last = match s.rfind(sep) {
        Some(pos) => pos,
        None => return s.to_string(),
    };
    let digits_after = s[last + 1..].chars().filter(|c| c.is_ascii_digit()).count();
    if digits_after <= 2 {
        let mut rebuilt = String::with_capacity(s.len());
        for (i, c) in s.char_indices() {
            if c == sep {
                if i == last {
                    rebuilt.push('.');
                }
            } else {
                rebuilt.push(c);
            }
        }
        rebuilt
    } else {
        s.chars().filter(|c| *c != sep).collect()
    }
}

pub(crate) fn zero_price() -> Decimal {
    Decimal::new(0, 2)
}

/// Canonical identifier form: uppercase with separators stripped.
/// Idempotent, so already-canonical input passes through unchanged.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '-' && *c != '_' && *c != ' ')
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_price_currency_and_thousands() {
        assert_eq!(parse_price("$1,299.99"), dec("1299.99"));
        assert_eq!(parse_price("USD 12,345.00"), dec("12345.00"));
    }

    #[test]
    fn test_parse_price_doubled_decimal() {
        assert_eq!(parse_price("99..99"), dec("99.99"));
        assert_eq!(parse_price("1..5"), dec("1.5"));
    }

    #[test]
    fn test_parse_price_european_comma() {
        assert_eq!(parse_price("99,99"), dec("99.99"));
        assert_eq!(parse_price("€1.234,56"), dec("1234.56"));
    }

    #[test]
    fn test_parse_price_comma_thousands_only() {
        assert_eq!(parse_price("1,299"), dec("1299.00"));
        assert_eq!(parse_price("12,95"), dec("12.95"));
    }

    #[test]
    fn test_parse_price_dot_thousands_only() {
        assert_eq!(parse_price("1.299"), dec("1299.00"));
        assert_eq!(parse_price("1.234.567"), dec("1234567.00"));
    }

    #[test]
    fn test_parse_price_unparseable_is_zero() {
        assert_eq!(parse_price(""), dec("0.00"));
        assert_eq!(parse_price("call for pricing"), dec("0.00"));
        assert_eq!(parse_price("n/a"), dec("0.00"));
        assert_eq!(parse_price(".,"), dec("0.00"));
    }

    #[test]
    fn test_parse_price_never_negative() {
        assert_eq!(parse_price("-42.50"), dec("42.50"));
    }

    #[test]
    fn test_parse_price_always_two_decimals() {
        assert_eq!(parse_price("5").to_string(), "5.00");
        assert_eq!(parse_price("3.1").to_string(), "3.10");
    }

    #[test]
    fn test_normalize_identifier_strips_separators() {
        assert_eq!(normalize_identifier("abc-123"), "ABC123");
        assert_eq!(normalize_identifier("dL_38 90"), "DL3890");
        assert_eq!(normalize_identifier("  b08738d39l "), "B08738D39L");
    }

    #[test]
    fn test_normalize_identifier_idempotent() {
        for raw in ["abc-123", "DL2720-B GRD", "x_y_z", "", "ALREADY"] {
            let once = normalize_identifier(raw);
            assert_eq!(normalize_identifier(&once), once);
        }
    }
}
