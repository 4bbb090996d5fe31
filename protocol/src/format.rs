//! # Presentation Formatting
//!
//! Pure functions from raw on-chain integers (and the odd float) to display
//! strings. Thousands are grouped with `,`, fractions are truncated rather
//! than rounded so a displayed balance never exceeds the real one, and
//! anything unparseable falls back to its input instead of panicking.
//!
//! ```text
//! format_amount(123456789, 6)      -> "123.45"
//! format_amount(1_234_567_000, 3)  -> "1,234,567.00"
//! format_fixed9(1_100_000_000)     -> "1.1000"
//! format_percent(4.257)            -> "4.26%"
//! ```

/// Display placeholder for a value that has never been observed.
pub const UNKNOWN: &str = "-";

/// Inserts `,` every three digits from the right. Expects ASCII digits.
pub fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Renders `raw / 10^decimals` with exactly `frac_digits` fractional digits,
/// truncating any beyond that.
pub fn format_units(raw: u128, decimals: u8, frac_digits: usize) -> String {
    let digits = raw.to_string();
    let decimals = decimals as usize;

    let (int_part, frac_part) = if digits.len() > decimals {
        let (i, f) = digits.split_at(digits.len() - decimals);
        (i.to_string(), f.to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    let mut frac: String = frac_part.chars().take(frac_digits).collect();
    while frac.len() < frac_digits {
        frac.push('0');
    }

    if frac.is_empty() {
        group_thousands(&int_part)
    } else {
        format!("{}.{}", group_thousands(&int_part), frac)
    }
}

/// Asset amount with two fractional digits.
pub fn format_amount(raw: u128, decimals: u8) -> String {
    format_units(raw, decimals, 2)
}

/// Like [`format_amount`] but for a raw integer still in string form.
/// Unparseable input is returned unchanged.
pub fn format_raw_str(raw: &str, decimals: u8) -> String {
    match raw.trim().parse::<u128>() {
        Ok(value) => format_amount(value, decimals),
        Err(_) => raw.to_string(),
    }
}

/// A 10^9-scaled fixed-point value (exchange rates) with four digits.
pub fn format_fixed9(raw: u128) -> String {
    format_units(raw, crate::config::SCALE_DECIMALS, 4)
}

/// Currency-style number: grouped, two decimals. Non-finite values render
/// via their default `to_string`.
pub fn format_money(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let body = format!("{}.{}", group_thousands(int_part), frac_part);

    if value < 0.0 && body != "0.00" {
        format!("-{}", body)
    } else {
        body
    }
}

/// Percentage with two decimals, e.g. `4.26%`. Takes the percentage value
/// itself, not a fraction.
pub fn format_percent(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    format!("{}%", format_money(value))
}

/// Fraction (0.0426) as a percentage string ("4.26%").
pub fn format_ratio_percent(ratio: f64) -> String {
    format_percent(ratio * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping() {
        assert_eq!(group_thousands(""), "");
        assert_eq!(group_thousands("7"), "7");
        assert_eq!(group_thousands("999"), "999");
        assert_eq!(group_thousands("1000"), "1,000");
        assert_eq!(group_thousands("1234567"), "1,234,567");
        assert_eq!(group_thousands("100000"), "100,000");
    }

    #[test]
    fn amounts_truncate() {
        assert_eq!(format_amount(123_456_789, 6), "123.45");
        assert_eq!(format_amount(1_999, 3), "1.99");
        assert_eq!(format_amount(1_234_567_000, 3), "1,234,567.00");
    }

    #[test]
    fn amounts_below_one_unit() {
        assert_eq!(format_amount(5, 6), "0.00");
        assert_eq!(format_amount(50_000, 6), "0.05");
        assert_eq!(format_amount(0, 8), "0.00");
    }

    #[test]
    fn zero_decimals() {
        assert_eq!(format_amount(1500, 0), "1,500.00");
        assert_eq!(format_units(1500, 0, 0), "1,500");
    }

    #[test]
    fn fixed9() {
        assert_eq!(format_fixed9(1_100_000_000), "1.1000");
        assert_eq!(format_fixed9(1_000_114_999), "1.0001");
        assert_eq!(format_fixed9(0), "0.0000");
    }

    #[test]
    fn raw_strings() {
        assert_eq!(format_raw_str("2500000", 6), "2.50");
        assert_eq!(format_raw_str(" 2500000 ", 6), "2.50");
        assert_eq!(format_raw_str("n/a", 6), "n/a");
        assert_eq!(format_raw_str("-5", 6), "-5");
    }

    #[test]
    fn money_and_percent() {
        assert_eq!(format_money(1234.5), "1,234.50");
        assert_eq!(format_money(-1234.5), "-1,234.50");
        assert_eq!(format_money(-0.001), "0.00");
        assert_eq!(format_percent(4.257), "4.26%");
        assert_eq!(format_ratio_percent(0.05), "5.00%");
    }

    #[test]
    fn non_finite_falls_back() {
        assert_eq!(format_money(f64::NAN), "NaN");
        assert_eq!(format_money(f64::INFINITY), "inf");
        assert_eq!(format_percent(f64::NEG_INFINITY), "-inf");
    }
}
