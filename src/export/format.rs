//! Presentation formatting. Rates arrive as decimal fractions and are only
//! multiplied by 100 here.

use crate::metrics::delta::DeltaResult;

pub const NOT_AVAILABLE: &str = "N/A";

/// Insert `,` thousands separators into an unsigned digit string.
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Fixed-point rendering with up to `max_decimals` decimals, trailing zeros
/// trimmed, optional grouping.
fn render(value: f64, max_decimals: usize, grouped: bool) -> String {
    let fixed = format!("{:.*}", max_decimals, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), f.trim_end_matches('0').to_string()),
        None => (fixed.clone(), String::new()),
    };
    let int_part = if grouped { group_thousands(&int_part) } else { int_part };
    let negative = value < 0.0 && (int_part.chars().any(|c| c != '0' && c != ',') || !frac_part.is_empty());
    let sign = if negative { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{sign}{int_part}")
    } else {
        format!("{sign}{int_part}.{frac_part}")
    }
}

/// `$1,235` (whole dollars).
pub fn format_currency(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let body = render(v.abs().round(), 0, true);
            if v.round() < 0.0 {
                format!("-${body}")
            } else {
                format!("${body}")
            }
        }
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// `0.2345` → `23.45%`.
pub fn format_percent(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}%", decimals, v * 100.0),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// `12,345.678` with at most three decimals.
pub fn format_number(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => render(v, 3, true),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// Multiplier metrics such as ROAS: `4.00x`.
pub fn format_ratio(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.2}x"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

/// `+12.5% ↑`, `-3.0% ↓`, or the absolute change when there is no percent.
pub fn format_delta(delta: &DeltaResult) -> String {
    match (delta.percent, delta.absolute) {
        (Some(p), _) => format!("{p:+.1}% {}", delta.direction.arrow()),
        (None, Some(a)) => format!("{a:+} {}", delta.direction.arrow()),
        (None, None) => NOT_AVAILABLE.to_string(),
    }
}

// ── CSV cell variants (no symbols, no grouping) ────────────────────

pub fn csv_currency(value: f64) -> String {
    render(value.round(), 0, false)
}

pub fn csv_percent(value: f64) -> String {
    format!("{:.2}", value * 100.0)
}

pub fn csv_number(value: f64) -> String {
    render(value, 3, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::delta::compute_delta;

    #[test]
    fn test_currency() {
        assert_eq!(format_currency(Some(1234.56)), "$1,235");
        assert_eq!(format_currency(Some(0.0)), "$0");
        assert_eq!(format_currency(Some(-1500.0)), "-$1,500");
        assert_eq!(format_currency(None), "N/A");
    }

    #[test]
    fn test_percent_multiplies_at_the_boundary() {
        assert_eq!(format_percent(Some(0.23), 2), "23.00%");
        assert_eq!(format_percent(Some(0.005), 1), "0.5%");
        assert_eq!(format_percent(None, 2), "N/A");
    }

    #[test]
    fn test_number() {
        assert_eq!(format_number(Some(1234567.0)), "1,234,567");
        assert_eq!(format_number(Some(12.5)), "12.5");
        assert_eq!(format_number(Some(-999.1234)), "-999.123");
        assert_eq!(format_number(Some(f64::NAN)), "N/A");
    }

    #[test]
    fn test_ratio_and_delta() {
        assert_eq!(format_ratio(Some(4.0)), "4.00x");
        assert_eq!(format_delta(&compute_delta(Some(110.0), Some(100.0))), "+10.0% ↑");
        assert_eq!(format_delta(&compute_delta(Some(100.0), Some(0.0))), "+100 ↑");
        assert_eq!(format_delta(&compute_delta(None, Some(1.0))), "N/A");
    }

    #[test]
    fn test_csv_cells() {
        assert_eq!(csv_currency(1234.56), "1235");
        assert_eq!(csv_percent(0.2345), "23.45");
        assert_eq!(csv_number(1234567.5), "1234567.5");
    }
}
