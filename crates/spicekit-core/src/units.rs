//! Engineering-notation scanning and formatting
//!
//! SPICE values carry an optional scale suffix after the mantissa, possibly
//! separated from it by spaces. Parsing is case-insensitive, so `M` and `m`
//! both mean milli; mega is always written `meg` (any case) and is matched
//! before any single-letter suffix. The one exception is `F`: upper-case it is
//! the farad unit (`1F` is 1.0) and only lower-case `f` means femto.

/// Parse a SPICE number with optional scale suffix.
///
/// Returns `None` when the text does not start with a number. Unit text after
/// the suffix is ignored (`10kOhm`, `1uF`), and digits written after a suffix
/// form the decimal fraction (`2k5` is 2500, `10R5` is 10.5).
pub fn to_float(text: &str) -> Option<f64> {
    let s = text.trim();
    let b = s.as_bytes();
    let mut i = 0;

    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut has_digits = i > int_start;
    let mut has_point = false;
    if i < b.len() && b[i] == b'.' {
        has_point = true;
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        has_digits |= i > frac_start;
    }
    if !has_digits {
        return None;
    }

    // Scientific notation leaves no room for a scale suffix.
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if j < b.len() && (b[j] == b'+' || b[j] == b'-') {
            j += 1;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            return s[..j].parse().ok();
        }
    }

    let mantissa = &s[..i];
    let rest = s[i..].trim_start_matches([' ', '\t']);
    let Some((exponent, consumed)) = scale_suffix(rest) else {
        return mantissa.parse().ok();
    };

    let after = &rest[consumed..];
    let fraction_len = after.bytes().take_while(u8::is_ascii_digit).count();
    // Going through the decimal text keeps `4.7n` identical to `4.7e-9`.
    let text = if fraction_len > 0 && !has_point {
        format!("{}.{}e{}", mantissa, &after[..fraction_len], exponent)
    } else {
        format!("{}e{}", mantissa, exponent)
    };
    text.parse().ok()
}

/// Decimal exponent and byte length of the scale suffix at the start of `rest`.
fn scale_suffix(rest: &str) -> Option<(i32, usize)> {
    if rest.get(..3).is_some_and(|s| s.eq_ignore_ascii_case("meg")) {
        return Some((6, 3));
    }
    let c = rest.chars().next()?;
    if c == 'F' {
        return Some((0, 1));
    }
    let exponent = match c.to_ascii_lowercase() {
        'f' => -15,
        'p' => -12,
        'n' => -9,
        'u' | 'µ' | 'μ' => -6,
        'm' => -3,
        'k' => 3,
        'g' => 9,
        't' => 12,
        // Unit letters double as the decimal mark (`4R7`, `1V5`).
        'r' | 'Ω' | 'v' | 'a' | 'h' => 0,
        '%' => -2,
        _ => return None,
    };
    Some((exponent, c.len_utf8()))
}

#[inline]
fn apply_exponent(value: f64, exponent: i32) -> f64 {
    if exponent >= 0 {
        value * 10f64.powi(exponent)
    } else {
        value / 10f64.powi(-exponent)
    }
}

/// Format a number with an engineering suffix (`f p n u m k Meg g t`).
pub fn format_eng(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format_general(value);
    }
    let group = ((value.abs().log10() / 3.0).floor() as i32).clamp(-5, 4);
    let scaled = apply_exponent(value, -3 * group);
    let suffix = match group {
        -5 => "f",
        -4 => "p",
        -3 => "n",
        -2 => "u",
        -1 => "m",
        1 => "k",
        2 => "Meg",
        3 => "g",
        4 => "t",
        _ => "",
    };
    format!("{}{}", format_general(scaled), suffix)
}

/// Six significant digits, trailing zeros removed, exponent form outside
/// `1e-4 ..= 1e6`.
fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let exp = value.abs().log10().floor() as i32;
    if !(-4..6).contains(&exp) {
        let text = format!("{:.5e}", value);
        return match text.split_once('e') {
            Some((mantissa, exponent)) => format!("{}e{}", trim_fraction(mantissa), exponent),
            None => text,
        };
    }
    let decimals = (5 - exp).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(to_float("10k"), Some(10000.0));
        assert_eq!(to_float("33µ"), Some(3.3e-05));
        assert_eq!(to_float("33u"), Some(3.3e-05));
        assert_eq!(to_float("1Meg"), Some(1e6));
        assert_eq!(to_float("1MEG"), Some(1e6));
        assert_eq!(to_float("1m"), Some(1e-3));
        assert_eq!(to_float("1M"), Some(1e-3));
        assert_eq!(to_float("4.7n"), Some(4.7e-9));
        assert_eq!(to_float("100p"), Some(1e-10));
    }

    #[test]
    fn test_farad_and_spacing() {
        assert_eq!(to_float("1F"), Some(1.0));
        assert_eq!(to_float("1f"), Some(1e-15));
        assert_eq!(to_float("10uF"), Some(1e-5));
        assert_eq!(to_float("2F2"), Some(2.2));
        assert_eq!(to_float("10 k"), Some(10000.0));
        assert_eq!(to_float("4.7\tn"), Some(4.7e-9));
        assert_eq!(to_float("5 "), Some(5.0));
    }

    #[test]
    fn test_decimal_mark_suffix() {
        assert_eq!(to_float("2k5"), Some(2500.0));
        assert_eq!(to_float("2k5R"), Some(2500.0));
        assert_eq!(to_float("10R5"), Some(10.5));
        assert_eq!(to_float("4R7"), Some(4.7));
    }

    #[test]
    fn test_plain_and_scientific() {
        assert_eq!(to_float("42"), Some(42.0));
        assert_eq!(to_float("-1.5"), Some(-1.5));
        assert_eq!(to_float("1e3"), Some(1000.0));
        assert_eq!(to_float("2.5E-3"), Some(2.5e-3));
        assert_eq!(to_float(".5"), Some(0.5));
        assert_eq!(to_float("10kOhm"), Some(10000.0));
        assert_eq!(to_float("1uF"), Some(1e-6));
    }

    #[test]
    fn test_not_a_number() {
        assert_eq!(to_float("{R*2}"), None);
        assert_eq!(to_float("NMOS"), None);
        assert_eq!(to_float(""), None);
        assert_eq!(to_float("."), None);
    }

    #[test]
    fn test_format_eng() {
        assert_eq!(format_eng(10000.0), "10k");
        assert_eq!(format_eng(3.3e-5), "33u");
        assert_eq!(format_eng(1e6), "1Meg");
        assert_eq!(format_eng(1e-3), "1m");
        assert_eq!(format_eng(4.7e-9), "4.7n");
        assert_eq!(format_eng(0.0), "0");
        assert_eq!(format_eng(-2200.0), "-2.2k");
        assert_eq!(format_eng(12.5), "12.5");
    }

    #[test]
    fn test_format_then_scan() {
        for v in [1.0, 2.2e3, 4.7e-6, 1e9, 3.3e-12, 150e-15] {
            let text = format_eng(v);
            let back = to_float(&text).unwrap();
            assert!((back - v).abs() <= v.abs() * 1e-12, "{} -> {} -> {}", v, text, back);
        }
    }
}
