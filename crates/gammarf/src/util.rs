//! Small standalone helpers used throughout the node: frequency-string
//! parsing and timestamped console output.

use chrono::Utc;

/// Parses a human frequency string into integer Hz.
///
/// Accepts a plain integer (`"433920000"`), or an integer suffixed with
/// `K`/`M`/`G` (case-insensitive, e.g. `"100M"`, `"433.92M"`, `"1.6G"`).
/// Surrounding whitespace is trimmed. Returns `None` on anything else.
pub fn str_to_hz(input: &str) -> Option<u64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let (num_part, multiplier) = match s.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&s[..s.len() - 1], 1_000.0),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&s[..s.len() - 1], 1_000_000.0),
        Some(c) if c.eq_ignore_ascii_case(&'g') => (&s[..s.len() - 1], 1_000_000_000.0),
        _ => (s, 1.0),
    };

    let value: f64 = num_part.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }

    Some((value * multiplier).round() as u64)
}

/// Prints a timestamped line to stdout, optionally prefixed with the name
/// of the module reporting it. Mirrors the original daemon's console
/// presentation: `[UTC timestamp] module: message`.
pub fn console_message(msg: &str) {
    println!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), msg);
}

/// Same as [`console_message`] but prefixed with the reporting module's
/// short name, per spec.md §7 ("console lines prefixed by the offending
/// module name").
pub fn console_message_from(module: &str, msg: &str) {
    println!(
        "[{}] {}: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        module,
        msg
    );
}

/// Prints a blank separator line (used by `stations_pretty`-style output).
pub fn console_blank() {
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_megahertz() {
        assert_eq!(str_to_hz("100M"), Some(100_000_000));
    }

    #[test]
    fn parses_fractional_megahertz() {
        assert_eq!(str_to_hz("433.92M"), Some(433_920_000));
    }

    #[test]
    fn parses_gigahertz() {
        assert_eq!(str_to_hz("1.6G"), Some(1_600_000_000));
    }

    #[test]
    fn parses_plain_hz_with_whitespace() {
        assert_eq!(str_to_hz(" 42 "), Some(42));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(str_to_hz("not a frequency"), None);
        assert_eq!(str_to_hz(""), None);
        assert_eq!(str_to_hz("-5M"), None);
    }

    #[test]
    fn lowercase_suffix_accepted() {
        assert_eq!(str_to_hz("2.4g"), Some(2_400_000_000));
    }
}
