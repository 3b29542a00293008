//! Human-readable rendering of sizes, speeds, fractions and durations.

use std::time::Duration;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// `512B`, `13.2K`, `2.4M`, `1.0G`.
pub fn size(bytes: u64) -> String {
    let b = bytes as f64;
    if bytes < 1024 {
        format!("{bytes}B")
    } else if b < MIB {
        format!("{:.1}K", b / KIB)
    } else if b < GIB {
        format!("{:.1}M", b / MIB)
    } else {
        format!("{:.1}G", b / GIB)
    }
}

/// Like [`size`], but renders an unknown (`<= 0`) length as `?`.
pub fn length(content_length: i64) -> String {
    if content_length <= 0 {
        "?".to_string()
    } else {
        size(content_length as u64)
    }
}

pub fn speed(bytes_per_second: u64) -> String {
    format!("{}/s", size(bytes_per_second))
}

/// `0.345` renders as `34.5%`.
pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// `m:ss` below an hour, `h:mm:ss` above.
pub fn duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Parses `1024`, `300K`, `1.5M`, `2g`, `64KiB`, `10MB` into bytes.
///
/// Suffixes are binary multiples and case-insensitive. Returns `None` for
/// anything that is not a non-negative finite number.
pub fn parse_size(input: &str) -> Option<u64> {
    let s = input.trim();
    let upper = s.to_ascii_uppercase();
    let digits = upper
        .trim_end_matches("IB")
        .trim_end_matches('B');
    let (number, multiplier) = match digits.chars().last()? {
        'K' => (&digits[..digits.len() - 1], KIB),
        'M' => (&digits[..digits.len() - 1], MIB),
        'G' => (&digits[..digits.len() - 1], GIB),
        'T' => (&digits[..digits.len() - 1], GIB * 1024.0),
        _ => (digits, 1.0),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}
