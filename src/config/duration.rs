//! Human-friendly durations used for retention and TTL settings
//!
//! Accepts a non-negative integer followed by a unit: `s`, `m`, `h`, `d`
//! (e.g. `30s`, `15m`, `24h`, `7d`).

use crate::error::{ConvoyError, ConvoyResult};
use std::time::Duration;

/// Parse a TTL string such as `7d` into a `Duration`
pub fn parse_ttl(input: &str) -> ConvoyResult<Duration> {
    let trimmed = input.trim();
    let invalid = || ConvoyError::InvalidDuration(input.to_string());

    let unit = trimmed.chars().last().ok_or_else(invalid)?;
    let number = &trimmed[..trimmed.len() - unit.len_utf8()];
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = number.parse().map_err(|_| invalid())?;

    let secs = match unit {
        's' => Some(value),
        'm' => value.checked_mul(60),
        'h' => value.checked_mul(60 * 60),
        'd' => value.checked_mul(24 * 60 * 60),
        _ => None,
    }
    .ok_or_else(invalid)?;

    Ok(Duration::from_secs(secs))
}

/// Format a duration compactly for display (e.g. "7d 5h", "3h 30m", "< 1m")
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.as_secs() / 60;
    if total_minutes == 0 {
        return "< 1m".to_string();
    }

    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    if days > 0 {
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else {
        format!("{}m", minutes)
    }
}

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
