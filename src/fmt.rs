//! Formatting helpers for the live view.
//!
//! Every helper renders a missing value as `NA`, the same placeholder the
//! tables use.

use crate::dispatch::Percentage;

/// Placeholder for a value that is not available yet.
pub const NA: &str = "NA";

/// Controls compact (table cells) vs verbose (summary line) output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FmtStyle {
    /// `"1.5G"`, `"3m5s"`
    Compact,
    /// `"1.5 GiB"`, `"3m 5s"`
    Detail,
}

/// Format byte count as human-readable size.
///
/// Compact: `"1.5G"`, `"100.3M"`, `"50.0K"`, `"512B"`
/// Detail:  `"1.5 GiB"`, `"100.3 MiB"`, `"50.0 KiB"`, `"512 B"`
pub fn format_bytes(bytes: u64, style: FmtStyle) -> String {
    let (g, m, k, b) = match style {
        FmtStyle::Compact => ("G", "M", "K", "B"),
        FmtStyle::Detail => (" GiB", " MiB", " KiB", " B"),
    };
    let f = bytes as f64;
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1}{}", f / (1024.0 * 1024.0 * 1024.0), g)
    } else if bytes >= 1024 * 1024 {
        format!("{:.1}{}", f / (1024.0 * 1024.0), m)
    } else if bytes >= 1024 {
        format!("{:.1}{}", f / 1024.0, k)
    } else {
        format!("{}{}", bytes, b)
    }
}

/// Format accumulated CPU time in seconds.
///
/// Below a minute the fraction is kept (`"12.34s"`); above it the value is
/// split into units like `"3m5s"` (compact) or `"3m 5s"` (detail).
pub fn format_cpu_time(secs: f64, style: FmtStyle) -> String {
    if secs < 0.0 || !secs.is_finite() {
        return NA.to_string();
    }
    if secs < 60.0 {
        return format!("{:.2}s", secs);
    }
    let whole = secs as u64;
    let sep = match style {
        FmtStyle::Compact => "",
        FmtStyle::Detail => " ",
    };
    if whole < 3600 {
        format!("{}m{}{}s", whole / 60, sep, whole % 60)
    } else if whole < 86400 {
        format!("{}h{}{}m", whole / 3600, sep, (whole % 3600) / 60)
    } else {
        format!("{}d{}{}h", whole / 86400, sep, (whole % 86400) / 3600)
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| format!("{:.2}%", v))
}

pub fn format_opt_bytes(value: Option<u64>, style: FmtStyle) -> String {
    value.map_or_else(|| NA.to_string(), |v| format_bytes(v, style))
}

pub fn format_opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| NA.to_string(), |v| v.to_string())
}

pub fn format_percentage(value: Percentage) -> String {
    value.to_string()
}

/// Truncates `s` to at most `max` characters, marking the cut with `~`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('~');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512, FmtStyle::Compact), "512B");
        assert_eq!(format_bytes(1536, FmtStyle::Compact), "1.5K");
        assert_eq!(format_bytes(3 * 1024 * 1024, FmtStyle::Detail), "3.0 MiB");
        assert_eq!(
            format_bytes(2 * 1024 * 1024 * 1024, FmtStyle::Compact),
            "2.0G"
        );
    }

    #[test]
    fn test_format_cpu_time() {
        assert_eq!(format_cpu_time(-1.0, FmtStyle::Compact), "NA");
        assert_eq!(format_cpu_time(1.5, FmtStyle::Compact), "1.50s");
        assert_eq!(format_cpu_time(185.0, FmtStyle::Compact), "3m5s");
        assert_eq!(format_cpu_time(185.0, FmtStyle::Detail), "3m 5s");
        assert_eq!(format_cpu_time(7260.0, FmtStyle::Compact), "2h1m");
    }

    #[test]
    fn test_missing_values_render_na() {
        assert_eq!(format_percent(None), "NA");
        assert_eq!(format_percent(Some(3.14159)), "3.14%");
        assert_eq!(format_opt_bytes(None, FmtStyle::Compact), "NA");
        assert_eq!(format_opt::<u64>(None), "NA");
        assert_eq!(format_opt(Some(4)), "4");
        assert_eq!(format_percentage(Percentage::NotApplicable), "NA");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("postgres", 10), "postgres");
        assert_eq!(truncate("postgres", 5), "post~");
        assert_eq!(truncate("x", 0), "");
    }
}
