//! Small helpers shared across modules.

use chrono::Local;

/// Format of the `TIME` column of every table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Current local time, formatted for the `TIME` column.
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
