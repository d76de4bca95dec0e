//! strftime-style time rendering for `DATE_LOCAL`, `DATE_GMT`,
//! `LAST_MODIFIED`, and `flastmod`.

use crate::config::DEFAULT_TIME_FORMAT;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use std::time::SystemTime;

fn format_is_valid(fmt: &str) -> bool {
    StrftimeItems::new(fmt).all(|item| !matches!(item, Item::Error))
}

/// Render `t` through a strftime-style format, in local time or UTC.
/// An unparsable format falls back to the default format.
pub fn format_timestamp(t: SystemTime, fmt: &str, gmt: bool) -> String {
    let fmt = if format_is_valid(fmt) {
        fmt
    } else {
        DEFAULT_TIME_FORMAT
    };
    if gmt {
        DateTime::<Utc>::from(t).format(fmt).to_string()
    } else {
        DateTime::<Local>::from(t).format(fmt).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn gmt_formatting() {
        // 2001-09-09 01:46:40 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        assert_eq!(format_timestamp(t, "%Y-%m-%d %H:%M:%S", true), "2001-09-09 01:46:40");
    }

    #[test]
    fn invalid_format_falls_back() {
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let out = format_timestamp(t, "%Q-nope", true);
        assert_eq!(out, format_timestamp(t, DEFAULT_TIME_FORMAT, true));
    }

    #[test]
    fn local_and_gmt_render_same_instant() {
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        // epoch seconds are timezone independent
        assert_eq!(
            format_timestamp(t, "%s", false),
            format_timestamp(t, "%s", true)
        );
    }
}
