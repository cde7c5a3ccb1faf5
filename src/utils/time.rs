use chrono::{DateTime, Local, Utc};

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// Formats an elapsed duration as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let hours = elapsed_ms / MS_PER_HOUR;
    let minutes = (elapsed_ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (elapsed_ms % MS_PER_MINUTE) / MS_PER_SECOND;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Same as [format_elapsed] with hundredths of a second appended, the way the stopwatch face
/// shows it.
pub fn format_elapsed_precise(elapsed_ms: u64) -> String {
    let centis = (elapsed_ms % MS_PER_SECOND) / 10;
    format!("{}.{centis:02}", format_elapsed(elapsed_ms))
}

/// This is the standard way of presenting a stored timestamp to the user.
pub fn to_local_display(moment: DateTime<Utc>) -> String {
    moment
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{format_elapsed, format_elapsed_precise};

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(1_500), "00:00:01");
        assert_eq!(format_elapsed(3_661_000), "01:01:01");
        assert_eq!(format_elapsed(100 * 3_600_000), "100:00:00");
    }

    #[test]
    fn test_format_elapsed_precise() {
        assert_eq!(format_elapsed_precise(1_234), "00:00:01.23");
        assert_eq!(format_elapsed_precise(59_999), "00:00:59.99");
    }
}
