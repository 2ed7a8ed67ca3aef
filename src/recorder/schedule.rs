//! Scheduled monitoring windows
//!
//! A window is a daily time-of-day interval `[start, start + hours)` which may
//! wrap past midnight.

use chrono::{NaiveTime, Timelike};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Monitoring hours used when a schedule has a start time but no duration
pub const DEFAULT_MONITOR_HOURS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledWindow {
    start: NaiveTime,
    hours: f64,
}

impl ScheduledWindow {
    pub fn new(start: NaiveTime, hours: f64) -> Self {
        Self { start, hours }
    }

    /// Parse `HH:MM:SS` or `HH:MM`
    pub fn parse(start: &str, hours: Option<f64>) -> Option<Self> {
        let start = start.trim();
        let time = NaiveTime::parse_from_str(start, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(start, "%H:%M"))
            .ok()?;
        let hours = hours.filter(|h| *h > 0.0).unwrap_or(DEFAULT_MONITOR_HOURS);
        Some(Self::new(time, hours))
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// End of the window as a time of day
    pub fn end(&self) -> NaiveTime {
        let secs = (self.hours * 3600.0) as i64;
        self.start + chrono::Duration::seconds(secs)
    }

    /// Whether `now` falls inside the window
    pub fn contains(&self, now: NaiveTime) -> bool {
        let length = (self.hours * 3600.0).round() as i64;
        if length >= SECONDS_PER_DAY {
            return true;
        }
        let since_start = (now.num_seconds_from_midnight() as i64
            - self.start.num_seconds_from_midnight() as i64)
            .rem_euclid(SECONDS_PER_DAY);
        since_start < length
    }
}

impl std::fmt::Display for ScheduledWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}~{}", self.start.format("%H:%M:%S"), self.end().format("%H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    #[test]
    fn test_window_boundaries() {
        let window = ScheduledWindow::parse("18:30:00", Some(5.0)).unwrap();
        assert!(!window.contains(t("18:29:59")));
        assert!(window.contains(t("18:30:00")));
        assert!(window.contains(t("23:29:59")));
        assert!(!window.contains(t("23:30:00")));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let window = ScheduledWindow::parse("23:00:00", Some(5.0)).unwrap();
        assert!(window.contains(t("02:00:00")));
        assert!(window.contains(t("23:00:00")));
        assert!(!window.contains(t("04:00:00")));
        assert!(!window.contains(t("22:59:59")));
    }

    #[test]
    fn test_parse_short_form_and_default_hours() {
        let window = ScheduledWindow::parse("08:15", None).unwrap();
        assert_eq!(window.start(), t("08:15:00"));
        assert_eq!(window.to_string(), "08:15:00~13:15:00");
        assert!(ScheduledWindow::parse("25:00", None).is_none());
    }

    #[test]
    fn test_full_day_window_always_inside() {
        let window = ScheduledWindow::parse("00:00:00", Some(24.0)).unwrap();
        assert!(window.contains(t("12:00:00")));
        assert!(window.contains(t("23:59:59")));
    }
}
