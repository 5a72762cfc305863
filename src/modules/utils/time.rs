use chrono::{DateTime, Local, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Format an epoch-millisecond timestamp as a local date and time
pub fn format_timestamp_millis(timestamp: u64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp as i64) {
        Some(utc) => DateTime::<Local>::from(utc)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string(),
        None => "unknown".to_string(),
    }
}

/// Format duration in milliseconds to human readable string
pub fn format_duration(millis: u64) -> String {
    let seconds = millis / 1000;
    if seconds < 60 {
        format!("{} seconds", seconds)
    } else if seconds < 3600 {
        format!("{} minutes", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours", seconds / 3600)
    } else {
        format!("{} days", seconds / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        let clock = SystemClock;
        let now = clock.now_millis();
        // 2024-01-01T00:00:00Z
        assert!(now > 1_704_067_200_000);

        let secs = clock.now_secs();
        assert!(secs >= now / 1000);
        assert!(secs <= clock.now_millis() / 1000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        assert_eq!(clock.now_secs(), 1);
        clock.set(42_000);
        assert_eq!(clock.now_secs(), 42);
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(30_000), "30 seconds");
        assert_eq!(format_duration(90_000), "1 minutes");
        assert_eq!(format_duration(3_600_000), "1 hours");
        assert_eq!(format_duration(86_400_000), "1 days");
    }

    #[test]
    fn test_timestamp_formatting() {
        let formatted = format_timestamp_millis(1_609_459_200_000);
        assert!(formatted.contains(":"));
        assert!(formatted.len() > 15);
    }
}
