//! When the next backup is due.
//!
//! Backups are aligned to a fixed grid: the next one becomes due at `fraction`
//! seconds into the period following the one containing the last backup.
//! With a one-day period this pins backups to the same time of day instead of
//! letting them drift by the length of each cycle.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    period: Duration,
    fraction: Duration,
}

impl SchedulePolicy {
    /// `period` must be at least one second; `Config::validate` rejects zero.
    pub fn new(period: Duration, fraction: Duration) -> Self {
        Self { period, fraction }
    }

    pub fn from_secs(period_secs: u64, fraction_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(period_secs),
            Duration::from_secs(fraction_secs),
        )
    }

    /// `floor(last / period + 1) * period + fraction`, in Unix seconds.
    pub fn next_due_secs(&self, last_backup_secs: u64) -> u64 {
        let period = self.period.as_secs();
        (last_backup_secs / period + 1) * period + self.fraction.as_secs()
    }

    pub fn next_due(&self, last_backup: SystemTime) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.next_due_secs(unix_secs(last_backup)))
    }

    /// A backup is due once `now` is strictly past the next due time.
    pub fn is_due(&self, now: SystemTime, last_backup: SystemTime) -> bool {
        now > self.next_due(last_backup)
    }
}

pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
