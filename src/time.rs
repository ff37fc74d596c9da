//! Guest clock capability
//!
//! The guest kernel stamps metadata in 100 ns ticks counted from
//! 1601-01-01T00:00:00Z. Providers receive a [`TimeSource`] at construction
//! so packaged stores can be stamped deterministically; host-backed stores
//! convert real host timestamps through [`guest_time_from_system`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Guest ticks per second (100 ns resolution)
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Seconds between the guest epoch (1601) and the Unix epoch (1970)
pub const UNIX_EPOCH_DELTA_SECONDS: u64 = 11_644_473_600;

/// Injected capability supplying guest-tick timestamps for metadata fields
pub trait TimeSource: Send + Sync {
    /// Current time in guest ticks
    fn now(&self) -> u64;
}

/// Wall-clock time source backed by [`SystemTime`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> u64 {
        guest_time_from_system(SystemTime::now())
    }
}

/// Time source that always reports the same instant, for deterministic stores
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl TimeSource for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}

/// Convert a host timestamp to guest ticks
///
/// Times before the guest epoch clamp to 0.
#[must_use]
pub fn guest_time_from_system(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => {
            let secs = since.as_secs().saturating_add(UNIX_EPOCH_DELTA_SECONDS);
            secs.saturating_mul(TICKS_PER_SECOND)
                .saturating_add(u64::from(since.subsec_nanos()) / 100)
        }
        Err(before) => {
            let back = before.duration().as_secs();
            UNIX_EPOCH_DELTA_SECONDS
                .saturating_sub(back)
                .saturating_mul(TICKS_PER_SECOND)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unix_epoch_maps_to_delta_ticks() {
        assert_eq!(
            guest_time_from_system(UNIX_EPOCH),
            UNIX_EPOCH_DELTA_SECONDS * TICKS_PER_SECOND
        );
    }

    #[test]
    fn subsecond_precision_is_100ns() {
        let t = UNIX_EPOCH + Duration::new(1, 250);
        assert_eq!(
            guest_time_from_system(t),
            (UNIX_EPOCH_DELTA_SECONDS + 1) * TICKS_PER_SECOND + 2
        );
    }

    #[test]
    fn pre_unix_times_count_back_from_delta() {
        let t = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(
            guest_time_from_system(t),
            (UNIX_EPOCH_DELTA_SECONDS - 10) * TICKS_PER_SECOND
        );
    }

    #[test]
    fn fixed_clock_reports_its_instant() {
        let clock = FixedClock(12345);
        assert_eq!(clock.now(), 12345);
        assert_eq!(clock.now(), 12345);
    }

    #[test]
    fn system_clock_is_past_the_delta() {
        assert!(SystemClock.now() > UNIX_EPOCH_DELTA_SECONDS * TICKS_PER_SECOND);
    }
}
