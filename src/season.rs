//! Deciding when the battlefield's season has turned over.
//!
//! The original drew the line at Wednesday 06:00 local time by shifting
//! both timestamps into UTC+8 and comparing ISO week numbers. This crate
//! keeps the same shape — shift, then compare whole-week buckets — but
//! works entirely in `SystemTime`/`Duration` arithmetic against the Unix
//! epoch (itself a Thursday), with the shift exposed as a plain
//! configurable number of hours rather than hardcoded to a timezone.

use crate::battlefield::TimeStamp;

const MS_PER_HOUR: TimeStamp = 60 * 60 * 1000;
const MS_PER_WEEK: TimeStamp = 7 * 24 * MS_PER_HOUR;

/// How far to shift the epoch before bucketing timestamps into weeks.
///
/// The Unix epoch (1970-01-01T00:00:00Z) is a Thursday; shifting by 26
/// hours moves the bucket boundary to Friday 02:00 UTC, which is the
/// closest plain-arithmetic stand-in for the original's "Wednesday 06:00
/// local" rollover once timezone offsets are dropped.
#[derive(Debug, Clone, Copy)]
pub struct SeasonConfig {
    pub reset_offset_hours: i64,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        Self { reset_offset_hours: 26 }
    }
}

impl SeasonConfig {
    /// Which whole-week bucket `millis` falls into after the offset shift.
    fn bucket(&self, millis: TimeStamp) -> i64 {
        (millis - self.reset_offset_hours * MS_PER_HOUR).div_euclid(MS_PER_WEEK)
    }

    /// True if `lhs` and `rhs` fall in the same season (the same
    /// offset-shifted week).
    pub fn in_same_season(&self, lhs: TimeStamp, rhs: TimeStamp) -> bool {
        self.bucket(lhs) == self.bucket(rhs)
    }

    /// True if `now` has crossed into a new season since
    /// `last_reset_time`, meaning the caller should run
    /// [`crate::engine::Engine::reset_battle_field`].
    pub fn should_reset(&self, last_reset_time: TimeStamp, now: TimeStamp) -> bool {
        !self.in_same_season(last_reset_time, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_instant_is_always_the_same_season() {
        let config = SeasonConfig::default();
        assert!(config.in_same_season(1_700_000_000_000, 1_700_000_000_000));
    }

    #[test]
    fn a_week_apart_never_in_the_same_season() {
        let config = SeasonConfig::default();
        let now = 1_700_000_000_000;
        assert!(!config.in_same_season(now, now + MS_PER_WEEK));
    }

    #[test]
    fn crossing_the_offset_boundary_triggers_a_reset() {
        let config = SeasonConfig::default();
        let boundary = config.reset_offset_hours * MS_PER_HOUR;
        assert!(config.should_reset(boundary - 1, boundary + 1));
        assert!(!config.should_reset(boundary + 1, boundary + 2));
    }

    #[test]
    fn zero_last_reset_is_a_distinct_season_from_a_later_decade() {
        let config = SeasonConfig::default();
        assert!(config.should_reset(0, 1_700_000_000_000));
    }
}
