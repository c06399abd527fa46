use chrono::{DateTime, Duration, FixedOffset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Daily occupied window. `start_minutes > end_minutes` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancySchedule {
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub bypass: bool,
}

impl Default for OccupancySchedule {
    fn default() -> Self {
        Self {
            start_minutes: 7 * 60,
            end_minutes: 21 * 60 + 45,
            bypass: false,
        }
    }
}

impl OccupancySchedule {
    pub fn always_occupied() -> Self {
        Self {
            bypass: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> bool {
        self.start_minutes < MINUTES_PER_DAY && self.end_minutes < MINUTES_PER_DAY
    }

    pub fn is_occupied(&self, now: DateTime<FixedOffset>) -> bool {
        if self.bypass {
            return true;
        }
        self.contains_minute(minute_of_day(now))
    }

    /// Epoch seconds of the next occupied/unoccupied boundary after `now`.
    pub fn next_transition_epoch(&self, now: DateTime<FixedOffset>) -> Option<i64> {
        if self.bypass || self.start_minutes == self.end_minutes {
            return None;
        }

        let now_minute = minute_of_day(now);
        let mut best: Option<DateTime<FixedOffset>> = None;

        for day_offset in 0..2i64 {
            for boundary in [self.start_minutes, self.end_minutes] {
                if day_offset == 0 && boundary <= now_minute {
                    continue;
                }

                let date = now.date_naive() + Duration::days(day_offset);
                let hour = u32::from(boundary / 60);
                let minute = u32::from(boundary % 60);

                let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                    continue;
                };

                let Some(candidate) = now.offset().from_local_datetime(&naive).single() else {
                    continue;
                };

                if best.map(|current| candidate < current).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }

        best.map(|dt| dt.timestamp())
    }

    fn contains_minute(&self, minute: u16) -> bool {
        match self.start_minutes.cmp(&self.end_minutes) {
            std::cmp::Ordering::Less => (self.start_minutes..self.end_minutes).contains(&minute),
            std::cmp::Ordering::Greater => {
                minute >= self.start_minutes || minute < self.end_minutes
            }
            std::cmp::Ordering::Equal => false,
        }
    }
}

fn minute_of_day(now: DateTime<FixedOffset>) -> u16 {
    (now.hour() * 60 + now.minute()) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, day, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn default_window_is_inclusive_start_exclusive_end() {
        let schedule = OccupancySchedule::default();

        assert!(!schedule.is_occupied(fixed_time(5, 6, 59)));
        assert!(schedule.is_occupied(fixed_time(5, 7, 0)));
        assert!(schedule.is_occupied(fixed_time(5, 21, 44)));
        assert!(!schedule.is_occupied(fixed_time(5, 21, 45)));
    }

    #[test]
    fn bypass_is_always_occupied() {
        let schedule = OccupancySchedule::always_occupied();
        assert!(schedule.is_occupied(fixed_time(5, 3, 0)));
        assert_eq!(schedule.next_transition_epoch(fixed_time(5, 3, 0)), None);
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let schedule = OccupancySchedule {
            start_minutes: 22 * 60,
            end_minutes: 6 * 60,
            bypass: false,
        };

        assert!(schedule.is_occupied(fixed_time(5, 23, 30)));
        assert!(schedule.is_occupied(fixed_time(6, 5, 59)));
        assert!(!schedule.is_occupied(fixed_time(6, 12, 0)));
    }

    #[test]
    fn next_transition_rolls_to_tomorrow() {
        let schedule = OccupancySchedule::default();

        let evening = fixed_time(5, 22, 0);
        assert_eq!(
            schedule.next_transition_epoch(evening),
            Some(fixed_time(6, 7, 0).timestamp())
        );

        let morning = fixed_time(5, 8, 0);
        assert_eq!(
            schedule.next_transition_epoch(morning),
            Some(fixed_time(5, 21, 45).timestamp())
        );
    }

    #[test]
    fn rejects_out_of_day_minutes() {
        let schedule = OccupancySchedule {
            start_minutes: 1_440,
            ..OccupancySchedule::default()
        };
        assert!(!schedule.validate());
    }
}
