use chrono::{DateTime, Utc};

/// Where a debounced condition stands after this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debounce {
    Inactive,
    Pending { elapsed_ms: u64 },
    Elapsed,
}

/// Milliseconds from `since` to `now`. A clock that moved backwards reads as zero.
pub fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_milliseconds()).unwrap_or(0)
}

pub fn has_elapsed(since: Option<DateTime<Utc>>, now: DateTime<Utc>, duration_ms: u64) -> bool {
    since
        .map(|since| elapsed_ms(since, now) >= duration_ms)
        .unwrap_or(true)
}

/// Starts `slot` when `condition` first holds and clears it once it stops holding.
pub fn debounce(
    slot: &mut Option<DateTime<Utc>>,
    condition: bool,
    now: DateTime<Utc>,
    duration_ms: u64,
) -> Debounce {
    if !condition {
        *slot = None;
        return Debounce::Inactive;
    }

    let since = *slot.get_or_insert(now);
    let elapsed_ms = elapsed_ms(since, now);
    if elapsed_ms >= duration_ms {
        Debounce::Elapsed
    } else {
        Debounce::Pending { elapsed_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn debounce_starts_then_elapses() {
        let mut slot = None;

        assert_eq!(
            debounce(&mut slot, true, t0(), 1_000),
            Debounce::Pending { elapsed_ms: 0 }
        );
        assert_eq!(slot, Some(t0()));
        assert_eq!(
            debounce(&mut slot, true, t0() + Duration::milliseconds(999), 1_000),
            Debounce::Pending { elapsed_ms: 999 }
        );
        assert_eq!(
            debounce(&mut slot, true, t0() + Duration::seconds(1), 1_000),
            Debounce::Elapsed
        );
    }

    #[test]
    fn debounce_clears_when_condition_drops() {
        let mut slot = Some(t0());
        assert_eq!(debounce(&mut slot, false, t0(), 1_000), Debounce::Inactive);
        assert_eq!(slot, None);
    }

    #[test]
    fn clock_rollback_saturates() {
        assert_eq!(elapsed_ms(t0(), t0() - Duration::seconds(30)), 0);
        assert!(!has_elapsed(Some(t0()), t0() - Duration::seconds(30), 1));
        assert!(has_elapsed(None, t0(), u64::MAX));
    }
}
