use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{config::EquipmentConfig, state::StageTimes, timers};

/// Stage demand from how far the space sits above setpoint.
pub fn stage_demand(config: &EquipmentConfig, error_f: f64) -> (bool, bool) {
    if error_f >= config.stage2_threshold_f {
        (true, true)
    } else if error_f >= config.stage1_threshold_f {
        (true, false)
    } else {
        (false, false)
    }
}

/// Applies minimum run and minimum off time to one stage.
///
/// A running stage ignores "off" until `stage_min_run_ms` has passed since it
/// came on; a stopped stage ignores "on" until `stage_min_off_ms` has passed
/// since it went off. Unknown start times do not block.
pub fn guard(
    config: &EquipmentConfig,
    stage: &'static str,
    times: &mut StageTimes,
    was_on: bool,
    wanted: bool,
    now: DateTime<Utc>,
) -> bool {
    let is_on = match (was_on, wanted) {
        (true, false) => !timers::has_elapsed(times.on_since, now, config.stage_min_run_ms),
        (false, true) => timers::has_elapsed(times.off_since, now, config.stage_min_off_ms),
        (current, _) => current,
    };

    if is_on != was_on {
        debug!("{stage} {}", if is_on { "on" } else { "off" });
    } else if is_on != wanted {
        debug!("{stage} held {} by minimum cycle time", if is_on { "on" } else { "off" });
    }

    times.record(was_on, is_on, now);
    is_on
}

/// Drops a stage regardless of its run timer, still stamping the off time.
pub fn force_off(times: &mut StageTimes, was_on: bool, now: DateTime<Utc>) -> bool {
    times.record(was_on, false, now);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 15, 0, 0).unwrap()
    }

    #[test]
    fn demand_thresholds() {
        let config = EquipmentConfig::default();
        assert_eq!(stage_demand(&config, 1.9), (false, false));
        assert_eq!(stage_demand(&config, 2.0), (true, false));
        assert_eq!(stage_demand(&config, 6.0), (true, false));
        assert_eq!(stage_demand(&config, 7.0), (true, true));
    }

    #[test]
    fn min_run_holds_stage_on() {
        let config = EquipmentConfig::default();
        let mut times = StageTimes::default();

        assert!(guard(&config, "stage1", &mut times, false, true, t0()));
        assert_eq!(times.on_since, Some(t0()));

        let later = t0() + Duration::seconds(419);
        assert!(guard(&config, "stage1", &mut times, true, false, later));
        assert_eq!(times.on_since, Some(t0()));

        let released = t0() + Duration::seconds(420);
        assert!(!guard(&config, "stage1", &mut times, true, false, released));
        assert_eq!(times.off_since, Some(released));
    }

    #[test]
    fn min_off_holds_stage_off() {
        let config = EquipmentConfig::default();
        let mut times = StageTimes {
            on_since: None,
            off_since: Some(t0()),
        };

        assert!(!guard(&config, "stage2", &mut times, false, true, t0() + Duration::seconds(299)));
        assert!(guard(&config, "stage2", &mut times, false, true, t0() + Duration::seconds(300)));
    }

    #[test]
    fn force_off_stamps_off_time() {
        let mut times = StageTimes {
            on_since: Some(t0()),
            off_since: None,
        };
        let now = t0() + Duration::seconds(5);

        assert!(!force_off(&mut times, true, now));
        assert_eq!(times.off_since, Some(now));
        assert_eq!(times.on_since, None);
    }
}
