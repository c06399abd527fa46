use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timers and flags the engine carries between ticks.
///
/// The host owns storage; the engine is the only writer. A `None` timestamp
/// means "not currently timing" and is omitted from the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_protection_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_temp_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_startup_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reheat_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dehumidifying: bool,
    #[serde(skip_serializing_if = "StageTimes::is_clear")]
    pub stage1: StageTimes,
    #[serde(skip_serializing_if = "StageTimes::is_clear")]
    pub stage2: StageTimes,
}

/// When a cooling stage last turned on or off. At most one is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageTimes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub off_since: Option<DateTime<Utc>>,
}

impl StageTimes {
    pub fn is_clear(&self) -> bool {
        self.on_since.is_none() && self.off_since.is_none()
    }

    /// Re-stamps only when the actual stage state flips.
    pub fn record(&mut self, was_on: bool, is_on: bool, now: DateTime<Utc>) {
        if was_on == is_on {
            return;
        }
        if is_on {
            self.on_since = Some(now);
            self.off_since = None;
        } else {
            self.off_since = Some(now);
            self.on_since = None;
        }
    }
}

impl PersistedState {
    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cleared_fields_are_omitted() {
        let state = PersistedState::default();
        assert_eq!(state.to_json().unwrap(), b"{}".to_vec());
    }

    #[test]
    fn survives_a_restart() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 18, 0, 0).unwrap();
        let mut state = PersistedState {
            heat_since: Some(now),
            dehumidifying: true,
            ..PersistedState::default()
        };
        state.stage1.record(false, true, now);

        let raw = state.to_json().unwrap();
        let text = String::from_utf8(raw.clone()).unwrap();
        assert!(text.contains("heatSince"));
        assert!(text.contains("onSince"));
        assert!(!text.contains("stage2"));

        assert_eq!(PersistedState::from_json(&raw).unwrap(), state);
    }

    #[test]
    fn record_stamps_only_on_change() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 18, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 18, 1, 0).unwrap();
        let mut times = StageTimes::default();

        times.record(false, true, t0);
        times.record(true, true, t1);
        assert_eq!(times.on_since, Some(t0));

        times.record(true, false, t1);
        assert_eq!(times.on_since, None);
        assert_eq!(times.off_since, Some(t1));
    }
}
