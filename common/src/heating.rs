use chrono::{DateTime, Utc};

use crate::{config::EquipmentConfig, timers};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValveCommand {
    pub enabled: bool,
    pub voltage: f64,
}

impl ValveCommand {
    pub const OFF: Self = Self {
        enabled: false,
        voltage: 0.0,
    };
}

/// Gas valve drive shared by heating and reheat.
///
/// `demand_f` decides whether to fire at all. While `since` is younger than
/// the min-fire hold the valve sits at min-fire; after that it modulates on
/// `modulation_error_f`, clamped to `[min_fire_v, gas_valve_max_v]`.
pub fn fire(
    config: &EquipmentConfig,
    since: &mut Option<DateTime<Utc>>,
    demand_f: f64,
    modulation_error_f: f64,
    now: DateTime<Utc>,
) -> ValveCommand {
    if demand_f <= 0.0 {
        *since = None;
        return ValveCommand::OFF;
    }

    let started = *since.get_or_insert(now);
    if timers::elapsed_ms(started, now) < config.min_fire_hold_ms {
        return ValveCommand {
            enabled: true,
            voltage: config.min_fire_v,
        };
    }

    let voltage = config.min_fire_v + modulation_error_f * config.valve_gain_v_per_f();
    ValveCommand {
        enabled: true,
        voltage: voltage.clamp(config.min_fire_v, config.gas_valve_max_v),
    }
}
