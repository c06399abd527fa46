use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

use crate::{
    config::EquipmentConfig,
    cooling,
    error::ControlFault,
    heating::{self, ValveCommand},
    sensors::{self, SensorSnapshot},
    state::PersistedState,
    timers::{self, Debounce},
    types::{
        AlarmStatus, ControlMode, ControlResult, FaultCode, OverrideCommand,
        PreviousCycleSnapshot, Readings,
    },
};

const DAMPER_OPEN: f64 = 100.0;
const DAMPER_CLOSED: f64 = 0.0;

/// Everything one tick reads. `now` is local wall-clock time; occupancy uses
/// its time of day and every persisted timer uses its UTC instant.
#[derive(Debug, Clone, Copy)]
pub struct ControlInput<'a> {
    pub snapshot: &'a SensorSnapshot,
    pub overrides: Option<&'a OverrideCommand>,
    /// `None` on the first tick after the host starts.
    pub previous: Option<&'a PreviousCycleSnapshot>,
    pub now: DateTime<FixedOffset>,
}

/// Stage state the engine last commanded, read back from the persisted stamps
/// so it survives a host restart and ignores operator overrides.
#[derive(Debug, Clone, Copy, Default)]
struct Commanded {
    stage1: bool,
    stage2: bool,
}

impl From<&PersistedState> for Commanded {
    fn from(state: &PersistedState) -> Self {
        Self {
            stage1: state.stage1.on_since.is_some(),
            stage2: state.stage2.on_since.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Conditioning {
    heat: ValveCommand,
    stage1: bool,
    stage2: bool,
}

/// Control decisions for one DOAS unit.
///
/// The engine holds only configuration. Every timer lives in the
/// [`PersistedState`] handed to each call, so ticks stay restart tolerant as
/// long as the host stores that state durably.
#[derive(Debug, Clone)]
pub struct DoasEngine {
    config: EquipmentConfig,
}

impl DoasEngine {
    pub fn new(config: EquipmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EquipmentConfig {
        &self.config
    }

    /// Never fails: an evaluation fault becomes the fixed safe result.
    pub fn evaluate(&self, input: &ControlInput<'_>, state: &mut PersistedState) -> ControlResult {
        self.evaluate_cycle(input, state).0
    }

    /// Evaluates one tick and also returns the snapshot to hand the next tick.
    ///
    /// The snapshot reflects what the engine decided before overrides were
    /// merged, so an operator forcing an actuator never looks like a transition.
    pub fn evaluate_cycle(
        &self,
        input: &ControlInput<'_>,
        state: &mut PersistedState,
    ) -> (ControlResult, PreviousCycleSnapshot) {
        let computed = match self.compute(input, state) {
            Ok(result) => result,
            Err(fault) => {
                warn!("control evaluation failed, commanding safe state: {fault}");
                ControlResult::fallback(
                    &self.config,
                    sensors::raw_readings(input.snapshot),
                    &fault,
                    input.now.with_timezone(&Utc),
                )
            }
        };
        let previous = PreviousCycleSnapshot::from(&computed);
        (self.with_overrides(computed, input.overrides), previous)
    }

    pub fn try_evaluate(
        &self,
        input: &ControlInput<'_>,
        state: &mut PersistedState,
    ) -> Result<ControlResult, ControlFault> {
        let computed = self.compute(input, state)?;
        Ok(self.with_overrides(computed, input.overrides))
    }

    /// Overrides only touch what goes to hardware, never a latched shutdown.
    fn with_overrides(
        &self,
        mut result: ControlResult,
        overrides: Option<&OverrideCommand>,
    ) -> ControlResult {
        if let Some(overrides) = overrides {
            if !result.emergency_shutdown {
                result.apply_overrides(overrides, &self.config);
            }
        }
        result
    }

    fn compute(
        &self,
        input: &ControlInput<'_>,
        state: &mut PersistedState,
    ) -> Result<ControlResult, ControlFault> {
        let config = &self.config;
        config.validate()?;

        let now = input.now.with_timezone(&Utc);
        let commanded = Commanded::from(&*state);

        let mut faults = Vec::new();
        let readings = sensors::read(input.snapshot, input.previous, config, &mut faults);
        let setpoint = sensors::resolve_setpoint(input.snapshot, input.overrides, config);
        let heating_lockout = readings.outdoor_temp > config.heating_lockout_f;
        let cooling_lockout = readings.outdoor_temp < config.cooling_lockout_f;
        let occupied = config.occupancy.is_occupied(input.now);

        if readings.supply_temp >= config.high_limit_f {
            faults.push(FaultCode::HighTempLimit);
            let mut result = self.shutdown(
                state,
                commanded,
                readings,
                setpoint,
                "High temperature limit exceeded".to_string(),
                faults,
                now,
            );
            result.occupied = occupied;
            result.heating_lockout = heating_lockout;
            result.cooling_lockout = cooling_lockout;
            return Ok(result);
        }

        let low_limit = timers::debounce(
            &mut state.low_temp_since,
            readings.supply_temp <= config.low_limit_f,
            now,
            config.freeze_protection_ms,
        );
        let degraded = match low_limit {
            Debounce::Elapsed if readings.outdoor_temp > config.cooling_lockout_f => {
                warn!(
                    "supply {:.1}F at low limit with mild outdoor air, conditioning disabled",
                    readings.supply_temp
                );
                faults.push(FaultCode::LowTempCoolingDisabled);
                true
            }
            Debounce::Elapsed => {
                faults.push(FaultCode::LowTempLimit);
                let reason = format!(
                    "Low temperature limit exceeded ({:.1}°F) with cold outdoor air ({:.1}°F)",
                    readings.supply_temp, readings.outdoor_temp
                );
                let mut result =
                    self.shutdown(state, commanded, readings, setpoint, reason, faults, now);
                result.occupied = occupied;
                result.heating_lockout = heating_lockout;
                result.cooling_lockout = cooling_lockout;
                return Ok(result);
            }
            Debounce::Pending { .. } | Debounce::Inactive => false,
        };

        let damper_position = self.damper_position(state, occupied, degraded, &readings, now);
        let fan_enabled = damper_position > DAMPER_CLOSED;
        let startup_complete = self.fan_startup(state, fan_enabled, input.previous, now);

        let mode = if occupied && startup_complete {
            self.arbitrate(state, &readings, heating_lockout, cooling_lockout)
        } else {
            state.dehumidifying = false;
            state.reheat_since = None;
            ControlMode::Unoccupied
        };

        let conditioning = if degraded {
            self.all_off(state, commanded, now)
        } else {
            self.condition(mode, state, commanded, &readings, setpoint, heating_lockout, now)
        };

        let result = ControlResult {
            equipment_id: config.equipment_id.clone(),
            location_id: config.location_id.clone(),
            fan_enabled,
            damper_position,
            fan_speed_v: if fan_enabled {
                config.fan_full_speed_v
            } else {
                0.0
            },
            heat_enabled: conditioning.heat.enabled,
            gas_valve_v: conditioning.heat.voltage,
            cooling_stage1: conditioning.stage1,
            cooling_stage2: conditioning.stage2,
            system_enabled: mode != ControlMode::Unoccupied,
            emergency_shutdown: false,
            shutdown_reason: None,
            readings,
            setpoint,
            mode,
            occupied,
            heating_lockout,
            cooling_lockout,
            dehumidifying: state.dehumidifying,
            alarm_status: if faults.is_empty() {
                AlarmStatus::Normal
            } else {
                AlarmStatus::Warning
            },
            faults,
            error: None,
            timestamp: now,
        };
        result.ensure_finite()?;
        Ok(result)
    }

    /// Damper is closed when unoccupied. While occupied it stays open unless
    /// supply air has sat below the freeze threshold for the full
    /// freeze-protection duration. A degraded low-limit fault keeps it open so
    /// mild outdoor air can recover supply temperature.
    fn damper_position(
        &self,
        state: &mut PersistedState,
        occupied: bool,
        degraded: bool,
        readings: &Readings,
        now: DateTime<Utc>,
    ) -> f64 {
        if !occupied {
            state.freeze_protection_since = None;
            return DAMPER_CLOSED;
        }

        let freeze = timers::debounce(
            &mut state.freeze_protection_since,
            readings.supply_temp < self.config.freeze_protection_f,
            now,
            self.config.freeze_protection_ms,
        );
        match freeze {
            Debounce::Elapsed if !degraded => {
                debug!("freeze protection holding damper closed");
                DAMPER_CLOSED
            }
            _ => DAMPER_OPEN,
        }
    }

    /// Returns true once the fan has been running past the startup delay.
    fn fan_startup(
        &self,
        state: &mut PersistedState,
        fan_enabled: bool,
        previous: Option<&PreviousCycleSnapshot>,
        now: DateTime<Utc>,
    ) -> bool {
        if !fan_enabled {
            state.fan_startup_since = None;
            return false;
        }

        let starting = previous.is_some_and(|prev| !prev.fan_enabled);
        if starting && state.fan_startup_since.is_none() {
            debug!("fan starting, conditioning held for {}ms", self.config.fan_startup_ms);
            state.fan_startup_since = Some(now);
        }

        if timers::has_elapsed(state.fan_startup_since, now, self.config.fan_startup_ms) {
            state.fan_startup_since = None;
            true
        } else {
            false
        }
    }

    fn arbitrate(
        &self,
        state: &mut PersistedState,
        readings: &Readings,
        heating_lockout: bool,
        cooling_lockout: bool,
    ) -> ControlMode {
        let config = &self.config;
        let outdoor = readings.outdoor_temp;

        let dehumidifying = if state.dehumidifying {
            let dried_out = readings.outdoor_humidity < config.dehum_outdoor_rh_low
                && readings.indoor_humidity < config.dehum_indoor_rh_low;
            !(outdoor <= config.dehum_outdoor_temp_f || dried_out)
        } else {
            outdoor > config.dehum_outdoor_temp_f
                && (readings.outdoor_humidity > config.dehum_outdoor_rh_high
                    || readings.indoor_humidity > config.dehum_indoor_rh_high)
        };

        if dehumidifying != state.dehumidifying {
            debug!(
                "dehumidification {}",
                if dehumidifying { "entered" } else { "left" }
            );
            if !dehumidifying {
                state.reheat_since = None;
            }
        }
        state.dehumidifying = dehumidifying;

        if dehumidifying {
            ControlMode::Dehumidification
        } else if outdoor < config.heating_setpoint_f && !heating_lockout {
            ControlMode::Heating
        } else if outdoor >= config.cooling_setpoint_f && !cooling_lockout {
            ControlMode::Cooling
        } else {
            ControlMode::Neutral
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn condition(
        &self,
        mode: ControlMode,
        state: &mut PersistedState,
        commanded: Commanded,
        readings: &Readings,
        setpoint: f64,
        heating_lockout: bool,
        now: DateTime<Utc>,
    ) -> Conditioning {
        let config = &self.config;
        let supply_error = setpoint - readings.supply_temp;
        let space_over = readings.space_temp - setpoint;

        match mode {
            ControlMode::Heating => {
                state.reheat_since = None;
                let heat = heating::fire(
                    config,
                    &mut state.heat_since,
                    setpoint - readings.space_temp,
                    supply_error,
                    now,
                );
                Conditioning {
                    heat,
                    stage1: cooling::force_off(&mut state.stage1, commanded.stage1, now),
                    stage2: cooling::force_off(&mut state.stage2, commanded.stage2, now),
                }
            }
            ControlMode::Cooling => {
                state.heat_since = None;
                state.reheat_since = None;
                let (want1, want2) = cooling::stage_demand(config, space_over);
                Conditioning {
                    heat: ValveCommand::OFF,
                    stage1: cooling::guard(
                        config,
                        "stage1",
                        &mut state.stage1,
                        commanded.stage1,
                        want1,
                        now,
                    ),
                    stage2: cooling::guard(
                        config,
                        "stage2",
                        &mut state.stage2,
                        commanded.stage2,
                        want2,
                        now,
                    ),
                }
            }
            ControlMode::Dehumidification => {
                state.heat_since = None;
                let cooling_allowed = space_over > -config.space_tolerance_f;
                let reheat_allowed = space_over < config.space_tolerance_f && !heating_lockout;

                let heat = if reheat_allowed {
                    heating::fire(config, &mut state.reheat_since, supply_error, supply_error, now)
                } else {
                    state.reheat_since = None;
                    ValveCommand::OFF
                };

                Conditioning {
                    heat,
                    stage1: cooling::guard(
                        config,
                        "stage1",
                        &mut state.stage1,
                        commanded.stage1,
                        cooling_allowed,
                        now,
                    ),
                    stage2: cooling::force_off(&mut state.stage2, commanded.stage2, now),
                }
            }
            ControlMode::Neutral
            | ControlMode::Unoccupied
            | ControlMode::Shutdown
            | ControlMode::Error => self.all_off(state, commanded, now),
        }
    }

    fn all_off(
        &self,
        state: &mut PersistedState,
        commanded: Commanded,
        now: DateTime<Utc>,
    ) -> Conditioning {
        state.heat_since = None;
        state.reheat_since = None;
        Conditioning {
            heat: ValveCommand::OFF,
            stage1: cooling::force_off(&mut state.stage1, commanded.stage1, now),
            stage2: cooling::force_off(&mut state.stage2, commanded.stage2, now),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn shutdown(
        &self,
        state: &mut PersistedState,
        commanded: Commanded,
        readings: Readings,
        setpoint: f64,
        reason: String,
        faults: Vec<FaultCode>,
        now: DateTime<Utc>,
    ) -> ControlResult {
        warn!("emergency shutdown: {reason}");
        self.all_off(state, commanded, now);
        state.fan_startup_since = None;
        ControlResult::shutdown(&self.config, readings, setpoint, reason, faults, now)
    }
}
