use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::EquipmentConfig, error::ControlFault};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Heating,
    Cooling,
    Dehumidification,
    Neutral,
    Unoccupied,
    Shutdown,
    Error,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "heating",
            Self::Cooling => "cooling",
            Self::Dehumidification => "dehumidification",
            Self::Neutral => "neutral",
            Self::Unoccupied => "unoccupied",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Normal,
    Warning,
    Alarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCode {
    InvalidSupplyTempSensor,
    InvalidSpaceTempSensor,
    LowTempCoolingDisabled,
    HighTempLimit,
    LowTempLimit,
    ControlSystemError,
}

impl FaultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSupplyTempSensor => "INVALID_SUPPLY_TEMP_SENSOR",
            Self::InvalidSpaceTempSensor => "INVALID_SPACE_TEMP_SENSOR",
            Self::LowTempCoolingDisabled => "LOW_TEMP_COOLING_DISABLED",
            Self::HighTempLimit => "HIGH_TEMP_LIMIT",
            Self::LowTempLimit => "LOW_TEMP_LIMIT",
            Self::ControlSystemError => "CONTROL_SYSTEM_ERROR",
        }
    }
}

/// Sensor values after alias resolution and range substitution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readings {
    pub supply_temp: f64,
    pub space_temp: f64,
    pub outdoor_temp: f64,
    pub outdoor_humidity: f64,
    pub indoor_humidity: f64,
}

/// Operator commands from the UI. Present fields win over computed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverrideCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_valve_position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooling_stage1: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooling_stage2: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_temperature_setpoint: Option<f64>,
}

impl OverrideCommand {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The slice of last tick's result that transition detection needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousCycleSnapshot {
    pub fan_enabled: bool,
    pub heat_enabled: bool,
    pub cooling_stage1: bool,
    pub cooling_stage2: bool,
    pub supply_temp: f64,
    pub space_temp: f64,
}

impl From<&ControlResult> for PreviousCycleSnapshot {
    fn from(result: &ControlResult) -> Self {
        Self {
            fan_enabled: result.fan_enabled,
            heat_enabled: result.heat_enabled,
            cooling_stage1: result.cooling_stage1,
            cooling_stage2: result.cooling_stage2,
            supply_temp: result.readings.supply_temp,
            space_temp: result.readings.space_temp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResult {
    pub equipment_id: String,
    pub location_id: String,

    pub fan_enabled: bool,
    pub damper_position: f64,
    pub fan_speed_v: f64,
    pub heat_enabled: bool,
    pub gas_valve_v: f64,
    pub cooling_stage1: bool,
    pub cooling_stage2: bool,

    pub system_enabled: bool,
    pub emergency_shutdown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_reason: Option<String>,

    pub readings: Readings,
    pub setpoint: f64,
    pub mode: ControlMode,
    pub occupied: bool,
    pub heating_lockout: bool,
    pub cooling_lockout: bool,
    pub dehumidifying: bool,
    pub alarm_status: AlarmStatus,
    pub faults: Vec<FaultCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ControlResult {
    /// Everything off, latched as an emergency shutdown.
    pub fn shutdown(
        config: &EquipmentConfig,
        readings: Readings,
        setpoint: f64,
        reason: String,
        faults: Vec<FaultCode>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            equipment_id: config.equipment_id.clone(),
            location_id: config.location_id.clone(),
            fan_enabled: false,
            damper_position: 0.0,
            fan_speed_v: 0.0,
            heat_enabled: false,
            gas_valve_v: 0.0,
            cooling_stage1: false,
            cooling_stage2: false,
            system_enabled: false,
            emergency_shutdown: true,
            shutdown_reason: Some(reason),
            readings,
            setpoint,
            mode: ControlMode::Shutdown,
            occupied: false,
            heating_lockout: false,
            cooling_lockout: false,
            dehumidifying: false,
            alarm_status: AlarmStatus::Alarm,
            faults,
            error: None,
            timestamp: now,
        }
    }

    /// The fixed safe result returned when evaluation itself fails.
    pub fn fallback(
        config: &EquipmentConfig,
        readings: Readings,
        fault: &ControlFault,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            mode: ControlMode::Error,
            shutdown_reason: Some("Control system error".to_string()),
            error: Some(fault.to_string()),
            ..Self::shutdown(
                config,
                readings,
                config.default_setpoint_f,
                String::new(),
                vec![FaultCode::ControlSystemError],
                now,
            )
        }
    }

    pub fn apply_overrides(&mut self, overrides: &OverrideCommand, config: &EquipmentConfig) {
        if let Some(fan) = overrides.fan_enabled {
            self.fan_enabled = fan;
            self.fan_speed_v = if fan { config.fan_full_speed_v } else { 0.0 };
        }
        if let Some(heat) = overrides.heat_enabled {
            self.heat_enabled = heat;
        }
        if let Some(position) = overrides.gas_valve_position {
            self.gas_valve_v = position;
        }
        if let Some(stage1) = overrides.cooling_stage1 {
            self.cooling_stage1 = stage1;
        }
        if let Some(stage2) = overrides.cooling_stage2 {
            self.cooling_stage2 = stage2;
        }
    }

    pub fn ensure_finite(&self) -> Result<(), ControlFault> {
        let outputs = [
            ("damperPosition", self.damper_position),
            ("fanSpeedV", self.fan_speed_v),
            ("gasValveV", self.gas_valve_v),
            ("setpoint", self.setpoint),
        ];
        match outputs.iter().find(|(_, value)| !value.is_finite()) {
            Some((field, _)) => Err(ControlFault::NonFiniteOutput { field: *field }),
            None => Ok(()),
        }
    }
}
