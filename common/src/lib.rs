pub mod config;
pub mod cooling;
pub mod doas;
pub mod error;
pub mod heating;
pub mod schedule;
pub mod sensors;
pub mod state;
pub mod timers;
pub mod topics;
pub mod types;

pub use config::{EquipmentConfig, MqttConfig, RuntimeConfig};
pub use doas::{ControlInput, DoasEngine};
pub use error::ControlFault;
pub use schedule::OccupancySchedule;
pub use sensors::SensorSnapshot;
pub use state::{PersistedState, StageTimes};
pub use topics::*;
pub use types::{
    AlarmStatus, ControlMode, ControlResult, FaultCode, OverrideCommand, PreviousCycleSnapshot,
    Readings,
};
