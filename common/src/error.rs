use thiserror::Error;

/// A defect in the computation itself. Never surfaces past `DoasEngine::evaluate`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlFault {
    #[error("invalid equipment configuration: {0}")]
    InvalidConfig(String),
    #[error("computed {field} is not a finite number")]
    NonFiniteOutput { field: &'static str },
}
