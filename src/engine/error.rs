use ulid::Ulid;

use crate::model::{AppointmentStatus, ProviderId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid time input: {0}")]
    InvalidTimeInput(String),
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("provider {0} has no recurring schedule")]
    ScheduleNotFound(ProviderId),
    #[error("slot already booked: overlaps appointment {0}")]
    SlotAlreadyBooked(Ulid),
    #[error("customer already booked: overlaps appointment {0}")]
    CustomerAlreadyBooked(Ulid),
    #[error("provider not found: {0}")]
    ProviderNotFound(ProviderId),
    #[error("appointment not found: {0}")]
    AppointmentNotFound(Ulid),
    #[error("service not found: {0}")]
    ServiceNotFound(Ulid),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("appointment {id} is {} and cannot change", .status.as_str())]
    InvalidTransition { id: Ulid, status: AppointmentStatus },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::SlotAlreadyBooked(_) | EngineError::CustomerAlreadyBooked(_)
        )
    }
}
