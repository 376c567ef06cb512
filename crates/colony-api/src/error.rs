use std::fmt;

use colony_core::{AdmissionError, CatalogError, WorldError};
use contracts::{ApiError, ErrorCode};

use crate::persistence::PersistenceError;

#[derive(Debug)]
pub enum EngineError {
    Admission(AdmissionError),
    Persistence(PersistenceError),
    Snapshot(WorldError),
    Config(Vec<String>),
    Catalog(CatalogError),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Admission(AdmissionError::UnknownTask { .. }) => ErrorCode::UnknownTask,
            Self::Admission(AdmissionError::PrerequisiteUnmet { .. }) => {
                ErrorCode::PrerequisiteUnmet
            }
            Self::Admission(AdmissionError::InsufficientResources { .. }) => {
                ErrorCode::InsufficientResources
            }
            Self::Persistence(PersistenceError::Timeout { .. }) => ErrorCode::PersistenceTimeout,
            Self::Persistence(PersistenceError::Corrupt(_)) | Self::Snapshot(_) => {
                ErrorCode::InvalidSnapshot
            }
            Self::Persistence(PersistenceError::Join(_)) => ErrorCode::InternalError,
            Self::Persistence(_) => ErrorCode::PersistenceFailed,
            Self::Config(_) | Self::Catalog(_) => ErrorCode::InvalidConfig,
        }
    }

    /// Cross-boundary form with a short message and the full detail.
    pub fn to_api_error(&self) -> ApiError {
        let message = match self {
            Self::Admission(AdmissionError::UnknownTask { .. }) => "task is not in the catalog",
            Self::Admission(AdmissionError::PrerequisiteUnmet { .. }) => {
                "task prerequisite has not completed yet"
            }
            Self::Admission(AdmissionError::InsufficientResources { .. }) => {
                "not enough resources to fund the task"
            }
            Self::Persistence(PersistenceError::Timeout { .. }) => {
                "world could not be saved in time; the operation was rolled back"
            }
            Self::Persistence(_) => "world persistence failed; the operation was rolled back",
            Self::Snapshot(_) => "stored world does not match the task catalog",
            Self::Config(_) => "engine config is invalid",
            Self::Catalog(_) => "task catalog is invalid",
        };
        ApiError::new(self.code(), message, Some(self.to_string()))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admission(err) => write!(f, "{err}"),
            Self::Persistence(err) => write!(f, "{err}"),
            Self::Snapshot(err) => write!(f, "invalid stored world: {err}"),
            Self::Config(problems) => write!(f, "invalid config: {}", problems.join("; ")),
            Self::Catalog(err) => write!(f, "invalid catalog: {err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<AdmissionError> for EngineError {
    fn from(value: AdmissionError) -> Self {
        Self::Admission(value)
    }
}

impl From<PersistenceError> for EngineError {
    fn from(value: PersistenceError) -> Self {
        Self::Persistence(value)
    }
}

impl From<WorldError> for EngineError {
    fn from(value: WorldError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<CatalogError> for EngineError {
    fn from(value: CatalogError) -> Self {
        Self::Catalog(value)
    }
}
