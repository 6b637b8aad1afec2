use hvac_protocol::{CommandResponse, ErrorKind};
use thiserror::Error;

/// Closed error taxonomy (`spec.md` §7). `StorageFailure` and
/// `PhysicsTransient` are recoverable by construction: the scheduler state
/// they're raised from is left unchanged (§7 "No silent state divergence").
#[derive(Error, Debug)]
pub enum HvacError {
    #[error("room not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage write failed: {0}")]
    StorageFailure(String),

    #[error("physics step failed for room {room}: {message}")]
    PhysicsTransient { room: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl HvacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HvacError::NotFound(_) => ErrorKind::NotFound,
            HvacError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            HvacError::StorageFailure(_) => ErrorKind::StorageFailure,
            HvacError::PhysicsTransient { .. } => ErrorKind::PhysicsTransient,
            HvacError::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<HvacError> for CommandResponse {
    fn from(err: HvacError) -> Self {
        CommandResponse::error(err.kind(), err.to_string())
    }
}
