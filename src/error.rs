use thiserror::Error;

pub type AttendanceResult<T> = Result<T, AttendanceError>;

/// Failure kinds shared by every attendance operation.
///
/// Only `StoreUnavailable` is worth retrying; everything else is final for the
/// request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttendanceError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("credential has expired, ask your teacher for a new one")]
    Expired,

    #[error("attendance already marked for slot {slot_number} at {marked_at}")]
    AlreadyMarked { slot_number: u8, marked_at: String },

    #[error("{0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AttendanceError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Wire code used in protocol error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Expired => "expired",
            Self::AlreadyMarked { .. } => "already_marked",
            Self::Validation(_) => "bad_params",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

impl From<rusqlite::Error> for AttendanceError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::StoreUnavailable(e.to_string())
            }
            _ => Self::Unexpected(e.to_string()),
        }
    }
}
