use serde_json::json;

use crate::error::AttendanceError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a domain failure onto the wire. Unexpected failures are logged in full
/// and reach the client only as a generic message.
pub fn domain_err(id: &str, method: &str, e: &AttendanceError) -> serde_json::Value {
    match e {
        AttendanceError::AlreadyMarked {
            slot_number,
            marked_at,
        } => err(
            id,
            e.code(),
            e.to_string(),
            Some(json!({ "slotNumber": slot_number, "markedAt": marked_at })),
        ),
        AttendanceError::StoreUnavailable(_) => {
            tracing::warn!(method, error = %e, "store unavailable");
            err(
                id,
                e.code(),
                "the attendance store is busy, please try again",
                Some(json!({ "retryable": e.is_retryable() })),
            )
        }
        AttendanceError::Unexpected(_) => {
            tracing::error!(method, error = %e, "unexpected failure");
            err(
                id,
                e.code(),
                "an unexpected error occurred, please try again or contact support",
                None,
            )
        }
        _ => err(id, e.code(), e.to_string(), None),
    }
}
