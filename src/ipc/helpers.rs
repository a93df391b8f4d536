use std::sync::Arc;

use crate::engine::Engine;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

/// A handler's reply: the success envelope or the error envelope.
pub type HandlerResult = Result<serde_json::Value, serde_json::Value>;

pub fn engine(state: &AppState, req: &Request) -> Result<Arc<Engine>, serde_json::Value> {
    state
        .engine()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Integers may arrive as JSON numbers or numeric strings.
pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    let Some(v) = req.params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    if let Some(n) = v.as_i64() {
        return Ok(Some(n));
    }
    v.as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    optional_i64(req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}
