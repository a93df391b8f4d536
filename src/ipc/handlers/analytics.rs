use crate::ipc::error::{domain_err, ok};
use crate::ipc::helpers::{engine, optional_str, required_str, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_class_wise(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let teacher_id = required_str(req, "teacherId")?;
    let start = optional_str(req, "startDate");
    let end = optional_str(req, "endDate");
    let report = engine
        .class_wise_analytics(&teacher_id, start.as_deref(), end.as_deref())
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!(report)))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.classWise" => Some(handle_class_wise(state, req).unwrap_or_else(|e| e)),
        _ => None,
    }
}
