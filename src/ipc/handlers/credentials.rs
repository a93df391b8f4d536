use crate::ipc::error::{domain_err, ok};
use crate::ipc::helpers::{
    engine, optional_i64, required_i64, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_generate(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let class_id = required_i64(req, "classId")?;
    let slot_number = optional_i64(req, "slotNumber")?.unwrap_or(1);
    let issuer_id = required_str(req, "issuerId")?;

    let issued = engine
        .issue_credential(class_id, slot_number, &issuer_id)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(
        &req.id,
        json!({
            "code": issued.code,
            "expiresAt": issued.expires_at,
            "classId": issued.class_id,
            "className": issued.class_name,
            "slotNumber": issued.slot_number
        }),
    ))
}

fn handle_invalidate(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let code = required_str(req, "code")?;
    let issuer_id = required_str(req, "issuerId")?;
    engine
        .invalidate_credential(&code, &issuer_id)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_validate(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let code = required_str(req, "code")?;
    let student_id = required_str(req, "studentId")?;
    let v = engine
        .validate_credential(&code, &student_id)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(
        &req.id,
        json!({
            "classId": v.class_id,
            "className": v.class_name,
            "studentName": v.student_name,
            "slotNumber": v.slot_number,
            "valid": v.valid
        }),
    ))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "credentials.generate" => handle_generate(state, req),
        "credentials.invalidate" => handle_invalidate(state, req),
        "credentials.validate" => handle_validate(state, req),
        _ => return None,
    };
    Some(res.unwrap_or_else(|e| e))
}
