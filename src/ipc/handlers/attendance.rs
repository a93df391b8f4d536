use crate::attendance::{CommittedAttendance, DirectMark, ManualMark};
use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::helpers::{
    engine, optional_i64, optional_str, required_i64, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use serde_json::json;

fn committed_json(c: &CommittedAttendance) -> serde_json::Value {
    json!({
        "studentName": c.student_name,
        "status": c.status.as_str(),
        "slotNumber": c.slot_number,
        "markedAt": c.marked_at
    })
}

fn handle_commit(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let code = required_str(req, "code")?;
    let student_id = required_str(req, "studentId")?;
    let committed = engine
        .commit_attendance(&code, &student_id)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, committed_json(&committed)))
}

fn status_param(req: &Request) -> Result<AttendanceStatus, serde_json::Value> {
    match optional_str(req, "status") {
        None => Ok(AttendanceStatus::Present),
        Some(s) => AttendanceStatus::parse(&s).ok_or_else(|| {
            err(&req.id, "bad_params", "status must be present or absent", None)
        }),
    }
}

fn handle_mark(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let mark = DirectMark {
        class_id: required_i64(req, "classId")?,
        student_id: required_str(req, "studentId")?,
        slot_number: optional_i64(req, "slotNumber")?.unwrap_or(1),
        status: status_param(req)?,
    };
    let committed = engine
        .mark_direct(&mark)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "record": committed.record })))
}

fn handle_mark_manual(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let status = status_param(req)?;
    let mark = ManualMark {
        class_id: required_i64(req, "classId")?,
        teacher_id: required_str(req, "teacherId")?,
        student_id: required_str(req, "studentId")?,
        slot_number: optional_i64(req, "slotNumber")?.unwrap_or(1),
        status,
    };
    let committed = engine
        .mark_manual(&mark)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, committed_json(&committed)))
}

fn handle_check(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let class_id = required_i64(req, "classId")?;
    let date = required_str(req, "date")?;
    let slot_number = optional_i64(req, "slotNumber")?;
    let record = engine
        .check_attendance(&student_id, class_id, &date, slot_number)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "record": record })))
}

fn handle_history(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let start = optional_str(req, "startDate");
    let end = optional_str(req, "endDate");
    let rows = engine
        .attendance_history(&student_id, start.as_deref(), end.as_deref())
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "records": rows })))
}

fn handle_summary(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let teacher_id = optional_str(req, "teacherId");
    let class_id = optional_i64(req, "classId")?;
    let date = optional_str(req, "date");
    let summary = engine
        .attendance_summary(teacher_id.as_deref(), class_id, date.as_deref())
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!(summary)))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "attendance.commit" => handle_commit(state, req),
        "attendance.mark" => handle_mark(state, req),
        "attendance.markManual" => handle_mark_manual(state, req),
        "attendance.check" => handle_check(state, req),
        "attendance.history" => handle_history(state, req),
        "attendance.summary" => handle_summary(state, req),
        _ => return None,
    };
    Some(res.unwrap_or_else(|e| e))
}
