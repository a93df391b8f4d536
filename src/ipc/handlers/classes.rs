use crate::ipc::error::{domain_err, err, ok};
use crate::ipc::helpers::{
    engine, optional_str, required_i64, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Role;
use serde_json::json;

fn handle_users_upsert(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let id = required_str(req, "id")?;
    let name = required_str(req, "name")?;
    let role_raw = required_str(req, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(err(&req.id, "bad_params", "role must be student or teacher", None));
    };
    let user = engine
        .upsert_user(&id, &name, role)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "user": user })))
}

fn handle_classes_create(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let teacher_id = required_str(req, "teacherId")?;
    let name = required_str(req, "name")?;
    let subject = optional_str(req, "subject").unwrap_or_default();
    let class = engine
        .create_class(&teacher_id, &name, &subject)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "class": class })))
}

fn handle_classes_join(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let class_id = required_i64(req, "classId")?;
    let student_id = required_str(req, "studentId")?;
    let enrollment = engine
        .join_class(class_id, &student_id)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "enrollment": enrollment })))
}

fn handle_classes_approve(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let class_id = required_i64(req, "classId")?;
    let teacher_id = required_str(req, "teacherId")?;
    let student_id = required_str(req, "studentId")?;
    let enrollment = engine
        .approve_enrollment(class_id, &teacher_id, &student_id)
        .map_err(|e| domain_err(&req.id, &req.method, &e))?;
    Ok(ok(&req.id, json!({ "enrollment": enrollment })))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "users.upsert" => handle_users_upsert(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.join" => handle_classes_join(state, req),
        "classes.approve" => handle_classes_approve(state, req),
        _ => return None,
    };
    Some(res.unwrap_or_else(|e| e))
}
