use crate::ipc::error::ok;
use crate::ipc::helpers::{engine, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::slots::{self, SCHEDULE};
use serde_json::json;

fn slot_times_json() -> Vec<serde_json::Value> {
    SCHEDULE
        .iter()
        .map(|s| {
            json!({
                "slot": s.number,
                "start24hr": slots::format_24h(s.start_time()),
                "end24hr": slots::format_24h(s.end_time()),
                "start12hr": slots::format_12h(s.start_time()),
                "end12hr": slots::format_12h(s.end_time())
            })
        })
        .collect()
}

fn handle_current(state: &AppState, req: &Request) -> HandlerResult {
    let engine = engine(state, req)?;
    let current = engine.current_slot();
    let now = engine.now();
    let tz = engine.timezone();
    let local = engine.local(now);
    Ok(ok(
        &req.id,
        json!({
            "currentSlot": current.map(|c| c.slot_number),
            "currentDay": slots::day_of_week(now, &tz),
            "currentTime": slots::format_12h(local.time()),
            "currentDate": local.format("%Y-%m-%d").to_string(),
            "timezone": format!("UTC{}", tz),
            "slotTimes": slot_times_json()
        }),
    ))
}

pub fn try_handle(state: &AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.current" => Some(handle_current(state, req).unwrap_or_else(|e| e)),
        _ => None,
    }
}
