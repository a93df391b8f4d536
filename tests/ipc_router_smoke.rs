use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .env_remove("ROLLCALL_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rollcall-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "slots.current",
        json!({}),
    );
    assert_eq!(error_code(&early), "no_workspace");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("rollcall.sqlite3").exists());

    for (i, (id, name, role)) in [
        ("t-1", "Ms. Rao", "teacher"),
        ("t-2", "Mr. Iyer", "teacher"),
        ("s-1", "Asha", "student"),
        ("s-2", "Bilal", "student"),
    ]
    .into_iter()
    .enumerate()
    {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("u{i}"),
            "users.upsert",
            json!({ "id": id, "name": name, "role": role }),
        );
    }

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "teacherId": "t-1", "name": "Physics", "subject": "Science" }),
    );
    let class_id = class["class"]["id"].as_i64().expect("class id");

    let slots = request_ok(&mut stdin, &mut reader, "5", "slots.current", json!({}));
    assert_eq!(slots["slotTimes"].as_array().map(|a| a.len()), Some(9));
    assert_eq!(slots["slotTimes"][0]["start12hr"], "9:00 AM");
    assert_eq!(slots["slotTimes"][8]["end24hr"], "16:50");
    assert_eq!(slots["timezone"], "UTC+05:30");
    let day = slots["currentDay"].as_u64().expect("day");
    assert!((1..=7).contains(&day));

    let foreign = request(
        &mut stdin,
        &mut reader,
        "6",
        "credentials.generate",
        json!({ "classId": class_id, "slotNumber": 2, "issuerId": "t-2" }),
    );
    assert_eq!(error_code(&foreign), "unauthorized");

    let issued = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "credentials.generate",
        json!({ "classId": class_id, "slotNumber": 2, "issuerId": "t-1" }),
    );
    let code = issued["code"].as_str().expect("code").to_string();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(issued["className"], "Physics");

    let validated = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "credentials.validate",
        json!({ "code": code, "studentId": "s-1" }),
    );
    assert_eq!(validated["valid"], true);
    assert_eq!(validated["studentName"], "Asha");

    let committed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.commit",
        json!({ "code": code, "studentId": "s-1" }),
    );
    assert_eq!(committed["status"], "present");
    assert_eq!(committed["slotNumber"], 2);
    let marked_at = committed["markedAt"].as_str().expect("markedAt").to_string();

    let again = request(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.commit",
        json!({ "code": code, "studentId": "s-1" }),
    );
    assert_eq!(error_code(&again), "already_marked");
    assert_eq!(again["error"]["details"]["markedAt"], marked_at.as_str());

    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.commit",
        json!({ "code": code, "studentId": "s-2" }),
    );

    let bad_code = request(
        &mut stdin,
        &mut reader,
        "12",
        "credentials.validate",
        json!({ "code": "12345", "studentId": "s-2" }),
    );
    assert_eq!(error_code(&bad_code), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "credentials.invalidate",
        json!({ "code": code, "issuerId": "t-1" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "credentials.invalidate",
        json!({ "code": code, "issuerId": "t-1" }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "15",
        "credentials.validate",
        json!({ "code": code, "studentId": "s-2" }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "analytics.classWise",
        json!({ "teacherId": "t-1" }),
    );
    assert_eq!(report["overallStats"]["totalClasses"], 1);
    assert_eq!(report["overallStats"]["totalAttendanceRecords"], 2);
    assert_eq!(report["overallStats"]["overallAttendanceRate"], 100);
    assert_eq!(report["overallStats"]["totalStudents"], 2);
    assert_eq!(report["classes"][0]["slotBreakdown"][1]["present"], 2);
    assert_eq!(
        report["overallStats"]["bestPerformingClass"]["name"],
        "Physics"
    );

    let bad_range = request(
        &mut stdin,
        &mut reader,
        "17",
        "analytics.classWise",
        json!({ "teacherId": "t-1", "startDate": "2025-02-01", "endDate": "2025-01-01" }),
    );
    assert_eq!(error_code(&bad_range), "bad_params");

    let unknown = request(&mut stdin, &mut reader, "18", "grades.compute", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_lines_get_bad_json_and_the_daemon_keeps_serving() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"], false);
    assert_eq!(error_code(&value), "bad_json");

    request_ok(&mut stdin, &mut reader, "after", "health", json!({}));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn manual_marks_and_checks_over_ipc() {
    let workspace = temp_dir("rollcall-manual-ipc");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.upsert",
        json!({ "id": "t-1", "name": "Ms. Rao", "role": "teacher" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.upsert",
        json!({ "id": "s-1", "name": "Asha", "role": "student" }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "teacherId": "t-1", "name": "Chemistry" }),
    );
    let class_id = class["class"]["id"].as_i64().expect("class id");

    let joined = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.join",
        json!({ "classId": class_id, "studentId": "s-1" }),
    );
    assert_eq!(joined["enrollment"]["status"], "pending");
    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classes.approve",
        json!({ "classId": class_id, "teacherId": "t-1", "studentId": "s-1" }),
    );
    assert_eq!(approved["enrollment"]["status"], "approved");

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.markManual",
        json!({
            "classId": class_id,
            "teacherId": "t-1",
            "studentId": "s-1",
            "slotNumber": 3,
            "status": "absent"
        }),
    );
    assert_eq!(marked["status"], "absent");
    let date = marked["markedAt"].as_str().expect("markedAt")[..10].to_string();

    let checked = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.check",
        json!({ "studentId": "s-1", "classId": class_id, "date": date, "slotNumber": 3 }),
    );
    assert_eq!(checked["record"]["status"], "absent");
    assert_eq!(checked["record"]["markedBy"], "teacher");

    let bad_slot = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.markManual",
        json!({ "classId": class_id, "teacherId": "t-1", "studentId": "s-1", "slotNumber": 12 }),
    );
    assert_eq!(error_code(&bad_slot), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn direct_marks_history_and_summary_over_ipc() {
    let workspace = temp_dir("rollcall-direct-ipc");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.upsert",
        json!({ "id": "t-1", "name": "Ms. Rao", "role": "teacher" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.upsert",
        json!({ "id": "s-1", "name": "Asha", "role": "student" }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "teacherId": "t-1", "name": "Biology", "subject": "Science" }),
    );
    let class_id = class["class"]["id"].as_i64().expect("class id");

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "studentId": "s-1", "classId": class_id, "slotNumber": 4 }),
    );
    assert_eq!(marked["record"]["markedBy"], "api");
    assert_eq!(marked["record"]["status"], "present");
    assert_eq!(marked["record"]["slotNumber"], 4);
    let created_at = marked["record"]["createdAt"].as_str().expect("createdAt").to_string();

    let again = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({ "studentId": "s-1", "classId": class_id, "slotNumber": 4, "status": "absent" }),
    );
    assert_eq!(error_code(&again), "already_marked");
    assert_eq!(again["error"]["details"]["markedAt"], created_at.as_str());

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({ "studentId": "s-1", "classId": class_id, "status": "late" }),
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.history",
        json!({ "studentId": "s-1" }),
    );
    let records = history["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["className"], "Biology");
    assert_eq!(records[0]["subject"], "Science");
    assert_eq!(records[0]["teacherName"], "Ms. Rao");
    assert_eq!(records[0]["classId"], class_id);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.summary",
        json!({ "teacherId": "t-1" }),
    );
    assert_eq!(summary["stats"]["totalClasses"], 1);
    assert_eq!(summary["stats"]["totalMarkedAttendance"], 1);
    assert_eq!(summary["stats"]["overallAttendanceRate"], 100);
    assert_eq!(summary["summary"][0]["className"], "Biology");
    assert_eq!(summary["summary"][0]["slots"][0]["slotNumber"], 4);
    assert_eq!(summary["summary"][0]["slots"][0]["totalMarked"], 1);
    assert_eq!(summary["summary"][0]["slots"][0]["students"][0]["studentName"], "Asha");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.summary",
        json!({ "teacherId": "t-404" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unopenable_workspace_reports_unexpected_without_the_path() {
    let dir = temp_dir("rollcall-bad-workspace");
    let blocker = dir.join("not-a-directory");
    std::fs::write(&blocker, b"plain file").expect("write blocker");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let failed = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": blocker.to_string_lossy() }),
    );
    assert_eq!(error_code(&failed), "unexpected");
    let message = failed["error"]["message"].as_str().expect("message");
    assert!(!message.contains("not-a-directory"), "leaked: {message}");

    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}
