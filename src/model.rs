use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub teacher_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Approved,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrollmentStatus::Pending),
            "approved" => Some(EnrollmentStatus::Approved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub class_id: i64,
    pub student_id: String,
    pub status: EnrollmentStatus,
    pub enrolled_at: String,
    pub approved_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkedBy {
    InstantPassword,
    Teacher,
    Api,
}

impl MarkedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkedBy::InstantPassword => "instant_password",
            MarkedBy::Teacher => "teacher",
            MarkedBy::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instant_password" => Some(MarkedBy::InstantPassword),
            "teacher" => Some(MarkedBy::Teacher),
            "api" => Some(MarkedBy::Api),
            _ => None,
        }
    }
}

/// Identity of an attendance row; the schema holds at most one row per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    pub student_id: String,
    pub class_id: i64,
    pub slot_number: u8,
    /// `YYYY-MM-DD` in the configured civil zone.
    pub attendance_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub class_id: i64,
    pub slot_number: u8,
    pub day_of_week: u8,
    pub attendance_date: String,
    pub status: AttendanceStatus,
    pub marked_by: MarkedBy,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub key: AttendanceKey,
    pub day_of_week: u8,
    pub status: AttendanceStatus,
    pub marked_by: MarkedBy,
    pub at: String,
}

/// Attendance row joined with the class it belongs to and the class teacher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub class_name: String,
    pub subject: String,
    pub teacher_name: String,
}
