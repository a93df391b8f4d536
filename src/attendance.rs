//! Turning an instant password plus a student into exactly one attendance row.
//!
//! `validate_credential` is the advisory pre-flight the client calls before
//! face capture; `commit_attendance` repeats every check at the commit instant
//! and is the only path that writes. Enrollment repair runs in both and is an
//! idempotent upsert, so running it twice (or having it succeed ahead of a
//! failed insert) is harmless.

use crate::credentials::{normalize_code, Credential, Lookup};
use crate::db::Inserted;
use crate::engine::Engine;
use crate::error::{AttendanceError, AttendanceResult};
use crate::model::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, ClassInfo, EnrollmentStatus, HistoryEntry,
    MarkedBy, NewAttendance, Role, User,
};
use crate::slots;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentRepair {
    Enrolled,
    Approved,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCredential {
    pub class_id: i64,
    pub class_name: String,
    pub student_name: String,
    pub slot_number: u8,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedAttendance {
    pub student_name: String,
    pub status: AttendanceStatus,
    pub slot_number: u8,
    pub marked_at: String,
    pub record: AttendanceRecord,
}

#[derive(Debug, Clone)]
pub struct DirectMark {
    pub class_id: i64,
    pub student_id: String,
    pub slot_number: i64,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct ManualMark {
    pub class_id: i64,
    pub teacher_id: String,
    pub student_id: String,
    pub slot_number: i64,
    pub status: AttendanceStatus,
}

/// Everything both the pre-flight and the commit need, resolved at one instant.
struct Redemption {
    credential: Credential,
    class: ClassInfo,
    student: User,
    key: AttendanceKey,
}

impl Engine {
    fn active_credential(&self, code: &str, now: DateTime<Utc>) -> AttendanceResult<Credential> {
        match self.credentials().lookup(code, now) {
            Lookup::Active(c) => Ok(c),
            Lookup::Expired => Err(AttendanceError::Expired),
            Lookup::Missing => Err(AttendanceError::not_found(
                "invalid or expired password, check with your teacher",
            )),
        }
    }

    pub(crate) fn require_user(&self, id: &str, what: &str) -> AttendanceResult<User> {
        self.db()
            .find_user(id)?
            .ok_or_else(|| AttendanceError::not_found(format!("{what} not found")))
    }

    pub(crate) fn require_owned_class(
        &self,
        class_id: i64,
        teacher_id: &str,
    ) -> AttendanceResult<ClassInfo> {
        let class = self
            .db()
            .find_class(class_id)?
            .ok_or_else(|| AttendanceError::not_found("class not found"))?;
        if class.teacher_id != teacher_id {
            return Err(AttendanceError::unauthorized("you do not teach this class"));
        }
        Ok(class)
    }

    fn repair_enrollment(
        &self,
        class_id: i64,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> AttendanceResult<EnrollmentRepair> {
        let before = self.db().find_enrollment(class_id, student_id)?;
        let repair = match before.map(|e| e.status) {
            Some(EnrollmentStatus::Approved) => return Ok(EnrollmentRepair::Unchanged),
            Some(EnrollmentStatus::Pending) => EnrollmentRepair::Approved,
            None => EnrollmentRepair::Enrolled,
        };
        self.db()
            .upsert_approved_enrollment(class_id, student_id, &self.stamp(now))?;
        match repair {
            EnrollmentRepair::Enrolled => info!(class_id, student_id, "auto-enrolled student"),
            EnrollmentRepair::Approved => info!(class_id, student_id, "auto-approved student"),
            EnrollmentRepair::Unchanged => {}
        }
        Ok(repair)
    }

    fn redeem(
        &self,
        code: &str,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> AttendanceResult<Redemption> {
        let code = normalize_code(code)?;
        let student_id = student_id.trim();
        if student_id.is_empty() {
            return Err(AttendanceError::validation("student id is required"));
        }
        let credential = self.active_credential(&code, now)?;
        let student = self.require_user(student_id, "student")?;
        if student.role != Role::Student {
            return Err(AttendanceError::unauthorized(
                "only students can mark attendance with an instant password",
            ));
        }
        let class = self
            .db()
            .find_class(credential.class_id)?
            .ok_or_else(|| AttendanceError::not_found("class not found"))?;

        self.repair_enrollment(class.id, &student.id, now)?;

        let key = AttendanceKey {
            student_id: student.id.clone(),
            class_id: class.id,
            slot_number: credential.slot_number,
            attendance_date: date_key(slots::attendance_date(now, &self.timezone())),
        };
        if let Some(existing) = self.db().find_attendance(&key)? {
            return Err(already_marked(&existing));
        }
        Ok(Redemption {
            credential,
            class,
            student,
            key,
        })
    }

    /// Pre-flight check. Never writes attendance.
    pub fn validate_credential(
        &self,
        code: &str,
        student_id: &str,
    ) -> AttendanceResult<ValidatedCredential> {
        let now = self.now();
        let r = self.redeem(code, student_id, now).inspect_err(|e| {
            warn!(student_id, reason = e.code(), "instant password rejected at validation");
        })?;
        Ok(ValidatedCredential {
            class_id: r.class.id,
            class_name: r.class.name,
            student_name: r.student.name,
            slot_number: r.credential.slot_number,
            valid: true,
        })
    }

    /// Records the student present for the credential's slot on today's date.
    /// The slot comes from the credential, the date and weekday from `now`.
    pub fn commit_attendance(
        &self,
        code: &str,
        student_id: &str,
    ) -> AttendanceResult<CommittedAttendance> {
        let now = self.now();
        let r = self.redeem(code, student_id, now).inspect_err(|e| {
            warn!(student_id, reason = e.code(), "instant password rejected at commit");
        })?;

        let marked_at = self.stamp(now);
        let row = NewAttendance {
            key: r.key,
            day_of_week: slots::day_of_week(now, &self.timezone()),
            status: AttendanceStatus::Present,
            marked_by: MarkedBy::InstantPassword,
            at: marked_at.clone(),
        };
        let record = self.insert_once(&row)?;
        info!(
            class_id = record.class_id,
            student_id = %record.student_id,
            slot_number = record.slot_number,
            "attendance committed"
        );
        Ok(CommittedAttendance {
            student_name: r.student.name,
            status: record.status,
            slot_number: record.slot_number,
            marked_at,
            record,
        })
    }

    /// Direct mark without a password. Like a commit it never overwrites an
    /// existing row for the same key.
    pub fn mark_direct(&self, mark: &DirectMark) -> AttendanceResult<CommittedAttendance> {
        check_slot(mark.slot_number)?;
        let student_id = mark.student_id.trim();
        if student_id.is_empty() {
            return Err(AttendanceError::validation("student id is required"));
        }
        let student = self.require_user(student_id, "student")?;
        let class = self
            .db()
            .find_class(mark.class_id)?
            .ok_or_else(|| AttendanceError::not_found("class not found"))?;
        let now = self.now();
        let marked_at = self.stamp(now);
        let record = self.insert_once(&NewAttendance {
            key: AttendanceKey {
                student_id: student.id.clone(),
                class_id: class.id,
                slot_number: mark.slot_number as u8,
                attendance_date: date_key(slots::attendance_date(now, &self.timezone())),
            },
            day_of_week: slots::day_of_week(now, &self.timezone()),
            status: mark.status,
            marked_by: MarkedBy::Api,
            at: marked_at.clone(),
        })?;
        info!(
            class_id = class.id,
            student_id = %student.id,
            status = mark.status.as_str(),
            "attendance marked directly"
        );
        Ok(CommittedAttendance {
            student_name: student.name,
            status: record.status,
            slot_number: record.slot_number,
            marked_at,
            record,
        })
    }

    /// Inserts the row or reports the existing one as `AlreadyMarked`.
    fn insert_once(&self, row: &NewAttendance) -> AttendanceResult<AttendanceRecord> {
        match self.db().insert_attendance(row)? {
            Inserted::Created(record) => Ok(record),
            Inserted::Duplicate => {
                // Lost a race with a concurrent writer; report the winner's timestamp.
                let existing = self.db().find_attendance(&row.key)?.ok_or_else(|| {
                    AttendanceError::unexpected("attendance insert conflicted but no row exists")
                })?;
                Err(already_marked(&existing))
            }
        }
    }

    /// Teacher override: insert or overwrite the row for today's date.
    pub fn mark_manual(&self, mark: &ManualMark) -> AttendanceResult<CommittedAttendance> {
        check_slot(mark.slot_number)?;
        let class = self.require_owned_class(mark.class_id, mark.teacher_id.trim())?;
        let student = self.require_user(mark.student_id.trim(), "student")?;
        let now = self.now();
        let marked_at = self.stamp(now);
        let record = self.db().upsert_attendance(&NewAttendance {
            key: AttendanceKey {
                student_id: student.id.clone(),
                class_id: class.id,
                slot_number: mark.slot_number as u8,
                attendance_date: date_key(slots::attendance_date(now, &self.timezone())),
            },
            day_of_week: slots::day_of_week(now, &self.timezone()),
            status: mark.status,
            marked_by: MarkedBy::Teacher,
            at: marked_at.clone(),
        })?;
        info!(
            class_id = class.id,
            student_id = %student.id,
            status = mark.status.as_str(),
            "attendance marked by teacher"
        );
        Ok(CommittedAttendance {
            student_name: student.name,
            status: record.status,
            slot_number: record.slot_number,
            marked_at,
            record,
        })
    }

    pub fn check_attendance(
        &self,
        student_id: &str,
        class_id: i64,
        date: &str,
        slot_number: Option<i64>,
    ) -> AttendanceResult<Option<AttendanceRecord>> {
        let date = parse_date(date)?;
        let slot = slot_number
            .map(|n| check_slot(n).map(|()| n as u8))
            .transpose()?;
        let student = self.require_user(student_id.trim(), "student")?;
        self.db()
            .first_attendance_on(&student.id, class_id, &date_key(date), slot)
    }

    pub fn attendance_history(
        &self,
        student_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> AttendanceResult<Vec<HistoryEntry>> {
        let (start, end) = parse_range(start_date, end_date)?;
        let student = self.require_user(student_id.trim(), "student")?;
        self.db().attendance_history(
            &student.id,
            start.map(date_key).as_deref(),
            end.map(date_key).as_deref(),
        )
    }
}

fn check_slot(n: i64) -> AttendanceResult<()> {
    if slots::is_valid_slot_number(n) {
        return Ok(());
    }
    Err(AttendanceError::validation(format!(
        "slot number must be between 1 and {}",
        slots::SLOT_COUNT
    )))
}

fn already_marked(existing: &AttendanceRecord) -> AttendanceError {
    AttendanceError::AlreadyMarked {
        slot_number: existing.slot_number,
        marked_at: existing.created_at.clone(),
    }
}

pub fn date_key(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn parse_date(raw: &str) -> AttendanceResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AttendanceError::validation(format!("date must be YYYY-MM-DD, got {raw:?}"))
    })
}

/// Optional inclusive date bounds; a start after the end is rejected.
pub fn parse_range(
    start: Option<&str>,
    end: Option<&str>,
) -> AttendanceResult<(Option<NaiveDate>, Option<NaiveDate>)> {
    let start = start.map(parse_date).transpose()?;
    let end = end.map(parse_date).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(AttendanceError::validation("startDate is after endDate"));
        }
    }
    Ok((start, end))
}
