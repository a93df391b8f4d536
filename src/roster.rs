use crate::engine::Engine;
use crate::error::{AttendanceError, AttendanceResult};
use crate::model::{ClassInfo, Enrollment, Role, User};
use tracing::info;

impl Engine {
    pub fn upsert_user(&self, id: &str, name: &str, role: Role) -> AttendanceResult<User> {
        let id = id.trim();
        let name = name.trim();
        if id.is_empty() {
            return Err(AttendanceError::validation("user id is required"));
        }
        if name.is_empty() {
            return Err(AttendanceError::validation("name must not be empty"));
        }
        self.db().upsert_user(&User {
            id: id.to_string(),
            name: name.to_string(),
            role,
        })
    }

    pub fn create_class(
        &self,
        teacher_id: &str,
        name: &str,
        subject: &str,
    ) -> AttendanceResult<ClassInfo> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AttendanceError::validation("name must not be empty"));
        }
        let teacher = self.require_user(teacher_id.trim(), "teacher")?;
        if teacher.role != Role::Teacher {
            return Err(AttendanceError::unauthorized("only teachers can create classes"));
        }
        let class = self.db().insert_class(&teacher.id, name, subject.trim())?;
        info!(class_id = class.id, teacher_id = %teacher.id, "class created");
        Ok(class)
    }

    /// Student asks to join; the request waits for the teacher. Joining twice
    /// returns the existing enrollment unchanged.
    pub fn join_class(&self, class_id: i64, student_id: &str) -> AttendanceResult<Enrollment> {
        let student = self.require_user(student_id.trim(), "student")?;
        if student.role != Role::Student {
            return Err(AttendanceError::unauthorized("only students can join classes"));
        }
        if self.db().find_class(class_id)?.is_none() {
            return Err(AttendanceError::not_found("class not found"));
        }
        self.db()
            .insert_pending_enrollment(class_id, &student.id, &self.stamp(self.now()))?;
        self.db()
            .find_enrollment(class_id, &student.id)?
            .ok_or_else(|| AttendanceError::unexpected("enrollment vanished after insert"))
    }

    pub fn approve_enrollment(
        &self,
        class_id: i64,
        teacher_id: &str,
        student_id: &str,
    ) -> AttendanceResult<Enrollment> {
        self.require_owned_class(class_id, teacher_id.trim())?;
        let student_id = student_id.trim();
        if self.db().find_enrollment(class_id, student_id)?.is_none() {
            return Err(AttendanceError::not_found("no join request for this student"));
        }
        self.db()
            .upsert_approved_enrollment(class_id, student_id, &self.stamp(self.now()))?;
        info!(class_id, student_id, "enrollment approved");
        self.db()
            .find_enrollment(class_id, student_id)?
            .ok_or_else(|| AttendanceError::unexpected("enrollment vanished after approval"))
    }
}
