use crate::error::{AttendanceError, AttendanceResult};
use crate::model::{
    AttendanceKey, AttendanceRecord, AttendanceStatus, ClassInfo, Enrollment, EnrollmentStatus,
    HistoryEntry, MarkedBy, NewAttendance, Role, User,
};
use rusqlite::types::Type;
use rusqlite::{params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

pub const DB_FILE_NAME: &str = "rollcall.sqlite3";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(2);

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    apply_schema(&conn)?;
    Ok(conn)
}

pub fn apply_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            teacher_id TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_enrollments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            approved_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(class_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_enrollments_student ON class_enrollments(student_id)",
        [],
    )?;

    // The four-tuple UNIQUE is what actually prevents double attendance.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            class_id INTEGER NOT NULL,
            slot_number INTEGER NOT NULL,
            day_of_week INTEGER NOT NULL,
            attendance_date TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(student_id, class_id, slot_number, attendance_date)
        )",
        [],
    )?;
    ensure_attendance_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date
         ON attendance(class_id, attendance_date)",
        [],
    )?;

    Ok(())
}

fn ensure_attendance_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn text_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {raw:?}").into(),
        )
    })
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        name: r.get(1)?,
        role: text_enum(r, 2, Role::parse)?,
    })
}

fn class_from_row(r: &Row<'_>) -> rusqlite::Result<ClassInfo> {
    Ok(ClassInfo {
        id: r.get(0)?,
        name: r.get(1)?,
        subject: r.get(2)?,
        teacher_id: r.get(3)?,
    })
}

fn enrollment_from_row(r: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        class_id: r.get(0)?,
        student_id: r.get(1)?,
        status: text_enum(r, 2, EnrollmentStatus::parse)?,
        enrolled_at: r.get(3)?,
        approved_at: r.get(4)?,
    })
}

const ATTENDANCE_COLUMNS: &str = "id, student_id, class_id, slot_number, day_of_week,
     attendance_date, status, marked_by, created_at, updated_at";

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        slot_number: r.get(3)?,
        day_of_week: r.get(4)?,
        attendance_date: r.get(5)?,
        status: text_enum(r, 6, AttendanceStatus::parse)?,
        marked_by: text_enum(r, 7, MarkedBy::parse)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

/// Outcome of a guarded attendance insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted {
    Created(AttendanceRecord),
    /// The uniqueness constraint rejected the row.
    Duplicate,
}

/// Keyed CRUD over the workspace database.
///
/// The connection is shared by all request workers; each call holds the lock
/// only for its own statements. Waiting for the lock is bounded by
/// `lock_timeout`, after which the call fails as `StoreUnavailable`.
pub struct Db {
    conn: Mutex<Connection>,
    lock_timeout: Duration,
}

impl Db {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn open(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self::new(open_db(workspace, busy_timeout)?).with_lock_timeout(busy_timeout))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> AttendanceResult<MutexGuard<'_, Connection>> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(AttendanceError::unexpected("database lock poisoned"))
                }
                Err(TryLockError::WouldBlock) if Instant::now() >= deadline => {
                    return Err(AttendanceError::StoreUnavailable(
                        "timed out waiting for the database connection".into(),
                    ))
                }
                Err(TryLockError::WouldBlock) => thread::sleep(LOCK_RETRY),
            }
        }
    }

    pub fn find_user(&self, id: &str) -> AttendanceResult<Option<User>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, name, role FROM users WHERE id = ?",
                [id],
                user_from_row,
            )
            .optional()?)
    }

    pub fn upsert_user(&self, user: &User) -> AttendanceResult<User> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users(id, name, role) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, role = excluded.role",
            (&user.id, &user.name, user.role.as_str()),
        )?;
        Ok(user.clone())
    }

    pub fn find_class(&self, class_id: i64) -> AttendanceResult<Option<ClassInfo>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, name, subject, teacher_id FROM classes WHERE id = ?",
                [class_id],
                class_from_row,
            )
            .optional()?)
    }

    pub fn insert_class(
        &self,
        teacher_id: &str,
        name: &str,
        subject: &str,
    ) -> AttendanceResult<ClassInfo> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO classes(name, subject, teacher_id) VALUES(?, ?, ?)",
            (name, subject, teacher_id),
        )?;
        Ok(ClassInfo {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            subject: subject.to_string(),
            teacher_id: teacher_id.to_string(),
        })
    }

    pub fn classes_for_teacher(&self, teacher_id: &str) -> AttendanceResult<Vec<ClassInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, subject, teacher_id FROM classes WHERE teacher_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map([teacher_id], class_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_enrollment(
        &self,
        class_id: i64,
        student_id: &str,
    ) -> AttendanceResult<Option<Enrollment>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT class_id, student_id, status, enrolled_at, approved_at
                 FROM class_enrollments
                 WHERE class_id = ? AND student_id = ?",
                (class_id, student_id),
                enrollment_from_row,
            )
            .optional()?)
    }

    /// Creates a pending enrollment; an existing row of any status is left alone.
    pub fn insert_pending_enrollment(
        &self,
        class_id: i64,
        student_id: &str,
        at: &str,
    ) -> AttendanceResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO class_enrollments(class_id, student_id, status, enrolled_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(class_id, student_id) DO NOTHING",
            (class_id, student_id, EnrollmentStatus::Pending.as_str(), at),
        )?;
        Ok(())
    }

    /// Inserts an approved enrollment or promotes a pending one. Safe to repeat.
    pub fn upsert_approved_enrollment(
        &self,
        class_id: i64,
        student_id: &str,
        at: &str,
    ) -> AttendanceResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO class_enrollments(class_id, student_id, status, enrolled_at, approved_at)
             VALUES(?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(class_id, student_id) DO UPDATE SET
               status = excluded.status,
               approved_at = excluded.approved_at
             WHERE class_enrollments.status <> excluded.status",
            (class_id, student_id, EnrollmentStatus::Approved.as_str(), at),
        )?;
        Ok(())
    }

    pub fn count_approved(&self, class_id: i64) -> AttendanceResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM class_enrollments WHERE class_id = ? AND status = ?",
            (class_id, EnrollmentStatus::Approved.as_str()),
            |r| r.get(0),
        )?)
    }

    pub fn find_attendance(
        &self,
        key: &AttendanceKey,
    ) -> AttendanceResult<Option<AttendanceRecord>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                     WHERE student_id = ? AND class_id = ? AND slot_number = ?
                       AND attendance_date = ?"
                ),
                (&key.student_id, key.class_id, key.slot_number, &key.attendance_date),
                attendance_from_row,
            )
            .optional()?)
    }

    /// Plain insert. A uniqueness violation is reported as `Inserted::Duplicate`,
    /// never as an error, so callers can turn it into a friendly message.
    pub fn insert_attendance(&self, row: &NewAttendance) -> AttendanceResult<Inserted> {
        let conn = self.conn()?;
        let res = conn.execute(
            "INSERT INTO attendance(student_id, class_id, slot_number, day_of_week, attendance_date,
                                    status, marked_by, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &row.key.student_id,
                row.key.class_id,
                row.key.slot_number,
                row.day_of_week,
                &row.key.attendance_date,
                row.status.as_str(),
                row.marked_by.as_str(),
                &row.at,
            ),
        );
        match res {
            Ok(_) => Ok(Inserted::Created(AttendanceRecord {
                id: conn.last_insert_rowid(),
                student_id: row.key.student_id.clone(),
                class_id: row.key.class_id,
                slot_number: row.key.slot_number,
                day_of_week: row.day_of_week,
                attendance_date: row.key.attendance_date.clone(),
                status: row.status,
                marked_by: row.marked_by,
                created_at: row.at.clone(),
                updated_at: None,
            })),
            Err(rusqlite::Error::SqliteFailure(f, _))
                if f.code == ErrorCode::ConstraintViolation
                    && f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(Inserted::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert-or-overwrite used by manual marking. The original `created_at`
    /// survives an overwrite; `updated_at` records it.
    pub fn upsert_attendance(&self, row: &NewAttendance) -> AttendanceResult<AttendanceRecord> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO attendance(student_id, class_id, slot_number, day_of_week, attendance_date,
                                    status, marked_by, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, class_id, slot_number, attendance_date) DO UPDATE SET
               status = excluded.status,
               marked_by = excluded.marked_by,
               updated_at = excluded.created_at",
            (
                &row.key.student_id,
                row.key.class_id,
                row.key.slot_number,
                row.day_of_week,
                &row.key.attendance_date,
                row.status.as_str(),
                row.marked_by.as_str(),
                &row.at,
            ),
        )?;
        let key = &row.key;
        Ok(conn.query_row(
            &format!(
                "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                 WHERE student_id = ? AND class_id = ? AND slot_number = ? AND attendance_date = ?"
            ),
            (&key.student_id, key.class_id, key.slot_number, &key.attendance_date),
            attendance_from_row,
        )?)
    }

    /// First record for a student in a class on a date, optionally narrowed to one slot.
    pub fn first_attendance_on(
        &self,
        student_id: &str,
        class_id: i64,
        date: &str,
        slot_number: Option<u8>,
    ) -> AttendanceResult<Option<AttendanceRecord>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance
             WHERE student_id = ? AND class_id = ? AND attendance_date = ?"
        );
        let mut binds: Vec<Value> = vec![
            Value::Text(student_id.to_string()),
            Value::Integer(class_id),
            Value::Text(date.to_string()),
        ];
        if let Some(slot) = slot_number {
            sql.push_str(" AND slot_number = ?");
            binds.push(Value::Integer(slot as i64));
        }
        sql.push_str(" ORDER BY slot_number, id LIMIT 1");
        Ok(conn
            .query_row(&sql, params_from_iter(binds), attendance_from_row)
            .optional()?)
    }

    /// Attendance for the given classes within an inclusive date range.
    pub fn attendance_for_classes(
        &self,
        class_ids: &[i64],
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> AttendanceResult<Vec<AttendanceRecord>> {
        if class_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; class_ids.len()].join(", ");
        let mut sql = format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE class_id IN ({placeholders})"
        );
        let mut binds: Vec<Value> = class_ids.iter().map(|id| Value::Integer(*id)).collect();
        if let Some(start) = start_date {
            sql.push_str(" AND attendance_date >= ?");
            binds.push(Value::Text(start.to_string()));
        }
        if let Some(end) = end_date {
            sql.push_str(" AND attendance_date <= ?");
            binds.push(Value::Text(end.to_string()));
        }
        sql.push_str(" ORDER BY attendance_date, id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), attendance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Everything recorded for one student, newest date first, with the class
    /// and its teacher resolved.
    pub fn attendance_history(
        &self,
        student_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> AttendanceResult<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT a.id, a.student_id, a.class_id, a.slot_number, a.day_of_week,
                    a.attendance_date, a.status, a.marked_by, a.created_at, a.updated_at,
                    COALESCE(c.name, 'Unknown Class'),
                    COALESCE(c.subject, 'Unknown Subject'),
                    COALESCE(u.name, 'Unknown Teacher')
             FROM attendance a
             LEFT JOIN classes c ON c.id = a.class_id
             LEFT JOIN users u ON u.id = c.teacher_id
             WHERE a.student_id = ?",
        );
        let mut binds: Vec<Value> = vec![Value::Text(student_id.to_string())];
        if let Some(start) = start_date {
            sql.push_str(" AND a.attendance_date >= ?");
            binds.push(Value::Text(start.to_string()));
        }
        if let Some(end) = end_date {
            sql.push_str(" AND a.attendance_date <= ?");
            binds.push(Value::Text(end.to_string()));
        }
        sql.push_str(" ORDER BY a.attendance_date DESC, a.slot_number, a.id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok(HistoryEntry {
                    record: attendance_from_row(r)?,
                    class_name: r.get(10)?,
                    subject: r.get(11)?,
                    teacher_name: r.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Attendance narrowed by an optional class set and an optional exact date.
    /// `None` for `class_ids` means every class.
    pub fn attendance_matching(
        &self,
        class_ids: Option<&[i64]>,
        date: Option<&str>,
    ) -> AttendanceResult<Vec<AttendanceRecord>> {
        if class_ids.is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut sql = format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE 1 = 1");
        let mut binds: Vec<Value> = Vec::new();
        if let Some(ids) = class_ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND class_id IN ({placeholders})"));
            binds.extend(ids.iter().map(|id| Value::Integer(*id)));
        }
        if let Some(d) = date {
            sql.push_str(" AND attendance_date = ?");
            binds.push(Value::Text(d.to_string()));
        }
        sql.push_str(" ORDER BY class_id, slot_number, id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), attendance_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
