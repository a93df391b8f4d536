//! In-memory table of instant passwords.
//!
//! The table belongs to one engine instance and lives as long as the process
//! (or workspace) does. Entries are created on issue, removed on explicit
//! invalidation, and evicted lazily when a lookup finds them expired.

use crate::error::{AttendanceError, AttendanceResult};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const CODE_LEN: usize = 6;
pub const CODE_MIN: u32 = 100_000;
pub const CODE_MAX: u32 = 999_999;
pub const DEFAULT_TTL_SECS: i64 = 180;

const MAX_DRAWS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub code: String,
    pub class_id: i64,
    pub slot_number: u8,
    pub issuer_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Source of candidate codes in `CODE_MIN..=CODE_MAX`.
pub trait CodeSource: Send + Sync {
    fn draw(&self) -> u32;
}

#[derive(Debug, Default)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn draw(&self) -> u32 {
        rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX)
    }
}

/// Parameters for a new credential; the store picks the code.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub class_id: i64,
    pub slot_number: u8,
    pub issuer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Active(Credential),
    Expired,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyGone,
}

pub struct CredentialStore {
    ttl: Duration,
    codes: Box<dyn CodeSource>,
    entries: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_codes(ttl, Box::new(RandomCodes))
    }

    pub fn with_codes(ttl: Duration, codes: Box<dyn CodeSource>) -> Self {
        Self {
            ttl,
            codes,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Credential>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Credential>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Draws a code that no active credential holds and stores the credential
    /// under it. Draw and insert happen under one write lock.
    pub fn issue(&self, new: NewCredential, now: DateTime<Utc>) -> AttendanceResult<Credential> {
        let mut entries = self.write();
        for _ in 0..MAX_DRAWS {
            let code = format_code(self.codes.draw())?;
            if entries.get(&code).is_some_and(|c| c.is_active(now)) {
                tracing::debug!(%code, "credential code collision, redrawing");
                continue;
            }
            let credential = Credential {
                code: code.clone(),
                class_id: new.class_id,
                slot_number: new.slot_number,
                issuer_id: new.issuer_id,
                issued_at: now,
                expires_at: now + self.ttl,
            };
            entries.insert(code, credential.clone());
            return Ok(credential);
        }
        Err(AttendanceError::unexpected(
            "could not draw an unused credential code",
        ))
    }

    /// Expired entries are removed on the way out so they can never be
    /// re-admitted by a later lookup.
    pub fn lookup(&self, code: &str, now: DateTime<Utc>) -> Lookup {
        let found = self.read().get(code).cloned();
        match found {
            None => Lookup::Missing,
            Some(c) if c.is_active(now) => Lookup::Active(c),
            Some(_) => {
                let mut entries = self.write();
                if entries.get(code).is_some_and(|c| !c.is_active(now)) {
                    entries.remove(code);
                }
                Lookup::Expired
            }
        }
    }

    /// Only the issuer may remove a live credential. A missing or expired code
    /// is not an error; an expired entry is dropped on the way.
    pub fn invalidate(
        &self,
        code: &str,
        issuer_id: &str,
        now: DateTime<Utc>,
    ) -> AttendanceResult<Removal> {
        let mut entries = self.write();
        match entries.get(code) {
            None => Ok(Removal::AlreadyGone),
            Some(c) if !c.is_active(now) => {
                entries.remove(code);
                Ok(Removal::AlreadyGone)
            }
            Some(c) if c.issuer_id != issuer_id => Err(AttendanceError::unauthorized(
                "only the issuing teacher can invalidate this password",
            )),
            Some(_) => {
                entries.remove(code);
                Ok(Removal::Removed)
            }
        }
    }

    /// Drops every expired entry. Nothing depends on this running.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, c| c.is_active(now));
        before - entries.len()
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.read().values().filter(|c| c.is_active(now)).count()
    }
}

fn format_code(n: u32) -> AttendanceResult<String> {
    if !(CODE_MIN..=CODE_MAX).contains(&n) {
        return Err(AttendanceError::unexpected(format!(
            "code source produced out-of-range value {n}"
        )));
    }
    Ok(format!("{n:06}"))
}

/// Trims and checks the submitted password: exactly six ASCII digits.
pub fn normalize_code(raw: &str) -> AttendanceResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(AttendanceError::validation("password is required"));
    }
    if t.len() != CODE_LEN || !t.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AttendanceError::validation(
            "password must be exactly 6 digits",
        ));
    }
    Ok(t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<u32>>);

    impl CodeSource for Scripted {
        fn draw(&self) -> u32 {
            self.0.lock().expect("script").pop_front().unwrap_or(CODE_MIN)
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 4, 30, 0).single().expect("t0")
    }

    fn new_cred(class_id: i64) -> NewCredential {
        NewCredential {
            class_id,
            slot_number: 2,
            issuer_id: "teacher-1".into(),
        }
    }

    #[test]
    fn expiry_is_issue_time_plus_ttl() {
        let store = CredentialStore::new(Duration::seconds(DEFAULT_TTL_SECS));
        let c = store.issue(new_cred(5), t0()).expect("issue");
        assert_eq!(c.expires_at - c.issued_at, Duration::seconds(180));
        assert_eq!(c.code.len(), 6);
        assert!(c.code.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn forced_collision_redraws_instead_of_overwriting() {
        let script = VecDeque::from(vec![482_913, 482_913, 482_913, 100_001]);
        let store = CredentialStore::with_codes(
            Duration::seconds(180),
            Box::new(Scripted(Mutex::new(script))),
        );
        let first = store.issue(new_cred(5), t0()).expect("first");
        let second = store.issue(new_cred(6), t0()).expect("second");
        assert_eq!(first.code, "482913");
        assert_eq!(second.code, "100001");
        match store.lookup("482913", t0()) {
            Lookup::Active(c) => assert_eq!(c.class_id, 5),
            other => panic!("expected active credential, got {other:?}"),
        }
    }

    #[test]
    fn expired_holder_of_a_code_may_be_replaced() {
        let script = VecDeque::from(vec![482_913, 482_913]);
        let store = CredentialStore::with_codes(
            Duration::seconds(180),
            Box::new(Scripted(Mutex::new(script))),
        );
        store.issue(new_cred(5), t0()).expect("first");
        let later = t0() + Duration::seconds(181);
        let second = store.issue(new_cred(6), later).expect("second");
        assert_eq!(second.code, "482913");
        assert_eq!(second.class_id, 6);
    }

    #[test]
    fn exhausted_draws_fail_instead_of_looping() {
        let script = VecDeque::from(vec![482_913; 100]);
        let store = CredentialStore::with_codes(
            Duration::seconds(180),
            Box::new(Scripted(Mutex::new(script))),
        );
        store.issue(new_cred(5), t0()).expect("first");
        let err = store.issue(new_cred(6), t0()).expect_err("exhausted");
        assert_eq!(err.code(), "unexpected");
    }

    #[test]
    fn ten_thousand_active_codes_are_distinct() {
        let store = CredentialStore::new(Duration::seconds(180));
        let mut seen = HashSet::new();
        for i in 0..10_000 {
            let c = store.issue(new_cred(i), t0()).expect("issue");
            assert!(seen.insert(c.code), "duplicate active code");
        }
        assert_eq!(store.active_count(t0()), 10_000);
    }

    #[test]
    fn lookup_evicts_expired_entries() {
        let store = CredentialStore::new(Duration::seconds(180));
        let c = store.issue(new_cred(5), t0()).expect("issue");
        assert_eq!(store.lookup(&c.code, c.expires_at), Lookup::Expired);
        // Even a clock that stepped backwards cannot bring it back.
        assert_eq!(store.lookup(&c.code, t0()), Lookup::Missing);
    }

    #[test]
    fn invalidate_checks_issuer_and_is_idempotent() {
        let store = CredentialStore::new(Duration::seconds(180));
        let c = store.issue(new_cred(5), t0()).expect("issue");
        let err = store
            .invalidate(&c.code, "teacher-2", t0())
            .expect_err("wrong issuer");
        assert_eq!(err.code(), "unauthorized");
        assert_eq!(store.invalidate(&c.code, "teacher-1", t0()), Ok(Removal::Removed));
        assert_eq!(
            store.invalidate(&c.code, "teacher-1", t0()),
            Ok(Removal::AlreadyGone)
        );
    }

    #[test]
    fn invalidating_an_expired_code_is_a_no_op_for_anyone() {
        let store = CredentialStore::new(Duration::seconds(180));
        let c = store.issue(new_cred(5), t0()).expect("issue");
        assert_eq!(
            store.invalidate(&c.code, "teacher-2", c.expires_at),
            Ok(Removal::AlreadyGone)
        );
        assert_eq!(store.lookup(&c.code, t0()), Lookup::Missing);
    }

    #[test]
    fn purge_only_drops_expired() {
        let store = CredentialStore::new(Duration::seconds(180));
        store.issue(new_cred(1), t0()).expect("old");
        let later = t0() + Duration::seconds(120);
        store.issue(new_cred(2), later).expect("new");
        assert_eq!(store.purge_expired(t0() + Duration::seconds(200)), 1);
        assert_eq!(store.active_count(t0() + Duration::seconds(200)), 1);
    }

    #[test]
    fn normalize_code_accepts_only_six_digits() {
        assert_eq!(normalize_code(" 012345 ").expect("ok"), "012345");
        assert!(normalize_code("").is_err());
        assert!(normalize_code("12345").is_err());
        assert!(normalize_code("12a456").is_err());
        assert!(normalize_code("1234567").is_err());
    }
}
