use crate::clock::Clock;
use crate::config::Config;
use crate::credentials::{CredentialStore, NewCredential, Removal};
use crate::db::Db;
use crate::error::{AttendanceError, AttendanceResult};
use crate::slots::{self, CurrentSlot};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One workspace worth of attendance state: the database plus the live
/// instant-password table. Everything time-dependent reads `clock`.
pub struct Engine {
    db: Db,
    credentials: CredentialStore,
    clock: Arc<dyn Clock>,
    tz: FixedOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub code: String,
    pub expires_at: String,
    pub class_id: i64,
    pub class_name: String,
    pub slot_number: u8,
}

impl Engine {
    pub fn new(
        db: Db,
        credentials: CredentialStore,
        clock: Arc<dyn Clock>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            db,
            credentials,
            clock,
            tz,
        }
    }

    pub fn open(cfg: &Config, workspace: &Path, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let db = Db::open(workspace, cfg.busy_timeout())?;
        Ok(Self::new(
            db,
            CredentialStore::new(cfg.credential_ttl()),
            clock,
            cfg.timezone()?,
        ))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        slots::local_now(at, &self.tz)
    }

    /// RFC 3339 in the configured zone, whole seconds.
    pub fn stamp(&self, at: DateTime<Utc>) -> String {
        self.local(at).to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    pub fn current_slot(&self) -> Option<CurrentSlot> {
        slots::resolve_current_slot(self.now(), &self.tz)
    }

    pub fn issue_credential(
        &self,
        class_id: i64,
        slot_number: i64,
        issuer_id: &str,
    ) -> AttendanceResult<IssuedCredential> {
        if !slots::is_valid_slot_number(slot_number) {
            return Err(AttendanceError::validation(format!(
                "slot number must be between 1 and {}",
                slots::SLOT_COUNT
            )));
        }
        let issuer_id = issuer_id.trim();
        if issuer_id.is_empty() {
            return Err(AttendanceError::validation("teacher id is required"));
        }
        let class = self
            .db
            .find_class(class_id)?
            .ok_or_else(|| AttendanceError::not_found("class not found"))?;
        if class.teacher_id != issuer_id {
            warn!(class_id, issuer_id, "credential requested for a class the caller does not own");
            return Err(AttendanceError::unauthorized("you do not teach this class"));
        }

        let now = self.now();
        let swept = self.credentials.purge_expired(now);
        if swept > 0 {
            info!(swept, "dropped expired instant passwords");
        }
        let credential = self.credentials.issue(
            NewCredential {
                class_id,
                slot_number: slot_number as u8,
                issuer_id: issuer_id.to_string(),
            },
            now,
        )?;
        info!(
            class_id,
            slot_number,
            issuer_id,
            expires_at = %credential.expires_at,
            active = self.credentials.active_count(now),
            "issued instant password"
        );
        Ok(IssuedCredential {
            code: credential.code,
            expires_at: self.stamp(credential.expires_at),
            class_id,
            class_name: class.name,
            slot_number: credential.slot_number,
        })
    }

    pub fn invalidate_credential(&self, code: &str, issuer_id: &str) -> AttendanceResult<Removal> {
        let code = crate::credentials::normalize_code(code)?;
        let issuer_id = issuer_id.trim();
        if issuer_id.is_empty() {
            return Err(AttendanceError::validation("teacher id is required"));
        }
        let removal = self.credentials.invalidate(&code, issuer_id, self.now())?;
        match removal {
            Removal::Removed => info!(issuer_id, "instant password invalidated"),
            Removal::AlreadyGone => info!(issuer_id, "instant password already gone"),
        }
        Ok(removal)
    }
}
