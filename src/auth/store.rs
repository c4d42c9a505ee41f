//! Collaborator contracts for authentication: credential records, roles and
//! password verification, plus in-memory stores for tests and embedding.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::error;

use crate::error::GuardResult;

pub type UserId = u64;

/// Stored login state for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub failed_attempts: u32,
    pub last_failed: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn new(id: UserId, username: &str, password_hash: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            failed_attempts: 0,
            last_failed: None,
            locked_until: None,
        }
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Count a failed attempt. Returns `true` when this failure engaged the lock.
    ///
    /// The count only ever grows here; `record_success` is the sole reset. Once
    /// it has reached `max_attempts`, every failure after an expired lock
    /// engages a new one.
    pub fn record_failure(&mut self, now: DateTime<Utc>, max_attempts: u32, lockout: Duration) -> bool {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failed = Some(now);
        if self.failed_attempts >= max_attempts {
            self.locked_until = Some(now + lockout);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
        self.last_failed = None;
        self.locked_until = None;
    }

    /// Attempts left before the lock engages
    pub fn remaining_attempts(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.failed_attempts)
    }

    fn same_counters(&self, other: &CredentialRecord) -> bool {
        self.failed_attempts == other.failed_attempts
            && self.last_failed == other.last_failed
            && self.locked_until == other.locked_until
    }
}

pub trait UserStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> GuardResult<Option<CredentialRecord>>;

    fn find_by_id(&self, id: UserId) -> GuardResult<Option<CredentialRecord>>;

    fn persist(&self, record: &CredentialRecord) -> GuardResult<()>;

    /// Persist `updated` only if the stored attempt counters still equal
    /// `expected`'s. Returns `false` on conflict.
    ///
    /// The default is not atomic: stores that cannot compare-and-swap keep
    /// the last-writer-wins race on the attempt counter.
    fn compare_and_persist(
        &self,
        _expected: &CredentialRecord,
        updated: &CredentialRecord,
    ) -> GuardResult<bool> {
        self.persist(updated)?;
        Ok(true)
    }
}

pub trait RoleStore: Send + Sync {
    /// Role words currently granted to `id`
    fn roles_for(&self, id: UserId) -> GuardResult<Vec<String>>;
}

/// Secure hash verification (argon2, bcrypt, ...) supplied by the embedder
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, password: &str, password_hash: &str) -> bool;
}

impl<F> PasswordVerifier for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn verify(&self, password: &str, password_hash: &str) -> bool {
        self(password, password_hash)
    }
}

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("SECURITY: Mutex poisoned for '{}' - recovering", context);
            poisoned.into_inner()
        }
    }
}

/// In-memory user store with atomic compare-and-persist
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<UserId, CredentialRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CredentialRecord) {
        lock_or_recover(&self.users, "user store").insert(record.id, record);
    }

    pub fn get(&self, id: UserId) -> Option<CredentialRecord> {
        lock_or_recover(&self.users, "user store").get(&id).cloned()
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_username(&self, username: &str) -> GuardResult<Option<CredentialRecord>> {
        Ok(lock_or_recover(&self.users, "user store")
            .values()
            .find(|record| record.username == username)
            .cloned())
    }

    fn find_by_id(&self, id: UserId) -> GuardResult<Option<CredentialRecord>> {
        Ok(self.get(id))
    }

    fn persist(&self, record: &CredentialRecord) -> GuardResult<()> {
        self.insert(record.clone());
        Ok(())
    }

    fn compare_and_persist(
        &self,
        expected: &CredentialRecord,
        updated: &CredentialRecord,
    ) -> GuardResult<bool> {
        let mut users = lock_or_recover(&self.users, "user store");
        match users.get(&updated.id) {
            Some(current) if !current.same_counters(expected) => Ok(false),
            _ => {
                users.insert(updated.id, updated.clone());
                Ok(true)
            }
        }
    }
}

/// In-memory role store
#[derive(Debug, Default)]
pub struct MemoryRoleStore {
    roles: Mutex<HashMap<UserId, Vec<String>>>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, id: UserId, role: &str) {
        lock_or_recover(&self.roles, "role store")
            .entry(id)
            .or_default()
            .push(role.to_string());
    }

    pub fn revoke_all(&self, id: UserId) {
        lock_or_recover(&self.roles, "role store").remove(&id);
    }
}

impl RoleStore for MemoryRoleStore {
    fn roles_for(&self, id: UserId) -> GuardResult<Vec<String>> {
        Ok(lock_or_recover(&self.roles, "role store")
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}
