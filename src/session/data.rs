//! Typed view over the session key-value store.
//!
//! Every key the guards use lives here. Timestamps are stored as Unix
//! seconds; unparseable values read as absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::store::UserId;
use crate::error::GuardResult;
use crate::session::store::SessionStore;

const USER_ID: &str = "auth_user_id";
const LAST_ACTIVITY: &str = "auth_last_activity";
const LOGIN_TIME: &str = "auth_login_time";
const RETURN_URL: &str = "auth_return_url";
const FLASH: &str = "auth_flash";
const CREATED: &str = "_guard_created";
const FINGERPRINT: &str = "_guard_fingerprint";

const AUTH_KEYS: [&str; 3] = [USER_ID, LAST_ACTIVITY, LOGIN_TIME];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
    Warning,
    Info,
}

/// One-shot notification carried across a redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub kind: FlashKind,
    pub message: String,
}

impl FlashMessage {
    pub fn new(kind: FlashKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(FlashKind::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FlashKind::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(FlashKind::Warning, message)
    }
}

pub struct SessionData<'a> {
    store: &'a mut dyn SessionStore,
}

impl<'a> SessionData<'a> {
    pub fn new(store: &'a mut dyn SessionStore) -> Self {
        Self { store }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.store.get(USER_ID)?.parse().ok()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.timestamp(LAST_ACTIVITY)
    }

    pub fn login_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp(LOGIN_TIME)
    }

    /// Record a fresh login
    pub fn begin_login(&mut self, user_id: UserId, now: DateTime<Utc>) -> GuardResult<()> {
        let stamp = now.timestamp().to_string();
        self.store.set(USER_ID, &user_id.to_string())?;
        self.store.set(LOGIN_TIME, &stamp)?;
        self.store.set(LAST_ACTIVITY, &stamp)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) -> GuardResult<()> {
        self.store.set(LAST_ACTIVITY, &now.timestamp().to_string())
    }

    /// Remove every auth key, leaving guard and flash keys alone
    pub fn clear_auth(&mut self) -> GuardResult<()> {
        for key in AUTH_KEYS {
            self.store.delete(key)?;
        }
        Ok(())
    }

    pub fn set_return_url(&mut self, url: &str) -> GuardResult<()> {
        self.store.set(RETURN_URL, url)
    }

    /// Read and forget the stashed return URL
    pub fn take_return_url(&mut self) -> GuardResult<Option<String>> {
        let url = self.store.get(RETURN_URL);
        if url.is_some() {
            self.store.delete(RETURN_URL)?;
        }
        Ok(url)
    }

    pub fn set_flash(&mut self, flash: &FlashMessage) -> GuardResult<()> {
        let encoded = serde_json::to_string(flash)?;
        self.store.set_flash(FLASH, &encoded)
    }

    pub fn take_flash(&mut self) -> GuardResult<Option<FlashMessage>> {
        let Some(encoded) = self.store.take_flash(FLASH)? else {
            return Ok(None);
        };
        match serde_json::from_str(&encoded) {
            Ok(flash) => Ok(Some(flash)),
            Err(e) => {
                warn!("Discarding undecodable flash message: {}", e);
                Ok(None)
            }
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp(CREATED)
    }

    pub fn set_created_at(&mut self, at: DateTime<Utc>) -> GuardResult<()> {
        self.store.set(CREATED, &at.timestamp().to_string())
    }

    /// Stored browser fingerprint hash
    pub fn fingerprint(&self) -> Option<String> {
        self.store.get(FINGERPRINT)
    }

    pub fn set_fingerprint(&mut self, hash: &str) -> GuardResult<()> {
        self.store.set(FINGERPRINT, hash)
    }

    fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let secs: i64 = self.store.get(key)?.parse().ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}
