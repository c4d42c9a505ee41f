//! Login state machine.
//!
//! ```text
//! LoggedOut --login ok--> Authenticated --idle > timeout--> LoggedOut
//!     |                        |
//!     +--max failures--> Locked --lockout elapsed--> LoggedOut
//! ```
//!
//! Operations that would end the request (login, logout, failed
//! authorization) return an [`AuthOutcome::Redirect`]; the caller performs
//! the transport side effect.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::store::{CredentialRecord, PasswordVerifier, RoleStore, UserId, UserStore};
use crate::clock::{seconds, Clock};
use crate::config::AuthConfig;
use crate::error::GuardResult;
use crate::events::{self, EventSink, NullEventSink};
use crate::session::data::{FlashMessage, SessionData};
use crate::session::store::SessionStore;

/// Attempts at persisting a login result before giving up on a contended account
const STORE_RETRIES: usize = 3;

const MSG_INVALID: &str = "Invalid username or password.";

/// Hash verified against when the username is unknown, so both failure paths
/// pay for one verification
const DEFAULT_DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$YWVnaXMtZ3VhcmQtZHVtbXk$4WzEpR6s0uJ8m3QqgZb6cQkz7f1lXo9dVt2nYhKjR0M";
const MSG_LOCKED: &str = "Too many failed login attempts. Please try again later.";
const MSG_WELCOME: &str = "You are now logged in.";
const MSG_EXPIRED: &str = "Your session has expired. Please log in again.";
const MSG_LOGGED_OUT: &str = "You have been logged out.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "location", rename_all = "snake_case")]
pub enum AuthOutcome {
    Redirect(String),
    Continue,
}

impl AuthOutcome {
    pub fn redirect(url: &str) -> Self {
        AuthOutcome::Redirect(url.to_string())
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            AuthOutcome::Redirect(url) => Some(url),
            AuthOutcome::Continue => None,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, AuthOutcome::Redirect(_))
    }
}

/// Return URLs are only honoured when they stay on this origin
pub fn is_local_path(url: &str) -> bool {
    url.starts_with('/')
        && !url.starts_with("//")
        && !url.contains('\\')
        && !url.chars().any(char::is_control)
}

fn normalize_role(word: &str) -> String {
    word.trim().to_lowercase()
}

enum Attempt {
    Done(AuthOutcome),
    Conflict,
}

pub struct AuthGuard {
    config: AuthConfig,
    lockout: Duration,
    timeout: Duration,
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    verifier: Arc<dyn PasswordVerifier>,
    dummy_hash: String,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl AuthGuard {
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
        verifier: Arc<dyn PasswordVerifier>,
        clock: Arc<dyn Clock>,
    ) -> GuardResult<Self> {
        config.validate()?;
        Ok(Self {
            lockout: seconds(config.lockout_duration_secs),
            timeout: seconds(config.session_timeout_secs),
            config,
            users,
            roles,
            verifier,
            dummy_hash: DEFAULT_DUMMY_HASH.to_string(),
            clock,
            sink: Arc::new(NullEventSink),
        })
    }

    /// Hash in the embedder's own scheme, verified against for unknown
    /// usernames
    pub fn with_dummy_hash(mut self, hash: &str) -> Self {
        self.dummy_hash = hash.to_string();
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Attempt a login. Always ends in a redirect: to the stashed return URL
    /// (or the default) on success, back to the login page otherwise.
    pub fn login(
        &self,
        session: &mut dyn SessionStore,
        username: &str,
        password: &str,
    ) -> GuardResult<AuthOutcome> {
        let now = self.clock.now();

        for _ in 0..STORE_RETRIES {
            let Some(record) = self.users.find_by_username(username)? else {
                let _ = self.verifier.verify(password, &self.dummy_hash);
                debug!("Login for unknown user");
                self.sink.fire(
                    events::AUTH_LOGIN_FAILED,
                    &json!({ "username": username, "reason": "invalid_credentials" }),
                );
                return self.back_to_login(session, MSG_INVALID);
            };

            if record.is_locked(now) {
                info!("Rejected login for locked user {}", record.id);
                self.sink.fire(
                    events::AUTH_LOGIN_REJECTED_LOCKED,
                    &json!({ "user_id": record.id, "locked_until": record.locked_until }),
                );
                return self.back_to_login(session, MSG_LOCKED);
            }

            let attempt = if self.verifier.verify(password, &record.password_hash) {
                self.accept(session, &record, now)?
            } else {
                self.refuse(session, &record, now)?
            };

            match attempt {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Conflict => {
                    warn!("Concurrent update of login state for user {}, retrying", record.id);
                    self.sink.fire(events::AUTH_STORE_CONFLICT, &json!({ "user_id": record.id }));
                }
            }
        }

        warn!("Giving up on contended login for {}", username);
        self.back_to_login(session, MSG_INVALID)
    }

    fn accept(
        &self,
        session: &mut dyn SessionStore,
        record: &CredentialRecord,
        now: DateTime<Utc>,
    ) -> GuardResult<Attempt> {
        // Compared even when unchanged: a concurrently engaged lock must not be overwritten
        let mut updated = record.clone();
        updated.record_success();
        if !self.users.compare_and_persist(record, &updated)? {
            return Ok(Attempt::Conflict);
        }

        // Fresh id on privilege change
        if session.is_started() {
            session.regenerate_id()?;
        }

        let mut data = SessionData::new(session);
        data.begin_login(record.id, now)?;
        let target = data
            .take_return_url()?
            .filter(|url| is_local_path(url))
            .unwrap_or_else(|| self.config.default_redirect.clone());
        data.set_flash(&FlashMessage::success(MSG_WELCOME))?;

        info!("User {} logged in", record.id);
        self.sink.fire(events::AUTH_LOGIN_SUCCEEDED, &json!({ "user_id": record.id }));
        Ok(Attempt::Done(AuthOutcome::Redirect(target)))
    }

    fn refuse(
        &self,
        session: &mut dyn SessionStore,
        record: &CredentialRecord,
        now: DateTime<Utc>,
    ) -> GuardResult<Attempt> {
        let mut updated = record.clone();
        let locked = updated.record_failure(now, self.config.max_attempts, self.lockout);
        if !self.users.compare_and_persist(record, &updated)? {
            return Ok(Attempt::Conflict);
        }

        if locked {
            warn!(
                "Locking user {} after {} failed attempts",
                record.id, updated.failed_attempts
            );
            self.sink.fire(
                events::AUTH_LOCKED,
                &json!({ "user_id": record.id, "locked_until": updated.locked_until }),
            );
            return self.back_to_login(session, MSG_LOCKED).map(Attempt::Done);
        }

        // Remaining attempts go to the event only; the flash matches the unknown-user one
        let remaining = updated.remaining_attempts(self.config.max_attempts);
        debug!("User {} has {} login attempts remaining", record.id, remaining);
        self.sink.fire(
            events::AUTH_LOGIN_FAILED,
            &json!({
                "user_id": record.id,
                "reason": "invalid_credentials",
                "remaining_attempts": remaining,
            }),
        );
        self.back_to_login(session, MSG_INVALID).map(Attempt::Done)
    }

    fn back_to_login(&self, session: &mut dyn SessionStore, message: &str) -> GuardResult<AuthOutcome> {
        SessionData::new(session).set_flash(&FlashMessage::error(message))?;
        Ok(AuthOutcome::redirect(&self.config.login_url))
    }

    /// Whether the session carries a live login. Refreshes the activity
    /// stamp on success; on timeout clears the login and queues a warning.
    pub fn is_logged_in(&self, session: &mut dyn SessionStore) -> GuardResult<bool> {
        let now = self.clock.now();
        let mut data = SessionData::new(session);
        let Some(user_id) = data.user_id() else {
            return Ok(false);
        };

        let idle = data.last_activity().map(|last| now - last);
        match idle {
            Some(idle) if idle <= self.timeout => {
                data.touch(now)?;
                Ok(true)
            }
            _ => {
                data.clear_auth()?;
                data.set_flash(&FlashMessage::warning(MSG_EXPIRED))?;
                info!("Login for user {} timed out", user_id);
                self.sink.fire(
                    events::AUTH_TIMEOUT,
                    &json!({ "user_id": user_id, "idle_secs": idle.map(|d| d.num_seconds()) }),
                );
                Ok(false)
            }
        }
    }

    /// User id stored in the session, without checking for inactivity
    pub fn current_user_id(&self, session: &mut dyn SessionStore) -> Option<UserId> {
        SessionData::new(session).user_id()
    }

    pub fn logout(&self, session: &mut dyn SessionStore) -> GuardResult<AuthOutcome> {
        let mut data = SessionData::new(&mut *session);
        let user_id = data.user_id();
        data.clear_auth()?;
        if session.is_started() {
            session.regenerate_id()?;
        }
        SessionData::new(session).set_flash(&FlashMessage::success(MSG_LOGGED_OUT))?;

        if let Some(user_id) = user_id {
            info!("User {} logged out", user_id);
        }
        self.sink.fire(events::AUTH_LOGOUT, &json!({ "user_id": user_id }));
        Ok(AuthOutcome::redirect(&self.config.logout_redirect))
    }

    fn granted_roles(&self, session: &mut dyn SessionStore) -> GuardResult<Option<Vec<String>>> {
        let Some(user_id) = self.current_user_id(session) else {
            return Ok(None);
        };
        let roles = self.roles.roles_for(user_id)?;
        Ok(Some(roles.iter().map(|role| normalize_role(role)).collect()))
    }

    pub fn is_authorized(&self, session: &mut dyn SessionStore, word: &str) -> GuardResult<bool> {
        self.is_authorized_any(session, &[word])
    }

    /// True when the user holds at least one of `words`
    pub fn is_authorized_any(&self, session: &mut dyn SessionStore, words: &[&str]) -> GuardResult<bool> {
        let Some(granted) = self.granted_roles(session)? else {
            return Ok(false);
        };
        Ok(words
            .iter()
            .map(|word| normalize_role(word))
            .any(|word| !word.is_empty() && granted.contains(&word)))
    }

    /// True when the user holds every one of `words` (vacuously true for none)
    pub fn is_authorized_all(&self, session: &mut dyn SessionStore, words: &[&str]) -> GuardResult<bool> {
        let Some(granted) = self.granted_roles(session)? else {
            return Ok(false);
        };
        Ok(words
            .iter()
            .map(|word| normalize_role(word))
            .all(|word| !word.is_empty() && granted.contains(&word)))
    }

    /// Gate a protected request. With `roles` empty only a live login is
    /// required; otherwise any one of the roles.
    pub fn require_auth(&self, session: &mut dyn SessionStore, roles: &[&str]) -> GuardResult<AuthOutcome> {
        if !self.is_logged_in(session)? {
            return Ok(AuthOutcome::redirect(&self.config.login_url));
        }
        if !roles.is_empty() && !self.is_authorized_any(session, roles)? {
            debug!("Forbidden: missing any of {:?}", roles);
            return Ok(AuthOutcome::redirect(&self.config.forbidden_url));
        }
        Ok(AuthOutcome::Continue)
    }

    /// Remember where to send the user after login. Off-site targets are
    /// replaced by the default redirect.
    pub fn stash_return_url(&self, session: &mut dyn SessionStore, url: &str) -> GuardResult<()> {
        let target = if is_local_path(url) {
            url
        } else {
            warn!("Refusing non-local return URL");
            self.config.default_redirect.as_str()
        };
        SessionData::new(session).set_return_url(target)
    }

    pub fn take_flash(&self, session: &mut dyn SessionStore) -> GuardResult<Option<FlashMessage>> {
        SessionData::new(session).take_flash()
    }
}
