//! Session hijack detection and periodic id rotation.
//!
//! A session is bound to a SHA-256 hash of the browser's stable headers
//! (User-Agent, Accept-Language, Accept-Encoding). A request presenting a
//! different hash is treated as a hijack: the session is destroyed outright
//! and a fresh one takes its place. Independently, the session id is rotated
//! once `regenerate_interval` has elapsed since it was issued.

use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::clock::{seconds, Clock};
use crate::config::SessionConfig;
use crate::error::GuardResult;
use crate::events::{self, EventSink, NullEventSink};
use crate::request::RequestContext;
use crate::session::data::SessionData;
use crate::session::store::SessionStore;

/// Hex characters of a fingerprint that may appear in events
const FINGERPRINT_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCheck {
    /// New session bound to this browser
    Started,
    Continued,
    /// Id rotated, data kept
    Regenerated,
    /// Fingerprint mismatch; old session destroyed and replaced
    HijackRecovered,
}

impl SessionCheck {
    /// Whether the session id changed during the check
    pub fn id_changed(&self) -> bool {
        !matches!(self, SessionCheck::Continued)
    }
}

/// Hash of the headers a browser keeps stable for the life of a session
pub fn browser_fingerprint(request: &RequestContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.header("user-agent").as_bytes());
    hasher.update(b"\n");
    hasher.update(request.header("accept-language").as_bytes());
    hasher.update(b"\n");
    hasher.update(request.header("accept-encoding").as_bytes());
    hex::encode(hasher.finalize())
}

fn prefix(hash: &str) -> &str {
    hash.get(..FINGERPRINT_PREFIX_LEN).unwrap_or(hash)
}

pub struct SessionGuard {
    regenerate_interval: Duration,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl SessionGuard {
    pub fn new(config: &SessionConfig, clock: Arc<dyn Clock>) -> GuardResult<Self> {
        config.validate()?;
        Ok(Self {
            regenerate_interval: seconds(config.regenerate_interval_secs),
            clock,
            sink: Arc::new(NullEventSink),
        })
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the session against the current request, starting, rotating
    /// or replacing it as needed.
    pub fn check(
        &self,
        session: &mut dyn SessionStore,
        request: &RequestContext,
    ) -> GuardResult<SessionCheck> {
        let current = browser_fingerprint(request);

        if !session.is_started() {
            session.start()?;
            self.bind(session, &current)?;
            self.sink.fire(events::SESSION_STARTED, &json!({ "path": request.path }));
            debug!("Started session for {}", request.path);
            return Ok(SessionCheck::Started);
        }

        let (stored, created) = {
            let data = SessionData::new(&mut *session);
            (data.fingerprint(), data.created_at())
        };

        let Some(stored) = stored else {
            // Started elsewhere without guard keys
            self.bind(session, &current)?;
            return Ok(SessionCheck::Started);
        };

        if !bool::from(stored.as_bytes().ct_eq(current.as_bytes())) {
            warn!("Browser fingerprint changed mid-session, destroying session");
            session.destroy()?;
            session.start()?;
            self.bind(session, &current)?;
            self.sink.fire(
                events::SESSION_HIJACK_DETECTED,
                &json!({
                    "stored": prefix(&stored),
                    "current": prefix(&current),
                    "path": request.path,
                }),
            );
            return Ok(SessionCheck::HijackRecovered);
        }

        let now = self.clock.now();
        match created {
            Some(created) if now - created > self.regenerate_interval => {
                session.regenerate_id()?;
                SessionData::new(&mut *session).set_created_at(now)?;
                self.sink.fire(events::SESSION_REGENERATED, &json!({ "path": request.path }));
                info!("Rotated session id after {}s", (now - created).num_seconds());
                Ok(SessionCheck::Regenerated)
            }
            Some(_) => Ok(SessionCheck::Continued),
            None => {
                SessionData::new(&mut *session).set_created_at(now)?;
                Ok(SessionCheck::Continued)
            }
        }
    }

    fn bind(&self, session: &mut dyn SessionStore, fingerprint: &str) -> GuardResult<()> {
        let mut data = SessionData::new(session);
        data.set_created_at(self.clock.now())?;
        data.set_fingerprint(fingerprint)
    }
}
