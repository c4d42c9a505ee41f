//! One-call request inspection: session check, fpid cookie reconciliation
//! and bot scoring, wired from a single [`GuardConfig`].

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::bot_scoring::{BotScore, BotScorer};
use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::GuardResult;
use crate::events::EventSink;
use crate::fingerprint::{CookieAction, FingerprintSigner, FpidCookie};
use crate::rate_limit::RateLimiter;
use crate::request::RequestContext;
use crate::session::cookie::SessionCookiePolicy;
use crate::session::guard::{SessionCheck, SessionGuard};
use crate::session::store::{Session, SessionBackend, SessionStore};

/// What the boundary decided about one request
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub session: SessionCheck,
    pub fpid: CookieAction,
    /// `Set-Cookie` header values to emit with the response
    pub set_cookies: Vec<String>,
    pub bot: BotScore,
    pub likely_bot: bool,
}

pub struct RequestGuard {
    config: GuardConfig,
    signer: Arc<FingerprintSigner>,
    scorer: BotScorer,
    sessions: SessionGuard,
}

impl RequestGuard {
    pub fn new(config: GuardConfig, clock: Arc<dyn Clock>) -> GuardResult<Self> {
        config.validate()?;
        let signer = Arc::new(FingerprintSigner::from_config(&config.fingerprint)?);
        let scorer = BotScorer::new(config.bot.clone(), signer.clone())?
            .with_fingerprint_cookie(&config.fingerprint.cookie_name);
        let sessions = SessionGuard::new(&config.session, clock)?;

        Ok(Self {
            config,
            signer,
            scorer,
            sessions,
        })
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.scorer = self.scorer.with_event_sink(sink.clone());
        self.sessions = self.sessions.with_event_sink(sink);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.scorer = self.scorer.with_rate_limiter(limiter);
        self
    }

    pub fn signer(&self) -> &FingerprintSigner {
        &self.signer
    }

    pub fn scorer(&self) -> &BotScorer {
        &self.scorer
    }

    pub fn session_cookie(&self, request: &RequestContext) -> SessionCookiePolicy {
        SessionCookiePolicy::from_config(&self.config.session, request.https)
    }

    /// Resume the session named by the request's session cookie
    pub fn open_session<B: SessionBackend>(
        &self,
        backend: Arc<B>,
        request: &RequestContext,
    ) -> GuardResult<Session<B>> {
        let policy = self.session_cookie(request);
        Session::resume(backend, policy.session_id_from_request(request))
    }

    pub fn inspect(
        &self,
        request: &RequestContext,
        session: &mut dyn SessionStore,
    ) -> GuardResult<Inspection> {
        let check = self.sessions.check(session, request)?;

        let mut set_cookies = Vec::new();
        if check.id_changed() {
            if let Some(id) = session.id() {
                set_cookies.push(self.session_cookie(request).set_cookie_header(id));
            }
        }

        let fpid_value = request
            .cookie(&self.config.fingerprint.cookie_name)
            .unwrap_or("");
        let fpid = self.signer.reconcile(fpid_value);
        if let Some(header) = FpidCookie::from_config(&self.config.fingerprint, request.https).header(&fpid) {
            set_cookies.push(header);
        }

        let bot = self.scorer.score(request);
        let likely_bot = bot.is_likely_bot(self.scorer.threshold());
        debug!(
            "Inspected {} {}: session {:?}, score {:.2}",
            request.method, request.path, check, bot.score
        );

        Ok(Inspection {
            session: check,
            fpid,
            set_cookies,
            bot,
            likely_bot,
        })
    }
}
