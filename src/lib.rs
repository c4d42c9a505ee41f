// Library interface for the AEGIS request-boundary guard
// Login lockout, signed client fingerprints, bot scoring, session hijack detection

pub mod attack_patterns;
pub mod auth;
pub mod bot_scoring;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod pipeline;
pub mod rate_limit;
pub mod request;
pub mod session;

pub use auth::{AuthGuard, AuthOutcome};
pub use bot_scoring::{BotScore, BotScorer, Signal};
pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use fingerprint::{CookieAction, CookieState, FingerprintSigner};
pub use pipeline::{Inspection, RequestGuard};
pub use request::RequestContext;
pub use session::{SessionCheck, SessionGuard};
