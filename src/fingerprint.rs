//! Signed client fingerprint cookie (`fpid`).
//!
//! The client computes a SHA-256 fingerprint and stores it, hex encoded, in
//! the `fpid` cookie. The server countersigns well-formed values with
//! HMAC-SHA256 so later requests can tell an issued cookie from a forged one:
//!
//! ```text
//! raw                  64 lowercase hex chars          -> unsigned
//! raw|hmac(raw)        64 hex + '|' + 64 hex           -> valid or forged
//! ```
//!
//! The cookie is not HttpOnly: client script reads and rewrites the raw value.
//! The session cookie is HttpOnly.

use ring::hmac;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{FingerprintConfig, SecretKey, MIN_SECRET_LEN};
use crate::error::{GuardError, GuardResult};

/// Hex length of a raw fingerprint and of its signature (32 bytes each)
pub const FINGERPRINT_HEX_LEN: usize = 64;

const SEPARATOR: char = '|';

/// Classification of an incoming fpid cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieState {
    Missing,
    Malformed,
    Unsigned,
    Valid,
    Forged,
}

impl CookieState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieState::Missing => "missing",
            CookieState::Malformed => "malformed",
            CookieState::Unsigned => "unsigned",
            CookieState::Valid => "valid",
            CookieState::Forged => "forged",
        }
    }
}

/// What the caller should do with the fpid cookie on the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "value")]
pub enum CookieAction {
    None,
    Set(String),
    Clear,
}

/// HMAC-SHA256 signer for fpid values.
///
/// An unconfigured signer is allowed to exist so scoring can degrade instead
/// of failing; it refuses to sign and verifies nothing.
pub struct FingerprintSigner {
    key: Option<hmac::Key>,
}

impl FingerprintSigner {
    /// Signer with a validated secret
    pub fn configure(secret: &SecretKey) -> GuardResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(GuardError::Configuration(format!(
                "fingerprint secret key must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self {
            key: Some(hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())),
        })
    }

    pub fn from_config(config: &FingerprintConfig) -> GuardResult<Self> {
        Self::configure(&config.secret_key)
    }

    /// Signer without a key; `verify` always fails closed
    pub fn unconfigured() -> Self {
        Self { key: None }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Hex HMAC of a raw fingerprint
    pub fn sign(&self, raw: &str) -> GuardResult<String> {
        if !is_raw_fingerprint(raw) {
            return Err(GuardError::Validation(format!(
                "raw fingerprint must be {} lowercase hex characters",
                FINGERPRINT_HEX_LEN
            )));
        }
        let key = self.key.as_ref().ok_or_else(|| {
            GuardError::Configuration("fingerprint signer has no secret key".to_string())
        })?;
        Ok(hex::encode(hmac::sign(key, raw.as_bytes()).as_ref()))
    }

    /// Constant-time signature check. Any bad input yields `false`.
    pub fn verify(&self, raw: &str, signature: &str) -> bool {
        let Some(key) = self.key.as_ref() else {
            return false;
        };
        if !is_raw_fingerprint(raw) || !is_raw_fingerprint(signature) {
            return false;
        }
        let Ok(tag) = hex::decode(signature) else {
            return false;
        };
        hmac::verify(key, raw.as_bytes(), &tag).is_ok()
    }

    pub fn classify(&self, cookie_value: &str) -> CookieState {
        match parse_cookie_value(cookie_value) {
            ParsedCookie::Empty => CookieState::Missing,
            ParsedCookie::Invalid => CookieState::Malformed,
            ParsedCookie::Raw(_) => CookieState::Unsigned,
            ParsedCookie::Signed(raw, signature) => {
                if self.verify(raw, signature) {
                    CookieState::Valid
                } else {
                    CookieState::Forged
                }
            }
        }
    }

    /// Decide how the response should update the cookie.
    ///
    /// Unsigned values are countersigned, malformed and forged values are
    /// cleared. An unconfigured signer cannot distinguish valid from forged,
    /// so it leaves the cookie alone.
    pub fn reconcile(&self, cookie_value: &str) -> CookieAction {
        if !self.is_configured() {
            debug!("fpid reconcile skipped: signer unconfigured");
            return CookieAction::None;
        }

        match parse_cookie_value(cookie_value) {
            ParsedCookie::Empty => CookieAction::None,
            ParsedCookie::Invalid => {
                debug!("Clearing malformed fpid cookie");
                CookieAction::Clear
            }
            ParsedCookie::Raw(raw) => match self.sign(raw) {
                Ok(signature) => CookieAction::Set(format!("{}{}{}", raw, SEPARATOR, signature)),
                Err(e) => {
                    warn!("Failed to sign fpid value: {}", e);
                    CookieAction::None
                }
            },
            ParsedCookie::Signed(raw, signature) => {
                if self.verify(raw, signature) {
                    CookieAction::None
                } else {
                    warn!("Clearing forged fpid cookie");
                    CookieAction::Clear
                }
            }
        }
    }
}

impl std::fmt::Debug for FingerprintSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintSigner")
            .field("configured", &self.is_configured())
            .finish()
    }
}

enum ParsedCookie<'a> {
    Empty,
    Invalid,
    Raw(&'a str),
    Signed(&'a str, &'a str),
}

fn parse_cookie_value(value: &str) -> ParsedCookie<'_> {
    if value.is_empty() {
        return ParsedCookie::Empty;
    }
    match value.split_once(SEPARATOR) {
        None if is_raw_fingerprint(value) => ParsedCookie::Raw(value),
        Some((raw, signature)) if is_raw_fingerprint(raw) && is_raw_fingerprint(signature) => {
            ParsedCookie::Signed(raw, signature)
        }
        _ => ParsedCookie::Invalid,
    }
}

/// Exactly 64 lowercase hex characters
pub fn is_raw_fingerprint(value: &str) -> bool {
    value.len() == FINGERPRINT_HEX_LEN
        && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// `Set-Cookie` rendering for the fpid cookie.
///
/// Path=/, SameSite=Lax, no HttpOnly. Set lasts `max_age_secs`; clear expires
/// immediately with an empty value.
#[derive(Debug, Clone)]
pub struct FpidCookie {
    pub name: String,
    pub max_age_secs: u64,
    pub secure: bool,
}

impl FpidCookie {
    pub fn from_config(config: &FingerprintConfig, https: bool) -> Self {
        Self {
            name: config.cookie_name.clone(),
            max_age_secs: config.cookie_max_age_secs,
            secure: https,
        }
    }

    /// Header value for `action`, or `None` when nothing needs sending
    pub fn header(&self, action: &CookieAction) -> Option<String> {
        let secure = if self.secure { "; Secure" } else { "" };
        match action {
            CookieAction::None => None,
            CookieAction::Set(value) => Some(format!(
                "{}={}; Path=/; Max-Age={}; SameSite=Lax{}",
                self.name,
                urlencoding::encode(value),
                self.max_age_secs,
                secure
            )),
            CookieAction::Clear => Some(format!(
                "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; SameSite=Lax{}",
                self.name, secure
            )),
        }
    }
}
