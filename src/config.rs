use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{GuardError, GuardResult};

/// Minimum HMAC secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Guard configuration, one section per component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub fingerprint: FingerprintConfig,
    pub bot: BotConfig,
    pub auth: AuthConfig,
    pub session: SessionConfig,
}

/// HMAC secret. Redacted in `Debug`, wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([redacted; {} bytes])", self.0.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// HMAC-SHA256 key for the fpid cookie (at least 32 bytes)
    pub secret_key: SecretKey,
    pub cookie_name: String,
    /// Lifetime of a freshly signed cookie
    pub cookie_max_age_secs: u64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            secret_key: SecretKey::default(),
            cookie_name: "fpid".to_string(),
            cookie_max_age_secs: 365 * 24 * 60 * 60,
        }
    }
}

impl FingerprintConfig {
    pub fn validate(&self) -> GuardResult<()> {
        if self.secret_key.len() < MIN_SECRET_LEN {
            return Err(GuardError::Configuration(format!(
                "fingerprint secret key must be at least {} bytes (got {})",
                MIN_SECRET_LEN,
                self.secret_key.len()
            )));
        }
        if self.cookie_name.is_empty() {
            return Err(GuardError::Configuration(
                "fingerprint cookie name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Path substrings that raise suspicion when requested
    pub sensitive_paths: Vec<String>,
    /// Hidden form field that humans never fill in
    pub honeypot_field: String,
    /// Score at or above which a request is treated as automated
    pub threshold: f64,
    /// Additional user-agent substrings appended to the built-in table
    pub extra_bot_agents: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            sensitive_paths: Vec::new(),
            honeypot_field: "website".to_string(),
            threshold: 0.7,
            extra_bot_agents: Vec::new(),
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> GuardResult<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(GuardError::Configuration(format!(
                "bot threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Failed attempts before the account is locked
    pub max_attempts: u32,
    pub lockout_duration_secs: u64,
    /// Inactivity window before a login expires
    pub session_timeout_secs: u64,
    pub login_url: String,
    /// Redirect target after login when no return URL was stashed
    pub default_redirect: String,
    pub logout_redirect: String,
    pub forbidden_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration_secs: 900,
            session_timeout_secs: 3600,
            login_url: "/login".to_string(),
            default_redirect: "/".to_string(),
            logout_redirect: "/login".to_string(),
            forbidden_url: "/forbidden".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> GuardResult<()> {
        if self.max_attempts == 0 {
            return Err(GuardError::Configuration(
                "max_attempts must be > 0".to_string(),
            ));
        }
        if self.lockout_duration_secs == 0 || self.session_timeout_secs == 0 {
            return Err(GuardError::Configuration(
                "lockout_duration_secs and session_timeout_secs must be > 0".to_string(),
            ));
        }
        for (name, url) in [
            ("login_url", &self.login_url),
            ("default_redirect", &self.default_redirect),
            ("logout_redirect", &self.logout_redirect),
            ("forbidden_url", &self.forbidden_url),
        ] {
            if url.is_empty() {
                return Err(GuardError::Configuration(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Session id rotation period
    pub regenerate_interval_secs: u64,
    /// Where file-backed sessions live; must be outside `public_root`
    pub storage_dir: Option<PathBuf>,
    /// Document root served to clients
    pub public_root: Option<PathBuf>,
    /// Sessions untouched for longer than this are removed by `purge_idle`
    pub max_idle_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "__Host-sid".to_string(),
            regenerate_interval_secs: 1800,
            storage_dir: None,
            public_root: None,
            max_idle_secs: 86_400,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> GuardResult<()> {
        if self.cookie_name.is_empty() {
            return Err(GuardError::Configuration(
                "session cookie name must not be empty".to_string(),
            ));
        }
        if self.regenerate_interval_secs == 0 {
            return Err(GuardError::Configuration(
                "regenerate_interval_secs must be > 0".to_string(),
            ));
        }
        if self.max_idle_secs == 0 {
            return Err(GuardError::Configuration("max_idle_secs must be > 0".to_string()));
        }
        if let (Some(dir), Some(root)) = (&self.storage_dir, &self.public_root) {
            if dir.starts_with(root) {
                return Err(GuardError::Configuration(format!(
                    "session storage {} is inside public root {}",
                    dir.display(),
                    root.display()
                )));
            }
        }
        Ok(())
    }
}

impl GuardConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GuardConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(&self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> GuardResult<()> {
        self.fingerprint.validate()?;
        self.bot.validate()?;
        self.auth.validate()?;
        self.session.validate()?;
        Ok(())
    }
}
