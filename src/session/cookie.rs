use tracing::warn;

use crate::config::SessionConfig;
use crate::request::RequestContext;

const HOST_PREFIX: &str = "__Host-";

/// Session cookie attributes: HttpOnly, SameSite=Strict, Path=/, no Domain,
/// no expiry, Secure iff the transport is HTTPS.
#[derive(Debug, Clone)]
pub struct SessionCookiePolicy {
    name: String,
    https: bool,
}

impl SessionCookiePolicy {
    pub fn new(name: &str, https: bool) -> Self {
        Self {
            name: name.to_string(),
            https,
        }
    }

    pub fn from_config(config: &SessionConfig, https: bool) -> Self {
        Self::new(&config.cookie_name, https)
    }

    /// Effective cookie name. Browsers drop `__Host-` cookies that are not
    /// Secure, so the prefix is only kept over HTTPS.
    pub fn cookie_name(&self) -> &str {
        if self.https {
            return &self.name;
        }
        self.name.strip_prefix(HOST_PREFIX).unwrap_or(&self.name)
    }

    pub fn set_cookie_header(&self, session_id: &str) -> String {
        let mut header = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict",
            self.cookie_name(),
            session_id
        );
        if self.https {
            header.push_str("; Secure");
        }
        header
    }

    pub fn clear_cookie_header(&self) -> String {
        let mut header = format!(
            "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict",
            self.cookie_name()
        );
        if self.https {
            header.push_str("; Secure");
        }
        header
    }

    /// Session id from the cookie jar only. Ids smuggled in the query string
    /// or form body are ignored.
    pub fn session_id_from_request<'r>(&self, request: &'r RequestContext) -> Option<&'r str> {
        let name = self.cookie_name();
        if request.param(name).is_some() {
            warn!(
                "Ignoring session id passed in request parameters for {}",
                request.path
            );
        }
        request.cookie(name).filter(|id| !id.is_empty())
    }
}
