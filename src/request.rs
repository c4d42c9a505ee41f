//! Request view shared by the guards.
//!
//! The guards never touch a transport; callers translate their framework's
//! request into a [`RequestContext`] once and hand it to each component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::warn;

/// Snapshot of the request attributes the guards inspect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// Upper-case HTTP method
    pub method: String,
    /// Path without query string
    pub path: String,
    /// Header pairs in arrival order; lookups are case-insensitive
    pub headers: Vec<(String, String)>,
    pub cookies: BTreeMap<String, String>,
    /// Decoded query string pairs
    pub query: Vec<(String, String)>,
    /// Decoded form body pairs
    pub form: Vec<(String, String)>,
    pub remote_ip: Option<IpAddr>,
    /// Whether the request arrived over HTTPS
    pub https: bool,
}

impl RequestContext {
    /// Build from a method and request target such as `/search?q=shoes`
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };

        let query = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method: method.trim().to_ascii_uppercase(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
            ..Self::default()
        }
    }

    /// Bring a context built field by field (e.g. deserialized) into the
    /// shape `new` and the builders produce: upper-case method, query split
    /// off the path, `Cookie` headers parsed into the jar. Cookies already in
    /// the jar win over header values.
    pub fn normalized(mut self) -> Self {
        self.method = self.method.trim().to_ascii_uppercase();

        if let Some((path, query)) = self.path.split_once('?') {
            let parsed: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            self.query.extend(parsed);
            self.path = path.to_string();
        }
        if self.path.is_empty() {
            self.path = "/".to_string();
        }

        let from_headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, value)| parse_cookie_header(value))
            .collect();
        for (name, value) in from_headers {
            self.cookies.entry(name).or_insert(value);
        }
        self
    }

    /// Set a header, replacing any earlier value of the same name. A `Cookie`
    /// header also populates the cookie jar.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if name.eq_ignore_ascii_case("cookie") {
            for (cookie_name, cookie_value) in parse_cookie_header(value) {
                self.cookies.insert(cookie_name, cookie_value);
            }
        }
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_form_field(mut self, name: &str, value: &str) -> Self {
        self.form.push((name.to_string(), value.to_string()));
        self
    }

    /// Parse an `application/x-www-form-urlencoded` body into form fields
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.form.extend(
            url::form_urlencoded::parse(body.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
        self
    }

    /// Set the peer address; invalid addresses are dropped rather than trusted
    pub fn with_remote_ip(mut self, ip: &str) -> Self {
        self.remote_ip = parse_ip(ip);
        if self.remote_ip.is_none() {
            warn!("Ignoring invalid remote IP {:?}", ip);
        }
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Header value, or `""` when absent
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .unwrap_or("")
    }

    pub fn has_header(&self, name: &str) -> bool {
        !self.header(name).is_empty()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Value of a request parameter; form body wins over query string
    pub fn param(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .chain(self.query.iter())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every query and form value, in that order
    pub fn request_values(&self) -> impl Iterator<Item = &str> {
        self.query
            .iter()
            .chain(self.form.iter())
            .map(|(_, value)| value.as_str())
    }

    pub fn is_loopback(&self) -> bool {
        self.remote_ip.map(|ip| ip.is_loopback()).unwrap_or(false)
    }
}

/// Split a `Cookie` header into decoded name/value pairs.
/// Pairs without `=` or with an empty name are skipped.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            let value = urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string());
            Some((name.to_string(), value))
        })
        .collect()
}

/// Strict IP parse: control characters and embedded whitespace are rejected
fn parse_ip(ip: &str) -> Option<IpAddr> {
    let ip = ip.trim();
    if ip.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return None;
    }
    IpAddr::from_str(ip).ok()
}
