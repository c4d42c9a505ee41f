//! Bot likelihood scoring.
//!
//! Independent boolean signals are evaluated against one request and their
//! weights summed into a score capped at 1.0. Weights are kept in hundredths
//! so totals are exact and threshold comparisons are stable.
//!
//! | Signal                              | Weight |
//! |-------------------------------------|--------|
//! | empty or known-bot user agent       | 0.4    |
//! | missing Accept / Accept-Language    | 0.2    |
//! | POST without Referer                | 0.1    |
//! | sensitive path                      | 0.1    |
//! | rate limited                        | 0.2    |
//! | browser UA missing typical headers  | 0.2    |
//! | no cookies                          | 0.3    |
//! | rare HTTP method                    | 0.3    |
//! | Origin not matching Host            | 0.1    |
//! | honeypot field filled               | 0.3    |
//! | attack pattern in a request value   | 0.4    |
//! | fpid unsigned / missing / forged    | 0.1 / 0.3 / 0.5 |

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::attack_patterns;
use crate::config::{BotConfig, FingerprintConfig};
use crate::error::GuardResult;
use crate::events::{self, EventSink, NullEventSink};
use crate::fingerprint::{CookieState, FingerprintSigner};
use crate::rate_limit::RateLimiter;
use crate::request::RequestContext;

/// Score cap, in hundredths
const MAX_POINTS: u32 = 100;

const RARE_METHODS: [&str; 4] = ["TRACE", "TRACK", "CONNECT", "OPTIONS"];

/// User-agent substring identifying automation
#[derive(Debug, Clone)]
pub struct KnownAgent {
    pub needle: String,
    pub category: &'static str,
}

/// Curated user-agent table, matched case-insensitively as substrings
pub fn default_known_agents() -> Vec<KnownAgent> {
    let table: [(&str, &'static str); 32] = [
        // Search engines and generic crawlers
        ("googlebot", "search_engine"),
        ("bingbot", "search_engine"),
        ("slurp", "search_engine"),
        ("duckduckbot", "search_engine"),
        ("baiduspider", "search_engine"),
        ("yandexbot", "search_engine"),
        ("bot", "crawler"),
        ("crawler", "crawler"),
        ("spider", "crawler"),
        // Scripted clients
        ("curl/", "scripted"),
        ("wget", "scripted"),
        ("python-requests", "scripted"),
        ("python-urllib", "scripted"),
        ("aiohttp", "scripted"),
        ("go-http-client", "scripted"),
        ("java/", "scripted"),
        ("okhttp", "scripted"),
        ("libwww-perl", "scripted"),
        ("httpclient", "scripted"),
        ("node-fetch", "scripted"),
        ("axios", "scripted"),
        // Scrapers and headless browsers
        ("scrapy", "scraper"),
        ("phantomjs", "headless"),
        ("headlesschrome", "headless"),
        ("selenium", "headless"),
        ("puppeteer", "headless"),
        ("playwright", "headless"),
        // Vulnerability scanners
        ("nikto", "scanner"),
        ("sqlmap", "scanner"),
        ("nmap", "scanner"),
        ("masscan", "scanner"),
        ("zgrab", "scanner"),
    ];

    table
        .iter()
        .map(|&(needle, category)| KnownAgent {
            needle: needle.to_string(),
            category,
        })
        .collect()
}

/// One independently evaluated suspicion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    EmptyUserAgent,
    KnownBotUserAgent,
    MissingAcceptHeaders,
    PostWithoutReferer,
    SensitivePath,
    RateLimited,
    BrowserMissingHeaders,
    NoCookies,
    RareMethod,
    InvalidOrigin,
    HoneypotFilled,
    AttackPayload,
    /// fpid cookie state as classified by the signer
    Fingerprint(CookieState),
    /// Signer has no key; fpid cannot be trusted either way
    FingerprintUnverified,
}

impl Signal {
    /// Weight in hundredths
    pub fn points(&self) -> u32 {
        match self {
            Signal::EmptyUserAgent | Signal::KnownBotUserAgent => 40,
            Signal::MissingAcceptHeaders => 20,
            Signal::PostWithoutReferer => 10,
            Signal::SensitivePath => 10,
            Signal::RateLimited => 20,
            Signal::BrowserMissingHeaders => 20,
            Signal::NoCookies => 30,
            Signal::RareMethod => 30,
            Signal::InvalidOrigin => 10,
            Signal::HoneypotFilled => 30,
            Signal::AttackPayload => 40,
            Signal::Fingerprint(state) => match state {
                CookieState::Valid => 0,
                CookieState::Unsigned => 10,
                CookieState::Missing | CookieState::Malformed => 30,
                CookieState::Forged => 50,
            },
            Signal::FingerprintUnverified => 30,
        }
    }

    pub fn weight(&self) -> f64 {
        f64::from(self.points()) / 100.0
    }

    pub fn category(&self) -> &'static str {
        match self {
            Signal::EmptyUserAgent | Signal::KnownBotUserAgent => "user_agent",
            Signal::MissingAcceptHeaders
            | Signal::BrowserMissingHeaders
            | Signal::InvalidOrigin => "headers",
            Signal::PostWithoutReferer | Signal::RareMethod => "method",
            Signal::SensitivePath => "path",
            Signal::RateLimited => "rate",
            Signal::NoCookies => "cookies",
            Signal::HoneypotFilled | Signal::AttackPayload => "payload",
            Signal::Fingerprint(_) | Signal::FingerprintUnverified => "fingerprint",
        }
    }

    pub fn check(&self) -> &'static str {
        match self {
            Signal::EmptyUserAgent => "empty_user_agent",
            Signal::KnownBotUserAgent => "known_bot_user_agent",
            Signal::MissingAcceptHeaders => "missing_accept_headers",
            Signal::PostWithoutReferer => "post_without_referer",
            Signal::SensitivePath => "sensitive_path",
            Signal::RateLimited => "rate_limited",
            Signal::BrowserMissingHeaders => "browser_missing_headers",
            Signal::NoCookies => "no_cookies",
            Signal::RareMethod => "rare_method",
            Signal::InvalidOrigin => "invalid_origin",
            Signal::HoneypotFilled => "honeypot_filled",
            Signal::AttackPayload => "attack_payload",
            Signal::Fingerprint(CookieState::Valid) => "fpid_valid",
            Signal::Fingerprint(CookieState::Unsigned) => "fpid_unsigned",
            Signal::Fingerprint(CookieState::Missing) => "fpid_missing",
            Signal::Fingerprint(CookieState::Malformed) => "fpid_malformed",
            Signal::Fingerprint(CookieState::Forged) => "fpid_forged",
            Signal::FingerprintUnverified => "fpid_unverified",
        }
    }
}

/// Category -> check -> weight
pub type Reasons = BTreeMap<String, BTreeMap<String, f64>>;

/// Aggregated result for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotScore {
    /// Capped sum of triggered weights, in [0, 1]
    pub score: f64,
    pub reasons: Reasons,
    /// Triggered signals in evaluation order
    pub signals: Vec<Signal>,
}

impl BotScore {
    /// Sum and cap a set of triggered signals. Zero-weight signals are dropped.
    pub fn from_signals(signals: &[Signal]) -> Self {
        let mut points: u32 = 0;
        let mut reasons = Reasons::new();
        let mut triggered = Vec::with_capacity(signals.len());

        for signal in signals {
            if signal.points() == 0 {
                continue;
            }
            points = points.saturating_add(signal.points());
            reasons
                .entry(signal.category().to_string())
                .or_default()
                .insert(signal.check().to_string(), signal.weight());
            triggered.push(*signal);
        }

        Self {
            score: f64::from(points.min(MAX_POINTS)) / 100.0,
            reasons,
            signals: triggered,
        }
    }

    pub fn is_likely_bot(&self, threshold: f64) -> bool {
        self.score >= threshold
    }

    pub fn has(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Deterministic multi-signal bot scorer
pub struct BotScorer {
    config: BotConfig,
    signer: Arc<FingerprintSigner>,
    fingerprint_cookie: String,
    known_agents: Vec<KnownAgent>,
    sensitive_paths: Vec<String>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    sink: Arc<dyn EventSink>,
}

impl BotScorer {
    pub fn new(config: BotConfig, signer: Arc<FingerprintSigner>) -> GuardResult<Self> {
        config.validate()?;

        let mut known_agents = default_known_agents();
        known_agents.extend(
            config
                .extra_bot_agents
                .iter()
                .filter(|agent| !agent.trim().is_empty())
                .map(|agent| KnownAgent {
                    needle: agent.trim().to_lowercase(),
                    category: "custom",
                }),
        );

        let sensitive_paths = config
            .sensitive_paths
            .iter()
            .filter(|path| !path.is_empty())
            .map(|path| path.to_lowercase())
            .collect();

        Ok(Self {
            config,
            signer,
            fingerprint_cookie: FingerprintConfig::default().cookie_name,
            known_agents,
            sensitive_paths,
            rate_limiter: None,
            sink: Arc::new(NullEventSink),
        })
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_fingerprint_cookie(mut self, name: &str) -> Self {
        self.fingerprint_cookie = name.to_string();
        self
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Evaluate every signal without emitting events
    pub fn evaluate(&self, request: &RequestContext) -> Vec<Signal> {
        let mut signals = Vec::new();

        let user_agent = request.header("user-agent");
        let ua_lower = user_agent.to_lowercase();
        if user_agent.is_empty() {
            signals.push(Signal::EmptyUserAgent);
        } else if let Some(agent) = self.match_known_agent(&ua_lower) {
            debug!("Known automation agent '{}' ({})", agent.needle, agent.category);
            signals.push(Signal::KnownBotUserAgent);
        }

        if !request.has_header("accept") || !request.has_header("accept-language") {
            signals.push(Signal::MissingAcceptHeaders);
        }

        if request.method == "POST" && !request.has_header("referer") {
            signals.push(Signal::PostWithoutReferer);
        }

        if self.is_sensitive_path(&request.path) {
            signals.push(Signal::SensitivePath);
        }

        if let Some(limiter) = &self.rate_limiter {
            if limiter.is_rate_limited(request) {
                signals.push(Signal::RateLimited);
            }
        }

        if ua_lower.contains("mozilla") && !request.is_loopback() {
            let typical = ["accept-language", "accept-encoding", "sec-ch-ua"];
            if typical.iter().any(|name| !request.has_header(name)) {
                signals.push(Signal::BrowserMissingHeaders);
            }
        }

        if request.cookies.is_empty() {
            signals.push(Signal::NoCookies);
        }

        if RARE_METHODS.contains(&request.method.as_str()) {
            signals.push(Signal::RareMethod);
        }

        let origin = request.header("origin");
        if !origin.is_empty() && !origin.contains(request.header("host")) {
            signals.push(Signal::InvalidOrigin);
        }

        if !self.config.honeypot_field.is_empty() {
            let filled = request
                .param(&self.config.honeypot_field)
                .map(|value| !value.trim().is_empty())
                .unwrap_or(false);
            if filled {
                signals.push(Signal::HoneypotFilled);
            }
        }

        if let Some(hit) = attack_patterns::match_any(request.request_values()) {
            debug!("Attack pattern {} ({}) in request value", hit.rule_id, hit.category);
            signals.push(Signal::AttackPayload);
        }

        signals.push(self.fingerprint_signal(request));

        signals
    }

    /// Score the request and emit one event per triggered signal plus the total
    pub fn score(&self, request: &RequestContext) -> BotScore {
        let result = BotScore::from_signals(&self.evaluate(request));

        for signal in &result.signals {
            self.sink.fire(
                events::BOT_SIGNAL,
                &json!({
                    "category": signal.category(),
                    "check": signal.check(),
                    "weight": signal.weight(),
                    "path": request.path,
                }),
            );
        }

        let likely_bot = result.is_likely_bot(self.config.threshold);
        self.sink.fire(
            events::BOT_SCORE,
            &json!({
                "score": result.score,
                "reasons": result.reasons,
                "likely_bot": likely_bot,
                "path": request.path,
            }),
        );

        debug!(
            "Bot score {:.2} for {} {} ({} signals)",
            result.score,
            request.method,
            request.path,
            result.signals.len()
        );

        result
    }

    pub fn is_likely_bot(&self, request: &RequestContext) -> bool {
        self.score(request).is_likely_bot(self.config.threshold)
    }

    fn match_known_agent(&self, ua_lower: &str) -> Option<&KnownAgent> {
        self.known_agents
            .iter()
            .find(|agent| ua_lower.contains(agent.needle.as_str()))
    }

    fn is_sensitive_path(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.sensitive_paths.iter().any(|needle| path.contains(needle.as_str()))
    }

    fn fingerprint_signal(&self, request: &RequestContext) -> Signal {
        if !self.signer.is_configured() {
            return Signal::FingerprintUnverified;
        }
        let value = request.cookie(&self.fingerprint_cookie).unwrap_or("");
        Signal::Fingerprint(self.signer.classify(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretKey;
    use crate::events::RecordingEventSink;

    const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";
    const RAW: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn signer() -> Arc<FingerprintSigner> {
        Arc::new(FingerprintSigner::configure(&SecretKey::new("s".repeat(32))).unwrap())
    }

    fn default_scorer() -> BotScorer {
        BotScorer::new(BotConfig::default(), signer()).unwrap()
    }

    fn browser_request(signer: &FingerprintSigner) -> RequestContext {
        let signed = format!("{}|{}", RAW, signer.sign(RAW).unwrap());
        RequestContext::new("GET", "/products")
            .with_header("User-Agent", CHROME_UA)
            .with_header("Accept", "text/html")
            .with_header("Accept-Language", "en-US,en;q=0.9")
            .with_header("Accept-Encoding", "gzip, br")
            .with_header("Sec-CH-UA", "\"Chromium\";v=\"124\"")
            .with_header("Host", "shop.example")
            .with_cookie("fpid", &signed)
            .with_remote_ip("203.0.113.10")
    }

    #[test]
    fn test_signal_weights() {
        assert_eq!(Signal::KnownBotUserAgent.weight(), 0.4);
        assert_eq!(Signal::NoCookies.weight(), 0.3);
        assert_eq!(Signal::Fingerprint(CookieState::Valid).points(), 0);
        assert_eq!(Signal::Fingerprint(CookieState::Unsigned).weight(), 0.1);
        assert_eq!(Signal::Fingerprint(CookieState::Malformed).weight(), 0.3);
        assert_eq!(Signal::Fingerprint(CookieState::Forged).weight(), 0.5);
    }

    #[test]
    fn test_clean_browser_scores_zero() {
        let signer = signer();
        let scorer = BotScorer::new(BotConfig::default(), signer.clone()).unwrap();
        let result = scorer.score(&browser_request(&signer));
        assert_eq!(result.score, 0.0, "unexpected reasons: {:?}", result.reasons);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_firefox_without_client_hints_is_penalized() {
        let signer = signer();
        let scorer = BotScorer::new(BotConfig::default(), signer.clone()).unwrap();
        let mut request = browser_request(&signer);
        request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("sec-ch-ua"));
        for (name, value) in request.headers.iter_mut() {
            if name.eq_ignore_ascii_case("user-agent") {
                *value = FIREFOX_UA.to_string();
            }
        }
        let result = scorer.score(&request);
        assert_eq!(result.signals, vec![Signal::BrowserMissingHeaders]);
        assert_eq!(result.score, 0.2);
    }

    #[test]
    fn test_chrome_without_client_hints_is_penalized() {
        let signer = signer();
        let scorer = BotScorer::new(BotConfig::default(), signer.clone()).unwrap();
        let mut request = browser_request(&signer);
        request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("sec-ch-ua"));
        let result = scorer.score(&request);
        assert!(result.has(Signal::BrowserMissingHeaders));
        assert_eq!(result.score, 0.2);
    }

    #[test]
    fn test_loopback_browser_skips_header_check() {
        let signer = signer();
        let scorer = BotScorer::new(BotConfig::default(), signer.clone()).unwrap();
        let mut request = browser_request(&signer).with_remote_ip("127.0.0.1");
        request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("accept-encoding"));
        assert!(!scorer.score(&request).has(Signal::BrowserMissingHeaders));
    }

    #[test]
    fn test_bare_curl_request() {
        let result = default_scorer().score(&RequestContext::new("GET", "/").with_header("User-Agent", "curl/8.5.0"));
        assert!(result.has(Signal::KnownBotUserAgent));
        assert!(result.has(Signal::MissingAcceptHeaders));
        assert!(result.has(Signal::NoCookies));
        assert!(result.has(Signal::Fingerprint(CookieState::Missing)));
        // 0.4 + 0.2 + 0.3 + 0.3 = 1.2, capped
        assert_eq!(result.score, 1.0);
        assert_eq!(result.reasons["user_agent"]["known_bot_user_agent"], 0.4);
    }

    #[test]
    fn test_empty_user_agent() {
        let result = default_scorer().score(&RequestContext::new("GET", "/"));
        assert!(result.has(Signal::EmptyUserAgent));
        assert!(!result.has(Signal::KnownBotUserAgent));
    }

    #[test]
    fn test_known_agent_is_case_insensitive() {
        let scorer = default_scorer();
        for ua in ["GOOGLEBOT/2.1", "Python-Requests/2.31", "Mozilla/5.0 HeadlessChrome/120"] {
            let signals = scorer.evaluate(&RequestContext::new("GET", "/").with_header("User-Agent", ua));
            assert!(signals.contains(&Signal::KnownBotUserAgent), "{}", ua);
        }
    }

    #[test]
    fn test_extra_bot_agents() {
        let mut config = BotConfig::default();
        config.extra_bot_agents = vec!["AcmeFetcher".to_string()];
        let scorer = BotScorer::new(config, signer()).unwrap();
        let signals = scorer.evaluate(
            &RequestContext::new("GET", "/").with_header("User-Agent", "acmefetcher/1.0"),
        );
        assert!(signals.contains(&Signal::KnownBotUserAgent));
    }

    #[test]
    fn test_post_without_referer_and_rare_methods() {
        let scorer = default_scorer();
        let signals = scorer.evaluate(&RequestContext::new("POST", "/comment"));
        assert!(signals.contains(&Signal::PostWithoutReferer));

        let signals = scorer.evaluate(
            &RequestContext::new("POST", "/comment").with_header("Referer", "https://shop.example/"),
        );
        assert!(!signals.contains(&Signal::PostWithoutReferer));

        for method in ["TRACE", "TRACK", "CONNECT", "OPTIONS"] {
            assert!(scorer.evaluate(&RequestContext::new(method, "/")).contains(&Signal::RareMethod));
        }
        assert!(!scorer.evaluate(&RequestContext::new("PUT", "/")).contains(&Signal::RareMethod));
    }

    #[test]
    fn test_sensitive_paths() {
        let mut config = BotConfig::default();
        config.sensitive_paths = vec!["/wp-admin".to_string(), "/.env".to_string()];
        let scorer = BotScorer::new(config, signer()).unwrap();
        assert!(scorer.evaluate(&RequestContext::new("GET", "/WP-ADMIN/setup.php")).contains(&Signal::SensitivePath));
        assert!(scorer.evaluate(&RequestContext::new("GET", "/app/.env")).contains(&Signal::SensitivePath));
        assert!(!scorer.evaluate(&RequestContext::new("GET", "/blog")).contains(&Signal::SensitivePath));
        // No registered paths means no hits
        assert!(!default_scorer().evaluate(&RequestContext::new("GET", "/wp-admin")).contains(&Signal::SensitivePath));
    }

    #[test]
    fn test_origin_host_mismatch() {
        let scorer = default_scorer();
        let same = RequestContext::new("POST", "/")
            .with_header("Host", "shop.example")
            .with_header("Origin", "https://shop.example");
        assert!(!scorer.evaluate(&same).contains(&Signal::InvalidOrigin));

        let cross = RequestContext::new("POST", "/")
            .with_header("Host", "shop.example")
            .with_header("Origin", "https://evil.example");
        assert!(scorer.evaluate(&cross).contains(&Signal::InvalidOrigin));
    }

    #[test]
    fn test_rate_limit_predicate() {
        let scorer = default_scorer().with_rate_limiter(Arc::new(|_: &RequestContext| true));
        assert!(scorer.evaluate(&RequestContext::new("GET", "/")).contains(&Signal::RateLimited));
        assert!(!default_scorer().evaluate(&RequestContext::new("GET", "/")).contains(&Signal::RateLimited));
    }

    #[test]
    fn test_payload_signals() {
        let scorer = default_scorer();
        let honeypot = RequestContext::new("POST", "/signup").with_form_field("website", "http://spam.example");
        assert!(scorer.evaluate(&honeypot).contains(&Signal::HoneypotFilled));

        let blank = RequestContext::new("POST", "/signup").with_form_field("website", "   ");
        assert!(!scorer.evaluate(&blank).contains(&Signal::HoneypotFilled));

        let attack = RequestContext::new("GET", "/search?q=%3Cscript%3Ealert(1)%3C/script%3E");
        assert!(scorer.evaluate(&attack).contains(&Signal::AttackPayload));
    }

    #[test]
    fn test_fingerprint_states() {
        let signer = signer();
        let scorer = BotScorer::new(BotConfig::default(), signer.clone()).unwrap();
        let with_fpid = |value: &str| {
            scorer
                .evaluate(&RequestContext::new("GET", "/").with_cookie("fpid", value))
                .into_iter()
                .find(|signal| signal.category() == "fingerprint")
                .unwrap()
        };

        assert_eq!(with_fpid(RAW), Signal::Fingerprint(CookieState::Unsigned));
        assert_eq!(with_fpid("zzz"), Signal::Fingerprint(CookieState::Malformed));
        assert_eq!(
            with_fpid(&format!("{}|{}", RAW, "0".repeat(64))),
            Signal::Fingerprint(CookieState::Forged)
        );
        assert_eq!(
            with_fpid(&format!("{}|{}", RAW, signer.sign(RAW).unwrap())),
            Signal::Fingerprint(CookieState::Valid)
        );
    }

    #[test]
    fn test_unconfigured_signer_degrades() {
        let scorer = BotScorer::new(BotConfig::default(), Arc::new(FingerprintSigner::unconfigured())).unwrap();
        let signals = scorer.evaluate(&RequestContext::new("GET", "/").with_cookie("fpid", RAW));
        assert!(signals.contains(&Signal::FingerprintUnverified));
        assert_eq!(Signal::FingerprintUnverified.weight(), 0.3);
    }

    #[test]
    fn test_events_fired_per_signal_and_total() {
        let sink = Arc::new(RecordingEventSink::new());
        let scorer = default_scorer().with_event_sink(sink.clone());
        let result = scorer.score(&RequestContext::new("GET", "/").with_header("User-Agent", "curl/8.5.0"));

        assert_eq!(sink.count(events::BOT_SIGNAL), result.signals.len());
        let totals = sink.named(events::BOT_SCORE);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].data["score"], json!(1.0));
        assert_eq!(totals[0].data["likely_bot"], json!(true));
    }

    #[test]
    fn test_from_signals_caps_and_skips_zero_weight() {
        let result = BotScore::from_signals(&[
            Signal::AttackPayload,
            Signal::KnownBotUserAgent,
            Signal::Fingerprint(CookieState::Forged),
            Signal::Fingerprint(CookieState::Valid),
        ]);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.signals.len(), 3);
        assert!(!result.reasons["fingerprint"].contains_key("fpid_valid"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let result = BotScore::from_signals(&[Signal::KnownBotUserAgent, Signal::NoCookies]);
        assert_eq!(result.score, 0.7);
        assert!(result.is_likely_bot(0.7));
    }

    mod proptest_scoring {
        use super::*;
        use proptest::prelude::*;

        fn signal_strategy() -> impl Strategy<Value = Signal> {
            prop::sample::select(vec![
                Signal::EmptyUserAgent,
                Signal::KnownBotUserAgent,
                Signal::MissingAcceptHeaders,
                Signal::PostWithoutReferer,
                Signal::SensitivePath,
                Signal::RateLimited,
                Signal::BrowserMissingHeaders,
                Signal::NoCookies,
                Signal::RareMethod,
                Signal::InvalidOrigin,
                Signal::HoneypotFilled,
                Signal::AttackPayload,
                Signal::Fingerprint(CookieState::Valid),
                Signal::Fingerprint(CookieState::Unsigned),
                Signal::Fingerprint(CookieState::Missing),
                Signal::Fingerprint(CookieState::Forged),
                Signal::FingerprintUnverified,
            ])
        }

        proptest! {
            /// Adding signals never lowers the score and the score never exceeds 1.0
            #[test]
            fn prop_score_monotonic_and_capped(
                base in prop::collection::vec(signal_strategy(), 0..8),
                extra in prop::collection::vec(signal_strategy(), 0..8)
            ) {
                let before = BotScore::from_signals(&base);
                let mut all = base.clone();
                all.extend(extra);
                let after = BotScore::from_signals(&all);

                prop_assert!(after.score >= before.score);
                prop_assert!(after.score <= 1.0);
                prop_assert!(before.score >= 0.0);
            }

            /// Identical input yields identical output
            #[test]
            fn prop_score_deterministic(signals in prop::collection::vec(signal_strategy(), 0..12)) {
                prop_assert_eq!(BotScore::from_signals(&signals), BotScore::from_signals(&signals));
            }
        }
    }
}
