//! RFC 6265 cookies.
//!
//! A [`Cookie`] is an immutable value: every `with_*` method returns a new
//! cookie. Matching follows RFC 6265 §5.1.3 (domain), §5.1.4 (path) and §5.4
//! (secure-only), parsing follows §5.2 with unknown attributes ignored.
//!
//! ```
//! use chrono::Utc;
//! use conduit_core::Cookie;
//!
//! let cookie = Cookie::parse("session=abc123; Path=/; HttpOnly", Utc::now()).unwrap();
//! assert_eq!(cookie.header_pair(), "session=abc123");
//! assert!(cookie.is_http_only());
//! ```

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Separators excluded from a cookie name (RFC 2616 token grammar).
const SEPARATORS: &[char] = &[
    '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}', ' ',
    '\t',
];

/// Date layouts seen in `Expires` attributes besides RFC 2822.
const DATE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S GMT",
    "%a, %d-%b-%Y %H:%M:%S GMT",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum SameSite {
    /// Only sent on same-site requests.
    Strict,
    /// Sent on same-site requests and top-level navigations.
    Lax,
    /// Sent on every request (requires `Secure` in browsers).
    None,
}

impl FromStr for SameSite {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            other => Err(Error::invalid_cookie(format!("unknown SameSite value {other:?}"))),
        }
    }
}

/// Identity of a cookie inside a jar: `(name, domain, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CookieKey {
    name: String,
    domain: Option<String>,
    path: String,
}

impl CookieKey {
    /// Build a key; the domain is lower-cased the same way cookies store it.
    #[must_use]
    pub fn new(name: impl Into<String>, domain: Option<&str>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.map(normalize_domain),
            path: path.into(),
        }
    }
}

/// A single HTTP cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CookieRecord")]
pub struct Cookie {
    name: String,
    value: String,
    expires_at: Option<DateTime<Utc>>,
    domain: Option<String>,
    path: String,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
    host_only: bool,
}

impl Cookie {
    /// Session cookie with default attributes (path `/`, no domain).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCookie`] if the name is empty or contains
    /// control or separator characters, or if the value contains `;` or
    /// control characters.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        validate_name(&name)?;
        validate_value(&value)?;
        Ok(Self {
            name,
            value,
            expires_at: None,
            domain: None,
            path: "/".to_string(),
            secure: false,
            http_only: false,
            same_site: None,
            host_only: false,
        })
    }

    /// Parse a `Set-Cookie` header value.
    ///
    /// `now` anchors `Max-Age`, which takes precedence over `Expires`.
    pub fn parse(header: &str, now: DateTime<Utc>) -> Result<Self> {
        let mut segments = header.split(';');
        let pair = segments.next().unwrap_or_default();
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::invalid_cookie(format!("missing '=' in {pair:?}")))?;
        let mut cookie = Self::new(name.trim(), value.trim())?;

        let mut expires = None;
        let mut max_age = None;

        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = match segment.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (segment, ""),
            };

            match key.to_ascii_lowercase().as_str() {
                "expires" => {
                    if let Some(at) = parse_cookie_date(value) {
                        expires = Some(at);
                    }
                }
                "max-age" if value.starts_with(|c: char| c.is_ascii_digit() || c == '-') => {
                    if let Ok(seconds) = value.parse::<i64>() {
                        max_age = Some(expiry_from_max_age(now, seconds));
                    }
                }
                "domain" if !value.is_empty() => {
                    cookie.domain = Some(normalize_domain(value));
                }
                "path" => {
                    cookie.path = if value.starts_with('/') {
                        value.to_string()
                    } else {
                        "/".to_string()
                    };
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = value.parse().ok(),
                _ => {}
            }
        }

        cookie.expires_at = max_age.or(expires);
        Ok(cookie)
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Absolute expiry; `None` for session cookies.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Lower-cased domain, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Path scope.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `Secure` flag.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// `HttpOnly` flag.
    #[must_use]
    pub const fn is_http_only(&self) -> bool {
        self.http_only
    }

    /// `SameSite` attribute.
    #[must_use]
    pub const fn same_site(&self) -> Option<SameSite> {
        self.same_site
    }

    /// `true` when the domain was defaulted from the request host, in which
    /// case only that exact host matches.
    #[must_use]
    pub const fn is_host_only(&self) -> bool {
        self.host_only
    }

    /// `true` for cookies without an expiry.
    #[must_use]
    pub const fn is_session(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Jar identity of this cookie.
    #[must_use]
    pub fn key(&self) -> CookieKey {
        CookieKey {
            name: self.name.clone(),
            domain: self.domain.clone(),
            path: self.path.clone(),
        }
    }

    /// Copy with a different value.
    pub fn with_value(mut self, value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        validate_value(&value)?;
        self.value = value;
        Ok(self)
    }

    /// Copy scoped to `domain` (leading dot dropped, lower-cased).
    #[must_use]
    pub fn with_domain(mut self, domain: impl AsRef<str>) -> Self {
        self.domain = Some(normalize_domain(domain.as_ref()));
        self
    }

    /// Copy marked host-only (or not).
    #[must_use]
    pub const fn with_host_only(mut self, host_only: bool) -> Self {
        self.host_only = host_only;
        self
    }

    /// Copy scoped to `path`; anything not starting with `/` becomes `/`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            "/".to_string()
        };
        self
    }

    /// Copy expiring at `expires_at`, or a session cookie for `None`.
    #[must_use]
    pub const fn with_expires(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Copy with the `Secure` flag set or cleared.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Copy with the `HttpOnly` flag set or cleared.
    #[must_use]
    pub const fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Copy with a `SameSite` attribute.
    #[must_use]
    pub const fn with_same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.same_site = same_site;
        self
    }

    /// Domain match per RFC 6265 §5.1.3, case-insensitive.
    ///
    /// A cookie without a domain matches every host; scoping such cookies to
    /// an origin is left to the jar.
    #[must_use]
    pub fn matches_domain(&self, host: &str) -> bool {
        let Some(domain) = self.domain.as_deref() else {
            return true;
        };
        let host = normalize_host(host);
        if host == domain {
            return true;
        }
        if self.host_only || is_ip_address(&host) {
            return false;
        }
        host.strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
    }

    /// Path match per RFC 6265 §5.1.4.
    #[must_use]
    pub fn matches_path(&self, request_path: &str) -> bool {
        let request_path = if request_path.is_empty() {
            "/"
        } else {
            request_path
        };
        if request_path == self.path {
            return true;
        }
        request_path
            .strip_prefix(self.path.as_str())
            .is_some_and(|rest| self.path.ends_with('/') || rest.starts_with('/'))
    }

    /// Whether this cookie belongs in a request to `url`.
    ///
    /// `secure` tells whether the channel is secure; `None` derives it from
    /// the `https` scheme. Secure cookies never match an insecure channel.
    #[must_use]
    pub fn matches_url(&self, url: &url::Url, secure: Option<bool>) -> bool {
        let secure = secure.unwrap_or_else(|| url.scheme() == "https");
        if self.secure && !secure {
            return false;
        }
        let Some(host) = url_host(url) else {
            return false;
        };
        self.matches_domain(&host) && self.matches_path(url.path())
    }

    /// `true` once `now` reached the expiry; session cookies never expire here.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// `name=value`, as sent in a `Cookie` request header.
    #[must_use]
    pub fn header_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// `Set-Cookie` serialization.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(expires_at) = self.expires_at {
            write!(f, "; Expires={}", expires_at.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        if let Some(domain) = self.domain.as_deref().filter(|_| !self.host_only) {
            write!(f, "; Domain={domain}")?;
        }
        write!(f, "; Path={}", self.path)?;
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={same_site}")?;
        }
        Ok(())
    }
}

/// Persisted form of a cookie, validated on the way back in.
#[derive(Deserialize)]
struct CookieRecord {
    name: String,
    value: String,
    expires_at: Option<DateTime<Utc>>,
    domain: Option<String>,
    path: String,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
    #[serde(default)]
    host_only: bool,
}

impl TryFrom<CookieRecord> for Cookie {
    type Error = Error;

    fn try_from(record: CookieRecord) -> Result<Self> {
        let mut cookie = Self::new(record.name, record.value)?
            .with_path(record.path)
            .with_expires(record.expires_at)
            .with_secure(record.secure)
            .with_http_only(record.http_only)
            .with_same_site(record.same_site)
            .with_host_only(record.host_only);
        if let Some(domain) = record.domain {
            cookie = cookie.with_domain(domain);
        }
        Ok(cookie)
    }
}

/// Host of `url` in the form cookies compare against.
pub(crate) fn url_host(url: &url::Url) -> Option<String> {
    match url.host()? {
        url::Host::Domain(domain) => Some(normalize_host(domain)),
        url::Host::Ipv4(ip) => Some(ip.to_string()),
        url::Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// Domain match used by the jar to vet `Domain` attributes.
pub(crate) fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (!is_ip_address(host)
            && host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.')))
}

fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_ip_address(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_cookie("empty cookie name"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_ascii_control() || !c.is_ascii() || SEPARATORS.contains(c))
    {
        return Err(Error::invalid_cookie(format!(
            "forbidden character {c:?} in cookie name {name:?}"
        )));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<()> {
    if value.chars().any(|c| c == ';' || c.is_ascii_control()) {
        return Err(Error::invalid_cookie(format!(
            "forbidden character in cookie value {value:?}"
        )));
    }
    Ok(())
}

fn expiry_from_max_age(now: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    if seconds <= 0 {
        return DateTime::<Utc>::MIN_UTC;
    }
    TimeDelta::try_seconds(seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    DATE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(|naive| naive.and_utc())
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).single().expect("valid date")
    }

    fn url(s: &str) -> url::Url {
        url::Url::parse(s).expect("valid URL")
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(Cookie::new("", "v").is_err());
        assert!(Cookie::new("bad name", "v").is_err());
        assert!(Cookie::new("bad;name", "v").is_err());
        assert!(Cookie::new("bad\u{7}", "v").is_err());
        assert!(Cookie::new("a=b", "v").is_err());
        assert!(Cookie::new("valid_name-1", "v").is_ok());
        assert!(Cookie::new("n", "bad;value").is_err());
    }

    #[test]
    fn parse_simple_pair() {
        let cookie = Cookie::parse("session=abc123; Path=/; HttpOnly", now()).expect("parse");

        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.path(), "/");
        assert!(cookie.is_http_only());
        assert!(!cookie.is_secure());
        assert!(cookie.is_session());
        assert_eq!(cookie.header_pair(), "session=abc123");
    }

    #[test]
    fn parse_attributes_case_insensitively() {
        let cookie = Cookie::parse(
            "id=42; DOMAIN=.Example.COM; path=/api; SECURE; samesite=strict; Unknown=1",
            now(),
        )
        .expect("parse");

        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.path(), "/api");
        assert!(cookie.is_secure());
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }

    #[test]
    fn parse_rejects_missing_pair() {
        assert!(Cookie::parse("novalue; Path=/", now()).is_err());
        assert!(Cookie::parse("=value", now()).is_err());
    }

    #[test]
    fn parse_ignores_invalid_attribute_values() {
        let cookie = Cookie::parse(
            "a=b; SameSite=Sometimes; Expires=yesterday; Max-Age=soon; Path=relative",
            now(),
        )
        .expect("parse");

        assert_eq!(cookie.same_site(), None);
        assert!(cookie.is_session());
        assert_eq!(cookie.path(), "/");
    }

    #[test]
    fn parse_expires_formats() {
        let expected = Utc.with_ymd_and_hms(2030, 10, 21, 7, 28, 0).single().expect("date");

        for header in [
            "a=b; Expires=Mon, 21 Oct 2030 07:28:00 GMT",
            "a=b; Expires=Mon, 21-Oct-2030 07:28:00 GMT",
            "a=b; Expires=Mon Oct 21 07:28:00 2030",
        ] {
            let cookie = Cookie::parse(header, now()).expect("parse");
            assert_eq!(cookie.expires_at(), Some(expected), "{header}");
        }
    }

    #[test]
    fn max_age_overrides_expires() {
        let cookie = Cookie::parse(
            "a=b; Max-Age=60; Expires=Mon, 21 Oct 2030 07:28:00 GMT",
            now(),
        )
        .expect("parse");
        assert_eq!(cookie.expires_at(), Some(now() + TimeDelta::seconds(60)));

        let cookie = Cookie::parse("a=b; Max-Age=0", now()).expect("parse");
        assert!(cookie.is_expired(now()));
    }

    #[test]
    fn max_age_must_start_with_digit_or_minus() {
        let cookie = Cookie::parse("a=b; Max-Age=+10", now()).expect("parse");
        assert!(cookie.is_session());

        let cookie = Cookie::parse(
            "a=b; Max-Age=+10; Expires=Mon, 21 Oct 2030 07:28:00 GMT",
            now(),
        )
        .expect("parse");
        let expected = Utc.with_ymd_and_hms(2030, 10, 21, 7, 28, 0).single().expect("date");
        assert_eq!(cookie.expires_at(), Some(expected));

        let cookie = Cookie::parse("a=b; Max-Age=-1", now()).expect("parse");
        assert!(cookie.is_expired(now()));
    }

    #[test]
    fn domain_attribute_drops_surrounding_dots() {
        let cookie = Cookie::parse("a=b; Domain=.Example.com.", now()).expect("parse");

        assert_eq!(cookie.domain(), Some("example.com"));
        assert!(cookie.matches_domain("example.com"));
        assert!(cookie.matches_domain("www.example.com."));
    }

    #[test]
    fn expiry_check() {
        let cookie = Cookie::new("a", "b")
            .expect("cookie")
            .with_expires(Some(now()));

        assert!(cookie.is_expired(now()));
        assert!(!cookie.is_expired(now() - TimeDelta::seconds(1)));
        assert!(!Cookie::new("a", "b").expect("cookie").is_expired(now()));
    }

    #[test]
    fn domain_matching() {
        let cookie = Cookie::new("a", "b").expect("cookie").with_domain("example.com");

        assert!(cookie.matches_domain("example.com"));
        assert!(cookie.matches_domain("api.example.com"));
        assert!(cookie.matches_domain("API.Example.com"));
        assert!(!cookie.matches_domain("notexample.com"));
        assert!(!cookie.matches_domain("example.org"));
    }

    #[test]
    fn host_only_and_domainless_cookies() {
        let host_only = Cookie::new("a", "b")
            .expect("cookie")
            .with_domain("example.com")
            .with_host_only(true);
        assert!(host_only.matches_domain("example.com"));
        assert!(!host_only.matches_domain("api.example.com"));

        let anywhere = Cookie::new("a", "b").expect("cookie");
        assert!(anywhere.matches_domain("whatever.test"));
    }

    #[test]
    fn ip_hosts_need_exact_match() {
        let cookie = Cookie::new("a", "b").expect("cookie").with_domain("0.0.1");
        assert!(!cookie.matches_domain("127.0.0.1"));

        let cookie = Cookie::new("a", "b").expect("cookie").with_domain("127.0.0.1");
        assert!(cookie.matches_domain("127.0.0.1"));
    }

    #[test]
    fn path_matching() {
        let cookie = Cookie::new("a", "b").expect("cookie").with_path("/api");

        assert!(cookie.matches_path("/api"));
        assert!(cookie.matches_path("/api/v1"));
        assert!(!cookie.matches_path("/apiextra"));
        assert!(!cookie.matches_path("/"));

        let cookie = Cookie::new("a", "b").expect("cookie").with_path("/api/");
        assert!(cookie.matches_path("/api/v1"));
        assert!(!cookie.matches_path("/api"));

        let root = Cookie::new("a", "b").expect("cookie");
        assert!(root.matches_path(""));
        assert!(root.matches_path("/anything"));
    }

    #[test]
    fn secure_cookies_need_https() {
        let cookie = Cookie::new("a", "b")
            .expect("cookie")
            .with_domain("example.com")
            .with_secure(true);

        assert!(cookie.matches_url(&url("https://example.com/"), None));
        assert!(!cookie.matches_url(&url("http://example.com/"), None));
        assert!(!cookie.matches_url(&url("https://example.com/"), Some(false)));
    }

    #[test]
    fn url_matching_combines_domain_and_path() {
        let cookie = Cookie::new("a", "b")
            .expect("cookie")
            .with_domain("example.com")
            .with_path("/api");

        assert!(cookie.matches_url(&url("https://api.example.com/api/users"), None));
        assert!(!cookie.matches_url(&url("https://api.example.com/web"), None));
        assert!(!cookie.matches_url(&url("https://other.com/api"), None));
    }

    #[test]
    fn set_cookie_serialization() {
        let cookie = Cookie::parse(
            "id=42; Domain=example.com; Path=/api; Expires=Mon, 21 Oct 2030 07:28:00 GMT; Secure; HttpOnly; SameSite=Lax",
            now(),
        )
        .expect("parse");

        assert_eq!(
            cookie.to_string(),
            "id=42; Expires=Mon, 21 Oct 2030 07:28:00 GMT; Domain=example.com; Path=/api; Secure; HttpOnly; SameSite=Lax"
        );

        let reparsed = Cookie::parse(&cookie.to_string(), now()).expect("reparse");
        assert_eq!(reparsed, cookie);
    }

    #[test]
    fn parse_then_header_pair_round_trip() {
        for header in ["token=a.b.c", "empty=", "quoted=\"x y\"", "k=v=w; Path=/"] {
            let cookie = Cookie::parse(header, now()).expect("parse");
            let pair = header.split(';').next().expect("pair");
            assert_eq!(cookie.header_pair(), pair);
        }
    }

    #[test]
    fn with_methods_leave_original_untouched() {
        let original = Cookie::new("a", "1").expect("cookie");
        let changed = original.clone().with_value("2").expect("value").with_secure(true);

        assert_eq!(original.value(), "1");
        assert!(!original.is_secure());
        assert_eq!(changed.value(), "2");
        assert!(changed.is_secure());
    }

    #[test]
    fn serde_round_trip_validates_names() {
        let cookie = Cookie::parse("a=b; Domain=example.com; Max-Age=60", now()).expect("parse");
        let json = serde_json::to_string(&cookie).expect("serialize");
        let back: Cookie = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cookie);

        let tampered = json.replace("\"name\":\"a\"", "\"name\":\"a b\"");
        assert!(serde_json::from_str::<Cookie>(&tampered).is_err());
    }
}
