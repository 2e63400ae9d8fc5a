//! Thread-safe cookie storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cookie::{domain_matches, url_host};
use crate::{Cookie, CookieKey, Result};

#[derive(Debug)]
struct Entry {
    cookie: Cookie,
    /// Insertion sequence; kept across replacements (RFC 6265 §5.3 step 11.3).
    created: u64,
}

#[derive(Debug, Default)]
struct JarState {
    entries: HashMap<CookieKey, Entry>,
    next_seq: u64,
}

impl JarState {
    fn upsert(&mut self, cookie: Cookie, now: DateTime<Utc>) {
        let key = cookie.key();
        if cookie.is_expired(now) {
            self.entries.remove(&key);
            return;
        }
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.cookie = cookie;
            return;
        }
        let created = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(key, Entry { cookie, created });
    }

    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.created);
        entries
    }
}

/// Cookie store shared by every request of a client.
///
/// Each cookie identity `(name, domain, path)` is stored at most once; a new
/// cookie with an existing identity replaces the old one. All reads and
/// writes go through one mutex.
///
/// # Example
///
/// ```
/// use conduit_core::CookieJar;
///
/// let jar = CookieJar::new();
/// let login = "https://example.com/login".parse().unwrap();
/// jar.add_from_set_cookie_headers(["session=abc123; Path=/; HttpOnly"], &login);
///
/// let dashboard = "https://example.com/dashboard".parse().unwrap();
/// assert_eq!(jar.cookie_header_for_url(&dashboard, None).as_deref(), Some("session=abc123"));
/// ```
#[derive(Debug, Default)]
pub struct CookieJar {
    state: Mutex<JarState>,
}

impl CookieJar {
    /// Empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jar pre-filled with `cookies`, in order.
    #[must_use]
    pub fn with_cookies(cookies: impl IntoIterator<Item = Cookie>) -> Self {
        let jar = Self::new();
        {
            let mut state = jar.lock();
            let now = Utc::now();
            for cookie in cookies {
                state.upsert(cookie, now);
            }
        }
        jar
    }

    /// Restore a jar saved with [`CookieJar::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let cookies: Vec<Cookie> = crate::from_json(json.as_bytes())?;
        Ok(Self::with_cookies(cookies))
    }

    /// Serialize every unexpired cookie, oldest first.
    pub fn to_json(&self) -> Result<String> {
        let cookies = self.cookies();
        serde_json::to_string(&cookies).map_err(Into::into)
    }

    fn lock(&self) -> MutexGuard<'_, JarState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a cookie by identity.
    ///
    /// An already expired cookie removes its identity instead.
    pub fn add(&self, cookie: Cookie) {
        self.lock().upsert(cookie, Utc::now());
    }

    /// Store cookies from `Set-Cookie` header values received for `request_url`.
    ///
    /// Cookies without a `Domain` become host-only cookies for the request
    /// host. Malformed headers and cookies whose `Domain` does not cover the
    /// request host are skipped. Returns the number of headers accepted.
    pub fn add_from_set_cookie_headers<'a>(
        &self,
        headers: impl IntoIterator<Item = &'a str>,
        request_url: &url::Url,
    ) -> usize {
        let Some(host) = url_host(request_url) else {
            debug!(url = %request_url, "ignoring Set-Cookie for URL without host");
            return 0;
        };
        let now = Utc::now();

        let accepted: Vec<Cookie> = headers
            .into_iter()
            .filter_map(|header| match Cookie::parse(header, now) {
                Ok(cookie) => Some(cookie),
                Err(err) => {
                    debug!(error = %err, "ignoring malformed Set-Cookie");
                    None
                }
            })
            .filter_map(|cookie| match cookie.domain() {
                None => Some(cookie.with_domain(&host).with_host_only(true)),
                Some(domain) if accepts_domain(&host, domain) => Some(cookie),
                Some(domain) => {
                    debug!(cookie = cookie.name(), domain, host = %host, "rejecting cookie for foreign domain");
                    None
                }
            })
            .collect();

        let count = accepted.len();
        let mut state = self.lock();
        for cookie in accepted {
            state.upsert(cookie, now);
        }
        count
    }

    /// Unexpired cookies matching `url`, in RFC 6265 §5.4 order: longer paths
    /// first, then older cookies first.
    #[must_use]
    pub fn cookies_for_url(&self, url: &url::Url, secure: Option<bool>) -> Vec<Cookie> {
        let now = Utc::now();
        let state = self.lock();
        let mut matching: Vec<&Entry> = state
            .ordered()
            .into_iter()
            .filter(|entry| !entry.cookie.is_expired(now) && entry.cookie.matches_url(url, secure))
            .collect();
        // stable sort keeps creation order within one path length
        matching.sort_by(|a, b| b.cookie.path().len().cmp(&a.cookie.path().len()));
        matching.into_iter().map(|entry| entry.cookie.clone()).collect()
    }

    /// `Cookie` header value for `url`, or `None` when nothing matches.
    ///
    /// `secure` overrides the channel security derived from the URL scheme.
    #[must_use]
    pub fn cookie_header_for_url(&self, url: &url::Url, secure: Option<bool>) -> Option<String> {
        let cookies = self.cookies_for_url(url, secure);
        if cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = cookies.iter().map(Cookie::header_pair).collect();
        Some(pairs.join("; "))
    }

    /// Cookie stored under `key`, expired or not.
    #[must_use]
    pub fn get(&self, key: &CookieKey) -> Option<Cookie> {
        self.lock().entries.get(key).map(|entry| entry.cookie.clone())
    }

    /// Remove the cookie stored under `key`.
    pub fn remove(&self, key: &CookieKey) -> Option<Cookie> {
        self.lock().entries.remove(key).map(|entry| entry.cookie)
    }

    /// Drop cookies whose expiry has passed. Returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.cookie.is_expired(now));
        before - state.entries.len()
    }

    /// Drop session cookies, as at the end of a browsing session.
    pub fn clear_session_cookies(&self) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.cookie.is_session());
        before - state.entries.len()
    }

    /// Remove every cookie.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Number of stored cookies, including not yet purged expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// `true` when the jar holds no cookie.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Snapshot of unexpired cookies, oldest first.
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        let now = Utc::now();
        self.lock()
            .ordered()
            .into_iter()
            .filter(|entry| !entry.cookie.is_expired(now))
            .map(|entry| entry.cookie.clone())
            .collect()
    }
}

/// `Domain` vetting: the request host must domain-match, and a single-label
/// domain (a bare TLD such as `com`) is only allowed as the host itself.
fn accepts_domain(host: &str, domain: &str) -> bool {
    domain_matches(host, domain) && (domain == host || domain.contains('.'))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;

    use super::*;

    fn url(s: &str) -> url::Url {
        url::Url::parse(s).expect("valid URL")
    }

    #[test]
    fn login_then_dashboard() {
        let jar = CookieJar::new();
        jar.add_from_set_cookie_headers(
            ["session=abc123; Path=/; HttpOnly"],
            &url("https://example.com/login"),
        );

        assert_eq!(
            jar.cookie_header_for_url(&url("https://example.com/dashboard"), None)
                .as_deref(),
            Some("session=abc123")
        );
        assert_eq!(jar.cookie_header_for_url(&url("https://other.com/"), None), None);
    }

    #[test]
    fn defaulted_domain_is_host_only() {
        let jar = CookieJar::new();
        jar.add_from_set_cookie_headers(["a=1"], &url("https://example.com/"));

        let key = CookieKey::new("a", Some("example.com"), "/");
        let stored = jar.get(&key).expect("stored");
        assert!(stored.is_host_only());

        assert!(jar
            .cookie_header_for_url(&url("https://api.example.com/"), None)
            .is_none());
    }

    #[test]
    fn explicit_domain_reaches_subdomains() {
        let jar = CookieJar::new();
        jar.add_from_set_cookie_headers(
            ["a=1; Domain=example.com"],
            &url("https://www.example.com/"),
        );

        assert_eq!(
            jar.cookie_header_for_url(&url("https://api.example.com/x"), None)
                .as_deref(),
            Some("a=1")
        );
    }

    #[test]
    fn foreign_domain_is_rejected() {
        let jar = CookieJar::new();
        let accepted = jar.add_from_set_cookie_headers(
            ["steal=1; Domain=bank.com", "ok=1", "broken"],
            &url("https://evil.com/"),
        );

        assert_eq!(accepted, 1);
        assert_eq!(jar.len(), 1);
        assert!(jar.cookie_header_for_url(&url("https://bank.com/"), None).is_none());
    }

    #[test]
    fn single_label_domain_is_rejected() {
        let jar = CookieJar::new();
        let accepted = jar.add_from_set_cookie_headers(
            ["sc=1; Domain=com", "site=1; Domain=example.com."],
            &url("https://example.com/"),
        );

        assert_eq!(accepted, 1);
        assert!(jar.cookie_header_for_url(&url("https://other.com/"), None).is_none());
        assert_eq!(
            jar.cookie_header_for_url(&url("https://example.com/"), None)
                .as_deref(),
            Some("site=1")
        );

        let jar = CookieJar::new();
        let accepted =
            jar.add_from_set_cookie_headers(["dev=1; Domain=localhost"], &url("http://localhost/"));
        assert_eq!(accepted, 1);
    }

    #[test]
    fn same_identity_replaces() {
        let jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.add_from_set_cookie_headers(["token=old"], &origin);
        jar.add_from_set_cookie_headers(["token=new"], &origin);

        assert_eq!(jar.len(), 1);
        assert_eq!(
            jar.cookie_header_for_url(&origin, None).as_deref(),
            Some("token=new")
        );
    }

    #[test]
    fn different_paths_are_different_identities() {
        let jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.add_from_set_cookie_headers(["pref=root; Path=/", "pref=api; Path=/api"], &origin);

        assert_eq!(jar.len(), 2);
        assert_eq!(
            jar.cookie_header_for_url(&url("https://example.com/api/items"), None)
                .as_deref(),
            Some("pref=api; pref=root")
        );
    }

    #[test]
    fn equal_paths_keep_creation_order() {
        let jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.add_from_set_cookie_headers(["b=2", "a=1", "c=3"], &origin);
        // replacing keeps the original slot
        jar.add_from_set_cookie_headers(["b=20"], &origin);

        assert_eq!(
            jar.cookie_header_for_url(&origin, None).as_deref(),
            Some("b=20; a=1; c=3")
        );
    }

    #[test]
    fn secure_cookie_skipped_over_http() {
        let jar = CookieJar::new();
        jar.add_from_set_cookie_headers(
            ["plain=1", "secret=2; Secure"],
            &url("https://example.com/"),
        );

        assert_eq!(
            jar.cookie_header_for_url(&url("http://example.com/"), None)
                .as_deref(),
            Some("plain=1")
        );
        assert_eq!(
            jar.cookie_header_for_url(&url("https://example.com/"), None)
                .as_deref(),
            Some("plain=1; secret=2")
        );
        assert_eq!(
            jar.cookie_header_for_url(&url("https://example.com/"), Some(false))
                .as_deref(),
            Some("plain=1")
        );
    }

    #[test]
    fn expired_cookie_deletes_identity() {
        let jar = CookieJar::new();
        let origin = url("https://example.com/");
        jar.add_from_set_cookie_headers(["session=abc"], &origin);
        jar.add_from_set_cookie_headers(["session=; Max-Age=0"], &origin);

        assert!(jar.is_empty());
        assert!(jar.cookie_header_for_url(&origin, None).is_none());
    }

    #[test]
    fn clear_expired_purges() {
        let soon = Cookie::new("soon", "1")
            .expect("cookie")
            .with_domain("example.com")
            .with_expires(Some(Utc::now() + TimeDelta::milliseconds(30)));
        let jar = CookieJar::with_cookies([soon]);
        assert_eq!(jar.len(), 1);

        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(jar.cookie_header_for_url(&url("https://example.com/"), None).is_none());
        assert_eq!(jar.clear_expired(), 1);
        assert!(jar.is_empty());
    }

    #[test]
    fn clear_and_session_cleanup() {
        let jar = CookieJar::new();
        jar.add_from_set_cookie_headers(
            ["session=1", "persistent=1; Max-Age=3600"],
            &url("https://example.com/"),
        );

        assert_eq!(jar.clear_session_cookies(), 1);
        assert_eq!(jar.len(), 1);

        jar.clear();
        assert!(jar.is_empty());
    }

    #[test]
    fn json_persistence() {
        let jar = CookieJar::new();
        jar.add_from_set_cookie_headers(
            ["session=abc; HttpOnly", "lang=en; Max-Age=3600; Path=/docs"],
            &url("https://example.com/"),
        );

        let json = jar.to_json().expect("save");
        let restored = CookieJar::from_json(&json).expect("load");

        assert_eq!(restored.cookies(), jar.cookies());
        assert_eq!(
            restored
                .cookie_header_for_url(&url("https://example.com/docs/intro"), None)
                .as_deref(),
            Some("lang=en; session=abc")
        );
    }

    #[test]
    fn concurrent_harvesting() {
        let jar = Arc::new(CookieJar::new());
        let origin = url("https://example.com/");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let jar = Arc::clone(&jar);
                let origin = origin.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let header = format!("c{i}_{j}=v");
                        jar.add_from_set_cookie_headers([header.as_str()], &origin);
                        let _ = jar.cookie_header_for_url(&origin, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }

        assert_eq!(jar.len(), 200);
    }
}
