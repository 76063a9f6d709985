use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use cookie::Cookie;
use reqwest::{cookie::CookieStore, header::HeaderValue};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::ClientSettings,
    service::{COOKIE_SUBDOMAINS, EDGE_POOL_SUFFIX},
};

type HostCookies = BTreeMap<String, BTreeMap<String, String>>;

/// Host-keyed cookie store shared between the HTTP client and the realtime
/// channel.
///
/// Lookups match the request host exactly. Cookies scoped to the apex domain
/// are written to the apex and copied onto every known subdomain, so a
/// websocket handshake to a numbered edge host carries the same login as the
/// home page.
#[derive(Debug)]
pub struct CookieJar {
    apex: String,
    propagate_to: Vec<String>,
    hosts: RwLock<HostCookies>,
}

impl CookieJar {
    pub fn new(apex: impl Into<String>, propagate_to: Vec<String>) -> Self {
        Self {
            apex: apex.into().trim_start_matches('.').to_ascii_lowercase(),
            propagate_to,
            hosts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn for_settings(settings: &ClientSettings) -> Self {
        Self::new(settings.apex_domain.clone(), known_hosts(settings))
    }

    pub fn apex(&self) -> &str {
        &self.apex
    }

    /// Hosts that receive a copy of apex-scoped cookies.
    pub fn propagation_hosts(&self) -> &[String] {
        &self.propagate_to
    }

    pub fn insert(&self, host: &str, name: &str, value: &str) {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        hosts
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Stores an apex-scoped cookie on the apex and every propagation host.
    pub fn insert_propagated(&self, name: &str, value: &str) {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        for host in std::iter::once(&self.apex).chain(self.propagate_to.iter()) {
            hosts
                .entry(host.clone())
                .or_default()
                .insert(name.to_string(), value.to_string());
        }
    }

    fn remove_propagated(&self, name: &str) {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        for cookies in hosts.values_mut() {
            cookies.remove(name);
        }
    }

    /// Imports a flat name/value map as apex-scoped cookies.
    pub fn import(&self, cookies: &HashMap<String, String>) {
        for (name, value) in cookies {
            self.insert_propagated(name, value);
        }
        debug!(count = cookies.len(), apex = %self.apex, "imported cookies");
    }

    pub fn get(&self, host: &str, name: &str) -> Option<String> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        hosts
            .get(&host.to_ascii_lowercase())
            .and_then(|cookies| cookies.get(name))
            .cloned()
    }

    /// Looks a cookie up on the apex first, then on any host.
    pub fn find(&self, name: &str) -> Option<String> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = hosts.get(&self.apex).and_then(|c| c.get(name)) {
            return Some(value.clone());
        }
        hosts.values().find_map(|c| c.get(name)).cloned()
    }

    /// `Cookie` header value for a request to `url`.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        let cookies = hosts.get(&host)?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Flattened name/value map; apex values win over host-only ones.
    pub fn export(&self) -> HashMap<String, String> {
        let hosts = self.hosts.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = HashMap::new();
        for (host, cookies) in hosts.iter() {
            if *host == self.apex {
                continue;
            }
            for (name, value) in cookies {
                out.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        if let Some(apex) = hosts.get(&self.apex) {
            for (name, value) in apex {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }

    pub fn clear(&self) {
        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_empty(&self) -> bool {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(BTreeMap::is_empty)
    }

    fn store_set_cookie(&self, raw: &str, request_host: &str) {
        let parsed = match Cookie::parse(raw.to_string()) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, host = request_host, "ignoring malformed set-cookie");
                return;
            }
        };
        let expired = parsed.value() == "deleted"
            || parsed
                .max_age()
                .is_some_and(|age| age.is_zero() || age.is_negative());
        let domain = parsed
            .domain()
            .map(|d| d.trim_start_matches('.').to_ascii_lowercase());

        match domain {
            Some(domain) if !host_within(request_host, &domain) => {
                warn!(domain = %domain, host = request_host, "ignoring cross-domain set-cookie");
            }
            Some(domain) if domain == self.apex => {
                if expired {
                    self.remove_propagated(parsed.name());
                } else {
                    self.insert_propagated(parsed.name(), parsed.value());
                }
            }
            Some(domain) => {
                let suffix = format!(".{domain}");
                let targets = std::iter::once(domain.as_str())
                    .chain(std::iter::once(request_host))
                    .chain(
                        self.propagate_to
                            .iter()
                            .map(String::as_str)
                            .filter(|host| host.ends_with(&suffix)),
                    );
                for host in targets {
                    self.store_host(host, parsed.name(), parsed.value(), expired);
                }
            }
            None => self.store_host(request_host, parsed.name(), parsed.value(), expired),
        }
    }

    fn store_host(&self, host: &str, name: &str, value: &str, expired: bool) {
        if expired {
            let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(cookies) = hosts.get_mut(host) {
                cookies.remove(name);
            }
        } else {
            self.insert(host, name, value);
        }
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return;
        };
        for header in cookie_headers {
            match header.to_str() {
                Ok(raw) => self.store_set_cookie(raw, &host),
                Err(_) => warn!(host = %host, "ignoring non-ascii set-cookie"),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url)
            .and_then(|header| HeaderValue::from_str(&header).ok())
    }
}

/// Every host that must see the login cookies: the apex's fixed subdomains,
/// the numbered edge pool, the messenger hosts and the configured endpoints.
pub fn known_hosts(settings: &ClientSettings) -> Vec<String> {
    let apex = settings.apex_domain.trim_start_matches('.').to_ascii_lowercase();
    let mut hosts: Vec<String> = COOKIE_SUBDOMAINS
        .iter()
        .map(|sub| format!("{sub}.{apex}"))
        .collect();
    hosts.extend((0..settings.edge_pool_size).map(|n| format!("{n}-{EDGE_POOL_SUFFIX}.{apex}")));
    hosts.push("www.messenger.com".to_string());
    hosts.push(format!("{EDGE_POOL_SUFFIX}.messenger.com"));

    for configured in [
        &settings.base_url,
        &settings.facebook_url,
        &settings.realtime_url,
    ] {
        if let Some(host) = Url::parse(configured)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        {
            hosts.push(host);
        }
    }

    hosts.retain(|host| *host != apex);
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Optional persistence for the cookie jar between runs.
#[async_trait]
pub trait CookieStorage: Send + Sync {
    async fn load(&self) -> Option<HashMap<String, String>>;
    async fn save(&self, cookies: &HashMap<String, String>);
}

/// Cookie map stored as a JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileCookieStorage {
    path: PathBuf,
}

impl FileCookieStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl CookieStorage for FileCookieStorage {
    async fn load(&self) -> Option<HashMap<String, String>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "no stored cookies");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cookies) => Some(cookies),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "stored cookies are unreadable");
                None
            }
        }
    }

    async fn save(&self, cookies: &HashMap<String, String>) {
        let raw = match serde_json::to_string_pretty(cookies) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "failed to serialize cookies");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    warn!(path = %parent.display(), error = %err, "failed to create cookie dir");
                    return;
                }
            }
        }
        if let Err(err) = tokio::fs::write(&self.path, raw).await {
            warn!(path = %self.path.display(), error = %err, "failed to save cookies");
        }
    }
}

/// `host` equals `domain` or is a subdomain of it, on a label boundary.
fn host_within(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
#[path = "tests/cookies_tests.rs"]
mod tests;
