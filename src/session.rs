use chrono::Utc;
use cookie::Cookie;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SESSION_COOKIES_FILE: &str = "session_cookies";
pub const SEED_COOKIES_FILE: &str = "seed_cookies";

/// Cookies carried between requests, keyed by name.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct CookieJar(BTreeMap<String, String>);

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar::default()
    }

    /// Parse a browser style `a=1; b=2` string.
    pub fn parse_seed(seed: &str) -> CookieJar {
        let cookies = Cookie::split_parse(seed)
            .filter_map(|cookie| cookie.ok())
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();
        CookieJar(cookies)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cookies from `other` replace ours with the same name.
    pub fn merge(&mut self, other: CookieJar) {
        self.0.extend(other.0);
    }

    /// Value for a `Cookie` request header, `None` when the jar is empty.
    pub fn header_value(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Some(pairs.join("; "))
    }

    /// Record a `Set-Cookie` response header. Expired cookies are removed.
    pub fn absorb_set_cookie(&mut self, header: &str) {
        let cookie = match Cookie::parse(header) {
            Ok(cookie) => cookie,
            Err(e) => {
                debug!("Ignoring malformed Set-Cookie header: {}", e);
                return;
            }
        };

        // negative Max-Age is parsed as zero
        let expired_by_age = cookie
            .max_age()
            .map(|max_age| max_age.whole_seconds() <= 0)
            .unwrap_or(false);
        let expired_by_date = cookie
            .expires_datetime()
            .map(|expires| expires.unix_timestamp() <= Utc::now().timestamp())
            .unwrap_or(false);

        if expired_by_age || expired_by_date {
            self.0.remove(cookie.name());
        } else {
            self.0
                .insert(cookie.name().to_string(), cookie.value().to_string());
        }
    }
}

/// Cookie state of the upstream session: the evolving jar plus the seed it
/// was bootstrapped from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub jar: CookieJar,
    pub seed: String,
}

impl SessionState {
    /// A fresh session built only from the seed cookie string.
    pub fn from_seed(seed: &str) -> SessionState {
        SessionState {
            jar: CookieJar::parse_seed(seed),
            seed: seed.to_string(),
        }
    }
}

/// Files holding the session between runs.
#[derive(Debug, Clone)]
pub struct CookieStore {
    dir: PathBuf,
}

impl CookieStore {
    pub fn new(dir: impl Into<PathBuf>) -> CookieStore {
        CookieStore { dir: dir.into() }
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_COOKIES_FILE)
    }

    pub fn seed_path(&self) -> PathBuf {
        self.dir.join(SEED_COOKIES_FILE)
    }

    /// Restore the last session. A seed that differs from the last persisted
    /// one is layered over the stored jar.
    pub fn load(&self, seed: &str) -> SessionState {
        let mut jar = self.load_jar();

        let last_seed = match fs::read_to_string(self.seed_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.seed_path().display(), e);
                String::new()
            }
        };

        if seed != last_seed {
            let seed_jar = CookieJar::parse_seed(seed);
            info!(
                "Using new seed cookies: {:?}",
                seed_jar.0.keys().collect::<Vec<_>>()
            );
            jar.merge(seed_jar);
        } else {
            debug!("Seed cookies unchanged, reusing last session");
        }

        SessionState {
            jar,
            seed: seed.to_string(),
        }
    }

    fn load_jar(&self) -> CookieJar {
        let path = self.session_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return CookieJar::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return CookieJar::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring corrupt cookie jar {}: {}", path.display(), e);
            CookieJar::new()
        })
    }

    /// Persist the session. Failures are logged, never returned.
    pub fn save(&self, session: &SessionState) {
        match serde_json::to_string(&session.jar) {
            Ok(json) => write_logged(&self.session_path(), &json),
            Err(e) => warn!("Failed to serialize cookie jar: {}", e),
        }
        write_logged(&self.seed_path(), &session.seed);
    }
}

fn write_logged(path: &Path, content: &str) {
    if let Err(e) = fs::write(path, content) {
        warn!("Failed to write {}: {}", path.display(), e);
        if e.kind() == ErrorKind::NotFound {
            warn!(
                "Is there a volume bound to {} ?",
                path.parent().unwrap_or(path).display()
            );
        }
    }
}
