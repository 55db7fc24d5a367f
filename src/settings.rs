//! HTTP settings store (C4): per-URL-pattern persistent configuration,
//! merged with ad-hoc per-call overrides, with secret materialization
//! deferred until a config is actually applied to a transport.

use std::collections::BTreeMap;
use std::ops::BitOrAssign;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::Result;

/// Environment variable naming the HTTP settings YAML file.
pub const SETTINGS_FILE_ENV_VAR: &str = "ZSWAG_HTTP_SETTINGS_FILE";

/// Environment variable naming the HTTP transport timeout, in seconds.
pub const HTTP_TIMEOUT_ENV_VAR: &str = "ZSWAG_HTTP_TIMEOUT_SECONDS";

/// Environment variable controlling TLS strictness (truthy/empty).
pub const SSL_STRICT_ENV_VAR: &str = "ZSWAG_HTTP_SSL_STRICT";

/// A process-wide monotonic counter; bumping it past a store's last-read
/// generation marks that store stale and due for a reparse on next lookup.
static SETTINGS_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Prompts every [`SettingsStore`] to re-read its file on next lookup.
pub fn notify_changed() {
    SETTINGS_GENERATION.fetch_add(1, Ordering::SeqCst);
}

fn current_generation() -> u64 {
    SETTINGS_GENERATION.load(Ordering::SeqCst)
}

/// `user` plus either an inline `password` or a `keychain` reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicAuth {
    /// Basic-auth username.
    pub user: String,
    /// Inline password; empty if resolved from `keychain` instead.
    pub password: String,
    /// Keychain service reference to resolve the password from, if set.
    pub keychain: String,
}

/// Proxy host/port plus optional credentials.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProxyConfig {
    /// Proxy hostname.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Proxy username, if required.
    pub user: String,
    /// Inline proxy password; empty if resolved from `keychain` instead.
    pub password: String,
    /// Keychain service reference to resolve the proxy password from.
    pub keychain: String,
}

/// How the client authenticates to the token endpoint when minting/refreshing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEndpointAuthMethod {
    /// `Authorization: Basic base64(clientId:clientSecret)` (RFC 6749 §2.3.1).
    #[default]
    ClientSecretBasic,
    /// RFC 5849 OAuth 1.0 HMAC-SHA256 request signing.
    Oauth1HmacSha256Signature,
}

/// Token-endpoint authentication mode plus its nonce-length parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEndpointAuth {
    /// The authentication mode used when talking to the token endpoint.
    pub method: TokenEndpointAuthMethod,
    /// Nonce length for the OAuth1 signature mode, clamped to `8..=64`.
    pub nonce_length: u8,
}

impl Default for TokenEndpointAuth {
    fn default() -> Self {
        TokenEndpointAuth {
            method: TokenEndpointAuthMethod::default(),
            nonce_length: 16,
        }
    }
}

/// Per-URL OAuth2 client-credentials overrides.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OAuth2Settings {
    /// OAuth2 client id.
    pub client_id: String,
    /// Inline client secret; empty if resolved from `client_secret_keychain`
    /// instead, or if this is a public client.
    pub client_secret: String,
    /// Keychain service reference to resolve the client secret from.
    pub client_secret_keychain: String,
    /// Overrides the spec-declared token URL when non-empty.
    pub token_url_override: String,
    /// Overrides the spec-declared refresh URL when non-empty.
    pub refresh_url_override: String,
    /// `audience` request parameter sent to the token endpoint, if any.
    pub audience: String,
    /// Overrides the security requirement's requested scopes when non-empty.
    pub scopes_override: Vec<String>,
    /// Whether this OAuth2 config should also be used to authenticate a
    /// spec-fetch request.
    pub use_for_spec_fetch: bool,
    /// How the client authenticates itself to the token endpoint.
    pub token_endpoint_auth: TokenEndpointAuth,
}

/// Aggregate HTTP configuration: ad-hoc plus per-URL-pattern persistent
/// values, merged via [`HttpConfig::merge_from`] (general `|=`) or
/// [`HttpConfig::fold_first_wins`] (the settings store's own internal fold).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpConfig {
    /// Advisory scope string; parsed/stored but not consulted by any
    /// operation in this crate (see DESIGN.md).
    pub scope: Option<String>,
    /// Cookies to attach, keyed by name.
    pub cookies: BTreeMap<String, String>,
    /// HTTP basic-auth credentials, if configured.
    pub basic_auth: Option<BasicAuth>,
    /// Outbound proxy configuration, if any.
    pub proxy: Option<ProxyConfig>,
    /// OAuth2 client-credentials overrides, if this URL uses OAuth2.
    pub oauth2: Option<OAuth2Settings>,
    /// Generic API key value, placed by a security handler per the spec's
    /// declared scheme location.
    pub api_key: Option<String>,
    /// Extra headers to attach, in insertion order; duplicates append rather
    /// than overwrite.
    pub headers: Vec<(String, String)>,
    /// Extra query pairs to attach, in insertion order.
    pub query: Vec<(String, String)>,
}

impl HttpConfig {
    /// The general `|=` merge: optional scalar fields (`scope`, `api_key`)
    /// are filled only if absent; `basic_auth`/`proxy`/`oauth2` are
    /// overwritten if present on the right-hand side; `headers`/`query`
    /// always append; `cookies` are overwritten key-by-key.
    pub fn merge_from(&mut self, other: &HttpConfig) {
        if self.scope.is_none() {
            self.scope = other.scope.clone();
        }
        if self.api_key.is_none() {
            self.api_key = other.api_key.clone();
        }
        if other.basic_auth.is_some() {
            self.basic_auth = other.basic_auth.clone();
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy.clone();
        }
        if other.oauth2.is_some() {
            self.oauth2 = other.oauth2.clone();
        }
        for (k, v) in &other.cookies {
            self.cookies.insert(k.clone(), v.clone());
        }
        self.headers.extend(other.headers.iter().cloned());
        self.query.extend(other.query.iter().cloned());
    }

    /// The settings store's internal fold across matching entries:
    /// first-match-wins for every scalar/optional field (including
    /// `basic_auth`/`proxy`/`oauth2`, unlike [`Self::merge_from`]'s
    /// overwrite-on-rhs-present semantics), while headers/query still
    /// accumulate and cookies are inserted only if absent.
    fn fold_first_wins(&mut self, other: &HttpConfig) {
        if self.scope.is_none() {
            self.scope = other.scope.clone();
        }
        if self.api_key.is_none() {
            self.api_key = other.api_key.clone();
        }
        if self.basic_auth.is_none() {
            self.basic_auth = other.basic_auth.clone();
        }
        if self.proxy.is_none() {
            self.proxy = other.proxy.clone();
        }
        if self.oauth2.is_none() {
            self.oauth2 = other.oauth2.clone();
        }
        for (k, v) in &other.cookies {
            self.cookies.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self.headers.extend(other.headers.iter().cloned());
        self.query.extend(other.query.iter().cloned());
    }
}

impl BitOrAssign<&HttpConfig> for HttpConfig {
    fn bitor_assign(&mut self, rhs: &HttpConfig) {
        self.merge_from(rhs);
    }
}

/// One parsed settings-file entry: a URL-pattern regex plus its config.
struct Entry {
    pattern: Regex,
    config: HttpConfig,
}

#[derive(Debug, Deserialize)]
struct RawBasicAuth {
    user: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    keychain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProxy {
    host: String,
    port: u16,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    keychain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTokenEndpointAuth {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    nonce_length: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawOAuth2 {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    client_secret_keychain: Option<String>,
    #[serde(default)]
    token_url: Option<String>,
    #[serde(default)]
    refresh_url: Option<String>,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    scopes_override: Vec<String>,
    #[serde(default = "default_true")]
    use_for_spec_fetch: bool,
    #[serde(default)]
    token_endpoint_auth: Option<RawTokenEndpointAuth>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    url: String,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default, rename = "basic-auth")]
    basic_auth: Option<RawBasicAuth>,
    #[serde(default)]
    proxy: Option<RawProxy>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query: BTreeMap<String, String>,
    #[serde(default, rename = "api-key")]
    api_key: Option<String>,
    #[serde(default)]
    oauth2: Option<RawOAuth2>,
    #[serde(default)]
    scope: Option<String>,
}

fn lower_entry(raw: RawEntry) -> Result<Entry> {
    let pattern = Regex::new(&raw.url)?;

    let basic_auth = raw.basic_auth.map(|b| BasicAuth {
        user: b.user,
        password: b.password.unwrap_or_default(),
        keychain: b.keychain.unwrap_or_default(),
    });

    let proxy = raw.proxy.map(|p| ProxyConfig {
        host: p.host,
        port: p.port,
        user: p.user.unwrap_or_default(),
        password: p.password.unwrap_or_default(),
        keychain: p.keychain.unwrap_or_default(),
    });

    let oauth2 = raw.oauth2.map(|o| {
        let token_endpoint_auth = o
            .token_endpoint_auth
            .map(|a| TokenEndpointAuth {
                method: match a.method.as_deref() {
                    Some("rfc5849-oauth1-signature") => {
                        TokenEndpointAuthMethod::Oauth1HmacSha256Signature
                    }
                    _ => TokenEndpointAuthMethod::ClientSecretBasic,
                },
                nonce_length: a.nonce_length.unwrap_or(16).clamp(8, 64),
            })
            .unwrap_or_default();

        OAuth2Settings {
            client_id: o.client_id,
            client_secret: o.client_secret.unwrap_or_default(),
            client_secret_keychain: o.client_secret_keychain.unwrap_or_default(),
            token_url_override: o.token_url.unwrap_or_default(),
            refresh_url_override: o.refresh_url.unwrap_or_default(),
            audience: o.audience.unwrap_or_default(),
            scopes_override: o.scopes_override,
            use_for_spec_fetch: o.use_for_spec_fetch,
            token_endpoint_auth,
        }
    });

    Ok(Entry {
        pattern,
        config: HttpConfig {
            scope: raw.scope,
            cookies: raw.cookies,
            basic_auth,
            proxy,
            oauth2,
            api_key: raw.api_key,
            headers: raw.headers.into_iter().collect(),
            query: raw.query.into_iter().collect(),
        },
    })
}

struct StoreState {
    entries: Vec<Entry>,
    generation: u64,
}

/// Loads and folds per-URL HTTP configuration from a YAML file, with
/// refresh-on-demand when [`notify_changed`] has been called since the
/// last read.
pub struct SettingsStore {
    path: Option<std::path::PathBuf>,
    state: Arc<RwLock<StoreState>>,
}

impl SettingsStore {
    /// Reads the path from [`SETTINGS_FILE_ENV_VAR`] and loads it. A
    /// missing environment variable or missing file yields an empty store.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(SETTINGS_FILE_ENV_VAR).ok().map(Into::into);
        Self::new(path)
    }

    /// Loads from an explicit path (or an empty store if `None`).
    pub fn new(path: Option<std::path::PathBuf>) -> Result<Self> {
        let entries = match &path {
            Some(p) => load_entries(p)?,
            None => Vec::new(),
        };
        Ok(SettingsStore {
            path,
            state: Arc::new(RwLock::new(StoreState {
                entries,
                generation: current_generation(),
            })),
        })
    }

    /// Looks up the folded configuration for `url`, first upgrading to a
    /// writer lock and re-parsing the file if the global generation counter
    /// has advanced since this store's last read.
    pub async fn lookup(&self, url: &str) -> Result<HttpConfig> {
        {
            let state = self.state.read().await;
            if state.generation == current_generation() {
                return Ok(fold(&state.entries, url));
            }
        }

        let mut state = self.state.write().await;
        if state.generation != current_generation() {
            if let Some(path) = &self.path {
                state.entries = load_entries(path)?;
            }
            state.generation = current_generation();
        }
        Ok(fold(&state.entries, url))
    }
}

fn fold(entries: &[Entry], url: &str) -> HttpConfig {
    let mut result = HttpConfig::default();
    for entry in entries {
        if entry.pattern.is_match(url) {
            result.fold_first_wins(&entry.config);
        }
    }
    result
}

fn load_entries(path: &Path) -> Result<Vec<Entry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let raw_entries: Vec<RawEntry> = serde_yaml::from_str(&content)?;
    raw_entries.into_iter().map(lower_entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_store() {
        let store =
            SettingsStore::new(Some(std::path::PathBuf::from("/nonexistent/settings.yaml")))
                .unwrap();
        assert!(tokio_test::block_on(store.lookup("https://example.com")).unwrap().headers.is_empty());
    }

    #[tokio::test]
    async fn first_match_wins_for_scalar_fields_but_headers_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            r#"
- url: "https://example\\.com/.*"
  api-key: "first"
  headers:
    X-A: "1"
- url: "https://example\\.com/.*"
  api-key: "second"
  headers:
    X-B: "2"
"#,
        )
        .unwrap();

        let store = SettingsStore::new(Some(path)).unwrap();
        let config = store.lookup("https://example.com/foo").await.unwrap();

        assert_eq!(config.api_key.as_deref(), Some("first"));
        assert_eq!(config.headers.len(), 2);
    }

    #[test]
    fn merge_from_overwrites_oauth2_if_present_on_rhs() {
        let mut a = HttpConfig::default();
        a.oauth2 = Some(OAuth2Settings {
            client_id: "old".to_string(),
            ..Default::default()
        });

        let mut b = HttpConfig::default();
        b.oauth2 = Some(OAuth2Settings {
            client_id: "new".to_string(),
            ..Default::default()
        });

        a.merge_from(&b);
        assert_eq!(a.oauth2.unwrap().client_id, "new");
    }

    #[test]
    fn fold_first_wins_keeps_first_oauth2() {
        let mut a = HttpConfig::default();
        a.oauth2 = Some(OAuth2Settings {
            client_id: "old".to_string(),
            ..Default::default()
        });

        let mut b = HttpConfig::default();
        b.oauth2 = Some(OAuth2Settings {
            client_id: "new".to_string(),
            ..Default::default()
        });

        a.fold_first_wins(&b);
        assert_eq!(a.oauth2.unwrap().client_id, "old");
    }
}
