//! OAuth2 client-credentials handler (C6): mints and refreshes access
//! tokens, caching them by `(tokenUrl, clientId, audience, scopes)` behind a
//! reader-writer lock so concurrent callers for the same key mint at most
//! once.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant, SystemTime};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{ClientError, Result};
use crate::security::{AuthContext, Satisfy};
use crate::settings::{HttpConfig, TokenEndpointAuthMethod};
use crate::spec::{SecurityRequirement, SecurityScheme};

/// Safety margin subtracted from the issuer's `expires_in` before treating
/// a cached token as stale.
const EXPIRY_SLACK: Duration = Duration::from_secs(30);
const DEFAULT_EXPIRES_IN: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    token_url: String,
    client_id: String,
    audience: String,
    scope_key: String,
}

#[derive(Debug, Clone)]
struct MintedToken {
    access_token: String,
    refresh_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Process-wide (per-handler) cache of minted tokens.
#[derive(Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<TokenKey, MintedToken>>,
}

/// Resolves and applies OAuth2 client-credentials security requirements,
/// minting or refreshing tokens as needed.
#[derive(Default)]
pub struct OAuth2Handler {
    cache: TokenCache,
}

impl OAuth2Handler {
    /// Builds a handler with an empty token cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to satisfy an `OAuth2ClientCredentials` requirement,
    /// inserting `Authorization: Bearer <token>` into `ctx.config` on
    /// success.
    pub async fn satisfy(
        &self,
        requirement: &SecurityRequirement,
        scheme: &SecurityScheme,
        ctx: &mut AuthContext<'_>,
    ) -> Result<Satisfy> {
        let SecurityScheme::OAuth2ClientCredentials {
            token_url: scheme_token_url,
            refresh_url: scheme_refresh_url,
            scopes: scheme_scopes,
        } = scheme
        else {
            return Ok(Satisfy::Mismatch(
                "internal error: non-OAuth2 scheme routed to OAuth2 handler".to_string(),
            ));
        };

        let Some(oauth2) = ctx.config.oauth2.clone() else {
            return Ok(Satisfy::Mismatch(
                "OAuth2 client-credentials required but no oauth2 config present in http-settings."
                    .to_string(),
            ));
        };

        let scopes: Vec<String> = if oauth2.scopes_override.is_empty() {
            requirement.scopes.clone()
        } else {
            oauth2.scopes_override.clone()
        };

        let token_url = if oauth2.token_url_override.is_empty() {
            scheme_token_url.clone()
        } else {
            oauth2.token_url_override.clone()
        };
        if token_url.is_empty() {
            return Ok(Satisfy::Mismatch(
                "OAuth2 client-credentials: tokenUrl missing (spec/http-settings).".to_string(),
            ));
        }

        let mut refresh_url = if oauth2.refresh_url_override.is_empty() {
            scheme_refresh_url.clone().unwrap_or_default()
        } else {
            oauth2.refresh_url_override.clone()
        };
        if refresh_url.is_empty() {
            refresh_url = token_url.clone();
        }

        let scope_key = scopes.join(":");
        let key = TokenKey {
            token_url: token_url.clone(),
            client_id: oauth2.client_id.clone(),
            audience: oauth2.audience.clone(),
            scope_key,
        };

        // Hot path: reader lock only.
        {
            let entries = self.cache.entries.read().await;
            if let Some(token) = entries.get(&key) {
                if Instant::now() < token.expires_at {
                    ctx.config
                        .headers
                        .push(("Authorization".to_string(), format!("Bearer {}", token.access_token)));
                    return Ok(Satisfy::Ok);
                }
            }
        }

        // Cold path: writer lock, re-check, then refresh-or-mint.
        let mut entries = self.cache.entries.write().await;
        if let Some(token) = entries.get(&key) {
            if Instant::now() < token.expires_at {
                ctx.config
                    .headers
                    .push(("Authorization".to_string(), format!("Bearer {}", token.access_token)));
                return Ok(Satisfy::Ok);
            }
        }

        let stale_refresh_token = entries.get(&key).map(|t| t.refresh_token.clone()).filter(|t| !t.is_empty());

        let minted = if let Some(refresh_token) = stale_refresh_token {
            match self.refresh(ctx, &refresh_url, &oauth2, &refresh_token).await {
                Ok(token) => token,
                Err(_) => self.mint(ctx, &token_url, &oauth2, &scopes).await?,
            }
        } else {
            self.mint(ctx, &token_url, &oauth2, &scopes).await?
        };

        ctx.config
            .headers
            .push(("Authorization".to_string(), format!("Bearer {}", minted.access_token)));
        entries.insert(key, minted);
        Ok(Satisfy::Ok)
    }

    /// Builds the request config used to talk to the token/refresh
    /// endpoint: settings-store lookup for that URL, merged with the
    /// per-call config, with any `Authorization` header stripped so
    /// resource credentials never leak to the issuer.
    async fn token_endpoint_config(&self, ctx: &AuthContext<'_>, url: &str) -> Result<HttpConfig> {
        let mut conf = ctx.settings.lookup(url).await?;
        conf.merge_from(ctx.config);
        conf.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));
        Ok(conf)
    }

    /// Applies client authentication to `conf` for a token/refresh request,
    /// returning the resolved client secret (empty for a public client).
    async fn apply_client_auth(
        &self,
        ctx: &AuthContext<'_>,
        conf: &mut HttpConfig,
        oauth2: &crate::settings::OAuth2Settings,
        http_method: &str,
        url: &str,
        body_params: &BTreeMap<String, String>,
    ) -> Result<String> {
        let secret = if !oauth2.client_secret_keychain.is_empty() {
            crate::keychain::load_with_timeout(ctx.keychain, &oauth2.client_secret_keychain, &oauth2.client_id).await?
        } else {
            oauth2.client_secret.clone()
        };

        if secret.is_empty() {
            return Ok(secret);
        }

        match oauth2.token_endpoint_auth.method {
            TokenEndpointAuthMethod::ClientSecretBasic => {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine as _;
                let credentials = format!("{}:{}", oauth2.client_id, secret);
                conf.headers.push((
                    "Authorization".to_string(),
                    format!("Basic {}", STANDARD.encode(credentials)),
                ));
            }
            TokenEndpointAuthMethod::Oauth1HmacSha256Signature => {
                let header = crate::oauth1::build_authorization_header(
                    http_method,
                    url,
                    &oauth2.client_id,
                    &secret,
                    body_params,
                    oauth2.token_endpoint_auth.nonce_length,
                    SystemTime::now(),
                )?;
                conf.headers.push(("Authorization".to_string(), header));
            }
        }

        Ok(secret)
    }

    async fn mint(
        &self,
        ctx: &AuthContext<'_>,
        token_url: &str,
        oauth2: &crate::settings::OAuth2Settings,
        scopes: &[String],
    ) -> Result<MintedToken> {
        let mut conf = self.token_endpoint_config(ctx, token_url).await?;

        let mut body_params = BTreeMap::new();
        body_params.insert("grant_type".to_string(), "client_credentials".to_string());
        if !scopes.is_empty() {
            body_params.insert("scope".to_string(), scopes.join(" "));
        }
        if !oauth2.audience.is_empty() {
            body_params.insert("audience".to_string(), oauth2.audience.clone());
        }

        let secret = self
            .apply_client_auth(ctx, &mut conf, oauth2, "POST", token_url, &body_params)
            .await?;
        if secret.is_empty() {
            body_params.insert("client_id".to_string(), oauth2.client_id.clone());
        }

        let body = urlencode_form(&body_params);
        let response = ctx
            .transport
            .post(token_url, Some((body.into_bytes(), "application/x-www-form-urlencoded".to_string())), &conf)
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(ClientError::AuthFetchFailed { status: response.status });
        }

        parse_token_response(&response.body, None)
    }

    async fn refresh(
        &self,
        ctx: &AuthContext<'_>,
        refresh_url: &str,
        oauth2: &crate::settings::OAuth2Settings,
        refresh_token: &str,
    ) -> Result<MintedToken> {
        let mut conf = self.token_endpoint_config(ctx, refresh_url).await?;

        let mut body_params = BTreeMap::new();
        body_params.insert("grant_type".to_string(), "refresh_token".to_string());
        body_params.insert("refresh_token".to_string(), refresh_token.to_string());

        let secret = self
            .apply_client_auth(ctx, &mut conf, oauth2, "POST", refresh_url, &body_params)
            .await?;
        if secret.is_empty() {
            body_params.insert("client_id".to_string(), oauth2.client_id.clone());
        }

        let body = urlencode_form(&body_params);
        let response = ctx
            .transport
            .post(
                refresh_url,
                Some((body.into_bytes(), "application/x-www-form-urlencoded".to_string())),
                &conf,
            )
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(ClientError::AuthFetchFailed { status: response.status });
        }

        parse_token_response(&response.body, Some(refresh_token))
    }
}

fn parse_token_response(body: &[u8], fallback_refresh_token: Option<&str>) -> Result<MintedToken> {
    let parsed: TokenResponse = serde_json::from_slice(body)
        .map_err(|e| ClientError::MalformedTokenResponse(e.to_string()))?;

    let access_token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ClientError::MalformedTokenResponse("response has no 'access_token'".to_string()))?;

    let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    let expires_at = Instant::now() + Duration::from_secs(expires_in.saturating_sub(EXPIRY_SLACK.as_secs()));

    let refresh_token = parsed
        .refresh_token
        .or_else(|| fallback_refresh_token.map(String::from))
        .unwrap_or_default();

    Ok(MintedToken {
        access_token,
        refresh_token,
        expires_at,
    })
}

/// `application/x-www-form-urlencoded` body encoding, keys in their given
/// (already lexically ordered, via `BTreeMap`) order.
fn urlencode_form(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", form_urlencode(k), form_urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
