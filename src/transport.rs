//! HTTP transport abstraction: the collaborator the invocation engine (and
//! the OAuth2 handler) dispatch requests through, plus a `reqwest`-backed
//! default implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{ClientError, Result};
use crate::settings::{HttpConfig, HTTP_TIMEOUT_ENV_VAR, SSL_STRICT_ENV_VAR};

/// An HTTP response as seen by the engine: status code plus raw body bytes.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// A request body plus its declared content type.
pub type RequestBody = (Vec<u8>, String);

/// The five HTTP verbs the invocation engine and the OAuth2 handler ever
/// issue. `get` never carries a body; the rest always take one (possibly
/// `None`, for a bodyless POST/PUT/PATCH/DELETE).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a bodyless GET.
    async fn get(&self, url: &str, config: &HttpConfig) -> Result<TransportResponse>;
    /// Issues a POST, with an optional body.
    async fn post(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse>;
    /// Issues a PUT, with an optional body.
    async fn put(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse>;
    /// Issues a PATCH, with an optional body.
    async fn patch(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse>;
    /// Issues a DELETE, with an optional body.
    async fn delete(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse>;
}

/// `reqwest`-backed [`HttpTransport`], configured once from the environment
/// (timeout, TLS strictness) and reused across calls. A call whose config
/// carries a `proxy` gets a one-off client built for that proxy instead of
/// the shared one, since `reqwest::Client` pins its proxy at build time and
/// `HttpConfig::proxy` can vary per URL pattern/call.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
    ssl_strict: bool,
}

impl ReqwestTransport {
    /// Builds a client from [`HTTP_TIMEOUT_ENV_VAR`] (default 30s) and
    /// [`SSL_STRICT_ENV_VAR`] (default strict; any falsy value disables
    /// certificate validation, matching the original's opt-out knob).
    pub fn new() -> Result<Self> {
        let timeout = std::env::var(HTTP_TIMEOUT_ENV_VAR)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let ssl_strict = std::env::var(SSL_STRICT_ENV_VAR)
            .map(|v| !matches!(v.as_str(), "" | "0" | "false" | "no"))
            .unwrap_or(true);

        let client = Self::build_client(timeout, ssl_strict, None)?;

        Ok(ReqwestTransport { client, timeout, ssl_strict })
    }

    fn build_client(
        timeout: Duration,
        ssl_strict: bool,
        proxy: Option<&crate::settings::ProxyConfig>,
    ) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!ssl_strict);

        if let Some(proxy) = proxy {
            let proxy_url = format!("http://{}:{}", proxy.host, proxy.port);
            let mut reqwest_proxy = reqwest::Proxy::all(proxy_url)?;
            if !proxy.user.is_empty() {
                reqwest_proxy = reqwest_proxy.basic_auth(&proxy.user, &proxy.password);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        Ok(builder.build()?)
    }

    async fn dispatch(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<RequestBody>,
        config: &HttpConfig,
    ) -> Result<TransportResponse> {
        let client = match &config.proxy {
            Some(proxy) => Self::build_client(self.timeout, self.ssl_strict, Some(proxy))?,
            None => self.client.clone(),
        };

        let mut builder = client.request(method, apply_query(url, config));
        builder = apply_config(builder, config)?;

        if let Some((bytes, content_type)) = body {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type).body(bytes);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.bytes().await?.to_vec();
                Ok(TransportResponse { status, body })
            }
            Err(err) => Err(ClientError::Transport(err.to_string())),
        }
    }
}

/// Appends `config.query` onto `url`, encoding each key/value with the same
/// byte-exact, lowercase-hex [`crate::uri::UriComponents::encode`] the URI
/// builder (C1) uses — rather than `reqwest`'s own query encoder, which
/// would re-encode with uppercase hex and break wire-compatibility with the
/// formatting §4.2/§8 pin.
fn apply_query(url: &str, config: &HttpConfig) -> String {
    if config.query.is_empty() {
        return url.to_string();
    }

    let mut out = url.to_string();
    for (i, (key, value)) in config.query.iter().enumerate() {
        out.push(if i == 0 && !url.contains('?') { '?' } else { '&' });
        out.push_str(&crate::uri::UriComponents::encode(key));
        out.push('=');
        out.push_str(&crate::uri::UriComponents::encode(value));
    }
    out
}

fn apply_config(mut builder: reqwest::RequestBuilder, config: &HttpConfig) -> Result<reqwest::RequestBuilder> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Transport(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::Transport(format!("invalid header value for '{name}': {e}")))?;
        headers.append(name, value);
    }
    builder = builder.headers(headers);

    if !config.cookies.is_empty() {
        let cookie_header = config
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(reqwest::header::COOKIE, cookie_header);
    }

    if let Some(basic) = &config.basic_auth {
        builder = builder.basic_auth(&basic.user, Some(&basic.password));
    }

    Ok(builder)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, config: &HttpConfig) -> Result<TransportResponse> {
        self.dispatch(reqwest::Method::GET, url, None, config).await
    }

    async fn post(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse> {
        self.dispatch(reqwest::Method::POST, url, body, config).await
    }

    async fn put(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse> {
        self.dispatch(reqwest::Method::PUT, url, body, config).await
    }

    async fn patch(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse> {
        self.dispatch(reqwest::Method::PATCH, url, body, config).await
    }

    async fn delete(&self, url: &str, body: Option<RequestBody>, config: &HttpConfig) -> Result<TransportResponse> {
        self.dispatch(reqwest::Method::DELETE, url, body, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_against_wiremock_returns_body() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/ping"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .get(&format!("{}/ping", server.uri()), &HttpConfig::default())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"pong");
    }

    #[tokio::test]
    async fn post_sends_body_and_content_type() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/echo"))
            .and(wiremock::matchers::body_string("hello"))
            .respond_with(wiremock::ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .post(
                &format!("{}/echo", server.uri()),
                Some((b"hello".to_vec(), "text/plain".to_string())),
                &HttpConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn connection_failure_surfaces_as_transport_error() {
        let transport = ReqwestTransport::new().unwrap();
        let result = transport.get("http://127.0.0.1:1", &HttpConfig::default()).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
