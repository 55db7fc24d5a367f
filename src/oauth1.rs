//! RFC 5849 OAuth 1.0 HMAC-SHA256 request signing: an alternate
//! token-endpoint authentication mode to the default `client_secret_basic`,
//! selected by [`crate::settings::TokenEndpointAuthMethod::
//! Oauth1HmacSha256Signature`].
//!
//! This encoder is intentionally distinct from [`crate::uri::UriComponents::
//! encode`]: RFC 5849 percent-encoding uses uppercase hex and a narrower
//! unreserved alphabet, matching the original's own separate encoder rather
//! than reusing the URI builder's lowercase-hex one.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

/// Percent-encodes every byte outside `alnum + "-._~"`, using *uppercase*
/// hex — the RFC 5849 unreserved alphabet, distinct from C1's.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Generates a random alphanumeric nonce of `length` characters.
/// `length` must be in `8..=64`.
pub fn generate_nonce(length: u8) -> Result<String> {
    if !(8..=64).contains(&length) {
        return Err(crate::error::ClientError::SpecLoad(format!(
            "OAuth1 nonce length must be between 8 and 64, got {length}"
        )));
    }

    const ALPHANUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    Ok((0..length)
        .map(|_| ALPHANUM[rng.gen_range(0..ALPHANUM.len())] as char)
        .collect())
}

/// Unix timestamp in seconds, as a string.
pub fn generate_timestamp(now: std::time::SystemTime) -> String {
    now.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn build_signature_base_string(http_method: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let param_string = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{http_method}&{}&{}",
        percent_encode(url),
        percent_encode(&param_string)
    )
}

/// Computes the RFC 5849 §3.4.1/§3.4.2 HMAC-SHA256 signature over `params`
/// (OAuth parameters plus body parameters), base64-encoded.
pub fn compute_signature(
    http_method: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    consumer_secret: &str,
    token_secret: &str,
) -> String {
    let base_string = build_signature_base_string(http_method, url, params);
    let signing_key = format!("{}&{}", percent_encode(consumer_secret), percent_encode(token_secret));

    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(base_string.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Builds the full `OAuth ...` Authorization header value, signing over the
/// OAuth parameters plus `body_params` (client-credentials flows have no
/// token secret, so that parameter is always empty here).
pub fn build_authorization_header(
    http_method: &str,
    url: &str,
    consumer_key: &str,
    consumer_secret: &str,
    body_params: &BTreeMap<String, String>,
    nonce_length: u8,
    now: std::time::SystemTime,
) -> Result<String> {
    let timestamp = generate_timestamp(now);
    let nonce = generate_nonce(nonce_length)?;

    let mut all_params = BTreeMap::new();
    all_params.insert("oauth_consumer_key".to_string(), consumer_key.to_string());
    all_params.insert("oauth_signature_method".to_string(), "HMAC-SHA256".to_string());
    all_params.insert("oauth_timestamp".to_string(), timestamp.clone());
    all_params.insert("oauth_nonce".to_string(), nonce.clone());
    all_params.insert("oauth_version".to_string(), "1.0".to_string());
    for (k, v) in body_params {
        all_params.insert(k.clone(), v.clone());
    }

    let signature = compute_signature(http_method, url, &all_params, consumer_secret, "");

    Ok(format!(
        "OAuth oauth_consumer_key=\"{}\", oauth_signature_method=\"HMAC-SHA256\", oauth_timestamp=\"{}\", oauth_nonce=\"{}\", oauth_version=\"1.0\", oauth_signature=\"{}\"",
        percent_encode(consumer_key),
        timestamp,
        percent_encode(&nonce),
        percent_encode(&signature),
    ))
}
