//! Security resolver (C5): evaluates the OR-of-ANDs of security
//! requirements declared by a method (or the spec's default), dispatching
//! each requirement to a per-scheme handler that may mutate the outgoing
//! [`HttpConfig`] on success.

use crate::error::{ClientError, Result};
use crate::keychain::SecretStore;
use crate::oauth2::OAuth2Handler;
use crate::settings::{HttpConfig, SettingsStore};
use crate::spec::{ApiKeyLocation, SecurityAlternatives, SecurityRequirement, SecurityScheme, SpecConfig};
use crate::transport::HttpTransport;

/// Outcome of a single scheme handler: either satisfied, or a mismatch with
/// a human-readable reason for the diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Satisfy {
    /// The scheme's requirement is met; the outgoing config may have been
    /// mutated (an API key inserted, a bearer token attached, ...).
    Ok,
    /// The scheme's requirement is not met, with a human-readable reason.
    Mismatch(String),
}

/// Everything a security handler needs: the config being built for the
/// resource call, the target URL (for OAuth2's per-URL settings lookup),
/// and the collaborators OAuth2 minting/refreshing needs.
pub struct AuthContext<'a> {
    /// The outgoing HTTP config being assembled for the resource call.
    pub config: &'a mut HttpConfig,
    /// The resource URL the call is headed to, for per-URL settings lookup.
    pub target_url: &'a str,
    /// The aggregated HTTP settings store.
    pub settings: &'a SettingsStore,
    /// The transport used for any auxiliary calls a scheme needs (e.g. the
    /// OAuth2 token endpoint).
    pub transport: &'a dyn HttpTransport,
    /// The secret store used to materialize deferred secrets.
    pub keychain: &'a dyn SecretStore,
}

/// Evaluates `alternatives` (an operation's own, or the spec's default)
/// against `ctx`, short-circuiting on the first satisfied AND-conjunction.
/// An empty outer list is vacuously satisfied and leaves `ctx.config`
/// untouched.
pub async fn satisfy_security(
    spec: &SpecConfig,
    alternatives: &SecurityAlternatives,
    oauth2: &OAuth2Handler,
    ctx: &mut AuthContext<'_>,
) -> Result<()> {
    if alternatives.is_empty() {
        return Ok(());
    }

    let mut reasons = Vec::new();
    for conjunction in alternatives {
        match satisfy_conjunction(spec, conjunction, oauth2, ctx).await? {
            Satisfy::Ok => return Ok(()),
            Satisfy::Mismatch(reason) => reasons.push(reason),
        }
    }

    Err(ClientError::AuthUnsatisfied(reasons))
}

async fn satisfy_conjunction(
    spec: &SpecConfig,
    requirements: &[SecurityRequirement],
    oauth2: &OAuth2Handler,
    ctx: &mut AuthContext<'_>,
) -> Result<Satisfy> {
    for requirement in requirements {
        let Some(scheme) = spec.scheme(&requirement.scheme_id) else {
            return Ok(Satisfy::Mismatch(format!(
                "no handler registered for required security scheme '{}'",
                requirement.scheme_id
            )));
        };

        let outcome = match scheme {
            SecurityScheme::HttpBasic => satisfy_basic(ctx.config),
            SecurityScheme::HttpBearer => satisfy_bearer(ctx.config),
            SecurityScheme::ApiKey { location, key_name } => satisfy_api_key(ctx.config, *location, key_name),
            SecurityScheme::OAuth2ClientCredentials { .. } => oauth2.satisfy(requirement, scheme, ctx).await?,
        };

        if let Satisfy::Mismatch(reason) = outcome {
            return Ok(Satisfy::Mismatch(reason));
        }
    }

    Ok(Satisfy::Ok)
}

fn has_authorization_header_matching(config: &HttpConfig, prefix: &str) -> bool {
    config.headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("authorization")
            && value.len() > prefix.len()
            && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

fn satisfy_basic(config: &HttpConfig) -> Satisfy {
    if config.basic_auth.is_some() || has_authorization_header_matching(config, "basic ") {
        Satisfy::Ok
    } else {
        Satisfy::Mismatch("HTTP basic-auth credentials are missing.".to_string())
    }
}

fn satisfy_bearer(config: &HttpConfig) -> Satisfy {
    if has_authorization_header_matching(config, "bearer ") {
        Satisfy::Ok
    } else {
        Satisfy::Mismatch("Header `Authorization: Bearer ...` is missing.".to_string())
    }
}

fn satisfy_api_key(config: &mut HttpConfig, location: ApiKeyLocation, key_name: &str) -> Satisfy {
    let container_name = match location {
        ApiKeyLocation::Header => "headers",
        ApiKeyLocation::Query => "query",
        ApiKeyLocation::Cookie => "cookies",
    };

    let already_present = match location {
        ApiKeyLocation::Header => config.headers.iter().any(|(k, _)| k == key_name),
        ApiKeyLocation::Query => config.query.iter().any(|(k, _)| k == key_name),
        ApiKeyLocation::Cookie => config.cookies.contains_key(key_name),
    };
    if already_present {
        return Satisfy::Ok;
    }

    let Some(api_key) = config.api_key.clone() else {
        return Satisfy::Mismatch(format!("API key ({container_name}) missing: {key_name}"));
    };

    match location {
        ApiKeyLocation::Header => config.headers.push((key_name.to_string(), api_key)),
        ApiKeyLocation::Query => config.query.push((key_name.to_string(), api_key)),
        ApiKeyLocation::Cookie => {
            config.cookies.insert(key_name.to_string(), api_key);
        }
    }
    Satisfy::Ok
}
