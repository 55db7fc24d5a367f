//! # zswag-client
//!
//! An OpenAPI-driven remote procedure invocation client.
//!
//! Given a parsed OpenAPI 3 spec, a separately configured layer of HTTP
//! settings, and a typed "reflective" request, this crate resolves a method
//! identifier to a concrete HTTP call — method, path, query, headers,
//! cookies, body, and authorization all determined by the spec — dispatches
//! it, and returns the raw response body on success.
//!
//! The core pieces:
//! - [`uri`] — RFC 3986 URI parsing, building, and percent-encoding.
//! - [`param`] — OpenAPI parameter formatting (style/explode/wire format).
//! - [`spec`] and [`parser`] — the in-memory spec model and its loader.
//! - [`settings`] — per-URL HTTP settings aggregation and secret deferral.
//! - [`security`] — security-alternatives resolution and per-scheme handlers.
//! - [`oauth2`] — OAuth2 client-credentials minting, refresh, and caching.
//! - [`oauth1`] — the RFC 5849 HMAC-SHA256 token-endpoint auth mode.
//! - [`engine`] — the invocation engine tying all of the above together.
//!
//! Collaborators the engine consumes but does not implement on your behalf:
//! - [`reflect::Introspectable`] — the reflective request object model.
//! - [`transport::HttpTransport`] — the HTTP client (a `reqwest`-backed
//!   default is provided).
//! - [`keychain::SecretStore`] — the OS keychain (an in-memory default is
//!   provided for tests and embedders without one).
//!
//! # Example
//!
//! ```rust,ignore
//! use zswag_client::engine::Engine;
//! use zswag_client::{parser, settings::SettingsStore, transport::ReqwestTransport, keychain::InMemorySecretStore};
//!
//! # async fn run() -> zswag_client::Result<()> {
//! let spec = parser::parse_spec(include_str!("../openapi.yaml"))?;
//! let settings = SettingsStore::from_env()?;
//! let transport = Box::new(ReqwestTransport::new()?);
//! let keychain = Box::new(InMemorySecretStore::new());
//! let engine = Engine::new(spec, settings, transport, keychain, 0)?;
//!
//! // `request` implements `reflect::Introspectable`.
//! // let body = engine.call("getWidget", &request, &Default::default()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod error;
pub mod keychain;
pub mod oauth1;
pub mod oauth2;
pub mod param;
pub mod parser;
pub mod reflect;
pub mod security;
pub mod settings;
pub mod spec;
pub mod transport;
pub mod uri;

pub use engine::Engine;
pub use error::{ClientError, Result};
pub use parser::parse_spec;
pub use reflect::{Introspectable, Value};
pub use spec::SpecConfig;

/// Common imports for embedders wiring up an [`Engine`].
pub mod prelude {
    pub use crate::engine::Engine;
    pub use crate::error::{ClientError, Result};
    pub use crate::keychain::{InMemorySecretStore, SecretStore};
    pub use crate::parser::parse_spec;
    pub use crate::reflect::{Introspectable, Value};
    pub use crate::settings::{HttpConfig, SettingsStore};
    pub use crate::spec::SpecConfig;
    pub use crate::transport::{HttpTransport, ReqwestTransport};
}
