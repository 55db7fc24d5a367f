//! In-memory shape of a parsed OpenAPI spec: methods, parameters, servers,
//! and security schemes (C3's data model; loading lives in [`crate::parser`]).

use std::collections::BTreeMap;

use crate::error::{ClientError, Result};
use crate::param::{Format, Style};
use crate::uri::UriComponents;

/// Body content type this crate's spec dialect recognizes for request
/// bodies and expects in responses.
pub const ZSERIO_OBJECT_CONTENT_TYPE: &str = "application/x-zserio-object";

/// Custom OpenAPI parameter extension naming the dotted source path into the
/// reflective request.
pub const ZSERIO_REQUEST_PART_EXTENSION: &str = "x-zserio-request-part";

/// Sentinel source path meaning "the whole serialized request".
pub const REQUEST_PART_WHOLE: &str = "*";

/// Where a parameter is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    /// Substituted into the path template.
    Path,
    /// Appended as a query string pair.
    Query,
    /// Sent as an HTTP header.
    Header,
}

/// A parameter's static metadata: where its value comes from, how it's
/// located on the wire, and how it's rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    /// External identifier (query/header name, or matrix/path template ident).
    pub ident: String,
    /// Dotted path into the reflective request, or [`REQUEST_PART_WHOLE`].
    pub source: String,
    /// Where this parameter is carried on the wire.
    pub location: ParamLocation,
    /// RFC 6570-subset serialization style.
    pub style: Style,
    /// Whether array/object values explode into repeated pairs.
    pub explode: bool,
    /// Wire format applied before style rendering.
    pub format: Format,
    /// Substituted when `source` resolves to nothing.
    pub default_value: String,
}

/// Location of an `apiKey` security scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyLocation {
    /// Carried as an HTTP header.
    Header,
    /// Carried as a query string parameter.
    Query,
    /// Carried as a cookie.
    Cookie,
}

/// A named security scheme as declared under `components.securitySchemes`.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityScheme {
    /// `Authorization: Basic ...`.
    HttpBasic,
    /// `Authorization: Bearer ...`.
    HttpBearer,
    /// A fixed-name API key carried at a fixed location.
    ApiKey {
        /// Where the key is carried.
        location: ApiKeyLocation,
        /// The header/query/cookie name the key is carried under.
        key_name: String,
    },
    /// OAuth2 client-credentials grant.
    OAuth2ClientCredentials {
        /// Token endpoint URL.
        token_url: String,
        /// Refresh endpoint URL, if distinct from `token_url`.
        refresh_url: Option<String>,
        /// Scopes requested when minting a token.
        scopes: Vec<String>,
    },
}

/// One requirement within a security AND-conjunction: a scheme reference
/// plus the scopes requested of it.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityRequirement {
    /// The scheme id this requirement refers to, as declared under
    /// `components.securitySchemes`.
    pub scheme_id: String,
    /// OAuth2 scopes requested of the scheme; empty for non-OAuth2 schemes.
    pub scopes: Vec<String>,
}

/// OR-of-ANDs of security requirements. Empty means "no authentication
/// required"; an empty inner `Vec` is a valid always-satisfied AND-unit.
pub type SecurityAlternatives = Vec<Vec<SecurityRequirement>>;

/// A single `paths/<template>/<method>` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    /// URI-path fragment, possibly containing `{name}` placeholders.
    pub path: String,
    /// Uppercased HTTP method (`GET`, `POST`, ...).
    pub http_method: String,
    /// Parameter name to descriptor.
    pub parameters: BTreeMap<String, ParameterDescriptor>,
    /// Whether the whole serialized request is the body (non-GET only).
    pub body_request_object: bool,
    /// Per-method security override; `None` falls back to the spec default.
    pub security: Option<SecurityAlternatives>,
}

/// The fully parsed, in-memory OpenAPI configuration.
#[derive(Debug, Clone)]
pub struct SpecConfig {
    /// Parsed server URIs, in document order.
    pub servers: Vec<UriComponents>,
    /// Map from `operationId` to its method descriptor.
    pub method_path: BTreeMap<String, MethodDescriptor>,
    /// Map from scheme id (as declared under `components.securitySchemes`)
    /// to its resolved scheme.
    pub security_schemes: BTreeMap<String, SecurityScheme>,
    /// Default security alternatives applied when a method has no override.
    pub default_security_scheme: SecurityAlternatives,
    /// Original spec text, retained verbatim for re-serialization.
    pub content: String,
}

impl SpecConfig {
    /// Looks up a method descriptor by name.
    pub fn method(&self, name: &str) -> Result<&MethodDescriptor> {
        self.method_path
            .get(name)
            .ok_or_else(|| ClientError::UnknownMethod(name.to_string()))
    }

    /// Looks up a security scheme by id.
    pub fn scheme(&self, id: &str) -> Option<&SecurityScheme> {
        self.security_schemes.get(id)
    }

    /// The server at `index`, failing if out of range.
    pub fn server(&self, index: usize) -> Result<&UriComponents> {
        self.servers
            .get(index)
            .ok_or_else(|| ClientError::ServerIndexOutOfRange {
                index,
                len: self.servers.len(),
            })
    }
}
