//! Invocation engine (C7): resolves a method's path/query/header parameters
//! and security, dispatches the HTTP request, and returns the response body.
//!
//! Grounded on the original `OpenAPIClient::call` dispatch: path-template
//! resolution, then header/query resolution, then security enforcement,
//! then a body for non-GET methods with a whole-request object, then the
//! method-specific transport call.

use std::time::Duration;

use tracing::debug;

use crate::error::{ClientError, Result};
use crate::keychain::SecretStore;
use crate::oauth2::OAuth2Handler;
use crate::param::{self, Format, Style};
use crate::reflect::{Introspectable, Value};
use crate::security::{self, AuthContext};
use crate::settings::{HttpConfig, SettingsStore};
use crate::spec::{ParamLocation, SpecConfig, REQUEST_PART_WHOLE, ZSERIO_OBJECT_CONTENT_TYPE};
use crate::transport::HttpTransport;
use crate::uri::UriComponents;

/// Ties together a loaded spec, its ambient HTTP settings, and the
/// collaborators needed to dispatch a call: an HTTP transport, a secret
/// store, and an OAuth2 token cache shared across all calls through this
/// engine.
pub struct Engine {
    spec: SpecConfig,
    settings: SettingsStore,
    oauth2: OAuth2Handler,
    transport: Box<dyn HttpTransport>,
    keychain: Box<dyn SecretStore>,
    server_index: usize,
}

impl Engine {
    /// Builds an engine bound to server `server_index` of `spec`.
    pub fn new(
        spec: SpecConfig,
        settings: SettingsStore,
        transport: Box<dyn HttpTransport>,
        keychain: Box<dyn SecretStore>,
        server_index: usize,
    ) -> Result<Self> {
        // Validate eagerly so a bad index fails at construction, not on the
        // first call.
        spec.server(server_index)?;
        Ok(Engine {
            spec,
            settings,
            oauth2: OAuth2Handler::new(),
            transport,
            keychain,
            server_index,
        })
    }

    /// Invokes `method_name`, resolving parameters out of `request` and
    /// returning the response body on a 2xx status.
    ///
    /// `ad_hoc_config` is merged over the settings-store lookup the same way
    /// the original layers a caller-supplied config over the persistent one
    /// (`settings[url] |= adHocConfig`).
    pub async fn call(
        &self,
        method_name: &str,
        request: &dyn Introspectable,
        ad_hoc_config: &HttpConfig,
    ) -> Result<Vec<u8>> {
        let method = self.spec.method(method_name)?;
        let server = self.spec.server(self.server_index)?;

        let resolved_path = resolve_path(&method.path, method, request)?;
        let mut uri = server.clone();
        uri.append_path(&resolved_path);
        let built_url = uri.build()?;

        let debug_context = format!("[{} {}]", method.http_method, uri.build_path());
        debug!("{debug_context} Calling endpoint {built_url} ...");

        let mut config = self.settings.lookup(&built_url).await?;
        config.merge_from(ad_hoc_config);
        config
            .headers
            .push(("Accept".to_string(), ZSERIO_OBJECT_CONTENT_TYPE.to_string()));

        debug!("{debug_context} Resolving query/path parameters ...");
        resolve_header_and_query_parameters(&mut config, method, request);

        let alternatives = method
            .security
            .as_ref()
            .unwrap_or(&self.spec.default_security_scheme);

        debug!("{debug_context} Checking required security schemes for method ...");
        {
            let mut ctx = AuthContext {
                config: &mut config,
                target_url: &built_url,
                settings: &self.settings,
                transport: self.transport.as_ref(),
                keychain: self.keychain.as_ref(),
            };
            security::satisfy_security(&self.spec, alternatives, &self.oauth2, &mut ctx).await?;
        }

        let body = if method.body_request_object {
            debug!("{debug_context} Fetching request body ...");
            let value = resolve_value(request, REQUEST_PART_WHOLE)
                .ok_or_else(|| ClientError::ParameterResolution {
                    name: "body".to_string(),
                    path: method.path.clone(),
                })?;
            let formatted = param::format_value(Format::Binary, &value);
            let bytes = param::body_str(&formatted)?;
            Some((bytes, ZSERIO_OBJECT_CONTENT_TYPE.to_string()))
        } else {
            None
        };

        debug!("{debug_context} Executing request ...");
        let transport_call = async {
            match method.http_method.as_str() {
                "GET" => self.transport.get(&built_url, &config).await,
                "POST" => self.transport.post(&built_url, body, &config).await,
                "PUT" => self.transport.put(&built_url, body, &config).await,
                "PATCH" => self.transport.patch(&built_url, body, &config).await,
                "DELETE" => self.transport.delete(&built_url, body, &config).await,
                other => Err(ClientError::SpecLoad(format!(
                    "{debug_context} unsupported HTTP method '{other}'"
                ))),
            }
        };
        tokio::pin!(transport_call);

        // Run the call on an awaited future while emitting a 1 Hz progress
        // heartbeat, so a caller tailing logs sees the invocation is still
        // alive on slow endpoints rather than a silent multi-second gap.
        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        heartbeat.tick().await; // first tick fires immediately; consume it
        let response = loop {
            tokio::select! {
                result = &mut transport_call => break result?,
                _ = heartbeat.tick() => {
                    debug!("{debug_context} Still waiting for response ...");
                }
            }
        };

        debug!(
            "{debug_context} Response received (code {}, content length {} bytes).",
            response.status,
            response.body.len()
        );

        if (200..300).contains(&response.status) {
            Ok(response.body)
        } else {
            Err(ClientError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            })
        }
    }
}

fn resolve_value(request: &dyn Introspectable, source: &str) -> Option<Value> {
    if source == REQUEST_PART_WHOLE {
        Some(Value::Bytes(request.serialize_whole()))
    } else {
        request.resolve_field(source)
    }
}

/// Substitutes every `{ident}` placeholder in `path_template` with its
/// resolved, path-styled value.
fn resolve_path(
    path_template: &str,
    method: &crate::spec::MethodDescriptor,
    request: &dyn Introspectable,
) -> Result<String> {
    let mut result = String::with_capacity(path_template.len());
    let mut rest = path_template;

    while let Some(begin) = rest.find('{') {
        let Some(end_rel) = rest[begin..].find('}') else {
            result.push_str(rest);
            return Ok(result);
        };
        let end = begin + end_rel;

        result.push_str(&rest[..begin]);
        let ident = &rest[begin + 1..end];

        let descriptor = method.parameters.get(ident).ok_or_else(|| ClientError::ParameterResolution {
            name: ident.to_string(),
            path: method.path.clone(),
        })?;

        let value = resolve_value(request, &descriptor.source).unwrap_or(Value::Str(crate::param::Str(
            descriptor.default_value.clone(),
        )));
        let formatted = param::format_value(descriptor.format, &value);
        let rendered = param::path_str(&formatted, &descriptor.ident, descriptor.style, descriptor.explode, &descriptor.default_value);
        result.push_str(&rendered);

        rest = &rest[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_header_and_query_parameters(
    config: &mut HttpConfig,
    method: &crate::spec::MethodDescriptor,
    request: &dyn Introspectable,
) {
    for descriptor in method.parameters.values() {
        let destination_is_header = match descriptor.location {
            ParamLocation::Header => true,
            ParamLocation::Query => false,
            ParamLocation::Path => continue,
        };

        let value = match resolve_value(request, &descriptor.source) {
            Some(v) => v,
            None if !descriptor.default_value.is_empty() => {
                Value::Str(crate::param::Str(descriptor.default_value.clone()))
            }
            None => continue,
        };

        let formatted = param::format_value(descriptor.format, &value);
        let pairs = param::query_or_header_pairs(
            &formatted,
            &descriptor.ident,
            if destination_is_header { Style::Form } else { descriptor.style },
            descriptor.explode,
            destination_is_header,
        );

        if destination_is_header {
            config.headers.extend(pairs);
        } else {
            config.query.extend(pairs);
        }
    }
}
