//! OpenAPI specification parsing and lowering into [`crate::spec::SpecConfig`].
//!
//! The document itself is parsed with `openapiv3`'s typed model; this module
//! is responsible for lowering that generic model into the narrower shape
//! this crate's invocation engine actually consumes, recognizing only the
//! fields described in the component design (everything else is ignored).

use std::collections::BTreeMap;
use std::path::Path;

use openapiv3::{
    OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathStyle, QueryStyle, ReferenceOr,
    SecurityScheme as OapiSecurityScheme,
};

use crate::error::{ClientError, Result};
use crate::param::{Format, Style};
use crate::settings::HttpConfig;
use crate::spec::{
    ApiKeyLocation, MethodDescriptor, ParamLocation, ParameterDescriptor, SecurityAlternatives,
    SecurityRequirement, SecurityScheme, SpecConfig, ZSERIO_OBJECT_CONTENT_TYPE,
    ZSERIO_REQUEST_PART_EXTENSION,
};
use crate::transport::HttpTransport;
use crate::uri::UriComponents;

/// Parses raw spec text (JSON or YAML) into an `openapiv3::OpenAPI` document,
/// detecting format the same way the original's YAML loader (a JSON
/// superset) did: JSON if the trimmed text starts with `{`, YAML otherwise.
fn parse_document(content: &str) -> Result<OpenAPI> {
    if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(Into::into)
    } else {
        serde_yaml::from_str(content).map_err(Into::into)
    }
}

/// Parses and lowers an OpenAPI document from a string.
pub fn parse_spec(content: &str) -> Result<SpecConfig> {
    let doc = parse_document(content)?;
    lower(doc, content.to_string())
}

/// Loads and lowers an OpenAPI document from a file on disk.
pub fn load_from_file(path: &Path) -> Result<SpecConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_spec(&content)
}

/// Fetches an OpenAPI document over HTTP and lowers it, completing any
/// missing scheme/host/port on the parsed server URI from the fetch URL
/// itself (mirroring the original's `fetchOpenAPIConfig`).
pub async fn fetch_from_url(url: &str, transport: &dyn HttpTransport) -> Result<SpecConfig> {
    let fetch_uri = UriComponents::from_str_rfc3986(url)?;
    let response = transport.get(&fetch_uri.build()?, &HttpConfig::default()).await?;

    if !(200..300).contains(&response.status) {
        return Err(ClientError::Http {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }

    let content = String::from_utf8_lossy(&response.body).into_owned();
    let mut spec = parse_spec(&content)?;

    if let Some(server) = spec.servers.first_mut() {
        if server.scheme.is_empty() {
            server.scheme = fetch_uri.scheme.clone();
        }
        if server.host.is_empty() {
            server.host = fetch_uri.host.clone();
            server.port = fetch_uri.port;
        }
    }

    Ok(spec)
}

fn lower(doc: OpenAPI, content: String) -> Result<SpecConfig> {
    let servers = lower_servers(&doc)?;
    let security_schemes = lower_security_schemes(&doc)?;
    let default_security_scheme = lower_security_requirements(doc.security.as_deref());
    let method_path = lower_paths(&doc)?;

    Ok(SpecConfig {
        servers,
        method_path,
        security_schemes,
        default_security_scheme,
        content,
    })
}

fn lower_servers(doc: &OpenAPI) -> Result<Vec<UriComponents>> {
    let Some(first) = doc.servers.first() else {
        return Ok(Vec::new());
    };

    let url = first.url.as_str();
    if url.is_empty() {
        return Ok(Vec::new());
    }

    let uri = if url.starts_with('/') {
        UriComponents::from_str_path(url)?
    } else {
        UriComponents::from_str_rfc3986(url)?
    };

    Ok(vec![uri])
}

fn lower_security_schemes(doc: &OpenAPI) -> Result<BTreeMap<String, SecurityScheme>> {
    let mut out = BTreeMap::new();

    let Some(components) = &doc.components else {
        return Ok(out);
    };

    for (id, scheme_ref) in &components.security_schemes {
        let ReferenceOr::Item(scheme) = scheme_ref else {
            continue;
        };

        let lowered = match scheme {
            OapiSecurityScheme::HTTP { scheme, .. } => match scheme.to_ascii_lowercase().as_str() {
                "basic" => SecurityScheme::HttpBasic,
                "bearer" => SecurityScheme::HttpBearer,
                other => {
                    return Err(ClientError::SpecLoad(format!(
                        "unsupported HTTP security scheme '{other}' for '{id}'"
                    )))
                }
            },
            OapiSecurityScheme::APIKey { location, name, .. } => SecurityScheme::ApiKey {
                location: match location {
                    openapiv3::APIKeyLocation::Header => ApiKeyLocation::Header,
                    openapiv3::APIKeyLocation::Query => ApiKeyLocation::Query,
                    openapiv3::APIKeyLocation::Cookie => ApiKeyLocation::Cookie,
                },
                key_name: name.clone(),
            },
            OapiSecurityScheme::OAuth2 { flows, .. } => {
                let Some(cc) = &flows.client_credentials else {
                    return Err(ClientError::SpecLoad(format!(
                        "OAuth2 scheme '{id}' has no clientCredentials flow"
                    )));
                };
                SecurityScheme::OAuth2ClientCredentials {
                    token_url: cc.token_url.clone(),
                    refresh_url: cc.refresh_url.clone(),
                    scopes: cc.scopes.keys().cloned().collect(),
                }
            }
            OapiSecurityScheme::OpenIDConnect { .. } => {
                return Err(ClientError::SpecLoad(format!(
                    "unsupported security scheme kind for '{id}': openIdConnect"
                )))
            }
        };

        out.insert(id.clone(), lowered);
    }

    Ok(out)
}

fn lower_security_requirements(
    reqs: Option<&[openapiv3::SecurityRequirement]>,
) -> SecurityAlternatives {
    let Some(reqs) = reqs else {
        return Vec::new();
    };

    // Each `SecurityRequirement` (an IndexMap) is itself already an
    // AND-conjunction of scheme ids to requested scopes; the surrounding
    // `Vec` is the OR-of-alternatives.
    reqs.iter()
        .map(|req| {
            req.iter()
                .map(|(scheme_id, scopes)| SecurityRequirement {
                    scheme_id: scheme_id.clone(),
                    scopes: scopes.clone(),
                })
                .collect()
        })
        .collect()
}

fn lower_paths(doc: &OpenAPI) -> Result<BTreeMap<String, MethodDescriptor>> {
    let mut out = BTreeMap::new();

    for (uri_path, path_item_ref) in doc.paths.paths.iter() {
        let ReferenceOr::Item(path_item) = path_item_ref else {
            continue;
        };

        let entries: [(&str, &Option<Operation>); 5] = [
            ("GET", &path_item.get),
            ("POST", &path_item.post),
            ("PUT", &path_item.put),
            ("PATCH", &path_item.patch),
            ("DELETE", &path_item.delete),
        ];

        for (http_method, operation) in entries {
            let Some(operation) = operation else {
                continue;
            };

            let Some(operation_id) = &operation.operation_id else {
                return Err(ClientError::SpecLoad(format!(
                    "missing required field 'operationId' at {uri_path} {http_method}"
                )));
            };

            let descriptor = lower_method(uri_path, http_method, operation)?;
            out.insert(operation_id.clone(), descriptor);
        }
    }

    Ok(out)
}

fn lower_method(uri_path: &str, http_method: &str, operation: &Operation) -> Result<MethodDescriptor> {
    let mut parameters = BTreeMap::new();

    for param_ref in &operation.parameters {
        let ReferenceOr::Item(param) = param_ref else {
            continue;
        };

        if let Some(descriptor) = lower_parameter(param)? {
            parameters.insert(descriptor.ident.clone(), descriptor);
        }
    }

    let body_request_object = lower_request_body(operation)?;
    let security = operation
        .security
        .as_deref()
        .map(|reqs| lower_security_requirements(Some(reqs)));

    Ok(MethodDescriptor {
        path: uri_path.to_string(),
        http_method: http_method.to_string(),
        parameters,
        body_request_object,
        security,
    })
}

fn lower_request_body(operation: &Operation) -> Result<bool> {
    let Some(ReferenceOr::Item(body)) = &operation.request_body else {
        return Ok(false);
    };

    for content_type in body.content.keys() {
        if content_type != ZSERIO_OBJECT_CONTENT_TYPE {
            return Err(ClientError::SpecLoad(format!(
                "unsupported body content type '{content_type}'"
            )));
        }
    }

    Ok(!body.content.is_empty())
}

/// Lowers a single `parameters[i]` entry. Returns `Ok(None)` when the
/// parameter lacks the `x-zserio-request-part` extension, mirroring the
/// original parser's "absent means ignored" behavior.
fn lower_parameter(param: &Parameter) -> Result<Option<ParameterDescriptor>> {
    let (data, location, default_style, default_explode) = match param {
        Parameter::Path { parameter_data, style, .. } => {
            (parameter_data, ParamLocation::Path, path_style(style), false)
        }
        Parameter::Query { parameter_data, style, .. } => {
            (parameter_data, ParamLocation::Query, query_style(style), true)
        }
        Parameter::Header { parameter_data, .. } => {
            (parameter_data, ParamLocation::Header, Style::Form, false)
        }
        Parameter::Cookie { .. } => return Ok(None),
    };

    let Some(source_value) = data.extensions.get(ZSERIO_REQUEST_PART_EXTENSION) else {
        return Ok(None);
    };
    let source = source_value
        .as_str()
        .ok_or_else(|| {
            ClientError::SpecLoad(format!(
                "'{ZSERIO_REQUEST_PART_EXTENSION}' on parameter '{}' must be a string",
                data.name
            ))
        })?
        .to_string();

    let format = lower_format(data)?;
    let explode = data.explode.unwrap_or(default_explode);

    Ok(Some(ParameterDescriptor {
        ident: data.name.clone(),
        source,
        location,
        style: default_style,
        explode,
        format,
        default_value: String::new(),
    }))
}

fn path_style(style: &PathStyle) -> Style {
    match style {
        PathStyle::Simple => Style::Simple,
        PathStyle::Label => Style::Label,
        PathStyle::Matrix => Style::Matrix,
    }
}

fn query_style(style: &QueryStyle) -> Style {
    match style {
        QueryStyle::Form => Style::Form,
        // The remaining RFC 6570 query styles (spaceDelimited, pipeDelimited,
        // deepObject) have no counterpart in this spec's Style enum; treat
        // them as Form, the only query style this crate renders.
        _ => Style::Form,
    }
}

/// Reads `schema.format`, going through a `serde_json::Value` round-trip
/// rather than matching `openapiv3`'s nested per-type schema structs, since
/// the format string lives in different places depending on the declared
/// JSON-Schema type and this crate only ever needs the flat string.
fn lower_format(data: &openapiv3::ParameterData) -> Result<Format> {
    let ParameterSchemaOrContent::Schema(schema_ref) = &data.format else {
        return Ok(Format::String);
    };
    let ReferenceOr::Item(schema) = schema_ref else {
        return Ok(Format::String);
    };

    let json = serde_json::to_value(schema)?;
    let Some(format_str) = json.get("format").and_then(|f| f.as_str()) else {
        return Ok(Format::String);
    };

    match format_str {
        "string" => Ok(Format::String),
        "byte" | "base64" => Ok(Format::Base64),
        "base64url" => Ok(Format::Base64url),
        "hex" => Ok(Format::Hex),
        "binary" => Ok(Format::Binary),
        other => Err(ClientError::SpecLoad(format!(
            "unsupported parameter schema format '{other}' on '{}'",
            data.name
        ))),
    }
}
