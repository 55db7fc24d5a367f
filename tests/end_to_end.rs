//! End-to-end scenarios against a real `reqwest` transport and a `wiremock`
//! server standing in for both the resource endpoint and the OAuth2 token
//! endpoint — covering spec.md §8's "End-to-end scenarios".

use std::collections::BTreeMap;

use wiremock::matchers::{body_string, header, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use zswag_client::engine::Engine;
use zswag_client::keychain::InMemorySecretStore;
use zswag_client::param::Str;
use zswag_client::parser::parse_spec;
use zswag_client::reflect::{Introspectable, Value};
use zswag_client::settings::{
    HttpConfig, OAuth2Settings, SettingsStore, TokenEndpointAuth, TokenEndpointAuthMethod,
};
use zswag_client::transport::ReqwestTransport;

/// Matches a request whose raw (not percent-decoded) query string is exactly
/// `expected` — `wiremock::matchers::query_param` compares decoded values, so
/// it can't tell apart two different percent-escapings of the same pair.
struct RawQuery {
    expected: &'static str,
}

impl wiremock::Match for RawQuery {
    fn matches(&self, request: &Request) -> bool {
        request.url.query() == Some(self.expected)
    }
}

struct FakeRequest {
    fields: BTreeMap<String, Value>,
    whole: Vec<u8>,
}

impl FakeRequest {
    fn new() -> Self {
        FakeRequest { fields: BTreeMap::new(), whole: Vec::new() }
    }

    fn with_str(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), Value::Str(Str(value.to_string())));
        self
    }

    fn with_str_array(mut self, key: &str, values: &[&str]) -> Self {
        self.fields.insert(
            key.to_string(),
            Value::StrArray(values.iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    fn with_whole(mut self, bytes: &[u8]) -> Self {
        self.whole = bytes.to_vec();
        self
    }
}

impl Introspectable for FakeRequest {
    fn resolve_field(&self, path: &str) -> Option<Value> {
        self.fields.get(path).cloned()
    }

    fn serialize_whole(&self) -> Vec<u8> {
        self.whole.clone()
    }
}

fn spec_json(servers_url: &str, paths_json: &str) -> String {
    format!(
        r#"{{
            "openapi": "3.0.0",
            "info": {{ "title": "t", "version": "1" }},
            "servers": [{{ "url": "{servers_url}" }}],
            "paths": {paths_json}
        }}"#
    )
}

#[tokio::test]
async fn simple_get_with_path_and_query_styles() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/multi/single/{simple}/{label}/{matrix}": {
                "get": {
                    "operationId": "multiSingle",
                    "parameters": [
                        { "name": "simple", "in": "path", "required": true, "style": "simple", "explode": false, "x-zserio-request-part": "str", "schema": { "type": "string" } },
                        { "name": "label", "in": "path", "required": true, "style": "label", "explode": false, "x-zserio-request-part": "str", "schema": { "type": "string" } },
                        { "name": "matrix", "in": "path", "required": true, "style": "matrix", "explode": true, "x-zserio-request-part": "str", "schema": { "type": "string" } }
                    ],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );

    Mock::given(method("GET"))
        .and(path("/multi/single/hello/.hello/;matrix=hello"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new().with_str("str", "hello");

    let body = engine
        .call("multiSingle", &request, &HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn array_path_serialization() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/array/{simple}/{label}/{matrix-arr}": {
                "get": {
                    "operationId": "arraySingle",
                    "parameters": [
                        { "name": "simple", "in": "path", "required": true, "style": "simple", "explode": false, "x-zserio-request-part": "strArray", "schema": { "type": "array", "items": { "type": "string" } } },
                        { "name": "label", "in": "path", "required": true, "style": "label", "explode": false, "x-zserio-request-part": "strArray", "schema": { "type": "array", "items": { "type": "string" } } },
                        { "name": "matrix-arr", "in": "path", "required": true, "style": "matrix", "explode": true, "x-zserio-request-part": "strArray", "schema": { "type": "array", "items": { "type": "string" } } }
                    ],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );

    Mock::given(method("GET"))
        .and(path("/array/a,b,c/.a,b,c/;matrix-arr=a;matrix-arr=b;matrix-arr=c"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new().with_str_array("strArray", &["a", "b", "c"]);

    engine.call("arraySingle", &request, &HttpConfig::default()).await.unwrap();
}

#[tokio::test]
async fn query_encoding_of_special_characters() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/search": {
                "get": {
                    "operationId": "search",
                    "parameters": [],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );

    // Decoded-value matchers (wiremock can't tell uppercase- from
    // lowercase-hex escaping apart) plus a raw-query matcher that pins the
    // exact lowercase-hex wire bytes §4.2/§8 require.
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("key<1>", "value&special"))
        .and(query_param("key#2", "value=test"))
        .and(RawQuery { expected: "key%3c1%3e=value&special&key%232=value=test" })
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new();

    let mut ad_hoc = HttpConfig::default();
    ad_hoc.query.push(("key<1>".to_string(), "value&special".to_string()));
    ad_hoc.query.push(("key#2".to_string(), "value=test".to_string()));

    engine.call("search", &request, &ad_hoc).await.unwrap();
}

#[tokio::test]
async fn oauth2_stale_token_with_refresh_token_refreshes_instead_of_reminting() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/protected": {
                "get": {
                    "operationId": "getProtected",
                    "parameters": [],
                    "security": [{ "oauth2ClientCreds": [] }],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );
    let spec = inject_oauth2_scheme(&spec, &format!("{}/token", server.uri()));

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-initial",
            "expires_in": 1,
            "refresh_token": "refresh-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(body_string("grant_type=refresh_token&refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-refreshed",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("authorization", "Bearer tok-initial"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("authorization", "Bearer tok-refreshed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new();

    let mut ad_hoc = HttpConfig::default();
    ad_hoc.oauth2 = Some(OAuth2Settings {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        refresh_url_override: format!("{}/refresh", server.uri()),
        ..Default::default()
    });

    // First call mints (expiry 1s, past the 30s slack, so it's already
    // stale the moment it's cached); sleep past it, then the second call
    // must refresh exactly once rather than minting again.
    engine.call("getProtected", &request, &ad_hoc).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    engine.call("getProtected", &request, &ad_hoc).await.unwrap();
}

#[tokio::test]
async fn oauth1_hmac_sha256_signature_token_endpoint_auth() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/protected": {
                "get": {
                    "operationId": "getProtected",
                    "parameters": [],
                    "security": [{ "oauth2ClientCreds": [] }],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );
    let spec = inject_oauth2_scheme(&spec, &format!("{}/token", server.uri()));

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header_regex("authorization", "^OAuth "))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-oauth1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("authorization", "Bearer tok-oauth1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new();

    let mut ad_hoc = HttpConfig::default();
    ad_hoc.oauth2 = Some(OAuth2Settings {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        token_endpoint_auth: TokenEndpointAuth {
            method: TokenEndpointAuthMethod::Oauth1HmacSha256Signature,
            nonce_length: 16,
        },
        ..Default::default()
    });

    engine.call("getProtected", &request, &ad_hoc).await.unwrap();
}

#[tokio::test]
async fn post_with_whole_request_body() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/post/{id}": {
                "post": {
                    "operationId": "postItem",
                    "parameters": [
                        { "name": "id", "in": "path", "required": true, "x-zserio-request-part": "str", "schema": { "type": "string" } }
                    ],
                    "requestBody": {
                        "content": { "application/x-zserio-object": {} }
                    },
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );

    Mock::given(method("POST"))
        .and(path("/post/hello"))
        .and(header("content-type", "application/x-zserio-object"))
        .and(body_string("hello-request-bytes"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new()
        .with_str("str", "hello")
        .with_whole(b"hello-request-bytes");

    engine.call("postItem", &request, &HttpConfig::default()).await.unwrap();
}

#[tokio::test]
async fn oauth2_cache_hit_mints_token_exactly_once() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        &format!(
            r#"{{
                "/protected": {{
                    "get": {{
                        "operationId": "getProtected",
                        "parameters": [],
                        "security": [{{ "oauth2ClientCreds": [] }}],
                        "responses": {{ "200": {{ "description": "ok" }} }}
                    }}
                }}
            }}"#
        ),
    );
    let spec = inject_oauth2_scheme(&spec, &format!("{}/token", server.uri()));

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new();

    let mut ad_hoc = HttpConfig::default();
    ad_hoc.oauth2 = Some(OAuth2Settings {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        ..Default::default()
    });

    engine.call("getProtected", &request, &ad_hoc).await.unwrap();
    engine.call("getProtected", &request, &ad_hoc).await.unwrap();
}

#[tokio::test]
async fn auth_alternatives_prefers_already_satisfied_api_key_over_oauth2() {
    let server = MockServer::start().await;

    let spec = spec_json(
        &server.uri(),
        r#"{
            "/protected": {
                "get": {
                    "operationId": "getProtected",
                    "parameters": [],
                    "security": [{ "oauth2ClientCreds": [] }, { "apiKeyAuth": [] }],
                    "responses": { "200": { "description": "ok" } }
                }
            }
        }"#,
    );
    let spec = inject_oauth2_and_api_key_schemes(&spec, &format!("{}/token", server.uri()));

    // No token-endpoint mock registered at all: if the engine tried OAuth2
    // first and it failed over to api-key, fine; if it issued a token POST
    // wiremock would 404 it (no mock matches) and the call would error,
    // which the assertion below would catch via `.unwrap()`.
    Mock::given(method("GET"))
        .and(path("/protected"))
        .and(header("x-api-key", "secret-value"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = build_engine(&spec).await;
    let request = FakeRequest::new();

    let mut ad_hoc = HttpConfig::default();
    ad_hoc.api_key = Some("secret-value".to_string());

    engine.call("getProtected", &request, &ad_hoc).await.unwrap();
}

fn inject_oauth2_scheme(spec: &str, token_url: &str) -> String {
    let mut doc: serde_json::Value = serde_json::from_str(spec).unwrap();
    doc["components"] = serde_json::json!({
        "securitySchemes": {
            "oauth2ClientCreds": {
                "type": "oauth2",
                "flows": {
                    "clientCredentials": {
                        "tokenUrl": token_url,
                        "scopes": {}
                    }
                }
            }
        }
    });
    serde_json::to_string(&doc).unwrap()
}

fn inject_oauth2_and_api_key_schemes(spec: &str, token_url: &str) -> String {
    let mut doc: serde_json::Value = serde_json::from_str(spec).unwrap();
    doc["components"] = serde_json::json!({
        "securitySchemes": {
            "oauth2ClientCreds": {
                "type": "oauth2",
                "flows": {
                    "clientCredentials": {
                        "tokenUrl": token_url,
                        "scopes": {}
                    }
                }
            },
            "apiKeyAuth": {
                "type": "apiKey",
                "in": "header",
                "name": "x-api-key"
            }
        }
    });
    serde_json::to_string(&doc).unwrap()
}

async fn build_engine(spec_content: &str) -> Engine {
    let spec = parse_spec(spec_content).unwrap();
    let settings = SettingsStore::new(None).unwrap();
    let transport = Box::new(ReqwestTransport::new().unwrap());
    let keychain = Box::new(InMemorySecretStore::new());
    Engine::new(spec, settings, transport, keychain, 0).unwrap()
}
