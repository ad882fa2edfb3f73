//! Test helper functions for API integration tests
//!
//! Request builders, response readers and environment guards.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

/// Default client address for requests built here
pub const CLIENT_IP: &str = "203.0.113.10";

/// Temporarily set environment variables for the duration of a test
///
/// Variables listed in `removed` are unset; everything is restored on drop.
pub struct EnvGuard {
    original: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new(vars: &HashMap<String, String>, removed: &[&str]) -> Self {
        let mut original = HashMap::new();

        for (key, value) in vars {
            original.insert(key.clone(), std::env::var(key).ok());
            std::env::set_var(key, value);
        }
        for key in removed {
            original
                .entry(key.to_string())
                .or_insert_with(|| std::env::var(key).ok());
            std::env::remove_var(key);
        }

        Self { original }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.original {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

/// Request builder with the client address already set
pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    request_from(CLIENT_IP, method, uri)
}

pub fn request_from(ip: &str, method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip)
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri).body(Body::empty()).unwrap()
}

/// GET with a bearer token
pub fn get_authed(uri: &str, token: &str) -> Request<Body> {
    request(Method::GET, uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// JSON request from `ip`
pub fn json_from(ip: &str, method: Method, uri: &str, body: &Value) -> Request<Body> {
    request_from(ip, method, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Mark `request` as arriving on a socket from `peer` (e.g. "127.0.0.1:40000")
pub fn with_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn json(method: Method, uri: &str, body: &Value) -> Request<Body> {
    json_from(CLIENT_IP, method, uri, body)
}

/// Bodiless request with a bearer token
pub fn authed(method: Method, uri: &str, token: &str) -> Request<Body> {
    request(method, uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Header value as a string, if present
pub fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Log in through the API and return the `data` object
pub async fn login_from(app: &Router, ip: &str, email: &str, password: &str) -> (u16, Value) {
    let response = send(
        app,
        json_from(
            ip,
            Method::POST,
            "/api/v1/auth/login",
            &serde_json::json!({ "email": email, "password": password }),
        ),
    )
    .await;
    let status = response.status().as_u16();
    (status, body_json(response).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_guard_sets_and_restores() {
        let key = "LINKHOARD_TEST_ENV_GUARD_VAR";
        std::env::remove_var(key);

        {
            let vars = HashMap::from([(key.to_string(), "test_value".to_string())]);
            let _guard = EnvGuard::new(&vars, &[]);
            assert_eq!(std::env::var(key).unwrap(), "test_value");
        }

        assert!(std::env::var(key).is_err());
    }
}
