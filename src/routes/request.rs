//! Buffered request and JSON response helpers

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::types::{GrainError, Result};

pub type ApiResponse = Response<Full<Bytes>>;

/// A request whose body has already been collected
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers,
            body,
        }
    }

    /// Non-empty path segments
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Decoded query parameter; empty values count as absent
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| match pair.split_once('=') {
                Some((k, v)) => Some((k, v)),
                None if !pair.is_empty() => Some((pair, "")),
                None => None,
            })
            .find(|(k, _)| *k == key)
            .map(|(_, v)| {
                let v = v.replace('+', " ");
                urlencoding::decode(&v)
                    .map(|d| d.into_owned())
                    .unwrap_or(v)
            })
            .filter(|v| !v.is_empty())
    }

    /// Numeric query parameter
    pub fn query_u64(&self, key: &str) -> Result<Option<u64>> {
        self.query_param(key)
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    GrainError::BadRequest(format!("{} must be a non-negative integer", key))
                })
            })
            .transpose()
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(GrainError::BadRequest("Request body is required".into()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| GrainError::BadRequest(format!("Invalid request body: {}", e)))
    }

    pub fn auth_header(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

fn build(status: StatusCode, body: Bytes, with_type: bool) -> ApiResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    if with_type {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Serialize `value` as the JSON body
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_vec(value) {
        Ok(body) => build(status, Bytes::from(body), true),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            error_response(&GrainError::Internal(e.to_string()))
        }
    }
}

/// JSON error body `{ "error": ..., "code": ... }`
pub fn error_response(err: &GrainError) -> ApiResponse {
    let status = err.status_code();
    if err.is_server_error() {
        error!(code = err.code(), "{}", err);
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
        debug!(code = err.code(), "{}", err);
    } else {
        warn!(code = err.code(), "{}", err);
    }

    let body = serde_json::json!({
        "error": err.message(),
        "code": err.code(),
    });
    build(status, Bytes::from(body.to_string()), true)
}

/// CORS preflight response
pub fn preflight_response() -> ApiResponse {
    let mut response = build(StatusCode::NO_CONTENT, Bytes::new(), false);
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn request(path: &str, query: Option<&str>, body: &str) -> ApiRequest {
        ApiRequest::new(
            Method::GET,
            path,
            query,
            HeaderMap::new(),
            Bytes::from(body.to_string()),
        )
    }

    #[test]
    fn test_segments() {
        let req = request("/grain-batches/abc/predict/", None, "");
        assert_eq!(req.segments(), vec!["grain-batches", "abc", "predict"]);
        assert!(request("/", None, "").segments().is_empty());
    }

    #[test]
    fn test_query_param_decoding() {
        let req = request("/silos", Some("name=North+Bin&code=A%2F1&empty=&flag"), "");
        assert_eq!(req.query_param("name").as_deref(), Some("North Bin"));
        assert_eq!(req.query_param("code").as_deref(), Some("A/1"));
        assert_eq!(req.query_param("empty"), None);
        assert_eq!(req.query_param("flag"), None);
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn test_query_u64() {
        let req = request("/alerts", Some("page=2&limit=abc"), "");
        assert_eq!(req.query_u64("page").unwrap(), Some(2));
        assert!(req.query_u64("limit").is_err());
        assert_eq!(req.query_u64("skip").unwrap(), None);
    }

    #[test]
    fn test_json_body() {
        #[derive(serde::Deserialize, Default)]
        struct Body {
            name: String,
        }
        let req = request("/silos", None, r#"{"name":"North"}"#);
        assert_eq!(req.json::<Body>().unwrap().name, "North");
        assert!(request("/silos", None, "").json::<Body>().is_err());
        assert!(request("/silos", None, "{").json::<Body>().is_err());
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = error_response(&GrainError::LimitReached("Plan limit".into()));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "PLAN_LIMIT_REACHED");
        assert_eq!(body["error"], "Plan limit");
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let response = error_response(&GrainError::Database("conn refused 10.0.0.3".into()));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!String::from_utf8_lossy(&bytes).contains("10.0.0.3"));
    }
}
