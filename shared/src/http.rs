//! HTTP helpers for Lambda functions.

use lambda_http::request::RequestContext;
use lambda_http::{Body, Request, RequestExt, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

static CORS_ORIGIN: OnceLock<String> = OnceLock::new();

/// Set the Access-Control-Allow-Origin value used by every response.
///
/// Only the first call has an effect; unset means `*`.
pub fn init_cors_origin(origin: &str) {
    let _ = CORS_ORIGIN.set(origin.to_string());
}

fn cors_origin() -> &'static str {
    CORS_ORIGIN.get().map(String::as_str).unwrap_or("*")
}

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn builder(status: u16) -> lambda_http::http::response::Builder {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", cors_origin())
        .header("X-Content-Type-Options", "nosniff")
        .header("X-Frame-Options", "DENY")
        .header("Referrer-Policy", "strict-origin-when-cross-origin")
        .header("Strict-Transport-Security", "max-age=31536000; includeSubDomains")
}

/// Create a JSON response with the given status code and body.
pub fn json_response<T: Serialize>(status: u16, body: &T) -> Result<Response<Body>> {
    let json = serde_json::to_string(body)?;
    builder(status)
        .header("Content-Type", "application/json")
        .body(Body::from(json))
        .map_err(|e| Error::Internal(format!("Failed to build response: {}", e)))
}

/// Wrap `data` in a successful envelope.
pub fn success<T: Serialize>(status: u16, data: T) -> Result<Response<Body>> {
    json_response(status, &ApiResponse::success(data))
}

/// Empty 204 response.
pub fn no_content() -> Result<Response<Body>> {
    builder(204)
        .body(Body::Empty)
        .map_err(|e| Error::Internal(format!("Failed to build response: {}", e)))
}

/// Create an error response with the given status code and message.
pub fn error_response(
    status: u16,
    message: impl Into<String>,
) -> std::result::Result<Response<Body>, lambda_http::Error> {
    let json = serde_json::to_string(&ApiResponse::<()>::error(message))?;
    Ok(builder(status)
        .header("Content-Type", "application/json")
        .body(Body::from(json))?)
}

/// Render an [`Error`] as an envelope response.
pub fn error_to_response(err: &Error) -> std::result::Result<Response<Body>, lambda_http::Error> {
    let mut response = error_response(err.status_code(), err.client_message())?;
    if let Error::RateLimited { retry_after_secs } = err {
        response.headers_mut().insert(
            "Retry-After",
            lambda_http::http::HeaderValue::from(*retry_after_secs),
        );
    }
    Ok(response)
}

/// Method, path and start time of one request, logged again when it completes.
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub method: String,
    pub path: String,
    started: Instant,
}

impl RequestLog {
    pub fn start(event: &Request) -> Self {
        Self {
            method: event.method().as_str().to_string(),
            path: normalized_path(event),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Convert a handler result into the Lambda response, logging status and latency.
    pub fn finish(
        &self,
        result: Result<Response<Body>>,
    ) -> std::result::Result<Response<Body>, lambda_http::Error> {
        let duration_ms = self.elapsed_ms();
        let (method, path) = (self.method.as_str(), self.path.as_str());

        match result {
            Ok(response) => {
                info!(
                    method,
                    path,
                    status = response.status().as_u16(),
                    duration_ms,
                    "Request completed"
                );
                Ok(response)
            }
            Err(err) => {
                let status = err.status_code();
                if err.is_server_error() {
                    error!(method, path, status, duration_ms, error = %err, "Request failed");
                } else {
                    warn!(
                        method,
                        path,
                        status,
                        duration_ms,
                        "Request rejected: {}",
                        err.client_message()
                    );
                }
                error_to_response(&err)
            }
        }
    }
}

/// Parse request body as JSON. An empty body parses as `{}`.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<T> {
    let bytes: &[u8] = body.as_ref();
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        bytes
    };
    serde_json::from_slice(bytes).map_err(|e| Error::Validation(format!("Invalid request body: {}", e)))
}

/// Parse and validate a request body, returning early with 400 on failure.
///
/// Usage:
/// ```ignore
/// let request = parse_body!(event.body(), RegisterRequest, normalized);
/// let refresh = parse_body!(event.body(), RefreshRequest);
/// ```
#[macro_export]
macro_rules! parse_body {
    ($body:expr, $ty:ty, normalized) => {{
        let parsed: $ty = $crate::http::parse_json_body::<$ty>($body)?.normalized();
        ::validator::Validate::validate(&parsed)?;
        parsed
    }};
    ($body:expr, $ty:ty) => {{
        let parsed: $ty = $crate::http::parse_json_body($body)?;
        ::validator::Validate::validate(&parsed)?;
        parsed
    }};
}

/// Parse a path segment as a UUID.
pub fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| Error::Validation(format!("Invalid {}", what)))
}

/// Request path without trailing slashes.
pub fn normalized_path(event: &Request) -> String {
    let path = event.uri().path().trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Non-empty path segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Bearer token from the Authorization header, if any.
pub fn bearer_token(event: &Request) -> Option<&str> {
    let value = event.headers().get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Client IP used for throttling.
///
/// The source IP API Gateway recorded wins. Callers can prepend anything to
/// X-Forwarded-For, so only its last hop is used, and only without a request context.
pub fn client_ip(event: &Request) -> String {
    let source_ip = match event.request_context_ref() {
        Some(RequestContext::ApiGatewayV2(ctx)) => ctx.http.source_ip.clone(),
        Some(RequestContext::ApiGatewayV1(ctx)) => ctx.identity.source_ip.clone(),
        _ => None,
    };

    source_ip
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            event
                .headers()
                .get("x-forwarded-for")?
                .to_str()
                .ok()?
                .rsplit(',')
                .map(str::trim)
                .find(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// First value of a query string parameter.
pub fn query_param(event: &Request, key: &str) -> Option<String> {
    event
        .query_string_parameters()
        .first(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Page/limit pair from the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    /// Parse raw values; missing or malformed values fall back to defaults.
    pub fn from_params(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let limit = limit
            .and_then(|l| l.trim().parse::<u32>().ok())
            .filter(|l| *l >= 1)
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT);
        Self { page, limit }
    }

    pub fn from_request(event: &Request) -> Self {
        Self::from_params(
            query_param(event, "page").as_deref(),
            query_param(event, "limit").as_deref(),
        )
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }
}
