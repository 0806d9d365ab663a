//! JSON request/response surface.
//!
//! Each function takes the raw request body, drives the resolver and returns
//! the status code and JSON body a web layer should send. Routing, CORS and
//! the listener itself are left to the embedding server.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::error::{ContactError, ExecutionError, ValidationError};
use crate::resolver::IdentityResolver;

/// Largest accepted request body.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Status code and JSON body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl ApiResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// True for 2xx responses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body of an identify request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    /// Submitted email, if any.
    #[serde(default)]
    pub email: Option<String>,
    /// Submitted phone number, if any.
    #[serde(default)]
    pub phone_number: Option<PhoneNumber>,
}

/// `phoneNumber` as clients send it: a string or a bare number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PhoneNumber {
    /// `"123456"`
    Text(String),
    /// `123456`
    Number(serde_json::Number),
}

impl PhoneNumber {
    /// The value as submitted, numbers rendered in decimal.
    ///
    /// # Errors
    /// Returns `MalformedRequest` for a number that is not an integer
    /// representable as `i64` or `u64`; its text form would not be the
    /// digits the client sent.
    pub fn into_string(self) -> Result<String, ValidationError> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Number(n) => n
                .as_u64()
                .map(|v| v.to_string())
                .or_else(|| n.as_i64().map(|v| v.to_string()))
                .ok_or_else(|| {
                    malformed(format!(
                        "phoneNumber must be a string or an integer (got {n})"
                    ))
                }),
        }
    }
}

/// `POST /identify`: `201 {"contact": view}`.
#[must_use]
pub fn identify(resolver: &IdentityResolver, body: &[u8]) -> ApiResponse {
    const CONTEXT: &str = "Error identifying contact";

    let request = match parse_identify(body) {
        Ok(r) => r,
        Err(e) => return error_response(CONTEXT, &ContactError::from(e)),
    };
    let phone_number = match request.phone_number.map(PhoneNumber::into_string).transpose() {
        Ok(p) => p,
        Err(e) => return error_response(CONTEXT, &ContactError::from(e)),
    };

    match resolver.identify(request.email.as_deref(), phone_number.as_deref()) {
        Ok(view) => match serde_json::to_value(&view) {
            Ok(view) => ApiResponse::new(201, json!({ "contact": view })),
            Err(e) => error_response(CONTEXT, &serialize_err(&e)),
        },
        Err(e) => error_response(CONTEXT, &e),
    }
}

/// `GET /contacts`: `200` with every record.
#[must_use]
pub fn list_contacts(resolver: &IdentityResolver) -> ApiResponse {
    const CONTEXT: &str = "Error fetching contacts";

    match resolver.list_all() {
        Ok(contacts) => match serde_json::to_value(&contacts) {
            Ok(body) => ApiResponse::new(200, body),
            Err(e) => error_response(CONTEXT, &serialize_err(&e)),
        },
        Err(e) => error_response(CONTEXT, &e),
    }
}

/// `DELETE /contacts`: `200 {"count": n}`.
#[must_use]
pub fn clear_contacts(resolver: &IdentityResolver) -> ApiResponse {
    const CONTEXT: &str = "Error deleting contacts";

    match resolver.clear_all() {
        Ok(count) => ApiResponse::new(200, json!({ "count": count })),
        Err(e) => error_response(CONTEXT, &e),
    }
}

fn parse_identify(body: &[u8]) -> Result<IdentifyRequest, ValidationError> {
    if body.len() > MAX_REQUEST_BYTES {
        return Err(malformed(format!(
            "body exceeds maximum size of {MAX_REQUEST_BYTES} bytes"
        )));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(IdentifyRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| malformed(format!("invalid JSON: {e}")))
}

fn malformed(reason: String) -> ValidationError {
    ValidationError::MalformedRequest { reason }
}

fn serialize_err(e: &serde_json::Error) -> ContactError {
    ContactError::internal(format!("failed to serialize response: {e}"))
}

/// Status code for an error.
#[must_use]
pub fn status_for(err: &ContactError) -> u16 {
    match err {
        ContactError::Validation(_) => 400,
        ContactError::Execution(e) => match e {
            ExecutionError::ContactNotFound { .. }
            | ExecutionError::LockTimeout { .. }
            | ExecutionError::CommitConflict { .. }
            | ExecutionError::Timeout { .. }
            | ExecutionError::QueueFull { .. } => 409,
            ExecutionError::Disconnected { .. } => 500,
        },
        ContactError::Storage(_) | ContactError::Internal { .. } => 500,
    }
}

fn error_response(context: &str, err: &ContactError) -> ApiResponse {
    let status = status_for(err);
    if status >= 500 {
        error!(status, error = %err, "{context}");
    } else {
        warn!(status, error = %err, "{context}");
    }
    ApiResponse::new(
        status,
        json!({ "error": context, "details": err.to_string() }),
    )
}
