//! HTTP-facing error type.
//!
//! Every handler returns `Result<_, ApiError>`; the body is always JSON:
//! `{ "error": "...", "fields": { "field": ["message", ...] } }` where `fields`
//! only appears for validation failures.

use crate::store::StoreError;
use actix_web::error::JsonPayloadError;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use validator::ValidationErrors;

/// Field name reported for bodies that are not valid JSON at all.
pub const BODY_FIELD: &str = "body";

static MISSING_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^missing field `([^`]+)`").expect("missing field pattern is valid"));

/// `field: message`, as raised by `field_error`, with serde_json's position suffix.
static FIELD_MESSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z_]+): (.+?)(?: at line \d+ column \d+)?$")
        .expect("field message pattern is valid")
});

/// Field name -> messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug)]
pub enum ApiError {
    /// Unknown flag id
    NotFound(String),
    /// Input rejected before any write
    Validation(FieldErrors),
    /// Duplicate flag key
    Conflict(String),
    /// Database unreachable or query failed
    Persistence(String),
    /// No identity (or no admin credentials) on the request
    Unauthorized(String),
    /// Credentials present but not sufficient
    Forbidden(String),
}

impl ApiError {
    /// Validation error on a single field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.into()]);
        ApiError::Validation(fields)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "{}", msg),
            ApiError::Validation(fields) => {
                write!(f, "Validation failed")?;
                for (field, messages) in fields {
                    write!(f, "; {}: {}", field, messages.join(", "))?;
                }
                Ok(())
            }
            ApiError::Conflict(msg) => write!(f, "{}", msg),
            ApiError::Persistence(_) => write!(f, "Database error, please try again"),
            ApiError::Unauthorized(msg) => write!(f, "{}", msg),
            ApiError::Forbidden(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::DuplicateKey(_) => ApiError::Conflict(e.to_string()),
            StoreError::Database(msg) => {
                log::error!("Persistence failure: {}", msg);
                ApiError::Persistence(msg)
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| match &e.message {
                        Some(message) => message.to_string(),
                        None => format!("invalid ({})", e.code),
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        ApiError::Validation(fields)
    }
}

/// Deserializer error attributed to `field`; request bodies that fail with it
/// are reported under that field name.
pub fn field_error<E: serde::de::Error>(field: &str, message: &str) -> E {
    E::custom(format!("{}: {}", field, message))
}

impl From<JsonPayloadError> for ApiError {
    fn from(e: JsonPayloadError) -> Self {
        let message = match e {
            JsonPayloadError::Deserialize(e) => e.to_string(),
            other => return ApiError::field(BODY_FIELD, other.to_string()),
        };
        if let Some(caps) = MISSING_FIELD_RE.captures(&message) {
            return ApiError::field(&caps[1], "is required");
        }
        if let Some(caps) = FIELD_MESSAGE_RE.captures(&message) {
            return ApiError::field(&caps[1], &caps[2]);
        }
        ApiError::field(BODY_FIELD, message)
    }
}

/// JSON extractor settings: malformed bodies become `ApiError::Validation`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|e, _req| ApiError::from(e).into())
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let fields = match self {
            ApiError::Validation(fields) => Some(fields),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            fields,
        })
    }
}
