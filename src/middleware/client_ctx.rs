use crate::error::ApiError;
use actix_web::dev::Payload;
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{web::Data, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

/// Header carrying the authenticated user's id, set by the upstream auth gateway.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Admin credentials, registered as app data.
///
/// Only the BLAKE3 digest of the token is kept; `blake3::Hash` equality is
/// constant-time.
#[derive(Clone)]
pub struct AdminAuth {
    token_hash: Option<blake3::Hash>,
}

impl AdminAuth {
    /// An empty token disables the admin surface.
    pub fn new(token: &str) -> Self {
        Self {
            token_hash: if token.is_empty() {
                None
            } else {
                Some(blake3::hash(token.as_bytes()))
            },
        }
    }

    pub fn disabled() -> Self {
        Self { token_hash: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.token_hash.is_some()
    }

    pub fn verify(&self, presented: &str) -> bool {
        match &self.token_hash {
            Some(expected) => blake3::hash(presented.as_bytes()) == *expected,
            None => false,
        }
    }
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Admin state of the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminStatus {
    /// No bearer token sent
    Absent,
    /// Token sent but did not match (or admin surface disabled)
    Rejected,
    Granted,
}

/// Client context passed to routes.
#[derive(Clone, Debug)]
pub struct ClientCtx {
    user_id: Option<Uuid>,
    admin: AdminStatus,
}

impl ClientCtx {
    pub fn from_headers(headers: &HeaderMap, auth: &AdminAuth) -> Self {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok());

        let admin = match bearer_token(headers) {
            None => AdminStatus::Absent,
            Some(token) if auth.verify(token) => AdminStatus::Granted,
            Some(_) => AdminStatus::Rejected,
        };

        Self { user_id, admin }
    }

    /// Returns either the user's id or None.
    pub fn get_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.admin == AdminStatus::Granted
    }

    /// Require a user identity. Returns user_id or Unauthorized.
    pub fn require_user(&self) -> Result<Uuid, ApiError> {
        self.user_id
            .ok_or_else(|| ApiError::Unauthorized(format!("{} header required", USER_ID_HEADER)))
    }

    /// Require admin credentials.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.admin {
            AdminStatus::Granted => Ok(()),
            AdminStatus::Absent => Err(ApiError::Unauthorized(
                "Admin credentials required".to_string(),
            )),
            AdminStatus::Rejected => Err(ApiError::Forbidden(
                "Insufficient permissions".to_string(),
            )),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// This implementation is what actually provides the `client: ClientCtx` in the parameters of route functions.
impl FromRequest for ClientCtx {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let ctx = match req.app_data::<Data<AdminAuth>>() {
            Some(auth) => ClientCtx::from_headers(req.headers(), auth),
            None => {
                log::warn!("AdminAuth is not registered; admin routes are unreachable.");
                ClientCtx::from_headers(req.headers(), &AdminAuth::disabled())
            }
        };
        ready(Ok(ctx))
    }
}
