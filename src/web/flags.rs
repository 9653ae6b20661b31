//! Flag evaluation endpoints

use crate::error::ApiError;
use crate::middleware::ClientCtx;
use crate::orm::flag_assignments::Variant;
use crate::resolver::{variants_by_key, Resolve};
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(evaluate_flags).service(view_flag_variant);
}

#[derive(Deserialize, Validate)]
struct EvaluateRequest {
    #[validate(length(min = 1, max = 50, message = "between 1 and 50 flag keys"))]
    keys: Vec<String>,
}

#[derive(Serialize)]
struct EvaluateResponse {
    variants: BTreeMap<String, Variant>,
}

/// GET /flags/{key} - Variant of one flag for the calling user
#[get("/flags/{key}")]
async fn view_flag_variant(
    client: ClientCtx,
    resolver: web::Data<Arc<dyn Resolve>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user_id = client.require_user()?;
    let key = path.into_inner();

    let resolution = resolver.resolve(&key, user_id).await;
    log::debug!(
        "Flag '{}' resolved to {} for {} ({:?})",
        key,
        resolution.variant,
        user_id,
        resolution.reason
    );

    Ok(HttpResponse::Ok().json(resolution))
}

/// POST /flags/evaluate - Variants of several flags for the calling user
#[post("/flags/evaluate")]
async fn evaluate_flags(
    client: ClientCtx,
    resolver: web::Data<Arc<dyn Resolve>>,
    body: web::Json<EvaluateRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = client.require_user()?;
    body.validate()?;

    let mut keys = body.into_inner().keys;
    keys.sort();
    keys.dedup();

    let variants = variants_by_key(resolver.get_ref().as_ref(), &keys, user_id).await;

    Ok(HttpResponse::Ok().json(EvaluateResponse { variants }))
}
