/// Flag administration endpoints
///
/// Every route requires admin credentials (see `ClientCtx::require_admin`).
use crate::admin::FlagAdmin;
use crate::error::{field_error, ApiError};
use crate::middleware::ClientCtx;
use crate::rollout::RolloutPercentage;
use crate::store::NewFlag;
use actix_web::{delete, get, patch, post, web, HttpResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lowercase slug: letters, digits, `-` and `_`, not starting with a separator.
static FLAG_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("flag key pattern is valid"));

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_flags)
        .service(create_flag)
        .service(view_flag)
        .service(toggle_flag)
        .service(update_rollout)
        .service(reset_assignments)
        .service(delete_flag);
}

#[derive(Deserialize, Validate)]
struct CreateFlagForm {
    #[validate(
        length(min = 1, max = 64, message = "must be 1 to 64 characters"),
        regex(
            path = "FLAG_KEY_RE",
            message = "lowercase letters, digits, '-' and '_' only"
        )
    )]
    key: String,
    #[validate(length(max = 500, message = "at most 500 characters"))]
    description: Option<String>,
    #[serde(default)]
    enabled: bool,
    #[serde(default, deserialize_with = "percentage_field")]
    #[validate(range(min = 0, max = 100, message = "must be between 0 and 100"))]
    rollout_percentage: i32,
}

#[derive(Deserialize, Validate)]
struct UpdateRolloutForm {
    #[serde(deserialize_with = "percentage_field")]
    #[validate(range(min = 0, max = 100, message = "must be between 0 and 100"))]
    rollout_percentage: i32,
}

/// Integer `rollout_percentage`. Strings, fractions and out-of-range numbers
/// are reported against the field; the 0..=100 check is left to `validate`.
fn percentage_field<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)
        .map_err(|_| field_error("rollout_percentage", "must be a whole number"))?;
    i32::try_from(value)
        .map_err(|_| field_error("rollout_percentage", "must be between 0 and 100"))
}

#[derive(Deserialize)]
struct ResetForm {
    #[serde(default)]
    confirm_key: String,
}

#[derive(Serialize)]
struct ResetResponse {
    deleted: u64,
}

/// GET /admin/flags - All flags with live assignment counts
#[get("/admin/flags")]
async fn view_flags(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;
    Ok(HttpResponse::Ok().json(admin.list_flags().await?))
}

/// POST /admin/flags - Register a flag
#[post("/admin/flags")]
async fn create_flag(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
    form: web::Json<CreateFlagForm>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;
    form.validate()?;

    let form = form.into_inner();
    let flag = admin
        .create_flag(NewFlag {
            key: form.key,
            description: form.description.filter(|d| !d.trim().is_empty()),
            enabled: form.enabled,
            rollout_percentage: RolloutPercentage::from(form.rollout_percentage),
        })
        .await?;

    Ok(HttpResponse::Created().json(flag))
}

/// GET /admin/flags/{id} - One flag with live assignment counts
#[get("/admin/flags/{id}")]
async fn view_flag(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;
    Ok(HttpResponse::Ok().json(admin.get_flag(path.into_inner()).await?))
}

/// POST /admin/flags/{id}/toggle - Flip enabled
#[post("/admin/flags/{id}/toggle")]
async fn toggle_flag(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;
    Ok(HttpResponse::Ok().json(admin.toggle_enabled(path.into_inner()).await?))
}

/// PATCH /admin/flags/{id}/rollout - Change rollout percentage
#[patch("/admin/flags/{id}/rollout")]
async fn update_rollout(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
    path: web::Path<i32>,
    form: web::Json<UpdateRolloutForm>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;
    form.validate()?;

    let flag = admin
        .update_percentage(path.into_inner(), form.rollout_percentage as i64)
        .await?;
    Ok(HttpResponse::Ok().json(flag))
}

/// POST /admin/flags/{id}/reset - Delete all assignments (confirm with the flag key)
#[post("/admin/flags/{id}/reset")]
async fn reset_assignments(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
    path: web::Path<i32>,
    form: web::Json<ResetForm>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;

    let deleted = admin
        .reset_assignments(path.into_inner(), &form.confirm_key)
        .await?;
    Ok(HttpResponse::Ok().json(ResetResponse { deleted }))
}

/// DELETE /admin/flags/{id} - Remove a flag and its assignments
#[delete("/admin/flags/{id}")]
async fn delete_flag(
    client: ClientCtx,
    admin: web::Data<FlagAdmin>,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    client.require_admin()?;
    admin.delete_flag(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
