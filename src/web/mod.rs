pub mod admin;
pub mod flags;

/// Configures the web app by adding services from each web file.
///
/// Handlers expect the following app data:
/// - `Data<AdminAuth>` for `ClientCtx`
/// - `Data<Arc<dyn Resolve>>` for evaluation routes
/// - `Data<FlagAdmin>` for admin routes
///
/// @see https://docs.rs/actix-web/4.0.1/actix_web/struct.App.html#method.configure
pub fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.app_data(crate::error::json_config());

    // Descending order. Order is important.
    // Route resolution will stop at the first match.
    flags::configure(conf);
    admin::configure(conf);
}
