use actix_web::http::header;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use anyhow::Context;
use env_logger::Env;
use rollout::admin::FlagAdmin;
use rollout::app_config;
use rollout::cache::AssignmentCache;
use rollout::middleware::AdminAuth;
use rollout::resolver::{AssignmentResolver, Resolve};
use rollout::rollout::ThreadRngDraw;
use rollout::store::{DbStore, FlagStore};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_lib_mods();
    app_config::init();
    let config = app_config::get_config();

    let db = rollout::db::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    if config.database.auto_migrate {
        rollout::db::create_schema(&db)
            .await
            .context("Failed to create database schema")?;
    }

    let store: Arc<dyn FlagStore> = Arc::new(DbStore::new(db));
    let cache = AssignmentCache::new(config.cache.ttl(), config.cache.max_capacity);
    let resolver: Arc<dyn Resolve> = Arc::new(AssignmentResolver::new(
        store.clone(),
        Arc::new(ThreadRngDraw),
        cache.clone(),
    ));
    let admin = Data::new(FlagAdmin::new(store, cache));
    let auth = Data::new(AdminAuth::new(&config.admin.api_token));

    if !auth.is_enabled() {
        log::warn!("ROLLOUT_ADMIN__API_TOKEN is empty; the admin surface is disabled.");
    }

    let server = HttpServer::new(move || {
        // Order of middleware IS IMPORTANT and is in REVERSE EXECUTION ORDER.
        App::new()
            .app_data(Data::new(resolver.clone()))
            .app_data(admin.clone())
            .app_data(auth.clone())
            .wrap(
                DefaultHeaders::new()
                    .add((header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
                    .add((header::CACHE_CONTROL, "no-store")),
            )
            .wrap(Logger::new("%a %r %s %Dms"))
            .configure(rollout::web::configure)
    });

    let server = if config.server.workers > 0 {
        server.workers(config.server.workers)
    } else {
        server
    };

    log::info!("Listening on {}", config.server.bind);
    server
        .bind(config.server.bind.as_str())
        .with_context(|| format!("Failed to bind {}", config.server.bind))?
        .run()
        .await?;

    Ok(())
}

/// Initialize third party crates we rely on but don't have control over.
fn init_lib_mods() {
    // A missing .env is fine; everything can come from the environment.
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
