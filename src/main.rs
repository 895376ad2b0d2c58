use actix_web::{web, App, HttpServer, middleware::Logger};
use actix_cors::Cors;
use dotenv::dotenv;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use datastore_console::clients::{DatastoreApi, OpenCloudClient};
use datastore_console::config::init_config;
use datastore_console::handlers;
use datastore_console::middleware::{start_memory_store_cleanup_task, RateLimitMiddleware, RateLimitStore};
use datastore_console::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match init_config() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    let datastore_api: Arc<dyn DatastoreApi> = match OpenCloudClient::new(&app_settings.upstream) {
        Ok(client) => {
            log::info!("Datastore API client initialized for {}", app_settings.upstream.base_url);
            Arc::new(client)
        }
        Err(e) => {
            log::error!("Failed to initialize datastore API client: {}", e);
            std::process::exit(1);
        }
    };

    // One store shared by every worker so limits hold across threads
    let rate_limit_store = Arc::new(RateLimitStore::new(app_settings.rate_limit.max_tracked_keys));
    let rate_limiter = RateLimitMiddleware::new(rate_limit_store.clone(), &app_settings.rate_limit);
    actix_rt::spawn(start_memory_store_cleanup_task(
        rate_limit_store,
        Duration::from_secs(app_settings.rate_limit.interval_secs),
        Duration::from_secs(app_settings.rate_limit.cleanup_interval_secs),
    ));

    let host = &app_settings.server.host;
    let port = app_settings.server.port;

    log::info!(
        "Starting {} ({}) at http://{}:{}",
        app_settings.app.name,
        app_settings.app.environment,
        host,
        port
    );

    let server_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(server_addr)?;

    HttpServer::new(move || {
        let app_settings = app_settings.clone();
        let rate_limiter = rate_limiter.clone();

        // Configure CORS using actix-cors
        let mut cors = Cors::default();
        if app_settings.server.cors_origins.contains(&"*".to_string()) {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors
            .allow_any_method()
            .allow_any_header()
            .expose_headers(["X-RateLimit-Limit", "X-RateLimit-Remaining", "X-RateLimit-Reset"]);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(app_settings.app.clone()))
            .app_data(web::Data::from(datastore_api.clone()))
            .service(
                web::resource("/health")
                    .route(web::get().to(handlers::health::health_check))
            )
            .service(
                web::scope("/api")
                    .configure(|cfg| configure_routes(cfg, &rate_limiter))
            )
    })
    .listen(listener)?
    .run()
    .await
}
