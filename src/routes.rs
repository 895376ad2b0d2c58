use actix_web::{error, web, HttpRequest};
use crate::error::AppError;
use crate::handlers::{datastore_handlers, entry_handlers, version_handlers};
use crate::middleware::RateLimitMiddleware;

/// Malformed bodies still answer with `{ "error": ... }`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err: error::JsonPayloadError, _req: &HttpRequest| {
            AppError::BadRequest(format!("Invalid JSON body: {}", err)).into()
        })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err: error::QueryPayloadError, _req: &HttpRequest| {
        AppError::BadRequest(format!("Invalid query string: {}", err)).into()
    })
}

/// Configures the datastore routes.
/// Mounted under the "/api" scope in main.rs; the two listing resources are rate limited,
/// their handlers record a request once its parameters validated.
pub fn configure_routes(cfg: &mut web::ServiceConfig, limiter: &RateLimitMiddleware) {
    cfg.app_data(json_config()).app_data(query_config());

    // Datastore listing and creation (/api/datastores*)
    cfg.service(
        web::resource("/datastores")
            .wrap(limiter.for_endpoint("list-datastores"))
            .route(web::get().to(datastore_handlers::list_datastores))
            .route(web::post().to(datastore_handlers::list_datastores_from_body)),
    );
    cfg.service(
        web::resource("/datastores/create")
            .route(web::post().to(datastore_handlers::create_datastore)),
    );

    // Entry listing, reachable under both paths with one shared window
    cfg.service(
        web::resource(["/datastores/{name}", "/datastores/{name}/entries"])
            .wrap(limiter.for_endpoint("list-entries"))
            .route(web::get().to(entry_handlers::list_entries))
            .route(web::post().to(entry_handlers::list_entries_from_body)),
    );

    // Single entry (/api/datastores/{name}/entry*)
    cfg.service(
        web::resource("/datastores/{name}/entry")
            .route(web::get().to(entry_handlers::get_entry))
            .route(web::post().to(entry_handlers::set_entry))
            .route(web::delete().to(entry_handlers::delete_entry)),
    );
    cfg.service(
        web::resource("/datastores/{name}/entry/increment")
            .route(web::post().to(entry_handlers::increment_entry)),
    );
    cfg.service(
        web::resource("/datastores/{name}/entry/versions")
            .route(web::get().to(version_handlers::list_versions)),
    );
    cfg.service(
        web::resource("/datastores/{name}/entry/versions/version")
            .route(web::get().to(version_handlers::get_version)),
    );
}
