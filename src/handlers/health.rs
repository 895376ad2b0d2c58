use actix_web::{web, HttpResponse, Responder};
use serde::{Serialize, Deserialize};

use crate::config::settings::AppConfig;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    name: String,
    version: String,
}

pub async fn health_check(app: web::Data<AppConfig>) -> impl Responder {
    // Public endpoint, never touches the datastore API
    let response = HealthResponse {
        status: "ok".to_string(),
        name: app.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    HttpResponse::Ok().json(response)
}
