use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::clients::{Credentials, DatastoreApi, DatastoreListing, EntryTarget, ListDatastoresQuery, SetEntryOptions};
use crate::error::AppError;
use crate::handlers::params::MissingParams;
use crate::middleware::enforce_rate_limit;
use crate::models::{DatastoreInfo, DatastoreListResponse, SuccessResponse};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDatastoresParams {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatastoreBody {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub datastore_name: Option<String>,
}

/// Upstream may list bare names; descriptors without a creation time get "now".
fn reshape_datastores(listing: DatastoreListing) -> DatastoreListResponse {
    let now = Utc::now();
    let (datastores, next_page_cursor) = listing.into_parts();

    DatastoreListResponse {
        datastores: datastores
            .iter()
            .map(|ds| DatastoreInfo {
                name: ds.name().to_string(),
                created_time: ds.created_time().unwrap_or(now),
            })
            .collect(),
        next_page_cursor: next_page_cursor.filter(|c| !c.is_empty()),
    }
}

async fn fetch_datastores(
    api: &dyn DatastoreApi,
    credentials: Credentials,
    cursor: Option<String>,
) -> Result<HttpResponse, AppError> {
    debug!(
        "Fetching datastores for universe {} (token length {})",
        credentials.universe_id,
        credentials.api_token.len()
    );

    let query = ListDatastoresQuery { cursor, limit: 0 };
    let listing = api.list_datastores(&credentials, &query).await.map_err(|e| {
        error!("Error fetching datastores: {}", e);
        AppError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(reshape_datastores(listing)))
}

/// GET /api/datastores
pub async fn list_datastores(
    req: HttpRequest,
    query: web::Query<ListDatastoresParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id, params.api_token);
    missing.finish()?;
    enforce_rate_limit(&req)?;

    fetch_datastores(api.get_ref(), credentials, params.cursor).await
}

/// POST /api/datastores with credentials in the body
pub async fn list_datastores_from_body(
    req: HttpRequest,
    body: web::Json<ListDatastoresParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let params = body.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id, params.api_token);
    missing.finish()?;
    enforce_rate_limit(&req)?;

    fetch_datastores(api.get_ref(), credentials, params.cursor).await
}

/// POST /api/datastores/create
///
/// The upstream API has no explicit create call; a datastore comes into
/// existence with its first entry, so this writes a throwaway init entry.
pub async fn create_datastore(
    req: HttpRequest,
    body: web::Json<CreateDatastoreBody>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, body.universe_id, body.api_token);
    let datastore_name = missing.text("datastoreName", body.datastore_name);
    missing.finish()?;

    let now = Utc::now();
    let suffix = Uuid::new_v4().simple().to_string();
    let init_key = format!("__init_{}_{}", now.timestamp_millis(), &suffix[..8]);
    let target = EntryTarget::new(datastore_name, init_key, None);
    let options = SetEntryOptions {
        match_version: None,
        exclusive_create: Some(true),
    };

    api.set_entry(&credentials, &target, &json!({ "created": now.to_rfc3339() }), &options)
        .await?;

    info!("Created datastore {} via init entry {}", target.datastore_name, target.entry_key);
    Ok(HttpResponse::Ok().json(SuccessResponse::new("Datastore created successfully")))
}
