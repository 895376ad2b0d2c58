use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::Value;

use crate::clients::models::MAX_PAGE_SIZE;
use crate::clients::{Credentials, DatastoreApi, EntryTarget, ListEntriesQuery, SetEntryOptions};
use crate::error::AppError;
use crate::handlers::params::{non_empty, not_found_or, MissingParams};
use crate::middleware::enforce_rate_limit;
use crate::models::{EntryListResponse, SuccessResponse};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntriesParams {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub prefix: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// Query of the single-entry routes (get and delete).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryParams {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub entry_key: Option<String>,
    pub scope: Option<String>,
}

/// Credentials may sit in the query string or the body of a write.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialParams {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEntryBody {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub entry_key: Option<String>,
    /// `Some(None)` is an explicit JSON null, which is a valid value to store.
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub value: Option<Option<Value>>,
    pub scope: Option<String>,
    pub match_version: Option<String>,
    pub exclusive_create: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementEntryBody {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub entry_key: Option<String>,
    pub increment_by: Option<i64>,
    pub scope: Option<String>,
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

async fn fetch_entries(
    api: &dyn DatastoreApi,
    credentials: Credentials,
    datastore_name: String,
    params: ListEntriesParams,
) -> Result<HttpResponse, AppError> {
    // A search term replaces the prefix filter.
    let prefix = non_empty(params.search).or(non_empty(params.prefix));
    let query = ListEntriesQuery {
        datastore_name,
        prefix,
        cursor: non_empty(params.cursor),
        limit: clamp_limit(params.limit),
    };

    debug!(
        "Listing entries of {} (prefix: {:?}, cursor present: {})",
        query.datastore_name,
        query.prefix,
        query.cursor.is_some()
    );

    let listing = api.list_entries(&credentials, &query).await.map_err(|e| {
        error!("Error listing entries of {}: {}", query.datastore_name, e);
        AppError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(EntryListResponse {
        keys: listing.keys,
        next_page_cursor: listing.next_page_cursor.unwrap_or_default(),
    }))
}

/// GET /api/datastores/{name}/entries
pub async fn list_entries(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<ListEntriesParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let mut params = query.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id.take(), params.api_token.take());
    missing.finish()?;
    enforce_rate_limit(&req)?;

    fetch_entries(api.get_ref(), credentials, path.into_inner(), params).await
}

/// POST /api/datastores/{name}/entries with parameters in the body
pub async fn list_entries_from_body(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<ListEntriesParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let mut params = body.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id.take(), params.api_token.take());
    missing.finish()?;
    enforce_rate_limit(&req)?;

    fetch_entries(api.get_ref(), credentials, path.into_inner(), params).await
}

/// GET /api/datastores/{name}/entry
pub async fn get_entry(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<EntryParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id, params.api_token);
    let entry_key = missing.text("entryKey", params.entry_key);
    missing.finish()?;

    let target = EntryTarget::new(path.into_inner(), entry_key, params.scope);
    let value = api
        .get_entry(&credentials, &target)
        .await
        .map_err(|e| not_found_or(e, "Entry not found"))?;

    Ok(HttpResponse::Ok().json(value))
}

/// POST /api/datastores/{name}/entry
pub async fn set_entry(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<CredentialParams>,
    body: web::Json<SetEntryBody>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let body = body.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(
        &req,
        non_empty(body.universe_id).or(non_empty(query.universe_id)),
        non_empty(body.api_token).or(non_empty(query.api_token)),
    );
    let entry_key = missing.text("entryKey", body.entry_key);
    let value = missing.present("value", body.value);
    missing.finish()?;

    let value = value.flatten().unwrap_or(Value::Null);
    let target = EntryTarget::new(path.into_inner(), entry_key, body.scope);
    let options = SetEntryOptions {
        match_version: non_empty(body.match_version),
        exclusive_create: body.exclusive_create,
    };

    let version = api.set_entry(&credentials, &target, &value, &options).await.map_err(|e| {
        error!("Error saving entry {} in {}: {}", target.entry_key, target.datastore_name, e);
        AppError::from(e)
    })?;

    info!("Saved entry {} in {} as version {}", target.entry_key, target.datastore_name, version.version);
    Ok(HttpResponse::Ok().json(version))
}

/// DELETE /api/datastores/{name}/entry
pub async fn delete_entry(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<EntryParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id, params.api_token);
    let entry_key = missing.text("entryKey", params.entry_key);
    missing.finish()?;

    let target = EntryTarget::new(path.into_inner(), entry_key, params.scope);
    api.delete_entry(&credentials, &target).await?;

    info!("Deleted entry {} from {}", target.entry_key, target.datastore_name);
    Ok(HttpResponse::Ok().json(SuccessResponse::new("Entry deleted successfully")))
}

/// POST /api/datastores/{name}/entry/increment
pub async fn increment_entry(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<CredentialParams>,
    body: web::Json<IncrementEntryBody>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let body = body.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(
        &req,
        non_empty(body.universe_id).or(non_empty(query.universe_id)),
        non_empty(body.api_token).or(non_empty(query.api_token)),
    );
    let entry_key = missing.text("entryKey", body.entry_key);
    let increment_by = missing.present("incrementBy", body.increment_by);
    missing.finish()?;

    let target = EntryTarget::new(path.into_inner(), entry_key, body.scope);
    let value = api
        .increment_entry(&credentials, &target, increment_by.unwrap_or_default())
        .await?;

    Ok(HttpResponse::Ok().json(value))
}
