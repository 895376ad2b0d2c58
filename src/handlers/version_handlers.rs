use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error};
use serde::Deserialize;

use crate::clients::{DatastoreApi, EntryTarget, ListVersionsQuery, SortOrder, VersionListing};
use crate::error::AppError;
use crate::handlers::entry_handlers::clamp_limit;
use crate::handlers::params::{non_empty, not_found_or, MissingParams};
use crate::models::{VersionInfo, VersionListResponse};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVersionsParams {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub entry_key: Option<String>,
    pub scope: Option<String>,
    pub limit: Option<u32>,
    pub sort_order: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionParams {
    pub universe_id: Option<String>,
    pub api_token: Option<String>,
    pub entry_key: Option<String>,
    pub version_id: Option<String>,
    pub scope: Option<String>,
}

fn parse_sort_order(raw: Option<String>) -> Result<SortOrder, AppError> {
    match non_empty(raw) {
        None => Ok(SortOrder::default()),
        Some(raw) if raw.eq_ignore_ascii_case("descending") => Ok(SortOrder::Descending),
        Some(raw) if raw.eq_ignore_ascii_case("ascending") => Ok(SortOrder::Ascending),
        Some(raw) => Err(AppError::BadRequest(format!(
            "Invalid sortOrder '{}', expected Ascending or Descending",
            raw
        ))),
    }
}

/// Only the head of a first page in descending order is known to be the latest version.
fn flag_latest(listing: VersionListing, order: SortOrder, first_page: bool) -> VersionListResponse {
    let mark_head = order == SortOrder::Descending && first_page;

    VersionListResponse {
        versions: listing
            .versions
            .into_iter()
            .enumerate()
            .map(|(i, version)| VersionInfo {
                version,
                is_latest: (mark_head && i == 0).then_some(true),
            })
            .collect(),
        next_page_cursor: listing.next_page_cursor.unwrap_or_default(),
    }
}

/// GET /api/datastores/{name}/entry/versions
pub async fn list_versions(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<ListVersionsParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id, params.api_token);
    let entry_key = missing.text("entryKey", params.entry_key);
    missing.finish()?;

    let sort_order = parse_sort_order(params.sort_order)?;
    let target = EntryTarget::new(path.into_inner(), entry_key, params.scope);
    let query = ListVersionsQuery {
        cursor: non_empty(params.cursor),
        limit: clamp_limit(params.limit),
        sort_order,
    };

    debug!(
        "Listing {} versions of {} in {}",
        sort_order.as_str(),
        target.entry_key,
        target.datastore_name
    );

    let listing = api.list_versions(&credentials, &target, &query).await.map_err(|e| {
        error!("Error listing versions of {}: {}", target.entry_key, e);
        AppError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(flag_latest(listing, sort_order, query.cursor.is_none())))
}

/// GET /api/datastores/{name}/entry/versions/version
pub async fn get_version(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<VersionParams>,
    api: web::Data<dyn DatastoreApi>,
) -> Result<HttpResponse, AppError> {
    let params = query.into_inner();
    let mut missing = MissingParams::default();
    let credentials = missing.credentials(&req, params.universe_id, params.api_token);
    let entry_key = missing.text("entryKey", params.entry_key);
    let version_id = missing.text("versionId", params.version_id);
    missing.finish()?;

    let target = EntryTarget::new(path.into_inner(), entry_key, params.scope);
    let value = api
        .get_version(&credentials, &target, &version_id)
        .await
        .map_err(|e| not_found_or(e, "Entry version not found"))?;

    Ok(HttpResponse::Ok().json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{configure, InMemoryDatastoreApi};
    use actix_web::{test as actix_test, App};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn two_versions() -> Value {
        json!({
            "data": [
                { "version": "v2", "deleted": false, "contentLength": 12, "createdTime": "2024-05-02T00:00:00Z" },
                { "version": "v1", "deleted": false, "contentLength": 10, "createdTime": "2024-05-01T00:00:00Z" }
            ],
            "nextPageCursor": ""
        })
    }

    #[test]
    fn test_sort_order_is_case_insensitive() {
        assert_eq!(parse_sort_order(None).unwrap(), SortOrder::Descending);
        assert_eq!(parse_sort_order(Some("ascending".into())).unwrap(), SortOrder::Ascending);
        assert_eq!(parse_sort_order(Some("DESCENDING".into())).unwrap(), SortOrder::Descending);
        assert!(parse_sort_order(Some("sideways".into())).is_err());
    }

    #[actix_rt::test]
    async fn test_descending_listing_flags_the_head() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        api.set_version_listing(two_versions());
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions?universeId=1&apiToken=t&entryKey=player_1")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = actix_test::read_body_json(resp).await;

        assert_eq!(body["versions"][0]["version"], "v2");
        assert_eq!(body["versions"][0]["isLatest"], true);
        assert_eq!(body["versions"][0]["contentLength"], 12);
        assert!(body["versions"][1].get("isLatest").is_none());
        assert_eq!(body["nextPageCursor"], "");
    }

    #[actix_rt::test]
    async fn test_ascending_listing_flags_nothing() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        api.set_version_listing(two_versions());
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions?universeId=1&apiToken=t&entryKey=player_1&sortOrder=Ascending")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        let body: Value = actix_test::read_body_json(resp).await;
        let versions = body["versions"].as_array().unwrap();
        assert!(versions.iter().all(|v| v.get("isLatest").is_none()));
    }

    #[actix_rt::test]
    async fn test_later_pages_flag_nothing() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        api.set_version_listing(two_versions());
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions?universeId=1&apiToken=t&entryKey=player_1&cursor=page2")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        let body: Value = actix_test::read_body_json(resp).await;
        assert!(body["versions"][0].get("isLatest").is_none());
    }

    #[actix_rt::test]
    async fn test_invalid_sort_order_is_rejected() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions?universeId=1&apiToken=t&entryKey=k&sortOrder=random")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        assert_eq!(api.upstream_calls(), 0);
    }

    #[actix_rt::test]
    async fn test_version_history_of_stored_entry() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        for coins in [1, 2] {
            let req = actix_test::TestRequest::post()
                .uri("/api/datastores/Players/entry")
                .set_json(json!({ "universeId": "1", "apiToken": "t", "entryKey": "p", "value": { "coins": coins } }))
                .to_request();
            assert_eq!(actix_test::call_service(&app, req).await.status(), 200);
        }

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions?universeId=1&apiToken=t&entryKey=p")
            .to_request();
        let body: Value = actix_test::read_body_json(actix_test::call_service(&app, req).await).await;
        assert_eq!(body["versions"][0]["version"], "v2");
        assert_eq!(body["versions"][0]["isLatest"], true);

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions/version?universeId=1&apiToken=t&entryKey=p&versionId=v1")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body, json!({ "coins": 1 }));
    }

    #[actix_rt::test]
    async fn test_unknown_version_is_a_local_404() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        api.insert("Players", "global", "p", json!(1));
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions/version?universeId=1&apiToken=t&entryKey=p&versionId=v9")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body, json!({ "error": "Entry version not found" }));
    }

    #[actix_rt::test]
    async fn test_get_version_requires_version_id() {
        let api = Arc::new(InMemoryDatastoreApi::default());
        let app = actix_test::init_service(App::new().configure(configure(api.clone(), 30))).await;

        let req = actix_test::TestRequest::get()
            .uri("/api/datastores/Players/entry/versions/version?universeId=1&apiToken=t")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body, json!({ "error": "Missing entryKey or versionId" }));
    }
}
