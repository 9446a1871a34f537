//! REST API under `/api/v1`.
//!
//! Error envelope is `{"error": "<message>"}`. Two historic wire quirks are
//! preserved: the `async` query parameter of the annotated-routes endpoints
//! carries the protocol, and the `protocol` parameter of the tenant delete
//! endpoint carries the await flag.

use crate::domain::{ServiceRegistration, TenantData, TenantDns, DEFAULT_SITE};
use crate::error::SiteError;
use crate::synchronizer::Synchronizer;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tenant_client::Tenant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    pub synchronizer: Arc<Synchronizer>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sync", post(sync))
        .route("/validate", post(validate))
        .route("/reset-caches", post(reset_caches))
        .route("/public-services", get(list_public_services))
        .route("/annotated-routes", get(list_annotated_routes))
        .route("/annotated-routes-bulk", post(list_annotated_routes_bulk))
        .route("/openshift-routes", get(list_openshift_routes))
        .route("/identity-provider-route", get(get_idp_route))
        .route("/trusted-hosts", get(get_realms))
        .route("/trusted-hosts/{tenant_id}", get(get_realm))
        .route("/tenants/current/service/name", get(get_service_name))
        .route("/tenants/current/services", get(get_tenant_current_services))
        .route("/tenants", post(register_tenant))
        .route("/tenants/{tenant_id}", delete(delete_tenant))
        .route("/search", get(search))
        .route(
            "/activate/create-os-tenant-alias-routes/perform/{tenant_id}",
            post(create_tenant_route),
        )
        .route("/routes", get(get_all).post(upsert).put(upsert))
        .route("/routes/sync-idp", post(sync_idp))
        .route("/routes/{tenant_id}", get(get_tenant).delete(delete_routes))
        .route("/routes/{tenant_id}/site", get(get_site))
        .route("/routes/{tenant_id}/activate", post(activate_tenant))
        .route("/routes/{tenant_id}/deactivate", post(deactivate_tenant))
        .route(
            "/routes/{tenant_id}/restore-tenant-alias",
            post(restore_tenant_alias),
        )
        .route("/virtual-services", post(upsert_virtual_service))
        .route(
            "/virtual-services/{service_name}",
            delete(delete_virtual_service),
        );

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`SiteError`] with the HTTP mapping of the error contract.
struct ApiError(SiteError);

impl From<SiteError> for ApiError {
    fn from(err: SiteError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SiteError::TenantNotActive(_) | SiteError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SiteError::Forbidden(_) | SiteError::Paas(paas_client::PaasError::Permission(_)) => {
                StatusCode::FORBIDDEN
            }
            SiteError::NotFound(_) => StatusCode::NOT_FOUND,
            err if err.is_tenant_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self.0.to_string())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn parse_flag(value: Option<&String>, default: bool) -> bool {
    match value.map(String::as_str) {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "UP" }))
}

#[derive(Debug, Default, Deserialize)]
struct MergeQuery {
    #[serde(rename = "mergeGeneral")]
    merge_general: Option<String>,
}

async fn get_all(
    State(state): State<AppState>,
    Query(query): Query<MergeQuery>,
) -> Result<Response, ApiError> {
    let merge_general = parse_flag(query.merge_general.as_ref(), true);
    let mut tenants = state
        .synchronizer
        .find_all_with_general(merge_general)
        .await
        .map_err(|err| {
            debug!("No data found: {err}");
            SiteError::NotFound(err.to_string())
        })?;
    for tenant in &mut tenants {
        tenant.flatten_addresses_to_hosts();
    }
    Ok(Json(tenants).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct GetTenantQuery {
    site: Option<String>,
    #[serde(rename = "mergeGeneral")]
    merge_general: Option<String>,
    #[serde(rename = "generateDefaultSiteIfEmpty")]
    generate_default: Option<String>,
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<GetTenantQuery>,
) -> Result<Response, ApiError> {
    let site = query.site.clone().unwrap_or_default();
    let merge_general = parse_flag(query.merge_general.as_ref(), true);
    let generate_default = parse_flag(query.generate_default.as_ref(), false);

    let found = match state
        .synchronizer
        .find_by_tenant_id(&tenant_id, &site, merge_general, generate_default)
        .await
    {
        Ok(found) => found,
        Err(_) => state
            .synchronizer
            .find_by_external_tenant_id(&tenant_id, &site, merge_general, generate_default)
            .await
            .map_err(|err| {
                error!("No data found for tenantId: {tenant_id}");
                match err {
                    err if err.is_tenant_not_found() => err,
                    err => SiteError::NotFound(err.to_string()),
                }
            })?,
    };
    let mut found = found;
    found.flatten_addresses_to_hosts();
    Ok(Json(found).into_response())
}

async fn get_site(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<GetTenantQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let url = headers
        .get("url")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if url.is_empty() {
        return Err(SiteError::BadRequest("URL is not specified".to_string()).into());
    }
    let merge_general = parse_flag(query.merge_general.as_ref(), true);
    let generate_default = parse_flag(query.generate_default.as_ref(), false);
    let site = state
        .synchronizer
        .get_site(&tenant_id, url, merge_general, generate_default)
        .await?;
    if site.is_empty() {
        return Err(SiteError::NotFound("Site not found".to_string()).into());
    }
    Ok(site.into_response())
}

#[derive(Debug, Default, Deserialize)]
struct AsyncQuery {
    #[serde(rename = "async")]
    wait_flag: Option<String>,
}

async fn upsert(
    State(state): State<AppState>,
    Query(query): Query<AsyncQuery>,
    Json(mut data): Json<TenantDns>,
) -> Result<Response, ApiError> {
    info!("Start upsert api call");
    // async defaults to true: the request returns before the pass completes
    let wait = !parse_flag(query.wait_flag.as_ref(), true);
    // any address with scheme and path is reduced to its host
    data.flatten_addresses_to_hosts();

    let sync = Arc::clone(&state.synchronizer);
    let payload = data.clone();
    state
        .synchronizer
        .await_action(wait, move || async move { sync.upsert(payload).await })
        .await?;
    Ok((StatusCode::CREATED, Json(data)).into_response())
}

async fn delete_routes(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<AsyncQuery>,
) -> Result<Response, ApiError> {
    debug!("Delete routes for tenant: {tenant_id}");
    let wait = !parse_flag(query.wait_flag.as_ref(), true);
    let sync = Arc::clone(&state.synchronizer);
    state
        .synchronizer
        .await_action(wait, move || async move {
            sync.delete_routes(&tenant_id).await
        })
        .await?;
    Ok(Json("").into_response())
}

async fn activate_tenant(
    state: State<AppState>,
    path: Path<String>,
    query: Query<AsyncQuery>,
) -> Result<Response, ApiError> {
    change_tenant_status(state, path, query, true).await
}

async fn deactivate_tenant(
    state: State<AppState>,
    path: Path<String>,
    query: Query<AsyncQuery>,
) -> Result<Response, ApiError> {
    change_tenant_status(state, path, query, false).await
}

async fn change_tenant_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<AsyncQuery>,
    active: bool,
) -> Result<Response, ApiError> {
    let wait = !parse_flag(query.wait_flag.as_ref(), true);
    let sync = Arc::clone(&state.synchronizer);
    state
        .synchronizer
        .await_action(wait, move || async move {
            sync.change_tenant_status(&tenant_id, active).await
        })
        .await?;
    Ok(Json(serde_json::Value::Null).into_response())
}

/// Rebuild the default site (when the scheme is empty) and activate.
async fn restore_tenant_alias(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    debug!("Restore tenant alias for tenant: {tenant_id}");
    let found = match state
        .synchronizer
        .find_by_tenant_id(&tenant_id, "", false, false)
        .await
    {
        Ok(found) => found,
        Err(_) => {
            state
                .synchronizer
                .find_by_external_tenant_id(&tenant_id, "", false, false)
                .await?
        }
    };

    if found.sites.is_empty() {
        let mut data = state
            .synchronizer
            .find_by_tenant_id(&tenant_id, "", false, true)
            .await?;
        data.flatten_addresses_to_hosts();
        let sync = Arc::clone(&state.synchronizer);
        state
            .synchronizer
            .await_action(true, move || async move { sync.upsert(data).await })
            .await?;
    }
    activate_and_respond(&state, &tenant_id).await
}

/// Same flow kept idempotent for the tenant-manager activation hook.
async fn create_tenant_route(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    info!("Start create route by tenantId={tenant_id}");
    let mut data = state
        .synchronizer
        .find_by_tenant_id(&tenant_id, "", false, false)
        .await
        .map_err(|err| match err {
            err if err.is_tenant_not_found() => err,
            err => SiteError::NotFound(err.to_string()),
        })?;
    data.flatten_addresses_to_hosts();

    if data.sites.is_empty() {
        // the routes schema is missing on this side; generate the defaults
        let mut data = state
            .synchronizer
            .find_by_tenant_id(&tenant_id, "", false, true)
            .await?;
        data.flatten_addresses_to_hosts();
        let sync = Arc::clone(&state.synchronizer);
        state
            .synchronizer
            .await_action(true, move || async move { sync.upsert(data).await })
            .await?;
    }
    activate_and_respond(&state, &tenant_id).await
}

async fn activate_and_respond(state: &AppState, tenant_id: &str) -> Result<Response, ApiError> {
    let sync = Arc::clone(&state.synchronizer);
    let id = tenant_id.to_string();
    state
        .synchronizer
        .await_action(true, move || async move {
            sync.change_tenant_status(&id, true).await
        })
        .await?;
    info!("Performed 'createRoutes' task for tenant with objectId = {tenant_id}");
    Ok(Json(serde_json::Value::Null).into_response())
}

async fn validate(
    State(state): State<AppState>,
    Json(data): Json<TenantDns>,
) -> Result<Response, ApiError> {
    debug!("Check endpoints for tenant {}", data.tenant_id);
    let result = state.synchronizer.check_collisions(&data).await?;
    Ok(Json(result).into_response())
}

async fn sync(State(state): State<AppState>) -> impl IntoResponse {
    info!("Force routes sync by external request");
    state.synchronizer.sync();
    StatusCode::OK
}

async fn reset_caches() -> impl IntoResponse {
    info!("Force reset caches by external request");
    Json("")
}

async fn sync_idp(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.synchronizer.idp.reset();
    state.synchronizer.send_routes_to_idp().await?;
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Default, Deserialize)]
struct AnnotatedRoutesQuery {
    #[serde(rename = "tenantId")]
    tenant_id: Option<String>,
    /// Historic wire name: the value is the request protocol.
    #[serde(rename = "async")]
    protocol: Option<String>,
    site: Option<String>,
    #[serde(rename = "ignoreMissing")]
    ignore_missing: Option<String>,
}

impl AnnotatedRoutesQuery {
    fn into_tenant_data(self) -> Result<TenantData, SiteError> {
        let tenant_id = self
            .tenant_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SiteError::BadRequest("No tenantId specified".to_string()))?;
        Ok(TenantData {
            tenant_id: Some(tenant_id),
            protocol: self.protocol.unwrap_or_default(),
            site: self
                .site
                .filter(|site| !site.is_empty())
                .unwrap_or_else(|| DEFAULT_SITE.to_string()),
            ignore_missing: parse_flag(self.ignore_missing.as_ref(), false),
            ..TenantData::default()
        })
    }
}

async fn list_annotated_routes(
    State(state): State<AppState>,
    Query(query): Query<AnnotatedRoutesQuery>,
) -> Result<Response, ApiError> {
    let data = query.into_tenant_data()?;
    let services = state.synchronizer.get_annotated_routes_for_tenant(&data).await?;
    Ok(Json(services).into_response())
}

async fn get_idp_route(
    State(state): State<AppState>,
    Query(query): Query<AnnotatedRoutesQuery>,
) -> Result<Response, ApiError> {
    let data = query.into_tenant_data()?;
    let services = state.synchronizer.get_idp_route_for_tenant(&data).await?;
    Ok(Json(services).into_response())
}

async fn list_annotated_routes_bulk(
    State(state): State<AppState>,
    Json(mut entries): Json<Vec<TenantData>>,
) -> Result<Response, ApiError> {
    debug!("Requesting annotated routes bulk");
    for entry in &mut entries {
        if entry.site.is_empty() {
            entry.site = DEFAULT_SITE.to_string();
        }
    }
    let filled = state.synchronizer.get_annotated_routes_bulk(entries).await?;
    Ok(Json(filled).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct NamespacesQuery {
    namespaces: Option<String>,
}

async fn list_public_services(
    State(state): State<AppState>,
    Query(query): Query<NamespacesQuery>,
) -> Result<Response, ApiError> {
    let namespaces: Vec<String> = query
        .namespaces
        .filter(|list| !list.is_empty())
        .map(|list| list.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    let services = state.synchronizer.get_public_services(&namespaces).await?;
    Ok(Json(services).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct OpenShiftRoutesQuery {
    namespace: Option<String>,
    namespaces: Option<String>,
    name: Option<String>,
}

async fn list_openshift_routes(
    State(state): State<AppState>,
    Query(query): Query<OpenShiftRoutesQuery>,
) -> Result<Response, ApiError> {
    debug!("Requesting openshift routes");
    let routes = state
        .synchronizer
        .get_open_shift_routes(query.namespace, query.name, query.namespaces)
        .await?;
    Ok(Json(routes).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct RealmsQuery {
    #[serde(rename = "showAllTenants")]
    show_all_tenants: Option<String>,
}

async fn get_realms(
    State(state): State<AppState>,
    Query(query): Query<RealmsQuery>,
) -> Result<Response, ApiError> {
    let show_all = parse_flag(query.show_all_tenants.as_ref(), false);
    let realms = state.synchronizer.get_realms(show_all).await?;
    Ok(Json(realms).into_response())
}

async fn get_realm(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    let realm = state.synchronizer.get_realm(&tenant_id).await?;
    Ok(Json(realm).into_response())
}

async fn get_service_name(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let tenant_id = headers
        .get("Tenant")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if tenant_id.is_empty() {
        return Err(SiteError::BadRequest("Tenant id is not specified".to_string()).into());
    }
    let name = state.synchronizer.get_service_name(tenant_id).await?;
    Ok(Json(name).into_response())
}

async fn get_tenant_current_services(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    info!("Get tenant current services");
    let forwarded_proto = headers
        .get("X-Forwarded-Proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();
    let forwarded_proto = forwarded_proto.split(',').next().unwrap_or_default().to_string();

    let external_id = headers
        .get("Tenant")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let scheme = if external_id.is_empty() {
        debug!("Empty tenantId");
        TenantDns::default()
    } else {
        state
            .synchronizer
            .find_by_external_tenant_id(external_id, "", false, false)
            .await?
    };

    let data = TenantData {
        tenant_id: Some(scheme.tenant_id.clone()),
        protocol: forwarded_proto,
        site: DEFAULT_SITE.to_string(),
        ignore_missing: true,
        ..TenantData::default()
    };
    let services = if scheme.tenant_id.is_empty() {
        state.synchronizer.get_annotated_routes(&data, scheme).await?
    } else {
        state.synchronizer.get_annotated_routes_for_tenant(&data).await?
    };
    Ok(Json(services).into_response())
}

async fn register_tenant(
    State(state): State<AppState>,
    Json(tenant): Json<Tenant>,
) -> Result<Response, ApiError> {
    info!("Received request to register tenant: {}", tenant.object_id);
    state.synchronizer.register_tenant(&tenant).await?;
    Ok(StatusCode::CREATED.into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DeleteTenantQuery {
    /// Historic wire name: the value is the await flag.
    protocol: Option<String>,
}

async fn delete_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<DeleteTenantQuery>,
) -> Result<Response, ApiError> {
    let wait = !parse_flag(query.protocol.as_ref(), true);
    let sync = Arc::clone(&state.synchronizer);
    state
        .synchronizer
        .await_action(wait, move || async move {
            sync.delete_tenant(&tenant_id).await
        })
        .await?;
    Ok(Json(serde_json::Value::Null).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    host: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let host = query
        .host
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SiteError::BadRequest("No host specified".to_string()))?;
    let tenants = state.synchronizer.search(&host).await?;
    Ok(Json(tenants).into_response())
}

async fn upsert_virtual_service(
    State(state): State<AppState>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<Response, ApiError> {
    info!(
        "Received virtual service registration: {}",
        registration.virtual_service
    );
    state
        .synchronizer
        .update_or_create_virtual_service(&registration)
        .await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn delete_virtual_service(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> Result<Response, ApiError> {
    state.synchronizer.delete_virtual_service(&service_name).await?;
    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flag_defaults() {
        assert!(parse_flag(None, true));
        assert!(!parse_flag(None, false));
        assert!(!parse_flag(Some(&"false".to_string()), true));
        assert!(parse_flag(Some(&"true".to_string()), false));
        assert!(parse_flag(Some(&"garbage".to_string()), true));
    }

    #[test]
    fn annotated_query_maps_async_to_protocol() {
        let query = AnnotatedRoutesQuery {
            tenant_id: Some("t1".to_string()),
            protocol: Some("http".to_string()),
            site: None,
            ignore_missing: Some("true".to_string()),
        };
        let data = query.into_tenant_data().unwrap();
        assert_eq!(data.protocol, "http");
        assert_eq!(data.site, DEFAULT_SITE);
        assert!(data.ignore_missing);
    }

    #[test]
    fn annotated_query_requires_tenant_id() {
        let query = AnnotatedRoutesQuery::default();
        assert!(matches!(
            query.into_tenant_data(),
            Err(SiteError::BadRequest(_))
        ));
    }
}
