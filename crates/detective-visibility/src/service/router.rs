use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;

use super::views::Viewer;
use super::{
    AddonPayment, DowngradeRequest, ListingQuery, NewService, SubscriptionPayment,
    VisibilityError, VisibilityService,
};
use crate::domain::{DetectiveId, VisibilityOverridePatch};
use crate::store::{DetectiveStore, PackageStore};

pub const VIEWER_HEADER: &str = "x-viewer";

/// Router exposing listing, profile, override, payment and sweep endpoints.
pub fn visibility_router<D, P>(service: Arc<VisibilityService<D, P>>) -> Router
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    Router::new()
        .route("/api/v1/detectives", get(list_handler::<D, P>))
        .route("/api/v1/detectives/:detective_id", get(profile_handler::<D, P>))
        .route(
            "/api/v1/detectives/:detective_id/visibility",
            patch(visibility_handler::<D, P>),
        )
        .route(
            "/api/v1/detectives/:detective_id/subscription",
            post(activation_handler::<D, P>),
        )
        .route(
            "/api/v1/detectives/:detective_id/subscription/downgrade",
            post(downgrade_handler::<D, P>),
        )
        .route(
            "/api/v1/detectives/:detective_id/blue-tick",
            post(addon_handler::<D, P>),
        )
        .route(
            "/api/v1/detectives/:detective_id/services",
            post(service_handler::<D, P>),
        )
        .route(
            "/api/v1/subscriptions/expiry-sweep",
            post(sweep_handler::<D, P>),
        )
        .with_state(service)
}

impl IntoResponse for VisibilityError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.to_string() });
        (self.status_code(), Json(payload)).into_response()
    }
}

fn viewer(headers: &HeaderMap) -> Viewer {
    Viewer::from_header(
        headers
            .get(VIEWER_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

fn require_admin(headers: &HeaderMap) -> Result<(), VisibilityError> {
    if viewer(headers).is_admin() {
        Ok(())
    } else {
        Err(VisibilityError::Forbidden)
    }
}

fn require_privileged(headers: &HeaderMap, id: &DetectiveId) -> Result<(), VisibilityError> {
    if viewer(headers).is_privileged_for(id) {
        Ok(())
    } else {
        Err(VisibilityError::Forbidden)
    }
}

pub(crate) async fn list_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Query(query): Query<ListingQuery>,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    let listing = service.list_detectives(&query).await?;
    Ok((StatusCode::OK, Json(listing)).into_response())
}

pub(crate) async fn profile_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Path(detective_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    let id = DetectiveId(detective_id);
    let view = service.get_detective_view(&id, &viewer(&headers)).await?;
    Ok((StatusCode::OK, Json(view)).into_response())
}

pub(crate) async fn visibility_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Path(detective_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<VisibilityOverridePatch>,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    require_admin(&headers)?;
    let id = DetectiveId(detective_id);
    let visibility = service.set_visibility_override(&id, &patch).await?;
    Ok((StatusCode::OK, Json(visibility)).into_response())
}

/// Called by the payment collaborator after verification, with admin credentials.
pub(crate) async fn activation_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Path(detective_id): Path<String>,
    headers: HeaderMap,
    Json(payment): Json<SubscriptionPayment>,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    require_admin(&headers)?;
    let id = DetectiveId(detective_id);
    let receipt = service.activate_subscription(&id, &payment).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

pub(crate) async fn addon_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Path(detective_id): Path<String>,
    headers: HeaderMap,
    Json(payment): Json<AddonPayment>,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    require_admin(&headers)?;
    let id = DetectiveId(detective_id);
    let receipt = service.grant_blue_tick_addon(&id, &payment).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

pub(crate) async fn downgrade_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Path(detective_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<DowngradeRequest>,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    let id = DetectiveId(detective_id);
    require_privileged(&headers, &id)?;
    let schedule = service.schedule_downgrade(&id, &request).await?;
    Ok((StatusCode::OK, Json(schedule)).into_response())
}

pub(crate) async fn service_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    Path(detective_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<NewService>,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    let id = DetectiveId(detective_id);
    require_privileged(&headers, &id)?;
    let created = service.create_service(&id, &request).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub(crate) async fn sweep_handler<D, P>(
    State(service): State<Arc<VisibilityService<D, P>>>,
    headers: HeaderMap,
) -> Result<Response, VisibilityError>
where
    D: DetectiveStore + 'static,
    P: PackageStore + 'static,
{
    require_admin(&headers)?;
    let report = service.run_expiry_sweep().await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
