//! HTTP transport: maps requests onto a [`ResourceService`].
//!
//! ## Routes (per resource)
//!
//! - `POST /{collection}` - create, `201` with the stored document.
//! - `GET /{collection}/{id}` - fetch, `200` with the document.
//! - `PUT /{collection}/{id}` - replace, `200` with the submitted body and its `id`.
//! - `DELETE /{collection}/{id}` - remove, `204`.
//!
//! The users router also answers `POST /users/validate` through a
//! [`TokenValidator`](crate::auth::TokenValidator).
//!
//! Every failure is rendered as `{ "error": "<message>" }` with the status from
//! [`ServiceError::status_code`]. Bodies axum cannot deserialize are reported as `400`
//! validation errors, never as axum's default `422`.
//!
//! Every router leaves here wrapped by [`with_middleware`]: a `tower-http` trace span per request
//! (method, path, status, latency) and panic recovery that turns a panicking handler into a
//! `500` with the same error body.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, warn, Level};

use crate::auth::{TokenRequest, TokenValidator, TokenVerdict};
use crate::framework::transaction::panic_message;
use crate::framework::{Replaced, Resource, ResourceService, ServiceError};
use crate::model::User;
use crate::store::parse_object_id;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> ServiceError {
    ServiceError::Validation(rejection.body_text())
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic_message(panic.as_ref());
    error!(panic = detail, "Handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

/// Wraps `router` with per-request tracing and panic recovery.
pub fn with_middleware(router: Router) -> Router {
    let access_log = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(access_log)
}

/// Build the CRUD router for one resource kind.
pub fn resource_router<R: Resource>(service: ResourceService<R>) -> Router {
    with_middleware(resource_routes(service))
}

/// The users router: CRUD plus the token validation stub.
pub fn users_router(service: ResourceService<User>, validator: Arc<dyn TokenValidator>) -> Router {
    let validate = Router::new()
        .route("/users/validate", post(validate_handler))
        .with_state(validator);
    with_middleware(resource_routes(service).merge(validate))
}

fn resource_routes<R: Resource>(service: ResourceService<R>) -> Router {
    let collection = format!("/{}", R::COLLECTION);
    let item = format!("/{}/{{id}}", R::COLLECTION);
    Router::new()
        .route(&collection, post(create_handler::<R>))
        .route(
            &item,
            get(get_handler::<R>)
                .put(update_handler::<R>)
                .delete(delete_handler::<R>),
        )
        .with_state(service)
}

/// Serve `router` on `listener` until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    router: Router,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn create_handler<R: Resource>(
    State(service): State<ResourceService<R>>,
    body: Result<Json<R::Create>, JsonRejection>,
) -> Result<(StatusCode, Json<R>), ServiceError> {
    let Json(params) = body.map_err(bad_body)?;
    let created = service.create(params).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_handler<R: Resource>(
    State(service): State<ResourceService<R>>,
    Path(id): Path<String>,
) -> Result<Json<R>, ServiceError> {
    service.get(&id).await.map(Json)
}

async fn update_handler<R: Resource>(
    State(service): State<ResourceService<R>>,
    Path(id): Path<String>,
    body: Result<Json<R::Replace>, JsonRejection>,
) -> Result<Json<Replaced<R::Replace>>, ServiceError> {
    // The id is checked before the body so a bad id is always reported as such.
    parse_object_id(&id)?;
    let Json(replacement) = body.map_err(bad_body)?;
    service.update(&id, replacement).await.map(Json)
}

async fn delete_handler<R: Resource>(
    State(service): State<ResourceService<R>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_handler(
    State(validator): State<Arc<dyn TokenValidator>>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenVerdict>, ServiceError> {
    let Json(request) = body.map_err(bad_body)?;
    Ok(Json(validator.validate(&request)))
}
