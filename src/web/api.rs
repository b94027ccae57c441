//! Defines the device API routes and handlers.

use crate::controller::{Controller, ControllerError};
use crate::web::models::{ErrorBody, MoveRequest, PathRequest, PenRequest};
use axum::{
    extract::rejection::JsonRejection,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

/// Creates the axum router with all device endpoints. Every response gets
/// permissive CORS headers; preflight OPTIONS short-circuits to 204.
pub fn create_router(controller: Controller) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/move", post(post_move))
        .route("/api/pen", post(post_pen))
        .route("/api/path", post(post_path))
        .route("/api/cancel", post(post_cancel))
        .route("/api/park", post(post_park))
        .layer(middleware::from_fn(cors))
        .with_state(controller)
}

async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

fn error_response(err: ControllerError) -> Response {
    let status = match &err {
        ControllerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ControllerError::UnknownMotor(_) => StatusCode::NOT_FOUND,
        ControllerError::InvalidCoordinates(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControllerError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        ControllerError::Busy(_) | ControllerError::Uninitialized => StatusCode::CONFLICT,
        ControllerError::Motion(_) | ControllerError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: rejection.body_text(),
        }),
    )
        .into_response()
}

/// Current machine state; doubles as the heartbeat for the supervisor.
async fn get_status(State(controller): State<Controller>) -> Response {
    Json(controller.status()).into_response()
}

/// Diagnostic single-motor jog. Pulses synchronously and does not update
/// the pose; do not use it while drawing.
async fn post_move(
    State(controller): State<Controller>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return rejection_response(rejection),
    };
    let result = tokio::task::spawn_blocking(move || {
        controller.jog(&request.motor, request.steps, request.speed)
    })
    .await;
    match result {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(ControllerError::Internal(e.to_string())),
    }
}

/// Synchronous pen command; blocks for the servo settle delay when the
/// state actually changes.
async fn post_pen(
    State(controller): State<Controller>,
    payload: Result<Json<PenRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return rejection_response(rejection),
    };
    let result =
        tokio::task::spawn_blocking(move || controller.set_pen(request.pen_down)).await;
    match result {
        Ok(moved) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "penDown": request.pen_down, "moved": moved })),
        )
            .into_response(),
        Err(e) => error_response(ControllerError::Internal(e.to_string())),
    }
}

/// Submit one batch of a job. See `Controller::submit_path`.
async fn post_path(
    State(controller): State<Controller>,
    payload: Result<Json<PathRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return rejection_response(rejection),
    };
    // May drive the pen servo during initialization, which blocks for the
    // settle delay.
    let result = tokio::task::spawn_blocking(move || controller.submit_path(&request)).await;
    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(ControllerError::Internal(e.to_string())),
    }
}

async fn post_cancel(State(controller): State<Controller>) -> Response {
    let result = tokio::task::spawn_blocking(move || controller.cancel()).await;
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(e) => error_response(ControllerError::Internal(e.to_string())),
    }
}

async fn post_park(State(controller): State<Controller>) -> Response {
    match controller.park() {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}
