//! Supervisor API routes and handlers.

use crate::supervisor::{JobRunner, PathPoint, SupervisorError};
use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

pub fn create_router(runner: JobRunner) -> Router {
    Router::new()
        .route("/api/send-path", post(send_path))
        .route("/api/send-path/status", get(send_path_status))
        .route("/api/send-path/pause", post(pause))
        .route("/api/send-path/resume", post(resume))
        .route("/api/send-path/cancel", post(cancel))
        .route("/api/visualize", post(visualize))
        .with_state(runner)
}

fn error_response(err: SupervisorError) -> Response {
    let status = match &err {
        SupervisorError::Busy => StatusCode::CONFLICT,
        SupervisorError::BadRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Accepts points as objects `{x, y, penDown}` or arrays `[x, y, penDown]`;
/// the third element defaults to pen-down.
fn normalize_points(raw: &Value) -> Result<Vec<PathPoint>, String> {
    let entries = raw
        .as_array()
        .ok_or_else(|| "points must be an array".to_string())?;
    let mut points = Vec::with_capacity(entries.len());
    for entry in entries {
        let (x, y, pen_down) = if let Some(obj) = entry.as_object() {
            let x = obj
                .get("x")
                .and_then(Value::as_f64)
                .ok_or_else(|| "point objects must include 'x' and 'y'".to_string())?;
            let y = obj
                .get("y")
                .and_then(Value::as_f64)
                .ok_or_else(|| "point objects must include 'x' and 'y'".to_string())?;
            let pen_down = obj
                .get("penDown")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            (x, y, pen_down)
        } else if let Some(arr) = entry.as_array() {
            if arr.len() < 2 {
                return Err("point arrays must be [x, y] or [x, y, penDown]".to_string());
            }
            let x = arr[0]
                .as_f64()
                .ok_or_else(|| "point coordinates must be numbers".to_string())?;
            let y = arr[1]
                .as_f64()
                .ok_or_else(|| "point coordinates must be numbers".to_string())?;
            let pen_down = arr
                .get(2)
                .map(|v| v.as_bool().unwrap_or(true))
                .unwrap_or(true);
            (x, y, pen_down)
        } else {
            return Err("points must be objects or [x, y, penDown] arrays".to_string());
        };

        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return Err(format!("point ({x}, {y}) is outside the board"));
        }
        points.push(PathPoint { x, y, pen_down });
    }
    Ok(points)
}

fn parse_start_position(raw: Option<&Value>) -> Option<PathPoint> {
    let obj = raw?.as_object()?;
    Some(PathPoint {
        x: obj.get("x").and_then(Value::as_f64)?,
        y: obj.get("y").and_then(Value::as_f64)?,
        pen_down: obj
            .get("penDown")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

async fn launch_job(runner: &JobRunner, body: &Value) -> Response {
    let raw_points = body
        .get("path")
        .or_else(|| body.get("points"))
        .or_else(|| body.get("pathPoints"));
    let Some(raw_points) = raw_points else {
        return error_response(SupervisorError::BadRequest(
            "path points are required".to_string(),
        ));
    };
    let points = match normalize_points(raw_points) {
        Ok(points) => points,
        Err(message) => return error_response(SupervisorError::BadRequest(message)),
    };

    let start = parse_start_position(body.get("startPosition"));
    let speed = body
        .get("speed")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(runner.config().default_speed);
    let reset = body.get("reset").and_then(Value::as_bool).unwrap_or(true);

    match runner.start_job(points, start, speed, reset).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Queue a path transmission job to the device.
async fn send_path(
    State(runner): State<JobRunner>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(SupervisorError::BadRequest(rejection.body_text()))
        }
    };
    launch_job(&runner, &body).await
}

/// Status of the current or most recent transmission job.
async fn send_path_status(State(runner): State<JobRunner>) -> Response {
    Json(runner.envelope()).into_response()
}

async fn pause(State(runner): State<JobRunner>) -> Response {
    match runner.pause() {
        Some(envelope) => Json(envelope).into_response(),
        None => Json(json!({ "status": "idle" })).into_response(),
    }
}

async fn resume(State(runner): State<JobRunner>) -> Response {
    match runner.resume() {
        Some(envelope) => Json(envelope).into_response(),
        None => Json(json!({ "status": "idle" })).into_response(),
    }
}

async fn cancel(State(runner): State<JobRunner>) -> Response {
    match runner.cancel().await {
        Some(envelope) => (StatusCode::ACCEPTED, Json(envelope)).into_response(),
        None => Json(json!({ "status": "idle" })).into_response(),
    }
}

/// Accepts a pre-computed point list from the designer. With
/// `sendToController: true` the list is handed straight to the job runner;
/// otherwise this just validates and echoes the point count.
async fn visualize(
    State(runner): State<JobRunner>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(SupervisorError::BadRequest(rejection.body_text()))
        }
    };

    let send_to_controller = body
        .get("sendToController")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if send_to_controller {
        return launch_job(&runner, &body).await;
    }

    let raw_points = body
        .get("pathPoints")
        .or_else(|| body.get("path"))
        .or_else(|| body.get("points"));
    let Some(raw_points) = raw_points else {
        return error_response(SupervisorError::BadRequest(
            "path points are required".to_string(),
        ));
    };
    match normalize_points(raw_points) {
        Ok(points) => (
            StatusCode::OK,
            Json(json!({ "success": true, "totalPoints": points.len() })),
        )
            .into_response(),
        Err(message) => error_response(SupervisorError::BadRequest(message)),
    }
}
