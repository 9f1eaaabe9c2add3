//! Worker HTTP API.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use dedalus_core::{ApiResponse, ErrorCode, LogStream, TaskInfo, TaskState, TaskStruct};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::WorkerEngine;
use crate::{Error, Result};

type Json<T> = axum::Json<ApiResponse<T>>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match code {
            ErrorCode::AppError => match &self {
                Error::TaskNotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            },
            ErrorCode::BackendError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::BackendNetworkError => StatusCode::BAD_GATEWAY,
            ErrorCode::ConcurrencyError => StatusCode::CONFLICT,
        };
        let body = axum::Json(ApiResponse::<()>::error(code, self.to_string()));
        (status, body).into_response()
    }
}

/// Pagination and verbosity query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    with_info: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

impl ListQuery {
    pub(crate) fn with_info(&self) -> bool {
        self.with_info.as_deref() != Some("0")
    }

    pub(crate) fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

/// Payload of the start/stop endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateChange {
    /// Task id.
    pub task_id: String,
    /// State before the change.
    pub prev_state: TaskState,
    /// State requested by the change.
    pub new_state: TaskState,
}

/// Build the worker router.
pub fn router(engine: Arc<WorkerEngine>) -> Router {
    let v1 = Router::new()
        .route("/task/", post(create_task))
        .route("/task/{task_id}", get(read_task))
        .route("/task/{task_id}/state", get(read_task_state))
        .route("/task/{task_id}/start", post(start_task))
        .route("/task/{task_id}/stop", post(stop_task))
        .route("/task/{task_id}/log/{log_type}", get(read_task_log))
        .route("/tasks", get(list_tasks));
    Router::new()
        .route("/ping", get(ping))
        .nest("/v1.0", v1)
        .with_state(engine)
}

async fn ping() -> Json<&'static str> {
    axum::Json(ApiResponse::ok("pong"))
}

async fn create_task(
    State(engine): State<Arc<WorkerEngine>>,
    axum::Json(structure): axum::Json<TaskStruct>,
) -> Result<Json<serde_json::Value>> {
    let info = engine.create_idle_task(structure)?;
    Ok(axum::Json(ApiResponse::ok(json!({"task_id": info.task_id}))))
}

async fn read_task(
    State(engine): State<Arc<WorkerEngine>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskInfo>> {
    Ok(axum::Json(ApiResponse::ok(engine.task_info(&task_id)?)))
}

async fn read_task_state(
    State(engine): State<Arc<WorkerEngine>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let state = engine.task_state(&task_id)?;
    Ok(axum::Json(ApiResponse::ok(json!({
        "task_id": task_id,
        "state": state,
    }))))
}

async fn start_task(
    State(engine): State<Arc<WorkerEngine>>,
    Path(task_id): Path<String>,
) -> Result<Json<StateChange>> {
    set_task_state(&engine, task_id, TaskState::Preparing).await
}

async fn stop_task(
    State(engine): State<Arc<WorkerEngine>>,
    Path(task_id): Path<String>,
) -> Result<Json<StateChange>> {
    set_task_state(&engine, task_id, TaskState::Stopped).await
}

async fn set_task_state(
    engine: &WorkerEngine,
    task_id: String,
    target: TaskState,
) -> Result<Json<StateChange>> {
    let prev_state = engine.set_task_state(&task_id, target).await?;
    Ok(axum::Json(ApiResponse::ok(StateChange {
        task_id,
        prev_state,
        new_state: target,
    })))
}

async fn read_task_log(
    State(engine): State<Arc<WorkerEngine>>,
    Path((task_id, log_type)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let stream: LogStream = log_type
        .parse()
        .map_err(|message: String| Error::InvalidRequest { message })?;
    let data = engine.task_log(&task_id, stream).await?;
    Ok(axum::Json(ApiResponse::ok(json!({
        "task_id": task_id,
        "log_type": stream,
        "data": data,
    }))))
}

async fn list_tasks(
    State(engine): State<Arc<WorkerEngine>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<serde_json::Value>>> {
    let tasks = engine.list_tasks(query.with_info())?;
    let items = query.paginate(tasks);
    let payload = items
        .into_iter()
        .map(|(task_id, info)| match info {
            Some(info) => serde_json::to_value(info).unwrap_or(json!({"task_id": task_id})),
            None => json!({"task_id": task_id}),
        })
        .collect();
    Ok(axum::Json(ApiResponse::ok(payload)))
}
