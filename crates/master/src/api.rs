//! Master HTTP API.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use dedalus_core::{
    ApiResponse, ErrorCode, GraphInstanceInfo, GraphStruct, InstanceState, LogStream,
    ScheduledGraph,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::engine::Engine;
use crate::{Error, Result};

type Json<T> = axum::Json<ApiResponse<T>>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match code {
            ErrorCode::AppError => match &self {
                Error::GraphNotFound { .. } | Error::InstanceNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
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

/// Pagination and filter query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    graph_name: Option<String>,
    with_info: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

impl ListQuery {
    fn with_info(&self) -> bool {
        self.with_info.as_deref() != Some("0")
    }

    fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

/// Payload of the start/stop endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateChange {
    /// State before the change.
    pub prev_state: InstanceState,
    /// State requested by the change.
    pub new_state: InstanceState,
}

/// Body of the schedule endpoint.
#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    /// Cron rule.
    pub schedule: String,
}

/// Build the master router.
pub fn router(engine: Engine) -> Router {
    let v1 = Router::new()
        .route("/graphs", get(list_graphs))
        .route("/graph/{graph_name}", post(create_graph).get(read_graph))
        .route("/graph/{graph_name}/launch", post(launch_graph))
        .route("/graph/{graph_name}/schedule", post(schedule_graph))
        .route("/graph/{graph_name}/{revision}", get(read_graph_revision))
        .route(
            "/graph/{graph_name}/{revision}/launch",
            post(launch_graph_revision),
        )
        .route("/instances", get(list_instances))
        .route("/instance/{instance_id}", get(read_instance))
        .route("/instance/{instance_id}/start", post(start_instance))
        .route("/instance/{instance_id}/stop", post(stop_instance))
        .route(
            "/instance/{instance_id}/logs/{task_name}/{host}/{log_type}",
            get(instance_logs),
        )
        .route("/schedules", get(list_schedules));
    Router::new()
        .route("/ping", get(ping))
        .nest("/v1.0", v1)
        .with_state(engine)
}

async fn ping() -> Json<&'static str> {
    axum::Json(ApiResponse::ok("pong"))
}

async fn list_graphs(
    State(engine): State<Engine>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<serde_json::Value>>> {
    let graphs = engine
        .store()
        .list_graph_structs(query.graph_name.as_deref(), query.with_info())?;
    let items = query.paginate(graphs);
    let payload = items
        .into_iter()
        .map(|(graph_name, revision, graph)| match graph {
            Some(graph) => serde_json::to_value(graph)
                .unwrap_or_else(|_| json!({"graph_name": graph_name, "revision": revision})),
            None => json!({"graph_name": graph_name, "revision": revision}),
        })
        .collect();
    Ok(axum::Json(ApiResponse::ok(payload)))
}

async fn create_graph(
    State(engine): State<Engine>,
    Path(graph_name): Path<String>,
    axum::Json(graph): axum::Json<GraphStruct>,
) -> Result<Json<serde_json::Value>> {
    let revision = engine.add_graph_struct(&graph_name, graph)?;
    Ok(axum::Json(ApiResponse::ok(json!({
        "graph_name": graph_name,
        "revision": revision,
    }))))
}

async fn read_graph(
    State(engine): State<Engine>,
    Path(graph_name): Path<String>,
) -> Result<Json<GraphStruct>> {
    let graph = engine.store().read_graph_struct(&graph_name, None)?;
    Ok(axum::Json(ApiResponse::ok(graph)))
}

async fn read_graph_revision(
    State(engine): State<Engine>,
    Path((graph_name, revision)): Path<(String, u64)>,
) -> Result<Json<GraphStruct>> {
    let graph = engine.store().read_graph_struct(&graph_name, Some(revision))?;
    Ok(axum::Json(ApiResponse::ok(graph)))
}

async fn launch_graph(
    State(engine): State<Engine>,
    Path(graph_name): Path<String>,
) -> Result<Json<GraphInstanceInfo>> {
    launch(&engine, &graph_name, None)
}

async fn launch_graph_revision(
    State(engine): State<Engine>,
    Path((graph_name, revision)): Path<(String, u64)>,
) -> Result<Json<GraphInstanceInfo>> {
    launch(&engine, &graph_name, Some(revision))
}

fn launch(
    engine: &Engine,
    graph_name: &str,
    revision: Option<u64>,
) -> Result<Json<GraphInstanceInfo>> {
    let graph = engine.store().read_graph_struct(graph_name, revision)?;
    let instance_id = Uuid::new_v4().simple().to_string();
    let instance = engine.add_graph_instance(&instance_id, graph)?;
    Ok(axum::Json(ApiResponse::ok(instance)))
}

async fn schedule_graph(
    State(engine): State<Engine>,
    Path(graph_name): Path<String>,
    axum::Json(body): axum::Json<ScheduleBody>,
) -> Result<Json<ScheduledGraph>> {
    let schedule = ScheduledGraph::new(graph_name, &body.schedule)
        .map_err(dedalus_core::Error::from)?;
    engine.store().write_schedule(&schedule)?;
    Ok(axum::Json(ApiResponse::ok(schedule)))
}

async fn list_schedules(State(engine): State<Engine>) -> Result<Json<Vec<ScheduledGraph>>> {
    Ok(axum::Json(ApiResponse::ok(engine.store().list_schedules()?)))
}

async fn list_instances(
    State(engine): State<Engine>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<serde_json::Value>>> {
    let instances = engine.store().list_instances(query.with_info())?;
    let items = query.paginate(instances);
    let payload = items
        .into_iter()
        .map(|(instance_id, info)| match info {
            Some(info) => serde_json::to_value(info)
                .unwrap_or_else(|_| json!({"instance_id": instance_id})),
            None => json!({"instance_id": instance_id}),
        })
        .collect();
    Ok(axum::Json(ApiResponse::ok(payload)))
}

async fn read_instance(
    State(engine): State<Engine>,
    Path(instance_id): Path<String>,
) -> Result<Json<GraphInstanceInfo>> {
    Ok(axum::Json(ApiResponse::ok(
        engine.store().read_instance(&instance_id)?,
    )))
}

async fn start_instance(
    State(engine): State<Engine>,
    Path(instance_id): Path<String>,
) -> Result<Json<StateChange>> {
    set_instance_state(&engine, &instance_id, InstanceState::Running).await
}

async fn stop_instance(
    State(engine): State<Engine>,
    Path(instance_id): Path<String>,
) -> Result<Json<StateChange>> {
    set_instance_state(&engine, &instance_id, InstanceState::Stopped).await
}

async fn set_instance_state(
    engine: &Engine,
    instance_id: &str,
    target: InstanceState,
) -> Result<Json<StateChange>> {
    let prev_state = engine.set_graph_instance_state(instance_id, target).await?;
    Ok(axum::Json(ApiResponse::ok(StateChange {
        prev_state,
        new_state: target,
    })))
}

async fn instance_logs(
    State(engine): State<Engine>,
    Path((instance_id, task_name, host, log_type)): Path<(String, String, String, String)>,
) -> Result<Json<serde_json::Value>> {
    let stream: LogStream = log_type
        .parse()
        .map_err(|message: String| Error::InvalidRequest { message })?;
    let instance = engine.store().read_instance(&instance_id)?;
    let task_info = instance
        .exec_stats
        .per_task_execution_info
        .get(&task_name)
        .ok_or_else(|| Error::InvalidRequest {
            message: format!("graph instance has no task named '{task_name}'"),
        })?;
    let task_id = task_info
        .per_host_info
        .get(&host)
        .and_then(|entry| entry.task_id.clone())
        .ok_or_else(|| Error::InvalidRequest {
            message: format!("task '{task_name}' has no execution entry on host '{host}'"),
        })?;

    let data = engine
        .workers()
        .client_for(&host)
        .get_task_log(&task_id, stream)
        .await?;
    Ok(axum::Json(ApiResponse::ok(json!({
        "instance_id": instance_id,
        "task_name": task_name,
        "host": host,
        "log_type": stream,
        "data": data,
    }))))
}
