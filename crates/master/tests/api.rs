//! HTTP surface tests for the master API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use dedalus_core::{LogStream, TaskState, TaskStruct};
use dedalus_master::worker_client::{WorkerApi, WorkerConnector};
use dedalus_master::{Engine, Error, MasterStore, api};
use dedalus_store::Store;
use tower::ServiceExt;

/// Connector for tests that never reach a worker.
struct NoWorkers;

struct UnreachableWorker {
    host: String,
}

#[async_trait]
impl WorkerApi for UnreachableWorker {
    async fn create_task(&self, _structure: &TaskStruct) -> Result<String, Error> {
        Err(self.down())
    }

    async fn start_task(&self, _task_id: &str) -> Result<TaskState, Error> {
        Err(self.down())
    }

    async fn stop_task(&self, _task_id: &str) -> Result<TaskState, Error> {
        Err(self.down())
    }

    async fn get_task_state(&self, _task_id: &str) -> Result<TaskState, Error> {
        Err(self.down())
    }

    async fn get_task_log(&self, _task_id: &str, _stream: LogStream) -> Result<String, Error> {
        Err(self.down())
    }
}

impl UnreachableWorker {
    fn down(&self) -> Error {
        Error::WorkerRpc {
            host: self.host.clone(),
            message: "worker unreachable".to_string(),
        }
    }
}

impl WorkerConnector for NoWorkers {
    fn client_for(&self, host: &str) -> Arc<dyn WorkerApi> {
        Arc::new(UnreachableWorker {
            host: host.to_string(),
        })
    }
}

async fn router() -> axum::Router {
    let store = MasterStore::new(&Store::temporary().unwrap()).unwrap();
    let engine = Engine::new(store, Arc::new(NoWorkers), Duration::from_millis(10))
        .await
        .unwrap();
    api::router(engine)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn graph_body() -> String {
    serde_json::json!({
        "clusters": {"I": ["h1"]},
        "tasks": [
            {
                "task_name": "a",
                "task_struct": {
                    "executor": {"name": "shell", "config": {"command": ["sh", "-c", "echo ok"]}}
                },
                "hosts": ["I"]
            }
        ],
        "deps": {}
    })
    .to_string()
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_ping() {
    let response = router()
        .await
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["payload"], "pong");
}

#[tokio::test]
async fn test_graph_create_read_and_list() {
    let app = router().await;

    let response = app
        .clone()
        .oneshot(post_json("/v1.0/graph/g1", graph_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["payload"]["graph_name"], "g1");
    assert_eq!(json["payload"]["revision"], 0);

    let response = app
        .clone()
        .oneshot(post_json("/v1.0/graph/g1", graph_body()))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["payload"]["revision"], 1);

    let response = app
        .clone()
        .oneshot(Request::get("/v1.0/graph/g1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["payload"]["revision"], 1);

    let response = app
        .clone()
        .oneshot(
            Request::get("/v1.0/graph/g1/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["payload"]["revision"], 0);

    let response = app
        .clone()
        .oneshot(
            Request::get("/v1.0/graphs?with_info=0&graph_name=g1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["payload"].as_array().unwrap().len(), 2);

    let response = app
        .oneshot(
            Request::get("/v1.0/graph/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_graph_is_rejected() {
    let app = router().await;
    let body = serde_json::json!({
        "clusters": {},
        "tasks": [
            {
                "task_name": "a",
                "task_struct": {"executor": {"name": "shell"}},
                "hosts": ["nowhere"]
            }
        ],
        "deps": {}
    })
    .to_string();
    let response = app.oneshot(post_json("/v1.0/graph/g1", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["code"], "app_error");
}

#[tokio::test]
async fn test_launch_stop_then_start_is_forbidden() {
    let app = router().await;

    app.clone()
        .oneshot(post_json("/v1.0/graph/g1", graph_body()))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(post_json("/v1.0/graph/g1/launch", String::new()))
        .await
        .unwrap();
    let json = body_json(response).await;
    let instance_id = json["payload"]["instance_id"].as_str().unwrap().to_string();
    assert_eq!(json["payload"]["exec_stats"]["state"], "idle");

    // stop: idle -> stopped is allowed and persists.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1.0/instance/{instance_id}/stop"),
            String::new(),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["payload"]["prev_state"], "idle");
    assert_eq!(json["payload"]["new_state"], "stopped");

    // start after stop: forbidden transition -> 4xx app error.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1.0/instance/{instance_id}/start"),
            String::new(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "app_error");

    let response = app
        .oneshot(
            Request::get(format!("/v1.0/instance/{instance_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await["payload"]["exec_stats"]["state"],
        "stopped"
    );
}

#[tokio::test]
async fn test_schedule_endpoints() {
    let app = router().await;

    // Scheduling an unknown graph is a 404.
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1.0/graph/g1/schedule",
            serde_json::json!({"schedule": "* * * * *"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.clone()
        .oneshot(post_json("/v1.0/graph/g1", graph_body()))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1.0/graph/g1/schedule",
            serde_json::json!({"schedule": "* * * * *"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/v1.0/schedules").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["payload"][0]["graph_name"], "g1");
}

#[tokio::test]
async fn test_unknown_instance_is_404() {
    let response = router()
        .await
        .oneshot(
            Request::get("/v1.0/instance/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "app_error");
}
