#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use talkvid_api::config::ServerConfig;
use talkvid_api::router::build_app_router;
use talkvid_api::state::AppState;
use talkvid_core::naming::TaskPaths;
use talkvid_core::store::TaskStore;
use talkvid_core::supervision::launcher::GenerationOptions;
use talkvid_db::MemoryTaskStore;
use talkvid_worker::{Supervisor, SupervisorConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const SUCCESS_LINE: &str = "Generation finished.Saving generated video to";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        database_url: None,
        task_retention_days: 7,
        retention_interval: Duration::from_secs(3600),
        log_json: false,
    }
}

/// Supervisor config running a `/bin/sh` fixture generator under `dir`.
///
/// The script sees the generator argument vector with `$out` bound to the
/// `--save_file` value.
pub fn supervisor_config(dir: &Path, body: &str) -> SupervisorConfig {
    let script = dir.join("fixture_generator.sh");
    let text = format!(
        "out=\"\"\n\
         while [ $# -gt 0 ]; do\n\
         \x20 if [ \"$1\" = \"--save_file\" ]; then out=\"$2\"; fi\n\
         \x20 shift\n\
         done\n\
         {body}\n"
    );
    std::fs::write(&script, text).expect("write fixture");

    SupervisorConfig {
        tick_interval: Duration::from_millis(50),
        monitor_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(300),
        paths: TaskPaths::under(dir),
        generation: GenerationOptions {
            python: "/bin/sh".into(),
            script: script.display().to_string(),
            ..GenerationOptions::default()
        },
        follow_poll: Duration::from_millis(50),
        follow_idle: Duration::from_secs(10),
        public_base_url: Some("http://localhost:3000".into()),
        ..SupervisorConfig::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryTaskStore>,
    pub supervisor: Arc<Supervisor>,
    pub cancel: CancellationToken,
}

impl TestApp {
    /// App over an in-memory store. The scheduler only runs after
    /// [`TestApp::start`].
    pub fn new(config: SupervisorConfig) -> Self {
        let store = Arc::new(MemoryTaskStore::new());
        let dyn_store: Arc<dyn TaskStore> = store.clone();
        let supervisor = Arc::new(Supervisor::new(dyn_store.clone(), config));
        let server_config = test_config();
        let state = AppState {
            supervisor: supervisor.clone(),
            store: dyn_store,
            pool: None,
            config: Arc::new(server_config.clone()),
        };
        Self {
            router: build_app_router(state, &server_config),
            store,
            supervisor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn start(&self) {
        self.supervisor
            .start(self.cancel.clone())
            .expect("scheduler starts once");
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, json: serde_json::Value) -> Response {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Submit a task and return its id.
    pub async fn submit(&self, prompt: &str) -> String {
        let response = self
            .post_json(
                "/api/v1/tasks",
                serde_json::json!({
                    "prompt": prompt,
                    "image_path": "/inputs/face.png",
                    "audio_path": "/inputs/voice.wav",
                }),
            )
            .await;
        let json = body_json(response).await;
        json["data"]["id"].as_str().expect("task id").to_string()
    }

    /// Poll the task until its status is terminal.
    pub async fn wait_terminal(&self, id: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let json = body_json(self.get(&format!("/api/v1/tasks/{id}")).await).await;
            let status = json["data"]["status"].as_str().unwrap_or_default().to_string();
            if matches!(status.as_str(), "success" | "failed" | "cancelled") {
                return json;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} stuck in {status}"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("JSON body")
}
