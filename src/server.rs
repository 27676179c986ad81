use crate::config::Config;
use crate::conversation::{assemble, repair_surrogate_escapes, sanitize, Turn};
use crate::error::{AppError, Result};
use crate::llm::CompletionBackend;
use crate::params::GenerationParams;
use crate::pdf::process_pdf;
use crate::responder::respond_updates;
use actix_web::dev::ServerHandle;
use actix_web::{get, http::header, post, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("../static/index.html");
const UI_WORKER_COUNT: usize = 4;
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
/// Uploaded PDFs arrive as the raw request body
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Shared, read-only state for the UI server
pub struct AppState {
    pub backend: Arc<dyn CompletionBackend>,
    pub model: String,
    pub system_prompt: String,
    pub defaults: GenerationParams,
}

impl AppState {
    pub fn new(config: &Config, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            defaults: config.defaults,
        }
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    pub system_message: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl ChatRequest {
    /// Fill unset fields from `defaults`, then range-check
    pub fn params(&self, defaults: &GenerationParams) -> Result<GenerationParams> {
        Ok(GenerationParams::new(
            self.max_tokens.unwrap_or(defaults.max_tokens),
            self.temperature.unwrap_or(defaults.temperature),
            self.top_p.unwrap_or(defaults.top_p),
        )?)
    }
}

#[derive(Debug, Serialize)]
struct DefaultsResponse<'a> {
    model: &'a str,
    system_prompt: &'a str,
    #[serde(flatten)]
    params: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PdfResponse {
    pub text: String,
}

#[get("/")]
async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

#[get("/api/defaults")]
async fn get_defaults(app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(DefaultsResponse {
        model: &app_state.model,
        system_prompt: &app_state.system_prompt,
        params: app_state.defaults,
    })
}

fn sse_frame(payload: serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", payload))
}

#[post("/api/chat")]
async fn chat(app_state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse> {
    // Invalid UTF-8 and lone surrogate escapes are replaced rather than rejected
    let text = sanitize(&body);
    let request: ChatRequest = serde_json::from_str(&repair_surrogate_escapes(&text))?;
    let params = request.params(&app_state.defaults)?;
    let system_prompt = request
        .system_message
        .as_deref()
        .unwrap_or(&app_state.system_prompt);

    let request_id = Uuid::new_v4();
    let payload = assemble(&request.history, system_prompt, &request.message);
    info!(%request_id, turns = request.history.len(), messages = payload.len(), "chat request");

    let mut updates = respond_updates(app_state.backend.clone(), payload, params);
    let body = stream! {
        let mut failed = false;
        while let Some(update) = updates.next().await {
            let kind = if update.is_failure() { "error" } else { "partial" };
            failed |= update.is_failure();
            yield Ok::<Bytes, actix_web::Error>(sse_frame(serde_json::json!({
                "type": kind,
                "text": update.to_string(),
            })));
        }
        info!(%request_id, failed, "chat response finished");
        yield Ok(sse_frame(serde_json::json!({"type": "done"})));
    };

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body))
}

#[post("/api/pdf")]
async fn upload_pdf(body: web::Bytes) -> Result<HttpResponse> {
    let text = web::block(move || {
        let upload = (!body.is_empty()).then_some(&body[..]);
        process_pdf(upload)
    })
    .await
    .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?;

    Ok(HttpResponse::Ok().json(PdfResponse { text }))
}

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .service(index)
        .service(get_defaults)
        .service(chat)
        .service(upload_pdf);
}

/// Location the redirect endpoint points browsers at
#[derive(Debug, Clone)]
pub struct RedirectTarget(pub String);

async fn redirect(target: web::Data<RedirectTarget>) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, target.0.as_str()))
        .finish()
}

pub fn redirect_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(redirect));
}

struct RunningServer {
    name: &'static str,
    addrs: Vec<SocketAddr>,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    async fn stop(self) {
        self.handle.stop(true).await;
        if !self.task.is_finished() {
            match self.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(server = self.name, "server error: {}", e),
                Err(e) => error!(server = self.name, "server task failed: {}", e),
            }
        }
        info!(server = self.name, "stopped");
    }
}

/// UI server and redirect endpoint, started and stopped together.
pub struct Servers {
    ui: RunningServer,
    redirect: RunningServer,
}

impl Servers {
    pub async fn start(config: &Config, backend: Arc<dyn CompletionBackend>) -> anyhow::Result<Self> {
        let app_state = web::Data::new(AppState::new(config, backend));
        let ui_server = HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                .configure(app_config)
        })
        .workers(UI_WORKER_COUNT)
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
        .disable_signals()
        .bind(&config.server.ui_bind)
        .with_context(|| format!("Failed to bind UI server to {}", config.server.ui_bind))?;
        let ui_addrs = ui_server.addrs();

        let target = web::Data::new(RedirectTarget(config.server.public_url.clone()));
        let redirect_server = HttpServer::new(move || {
            App::new()
                .app_data(target.clone())
                .configure(redirect_config)
        })
        .workers(1)
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
        .disable_signals()
        .bind(&config.server.redirect_bind)
        .with_context(|| {
            format!("Failed to bind redirect server to {}", config.server.redirect_bind)
        })?;
        let redirect_addrs = redirect_server.addrs();

        let ui = ui_server.run();
        let redirect = redirect_server.run();

        info!(addrs = ?ui_addrs, "UI server listening");
        info!(addrs = ?redirect_addrs, target = %config.server.public_url, "redirect server listening");

        Ok(Self {
            ui: RunningServer {
                name: "ui",
                addrs: ui_addrs,
                handle: ui.handle(),
                task: tokio::spawn(ui),
            },
            redirect: RunningServer {
                name: "redirect",
                addrs: redirect_addrs,
                handle: redirect.handle(),
                task: tokio::spawn(redirect),
            },
        })
    }

    pub fn ui_addrs(&self) -> &[SocketAddr] {
        &self.ui.addrs
    }

    pub fn redirect_addrs(&self) -> &[SocketAddr] {
        &self.redirect.addrs
    }

    /// Serve until `shutdown` resolves or either server exits, then stop both.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) {
        tokio::select! {
            _ = shutdown => info!("shutdown requested"),
            res = &mut self.ui.task => error!(?res, "UI server exited"),
            res = &mut self.redirect.task => error!(?res, "redirect server exited"),
        }
        self.stop().await;
    }

    pub async fn stop(self) {
        self.ui.stop().await;
        self.redirect.stop().await;
    }
}
