use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::handler::{NetworkRequest, WifiEventHandler};
use crate::platform::Platform;
use crate::util;
use crate::Result;

const CONFIGURE_TEMPLATE: &str = include_str!("../resources/templates/configure.html");
const OPERATION_TEMPLATE: &str = include_str!("../resources/templates/operation.html");
const EXECUTION_TEMPLATE: &str = include_str!("../resources/templates/execution.html");

/// Grace period letting the serving task flush the confirmation response
/// before the hotspot is torn down underneath the peer.
const COMPLETION_FLUSH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WebServerConfig {
    pub hotspot_ip: String,
    pub server_port: u16,
}

struct AppState {
    handler: Arc<WifiEventHandler>,
    platform: Arc<dyn Platform>,
    hostname: String,
    commands: Vec<String>,
    completion_tx: mpsc::UnboundedSender<()>,
}

/// Provisioning control plane: JSON API plus server-rendered operator forms,
/// with a captive-portal NAT redirect funneling the hotspot subnet here.
pub struct WifiWebServer {
    config: WebServerConfig,
    platform: Arc<dyn Platform>,
    state: Arc<AppState>,
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    shutdown: watch::Sender<bool>,
}

impl WifiWebServer {
    pub fn new(
        config: WebServerConfig,
        platform: Arc<dyn Platform>,
        handler: Arc<WifiEventHandler>,
        hostname: impl Into<String>,
        commands: Vec<String>,
    ) -> Arc<Self> {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let state = Arc::new(AppState {
            handler,
            platform: platform.clone(),
            hostname: hostname.into(),
            commands,
            completion_tx,
        });
        Arc::new(WifiWebServer {
            config,
            platform,
            state,
            completion_rx: Mutex::new(Some(completion_rx)),
            shutdown,
        })
    }

    /// Serves until `shutdown` is called. Installs the captive-portal NAT
    /// rules for the duration of the serve loop.
    pub async fn run(&self) -> Result<()> {
        info!(port = self.config.server_port, "starting web server");

        self.platform.clean_up_ip_tables().await?;
        let destination = format!("{}:{}", self.config.hotspot_ip, self.config.server_port);
        self.platform
            .set_up_ip_tables(&self.config.hotspot_ip, &destination)
            .await?;

        self.spawn_completion_dispatcher();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.server_port));
        let listener = TcpListener::bind(addr).await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let serve_result = axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await;

        if let Err(cleanup_error) = self.platform.clean_up_ip_tables().await {
            error!(error = %cleanup_error, "failed to flush captive-portal rules");
        }

        serve_result.map_err(crate::Error::from)
    }

    pub fn shutdown(&self) {
        info!("shutting down web server");
        let _ = self.shutdown.send(true);
    }

    /// Successful configure requests land here; the mode switch runs after
    /// the response has gone out.
    fn spawn_completion_dispatcher(&self) {
        let Some(mut rx) = self.completion_rx.lock().unwrap().take() else {
            return;
        };
        let handler = self.state.handler.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(COMPLETION_FLUSH_DELAY).await;
                handler.clone().on_add_network_completed().await;
            }
        });
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/configure", post(api_configure))
        .route("/api/restart", post(api_restart))
        .route("/api/identify", post(api_identify))
        .route("/web/configuration", get(web_configuration))
        .route("/web/configure", post(web_configure))
        .route("/web/operation", get(web_operation))
        .route("/web/identify", post(web_identify))
        .route("/web/restart", post(web_restart))
        .route("/web/execution", get(web_execution))
        .route("/web/execute", post(web_execute))
        .fallback(captive_redirect)
        .with_state(state)
}

const CONFIGURED: &str = "Configured network";
const CONFIGURE_FAILED: &str = "Failed to configure network";
const RESTARTED: &str = "Restarted client mode";
const RESTART_FAILED: &str = "Failed to restart client mode";
const IDENTIFIED: &str = "Identification signal sent";
const IDENTIFY_FAILED: &str = "Failed to send identification signal";

// ---- /api ----

async fn api_configure(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NetworkRequest>,
) -> Response {
    info!(ssid = %request.ssid, "configuration API request");
    if configure(&state, &request).await {
        (StatusCode::OK, CONFIGURED).into_response()
    } else {
        (StatusCode::BAD_REQUEST, CONFIGURE_FAILED).into_response()
    }
}

async fn api_restart(State(state): State<Arc<AppState>>) -> Response {
    info!("restart API request");
    if state.handler.clone().on_restart_requested().await {
        (StatusCode::OK, RESTARTED).into_response()
    } else {
        (StatusCode::BAD_REQUEST, RESTART_FAILED).into_response()
    }
}

async fn api_identify(State(state): State<Arc<AppState>>) -> Response {
    info!("identification API request");
    if state.handler.clone().on_identify_requested().await {
        (StatusCode::OK, IDENTIFIED).into_response()
    } else {
        (StatusCode::BAD_REQUEST, IDENTIFY_FAILED).into_response()
    }
}

// ---- /web ----

async fn web_configuration(State(state): State<Arc<AppState>>) -> Html<String> {
    configure_page(&state, "", "...")
}

async fn web_configure(
    State(state): State<Arc<AppState>>,
    Form(request): Form<NetworkRequest>,
) -> Html<String> {
    info!(ssid = %request.ssid, "configuration web request");
    let result = if configure(&state, &request).await {
        CONFIGURED
    } else {
        CONFIGURE_FAILED
    };
    configure_page(&state, &request.ssid, result)
}

async fn web_operation(State(state): State<Arc<AppState>>) -> Html<String> {
    operation_page(&state, "...", "...")
}

async fn web_identify(State(state): State<Arc<AppState>>) -> Html<String> {
    info!("identification web request");
    let result = if state.handler.clone().on_identify_requested().await {
        IDENTIFIED
    } else {
        IDENTIFY_FAILED
    };
    operation_page(&state, result, "...")
}

async fn web_restart(State(state): State<Arc<AppState>>) -> Html<String> {
    info!("restart web request");
    let result = if state.handler.clone().on_restart_requested().await {
        RESTARTED
    } else {
        RESTART_FAILED
    };
    operation_page(&state, "...", result)
}

async fn web_execution(State(state): State<Arc<AppState>>) -> Html<String> {
    execution_page(&state, "", "")
}

#[derive(serde::Deserialize)]
struct ExecuteRequest {
    command: String,
}

async fn web_execute(
    State(state): State<Arc<AppState>>,
    Form(request): Form<ExecuteRequest>,
) -> Response {
    info!(command = %request.command, "execution web request");

    // only the predeclared diagnostics may run
    if !state.commands.contains(&request.command) {
        return (StatusCode::BAD_REQUEST, "Unknown command").into_response();
    }

    let output = match state.platform.execute_command(&request.command).await {
        Ok(stdout) => format!("{stdout}\n(exit code 0)"),
        Err(command_error) => command_error.to_string(),
    };
    execution_page(&state, &request.command, &output).into_response()
}

/// Everything else is funneled into the provisioning form (302, captive
/// portal convention).
async fn captive_redirect() -> Response {
    debug!("redirecting to configuration page");
    (
        StatusCode::FOUND,
        [(header::LOCATION, "/web/configuration")],
    )
        .into_response()
}

async fn configure(state: &Arc<AppState>, request: &NetworkRequest) -> bool {
    let configured = state.handler.on_add_network_requested(request).await;
    if configured {
        // switch modes only after this response is flushed
        let _ = state.completion_tx.send(());
    }
    configured
}

fn configure_page(state: &AppState, ssid: &str, result: &str) -> Html<String> {
    let mut context = HashMap::new();
    context.insert("hostname", state.hostname.clone());
    context.insert("ssid", ssid.to_string());
    context.insert("configure_result", result.to_string());
    Html(util::render(CONFIGURE_TEMPLATE, &context))
}

fn operation_page(state: &AppState, identify_result: &str, restart_result: &str) -> Html<String> {
    let mut context = HashMap::new();
    context.insert("hostname", state.hostname.clone());
    context.insert("identify_result", identify_result.to_string());
    context.insert("restart_result", restart_result.to_string());
    Html(util::render(OPERATION_TEMPLATE, &context))
}

fn execution_page(state: &AppState, command: &str, output: &str) -> Html<String> {
    let options: String = state
        .commands
        .iter()
        .map(|cmd| format!("<option value=\"{cmd}\">{cmd}</option>"))
        .collect();

    let mut context = HashMap::new();
    context.insert("hostname", state.hostname.clone());
    context.insert("command_options", options);
    context.insert("command", command.to_string());
    context.insert("output", output.to_string());
    Html(util::render(EXECUTION_TEMPLATE, &context))
}
