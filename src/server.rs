use std::{net::IpAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    fanout::{SharedProgress, DEFAULT_CONCURRENCY},
    netdetect,
    scanner::{PortScanOptions, PortScanner, DEFAULT_PORT_TIMEOUT},
    subnet::{HostScanOptions, SubnetScanner, DEFAULT_HOST_TIMEOUT},
    types::{HostResult, HostScanEvent, HostTarget, PortResult, PortTarget, SubnetPrefix, MAX_HOST, MAX_PORT, MIN_HOST, MIN_PORT},
};

#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
}

#[derive(Debug, Default)]
struct ServerState {
    status: Status,
    results: Option<ScanOutput>,
    live_hosts: Vec<HostResult>,
    progress: Option<SharedProgress>,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    #[default]
    None,
    Ports,
    Hosts,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Done,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Status {
    pub kind: ScanKind,
    pub total: u64,
    pub scanned: u64,
    /// Open ports or alive hosts so far.
    pub found: u64,
    pub state: ScanState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanOutput {
    Ports { host: IpAddr, ports: PortResult },
    Hosts { prefix: String, hosts: Vec<HostResult> },
}

#[derive(Debug, Deserialize)]
pub struct PortScanRequest {
    pub target: String,
    #[serde(default)]
    pub start: Option<u16>,
    #[serde(default)]
    pub end: Option<u16>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HostScanRequest {
    /// `a.b.c` or any address in the /24. Defaults to the first local interface.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub start: Option<u8>,
    #[serde(default)]
    pub end: Option<u8>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/results", get(get_results))
        .route("/ports", post(post_port_scan))
        .route("/hosts", post(post_host_scan))
        .route("/hosts/live", get(get_live_hosts))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    let static_svc = ServeDir::new("ui").append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let app = router(AppState::default());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving UI");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let mut out = s.status.clone();
    if let Some(p) = s.progress.as_ref() {
        let (progress, found) = p.snapshot();
        out.scanned = progress.scanned;
        out.found = found;
    }
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.results.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn get_live_hosts(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    (StatusCode::OK, Json(s.live_hosts.clone()))
}

async fn post_port_scan(
    State(app): State<AppState>,
    Json(req): Json<PortScanRequest>,
) -> impl IntoResponse {
    let host: IpAddr = match req.target.trim().parse() {
        Ok(ip) => ip,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid IP: {e}")).into_response(),
    };
    let target = PortTarget::normalized(
        host,
        req.start.unwrap_or(MIN_PORT),
        req.end.unwrap_or(MAX_PORT),
    );
    let options = PortScanOptions {
        timeout: req
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PORT_TIMEOUT),
        max_concurrency: req.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
    };

    let progress = SharedProgress::new();
    let status = match begin(&app, ScanKind::Ports, target.len(), &progress).await {
        Ok(status) => status,
        Err(busy) => return busy.into_response(),
    };

    let scanner = PortScanner::new(options).with_shared(progress);
    let app2 = app.clone();
    tokio::spawn(async move {
        let ports = scanner.scan(target.host, target.start, target.end, None).await;
        finish(&app2, ScanOutput::Ports { host: target.host, ports }).await;
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

async fn post_host_scan(
    State(app): State<AppState>,
    Json(req): Json<HostScanRequest>,
) -> impl IntoResponse {
    let prefix = match req.prefix.as_deref() {
        Some(p) => match p.parse::<SubnetPrefix>() {
            Ok(prefix) => prefix,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        None => {
            let detected = netdetect::local_interfaces()
                .ok()
                .and_then(|ifaces| netdetect::default_prefix(&ifaces));
            match detected {
                Some(prefix) => prefix,
                None => {
                    return (StatusCode::BAD_REQUEST, "no prefix given and none detected")
                        .into_response()
                }
            }
        }
    };
    let target = HostTarget::normalized(
        prefix,
        req.start.unwrap_or(MIN_HOST),
        req.end.unwrap_or(MAX_HOST),
    );
    let options = HostScanOptions {
        timeout: req
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_HOST_TIMEOUT),
        max_concurrency: req.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        ..HostScanOptions::default()
    };

    let progress = SharedProgress::new();
    let status = match begin(&app, ScanKind::Hosts, target.len(), &progress).await {
        Ok(status) => status,
        Err(busy) => return busy.into_response(),
    };

    let scanner = SubnetScanner::new(options).with_shared(progress);
    let app2 = app.clone();
    tokio::spawn(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let live = app2.clone();
        let collector = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let HostScanEvent::HostFound(host) = event {
                    live.inner.write().await.live_hosts.push(host);
                }
            }
        });
        let hosts = scanner.scan(target.prefix, target.start, target.end, Some(&tx)).await;
        drop(tx);
        let _ = collector.await;
        finish(
            &app2,
            ScanOutput::Hosts {
                prefix: target.prefix.to_string(),
                hosts,
            },
        )
        .await;
    });

    (StatusCode::ACCEPTED, Json(status)).into_response()
}

/// Claim the server for a new scan. Running scans can't be cancelled, so a
/// second request while one is in flight gets `409 Conflict`.
async fn begin(
    app: &AppState,
    kind: ScanKind,
    total: u64,
    progress: &SharedProgress,
) -> std::result::Result<Status, (StatusCode, &'static str)> {
    let mut s = app.inner.write().await;
    if s.status.state == ScanState::Running {
        return Err((StatusCode::CONFLICT, "a scan is already running"));
    }
    s.status = Status {
        kind,
        total,
        scanned: 0,
        found: 0,
        state: ScanState::Running,
    };
    s.results = None;
    s.live_hosts.clear();
    s.progress = Some(progress.clone());
    Ok(s.status.clone())
}

async fn finish(app: &AppState, output: ScanOutput) {
    let mut s = app.inner.write().await;
    if let Some(p) = s.progress.take() {
        let (progress, found) = p.snapshot();
        s.status.scanned = progress.scanned;
        s.status.found = found;
    }
    s.status.state = ScanState::Done;
    s.results = Some(output);
}
