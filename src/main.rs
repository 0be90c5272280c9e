//! Crash MCP Server
//!
//! This binary runs an MCP server exposing kernel crash dump analysis over
//! stdio (default) or Streamable HTTP. A `check` subcommand probes the host
//! for crash-analysis prerequisites.

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use crash_mcp::config::{check_system_requirements, validate_crash_utility, Config};
use crash_mcp::server::CrashMcpServer;
use crash_mcp::session::SessionEngine;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_service::Service;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "crash-mcp",
    version,
    about = "MCP server for kernel crash dump analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Run the MCP server over Streamable HTTP (SSE)
    ServeHttp(ServeHttpArgs),
    /// Probe host prerequisites for crash analysis and print them as JSON
    Check,
}

#[derive(Args)]
struct ServeHttpArgs {
    /// Bind address (e.g., 127.0.0.1:8080)
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Use stateless mode (POST only; no sessions)
    #[arg(long)]
    stateless: bool,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the MCP protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crash_mcp=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve().await,
        Command::ServeHttp(args) => run_serve_http(args).await,
        Command::Check => run_check().await,
    }
}

/// Probe the host and log anything that will limit analysis.
async fn log_requirements(config: &Config) {
    let requirements = check_system_requirements(config).await;
    info!(?requirements, "System requirements");
    if !requirements.crash_utility {
        error!(
            binary = %config.crash_binary,
            "Crash utility not available - sessions will fail to start"
        );
    }
    if !requirements.crash_dump_access {
        warn!(path = %config.crash_dump_path.display(), "No access to crash dump directory");
    }
    if !requirements.kernel_access {
        warn!(path = %config.kernel_path.display(), "No access to kernel directory");
    }
    if !requirements.root_access {
        warn!("Not running as root - may have limited access to crash dumps");
    }
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_serve() -> anyhow::Result<()> {
    info!("Starting Crash MCP Server (stdio)");
    let config = Config::from_env();
    log_requirements(&config).await;

    let engine = Arc::new(SessionEngine::new(&config));
    let server = CrashMcpServer::new(engine.clone(), &config);

    info!("MCP server listening on stdio");
    let service = server.serve(stdio()).await?;

    tokio::select! {
        res = service.waiting() => {
            if let Err(e) = res {
                error!(error = %e, "Transport error");
            }
        }
        _ = wait_for_shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // An active crash subprocess must never outlive the server.
    engine.close().await;
    info!("Server stopped");
    Ok(())
}

async fn run_serve_http(args: ServeHttpArgs) -> anyhow::Result<()> {
    info!("Starting Crash MCP Server (streamable HTTP)");
    let config = Config::from_env();
    log_requirements(&config).await;

    let bind_addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    let engine = Arc::new(SessionEngine::new(&config));

    let session_manager = Arc::new(LocalSessionManager::default());
    let cancel = tokio_util::sync::CancellationToken::new();
    let http_config = StreamableHttpServerConfig {
        sse_keep_alive: (args.sse_keep_alive_secs != 0)
            .then(|| Duration::from_secs(args.sse_keep_alive_secs)),
        stateful_mode: !args.stateless,
    };

    let engine_for_factory = engine.clone();
    let config_for_factory = config.clone();
    let service = StreamableHttpService::new(
        move || {
            Ok(CrashMcpServer::new(
                engine_for_factory.clone(),
                &config_for_factory,
            ))
        },
        session_manager,
        http_config,
    );

    let allowed: HashSet<String> = args
        .allow_origin
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let service = OriginGuard {
        inner: service,
        allowed: Arc::new(allowed),
    };

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!("MCP HTTP server listening on http://{bind_addr}");

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_on_signal.cancel();
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, _) = res.map_err(|e| anyhow::anyhow!("accept failed: {e}"))?;
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(svc));
                    if let Err(err) = conn.await {
                        error!("http connection error: {err}");
                    }
                });
            }
        }
    }

    engine.close().await;
    info!("Server stopped");
    Ok(())
}

async fn run_check() -> anyhow::Result<()> {
    let config = Config::from_env();
    let requirements = check_system_requirements(&config).await;
    let crash_version = validate_crash_utility(&config.crash_binary).await;
    let report = serde_json::json!({
        "requirements": requirements,
        "crash_version": crash_version,
        "crash_dump_path": config.crash_dump_path.display().to_string(),
        "kernel_path": config.kernel_path.display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Rejects HTTP requests whose Origin header is not on the allow-list.
/// Requests without an Origin header (curl, same-process clients) pass.
#[derive(Clone)]
struct OriginGuard<S> {
    inner: S,
    allowed: Arc<HashSet<String>>,
}

impl<B, S> Service<Request<B>> for OriginGuard<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<
            Request<B>,
            Response = Response<BoxBody<Bytes, std::convert::Infallible>>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let origin_ok = match req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
            Some(origin) => self.allowed.contains(origin),
            None => true,
        };
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if !origin_ok {
                let resp = Response::builder()
                    .status(StatusCode::FORBIDDEN)
                    .body(Full::new(Bytes::from("Forbidden")).boxed())
                    .expect("static response");
                return Ok(resp);
            }
            inner.call(req).await
        })
    }
}
