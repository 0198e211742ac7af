//! PowerVS Block CSI Driver Operator
//!
//! Deploys the IBM Power VS block CSI driver controller and node workloads
//! and keeps them in sync with the cluster's ClusterCSIDriver, proxy, CA
//! bundle, secrets, nodes and custom service endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use powervs_block_csi_driver_operator::{
    Error, ImageConfig, OperatorConfig, OperatorMetrics, Orchestrator, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PowerVS Block CSI Driver Operator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace the CSI driver is deployed to
    #[arg(long, env = "OPERAND_NAMESPACE", default_value = "openshift-cluster-csi-drivers")]
    namespace: String,

    /// CSI driver image
    #[arg(long, env = "DRIVER_IMAGE", default_value = "")]
    driver_image: String,

    /// External provisioner sidecar image
    #[arg(long, env = "PROVISIONER_IMAGE", default_value = "")]
    provisioner_image: String,

    /// External attacher sidecar image
    #[arg(long, env = "ATTACHER_IMAGE", default_value = "")]
    attacher_image: String,

    /// External resizer sidecar image
    #[arg(long, env = "RESIZER_IMAGE", default_value = "")]
    resizer_image: String,

    /// External snapshotter sidecar image
    #[arg(long, env = "SNAPSHOTTER_IMAGE", default_value = "")]
    snapshotter_image: String,

    /// Node driver registrar sidecar image
    #[arg(long, env = "NODE_DRIVER_REGISTRAR_IMAGE", default_value = "")]
    node_driver_registrar_image: String,

    /// Liveness probe sidecar image
    #[arg(long, env = "LIVENESS_PROBE_IMAGE", default_value = "")]
    liveness_probe_image: String,

    /// kube-rbac-proxy sidecar image
    #[arg(long, env = "KUBE_RBAC_PROXY_IMAGE", default_value = "")]
    kube_rbac_proxy_image: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Resync interval in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "1200")]
    resync_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: self.namespace.clone(),
            images: ImageConfig {
                driver: self.driver_image.clone(),
                provisioner: self.provisioner_image.clone(),
                attacher: self.attacher_image.clone(),
                resizer: self.resizer_image.clone(),
                snapshotter: self.snapshotter_image.clone(),
                node_driver_registrar: self.node_driver_registrar_image.clone(),
                liveness_probe: self.liveness_probe_image.clone(),
                kube_rbac_proxy: self.kube_rbac_proxy_image.clone(),
            },
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting PowerVS Block CSI Driver Operator");
    info!("  Version: {}", powervs_block_csi_driver_operator::VERSION);
    info!("  Namespace: {}", args.namespace);
    info!("  Resync interval: {}s", args.resync_interval_secs);

    let config = args.operator_config();
    let metrics = OperatorMetrics::new()?;
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // Start health server
    let health_addr = args.health_addr.clone();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, token).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let served = metrics.clone();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, served, token).await {
            error!("Metrics server error: {}", e);
        }
    });

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes API");

    Orchestrator::run(client, config, metrics, shutdown).await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Signals
// =============================================================================

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| {
        d.parse::<Directive>()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", d, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, shutdown: CancellationToken) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let (status, body) = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => (StatusCode::OK, "ok"),
                _ => (StatusCode::NOT_FOUND, "not found"),
            };
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    metrics: OperatorMetrics,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        },
                        _ => {
                            let mut response = Response::new(Body::from("not found"));
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            response
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
