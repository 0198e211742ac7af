//! Main Orchestrator
//!
//! Wires informer caches, the hook pipelines and the two workload
//! controllers together and drives them from a `kube` controller watching
//! the operator's ClusterCSIDriver:
//! - Deployment: proxy, CA bundle, secret hashes, replicas, custom endpoints
//! - DaemonSet: proxy, CA bundle
//!
//! Changes to any watched dependency requeue the single ClusterCSIDriver.
//! Those triggers come from the same reflectors that feed the hook listers,
//! so a pass always sees the change that triggered it.

use crate::controlplane::applier::KubeApplier;
use crate::controlplane::assets::{AssetRenderer, ImageConfig, CONTROLLER_ASSET, NODE_ASSET};
use crate::controlplane::cache::spawn_reflector;
use crate::controlplane::metrics::OperatorMetrics;
use crate::controlplane::operator_client::{OperatorClient, OperatorSnapshot};
use crate::controlplane::service::{
    WorkloadController, CONTROLLER_SERVICE_CONTROLLER, NODE_SERVICE_CONTROLLER,
};
use crate::crd::{
    ClusterCSIDriver, ConditionStatus, Infrastructure, ManagementState,
    OperatorConditionApplyConfiguration, OperatorStatusApplyConfiguration,
    INFRASTRUCTURE_NAME, POWERVS_BLOCK_CSI_DRIVER,
};
use crate::domain::{ObjectLister, Workload};
use crate::error::{Error, ErrorAction, Result};
use crate::hooks::{
    CaBundleHook, CustomEndpointsHook, HookPipeline, ObservedProxyHook, ReplicasHook,
    SecretHashAnnotationHook,
};
use futures::channel::mpsc::UnboundedReceiver;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Operator Configuration
// =============================================================================

pub const DEFAULT_NAMESPACE: &str = "openshift-cluster-csi-drivers";
pub const OPERATOR_NAME: &str = "ibm-powervs-block-csi-driver-operator";
pub const OPERAND_NAME: &str = "ibm-powervs-block-csi-driver";
pub const CLOUD_CREDENTIALS_SECRET: &str = "ibm-powervs-block-cloud-credentials";
pub const METRICS_CERT_SECRET: &str =
    "ibm-powervs-block-csi-driver-controller-metrics-serving-cert";
pub const TRUSTED_CA_CONFIG_MAP: &str = "ibm-powervs-block-csi-driver-trusted-ca-bundle";

/// Field manager for status fields not owned by a workload controller
pub const MANAGEMENT_STATE_CONTROLLER: &str = "ManagementStateController";

/// Condition reporting an unsupported management state
pub const MANAGEMENT_STATE_DEGRADED: &str = "ManagementStateDegraded";

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operand runs in
    pub namespace: String,
    /// Field manager for operator-level status
    pub operator_name: String,
    pub operand_name: String,
    pub cloud_credentials_secret: String,
    pub metrics_cert_secret: String,
    pub trusted_ca_config_map: String,
    /// Operand images
    pub images: ImageConfig,
    /// Periodic resync of a healthy operand
    pub resync_interval: Duration,
    /// How long to wait for informer caches on startup
    pub cache_sync_timeout: Duration,
    /// Upper bound for retrying a single apply
    pub apply_timeout: Duration,
    /// Longest requeue delay after repeated failures
    pub max_error_backoff: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            operator_name: OPERATOR_NAME.to_string(),
            operand_name: OPERAND_NAME.to_string(),
            cloud_credentials_secret: CLOUD_CREDENTIALS_SECRET.to_string(),
            metrics_cert_secret: METRICS_CERT_SECRET.to_string(),
            trusted_ca_config_map: TRUSTED_CA_CONFIG_MAP.to_string(),
            images: ImageConfig::default(),
            resync_interval: Duration::from_secs(20 * 60),
            cache_sync_timeout: Duration::from_secs(120),
            apply_timeout: Duration::from_secs(30),
            max_error_backoff: Duration::from_secs(5 * 60),
        }
    }
}

// =============================================================================
// Listers
// =============================================================================

/// Read-only views of the cluster state the hooks depend on
#[derive(Clone)]
pub struct Listers {
    pub secrets: Arc<dyn ObjectLister<Secret>>,
    pub config_maps: Arc<dyn ObjectLister<ConfigMap>>,
    pub nodes: Arc<dyn ObjectLister<Node>>,
    pub infrastructures: Arc<dyn ObjectLister<Infrastructure>>,
}

/// Objects touched by the dependency reflectors, after their stores saw them
pub struct Triggers {
    pub secrets: UnboundedReceiver<Secret>,
    pub config_maps: UnboundedReceiver<ConfigMap>,
    pub nodes: UnboundedReceiver<Node>,
    pub infrastructures: UnboundedReceiver<Infrastructure>,
}

impl Listers {
    /// Start reflectors for every dependency and wait for them to sync
    pub async fn start(client: &Client, config: &OperatorConfig) -> Result<(Self, Triggers)> {
        let ns = config.namespace.as_str();
        let timeout = config.cache_sync_timeout;

        let (secrets, secret_events) = spawn_reflector(
            Api::<Secret>::namespaced(client.clone(), ns),
            watcher::Config::default(),
            timeout,
        )
        .await?;
        let (config_maps, config_map_events) = spawn_reflector(
            Api::<ConfigMap>::namespaced(client.clone(), ns),
            watcher::Config::default(),
            timeout,
        )
        .await?;
        let (nodes, node_events) = spawn_reflector(
            Api::<Node>::all(client.clone()),
            watcher::Config::default(),
            timeout,
        )
        .await?;
        let (infrastructures, infrastructure_events) = spawn_reflector(
            Api::<Infrastructure>::all(client.clone()),
            infrastructure_watch_config(),
            timeout,
        )
        .await?;

        let listers = Self {
            secrets: Arc::new(secrets),
            config_maps: Arc::new(config_maps),
            nodes: Arc::new(nodes),
            infrastructures: Arc::new(infrastructures),
        };
        let triggers = Triggers {
            secrets: secret_events,
            config_maps: config_map_events,
            nodes: node_events,
            infrastructures: infrastructure_events,
        };
        Ok((listers, triggers))
    }
}

fn infrastructure_watch_config() -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={}", INFRASTRUCTURE_NAME))
}

// =============================================================================
// Hook Pipelines
// =============================================================================

/// Hooks for the controller Deployment, in application order
pub fn controller_pipeline(config: &OperatorConfig, listers: &Listers) -> HookPipeline<Deployment> {
    HookPipeline::new()
        .with_hook(ObservedProxyHook::new())
        .with_hook(CaBundleHook::new(
            &config.namespace,
            &config.trusted_ca_config_map,
            listers.config_maps.clone(),
        ))
        .with_hook(SecretHashAnnotationHook::new(
            &config.namespace,
            &config.cloud_credentials_secret,
            listers.secrets.clone(),
        ))
        .with_hook(SecretHashAnnotationHook::new(
            &config.namespace,
            &config.metrics_cert_secret,
            listers.secrets.clone(),
        ))
        .with_hook(ReplicasHook::new(listers.nodes.clone()))
        .with_hook(CustomEndpointsHook::new(listers.infrastructures.clone()))
}

/// Hooks for the node DaemonSet, in application order
pub fn node_pipeline(config: &OperatorConfig, listers: &Listers) -> HookPipeline<DaemonSet> {
    HookPipeline::new()
        .with_hook(ObservedProxyHook::new())
        .with_hook(CaBundleHook::new(
            &config.namespace,
            &config.trusted_ca_config_map,
            listers.config_maps.clone(),
        ))
}

// =============================================================================
// Context
// =============================================================================

/// State shared by every reconcile pass
pub struct Context {
    config: OperatorConfig,
    operator_client: OperatorClient,
    applier: KubeApplier,
    controller_service: WorkloadController<Deployment>,
    node_service: WorkloadController<DaemonSet>,
    metrics: OperatorMetrics,
    consecutive_failures: Mutex<u32>,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        listers: &Listers,
        metrics: OperatorMetrics,
    ) -> Self {
        let renderer = AssetRenderer::new(&config.namespace, config.images.clone());
        let controller_service = WorkloadController::new(
            CONTROLLER_SERVICE_CONTROLLER,
            CONTROLLER_ASSET,
            renderer.clone(),
            controller_pipeline(&config, listers),
        );
        let node_service = WorkloadController::new(
            NODE_SERVICE_CONTROLLER,
            NODE_ASSET,
            renderer,
            node_pipeline(&config, listers),
        );

        Self {
            operator_client: OperatorClient::new(client.clone(), POWERVS_BLOCK_CSI_DRIVER),
            applier: KubeApplier::new(client).with_max_elapsed(config.apply_timeout),
            controller_service,
            node_service,
            metrics,
            consecutive_failures: Mutex::new(0),
            config,
        }
    }

    /// Requeue delay after a failure, doubling with each consecutive one
    fn error_backoff(&self) -> Duration {
        let mut failures = self.consecutive_failures.lock();
        *failures = failures.saturating_add(1);
        let exp = (*failures - 1).min(16);
        Duration::from_secs(5)
            .saturating_mul(1 << exp)
            .min(self.config.max_error_backoff)
    }

    fn reset_backoff(&self) {
        *self.consecutive_failures.lock() = 0;
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs the operator until `shutdown` is cancelled
pub struct Orchestrator;

impl Orchestrator {
    pub async fn run(
        client: Client,
        config: OperatorConfig,
        metrics: OperatorMetrics,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(namespace = %config.namespace, "Starting informer caches");
        let (listers, triggers) = Listers::start(&client, &config).await?;

        let context = Arc::new(Context::new(client.clone(), config, &listers, metrics));

        let drivers: Api<ClusterCSIDriver> = Api::all(client.clone());
        let driver_config = watcher::Config::default()
            .fields(&format!("metadata.name={}", POWERVS_BLOCK_CSI_DRIVER));

        info!(driver = POWERVS_BLOCK_CSI_DRIVER, "Starting ClusterCSIDriver controller");
        Controller::new(drivers, driver_config)
            .watches_stream(trigger_stream(triggers.secrets), |_| Some(driver_ref()))
            .watches_stream(trigger_stream(triggers.config_maps), |_| Some(driver_ref()))
            .watches_stream(trigger_stream(triggers.nodes), |_| Some(driver_ref()))
            .watches_stream(trigger_stream(triggers.infrastructures), |_| {
                Some(driver_ref())
            })
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!(name = %obj.name, "Reconciled"),
                    Err(e) => warn!(error = %e, "Reconcile failed"),
                }
            })
            .await;

        info!("Controller stopped");
        Ok(())
    }
}

fn driver_ref() -> ObjectRef<ClusterCSIDriver> {
    ObjectRef::new(POWERVS_BLOCK_CSI_DRIVER)
}

fn trigger_stream<K>(
    events: UnboundedReceiver<K>,
) -> impl Stream<Item = std::result::Result<K, watcher::Error>> + Send + 'static
where
    K: Send + 'static,
{
    events.map(Ok)
}

// =============================================================================
// Reconcile
// =============================================================================

/// What a pass does for the requested management state
#[derive(Debug)]
enum ManagementPlan {
    /// Leave the operand alone
    Skip,
    /// Report the condition, then sync the operand
    Sync(OperatorConditionApplyConfiguration),
    /// Report the condition, then fail the pass
    Reject(OperatorConditionApplyConfiguration, Error),
}

fn management_plan(state: ManagementState) -> ManagementPlan {
    match state {
        ManagementState::Unmanaged => ManagementPlan::Skip,
        ManagementState::Removed => {
            let err = Error::UnsupportedManagementState {
                state: state.to_string(),
            };
            let condition = management_condition(ConditionStatus::True)
                .with_reason("Unsupported")
                .with_message(err.to_string());
            ManagementPlan::Reject(condition, err)
        }
        ManagementState::Managed | ManagementState::Force => ManagementPlan::Sync(
            management_condition(ConditionStatus::False).with_reason("AsExpected"),
        ),
    }
}

fn management_condition(status: ConditionStatus) -> OperatorConditionApplyConfiguration {
    OperatorConditionApplyConfiguration::new(MANAGEMENT_STATE_DEGRADED, status)
}

async fn reconcile(driver: Arc<ClusterCSIDriver>, ctx: Arc<Context>) -> Result<Action> {
    let snapshot = ctx.operator_client.snapshot().await?;
    let spec = snapshot.operator_spec();
    let state = spec.management_state();
    debug!(name = %driver.name_any(), state = %state, "Reconciling");

    match management_plan(state) {
        ManagementPlan::Skip => {
            info!("Operand is unmanaged, skipping sync");
            return Ok(Action::requeue(ctx.config.resync_interval));
        }
        ManagementPlan::Reject(condition, err) => {
            apply_conditions(&ctx, &snapshot, MANAGEMENT_STATE_CONTROLLER, vec![condition]).await?;
            return Err(err);
        }
        ManagementPlan::Sync(condition) => {
            apply_conditions(&ctx, &snapshot, MANAGEMENT_STATE_CONTROLLER, vec![condition]).await?;
        }
    }

    let deployment = sync_workload(&ctx, &snapshot, &ctx.controller_service).await;
    let daemon_set = sync_workload(&ctx, &snapshot, &ctx.node_service).await;

    let deployment = deployment?;
    daemon_set?;

    let mut status = OperatorStatusApplyConfiguration::default()
        .with_ready_replicas(deployment.ready_replicas());
    if let Some(generation) = snapshot.generation() {
        status = status.with_observed_generation(generation);
    }
    let operator_name = ctx.config.operator_name.as_str();
    let current = snapshot.owned_operator_status(operator_name)?;
    ctx.operator_client
        .apply_operator_status(operator_name, current.as_ref(), &status)
        .await?;

    ctx.reset_backoff();
    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Sync one workload and record its conditions, returning the sync outcome
async fn sync_workload<W>(
    ctx: &Context,
    snapshot: &OperatorSnapshot,
    controller: &WorkloadController<W>,
) -> Result<W>
where
    W: Workload + DeserializeOwned,
    KubeApplier: crate::domain::ManifestApplier<W>,
{
    let name = controller.name();
    let outcome = {
        let _timer = ctx.metrics.count_and_measure(name);
        controller.sync(snapshot.operator_spec(), &ctx.applier).await
    };

    match &outcome {
        Ok(workload) => ctx.metrics.set_available(name, workload.is_available()),
        Err(e) => {
            ctx.metrics.count_failure(name, e);
            error!(controller = name, error = %e, "Sync failed");
        }
    }

    let previous = snapshot.owned_operator_status(name)?;
    let conditions = controller.conditions(outcome.as_ref(), previous.as_ref());
    let desired = desired_status(conditions, previous.as_ref());
    ctx.operator_client
        .apply_operator_status(name, previous.as_ref(), &desired)
        .await?;
    outcome
}

/// Apply `conditions` as the status owned by `field_manager`
async fn apply_conditions(
    ctx: &Context,
    snapshot: &OperatorSnapshot,
    field_manager: &str,
    conditions: Vec<OperatorConditionApplyConfiguration>,
) -> Result<()> {
    let previous = snapshot.owned_operator_status(field_manager)?;
    let desired = desired_status(conditions, previous.as_ref());
    ctx.operator_client
        .apply_operator_status(field_manager, previous.as_ref(), &desired)
        .await?;
    Ok(())
}

/// Status holding exactly `conditions`, with transition times carried over
/// from `previous` where a condition did not change
fn desired_status(
    conditions: Vec<OperatorConditionApplyConfiguration>,
    previous: Option<&OperatorStatusApplyConfiguration>,
) -> OperatorStatusApplyConfiguration {
    conditions
        .into_iter()
        .fold(OperatorStatusApplyConfiguration::default(), |status, c| {
            status.with_condition(c, previous)
        })
}

fn error_policy(driver: Arc<ClusterCSIDriver>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(name = %driver.name_any(), error = %error, "Reconcile error");
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(ctx.error_backoff()),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}
