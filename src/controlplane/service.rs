//! Workload Controllers
//!
//! A workload controller owns one operand workload: it renders the embedded
//! manifest, runs the hook pipeline over it, applies the result, and
//! reports `<Name>Available`, `<Name>Progressing` and `<Name>Degraded`
//! conditions for it.

use crate::controlplane::assets::AssetRenderer;
use crate::crd::{
    ConditionStatus, OperatorConditionApplyConfiguration, OperatorSpec,
    OperatorStatusApplyConfiguration,
};
use crate::domain::{ManifestApplier, Workload};
use crate::error::{Error, Result};
use crate::hooks::HookPipeline;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Field manager and condition prefix of the Deployment controller
pub const CONTROLLER_SERVICE_CONTROLLER: &str = "PowerVSBlockDriverControllerServiceController";

/// Field manager and condition prefix of the DaemonSet controller
pub const NODE_SERVICE_CONTROLLER: &str = "PowerVSBlockDriverNodeServiceController";

/// Renders, mutates and applies one workload
pub struct WorkloadController<W: Workload> {
    name: String,
    asset: &'static str,
    renderer: AssetRenderer,
    pipeline: HookPipeline<W>,
}

impl<W> WorkloadController<W>
where
    W: Workload + DeserializeOwned,
{
    pub fn new(
        name: impl Into<String>,
        asset: &'static str,
        renderer: AssetRenderer,
        pipeline: HookPipeline<W>,
    ) -> Self {
        Self {
            name: name.into(),
            asset,
            renderer,
            pipeline,
        }
    }

    /// Controller name, also used as field manager
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the manifest and run every hook over it
    pub fn render(&self, spec: &OperatorSpec) -> Result<W> {
        let mut manifest: W = self.renderer.render(self.asset, spec)?;
        self.pipeline.run(spec, &mut manifest)?;
        debug!(
            controller = %self.name,
            kind = W::KIND,
            hooks = self.pipeline.len(),
            "Rendered manifest"
        );
        Ok(manifest)
    }

    /// Render and apply the workload, returning the object as stored
    pub async fn sync(
        &self,
        spec: &OperatorSpec,
        applier: &dyn ManifestApplier<W>,
    ) -> Result<W> {
        let manifest = self.render(spec)?;
        let applied = applier.apply(&manifest, &self.name).await?;
        info!(
            controller = %self.name,
            kind = W::KIND,
            available = applied.is_available(),
            progressing = applied.is_progressing(),
            "Synced workload"
        );
        Ok(applied)
    }

    /// Conditions describing the outcome of the last sync pass.
    ///
    /// A failed pass says nothing new about the workload, so the
    /// availability conditions this controller already owns in `previous`
    /// are carried over unchanged.
    pub fn conditions(
        &self,
        outcome: std::result::Result<&W, &Error>,
        previous: Option<&OperatorStatusApplyConfiguration>,
    ) -> Vec<OperatorConditionApplyConfiguration> {
        let available = format!("{}Available", self.name);
        let progressing = format!("{}Progressing", self.name);
        let degraded = format!("{}Degraded", self.name);

        match outcome {
            Ok(workload) => {
                let available = if workload.is_available() {
                    OperatorConditionApplyConfiguration::new(available, ConditionStatus::True)
                        .with_reason("AsExpected")
                } else {
                    OperatorConditionApplyConfiguration::new(available, ConditionStatus::False)
                        .with_reason("Deploying")
                        .with_message(format!("Waiting for {} to become available", W::KIND))
                };
                let progressing = if workload.is_progressing() {
                    OperatorConditionApplyConfiguration::new(progressing, ConditionStatus::True)
                        .with_reason("Deploying")
                        .with_message(format!("{} is rolling out", W::KIND))
                } else {
                    OperatorConditionApplyConfiguration::new(progressing, ConditionStatus::False)
                        .with_reason("AsExpected")
                };
                vec![
                    available,
                    progressing,
                    OperatorConditionApplyConfiguration::new(degraded, ConditionStatus::False)
                        .with_reason("AsExpected"),
                ]
            }
            Err(err) => {
                let carried = |type_: String| {
                    previous
                        .and_then(|p| p.condition(&type_))
                        .cloned()
                        .unwrap_or_else(|| {
                            OperatorConditionApplyConfiguration::new(type_, ConditionStatus::Unknown)
                                .with_reason("SyncError")
                        })
                };
                vec![
                    carried(available),
                    carried(progressing),
                    OperatorConditionApplyConfiguration::new(degraded, ConditionStatus::True)
                        .with_reason("SyncError")
                        .with_message(err.to_string()),
                ]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::assets::{ImageConfig, CONTROLLER_ASSET, NODE_ASSET};
    use crate::controlplane::cache::MemoryLister;
    use crate::crd::{
        Infrastructure, InfrastructureSpec, InfrastructureStatus, PlatformStatus,
        PowerVSPlatformStatus, PowerVSServiceEndpoint, INFRASTRUCTURE_NAME,
    };
    use crate::hooks::{hook_fn, CustomEndpointsHook, ObservedProxyHook};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, DeploymentStatus};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingApplier {
        applied: Mutex<Vec<(String, String)>>,
        available: bool,
    }

    #[async_trait]
    impl ManifestApplier<Deployment> for RecordingApplier {
        async fn apply(&self, manifest: &Deployment, field_manager: &str) -> Result<Deployment> {
            self.applied.lock().push((
                manifest.metadata.name.clone().unwrap_or_default(),
                field_manager.to_string(),
            ));
            let mut stored = manifest.clone();
            if self.available {
                stored.status = Some(DeploymentStatus {
                    available_replicas: Some(1),
                    ready_replicas: Some(1),
                    updated_replicas: Some(1),
                    ..Default::default()
                });
            }
            Ok(stored)
        }
    }

    fn renderer() -> AssetRenderer {
        AssetRenderer::new("openshift-cluster-csi-drivers", ImageConfig::default())
    }

    fn infrastructure(endpoints: &[(&str, &str)]) -> Infrastructure {
        let mut infra = Infrastructure::new(INFRASTRUCTURE_NAME, InfrastructureSpec::default());
        infra.status = Some(InfrastructureStatus {
            platform_status: Some(PlatformStatus {
                type_: "PowerVS".into(),
                powervs: Some(PowerVSPlatformStatus {
                    service_endpoints: endpoints
                        .iter()
                        .map(|(name, url)| PowerVSServiceEndpoint {
                            name: name.to_string(),
                            url: url.to_string(),
                        })
                        .collect(),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        });
        infra
    }

    #[test]
    fn test_render_runs_pipeline() {
        let infras = Arc::new(MemoryLister::new());
        infras.insert(infrastructure(&[("pi", "https://power.example.com")]));

        let controller = WorkloadController::new(
            CONTROLLER_SERVICE_CONTROLLER,
            CONTROLLER_ASSET,
            renderer(),
            HookPipeline::<Deployment>::new()
                .with_hook(ObservedProxyHook::new())
                .with_hook(CustomEndpointsHook::new(infras)),
        );

        let mut deployment = controller.render(&OperatorSpec::default()).unwrap();
        let env = deployment
            .container_mut("csi-driver")
            .and_then(|c| c.env.clone())
            .unwrap_or_default();
        assert!(env.iter().any(|e| e.name == "IBMCLOUD_POWER_API_ENDPOINT"
            && e.value.as_deref() == Some("https://power.example.com")));
    }

    #[test]
    fn test_render_stops_on_hook_error() {
        let controller = WorkloadController::new(
            NODE_SERVICE_CONTROLLER,
            NODE_ASSET,
            renderer(),
            HookPipeline::<DaemonSet>::new().with_hook(hook_fn(
                "broken",
                |_: &OperatorSpec, _: &mut DaemonSet| Err(Error::CacheNotSynced("Node".into())),
            )),
        );

        assert_matches!(
            controller.render(&OperatorSpec::default()),
            Err(Error::CacheNotSynced(_))
        );
    }

    #[tokio::test]
    async fn test_sync_applies_with_controller_field_manager() {
        let controller = WorkloadController::new(
            CONTROLLER_SERVICE_CONTROLLER,
            CONTROLLER_ASSET,
            renderer(),
            HookPipeline::<Deployment>::new(),
        );
        let applier = RecordingApplier {
            applied: Mutex::new(Vec::new()),
            available: true,
        };

        let applied = controller
            .sync(&OperatorSpec::default(), &applier)
            .await
            .unwrap();

        assert!(applied.is_available());
        assert_eq!(
            applier.applied.lock().as_slice(),
            &[(
                "ibm-powervs-block-csi-driver-controller".to_string(),
                CONTROLLER_SERVICE_CONTROLLER.to_string()
            )]
        );
    }

    #[test]
    fn test_conditions() {
        let controller = WorkloadController::new(
            CONTROLLER_SERVICE_CONTROLLER,
            CONTROLLER_ASSET,
            renderer(),
            HookPipeline::<Deployment>::new(),
        );

        let conditions = controller.conditions(Ok(&Deployment::default()), None);
        assert_eq!(conditions.len(), 3);
        assert_eq!(
            conditions[0].type_.as_deref(),
            Some("PowerVSBlockDriverControllerServiceControllerAvailable")
        );
        assert_eq!(conditions[0].status, Some(ConditionStatus::False));
        assert_eq!(conditions[1].status, Some(ConditionStatus::True));
        assert_eq!(conditions[2].status, Some(ConditionStatus::False));

        let err = Error::not_found("Secret", "ns/creds");
        let conditions = controller.conditions(Err(&err), None);
        assert_eq!(conditions.len(), 3);
        assert_eq!(conditions[0].status, Some(ConditionStatus::Unknown));
        assert_eq!(conditions[1].status, Some(ConditionStatus::Unknown));
        assert_eq!(
            conditions[2].type_.as_deref(),
            Some("PowerVSBlockDriverControllerServiceControllerDegraded")
        );
        assert_eq!(conditions[2].status, Some(ConditionStatus::True));
        assert_eq!(conditions[2].reason.as_deref(), Some("SyncError"));
    }

    #[test]
    fn test_failed_sync_keeps_availability() {
        let controller = WorkloadController::new(
            CONTROLLER_SERVICE_CONTROLLER,
            CONTROLLER_ASSET,
            renderer(),
            HookPipeline::<Deployment>::new(),
        );
        let healthy = Deployment {
            status: Some(DeploymentStatus {
                available_replicas: Some(1),
                ready_replicas: Some(1),
                updated_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };

        let owned = controller
            .conditions(Ok(&healthy), None)
            .into_iter()
            .fold(OperatorStatusApplyConfiguration::default(), |status, c| {
                status.with_condition(c, None)
            });

        let err = Error::CacheNotSynced("Secret".into());
        let desired = controller
            .conditions(Err(&err), Some(&owned))
            .into_iter()
            .fold(OperatorStatusApplyConfiguration::default(), |status, c| {
                status.with_condition(c, Some(&owned))
            });

        let types: Vec<_> = desired
            .conditions
            .iter()
            .flatten()
            .filter_map(|c| c.type_.clone())
            .collect();
        assert_eq!(
            types,
            vec![
                "PowerVSBlockDriverControllerServiceControllerAvailable",
                "PowerVSBlockDriverControllerServiceControllerProgressing",
                "PowerVSBlockDriverControllerServiceControllerDegraded",
            ]
        );

        let available = "PowerVSBlockDriverControllerServiceControllerAvailable";
        assert_eq!(desired.condition(available), owned.condition(available));
        let degraded = desired
            .condition("PowerVSBlockDriverControllerServiceControllerDegraded")
            .unwrap();
        assert_eq!(degraded.status, Some(ConditionStatus::True));
    }
}
