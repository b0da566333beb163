//! Definition Controller (§4.E): the XRD state machine. Renders and
//! installs the composite kind's schema, starts the per-kind composite
//! controller once the host reports the schema Established, and tears
//! both down in the right order on delete.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use xp_types::conditions::{reasons, Condition, ConditionStatus, ConditionType};
use xp_types::dynamic::Composite;
use xp_types::xrd::CompositeResourceDefinition;

use crate::composite::CompositeReconciler;
use crate::engine::ControllerEngine;
use crate::error::Result;
use crate::finalizer::{ensure_finalizer, remove_finalizer};

pub const FIELD_MANAGER: &str = "xp-definition-controller";
pub const FINALIZER: &str = "xrd.xp.io/definition-controller";
const PENDING_REQUEUE: Duration = Duration::from_secs(10);
const ESTABLISHED_REQUEUE: Duration = Duration::from_secs(120);
/// How often a started composite controller lists and reconciles its kind.
const COMPOSITE_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct DefinitionReconciler {
    client: Client,
    engine: ControllerEngine,
}

impl DefinitionReconciler {
    pub fn new(client: Client, engine: ControllerEngine) -> Self {
        Self { client, engine }
    }

    pub async fn reconcile(&self, xrd: &mut CompositeResourceDefinition) -> Result<Action> {
        if xrd.meta().deletion_timestamp.is_some() {
            return self.reconcile_deletion(xrd).await;
        }

        let xrds: Api<CompositeResourceDefinition> = Api::all(self.client.clone());
        ensure_finalizer(&xrds, xrd, FINALIZER, FIELD_MANAGER).await?;

        let rendered = xp_schema::render_composite_schema(xrd)?;
        let mut crd = xp_schema::to_crd(&rendered);
        crd.metadata.owner_references = Some(vec![xrd.controller_owner_ref(&()).unwrap()]);

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let applied = crds
            .patch(&rendered.document_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&crd))
            .await?;

        let established = applied
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| c.type_ == "Established" && c.status == "True")
            });

        let mut conditions = xrd.status.clone().unwrap_or_default().conditions;
        if established {
            let storage_version = xrd.storage_version().map(|v| v.name.clone()).unwrap_or_else(|| rendered.versions[0].name.clone());
            let composite_gvk = GroupVersionKind::gvk(&xrd.spec.group, &storage_version, &xrd.spec.names.kind);
            self.start_composite_controller(xrd, &composite_gvk).await;
            conditions.set(Condition::new(
                ConditionType::Established,
                ConditionStatus::True,
                reasons::WATCHING_COMPOSITE_RESOURCE,
            ));
        } else {
            conditions.set(Condition::new(
                ConditionType::Established,
                ConditionStatus::False,
                reasons::BLOCKED,
            ));
        }

        let mut status = xrd.status.clone().unwrap_or_default();
        status.conditions = conditions;
        xrd.status = Some(status);

        Ok(if established {
            Action::requeue(ESTABLISHED_REQUEUE)
        } else {
            Action::requeue(PENDING_REQUEUE)
        })
    }

    async fn reconcile_deletion(&self, xrd: &mut CompositeResourceDefinition) -> Result<Action> {
        let mut conditions = xrd.status.clone().unwrap_or_default().conditions;
        conditions.set(Condition::new(
            ConditionType::Established,
            ConditionStatus::False,
            reasons::TERMINATING_COMPOSITE_RESOURCE,
        ));
        let mut status = xrd.status.clone().unwrap_or_default();
        status.conditions = conditions;
        xrd.status = Some(status);

        let storage = xrd
            .spec
            .versions
            .iter()
            .find(|v| v.storage)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| "v1".to_string());
        let composite_gvk = GroupVersionKind::gvk(&xrd.spec.group, &storage, &xrd.spec.names.kind);
        let resource = ApiResource::from_gvk(&composite_gvk);
        let instances: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let remaining = instances.list(&ListParams::default()).await?.items.len();
        if remaining > 0 {
            instances.delete_collection(&DeleteParams::default(), &ListParams::default()).await?;
            return Ok(Action::requeue(PENDING_REQUEUE));
        }

        self.engine.stop(&xrd.schema_name()).await;

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        match crds.delete(&xrd.schema_name(), &DeleteParams::default()).await {
            Ok(_) | Err(kube::Error::Api(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let xrds: Api<CompositeResourceDefinition> = Api::all(self.client.clone());
        remove_finalizer(&xrds, xrd, FINALIZER, FIELD_MANAGER).await?;
        info!(xrd = %xrd.name_any(), "schema removed and finalizer released");
        Ok(Action::await_change())
    }

    async fn start_composite_controller(&self, xrd: &CompositeResourceDefinition, composite_gvk: &GroupVersionKind) {
        let name = xrd.schema_name();
        let config_key = format!("{}/{}", composite_gvk.group, composite_gvk.version);
        let client = self.client.clone();
        let xrd_spec = xrd.spec.clone();
        let gvk = composite_gvk.clone();
        let composite_type_ref = xp_types::composition::CompositeTypeRef {
            api_version: join_api_version(&gvk.group, &gvk.version),
            kind: gvk.kind.clone(),
        };

        self.engine
            .start(&name, &config_key, move |mut cancel| async move {
                let reconciler = CompositeReconciler::new(client.clone());
                let resource = ApiResource::from_gvk(&gvk);
                let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match api.list(&ListParams::default()).await {
                        Ok(list) => {
                            for obj in list.items {
                                let mut composite = Composite(obj);
                                match reconciler
                                    .reconcile(&mut composite, &xrd_spec, &gvk, &composite_type_ref)
                                    .await
                                {
                                    Ok(_) => {
                                        if let Err(err) = api
                                            .patch(
                                                composite.name(),
                                                &PatchParams::apply(crate::composite::FIELD_MANAGER),
                                                &Patch::Apply(&composite.0),
                                            )
                                            .await
                                        {
                                            warn!(error = %err, composite = %composite.name(), "failed to persist composite state");
                                        }
                                    }
                                    Err(err) => {
                                        warn!(error = %err, composite = %composite.name(), "composite reconcile failed");
                                    }
                                }
                            }
                        }
                        Err(err) => warn!(error = %err, kind = %gvk.kind, "failed to list composite instances"),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(COMPOSITE_POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            })
            .await;
    }
}

fn join_api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}
