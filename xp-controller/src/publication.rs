//! Publication Controller (§4.F): when an XRD offers a claim kind,
//! render and install the claim schema and keep the claim controller
//! running. Deletion mirrors the Definition Controller, but only for
//! the claim schema — the composite schema's lifecycle stays with
//! `definition`.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::warn;

use xp_types::dynamic::Claim;
use xp_types::xrd::CompositeResourceDefinition;

use crate::claim::ClaimReconciler;
use crate::engine::ControllerEngine;
use crate::error::Result;
use crate::finalizer::{ensure_finalizer, remove_finalizer};

pub const FIELD_MANAGER: &str = "xp-publication-controller";
pub const CLAIM_FINALIZER: &str = "claim.xp.io/claim-controller";
const PENDING_REQUEUE: Duration = Duration::from_secs(10);
const ESTABLISHED_REQUEUE: Duration = Duration::from_secs(120);
const CLAIM_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct PublicationReconciler {
    client: Client,
    engine: ControllerEngine,
}

impl PublicationReconciler {
    pub fn new(client: Client, engine: ControllerEngine) -> Self {
        Self { client, engine }
    }

    pub async fn reconcile(&self, xrd: &CompositeResourceDefinition) -> Result<Action> {
        let Some(claim_schema_name) = xrd.claim_schema_name() else {
            return Ok(Action::await_change());
        };

        if xrd.meta().deletion_timestamp.is_some() {
            return self.reconcile_deletion(xrd, &claim_schema_name).await;
        }

        let Some(rendered) = xp_schema::render_claim_schema(xrd)? else {
            return Ok(Action::await_change());
        };
        let mut crd = xp_schema::to_crd(&rendered);
        crd.metadata.owner_references = Some(vec![xrd.controller_owner_ref(&()).unwrap()]);

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let applied = crds
            .patch(&claim_schema_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&crd))
            .await?;

        let established = applied
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| c.type_ == "Established" && c.status == "True")
            });

        if established {
            let claim_names = xrd.spec.claim_names.clone().expect("checked above");
            let storage_version = xrd.storage_version().map(|v| v.name.clone()).unwrap_or_else(|| rendered.versions[0].name.clone());
            let claim_gvk = GroupVersionKind::gvk(&xrd.spec.group, &storage_version, &claim_names.kind);
            let composite_gvk = GroupVersionKind::gvk(&xrd.spec.group, &storage_version, &xrd.spec.names.kind);
            self.start_claim_controller(&claim_schema_name, &claim_gvk, &composite_gvk).await;
            Ok(Action::requeue(ESTABLISHED_REQUEUE))
        } else {
            Ok(Action::requeue(PENDING_REQUEUE))
        }
    }

    async fn reconcile_deletion(&self, xrd: &CompositeResourceDefinition, claim_schema_name: &str) -> Result<Action> {
        let Some(claim_names) = xrd.spec.claim_names.clone() else {
            return Ok(Action::await_change());
        };
        let storage_version = xrd.storage_version().map(|v| v.name.clone()).unwrap_or_else(|| "v1".to_string());
        let claim_gvk = GroupVersionKind::gvk(&xrd.spec.group, &storage_version, &claim_names.kind);
        let resource = ApiResource::from_gvk(&claim_gvk);
        let instances: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let remaining = instances.list(&ListParams::default()).await?.items.len();
        if remaining > 0 {
            instances.delete_collection(&DeleteParams::default(), &ListParams::default()).await?;
            return Ok(Action::requeue(PENDING_REQUEUE));
        }

        self.engine.stop(claim_schema_name).await;

        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        match crds.delete(claim_schema_name, &DeleteParams::default()).await {
            Ok(_) | Err(kube::Error::Api(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Action::await_change())
    }

    async fn start_claim_controller(&self, name: &str, claim_gvk: &GroupVersionKind, composite_gvk: &GroupVersionKind) {
        let config_key = format!("{}/{}", claim_gvk.group, claim_gvk.version);
        let client = self.client.clone();
        let claim_gvk = claim_gvk.clone();
        let composite_gvk = composite_gvk.clone();

        self.engine
            .start(name, &config_key, move |mut cancel| async move {
                let reconciler = ClaimReconciler::new(client.clone());
                let claim_resource = ApiResource::from_gvk(&claim_gvk);
                let claim_api: Api<DynamicObject> = Api::all_with(client.clone(), &claim_resource);
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match claim_api.list(&ListParams::default()).await {
                        Ok(list) => {
                            for obj in list.items {
                                let namespace = obj.metadata.namespace.clone();
                                let mut claim = Claim(obj);
                                if let Err(err) = reconcile_one_claim(
                                    &client,
                                    &reconciler,
                                    &mut claim,
                                    &composite_gvk,
                                    &claim_api,
                                )
                                .await
                                {
                                    warn!(error = %err, claim = %claim.name(), namespace = ?namespace, "claim reconcile failed");
                                }
                            }
                        }
                        Err(err) => warn!(error = %err, kind = %claim_gvk.kind, "failed to list claim instances"),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(CLAIM_POLL_INTERVAL) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            })
            .await;
    }
}

async fn reconcile_one_claim(
    client: &Client,
    reconciler: &ClaimReconciler,
    claim: &mut Claim,
    composite_gvk: &GroupVersionKind,
    claim_api: &Api<DynamicObject>,
) -> Result<()> {
    if claim.meta().deletion_timestamp.is_some() {
        let composite_gone = match claim.resource_ref() {
            Some(resource_ref) => {
                let resource = ApiResource::from_gvk(composite_gvk);
                let composite_api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
                match composite_api.get(&resource_ref.name).await {
                    Ok(obj) => reconciler.delete_composite(composite_gvk, &xp_types::dynamic::Composite(obj)).await?,
                    Err(kube::Error::Api(e)) if e.code == 404 => true,
                    Err(e) => return Err(e.into()),
                }
            }
            None => true,
        };
        if composite_gone {
            remove_finalizer(claim_api, &claim.0, CLAIM_FINALIZER, crate::claim::FIELD_MANAGER).await?;
        }
        return Ok(());
    }

    ensure_finalizer(claim_api, &claim.0, CLAIM_FINALIZER, crate::claim::FIELD_MANAGER).await?;
    let mut composite = reconciler.ensure_composite(claim, composite_gvk).await?;
    reconciler.sync(claim, &mut composite).await?;

    claim_api
        .patch(
            claim.name(),
            &PatchParams::apply(crate::claim::FIELD_MANAGER),
            &Patch::Apply(&claim.0),
        )
        .await?;
    Ok(())
}
