//! Per-claim control loop (§4.D): binds a namespaced claim to a
//! cluster-scoped composite and mirrors spec/status/connection-secret
//! state between them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::Value;
use std::time::Duration;

use xp_types::conditions::ConditionType;
use xp_types::dynamic::{Claim, Composite, RESERVED_STATUS_KEYS};
use xp_types::refs::{NamespacedObjectRef, ObjectRef, ReclaimPolicy, SecretReference};

use crate::error::Result;

pub const FIELD_MANAGER: &str = "xp-claim-controller";
const REQUEUE: Duration = Duration::from_secs(30);

pub struct ClaimReconciler {
    client: Client,
}

impl ClaimReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// §4.D step 1: ensure a bound composite exists, creating one the
    /// first time a claim is reconciled.
    pub async fn ensure_composite(
        &self,
        claim: &mut Claim,
        composite_gvk: &GroupVersionKind,
    ) -> Result<Composite> {
        let resource = ApiResource::from_gvk(composite_gvk);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        if let Some(existing_ref) = claim.resource_ref() {
            let obj = api.get(&existing_ref.name).await?;
            return Ok(Composite(obj));
        }

        let composite_name = claim.name().to_string();
        let mut composite = Composite::new(composite_gvk, &composite_name);
        for (key, value) in claim.user_spec_fields() {
            composite.spec_mut()[key.as_str()] = value;
        }
        composite.set_claim_ref(&NamespacedObjectRef {
            api_version: claim
                .0
                .types
                .as_ref()
                .map(|t| t.api_version.clone())
                .unwrap_or_default(),
            kind: claim.0.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            namespace: claim.namespace().to_string(),
            name: claim.name().to_string(),
        });

        let mut obj = DynamicObject::new(&composite_name, &resource);
        obj.data = composite.0.data.clone();
        let applied = api
            .patch(&composite_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&obj))
            .await?;

        let composite_ref = ObjectRef {
            api_version: composite_gvk_api_version(composite_gvk),
            kind: composite_gvk.kind.clone(),
            name: composite_name,
        };
        claim.set_resource_ref(&composite_ref);

        Ok(Composite(applied))
    }

    /// §4.D steps 2-3: propagate user-mutable spec fields claim → composite,
    /// mirror status and the connection secret composite → claim, and
    /// transition the binding phase.
    pub async fn sync(&self, claim: &mut Claim, composite: &mut Composite) -> Result<Action> {
        for (key, value) in claim.user_spec_fields() {
            composite.spec_mut()[key.as_str()] = value;
        }

        let status = composite.0.data.get("status").cloned().unwrap_or(Value::Null);
        if let Some(status_obj) = status.as_object() {
            let claim_status = claim.status_mut();
            for (key, value) in status_obj {
                if RESERVED_STATUS_KEYS.contains(&key.as_str()) {
                    continue;
                }
                claim_status[key.as_str()] = value.clone();
            }
        }

        let bound = composite.conditions().is_true(ConditionType::Ready);
        let phase = if bound { "Bound" } else { "Unbound" };
        claim.status_mut()["bindingPhase"] = Value::String(phase.to_string());

        if let (Some(composite_secret), Some(claim_secret_ref)) = (
            composite.write_connection_secret_to_ref(),
            claim.write_connection_secret_to_ref(),
        ) {
            self.mirror_secret(claim, &composite_secret, &claim_secret_ref).await?;
        }

        Ok(Action::requeue(REQUEUE))
    }

    /// §4.D step 4: delete the bound composite (when its reclaim policy says
    /// so) and wait for it to disappear before the caller removes the
    /// claim's finalizer.
    pub async fn delete_composite(
        &self,
        composite_gvk: &GroupVersionKind,
        composite: &Composite,
    ) -> Result<bool> {
        if composite.reclaim_policy() != ReclaimPolicy::Delete {
            return Ok(true);
        }
        let resource = ApiResource::from_gvk(composite_gvk);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        match api.delete(composite.name(), &DeleteParams::default()).await {
            Ok(_) => Ok(false),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn mirror_secret(
        &self,
        claim: &Claim,
        from: &SecretReference,
        to: &SecretReference,
    ) -> Result<()> {
        let source_api: Api<Secret> = Api::namespaced(self.client.clone(), &from.namespace);
        let source = source_api.get(&from.name).await?;
        let data: BTreeMap<String, Vec<u8>> = source
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();

        let dest_api: Api<Secret> = Api::namespaced(self.client.clone(), &to.namespace);
        let mut secret = Secret {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(to.name.clone()),
                namespace: Some(to.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        secret.data = Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect());
        dest_api
            .patch(&to.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&secret))
            .await?;
        Ok(())
    }
}

fn composite_gvk_api_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}
