//! Per-composite control loop (§4.C): selects a Composition, renders and
//! applies each composed template via the composition engine, aggregates
//! readiness, and publishes the connection secret.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::{info, warn};

use xp_composition::naming;
use xp_types::composition::CompositeTypeRef;
use xp_types::conditions::{reasons, Condition, ConditionStatus, ConditionType};
use xp_types::dynamic::Composite;
use xp_types::refs::{ObjectRef, SecretReference};
use xp_types::xrd::CompositeResourceDefinitionSpec;
use xp_types::Composition;

use crate::error::{ControllerError, Result};
use crate::selection::{select_composition, CompositionCandidate};

pub const FIELD_MANAGER: &str = "xp-composite-controller";
const SHORT_REQUEUE: Duration = Duration::from_secs(30);
const LONG_REQUEUE: Duration = Duration::from_secs(60);
const MAX_NAME_ATTEMPTS: u32 = 5;

pub struct CompositeReconciler {
    client: Client,
}

impl CompositeReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Run one reconcile pass for `composite`, whose kind is described by
    /// `composite_gvk`/`composite_type_ref`. Returns the requeue `Action`;
    /// per-resource failures are recorded on the composite's conditions
    /// rather than aborting the whole pass (§4.B "Failure model").
    pub async fn reconcile(
        &self,
        composite: &mut Composite,
        xrd: &CompositeResourceDefinitionSpec,
        composite_gvk: &GroupVersionKind,
        composite_type_ref: &CompositeTypeRef,
    ) -> Result<Action> {
        let compositions_api: Api<Composition> = Api::all(self.client.clone());
        let known: Vec<Composition> = compositions_api.list(&ListParams::default()).await?.items;
        let candidates: Vec<CompositionCandidate> = known
            .iter()
            .map(|c| CompositionCandidate {
                name: c.name_any(),
                composite_type_ref: c.spec.composite_type_ref.clone(),
                labels: c.labels().clone().into_iter().collect(),
            })
            .collect();

        let composition_ref = select_composition(xrd, composite, composite_type_ref, &candidates)?;
        let composition = known
            .into_iter()
            .find(|c| c.name_any() == composition_ref.name)
            .ok_or_else(|| ControllerError::MissingField(composition_ref.name.clone()))?;

        let secret_ref = composite.write_connection_secret_to_ref().unwrap_or_else(|| {
            let inferred = SecretReference {
                namespace: composition_ref.name.clone(),
                name: composite.uid().unwrap_or_default().to_string(),
            };
            composite.set_write_connection_secret_to_ref(&inferred);
            inferred
        });

        let mut resource_refs = composite.resource_refs();
        let mut all_connection_details: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut ready_count = 0usize;
        let total = composition.spec.resources.len();

        for (index, template) in composition.spec.resources.iter().enumerate() {
            let child_key = template.name.clone().unwrap_or_else(|| index.to_string());
            match self.compose_one(composite, template, composite_gvk, &child_key, index, &mut resource_refs).await {
                Ok(details) => {
                    all_connection_details.extend(details.connection_details);
                    if details.ready {
                        ready_count += 1;
                    }
                }
                Err(err) => {
                    warn!(error = %err, template = %child_key, "composed resource render/apply failed");
                    composite.set_conditions(&{
                        let mut c = composite.conditions();
                        c.set(Condition::new(
                            ConditionType::Synced,
                            ConditionStatus::False,
                            reasons::REQUEUED,
                        ).with_message(err.to_string()));
                        c
                    });
                }
            }
            composite.set_resource_refs(&resource_refs);
        }

        let mut conditions = composite.conditions();
        if total > 0 && ready_count == total {
            conditions.set(Condition::new(ConditionType::Ready, ConditionStatus::True, reasons::AVAILABLE));
        } else if ready_count == 0 {
            conditions.set(Condition::new(ConditionType::Ready, ConditionStatus::False, reasons::CREATING));
        } else {
            conditions.set(Condition::new(ConditionType::Ready, ConditionStatus::False, reasons::COMPOSING));
        }
        composite.set_conditions(&conditions);

        if !all_connection_details.is_empty() {
            self.publish_secret(composite, &secret_ref, &all_connection_details).await?;
        }

        Ok(if ready_count == total && total > 0 {
            Action::requeue(LONG_REQUEUE)
        } else {
            Action::requeue(SHORT_REQUEUE)
        })
    }

    async fn compose_one(
        &self,
        composite: &mut Composite,
        template: &xp_types::composition::ComposedTemplate,
        composite_gvk: &GroupVersionKind,
        child_key: &str,
        index: usize,
        resource_refs: &mut Vec<ObjectRef>,
    ) -> Result<ComposedOutcome> {
        let parent_name = composite.name().to_string();
        let parent_uid = composite.uid().unwrap_or_default().to_string();
        let namespace = composite.meta().namespace.clone();

        let fallback_api_version = join_api_version(&composite_gvk.group, &composite_gvk.version);
        let api_version = template
            .base
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or(&fallback_api_version)
            .to_string();
        let kind = template
            .base
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let (group, version) = split_api_version(&api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, &kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = if let Some(ns) = namespace.as_deref() {
            Api::namespaced_with(self.client.clone(), ns, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        };

        let name = match resource_refs.get(index).map(|r| r.name.clone()) {
            Some(bound) => bound,
            None => {
                let taken: HashSet<String> = api
                    .list(&ListParams::default())
                    .await?
                    .items
                    .into_iter()
                    .filter(|obj| !obj.owner_references().iter().any(|o| o.uid == parent_uid))
                    .filter_map(|obj| obj.metadata.name)
                    .collect();
                naming::resolve_name(&parent_name, &parent_uid, child_key, MAX_NAME_ATTEMPTS, |candidate| {
                    taken.contains(candidate)
                })
                .map_err(xp_composition::ComposeError::from)?
            }
        };

        let observed = api.get(&name).await.ok();
        let secret_data = self.composed_secret_data(observed.as_ref().map(|o| &o.data)).await?;

        let observation = xp_composition::render(
            template,
            &serde_json::json!({"spec": composite.spec(), "status": composite.0.data.get("status").cloned().unwrap_or(Value::Null)}),
            &name,
            observed.as_ref().map(|o| &o.data),
            &secret_data,
            None,
        )?;

        merge_to_composite(composite, &observation.composite_out);

        let mut desired_obj = DynamicObject::new(&name, &resource);
        desired_obj.data = observation.desired.clone();
        desired_obj
            .owner_references_mut()
            .push(composite.owner_reference(true));

        let applied = api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&desired_obj))
            .await?;

        let object_ref = ObjectRef {
            api_version,
            kind,
            name: name.clone(),
        };
        if let Some(existing) = resource_refs.get_mut(index) {
            *existing = object_ref;
        } else {
            resource_refs.push(object_ref);
        }

        let ready = xp_composition::readiness::evaluate(&template.readiness_checks, &applied.data)?;
        let connection_details = xp_composition::connection::extract(
            &template.connection_details,
            &applied.data,
            &secret_data,
            None,
        )?;

        Ok(ComposedOutcome {
            ready,
            connection_details,
        })
    }

    /// Fetch the connection secret a composed resource publishes via its own
    /// `spec.writeConnectionSecretToRef`, if it has one and it already exists.
    async fn composed_secret_data(&self, observed: Option<&Value>) -> Result<BTreeMap<String, Vec<u8>>> {
        let Some(secret_ref) = observed.and_then(|o| o.pointer("/spec/writeConnectionSecretToRef")) else {
            return Ok(BTreeMap::new());
        };
        let (Some(namespace), Some(name)) = (
            secret_ref.get("namespace").and_then(Value::as_str),
            secret_ref.get("name").and_then(Value::as_str),
        ) else {
            return Ok(BTreeMap::new());
        };

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(secret.data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)).collect()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish_secret(
        &self,
        composite: &Composite,
        secret_ref: &SecretReference,
        data: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &secret_ref.namespace);
        let mut secret = Secret {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(secret_ref.name.clone()),
                namespace: Some(secret_ref.namespace.clone()),
                owner_references: Some(vec![composite.owner_reference(true)]),
                ..Default::default()
            },
            ..Default::default()
        };
        secret.data = Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect(),
        );
        api.patch(&secret_ref.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&secret))
            .await?;
        info!(secret = %secret_ref.name, "published connection secret");
        Ok(())
    }
}

struct ComposedOutcome {
    ready: bool,
    connection_details: BTreeMap<String, Vec<u8>>,
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn join_api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Merge a `ToCompositeFieldPath`/`CombineToComposite` output fragment (shaped
/// like `{"spec": {...}, "status": {...}}`) onto the composite, so later
/// templates in the same reconcile pass observe earlier ones' patches.
fn merge_to_composite(composite: &mut Composite, patch: &Value) {
    let Some(patch_obj) = patch.as_object() else {
        return;
    };
    if let Some(spec_patch) = patch_obj.get("spec") {
        deep_merge(composite.spec_mut(), spec_patch);
    }
    if let Some(status_patch) = patch_obj.get("status") {
        deep_merge(composite.status_mut(), status_patch);
    }
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (target_slot, patch_value) => {
            *target_slot = patch_value.clone();
        }
    }
}
