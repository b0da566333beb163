//! Generic representation of composite, claim and composed-resource
//! objects (§3.1): kinds not known at compile time, addressed through
//! `FieldPath` rather than generated structs.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;

use crate::fieldpath::FieldPath;
use crate::refs::{NamespacedObjectRef, ObjectRef, ReclaimPolicy, SecretReference};

/// Framework-injected fields every composite's `spec` carries, on top of
/// whatever the XRD's user schema declares (§3, §4.A).
pub const SPEC_COMPOSITION_REF: &str = "compositionRef";
pub const SPEC_COMPOSITION_SELECTOR: &str = "compositionSelector";
pub const SPEC_COMPOSITION_REVISION_REF: &str = "compositionRevisionRef";
pub const SPEC_COMPOSITION_UPDATE_POLICY: &str = "compositionUpdatePolicy";
pub const SPEC_CLAIM_REF: &str = "claimRef";
pub const SPEC_RESOURCE_REFS: &str = "resourceRefs";
pub const SPEC_WRITE_CONNECTION_SECRET_TO_REF: &str = "writeConnectionSecretToRef";
pub const SPEC_ENVIRONMENT_CONFIG_REFS: &str = "environmentConfigRefs";
pub const SPEC_RESOURCE_REF: &str = "resourceRef";

/// Framework-injected fields under `status`.
pub const STATUS_CONDITIONS: &str = "conditions";
pub const STATUS_CONNECTION_DETAILS_LAST_PUBLISHED_TIME: &str = "connectionDetails";

/// The keys §4.A reserves under `spec`/`status`; used by the Schema
/// Renderer's collision check and by the Claim Reconciler to strip
/// framework fields before copying a claim's spec onto its composite.
pub const RESERVED_SPEC_KEYS: &[&str] = &[
    SPEC_COMPOSITION_REF,
    SPEC_COMPOSITION_SELECTOR,
    SPEC_COMPOSITION_REVISION_REF,
    SPEC_COMPOSITION_UPDATE_POLICY,
    SPEC_CLAIM_REF,
    SPEC_RESOURCE_REFS,
    SPEC_WRITE_CONNECTION_SECRET_TO_REF,
    SPEC_ENVIRONMENT_CONFIG_REFS,
];
pub const CLAIM_RESERVED_SPEC_KEYS: &[&str] = &[SPEC_RESOURCE_REF, SPEC_WRITE_CONNECTION_SECRET_TO_REF];
pub const RESERVED_STATUS_KEYS: &[&str] =
    &[STATUS_CONDITIONS, STATUS_CONNECTION_DETAILS_LAST_PUBLISHED_TIME];

/// A thin wrapper around `kube`'s `DynamicObject`, giving field-path
/// access to `spec`/`status` and typed accessors for the framework fields
/// every composite and claim carries.
#[derive(Clone, Debug)]
pub struct Composite(pub DynamicObject);

impl Composite {
    pub fn new(gvk: &GroupVersionKind, name: &str) -> Self {
        let resource = ApiResource::from_gvk(gvk);
        let mut obj = DynamicObject::new(name, &resource);
        obj.data = serde_json::json!({"spec": {}, "status": {}});
        Self(obj)
    }

    pub fn meta(&self) -> &ObjectMeta {
        &self.0.metadata
    }

    pub fn uid(&self) -> Option<&str> {
        self.0.metadata.uid.as_deref()
    }

    pub fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn spec(&self) -> &Value {
        self.0.data.get("spec").unwrap_or(&Value::Null)
    }

    pub fn spec_mut(&mut self) -> &mut Value {
        self.0
            .data
            .as_object_mut()
            .unwrap()
            .entry("spec")
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn status_mut(&mut self) -> &mut Value {
        self.0
            .data
            .as_object_mut()
            .unwrap()
            .entry("status")
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn get_path(&self, path: &str) -> Result<Vec<&Value>, crate::fieldpath::FieldPathError> {
        Ok(FieldPath::parse(path)?.get(&self.0.data))
    }

    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), crate::fieldpath::FieldPathError> {
        FieldPath::parse(path)?.set(&mut self.0.data, value);
        Ok(())
    }

    pub fn composition_ref(&self) -> Option<String> {
        self.spec()
            .get(SPEC_COMPOSITION_REF)
            .and_then(|v| v.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn set_composition_ref(&mut self, name: &str) {
        self.spec_mut()[SPEC_COMPOSITION_REF] = serde_json::json!({ "name": name });
    }

    pub fn composition_selector(&self) -> Option<Value> {
        self.spec().get(SPEC_COMPOSITION_SELECTOR).cloned()
    }

    /// Resource references recorded so far, in template-slot order
    /// (§3 invariant: stable 1:1 positional correspondence).
    pub fn resource_refs(&self) -> Vec<ObjectRef> {
        self.spec()
            .get(SPEC_RESOURCE_REFS)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_resource_refs(&mut self, refs: &[ObjectRef]) {
        self.spec_mut()[SPEC_RESOURCE_REFS] = serde_json::to_value(refs).unwrap();
    }

    pub fn claim_ref(&self) -> Option<NamespacedObjectRef> {
        self.spec()
            .get(SPEC_CLAIM_REF)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_claim_ref(&mut self, claim_ref: &NamespacedObjectRef) {
        self.spec_mut()[SPEC_CLAIM_REF] = serde_json::to_value(claim_ref).unwrap();
    }

    pub fn write_connection_secret_to_ref(&self) -> Option<SecretReference> {
        self.spec()
            .get(SPEC_WRITE_CONNECTION_SECRET_TO_REF)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_write_connection_secret_to_ref(&mut self, secret_ref: &SecretReference) {
        self.spec_mut()[SPEC_WRITE_CONNECTION_SECRET_TO_REF] =
            serde_json::to_value(secret_ref).unwrap();
    }

    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        self.spec()
            .get("reclaimPolicy")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn conditions(&self) -> crate::conditions::Conditions {
        self.0
            .data
            .get("status")
            .and_then(|s| s.get(STATUS_CONDITIONS))
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default()
    }

    pub fn set_conditions(&mut self, conditions: &crate::conditions::Conditions) {
        self.status_mut()[STATUS_CONDITIONS] = serde_json::to_value(conditions).unwrap();
    }

    pub fn owner_reference(&self, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: self.0.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default(),
            kind: self.0.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
            name: self.name().to_string(),
            uid: self.uid().unwrap_or_default().to_string(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }
}

/// Mirrors `Composite`, but scoped to a namespace and never itself the
/// ownership target of composed resources (§3: claim does not own its
/// composite).
#[derive(Clone, Debug)]
pub struct Claim(pub DynamicObject);

impl Claim {
    pub fn meta(&self) -> &ObjectMeta {
        &self.0.metadata
    }

    pub fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.0.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn spec(&self) -> &Value {
        self.0.data.get("spec").unwrap_or(&Value::Null)
    }

    pub fn spec_mut(&mut self) -> &mut Value {
        self.0
            .data
            .as_object_mut()
            .unwrap()
            .entry("spec")
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn status_mut(&mut self) -> &mut Value {
        self.0
            .data
            .as_object_mut()
            .unwrap()
            .entry("status")
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn resource_ref(&self) -> Option<ObjectRef> {
        self.spec()
            .get(SPEC_RESOURCE_REF)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Binding permanence (§8): callers must check `resource_ref().is_none()`
    /// before calling this; once set it is never intended to be overwritten.
    pub fn set_resource_ref(&mut self, resource_ref: &ObjectRef) {
        self.spec_mut()[SPEC_RESOURCE_REF] = serde_json::to_value(resource_ref).unwrap();
    }

    pub fn write_connection_secret_to_ref(&self) -> Option<SecretReference> {
        self.spec()
            .get(SPEC_WRITE_CONNECTION_SECRET_TO_REF)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// User-mutable spec fields: everything except the claim's own
    /// framework-reserved keys (§4.D step 2).
    pub fn user_spec_fields(&self) -> serde_json::Map<String, Value> {
        let mut fields = self
            .spec()
            .as_object()
            .cloned()
            .unwrap_or_default();
        for key in CLAIM_RESERVED_SPEC_KEYS {
            fields.remove(*key);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::GroupVersionKind;

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("example.org", "v1", "XDatabase")
    }

    #[test]
    fn composition_ref_round_trips() {
        let mut c = Composite::new(&gvk(), "db-1");
        assert!(c.composition_ref().is_none());
        c.set_composition_ref("databases.example.org");
        assert_eq!(c.composition_ref().as_deref(), Some("databases.example.org"));
    }

    #[test]
    fn resource_refs_preserve_order() {
        let mut c = Composite::new(&gvk(), "db-1");
        let refs = vec![
            ObjectRef {
                api_version: "s3.example.org/v1".into(),
                kind: "Bucket".into(),
                name: "db-1-bucket-aaaa".into(),
            },
            ObjectRef {
                api_version: "iam.example.org/v1".into(),
                kind: "Role".into(),
                name: "db-1-role-bbbb".into(),
            },
        ];
        c.set_resource_refs(&refs);
        assert_eq!(c.resource_refs(), refs);
    }

    #[test]
    fn claim_user_spec_strips_resource_ref() {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk("example.org", "v1", "Database"));
        let mut obj = DynamicObject::new("db-1", &resource);
        obj.data = serde_json::json!({"spec": {"size": "large", "resourceRef": {"apiVersion": "v1", "kind": "XDatabase", "name": "x"}}});
        let claim = Claim(obj);
        let fields = claim.user_spec_fields();
        assert!(fields.contains_key("size"));
        assert!(!fields.contains_key("resourceRef"));
    }
}
