//! `CompositeResourceDefinition` (XRD) — §3.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;
use crate::refs::CompositionReference;

/// `CompositeResourceDefinition.spec.group` + `.names` identify the kind
/// this XRD brings into existence; `versions` lists the served/stored
/// schema variants.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apiextensions.xp.io",
    version = "v1",
    kind = "CompositeResourceDefinition",
    shortname = "xrd",
    status = "CompositeResourceDefinitionStatus",
    category = "xp"
)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResourceDefinitionSpec {
    /// The API group the defined composite (and claim) kind is served under.
    pub group: String,
    pub names: Names,
    /// The namespaced claim kind's names, if this XRD offers one. Immutable
    /// once set (§3 invariant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_names: Option<Names>,
    /// One entry per served/stored schema variant. Exactly one entry must
    /// have `storage = true`.
    pub versions: Vec<XrdVersion>,
    /// Allow-list of connection-secret keys that may be propagated from
    /// composed resources (§4.B step 6, §8 "Connection-detail filtering").
    #[serde(default)]
    pub connection_secret_keys: Vec<String>,
    /// If set, every composite of this kind uses this Composition,
    /// regardless of its own `compositionRef`/`compositionSelector` (§4.C).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_composition_ref: Option<CompositionReference>,
    /// If set, every composite of this kind is forced onto this
    /// Composition; selector resolution in §4.C step (c) never runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced_composition_ref: Option<CompositionReference>,
}

/// Plural/singular/kind naming triple, reused for both the composite and
/// (optionally) the claim kind.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Names {
    pub kind: String,
    pub plural: String,
    pub singular: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XrdVersion {
    pub name: String,
    pub served: bool,
    pub storage: bool,
    /// The user-authored portion of the schema; the renderer (4.A) merges
    /// framework-reserved properties into this before installing it.
    pub schema: serde_json::Value,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResourceDefinitionStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_established_at: Option<Time>,
}

impl CompositeResourceDefinition {
    /// The version with `storage = true`. §3 invariant guarantees there is
    /// exactly one; callers that construct XRDs outside validation must
    /// still handle `None`.
    pub fn storage_version(&self) -> Option<&XrdVersion> {
        self.spec.versions.iter().find(|v| v.storage)
    }

    pub fn offers_claim(&self) -> bool {
        self.spec.claim_names.is_some()
    }

    /// The schema document name the renderer (4.A) must produce:
    /// `<plural>.<group>`, per the Open Question resolved in SPEC_FULL.md §9.
    pub fn schema_name(&self) -> String {
        format!("{}.{}", self.spec.names.plural, self.spec.group)
    }

    pub fn claim_schema_name(&self) -> Option<String> {
        self.spec
            .claim_names
            .as_ref()
            .map(|n| format!("{}.{}", n.plural, self.spec.group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompositeResourceDefinition {
        CompositeResourceDefinition::new(
            "xdatabases.example.org",
            CompositeResourceDefinitionSpec {
                group: "example.org".into(),
                names: Names {
                    kind: "XDatabase".into(),
                    plural: "xdatabases".into(),
                    singular: "xdatabase".into(),
                },
                claim_names: Some(Names {
                    kind: "Database".into(),
                    plural: "databases".into(),
                    singular: "database".into(),
                }),
                versions: vec![XrdVersion {
                    name: "v1".into(),
                    served: true,
                    storage: true,
                    schema: serde_json::json!({"type": "object"}),
                }],
                connection_secret_keys: vec!["endpoint".into()],
                default_composition_ref: None,
                enforced_composition_ref: None,
            },
        )
    }

    #[test]
    fn schema_name_is_plural_dot_group() {
        assert_eq!(sample().schema_name(), "xdatabases.example.org");
    }

    #[test]
    fn claim_schema_name_mirrors_claim_plural() {
        assert_eq!(
            sample().claim_schema_name().as_deref(),
            Some("databases.example.org")
        );
    }

    #[test]
    fn storage_version_picks_the_flagged_entry() {
        assert_eq!(sample().storage_version().unwrap().name, "v1");
    }
}
