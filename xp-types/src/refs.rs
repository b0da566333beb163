//! Reference types shared across the XRD, Composition and dynamic-object
//! data model (§3).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A reference to a cluster-scoped object of a specific kind.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// A reference to a namespaced object.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// A reference naming a Composition (§3, `compositionRef`).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct CompositionReference {
    pub name: String,
}

/// A label selector used to resolve a Composition reference (§4.C, step (c))
/// or a Usage target (§4.I).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: std::collections::BTreeMap<String, String>,
}

/// Whether a controller-reference comparison must also hold (§4.I).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(flatten)]
    pub match_labels: LabelSelector,
    #[serde(default)]
    pub match_controller_ref: bool,
}

/// A reference to a Secret, scoped to a namespace, naming the key(s) a
/// connection detail or credential is read from.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

/// The reclaim policy governing whether composed resources survive the
/// deletion of their owning composite (§3, Managed resource).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
}
