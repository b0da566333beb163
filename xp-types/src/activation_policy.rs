//! `ManagedResourceActivationPolicy` — §3, §6: glob patterns matching
//! managed-resource-definition names, reconciled into an `activated` list.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apiextensions.xp.io",
    version = "v1",
    kind = "ManagedResourceActivationPolicy",
    shortname = "map",
    status = "ActivationPolicyStatus",
    category = "xp"
)]
#[serde(rename_all = "camelCase")]
pub struct ActivationPolicySpec {
    /// Shell-style glob patterns, e.g. `*.aws.example.com` (§6 "Glob matcher").
    pub activations: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivationPolicyStatus {
    #[serde(default)]
    pub activated: Vec<String>,
}
