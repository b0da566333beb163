//! `Usage` — §3 and §4.H: records that one object depends on another so
//! that deletion of the latter can be blocked at admission time.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::refs::ObjectRef;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apiextensions.xp.io",
    version = "v1",
    kind = "Usage",
    shortname = "usage",
    status = "UsageStatus",
    category = "xp"
)]
#[serde(rename_all = "camelCase")]
pub struct UsageSpec {
    /// The resource being protected from deletion.
    pub of: UsageTarget,
    /// The resource declaring the dependency, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<UsageTarget>,
    /// A free-form reason, if `by` is absent. Exactly one of `by`/`reason`
    /// must be set (§3 invariant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether a blocked deletion should be replayed once the Usage is
    /// removed (§4.H annotation mechanism).
    #[serde(default)]
    pub replay_deletion: bool,
}

impl UsageSpec {
    pub fn validate(&self) -> Result<(), String> {
        match (&self.by, &self.reason) {
            (Some(_), Some(_)) => Err("exactly one of `by` or `reason` must be set, not both".into()),
            (None, None) => Err("exactly one of `by` or `reason` must be set".into()),
            _ => Ok(()),
        }
    }
}

/// A target resource, addressed either by direct reference or by selector
/// (resolved to a reference by the Selector Resolver, §4.I).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageTarget {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_selector: Option<crate::refs::Selector>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct UsageStatus {
    #[serde(default)]
    pub conditions: crate::conditions::Conditions,
}

/// The deletion-attempt annotation key written by the admission hook
/// (§4.H) before returning 409.
pub const DELETION_ATTEMPT_ANNOTATION: &str = "usage.xp.io/deletion-attempt-with-policy";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_exactly_one_of_by_or_reason() {
        let target = || UsageTarget {
            api_version: "v1".into(),
            kind: "Secret".into(),
            resource_ref: Some(ObjectRef {
                api_version: "v1".into(),
                kind: "Secret".into(),
                name: "a1".into(),
            }),
            resource_selector: None,
        };
        let neither = UsageSpec {
            of: target(),
            by: None,
            reason: None,
            replay_deletion: false,
        };
        assert!(neither.validate().is_err());

        let both = UsageSpec {
            of: target(),
            by: Some(target()),
            reason: Some("demo".into()),
            replay_deletion: false,
        };
        assert!(both.validate().is_err());

        let just_reason = UsageSpec {
            of: target(),
            by: None,
            reason: Some("demo".into()),
            replay_deletion: false,
        };
        assert!(just_reason.validate().is_ok());
    }
}
