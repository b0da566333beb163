//! Condition types shared by every object kind in §6 of the spec.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The user-visible conditions an object can carry.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    Ready,
    Synced,
    Established,
    Offered,
    Healthy,
    Installed,
    Succeeded,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionType::Ready => "Ready",
            ConditionType::Synced => "Synced",
            ConditionType::Established => "Established",
            ConditionType::Offered => "Offered",
            ConditionType::Healthy => "Healthy",
            ConditionType::Installed => "Installed",
            ConditionType::Succeeded => "Succeeded",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single status condition, following the Kubernetes convention used across
/// every reconciled kind in this system.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn new(type_: ConditionType, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Self {
            type_,
            status,
            last_transition_time: Utc::now(),
            reason: reason.into(),
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_true(&self) -> bool {
        matches!(self.status, ConditionStatus::True)
    }
}

/// Well-known reason codes referenced in §6.
pub mod reasons {
    pub const WATCHING_COMPOSITE_RESOURCE: &str = "WatchingCompositeResource";
    pub const TERMINATING_COMPOSITE_RESOURCE: &str = "TerminatingCompositeResource";
    pub const PIPELINE_RUNNING: &str = "PipelineRunning";
    pub const PIPELINE_SUCCESS: &str = "PipelineSuccess";
    pub const PIPELINE_ERROR: &str = "PipelineError";
    pub const COMPOSING: &str = "ComposingResources";
    pub const CREATING: &str = "CreatingComposedResources";
    pub const AVAILABLE: &str = "Available";
    pub const UNAVAILABLE: &str = "Unavailable";
    pub const NO_COMPATIBLE_COMPOSITION: &str = "NoCompatibleComposition";
    pub const REQUEUED: &str = "ReconcileError";
    pub const BLOCKED: &str = "Blocked";
}

/// A set of conditions, keyed by type, the way every reconciled kind
/// accumulates and overwrites them one at a time.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Conditions(pub Vec<Condition>);

impl Conditions {
    pub fn set(&mut self, condition: Condition) {
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            if existing.status != condition.status || existing.reason != condition.reason {
                *existing = condition;
            } else {
                existing.message = condition.message;
            }
        } else {
            self.0.push(condition);
        }
    }

    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }
}
