//! `Composition` — the recipe mapping a composite to composed resources or
//! a function pipeline (§3, §4.B).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Conditions;
use crate::refs::SecretReference;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apiextensions.xp.io",
    version = "v1",
    kind = "Composition",
    shortname = "comp",
    status = "CompositionStatus",
    category = "xp"
)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    /// The GVK of composites this Composition applies to. Immutable.
    pub composite_type_ref: CompositeTypeRef,
    /// Exactly one of `resources`/`pipeline` may be populated (§3 invariant).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ComposedTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<PipelineStep>,
}

impl CompositionSpec {
    pub fn mode(&self) -> CompositionMode {
        if !self.pipeline.is_empty() {
            CompositionMode::Pipeline
        } else {
            CompositionMode::Resources
        }
    }

    /// §3 invariant: templates and pipeline steps are mutually exclusive,
    /// and pipeline step names must be unique.
    pub fn validate(&self) -> Result<(), String> {
        if !self.resources.is_empty() && !self.pipeline.is_empty() {
            return Err("resources and pipeline are mutually exclusive".into());
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.pipeline {
            if !seen.insert(&step.step) {
                return Err(format!("duplicate pipeline step name {:?}", step.step));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositionMode {
    Resources,
    Pipeline,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CompositeTypeRef {
    pub api_version: String,
    pub kind: String,
}

/// One entry of `spec.resources`: a base object plus the patch/readiness/
/// connection-detail pipeline that §4.B runs against it.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComposedTemplate {
    /// A stable name addressing this template slot across reorders
    /// (§3 invariant: positional correspondence, unless named).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub base: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_checks: Vec<ReadinessCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_details: Vec<ConnectionDetail>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum Patch {
    FromCompositeFieldPath {
        from_field_path: String,
        to_field_path: String,
        #[serde(default)]
        transforms: Vec<Transform>,
        #[serde(default)]
        policy: PatchPolicy,
    },
    ToCompositeFieldPath {
        from_field_path: String,
        to_field_path: String,
        #[serde(default)]
        transforms: Vec<Transform>,
        #[serde(default)]
        policy: PatchPolicy,
    },
    FromEnvironmentFieldPath {
        from_field_path: String,
        to_field_path: String,
        #[serde(default)]
        transforms: Vec<Transform>,
        #[serde(default)]
        policy: PatchPolicy,
    },
    ToEnvironmentFieldPath {
        from_field_path: String,
        to_field_path: String,
        #[serde(default)]
        transforms: Vec<Transform>,
        #[serde(default)]
        policy: PatchPolicy,
    },
    CombineFromComposite {
        combine: Combine,
        to_field_path: String,
        #[serde(default)]
        transforms: Vec<Transform>,
        #[serde(default)]
        policy: PatchPolicy,
    },
    CombineToComposite {
        combine: Combine,
        to_field_path: String,
        #[serde(default)]
        transforms: Vec<Transform>,
        #[serde(default)]
        policy: PatchPolicy,
    },
    PatchSet {
        patch_set_name: String,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Combine {
    pub variables: Vec<CombineVariable>,
    pub strategy: CombineStrategy,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CombineVariable {
    pub from_field_path: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum CombineStrategy {
    String { fmt: String },
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FromFieldPathPolicy {
    #[default]
    Optional,
    Required,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum MergeOptionsKeepMapValues {
    #[default]
    Replace,
    Keep,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchPolicy {
    #[serde(default)]
    pub from_field_path: FromFieldPathPolicy,
    #[serde(default)]
    pub merge_options: MergeOptionsKeepMapValues,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum Transform {
    Map {
        pairs: std::collections::BTreeMap<String, serde_json::Value>,
    },
    Match {
        patterns: Vec<MatchPattern>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback_value: Option<serde_json::Value>,
    },
    Math {
        multiply: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clamp_min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clamp_max: Option<f64>,
    },
    String {
        #[serde(flatten)]
        op: StringTransformOp,
    },
    Convert {
        to_type: ConvertType,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum StringTransformOp {
    Format { fmt: String },
    Convert { convert: StringConversion },
    Trim { trim: TrimType, suffix: String },
    Regexp { regexp: RegexpTransform },
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StringConversion {
    ToUpper,
    ToLower,
    ToBase64,
    FromBase64,
    ToJson,
    ToSha1,
    ToSha256,
    ToSha512,
    ToAdler32,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TrimType {
    Prefix,
    Suffix,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RegexpTransform {
    pub pattern: String,
    #[serde(default)]
    pub group: Option<i32>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConvertType {
    String,
    Int,
    Int64,
    Float64,
    Bool,
    Object,
    Array,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchPattern {
    #[serde(flatten)]
    pub kind: MatchPatternKind,
    pub result: serde_json::Value,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum MatchPatternKind {
    Literal { literal: String },
    Regexp { regexp: String },
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum ReadinessCheck {
    NonEmpty {
        field_path: String,
    },
    MatchString {
        field_path: String,
        match_string: String,
    },
    MatchInteger {
        field_path: String,
        match_integer: i64,
    },
    MatchCondition {
        match_condition: MatchConditionSpec,
    },
    MatchTrue {
        field_path: String,
    },
    MatchFalse {
        field_path: String,
    },
    None,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchConditionSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum ConnectionDetail {
    FromConnectionSecretKey {
        name: String,
        from_connection_secret_key: String,
    },
    FromFieldPath {
        name: String,
        from_field_path: String,
    },
    FromValue {
        name: String,
        value: String,
    },
}

impl ConnectionDetail {
    pub fn name(&self) -> &str {
        match self {
            ConnectionDetail::FromConnectionSecretKey { name, .. }
            | ConnectionDetail::FromFieldPath { name, .. }
            | ConnectionDetail::FromValue { name, .. } => name,
        }
    }
}

/// One step of a `Pipeline`-mode Composition (out of scope for rendering —
/// the function protocol in §6 is an external collaborator — but the
/// shape is part of the data model so Compositions of either mode can be
/// loaded and validated).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub step: String,
    pub function_ref: FunctionRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<PipelineStepCredential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_resources: Vec<RequiredResourceSelector>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct FunctionRef {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStepCredential {
    pub name: String,
    pub source: SecretReference,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequiredResourceSelector {
    pub requirement_name: String,
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CompositionStatus {
    #[serde(default)]
    pub conditions: Conditions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_and_pipeline_are_mutually_exclusive() {
        let spec = CompositionSpec {
            composite_type_ref: CompositeTypeRef {
                api_version: "example.org/v1".into(),
                kind: "XDatabase".into(),
            },
            resources: vec![ComposedTemplate {
                name: Some("bucket".into()),
                base: serde_json::json!({}),
                patches: vec![],
                readiness_checks: vec![],
                connection_details: vec![],
            }],
            pipeline: vec![PipelineStep {
                step: "normalize".into(),
                function_ref: FunctionRef {
                    name: "function-normalize".into(),
                },
                input: None,
                credentials: vec![],
                required_resources: vec![],
            }],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn duplicate_pipeline_step_names_rejected() {
        let step = PipelineStep {
            step: "dup".into(),
            function_ref: FunctionRef {
                name: "f".into(),
            },
            input: None,
            credentials: vec![],
            required_resources: vec![],
        };
        let spec = CompositionSpec {
            composite_type_ref: CompositeTypeRef {
                api_version: "example.org/v1".into(),
                kind: "XDatabase".into(),
            },
            resources: vec![],
            pipeline: vec![step.clone(), step],
        };
        assert!(spec.validate().is_err());
    }
}
