//! Patch application (§4.B step 1): copies a value from one JSON tree to
//! another, running it through a transform chain, honoring merge policy.

use serde_json::Value;
use xp_types::composition::{
    Combine, CombineStrategy, FromFieldPathPolicy, MergeOptionsKeepMapValues, Patch, PatchPolicy,
};
use xp_types::fieldpath::{FieldPath, FieldPathError};

use crate::transform::{self, TransformError};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    FieldPath(#[from] FieldPathError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("required field path {0:?} resolved to no value")]
    RequiredPathMissing(String),
    #[error("patch set {0:?} is not declared on this composition")]
    UnknownPatchSet(String),
}

/// The two trees a patch can read from and write to. `environment` is
/// optional — it is only present when an EnvironmentConfig is in play.
pub struct PatchContext<'a> {
    pub composite: &'a Value,
    pub composed: &'a Value,
    pub environment: Option<&'a Value>,
}

/// Apply one patch, producing the updated composed-resource tree. The
/// composite tree is read-only for From* patches; callers wanting
/// To*Composite semantics pass the composite as `target` instead.
pub fn apply_patch(
    patch: &Patch,
    ctx: &PatchContext<'_>,
    composed: &mut Value,
    composite_out: &mut Value,
    environment_out: &mut Option<Value>,
) -> Result<(), PatchError> {
    match patch {
        Patch::FromCompositeFieldPath {
            from_field_path,
            to_field_path,
            transforms,
            policy,
        } => copy(ctx.composite, from_field_path, to_field_path, transforms, policy, composed),
        Patch::ToCompositeFieldPath {
            from_field_path,
            to_field_path,
            transforms,
            policy,
        } => copy(composed, from_field_path, to_field_path, transforms, policy, composite_out),
        Patch::FromEnvironmentFieldPath {
            from_field_path,
            to_field_path,
            transforms,
            policy,
        } => {
            let env = ctx.environment.cloned().unwrap_or(Value::Null);
            copy(&env, from_field_path, to_field_path, transforms, policy, composed)
        }
        Patch::ToEnvironmentFieldPath {
            from_field_path,
            to_field_path,
            transforms,
            policy,
        } => {
            let mut env = environment_out.take().unwrap_or(Value::Null);
            let result = copy(composed, from_field_path, to_field_path, transforms, policy, &mut env);
            *environment_out = Some(env);
            result
        }
        Patch::CombineFromComposite {
            combine,
            to_field_path,
            transforms,
            policy,
        } => combine_into(ctx.composite, combine, to_field_path, transforms, policy, composed),
        Patch::CombineToComposite {
            combine,
            to_field_path,
            transforms,
            policy,
        } => combine_into(composed, combine, to_field_path, transforms, policy, composite_out),
        Patch::PatchSet { patch_set_name } => Err(PatchError::UnknownPatchSet(patch_set_name.clone())),
    }
}

fn copy(
    source: &Value,
    from_field_path: &str,
    to_field_path: &str,
    transforms: &[xp_types::composition::Transform],
    policy: &PatchPolicy,
    target: &mut Value,
) -> Result<(), PatchError> {
    let from = FieldPath::parse(from_field_path)?;
    let to = FieldPath::parse(to_field_path)?;
    let values = from.get(source);

    let Some(first) = values.first() else {
        return if policy.from_field_path == FromFieldPathPolicy::Required {
            Err(PatchError::RequiredPathMissing(from_field_path.to_string()))
        } else {
            Ok(())
        };
    };

    let transformed = transform::apply_chain(transforms, (*first).clone())?;
    write_with_merge(&to, target, transformed, policy.merge_options);
    Ok(())
}

fn combine_into(
    source: &Value,
    combine: &Combine,
    to_field_path: &str,
    transforms: &[xp_types::composition::Transform],
    policy: &PatchPolicy,
    target: &mut Value,
) -> Result<(), PatchError> {
    let to = FieldPath::parse(to_field_path)?;
    let mut inputs = Vec::with_capacity(combine.variables.len());
    for var in &combine.variables {
        let path = FieldPath::parse(&var.from_field_path)?;
        let values = path.get(source);
        let Some(first) = values.first() else {
            if policy.from_field_path == FromFieldPathPolicy::Required {
                return Err(PatchError::RequiredPathMissing(var.from_field_path.clone()));
            }
            inputs.push(Value::Null);
            continue;
        };
        inputs.push((*first).clone());
    }

    let combined = match &combine.strategy {
        CombineStrategy::String { fmt } => {
            let mut out = fmt.clone();
            for input in &inputs {
                let rendered = input.as_str().map(str::to_string).unwrap_or_else(|| input.to_string());
                out = out.replacen("%s", &rendered, 1);
            }
            Value::String(out)
        }
    };

    let transformed = transform::apply_chain(transforms, combined)?;
    write_with_merge(&to, target, transformed, policy.merge_options);
    Ok(())
}

fn write_with_merge(to: &FieldPath, target: &mut Value, value: Value, merge: MergeOptionsKeepMapValues) {
    match merge {
        MergeOptionsKeepMapValues::Replace => to.set(target, value),
        MergeOptionsKeepMapValues::Keep => {
            let existing = to.get(target).first().cloned().cloned();
            match (existing, &value) {
                (Some(Value::Object(mut existing_map)), Value::Object(new_map)) => {
                    for (k, v) in new_map {
                        existing_map.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    to.set(target, Value::Object(existing_map));
                }
                _ => to.set(target, value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xp_types::composition::Transform;

    const NULL: Value = Value::Null;

    fn ctx(composite: &Value) -> PatchContext<'_> {
        PatchContext {
            composite,
            composed: &NULL,
            environment: None,
        }
    }

    #[test]
    fn from_composite_field_path_copies_value() {
        let composite = json!({"spec": {"size": "large"}});
        let patch = Patch::FromCompositeFieldPath {
            from_field_path: "spec.size".into(),
            to_field_path: "spec.forProvider.tier".into(),
            transforms: vec![],
            policy: PatchPolicy::default(),
        };
        let mut composed = json!({});
        let mut composite_out = Value::Null;
        let mut env_out = None;
        apply_patch(&patch, &ctx(&composite), &mut composed, &mut composite_out, &mut env_out).unwrap();
        assert_eq!(composed["spec"]["forProvider"]["tier"], json!("large"));
    }

    #[test]
    fn required_missing_path_is_an_error() {
        let composite = json!({});
        let patch = Patch::FromCompositeFieldPath {
            from_field_path: "spec.missing".into(),
            to_field_path: "spec.x".into(),
            transforms: vec![],
            policy: PatchPolicy {
                from_field_path: FromFieldPathPolicy::Required,
                merge_options: MergeOptionsKeepMapValues::Replace,
            },
        };
        let mut composed = json!({});
        let mut composite_out = Value::Null;
        let mut env_out = None;
        let err = apply_patch(&patch, &ctx(&composite), &mut composed, &mut composite_out, &mut env_out);
        assert!(err.is_err());
    }

    #[test]
    fn optional_missing_path_is_a_noop() {
        let composite = json!({});
        let patch = Patch::FromCompositeFieldPath {
            from_field_path: "spec.missing".into(),
            to_field_path: "spec.x".into(),
            transforms: vec![],
            policy: PatchPolicy::default(),
        };
        let mut composed = json!({"spec": {"x": "keep-me"}});
        let mut composite_out = Value::Null;
        let mut env_out = None;
        apply_patch(&patch, &ctx(&composite), &mut composed, &mut composite_out, &mut env_out).unwrap();
        assert_eq!(composed["spec"]["x"], json!("keep-me"));
    }

    #[test]
    fn transforms_run_before_write() {
        let composite = json!({"spec": {"name": "widget"}});
        let patch = Patch::FromCompositeFieldPath {
            from_field_path: "spec.name".into(),
            to_field_path: "spec.forProvider.name".into(),
            transforms: vec![Transform::String {
                op: xp_types::composition::StringTransformOp::Convert {
                    convert: xp_types::composition::StringConversion::ToUpper,
                },
            }],
            policy: PatchPolicy::default(),
        };
        let mut composed = json!({});
        let mut composite_out = Value::Null;
        let mut env_out = None;
        apply_patch(&patch, &ctx(&composite), &mut composed, &mut composite_out, &mut env_out).unwrap();
        assert_eq!(composed["spec"]["forProvider"]["name"], json!("WIDGET"));
    }

    #[test]
    fn combine_from_composite_formats_variables() {
        let composite = json!({"spec": {"region": "us", "env": "prod"}});
        let patch = Patch::CombineFromComposite {
            combine: Combine {
                variables: vec![
                    xp_types::composition::CombineVariable {
                        from_field_path: "spec.region".into(),
                    },
                    xp_types::composition::CombineVariable {
                        from_field_path: "spec.env".into(),
                    },
                ],
                strategy: CombineStrategy::String {
                    fmt: "%s-%s".into(),
                },
            },
            to_field_path: "spec.forProvider.name".into(),
            transforms: vec![],
            policy: PatchPolicy::default(),
        };
        let mut composed = json!({});
        let mut composite_out = Value::Null;
        let mut env_out = None;
        apply_patch(&patch, &ctx(&composite), &mut composed, &mut composite_out, &mut env_out).unwrap();
        assert_eq!(composed["spec"]["forProvider"]["name"], json!("us-prod"));
    }

    #[test]
    fn patch_set_reference_is_rejected_when_unresolved() {
        let composite = json!({});
        let patch = Patch::PatchSet {
            patch_set_name: "common".into(),
        };
        let mut composed = json!({});
        let mut composite_out = Value::Null;
        let mut env_out = None;
        assert!(apply_patch(&patch, &ctx(&composite), &mut composed, &mut composite_out, &mut env_out).is_err());
    }
}
