//! Orchestrates one composed-template render: patch application, naming,
//! readiness, and connection-detail extraction (§4.B).

use std::collections::BTreeMap;

use serde_json::Value;
use xp_types::composition::ComposedTemplate;

use crate::connection::{self, ConnectionError};
use crate::patch::{self, PatchContext, PatchError};
use crate::readiness::{self, ReadinessError};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Name(#[from] crate::naming::NameError),
}

/// The per-template result of a render pass: the desired object to apply,
/// whether the last-observed state (if any) counts as ready, whatever
/// connection details it publishes, and the fragment of `ToCompositeFieldPath`
/// / `CombineToComposite` patches that should be merged back onto the
/// composite before the next template in the same pass renders (§4.B step 4).
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: String,
    pub desired: Value,
    pub ready: bool,
    pub connection_details: BTreeMap<String, Vec<u8>>,
    pub composite_out: Value,
}

/// Render one composed-template slot against the current composite (and,
/// optionally, the object's last-observed state and secret). `name` is the
/// already-resolved composed-resource name (naming and conflict retry are
/// the caller's responsibility, via `naming::resolve_name`).
pub fn render(
    template: &ComposedTemplate,
    composite: &Value,
    name: &str,
    observed: Option<&Value>,
    secret_data: &BTreeMap<String, Vec<u8>>,
    publish_allowlist: Option<&[String]>,
) -> Result<Observation, ComposeError> {
    let mut desired = template.base.clone();
    let mut composite_out = Value::Null;
    let mut environment_out = None;
    let empty = Value::Null;

    let ctx = PatchContext {
        composite,
        composed: observed.unwrap_or(&empty),
        environment: None,
    };

    for p in &template.patches {
        patch::apply_patch(p, &ctx, &mut desired, &mut composite_out, &mut environment_out)?;
    }

    set_name(&mut desired, name);

    let probe = observed.unwrap_or(&desired);
    let ready = readiness::evaluate(&template.readiness_checks, probe)?;

    let connection_details = if let Some(observed) = observed {
        connection::extract(
            &template.connection_details,
            observed,
            secret_data,
            publish_allowlist,
        )?
    } else {
        BTreeMap::new()
    };

    Ok(Observation {
        name: name.to_string(),
        desired,
        ready,
        connection_details,
        composite_out,
    })
}

fn set_name(desired: &mut Value, name: &str) {
    if !desired.is_object() {
        *desired = serde_json::json!({});
    }
    let obj = desired.as_object_mut().unwrap();
    let metadata = obj
        .entry("metadata".to_string())
        .or_insert_with(|| serde_json::json!({}));
    if let Some(meta) = metadata.as_object_mut() {
        meta.insert("name".to_string(), Value::String(name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xp_types::composition::{Patch, PatchPolicy};

    fn template() -> ComposedTemplate {
        ComposedTemplate {
            name: Some("bucket".into()),
            base: json!({"apiVersion": "s3.example.org/v1", "kind": "Bucket", "spec": {}}),
            patches: vec![Patch::FromCompositeFieldPath {
                from_field_path: "spec.region".into(),
                to_field_path: "spec.forProvider.region".into(),
                transforms: vec![],
                policy: PatchPolicy::default(),
            }],
            readiness_checks: vec![],
            connection_details: vec![],
        }
    }

    #[test]
    fn render_applies_patches_and_assigns_a_name() {
        let composite = json!({"spec": {"region": "us-east-1"}});
        let observation = render(
            &template(),
            &composite,
            "my-bucket-abc123",
            None,
            &Default::default(),
            None,
        )
        .unwrap();
        assert_eq!(observation.desired["spec"]["forProvider"]["region"], json!("us-east-1"));
        assert_eq!(observation.name, "my-bucket-abc123");
    }

    #[test]
    fn render_carries_the_given_name_through() {
        let composite = json!({"spec": {"region": "us-east-1"}});
        let a = render(&template(), &composite, "my-bucket-abc123", None, &Default::default(), None).unwrap();
        let b = render(&template(), &composite, "my-bucket-abc123", None, &Default::default(), None).unwrap();
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn render_without_observed_state_defaults_to_ready_with_no_checks() {
        let composite = json!({"spec": {"region": "us-east-1"}});
        let observation = render(&template(), &composite, "my-bucket-abc123", None, &Default::default(), None).unwrap();
        assert!(!observation.ready);
    }

    #[test]
    fn render_exposes_to_composite_patches() {
        let composite = json!({"spec": {"region": "us-east-1"}});
        let mut tmpl = template();
        tmpl.patches.push(Patch::ToCompositeFieldPath {
            from_field_path: "status.atProvider.arn".into(),
            to_field_path: "status.bucketArn".into(),
            transforms: vec![],
            policy: PatchPolicy::default(),
        });
        let observed = json!({"status": {"atProvider": {"arn": "arn:aws:s3:::my-bucket"}}});
        let observation = render(&tmpl, &composite, "my-bucket-abc123", Some(&observed), &Default::default(), None).unwrap();
        assert_eq!(observation.composite_out["status"]["bucketArn"], json!("arn:aws:s3:::my-bucket"));
    }
}
