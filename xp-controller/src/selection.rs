//! Composition selection chain (§4.C step 2): resolves which Composition a
//! composite instance uses, in priority order.

use xp_selectors::{resolve, Candidate, Mode, SelectorError};
use xp_types::composition::CompositeTypeRef;
use xp_types::dynamic::Composite;
use xp_types::refs::{CompositionReference, ObjectRef, Selector};
use xp_types::xrd::CompositeResourceDefinitionSpec;

use crate::error::{ControllerError, Result};

/// One Composition known to the cluster, reduced to what selection needs.
pub struct CompositionCandidate {
    pub name: String,
    pub composite_type_ref: CompositeTypeRef,
    pub labels: std::collections::BTreeMap<String, String>,
}

/// Resolve the Composition reference for `composite`, given its XRD and the
/// currently known Compositions. Mutates `composite`'s `compositionRef` in
/// place when resolution happens via the selector step, per §4.C step (c).
pub fn select_composition(
    xrd: &CompositeResourceDefinitionSpec,
    composite: &mut Composite,
    composite_gvk: &CompositeTypeRef,
    known_compositions: &[CompositionCandidate],
) -> Result<CompositionReference> {
    if let Some(enforced) = &xrd.enforced_composition_ref {
        return Ok(enforced.clone());
    }
    if let Some(name) = composite.composition_ref() {
        return Ok(CompositionReference { name });
    }
    if let Some(selector_value) = composite.composition_selector() {
        let selector: Selector = serde_json::from_value(selector_value).unwrap_or_default();
        let candidates: Vec<Candidate> = known_compositions
            .iter()
            .filter(|c| &c.composite_type_ref == composite_gvk)
            .map(|c| Candidate {
                reference: ObjectRef {
                    api_version: "apiextensions.xp.io/v1".into(),
                    kind: "Composition".into(),
                    name: c.name.clone(),
                },
                labels: c.labels.clone(),
                controller_uid: None,
                body: serde_json::Value::Null,
            })
            .collect();
        let mode = Mode::Multi {
            sort_by: None,
            limit: Some(1),
        };
        let resolved = resolve(&candidates, &selector, None, &mode).map_err(|e| match e {
            SelectorError::FoundMultipleInSingleMode(_) => ControllerError::NoCompatibleComposition,
            other => ControllerError::Selector(other),
        })?;
        if let Some(first) = resolved.first() {
            composite.set_composition_ref(&first.name);
            return Ok(CompositionReference {
                name: first.name.clone(),
            });
        }
    }
    if let Some(default) = &xrd.default_composition_ref {
        return Ok(default.clone());
    }
    Err(ControllerError::NoCompatibleComposition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::GroupVersionKind;
    use xp_types::xrd::Names;

    fn xrd() -> CompositeResourceDefinitionSpec {
        CompositeResourceDefinitionSpec {
            group: "example.org".into(),
            names: Names {
                kind: "XDatabase".into(),
                plural: "xdatabases".into(),
                singular: "xdatabase".into(),
            },
            claim_names: None,
            versions: vec![],
            connection_secret_keys: vec![],
            default_composition_ref: None,
            enforced_composition_ref: None,
        }
    }

    fn composite_gvk() -> CompositeTypeRef {
        CompositeTypeRef {
            api_version: "example.org/v1".into(),
            kind: "XDatabase".into(),
        }
    }

    #[test]
    fn enforced_ref_wins_over_everything() {
        let mut x = xrd();
        x.enforced_composition_ref = Some(CompositionReference { name: "forced".into() });
        let mut composite = Composite::new(&GroupVersionKind::gvk("example.org", "v1", "XDatabase"), "db-1");
        composite.set_composition_ref("other");
        let result = select_composition(&x, &mut composite, &composite_gvk(), &[]).unwrap();
        assert_eq!(result.name, "forced");
    }

    #[test]
    fn existing_composition_ref_is_respected() {
        let x = xrd();
        let mut composite = Composite::new(&GroupVersionKind::gvk("example.org", "v1", "XDatabase"), "db-1");
        composite.set_composition_ref("chosen");
        let result = select_composition(&x, &mut composite, &composite_gvk(), &[]).unwrap();
        assert_eq!(result.name, "chosen");
    }

    #[test]
    fn selector_picks_first_matching_composition_and_writes_it_back() {
        let x = xrd();
        let mut composite = Composite::new(&GroupVersionKind::gvk("example.org", "v1", "XDatabase"), "db-1");
        composite.set_path(
            "spec.compositionSelector",
            serde_json::json!({"matchLabels": {"tier": "gold"}}),
        )
        .unwrap();
        let candidates = vec![CompositionCandidate {
            name: "gold-composition".into(),
            composite_type_ref: composite_gvk(),
            labels: [("tier".to_string(), "gold".to_string())].into_iter().collect(),
        }];
        let result = select_composition(&x, &mut composite, &composite_gvk(), &candidates).unwrap();
        assert_eq!(result.name, "gold-composition");
        assert_eq!(composite.composition_ref().as_deref(), Some("gold-composition"));
    }

    #[test]
    fn default_ref_used_when_nothing_else_resolves() {
        let mut x = xrd();
        x.default_composition_ref = Some(CompositionReference { name: "default".into() });
        let mut composite = Composite::new(&GroupVersionKind::gvk("example.org", "v1", "XDatabase"), "db-1");
        let result = select_composition(&x, &mut composite, &composite_gvk(), &[]).unwrap();
        assert_eq!(result.name, "default");
    }

    #[test]
    fn no_resolution_path_is_no_compatible_composition() {
        let x = xrd();
        let mut composite = Composite::new(&GroupVersionKind::gvk("example.org", "v1", "XDatabase"), "db-1");
        let err = select_composition(&x, &mut composite, &composite_gvk(), &[]).unwrap_err();
        assert!(matches!(err, ControllerError::NoCompatibleComposition));
    }
}
