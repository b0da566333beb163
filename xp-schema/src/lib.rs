//! Schema Renderer (§4.A): builds the schema document for the composite
//! kind and, when offered, the claim kind, from an XRD.

use serde::Serialize;
use serde_json::{json, Map, Value};
use xp_types::xrd::{CompositeResourceDefinition, Names, XrdVersion};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("XRD has no versions")]
    NoVersions,
    #[error("user schema property {path:?} collides with a framework-reserved property")]
    PropertyCollision { path: String },
    #[error("user schema for version {version:?} is not an object schema")]
    NotAnObjectSchema { version: String },
}

/// Which flavor of schema to render: the cluster-scoped composite, or the
/// namespaced claim (§4.A).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaFlavor {
    Composite,
    Claim,
}

/// The rendered schema document for a single served version.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderedVersion {
    pub name: String,
    pub served: bool,
    pub storage: bool,
    pub schema: Value,
}

/// The full rendered document: one entry per XRD version, plus the names
/// the generated schema should be installed under (§6).
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedSchema {
    pub document_name: String,
    pub group: String,
    pub names: Names,
    pub namespaced: bool,
    pub versions: Vec<RenderedVersion>,
}

fn framework_spec_properties(flavor: SchemaFlavor) -> Map<String, Value> {
    let mut props = Map::new();
    match flavor {
        SchemaFlavor::Composite => {
            props.insert(
                "compositionRef".into(),
                json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
            );
            props.insert(
                "compositionSelector".into(),
                json!({"type": "object", "properties": {"matchLabels": {"type": "object", "additionalProperties": {"type": "string"}}}}),
            );
            props.insert(
                "compositionRevisionRef".into(),
                json!({"type": "object", "properties": {"name": {"type": "string"}}}),
            );
            props.insert(
                "compositionUpdatePolicy".into(),
                json!({"type": "string", "enum": ["Automatic", "Manual"]}),
            );
            props.insert(
                "claimRef".into(),
                json!({"type": "object", "properties": {"apiVersion": {"type": "string"}, "kind": {"type": "string"}, "namespace": {"type": "string"}, "name": {"type": "string"}}}),
            );
            props.insert(
                "resourceRefs".into(),
                json!({"type": "array", "items": {"type": "object", "properties": {"apiVersion": {"type": "string"}, "kind": {"type": "string"}, "name": {"type": "string"}}}}),
            );
            props.insert(
                "environmentConfigRefs".into(),
                json!({"type": "array", "items": {"type": "object", "properties": {"name": {"type": "string"}}}}),
            );
        }
        SchemaFlavor::Claim => {
            props.insert(
                "resourceRef".into(),
                json!({"type": "object", "properties": {"apiVersion": {"type": "string"}, "kind": {"type": "string"}, "name": {"type": "string"}}}),
            );
        }
    }
    props.insert(
        "writeConnectionSecretToRef".into(),
        json!({"type": "object", "properties": {"namespace": {"type": "string"}, "name": {"type": "string"}}, "required": ["name"]}),
    );
    props
}

fn framework_status_properties() -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(
        "conditions".into(),
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "type": {"type": "string"},
                    "status": {"type": "string"},
                    "lastTransitionTime": {"type": "string", "format": "date-time"},
                    "reason": {"type": "string"},
                    "message": {"type": "string"},
                },
                "required": ["type", "status", "lastTransitionTime", "reason"],
            },
        }),
    );
    props.insert(
        "connectionDetails".into(),
        json!({"type": "object", "properties": {"lastPublishedTime": {"type": "string", "format": "date-time"}}}),
    );
    props
}

/// Merge `framework` properties into `user`'s `properties.<section>.properties`,
/// failing with `PropertyCollision` if a key is already declared by the user.
fn merge_properties_into(
    user_schema: &mut Value,
    section: &str,
    framework: Map<String, Value>,
) -> Result<(), RenderError> {
    let section_schema = user_schema
        .as_object_mut()
        .and_then(|o| o.get_mut("properties"))
        .and_then(|p| p.as_object_mut())
        .and_then(|p| p.get_mut(section));

    let section_schema = match section_schema {
        Some(s) => s,
        None => {
            // The user schema doesn't declare this section at all yet;
            // create an empty object schema for it.
            let obj = user_schema.as_object_mut().unwrap();
            let props = obj
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            props
                .as_object_mut()
                .unwrap()
                .entry(section.to_string())
                .or_insert_with(|| json!({"type": "object", "properties": {}}))
        }
    };

    if !section_schema.is_object() {
        return Err(RenderError::NotAnObjectSchema {
            version: section.to_string(),
        });
    }
    let section_obj = section_schema.as_object_mut().unwrap();
    section_obj
        .entry("type")
        .or_insert_with(|| json!("object"));
    let user_props = section_obj
        .entry("properties")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .unwrap();

    for (key, schema) in framework {
        if user_props.contains_key(&key) {
            return Err(RenderError::PropertyCollision {
                path: format!("{section}.{key}"),
            });
        }
        user_props.insert(key, schema);
    }
    Ok(())
}

fn render_version(version: &XrdVersion, flavor: SchemaFlavor) -> Result<RenderedVersion, RenderError> {
    let mut schema = version.schema.clone();
    if !schema.is_object() {
        return Err(RenderError::NotAnObjectSchema {
            version: version.name.clone(),
        });
    }
    merge_properties_into(&mut schema, "spec", framework_spec_properties(flavor))?;
    merge_properties_into(&mut schema, "status", framework_status_properties())?;
    Ok(RenderedVersion {
        name: version.name.clone(),
        served: version.served,
        storage: version.storage,
        schema,
    })
}

/// Render the composite kind's schema (§4.A).
pub fn render_composite_schema(xrd: &CompositeResourceDefinition) -> Result<RenderedSchema, RenderError> {
    if xrd.spec.versions.is_empty() {
        return Err(RenderError::NoVersions);
    }
    let versions = xrd
        .spec
        .versions
        .iter()
        .map(|v| render_version(v, SchemaFlavor::Composite))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RenderedSchema {
        document_name: xrd.schema_name(),
        group: xrd.spec.group.clone(),
        names: xrd.spec.names.clone(),
        namespaced: false,
        versions,
    })
}

/// Convert a rendered schema into the document the host API server
/// actually installs (§6 "Generated schemas"): a
/// `CustomResourceDefinition` with `preserveUnknownFields=false`, the
/// status subresource enabled, and an age printer column.
pub fn to_crd(
    rendered: &RenderedSchema,
) -> k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceColumnDefinition, CustomResourceDefinition, CustomResourceDefinitionNames,
        CustomResourceDefinitionSpec, CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
        CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    let versions = rendered
        .versions
        .iter()
        .map(|v| {
            let schema: JSONSchemaProps =
                serde_json::from_value(v.schema.clone()).expect("rendered schema is valid JSONSchemaProps");
            CustomResourceDefinitionVersion {
                name: v.name.clone(),
                served: v.served,
                storage: v.storage,
                schema: Some(CustomResourceValidation {
                    open_apiv3_schema: Some(schema),
                }),
                subresources: Some(CustomResourceSubresources {
                    status: Some(CustomResourceSubresourceStatus {}),
                    ..Default::default()
                }),
                additional_printer_columns: Some(vec![CustomResourceColumnDefinition {
                    name: "Age".into(),
                    type_: "date".into(),
                    json_path: ".metadata.creationTimestamp".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }
        })
        .collect();

    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(rendered.document_name.clone()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: rendered.group.clone(),
            names: CustomResourceDefinitionNames {
                kind: rendered.names.kind.clone(),
                plural: rendered.names.plural.clone(),
                singular: Some(rendered.names.singular.clone()),
                categories: Some(vec!["xp".into()]),
                ..Default::default()
            },
            scope: if rendered.namespaced {
                "Namespaced".into()
            } else {
                "Cluster".into()
            },
            versions,
            preserve_unknown_fields: Some(false),
            ..Default::default()
        },
        status: None,
    }
}

/// Render the claim kind's schema, if the XRD offers one (§4.A).
pub fn render_claim_schema(
    xrd: &CompositeResourceDefinition,
) -> Result<Option<RenderedSchema>, RenderError> {
    let Some(claim_names) = xrd.spec.claim_names.clone() else {
        return Ok(None);
    };
    if xrd.spec.versions.is_empty() {
        return Err(RenderError::NoVersions);
    }
    let versions = xrd
        .spec
        .versions
        .iter()
        .map(|v| render_version(v, SchemaFlavor::Claim))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(RenderedSchema {
        document_name: format!("{}.{}", claim_names.plural, xrd.spec.group),
        group: xrd.spec.group.clone(),
        names: claim_names,
        namespaced: true,
        versions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xp_types::xrd::CompositeResourceDefinitionSpec;

    fn xrd(user_spec_props: Value) -> CompositeResourceDefinition {
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
                    schema: json!({
                        "type": "object",
                        "properties": {
                            "spec": {"type": "object", "properties": user_spec_props},
                            "status": {"type": "object", "properties": {}},
                        },
                    }),
                }],
                connection_secret_keys: vec!["endpoint".into()],
                default_composition_ref: None,
                enforced_composition_ref: None,
            },
        )
    }

    #[test]
    fn merges_framework_properties_without_colliding() {
        let x = xrd(json!({"size": {"type": "string"}}));
        let rendered = render_composite_schema(&x).unwrap();
        let v1 = &rendered.versions[0];
        let spec_props = &v1.schema["properties"]["spec"]["properties"];
        assert!(spec_props.get("size").is_some());
        assert!(spec_props.get("compositionRef").is_some());
        assert!(spec_props.get("resourceRefs").is_some());
        let status_props = &v1.schema["properties"]["status"]["properties"];
        assert!(status_props.get("conditions").is_some());
    }

    #[test]
    fn claim_schema_omits_resource_refs_and_claim_ref() {
        let x = xrd(json!({"size": {"type": "string"}}));
        let rendered = render_claim_schema(&x).unwrap().unwrap();
        assert!(rendered.namespaced);
        assert_eq!(rendered.document_name, "databases.example.org");
        let spec_props = &rendered.versions[0].schema["properties"]["spec"]["properties"];
        assert!(spec_props.get("resourceRefs").is_none());
        assert!(spec_props.get("claimRef").is_none());
        assert!(spec_props.get("resourceRef").is_some());
    }

    #[test]
    fn no_claim_names_means_no_claim_schema() {
        let mut x = xrd(json!({}));
        x.spec.claim_names = None;
        assert_eq!(render_claim_schema(&x).unwrap(), None);
    }

    #[test]
    fn colliding_user_property_is_a_render_error() {
        let x = xrd(json!({"compositionRef": {"type": "string"}}));
        let err = render_composite_schema(&x).unwrap_err();
        assert_eq!(
            err,
            RenderError::PropertyCollision {
                path: "spec.compositionRef".into()
            }
        );
    }

    #[test]
    fn rendering_twice_is_byte_identical() {
        let x = xrd(json!({"size": {"type": "string"}}));
        let a = render_composite_schema(&x).unwrap();
        let b = render_composite_schema(&x).unwrap();
        assert_eq!(serde_json::to_string(&a.versions).unwrap(), serde_json::to_string(&b.versions).unwrap());
    }
}
