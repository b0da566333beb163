//! Minimal finalizer bookkeeping shared by the Definition (§4.E) and
//! Claim (§4.D step 4) deletion paths: both need "block delete, do
//! cleanup, then let it through" semantics without the full generality
//! of `kube::runtime::finalizer`.

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;

use crate::error::Result;

pub async fn ensure_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str, field_manager: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    if obj.finalizers().iter().any(|f| f == finalizer) {
        return Ok(());
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&obj.name_any(), &PatchParams::apply(field_manager), &Patch::Merge(patch))
        .await?;
    Ok(())
}

pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K, finalizer: &str, field_manager: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let remaining: Vec<String> = obj.finalizers().iter().filter(|f| *f != finalizer).cloned().collect();
    if remaining.len() == obj.finalizers().len() {
        return Ok(());
    }
    let patch = json!({ "metadata": { "finalizers": remaining } });
    api.patch(&obj.name_any(), &PatchParams::apply(field_manager), &Patch::Merge(patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[kube(group = "example.org", version = "v1", kind = "Widget")]
    struct WidgetSpec {
        size: String,
    }

    fn widget_with_finalizers(finalizers: Vec<String>) -> Widget {
        let mut w = Widget::new("w1", WidgetSpec { size: "s".into() });
        w.metadata = ObjectMeta {
            name: Some("w1".into()),
            finalizers: Some(finalizers),
            ..Default::default()
        };
        w
    }

    #[test]
    fn finalizer_presence_is_detected_by_name() {
        let w = widget_with_finalizers(vec!["xrd.xp.io/definition-controller".into()]);
        assert!(w.finalizers().iter().any(|f| f == "xrd.xp.io/definition-controller"));
    }

    #[test]
    fn removing_last_finalizer_leaves_empty_list() {
        let w = widget_with_finalizers(vec!["a".into()]);
        let remaining: Vec<String> = w.finalizers().iter().filter(|f| *f != "a").cloned().collect();
        assert!(remaining.is_empty());
    }
}
