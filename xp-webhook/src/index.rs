//! The Usage index (§4.H.1): a field index over `Usage` objects keyed by
//! `group.kind.name` of the protected (`of`) target, rebuilt from a full
//! list rather than incrementally maintained — a cache-miss is always
//! safe to treat as "no usages" (§4.H "Failure semantics").

use std::collections::HashMap;
use std::sync::Arc;

use kube::api::{Api, ListParams};
use tokio::sync::RwLock;
use xp_types::usage::{Usage, UsageTarget};

/// One `Usage` relevant to a given `of` key, reduced to what the
/// admission hook needs to build its denial message and annotation.
#[derive(Clone, Debug)]
pub struct UsageEntry {
    pub usage_name: String,
    pub by: Option<UsageTarget>,
    pub reason: Option<String>,
    pub replay_deletion: bool,
}

impl UsageEntry {
    /// The human-readable blocker description used in the 409 body.
    pub fn describe(&self) -> String {
        match (&self.by, &self.reason) {
            (Some(by), _) => format!("in use by {} {} {:?}", by.api_version, by.kind, by.resource_ref),
            (None, Some(reason)) => reason.clone(),
            (None, None) => format!("blocked by Usage {:?}", self.usage_name),
        }
    }
}

fn target_key(group: &str, kind: &str, name: &str) -> String {
    format!("{group}.{kind}.{name}")
}

/// A key derived from an object's `apiVersion`/`kind`/`name`, the same
/// shape the index is built over.
pub fn object_key(api_version: &str, kind: &str, name: &str) -> String {
    let group = api_version.split_once('/').map(|(g, _)| g).unwrap_or("");
    target_key(group, kind, name)
}

#[derive(Default)]
pub struct UsageIndex {
    by_target: RwLock<HashMap<String, Vec<UsageEntry>>>,
}

impl UsageIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rebuild the index from a full list of Usages. Usages whose `of`
    /// target is a selector rather than a direct reference are resolved
    /// by the caller (via `xp_selectors`, the same resolver Composition
    /// selection uses) before being folded in here — an index entry
    /// only ever keys off a concrete reference.
    pub async fn rebuild(&self, client: kube::Client) -> Result<(), kube::Error> {
        let api: Api<Usage> = Api::all(client);
        let usages = api.list(&ListParams::default()).await?;

        let mut next: HashMap<String, Vec<UsageEntry>> = HashMap::new();
        for usage in usages.items {
            let Some(resource_ref) = usage.spec.of.resource_ref.as_ref() else {
                // Selector-based targets need resolution against live
                // candidates; skip until resolved (§4.H cache-miss
                // semantics treat this the same as "no usages" yet).
                continue;
            };
            let key = target_key(
                resource_ref.api_version.split_once('/').map(|(g, _)| g).unwrap_or(""),
                &resource_ref.kind,
                &resource_ref.name,
            );
            next.entry(key).or_default().push(UsageEntry {
                usage_name: usage.metadata.name.clone().unwrap_or_default(),
                by: usage.spec.by.clone(),
                reason: usage.spec.reason.clone(),
                replay_deletion: usage.spec.replay_deletion,
            });
        }

        *self.by_target.write().await = next;
        Ok(())
    }

    /// Insert or refresh the entries contributed by selector-resolved
    /// Usage targets, keyed by the concrete references `xp_selectors`
    /// resolved them to.
    pub async fn index_resolved(&self, key: String, entry: UsageEntry) {
        self.by_target.write().await.entry(key).or_default().push(entry);
    }

    pub async fn blockers(&self, api_version: &str, kind: &str, name: &str) -> Vec<UsageEntry> {
        let key = object_key(api_version, kind, name);
        self.by_target.read().await.get(&key).cloned().unwrap_or_default()
    }
}

/// Periodically rebuild `index` until `cancel` resolves. Mirrors the
/// poll-based refresh loop the controller engine's child controllers
/// use (§4.G), since Usages are expected to be low in volume and
/// consistency only needs to be eventual (§4.H).
pub async fn run_refresher(
    index: Arc<UsageIndex>,
    client: kube::Client,
    interval: std::time::Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if let Err(err) = index.rebuild(client.clone()).await {
            tracing::warn!(error = %err, "usage index rebuild failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.wait_for(|c| *c) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_splits_group_from_api_version() {
        assert_eq!(object_key("s3.example.org/v1", "Bucket", "b1"), "s3.example.org.Bucket.b1");
        assert_eq!(object_key("v1", "Secret", "s1"), ".Secret.s1");
    }

    #[tokio::test]
    async fn blockers_is_empty_for_unknown_target() {
        let index = UsageIndex::new();
        assert!(index.blockers("v1", "Secret", "s1").await.is_empty());
    }

    #[tokio::test]
    async fn index_resolved_entries_are_found_by_blockers() {
        let index = UsageIndex::new();
        index
            .index_resolved(
                object_key("v1", "Secret", "s1"),
                UsageEntry {
                    usage_name: "u1".into(),
                    by: None,
                    reason: Some("manual hold".into()),
                    replay_deletion: false,
                },
            )
            .await;
        let found = index.blockers("v1", "Secret", "s1").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].describe(), "manual hold");
    }
}
