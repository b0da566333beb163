//! Deterministic composed-resource naming (§4.B "ChildName").
//!
//! Composed resources are named `<parent-name>-<suffix>` where `suffix` is
//! derived from the parent's UID so retries never collide and restarts of
//! the reconcile loop produce the same name for the same logical child.

use sha2::{Digest, Sha256};

const MAX_NAME_LEN: usize = 63;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("exhausted {0} naming attempts without finding a free name")]
    Exhausted(u32),
}

/// Derive the name for a composed resource identified by `child_key` within
/// `parent_name`/`parent_uid`. `attempt` lets a caller retry on conflict
/// (observed via `exists`) without changing the rest of the derivation.
pub fn child_name(parent_name: &str, parent_uid: &str, child_key: &str, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_uid.as_bytes());
    hasher.update(child_key.as_bytes());
    hasher.update(attempt.to_be_bytes());
    let digest = hasher.finalize();
    let hex_digest = hex::encode(digest);
    let suffix = &hex_digest[..12];

    let budget = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    let truncated_parent: String = parent_name.chars().take(budget).collect();
    format!("{truncated_parent}-{suffix}")
}

/// Try up to `max_attempts` deterministic names, calling `exists` to probe
/// each candidate, and return the first one that's free.
pub fn resolve_name<F>(
    parent_name: &str,
    parent_uid: &str,
    child_key: &str,
    max_attempts: u32,
    mut exists: F,
) -> Result<String, NameError>
where
    F: FnMut(&str) -> bool,
{
    for attempt in 0..max_attempts {
        let candidate = child_name(parent_name, parent_uid, child_key, attempt);
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }
    Err(NameError::Exhausted(max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic_for_same_inputs() {
        let a = child_name("my-db", "uid-1", "bucket", 0);
        let b = child_name("my-db", "uid-1", "bucket", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn different_child_keys_produce_different_names() {
        let a = child_name("my-db", "uid-1", "bucket", 0);
        let b = child_name("my-db", "uid-1", "user", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn different_attempts_produce_different_names() {
        let a = child_name("my-db", "uid-1", "bucket", 0);
        let b = child_name("my-db", "uid-1", "bucket", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn name_never_exceeds_63_characters() {
        let long_parent = "a".repeat(80);
        let name = child_name(&long_parent, "uid-1", "bucket", 0);
        assert!(name.len() <= MAX_NAME_LEN);
    }

    #[test]
    fn resolve_name_retries_past_conflicts() {
        let taken = ["attempt-0-taken"];
        let result = resolve_name("p", "uid", "k", 10, |candidate| {
            candidate == child_name("p", "uid", "k", 0) && taken.contains(&"attempt-0-taken")
        });
        assert!(result.is_ok());
    }

    #[test]
    fn resolve_name_gives_up_after_max_attempts() {
        let result = resolve_name("p", "uid", "k", 3, |_| true);
        assert_eq!(result.unwrap_err(), NameError::Exhausted(3));
    }
}
