//! Resolves label- and controller-ref-based selectors into object
//! references (§4.I). Used both for Usage target resolution and for the
//! `compositionSelector` step of Composition selection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;
use xp_types::fieldpath::FieldPath;
use xp_types::refs::{ObjectRef, Selector};

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("selector matched {0} objects in Single mode, expected exactly one")]
    FoundMultipleInSingleMode(usize),
    #[error(transparent)]
    FieldPath(#[from] xp_types::fieldpath::FieldPathError),
    #[error("sort field {field_path:?} produced incomparable values: {a:?} vs {b:?}")]
    SortError {
        field_path: String,
        a: Value,
        b: Value,
    },
}

/// One object eligible to be selected: its identity, labels, the UID of
/// whatever object controls it (if any), and its full body (for sort-field
/// extraction in Multi mode).
#[derive(Clone, Debug)]
pub struct Candidate {
    pub reference: ObjectRef,
    pub labels: BTreeMap<String, String>,
    pub controller_uid: Option<String>,
    pub body: Value,
}

#[derive(Clone, Debug)]
pub enum Mode {
    /// Exactly one match is expected; anything else is an error.
    Single,
    /// Up to `limit` matches, stably sorted by `sort_by` (declaration order
    /// if `sort_by` is absent).
    Multi {
        sort_by: Option<String>,
        limit: Option<usize>,
    },
}

/// Resolve `selector` against `candidates`, optionally requiring a
/// controller-reference match against `context_uid`.
pub fn resolve(
    candidates: &[Candidate],
    selector: &Selector,
    context_uid: Option<&str>,
    mode: &Mode,
) -> Result<Vec<ObjectRef>, SelectorError> {
    let mut matched: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| label_match(&c.labels, &selector.match_labels.match_labels))
        .filter(|c| {
            if selector.match_controller_ref {
                c.controller_uid.as_deref() == context_uid
            } else {
                true
            }
        })
        .collect();

    match mode {
        Mode::Single => {
            if matched.len() != 1 {
                return Err(SelectorError::FoundMultipleInSingleMode(matched.len()));
            }
            Ok(vec![matched[0].reference.clone()])
        }
        Mode::Multi { sort_by, limit } => {
            if let Some(field_path) = sort_by {
                stable_sort_by_field(&mut matched, field_path)?;
            }
            if let Some(limit) = limit {
                matched.truncate(*limit);
            }
            Ok(matched.into_iter().map(|c| c.reference.clone()).collect())
        }
    }
}

fn label_match(have: &BTreeMap<String, String>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

#[derive(PartialEq, PartialOrd)]
enum SortKey {
    Int(i64),
    Float(f64),
    Str(String),
}

fn sort_key(value: &Value) -> Option<SortKey> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(SortKey::Int(i))
            } else {
                n.as_f64().map(SortKey::Float)
            }
        }
        Value::String(s) => Some(SortKey::Str(s.clone())),
        _ => None,
    }
}

fn same_kind(a: &SortKey, b: &SortKey) -> bool {
    matches!(
        (a, b),
        (SortKey::Int(_), SortKey::Int(_))
            | (SortKey::Float(_), SortKey::Float(_))
            | (SortKey::Int(_), SortKey::Float(_))
            | (SortKey::Float(_), SortKey::Int(_))
            | (SortKey::Str(_), SortKey::Str(_))
    )
}

fn as_f64(key: &SortKey) -> Option<f64> {
    match key {
        SortKey::Int(i) => Some(*i as f64),
        SortKey::Float(f) => Some(*f),
        SortKey::Str(_) => None,
    }
}

fn stable_sort_by_field(candidates: &mut [&Candidate], field_path: &str) -> Result<(), SelectorError> {
    let path = FieldPath::parse(field_path)?;
    let mut keys = Vec::with_capacity(candidates.len());
    for c in candidates.iter() {
        let value = path.get(&c.body).into_iter().next().cloned().unwrap_or(Value::Null);
        let key = sort_key(&value).ok_or_else(|| SelectorError::SortError {
            field_path: field_path.to_string(),
            a: value.clone(),
            b: value.clone(),
        })?;
        keys.push((key, value));
    }
    for window in keys.windows(2) {
        if !same_kind(&window[0].0, &window[1].0) {
            return Err(SelectorError::SortError {
                field_path: field_path.to_string(),
                a: window[0].1.clone(),
                b: window[1].1.clone(),
            });
        }
    }

    let mut indexed: Vec<usize> = (0..candidates.len()).collect();
    indexed.sort_by(|&i, &j| {
        let (a, b) = (&keys[i].0, &keys[j].0);
        match (a, b) {
            (SortKey::Str(x), SortKey::Str(y)) => x.cmp(y),
            _ => as_f64(a)
                .unwrap()
                .partial_cmp(&as_f64(b).unwrap())
                .unwrap_or(Ordering::Equal),
        }
    });

    let sorted: Vec<&Candidate> = indexed.into_iter().map(|i| candidates[i]).collect();
    candidates.clone_from_slice(&sorted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xp_types::refs::LabelSelector;

    fn candidate(name: &str, labels: &[(&str, &str)], body: Value) -> Candidate {
        Candidate {
            reference: ObjectRef {
                api_version: "example.org/v1".into(),
                kind: "Widget".into(),
                name: name.into(),
            },
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            controller_uid: None,
            body,
        }
    }

    fn selector(labels: &[(&str, &str)]) -> Selector {
        Selector {
            match_labels: LabelSelector {
                match_labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            },
            match_controller_ref: false,
        }
    }

    #[test]
    fn single_mode_succeeds_with_exactly_one_match() {
        let candidates = vec![candidate("a", &[("app", "foo")], json!({}))];
        let refs = resolve(&candidates, &selector(&[("app", "foo")]), None, &Mode::Single).unwrap();
        assert_eq!(refs[0].name, "a");
    }

    #[test]
    fn single_mode_errors_on_multiple_matches() {
        let candidates = vec![
            candidate("a", &[("app", "foo")], json!({})),
            candidate("b", &[("app", "foo")], json!({})),
        ];
        let err = resolve(&candidates, &selector(&[("app", "foo")]), None, &Mode::Single).unwrap_err();
        assert!(matches!(err, SelectorError::FoundMultipleInSingleMode(2)));
    }

    #[test]
    fn single_mode_errors_on_zero_matches() {
        let candidates = vec![candidate("a", &[("app", "bar")], json!({}))];
        let err = resolve(&candidates, &selector(&[("app", "foo")]), None, &Mode::Single).unwrap_err();
        assert!(matches!(err, SelectorError::FoundMultipleInSingleMode(0)));
    }

    #[test]
    fn multi_mode_sorts_and_truncates() {
        let candidates = vec![
            candidate("c", &[("app", "foo")], json!({"priority": 3})),
            candidate("a", &[("app", "foo")], json!({"priority": 1})),
            candidate("b", &[("app", "foo")], json!({"priority": 2})),
        ];
        let mode = Mode::Multi {
            sort_by: Some("priority".into()),
            limit: Some(2),
        };
        let refs = resolve(&candidates, &selector(&[("app", "foo")]), None, &mode).unwrap();
        assert_eq!(refs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn multi_mode_sort_rejects_mixed_types() {
        let candidates = vec![
            candidate("a", &[], json!({"priority": 1})),
            candidate("b", &[], json!({"priority": "high"})),
        ];
        let mode = Mode::Multi {
            sort_by: Some("priority".into()),
            limit: None,
        };
        let err = resolve(&candidates, &selector(&[]), None, &mode).unwrap_err();
        assert!(matches!(err, SelectorError::SortError { .. }));
    }

    #[test]
    fn controller_ref_match_is_enforced_when_requested() {
        let mut c1 = candidate("a", &[("app", "foo")], json!({}));
        c1.controller_uid = Some("parent-1".into());
        let mut c2 = candidate("b", &[("app", "foo")], json!({}));
        c2.controller_uid = Some("parent-2".into());
        let sel = Selector {
            match_labels: LabelSelector {
                match_labels: [("app".to_string(), "foo".to_string())].into_iter().collect(),
            },
            match_controller_ref: true,
        };
        let refs = resolve(&[c1, c2], &sel, Some("parent-1"), &Mode::Single).unwrap();
        assert_eq!(refs[0].name, "a");
    }
}
