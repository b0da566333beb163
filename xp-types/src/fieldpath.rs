//! Field-path addressing over a generic JSON tree (§3.1, §9 "Patch paths
//! with wildcards").
//!
//! A path is a dot-separated sequence of segments, each either a plain
//! object key, an array index (`[3]`), or a wildcard (`[*]`) meaning "every
//! element of the array at this position".

use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath(pub Vec<Segment>);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldPathError {
    #[error("empty field path")]
    Empty,
    #[error("invalid segment {0:?}")]
    InvalidSegment(String),
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, FieldPathError> {
        if path.is_empty() {
            return Err(FieldPathError::Empty);
        }
        let mut segments = Vec::new();
        for raw in path.split('.') {
            let mut rest = raw;
            // A key may be immediately followed by one or more `[..]` index
            // groups, e.g. `tags[0]` or `spec.forProvider.tags[*]`.
            if let Some(bracket) = rest.find('[') {
                let (key, tail) = rest.split_at(bracket);
                if !key.is_empty() {
                    segments.push(Segment::Key(key.to_string()));
                }
                rest = tail;
                while let Some(stripped) = rest.strip_prefix('[') {
                    let end = stripped
                        .find(']')
                        .ok_or_else(|| FieldPathError::InvalidSegment(raw.to_string()))?;
                    let inner = &stripped[..end];
                    segments.push(if inner == "*" {
                        Segment::Wildcard
                    } else {
                        Segment::Index(
                            inner
                                .parse()
                                .map_err(|_| FieldPathError::InvalidSegment(raw.to_string()))?,
                        )
                    });
                    rest = &stripped[end + 1..];
                }
                if !rest.is_empty() {
                    return Err(FieldPathError::InvalidSegment(raw.to_string()));
                }
            } else {
                segments.push(Segment::Key(rest.to_string()));
            }
        }
        Ok(FieldPath(segments))
    }

    /// Read the value(s) addressed by this path. A wildcard segment fans
    /// out, so the result may contain more than one value even though most
    /// paths resolve to exactly zero or one.
    pub fn get<'v>(&self, root: &'v Value) -> Vec<&'v Value> {
        let mut current = vec![root];
        for segment in &self.0 {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(key) => {
                        if let Some(v) = value.get(key) {
                            next.push(v);
                        }
                    }
                    Segment::Index(i) => {
                        if let Some(v) = value.get(*i) {
                            next.push(v);
                        }
                    }
                    Segment::Wildcard => {
                        if let Some(arr) = value.as_array() {
                            next.extend(arr.iter());
                        }
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Write `value` at this path, creating intermediate objects/arrays as
    /// needed. A wildcard segment applies `value` to every existing element
    /// at that position (§9); it never creates new array elements.
    pub fn set(&self, root: &mut Value, value: Value) {
        fn set_rec(current: &mut Value, segments: &[Segment], value: &Value) {
            match segments.split_first() {
                None => *current = value.clone(),
                Some((Segment::Key(key), rest)) => {
                    if !current.is_object() {
                        *current = Value::Object(Default::default());
                    }
                    let obj = current.as_object_mut().unwrap();
                    let slot = obj.entry(key.clone()).or_insert(Value::Null);
                    if rest.is_empty() {
                        *slot = value.clone();
                    } else {
                        set_rec(slot, rest, value);
                    }
                }
                Some((Segment::Index(i), rest)) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let arr = current.as_array_mut().unwrap();
                    while arr.len() <= *i {
                        arr.push(Value::Null);
                    }
                    if rest.is_empty() {
                        arr[*i] = value.clone();
                    } else {
                        set_rec(&mut arr[*i], rest, value);
                    }
                }
                Some((Segment::Wildcard, rest)) => {
                    if let Some(arr) = current.as_array_mut() {
                        for elem in arr.iter_mut() {
                            if rest.is_empty() {
                                *elem = value.clone();
                            } else {
                                set_rec(elem, rest, value);
                            }
                        }
                    }
                }
            }
        }
        set_rec(root, &self.0, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_dotted_path() {
        let p = FieldPath::parse("spec.forProvider.name").unwrap();
        assert_eq!(
            p.0,
            vec![
                Segment::Key("spec".into()),
                Segment::Key("forProvider".into()),
                Segment::Key("name".into()),
            ]
        );
    }

    #[test]
    fn parses_index_and_wildcard() {
        let p = FieldPath::parse("spec.forProvider.tags[*]").unwrap();
        assert_eq!(
            p.0,
            vec![
                Segment::Key("spec".into()),
                Segment::Key("forProvider".into()),
                Segment::Key("tags".into()),
                Segment::Wildcard,
            ]
        );
        let p2 = FieldPath::parse("items[3].name").unwrap();
        assert_eq!(
            p2.0,
            vec![
                Segment::Key("items".into()),
                Segment::Index(3),
                Segment::Key("name".into()),
            ]
        );
    }

    #[test]
    fn get_returns_empty_for_missing_path() {
        let root = json!({"spec": {"size": "large"}});
        let p = FieldPath::parse("spec.missing").unwrap();
        assert!(p.get(&root).is_empty());
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        let p = FieldPath::parse("spec.forProvider.name").unwrap();
        p.set(&mut root, json!("bucket-1"));
        assert_eq!(root["spec"]["forProvider"]["name"], json!("bucket-1"));
    }

    #[test]
    fn set_wildcard_applies_to_every_element() {
        let mut root = json!({"spec": {"tags": [{"k": "a"}, {"k": "b"}]}});
        let p = FieldPath::parse("spec.tags[*].env").unwrap();
        p.set(&mut root, json!("prod"));
        assert_eq!(root["spec"]["tags"][0]["env"], json!("prod"));
        assert_eq!(root["spec"]["tags"][1]["env"], json!("prod"));
    }

    #[test]
    fn set_extends_arrays_with_null_padding() {
        let mut root = json!({});
        let p = FieldPath::parse("items[2]").unwrap();
        p.set(&mut root, json!("x"));
        assert_eq!(root["items"], json!([null, null, "x"]));
    }
}
