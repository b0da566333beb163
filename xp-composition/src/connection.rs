//! Connection-detail extraction (§4.B step 4): pulls secret-worthy values
//! out of a composed resource's observed state and the connection secret it
//! already published, filtered through the composite's publish allow-list.

use std::collections::BTreeMap;

use serde_json::Value;
use xp_types::composition::ConnectionDetail;
use xp_types::fieldpath::FieldPath;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    FieldPath(#[from] xp_types::fieldpath::FieldPathError),
    #[error("connection detail {0:?} referenced an unknown source secret key")]
    MissingSecretKey(String),
}

/// `secret_data` is the composed resource's own published connection
/// secret (if any), keyed the way Kubernetes `Secret.data` is: raw bytes.
pub fn extract(
    specs: &[ConnectionDetail],
    observed: &Value,
    secret_data: &BTreeMap<String, Vec<u8>>,
    allowlist: Option<&[String]>,
) -> Result<BTreeMap<String, Vec<u8>>, ConnectionError> {
    let mut out = BTreeMap::new();
    for spec in specs {
        if let Some(allowed) = allowlist {
            if !allowed.iter().any(|a| a == spec.name()) {
                continue;
            }
        }
        let value = match spec {
            ConnectionDetail::FromValue { value, .. } => value.clone().into_bytes(),
            ConnectionDetail::FromFieldPath { from_field_path, .. } => {
                let path = FieldPath::parse(from_field_path)?;
                match path.get(observed).first() {
                    Some(v) => value_to_bytes(v),
                    None => continue,
                }
            }
            ConnectionDetail::FromConnectionSecretKey {
                from_connection_secret_key,
                ..
            } => secret_data
                .get(from_connection_secret_key)
                .cloned()
                .ok_or_else(|| ConnectionError::MissingSecretKey(from_connection_secret_key.clone()))?,
        };
        out.insert(spec.name().to_string(), value);
    }
    Ok(out)
}

fn value_to_bytes(v: &Value) -> Vec<u8> {
    match v {
        Value::String(s) => s.clone().into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_is_copied_verbatim() {
        let specs = vec![ConnectionDetail::FromValue {
            name: "username".into(),
            value: "admin".into(),
        }];
        let out = extract(&specs, &Value::Null, &BTreeMap::new(), None).unwrap();
        assert_eq!(out.get("username"), Some(&b"admin".to_vec()));
    }

    #[test]
    fn from_field_path_reads_observed_state() {
        let specs = vec![ConnectionDetail::FromFieldPath {
            name: "endpoint".into(),
            from_field_path: "status.atProvider.endpoint".into(),
        }];
        let observed = json!({"status": {"atProvider": {"endpoint": "db.example.com"}}});
        let out = extract(&specs, &observed, &BTreeMap::new(), None).unwrap();
        assert_eq!(out.get("endpoint"), Some(&b"db.example.com".to_vec()));
    }

    #[test]
    fn missing_secret_key_is_an_error() {
        let specs = vec![ConnectionDetail::FromConnectionSecretKey {
            name: "password".into(),
            from_connection_secret_key: "password".into(),
        }];
        assert!(extract(&specs, &Value::Null, &BTreeMap::new(), None).is_err());
    }

    #[test]
    fn allowlist_filters_out_non_allowed_keys() {
        let specs = vec![
            ConnectionDetail::FromValue {
                name: "username".into(),
                value: "admin".into(),
            },
            ConnectionDetail::FromValue {
                name: "password".into(),
                value: "hunter2".into(),
            },
        ];
        let allow = vec!["username".to_string()];
        let out = extract(&specs, &Value::Null, &BTreeMap::new(), Some(&allow)).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("username"));
    }
}
