//! Readiness evaluation (§4.B step 3): decides whether a composed resource
//! counts as ready for the purposes of aggregating composite readiness.

use serde_json::Value;
use xp_types::composition::ReadinessCheck;
use xp_types::fieldpath::FieldPath;

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error(transparent)]
    FieldPath(#[from] xp_types::fieldpath::FieldPathError),
}

/// Default behavior when a template declares no readiness checks at all:
/// the composed resource is considered ready once it reports a `Ready`
/// condition with status `True`. No conditions array at all means the
/// provider controller hasn't reported status yet, so it isn't ready.
pub fn evaluate(checks: &[ReadinessCheck], observed: &Value) -> Result<bool, ReadinessError> {
    if checks.is_empty() {
        return Ok(default_ready(observed));
    }
    for check in checks {
        if !evaluate_one(check, observed)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn default_ready(observed: &Value) -> bool {
    let Some(conditions) = observed.pointer("/status/conditions").and_then(Value::as_array) else {
        return false;
    };
    conditions.iter().any(|c| {
        c.get("type").and_then(Value::as_str) == Some("Ready")
            && c.get("status").and_then(Value::as_str) == Some("True")
    })
}

fn evaluate_one(check: &ReadinessCheck, observed: &Value) -> Result<bool, ReadinessError> {
    Ok(match check {
        ReadinessCheck::None => true,
        ReadinessCheck::NonEmpty { field_path } => {
            let path = FieldPath::parse(field_path)?;
            path.get(observed).into_iter().any(|v| !is_empty(v))
        }
        ReadinessCheck::MatchString {
            field_path,
            match_string,
        } => {
            let path = FieldPath::parse(field_path)?;
            path.get(observed)
                .into_iter()
                .any(|v| v.as_str() == Some(match_string.as_str()))
        }
        ReadinessCheck::MatchInteger {
            field_path,
            match_integer,
        } => {
            let path = FieldPath::parse(field_path)?;
            path.get(observed).into_iter().any(|v| v.as_i64() == Some(*match_integer))
        }
        ReadinessCheck::MatchTrue { field_path } => {
            let path = FieldPath::parse(field_path)?;
            path.get(observed).into_iter().any(|v| v.as_bool() == Some(true))
        }
        ReadinessCheck::MatchFalse { field_path } => {
            let path = FieldPath::parse(field_path)?;
            path.get(observed).into_iter().any(|v| v.as_bool() == Some(false))
        }
        ReadinessCheck::MatchCondition { match_condition } => {
            let conditions = observed
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some(match_condition.type_.as_str())
                    && c.get("status").and_then(Value::as_str) == Some(match_condition.status.as_str())
            })
        }
    })
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
