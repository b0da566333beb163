//! Transform chain evaluation (§4.B step 2).

use base64::Engine;
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use xp_types::composition::{ConvertType, MatchPatternKind, StringConversion, StringTransformOp, Transform, TrimType};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("Match transform found no matching pattern and no fallback value")]
    NoMatch,
    #[error("invalid regexp pattern {0:?}")]
    InvalidRegexp(String),
    #[error("regexp {pattern:?} did not match input {input:?}")]
    RegexpNoMatch { pattern: String, input: String },
    #[error("cannot apply {transform} transform to non-{expected} value")]
    WrongInputType {
        transform: &'static str,
        expected: &'static str,
    },
    #[error("failed to convert value to {0:?}")]
    ConvertFailed(String),
}

/// Apply a single transform to `input`, returning the transformed value.
pub fn apply(transform: &Transform, input: &Value) -> Result<Value, TransformError> {
    match transform {
        Transform::Map { pairs } => {
            let key = value_as_map_key(input)?;
            pairs
                .get(&key)
                .cloned()
                .ok_or_else(|| TransformError::NoMatch)
        }
        Transform::Match {
            patterns,
            fallback_value,
        } => apply_match(patterns, fallback_value.as_ref(), input),
        Transform::Math {
            multiply,
            clamp_min,
            clamp_max,
        } => apply_math(*multiply, *clamp_min, *clamp_max, input),
        Transform::String { op } => apply_string(op, input),
        Transform::Convert { to_type } => apply_convert(*to_type, input),
    }
}

/// Run the full chain in declared order, short-circuiting on the first
/// error (§4.B: "Transforms that fail ... propagated as PatchError").
pub fn apply_chain(chain: &[Transform], input: Value) -> Result<Value, TransformError> {
    chain.iter().try_fold(input, |value, t| apply(t, &value))
}

fn value_as_map_key(input: &Value) -> Result<String, TransformError> {
    match input {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(TransformError::WrongInputType {
            transform: "Map",
            expected: "scalar",
        }),
    }
}

fn apply_match(
    patterns: &[xp_types::composition::MatchPattern],
    fallback: Option<&Value>,
    input: &Value,
) -> Result<Value, TransformError> {
    let as_str = input.as_str().map(str::to_string).unwrap_or_else(|| input.to_string());
    for pattern in patterns {
        let matched = match &pattern.kind {
            MatchPatternKind::Literal { literal } => literal == &as_str,
            MatchPatternKind::Regexp { regexp } => {
                let re = regex::Regex::new(regexp)
                    .map_err(|_| TransformError::InvalidRegexp(regexp.clone()))?;
                re.is_match(&as_str)
            }
        };
        if matched {
            return Ok(pattern.result.clone());
        }
    }
    fallback.cloned().ok_or(TransformError::NoMatch)
}

fn apply_math(
    multiply: Option<f64>,
    clamp_min: Option<f64>,
    clamp_max: Option<f64>,
    input: &Value,
) -> Result<Value, TransformError> {
    let mut n = input.as_f64().ok_or(TransformError::WrongInputType {
        transform: "Math",
        expected: "number",
    })?;
    if let Some(m) = multiply {
        n *= m;
    }
    if let Some(min) = clamp_min {
        n = n.max(min);
    }
    if let Some(max) = clamp_max {
        n = n.min(max);
    }
    Ok(serde_json::json!(n))
}

fn apply_string(op: &StringTransformOp, input: &Value) -> Result<Value, TransformError> {
    let s = input
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| input.to_string());
    let out = match op {
        StringTransformOp::Format { fmt } => fmt.replacen("%s", &s, 1),
        StringTransformOp::Convert { convert } => apply_string_conversion(*convert, &s)?,
        StringTransformOp::Trim { trim, suffix } => match trim {
            TrimType::Prefix => s.strip_prefix(suffix.as_str()).unwrap_or(&s).to_string(),
            TrimType::Suffix => s.strip_suffix(suffix.as_str()).unwrap_or(&s).to_string(),
        },
        StringTransformOp::Regexp { regexp } => apply_regexp(regexp, &s)?,
    };
    Ok(Value::String(out))
}

fn apply_regexp(
    regexp: &xp_types::composition::RegexpTransform,
    input: &str,
) -> Result<String, TransformError> {
    let re = regex::Regex::new(&regexp.pattern)
        .map_err(|_| TransformError::InvalidRegexp(regexp.pattern.clone()))?;
    let caps = re
        .captures(input)
        .ok_or_else(|| TransformError::RegexpNoMatch {
            pattern: regexp.pattern.clone(),
            input: input.to_string(),
        })?;
    let group = regexp.group.unwrap_or(0) as usize;
    Ok(caps
        .get(group)
        .ok_or_else(|| TransformError::RegexpNoMatch {
            pattern: regexp.pattern.clone(),
            input: input.to_string(),
        })?
        .as_str()
        .to_string())
}

fn apply_string_conversion(convert: StringConversion, s: &str) -> Result<String, TransformError> {
    Ok(match convert {
        StringConversion::ToUpper => s.to_uppercase(),
        StringConversion::ToLower => s.to_lowercase(),
        StringConversion::ToBase64 => base64::engine::general_purpose::STANDARD.encode(s),
        StringConversion::FromBase64 => String::from_utf8(
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|_| TransformError::ConvertFailed("FromBase64".into()))?,
        )
        .map_err(|_| TransformError::ConvertFailed("FromBase64".into()))?,
        StringConversion::ToJson => serde_json::to_string(s)
            .map_err(|_| TransformError::ConvertFailed("ToJson".into()))?,
        StringConversion::ToSha1 => hex::encode(Sha1::digest(s.as_bytes())),
        StringConversion::ToSha256 => hex::encode(Sha256::digest(s.as_bytes())),
        StringConversion::ToSha512 => hex::encode(Sha512::digest(s.as_bytes())),
        StringConversion::ToAdler32 => adler32(s.as_bytes()).to_string(),
    })
}

fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let (mut a, mut b) = (1u32, 0u32);
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

fn apply_convert(to_type: ConvertType, input: &Value) -> Result<Value, TransformError> {
    Ok(match to_type {
        ConvertType::String => Value::String(match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        ConvertType::Int | ConvertType::Int64 => {
            let n = input
                .as_i64()
                .or_else(|| input.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| TransformError::ConvertFailed("Int".into()))?;
            serde_json::json!(n)
        }
        ConvertType::Float64 => {
            let n = input
                .as_f64()
                .or_else(|| input.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| TransformError::ConvertFailed("Float64".into()))?;
            serde_json::json!(n)
        }
        ConvertType::Bool => {
            let b = input
                .as_bool()
                .or_else(|| input.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| TransformError::ConvertFailed("Bool".into()))?;
            Value::Bool(b)
        }
        ConvertType::Object => {
            if input.is_object() {
                input.clone()
            } else {
                return Err(TransformError::ConvertFailed("Object".into()));
            }
        }
        ConvertType::Array => {
            if input.is_array() {
                input.clone()
            } else {
                return Err(TransformError::ConvertFailed("Array".into()));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xp_types::composition::{MatchPattern, RegexpTransform};

    #[test]
    fn map_transform_looks_up_by_scalar_key() {
        let t = Transform::Map {
            pairs: std::collections::BTreeMap::from([("small".to_string(), json!(1))]),
        };
        assert_eq!(apply(&t, &json!("small")).unwrap(), json!(1));
        assert!(apply(&t, &json!("large")).is_err());
    }

    #[test]
    fn match_transform_falls_back_when_nothing_matches() {
        let t = Transform::Match {
            patterns: vec![MatchPattern {
                kind: MatchPatternKind::Literal {
                    literal: "a".into(),
                },
                result: json!("A"),
            }],
            fallback_value: Some(json!("other")),
        };
        assert_eq!(apply(&t, &json!("b")).unwrap(), json!("other"));
    }

    #[test]
    fn match_transform_with_no_fallback_is_an_error() {
        let t = Transform::Match {
            patterns: vec![],
            fallback_value: None,
        };
        assert_eq!(apply(&t, &json!("x")).unwrap_err(), TransformError::NoMatch);
    }

    #[test]
    fn math_transform_multiplies_and_clamps() {
        let t = Transform::Math {
            multiply: Some(2.0),
            clamp_min: None,
            clamp_max: Some(5.0),
        };
        assert_eq!(apply(&t, &json!(10)).unwrap(), json!(5.0));
    }

    #[test]
    fn string_regexp_extracts_capture_group() {
        let t = Transform::String {
            op: StringTransformOp::Regexp {
                regexp: RegexpTransform {
                    pattern: r"^(\w+)-(\d+)$".into(),
                    group: Some(2),
                },
            },
        };
        assert_eq!(apply(&t, &json!("db-42")).unwrap(), json!("42"));
    }

    #[test]
    fn string_trim_suffix() {
        let t = Transform::String {
            op: StringTransformOp::Trim {
                trim: TrimType::Suffix,
                suffix: "-tmp".into(),
            },
        };
        assert_eq!(apply(&t, &json!("bucket-tmp")).unwrap(), json!("bucket"));
    }

    #[test]
    fn chain_runs_in_order_and_short_circuits() {
        let chain = vec![
            Transform::String {
                op: StringTransformOp::Convert {
                    convert: StringConversion::ToUpper,
                },
            },
            Transform::Match {
                patterns: vec![MatchPattern {
                    kind: MatchPatternKind::Literal {
                        literal: "LARGE".into(),
                    },
                    result: json!("L"),
                }],
                fallback_value: None,
            },
        ];
        assert_eq!(apply_chain(&chain, json!("large")).unwrap(), json!("L"));
        assert!(apply_chain(&chain, json!("small")).is_err());
    }
}
