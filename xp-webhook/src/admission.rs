//! The admission hook (§4.H.2): intercepts DELETE of any object,
//! consults the `UsageIndex`, and either allows the request or denies
//! it with 409 after recording a deletion-attempt annotation so a
//! controller can replay the deletion later.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use serde_json::{json, Value};
use tracing::{error, warn};

use xp_types::usage::DELETION_ATTEMPT_ANNOTATION;

use crate::index::UsageIndex;

pub const FIELD_MANAGER: &str = "xp-usage-webhook";

#[derive(Clone)]
pub struct AdmissionState {
    pub client: kube::Client,
    pub index: Arc<UsageIndex>,
}

pub fn router(state: AdmissionState) -> Router {
    Router::new()
        .route("/validate-no-usages", post(validate))
        .route("/convert", post(convert))
        .with_state(state)
}

async fn validate(State(state): State<AdmissionState>, Json(review): Json<Value>) -> Json<Value> {
    let uid = review["request"]["uid"].as_str().unwrap_or_default().to_string();
    match handle(&state, &review["request"]).await {
        Ok(Verdict::Allowed) => Json(allowed_response(&uid)),
        Ok(Verdict::Denied { message }) => Json(denied_response(&uid, 409, &message)),
        Ok(Verdict::Rejected { message }) => Json(denied_response(&uid, 400, &message)),
        Err(err) => {
            error!(error = %err, "admission hook failed");
            Json(denied_response(&uid, 500, &err.to_string()))
        }
    }
}

/// `ConversionReview` handler (§6). The Usage framework declares only one
/// CRD version per kind, so there's never an actual conversion to do —
/// this passes every object through unchanged and reports success.
async fn convert(Json(review): Json<Value>) -> Json<Value> {
    let request = &review["request"];
    let uid = request["uid"].as_str().unwrap_or_default().to_string();
    let converted_objects = request["objects"].as_array().cloned().unwrap_or_default();
    Json(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "ConversionReview",
        "response": {
            "uid": uid,
            "result": { "status": "Success" },
            "convertedObjects": converted_objects,
        },
    }))
}

enum Verdict {
    Allowed,
    Denied { message: String },
    Rejected { message: String },
}

async fn handle(state: &AdmissionState, request: &Value) -> Result<Verdict, AdmissionError> {
    let operation = request["operation"].as_str().unwrap_or_default();
    if operation != "DELETE" {
        return Ok(Verdict::Rejected {
            message: format!("{operation} is not handled by the usage admission hook; only DELETE is intercepted"),
        });
    }

    let old_object = &request["oldObject"];
    let api_version = old_object["apiVersion"].as_str().unwrap_or_default();
    let kind = old_object["kind"].as_str().unwrap_or_default();
    let name = old_object["metadata"]["name"].as_str().unwrap_or_default();
    let namespace = old_object["metadata"]["namespace"].as_str();

    let blockers = state.index.blockers(api_version, kind, name).await;
    let Some(first) = blockers.first() else {
        return Ok(Verdict::Allowed);
    };

    if let Err(err) = annotate_deletion_attempt(state, api_version, kind, name, namespace, first.replay_deletion).await {
        warn!(error = %err, object = %name, "failed to annotate blocked deletion attempt");
        return Err(err);
    }

    Ok(Verdict::Denied {
        message: format!("deletion blocked: {}", first.describe()),
    })
}

async fn annotate_deletion_attempt(
    state: &AdmissionState,
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
    replay_deletion: bool,
) -> Result<(), AdmissionError> {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let resource = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(state.client.clone(), ns, &resource),
        None => Api::all_with(state.client.clone(), &resource),
    };

    let current = api.get(name).await?;
    let already_annotated = current
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(DELETION_ATTEMPT_ANNOTATION));
    if already_annotated {
        return Ok(());
    }

    let patch = json!({
        "metadata": {
            "annotations": {
                DELETION_ATTEMPT_ANNOTATION: if replay_deletion { "Replay" } else { "Block" },
            }
        }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch)).await?;
    Ok(())
}

fn allowed_response(uid: &str) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": { "uid": uid, "allowed": true },
    })
}

fn denied_response(uid: &str, code: u16, message: &str) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "response": {
            "uid": uid,
            "allowed": false,
            "status": { "code": code, "message": message },
        },
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_response_has_no_status() {
        let v = allowed_response("abc");
        assert_eq!(v["response"]["allowed"], true);
        assert!(v["response"].get("status").is_none());
    }

    #[test]
    fn denied_response_carries_code_and_message() {
        let v = denied_response("abc", 409, "nope");
        assert_eq!(v["response"]["status"]["code"], 409);
        assert_eq!(v["response"]["status"]["message"], "nope");
    }
}
