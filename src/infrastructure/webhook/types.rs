//! Wire shapes for the Kubernetes `admission.k8s.io/v1` `AdmissionReview`
//! contract (SPEC_FULL.md §4.12). Kept as plain serde structs over
//! `serde_json::Value` rather than pulling in `kube`'s own admission
//! types, since the handlers only ever round-trip the `request`/`response`
//! envelope and never construct the rest of the Kubernetes object model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionReviewRequest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub request: AdmissionRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub object: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionReviewResponse {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "patchType")]
    pub patch_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatus {
    pub message: String,
}

impl AdmissionReviewResponse {
    pub fn allow(uid: String) -> Self {
        Self {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            response: AdmissionResponse { uid, allowed: true, status: None, patch_type: None, patch: None },
        }
    }

    pub fn deny(uid: String, message: String) -> Self {
        Self {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            response: AdmissionResponse {
                uid,
                allowed: false,
                status: Some(AdmissionStatus { message }),
                patch_type: None,
                patch: None,
            },
        }
    }

    /// An allow response carrying a base64-encoded RFC 6902 JSON Patch
    /// (`patchType: JSONPatch`, the only type the API server accepts).
    pub fn patch(uid: String, patch: &Value) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(patch.to_string());
        Self {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            response: AdmissionResponse {
                uid,
                allowed: true,
                status: None,
                patch_type: Some("JSONPatch"),
                patch: Some(encoded),
            },
        }
    }
}
