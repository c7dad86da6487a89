//! Admission review wire types (`admission.k8s.io/v1`).
//!
//! The embedded object is kept as raw JSON so that a policy, not the
//! envelope decoder, decides how to interpret it. A malformed pod therefore
//! produces a deny decision instead of an HTTP error.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use kube::core::TypeMeta;
use kube::core::admission::Operation;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// API version of the only accepted review envelope
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Kind of the only accepted review envelope
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Request/response envelope exchanged with the API server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionReview {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Build the reply envelope with the same apiVersion/kind as this one
    pub fn respond(&self, response: AdmissionResponse) -> AdmissionReview {
        AdmissionReview {
            types: self.types.clone(),
            request: None,
            response: Some(response),
        }
    }
}

/// Group/version/resource triple naming the target of a request
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// Group/version/kind triple of the submitted object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

/// The `request` half of a review
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Correlation identifier echoed back in the response
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<GroupVersionKind>,
    pub resource: GroupVersionResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Raw object being admitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<serde_json::Value>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Result attached to a denial
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

/// Patch encoding understood by the API server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// The `response` half of a review
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Must equal the request uid
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
    /// Serialized patch document, base64 on the wire
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub patch: Option<Vec<u8>>,
}

impl From<&AdmissionRequest> for AdmissionResponse {
    /// An allowing response correlated with `request`
    fn from(request: &AdmissionRequest) -> Self {
        Self {
            uid: request.uid.clone(),
            allowed: true,
            status: None,
            patch_type: None,
            patch: None,
        }
    }
}

impl AdmissionResponse {
    /// Turn this response into a denial; any patch is dropped
    pub fn deny(mut self, message: impl ToString) -> Self {
        self.allowed = false;
        self.status = Some(Status {
            code: Some(403),
            message: message.to_string(),
        });
        self.patch_type = None;
        self.patch = None;
        self
    }

    /// Attach a JSON patch. An empty patch is still attached as `[]`.
    pub fn with_patch(mut self, patch: &json_patch::Patch) -> Result<Self, serde_json::Error> {
        self.patch = Some(serde_json::to_vec(patch)?);
        self.patch_type = Some(PatchType::JsonPatch);
        Ok(self)
    }

    /// Decode the attached patch, if any
    pub fn json_patch(&self) -> Option<Result<json_patch::Patch, serde_json::Error>> {
        self.patch.as_deref().map(serde_json::from_slice)
    }
}

/// Decode a request body into an admission review.
///
/// The body is first read as a bare apiVersion/kind header so that a
/// well-formed object of the wrong kind is reported as such rather than as
/// a decode failure.
pub fn decode_review(body: &[u8]) -> Result<AdmissionReview, ProtocolError> {
    let types: TypeMeta = serde_json::from_slice(body).map_err(ProtocolError::Decode)?;
    if types.kind != ADMISSION_REVIEW_KIND || types.api_version != ADMISSION_API_VERSION {
        return Err(ProtocolError::UnexpectedKind {
            api_version: types.api_version,
            kind: types.kind,
        });
    }
    serde_json::from_slice(body).map_err(ProtocolError::Decode)
}

mod base64_bytes {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(D::Error::custom))
            .transpose()
    }
}
