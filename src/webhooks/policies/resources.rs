//! Strip resource requests and limits from pods.
//!
//! Emits one `remove` operation per container for `.../resources`, primary
//! containers first, then init containers, each addressed by its index in
//! the submitted pod. The API server applies the whole patch atomically
//! against the submitted object, so the indices never shift between
//! operations.

use json_patch::jsonptr::PointerBuf;
use json_patch::{Patch, PatchOperation, RemoveOperation};
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tracing::{info, warn};

use super::AdmissionPolicy;
use crate::webhooks::review::{AdmissionRequest, AdmissionResponse, GroupVersionResource};

/// Reasons a pod cannot be mutated
#[derive(Error, Debug)]
pub enum MutationError {
    #[error("expect resource to be {expected} but got {got}")]
    UnexpectedResource {
        expected: GroupVersionResource,
        got: GroupVersionResource,
    },

    #[error("admission request carries no object")]
    MissingObject,

    #[error("deserialization failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("encoding patch failed: {0}")]
    EncodePatch(#[source] serde_json::Error),
}

/// The core `v1/pods` resource
pub fn pod_resource() -> GroupVersionResource {
    GroupVersionResource::new("", "v1", "pods")
}

/// Policy removing all container resource constraints from pods
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoveResources;

impl AdmissionPolicy for RemoveResources {
    fn name(&self) -> &'static str {
        "remove-resources"
    }

    fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse {
        match mutate(request) {
            Ok(response) => response,
            Err(e) => {
                warn!(uid = %request.uid, error = %e, "Denying admission request");
                AdmissionResponse::from(request).deny(e)
            }
        }
    }
}

fn mutate(request: &AdmissionRequest) -> Result<AdmissionResponse, MutationError> {
    let expected = pod_resource();
    if request.resource != expected {
        return Err(MutationError::UnexpectedResource {
            expected,
            got: request.resource.clone(),
        });
    }

    let object = request.object.as_ref().ok_or(MutationError::MissingObject)?;
    let pod: Pod = serde_json::from_value(object.clone()).map_err(MutationError::Decode)?;

    let patch = resource_removals(&pod);
    info!(
        uid = %request.uid,
        namespace = ?request.namespace,
        name = ?pod.metadata.name.as_ref().or(request.name.as_ref()),
        operations = patch.0.len(),
        "Mutating pod"
    );

    AdmissionResponse::from(request)
        .with_patch(&patch)
        .map_err(MutationError::EncodePatch)
}

/// Build the patch removing `resources` from every container of `pod`
pub fn resource_removals(pod: &Pod) -> Patch {
    let Some(spec) = pod.spec.as_ref() else {
        return Patch(Vec::new());
    };

    let containers = (0..spec.containers.len()).map(|i| remove_resources("containers", i));
    let init_containers = (0..spec.init_containers.as_ref().map_or(0, Vec::len))
        .map(|i| remove_resources("initContainers", i));

    Patch(containers.chain(init_containers).collect())
}

fn remove_resources(list: &str, index: usize) -> PatchOperation {
    let index = index.to_string();
    PatchOperation::Remove(RemoveOperation {
        path: PointerBuf::from_tokens(["spec", list, index.as_str(), "resources"]),
    })
}
