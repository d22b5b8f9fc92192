//! Admission decision and patch construction
//!
//! ```text
//! body ─▶ decode ─▶ kind filter ─▶ parse object ─▶ tombstone check ─▶ patch ─▶ response
//!          │                        │
//!          └ Error::Decode          └ Error::ObjectParse
//!
//! A DELETE without an object is allowed before parsing.
//! ```
//!
//! Every request that gets past parsing is allowed; the only thing the engine
//! decides is which `add` operations go into the patch.

mod object;
mod patch;
mod review;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

pub use json_patch::{Patch, PatchOperation};
pub use object::KubeObject;
pub use patch::escape_json_pointer;
pub use review::{
    ADMISSION_API_VERSION, ADMISSION_REVIEW_KIND, AdmissionRequest, AdmissionResponse,
    AdmissionReview, GroupVersionKind, GroupVersionResource, Operation, PatchType,
};

use crate::snapshot::{ConfigSnapshot, SnapshotProvider};
use crate::{Error, Result};

/// The only kind that is mutated
pub const TARGET_KIND: &str = "Kustomization";

const POST_BUILD: [&str; 2] = ["spec", "postBuild"];
const SUBSTITUTE: [&str; 3] = ["spec", "postBuild", "substitute"];

/// Decoded review plus the envelope version to answer with
#[derive(Debug, Clone)]
pub struct DecodedReview {
    /// `apiVersion` of the incoming envelope
    pub api_version: String,
    /// The admission request
    pub request: AdmissionRequest,
}

/// Turns admission requests into verdicts using the current snapshot
#[derive(Clone)]
pub struct MutationEngine {
    snapshot: Arc<dyn SnapshotProvider>,
}

impl MutationEngine {
    /// Engine reading variables from `snapshot`
    #[must_use]
    pub fn new(snapshot: Arc<dyn SnapshotProvider>) -> Self {
        Self { snapshot }
    }

    /// Decode a raw `AdmissionReview` body.
    ///
    /// A review without a `request` is malformed.
    pub fn decode(body: &[u8]) -> Result<DecodedReview> {
        let review: AdmissionReview =
            serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;
        let request = review
            .request
            .ok_or_else(|| Error::Decode("admission review has no request".into()))?;
        Ok(DecodedReview {
            api_version: review.api_version,
            request,
        })
    }

    /// Decide on one request.
    ///
    /// Non-target kinds and objects being deleted are allowed untouched.
    pub fn admit(&self, request: &AdmissionRequest) -> Result<AdmissionResponse> {
        info!(
            uid = %request.uid,
            kind = %request.kind.kind,
            resource = %request.resource.resource,
            name = %request.name,
            namespace = %request.namespace,
            operation = %request.operation,
            "Admission request"
        );

        if request.kind.kind != TARGET_KIND {
            debug!(uid = %request.uid, kind = %request.kind.kind, "Not a target kind, allowing unchanged");
            return Ok(AdmissionResponse::allow(&request.uid));
        }

        let is_delete = request.operation == Operation::Delete;

        // The API server sends DELETE with a null object
        if is_delete && request.object.as_ref().is_none_or(Value::is_null) {
            debug!(uid = %request.uid, "Delete without object, skipping mutation");
            return Ok(AdmissionResponse::allow(&request.uid));
        }

        let object = KubeObject::parse(request.object.as_ref())?;
        if is_delete || object.is_terminating() {
            debug!(uid = %request.uid, "Object is being deleted, skipping mutation");
            return Ok(AdmissionResponse::allow(&request.uid));
        }

        let snapshot = self.snapshot.current();
        let ops = build_patch(&object, &snapshot);
        debug!(uid = %request.uid, patch_ops = ops.len(), "Generated patch");

        Ok(AdmissionResponse::allow(&request.uid).with_patch(Patch(ops)))
    }

    /// Decode, decide, and wrap the verdict in a reply envelope
    pub fn review(&self, body: &[u8]) -> Result<AdmissionReview> {
        let decoded = Self::decode(body)?;
        let response = self.admit(&decoded.request)?;
        Ok(AdmissionReview::reply(&decoded.api_version, response))
    }
}

impl std::fmt::Debug for MutationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationEngine")
            .field("variables", &self.snapshot.current().len())
            .finish()
    }
}

/// `add` operations that make every snapshot variable available under
/// `spec.postBuild.substitute`, creating the parents when missing.
///
/// Keys are emitted in sorted order, so the same object and snapshot always
/// yield the same patch.
#[must_use]
pub fn build_patch(object: &KubeObject, snapshot: &ConfigSnapshot) -> Vec<PatchOperation> {
    let mut ops = Vec::with_capacity(snapshot.len() + 2);

    if object.nested_map(&POST_BUILD).is_none() {
        ops.push(patch::add(POST_BUILD, Value::Object(Default::default())));
    }
    if object.nested_map(&SUBSTITUTE).is_none() {
        ops.push(patch::add(SUBSTITUTE, Value::Object(Default::default())));
    }

    for (key, value) in snapshot.iter() {
        ops.push(patch::add(
            SUBSTITUTE.into_iter().chain([key]),
            Value::String(value.to_owned()),
        ));
    }

    ops
}
