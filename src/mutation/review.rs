//! `admission.k8s.io/v1` wire types
//!
//! Only the fields this webhook reads or writes are modelled; unknown fields
//! in incoming reviews are ignored.

use json_patch::{Patch, PatchOperation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// API version used when the incoming review does not name one
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Envelope kind
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// Request/response envelope exchanged with the API server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// `admission.k8s.io/v1` (or `v1beta1`)
    #[serde(default)]
    pub api_version: String,
    /// Always `AdmissionReview`
    #[serde(default)]
    pub kind: String,
    /// Present on requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    /// Present on responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a request the way the API server sends it
    #[must_use]
    pub fn request(request: AdmissionRequest) -> Self {
        Self {
            api_version: ADMISSION_API_VERSION.to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: Some(request),
            response: None,
        }
    }

    /// Build the reply envelope, echoing the request's API version
    #[must_use]
    pub fn reply(api_version: &str, response: AdmissionResponse) -> Self {
        let api_version = if api_version.is_empty() {
            ADMISSION_API_VERSION
        } else {
            api_version
        };
        Self {
            api_version: api_version.to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

/// Group/version/kind of the object under review
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    #[allow(missing_docs)]
    pub group: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub version: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub kind: String,
}

/// Group/version/resource of the object under review
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    #[allow(missing_docs)]
    pub group: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub version: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub resource: String,
}

/// Operation being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl Operation {
    /// Wire name, also used as the metrics label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The admission request carried inside a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Unique id, echoed in the response
    #[serde(default)]
    pub uid: String,
    /// Kind of the object
    #[serde(default)]
    pub kind: GroupVersionKind,
    /// Resource being requested
    #[serde(default)]
    pub resource: GroupVersionResource,
    /// Sub-resource, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,
    /// Object name (may be empty on CREATE with generateName)
    #[serde(default)]
    pub name: String,
    /// Object namespace
    #[serde(default)]
    pub namespace: String,
    /// Operation being performed
    pub operation: Operation,
    /// The new object; absent on DELETE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    /// The existing object on UPDATE and DELETE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    /// Whether the request is a dry run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

/// Marker for the patch encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    /// RFC 6902 JSON Patch
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// Verdict returned to the API server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Copied from the request
    pub uid: String,
    /// Whether the request may proceed
    pub allowed: bool,
    /// JSON Patch to apply, serialised and base64 encoded on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_patch"
    )]
    pub patch: Option<Patch>,
    /// Set exactly when `patch` is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

impl AdmissionResponse {
    /// Allow without changes
    #[must_use]
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            patch: None,
            patch_type: None,
        }
    }

    /// Attach `patch`; an empty patch leaves the response untouched
    #[must_use]
    pub fn with_patch(mut self, patch: Patch) -> Self {
        if patch.0.is_empty() {
            return self;
        }
        self.patch = Some(patch);
        self.patch_type = Some(PatchType::JsonPatch);
        self
    }

    /// Operations of the attached patch (empty when there is none)
    #[must_use]
    pub fn patch_operations(&self) -> &[PatchOperation] {
        self.patch
            .as_ref()
            .map(|patch| patch.0.as_slice())
            .unwrap_or_default()
    }
}

/// `[]byte` fields are base64 strings in Kubernetes JSON
mod base64_patch {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use json_patch::Patch;
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(patch: &Option<Patch>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match patch {
            Some(patch) => {
                let json = serde_json::to_vec(patch).map_err(<S::Error as ser::Error>::custom)?;
                serializer.serialize_str(&STANDARD.encode(json))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Patch>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let json = STANDARD
            .decode(encoded)
            .map_err(<D::Error as de::Error>::custom)?;
        serde_json::from_slice(&json)
            .map(Some)
            .map_err(<D::Error as de::Error>::custom)
    }
}
