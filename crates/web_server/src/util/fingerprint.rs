//! Change detection for generated objects.
//!
//! A fingerprint is a SHA-256 digest of the canonical JSON form of the tracked
//! fields, base64url encoded and wrapped in `A` sentinels so the result is a valid
//! label value (alphanumeric at both ends, 45 characters).

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::api::v1alpha1::webserver::{WebServer, WebServerSpec};
use crate::resources::passthrough_labels;
use crate::util::errors::{Error, Result, StdError};

const SENTINEL: char = 'A';

#[derive(Serialize)]
struct Tracked<'a> {
    spec: &'a WebServerSpec,
    // BTreeMap serializes in key order, which makes the digest insensitive to label insertion order.
    labels: BTreeMap<String, String>,
}

/// Fingerprint of everything in the desired state that is rolled out by updating objects.
///
/// Replica count is excluded: scaling is compared separately and must not cause a rollout.
pub fn fingerprint(web_server: &WebServer) -> Result<String> {
    let mut spec = web_server.spec.clone();
    spec.replicas = 0;
    digest(&Tracked {
        spec: &spec,
        labels: passthrough_labels(web_server),
    })
}

/// Label-safe digest of any serializable value.
pub fn digest<T: Serialize>(value: &T) -> Result<String> {
    let canonical =
        serde_json::to_vec(value).map_err(|e| Error::StdError(StdError::JsonSerializationError(e)))?;
    let hash = Sha256::digest(&canonical);
    Ok(format!("{SENTINEL}{}{SENTINEL}", URL_SAFE_NO_PAD.encode(hash)))
}
