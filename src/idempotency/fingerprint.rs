use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Computes the request hash stored alongside a reservation.
///
/// The request is serialized to JSON and hashed with SHA-256. Field order
/// follows the type's `Serialize` impl, so two values of the same type that
/// compare equal produce the same fingerprint.
pub fn request_fingerprint<T: Serialize>(request: &T) -> Result<String> {
    let json = serde_json::to_vec(request)?;
    Ok(fingerprint_bytes(&json))
}

/// Hex-encoded SHA-256 of a raw request payload, e.g. an encoded protobuf.
pub fn fingerprint_bytes(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
