//! Content digests for change detection.

use serde::Serialize;

use crate::errors::Result;

/// Stable md5 hex digest over the canonical JSON form of a payload.
///
/// Used to decide whether a fetched payload actually changed since the
/// last successful update. Not a security boundary.
pub fn content_digest<T: Serialize>(payload: &T) -> Result<String> {
    let canonical = serde_json::to_string(payload)?;
    Ok(format!("{:x}", md5::compute(canonical.as_bytes())))
}
