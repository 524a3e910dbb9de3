//! The vendor's per-request signature.
//!
//! Every API call carries `device-time`, `sign`, and `sign-ver` headers.
//! The signature is an MD5 over a fixed-layout string: a constant salt,
//! the last seven characters of the request path, the platform and version
//! codes, the device time, and a trailing constant. The layout must match
//! the vendor byte-for-byte or the call is rejected.

use md5::{Digest, Md5};

use crate::config::{PLATFORM_CODE, VERSION_CODE};

const SIGN_PREFIX: &str = "9e2c";
const SIGN_SUFFIX: &str = "11ac";

/// Compute the `sign` header value for a request path at a device time.
pub fn api_signature(path: &str, device_time: i64) -> String {
    let tail = path_tail(path);
    let payload = format!(
        "{SIGN_PREFIX}|{tail}|{PLATFORM_CODE}|{VERSION_CODE}|{device_time}||{SIGN_SUFFIX}"
    );
    let digest = Md5::digest(payload.as_bytes());
    format!("{digest:x}")
}

/// Last seven characters of the path, or the whole path when shorter.
fn path_tail(path: &str) -> &str {
    let len = path.chars().count();
    if len <= 7 {
        return path;
    }
    let (idx, _) = path.char_indices().nth(len - 7).expect("index in range");
    &path[idx..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let a = api_signature("/mweb/v1/aigc_draft/generate", 1_733_966_964);
        let b = api_signature("/mweb/v1/aigc_draft/generate", 1_733_966_964);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_changes_with_any_input() {
        let base = api_signature("/mweb/v1/aigc_draft/generate", 1_733_966_964);
        assert_ne!(base, api_signature("/mweb/v1/aigc_draft/generate", 1_733_966_965));
        assert_ne!(base, api_signature("/mweb/v1/get_history_by_ids", 1_733_966_964));
    }

    #[test]
    fn only_the_path_tail_matters() {
        // Two paths sharing the final seven characters sign identically.
        let a = api_signature("/mweb/v1/aigc_draft/generate", 100);
        let b = api_signature("/other/route/generate", 100);
        assert_eq!(a, b);
    }

    #[test]
    fn short_paths_are_used_whole() {
        assert_eq!(path_tail("/credit"), "/credit");
        assert_eq!(path_tail("/a"), "/a");
        assert_eq!(path_tail("/mweb/v1/get_upload_token"), "d_token");
    }
}
