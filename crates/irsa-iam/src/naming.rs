//! Deterministic names for IAM roles and policies
//!
//! Names read as `<namespace>-<name>-<hash>`. The readable part is truncated
//! to fit the IAM limit, the hash keeps names apart across namespaces,
//! clusters and recreated objects (through the UID prefix).

use aws_lc_rs::digest;

/// IAM role names are limited to 64 characters
pub const MAX_RESOURCE_NAME_LEN: usize = 64;

/// Hex characters of the digest appended to every name
const HASH_LEN: usize = 16;

/// Derive the IAM role/policy name for a ServiceAccount.
///
/// # Arguments
///
/// * `name` - ServiceAccount (and IamRole) name
/// * `namespace` - namespace of the IamRole
/// * `cluster` - installation discriminator, distinct per cluster sharing an account
/// * `uid_prefix` - leading characters of the IamRole UID
pub fn generate_resource_name(
    name: &str,
    namespace: &str,
    cluster: &str,
    uid_prefix: &str,
) -> String {
    // NUL cannot appear in any component, so the joined input is unambiguous
    let hash = deterministic_hash(&[cluster, namespace, name, uid_prefix].join("\0"));

    let readable_len = MAX_RESOURCE_NAME_LEN - HASH_LEN - 1;
    let mut readable: String = sanitize(&format!("{}-{}", namespace, name))
        .chars()
        .take(readable_len)
        .collect();
    while readable.ends_with('-') {
        readable.pop();
    }

    if readable.is_empty() {
        hash
    } else {
        format!("{}-{}", readable, hash)
    }
}

/// Keep only characters IAM accepts in role and policy names
fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@_-".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Truncated SHA-256 of the input as lowercase hex
fn deterministic_hash(input: &str) -> String {
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..HASH_LEN / 2]
        .iter()
        .fold(String::with_capacity(HASH_LEN), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
