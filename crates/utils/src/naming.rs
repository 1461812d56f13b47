//! Deterministic, DNS safe resource names
//!
//! Claims and host jobs are named from the same inputs so that a job can
//! always be traced back to the claim that triggered it.

use sha2::Digest;
use sha2::Sha256;

/// Longest name allowed for a DNS-1123 label.
pub const MAX_NAME_LENGTH: usize = 63;

const HASH_LENGTH: usize = 16;

/// Renders `<prefix>-<hash>` where the hash is taken over `name/namespace`.
///
/// The prefix is lowercased, characters outside `[a-z0-9-]` become `-` and
/// it is truncated so the whole name fits into [`MAX_NAME_LENGTH`]. The same
/// inputs always yield the same name.
pub fn render_resource_name(prefix: &str, name: &str, namespace: &str) -> String {
    let digest = Sha256::digest(format!("{name}/{namespace}").as_bytes());
    let hash = &hex::encode(digest)[..HASH_LENGTH];

    let mut prefix = sanitize(prefix);
    prefix.truncate(MAX_NAME_LENGTH - HASH_LENGTH - 1);
    let prefix = prefix.trim_matches('-');

    if prefix.is_empty() {
        return hash.to_string();
    }

    format!("{prefix}-{hash}")
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '-') => c,
            _ => '-',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn same_inputs_same_name() {
        assert_eq!(
            render_resource_name("ebs.csi.aws.com", "logs", "default"),
            render_resource_name("ebs.csi.aws.com", "logs", "default")
        );
    }

    #[test]
    fn namespace_changes_name() {
        assert_ne!(
            render_resource_name("ebs", "logs", "default"),
            render_resource_name("ebs", "logs", "prod")
        );
    }

    #[test]
    fn prefix_is_dns_safe() {
        let name = render_resource_name("ebs.csi.aws.com", "logs", "default");

        assert!(name.starts_with("ebs-csi-aws-com-"), "got {name}");
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn long_prefix_is_truncated() {
        let prefix = "x".repeat(100);
        let name = render_resource_name(&prefix, "logs", "default");

        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.ends_with(&render_resource_name("", "logs", "default")));
    }

    #[test]
    fn empty_prefix_yields_bare_hash() {
        assert_eq!(render_resource_name("", "logs", "default").len(), HASH_LENGTH);
    }
}
