//! Namespaced cache keys.
//!
//! Every key encodes a logical domain, a version, and discriminating
//! parameters. Bumping the version segment invalidates without deletes:
//! old entries are simply never asked for again and expire on their TTL.

use sha2::{Digest, Sha256};

/// Key for a schema snapshot: `schema:<database>:v<version>`.
pub fn schema_key(database: &str, version: u64) -> String {
    format!("schema:{}:v{}", database, version)
}

/// Key for an introspection report: `introspection:v<version>:size:<n>`.
pub fn introspection_key(version: u64, sample_size: usize) -> String {
    format!("introspection:v{}:size:{}", version, sample_size)
}

/// Key for a generated plan: `plan:v<version>:<category>:<digest>`.
pub fn plan_key(version: u64, category: &str, digest: &str) -> String {
    format!("plan:v{}:{}:{}", version, category, digest)
}

/// Stable 16-hex-char digest over ordered parts.
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hash = hex::encode(hasher.finalize());
    hash[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(schema_key("neo4j", 3), "schema:neo4j:v3");
        assert_eq!(introspection_key(2, 200), "introspection:v2:size:200");
        assert_eq!(plan_key(1, "analytical", "abc"), "plan:v1:analytical:abc");
    }

    #[test]
    fn test_version_changes_key() {
        assert_ne!(schema_key("neo4j", 1), schema_key("neo4j", 2));
        assert_ne!(introspection_key(1, 100), introspection_key(1, 200));
    }

    #[test]
    fn test_digest_is_stable_and_boundary_safe() {
        assert_eq!(digest(&["a", "b"]), digest(&["a", "b"]));
        assert_ne!(digest(&["ab", "c"]), digest(&["a", "bc"]));
        assert_eq!(digest(&["x"]).len(), 16);
    }
}
