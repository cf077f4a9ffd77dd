//! Slug identifiers for tasks and task groups.
//!
//! Task and task-group identifiers are URL-safe base64 encodings of a
//! 128-bit value with UUIDv4 version and variant bits forced, always 22
//! characters. The forced bits show up in the regex as the constrained
//! character classes at positions 8, 10 and 21.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

/// Task and task-group identifier pattern.
pub static SLUG_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{8}[Q-T][A-Za-z0-9_-][CGKOSWaeimquy26-][A-Za-z0-9_-]{10}[AQgw]$")
        .expect("slug id pattern is valid")
});

/// Generic identifier pattern: provisionerId, workerType, workerGroup,
/// workerId, schedulerId.
pub static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-_]{1,38}$").expect("identifier pattern is valid"));

/// Artifact names are printable ASCII.
pub static ARTIFACT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x20-\x7e]+$").expect("artifact name pattern is valid"));

/// Generate a fresh slug id.
///
/// Encodes a random UUIDv4 as unpadded URL-safe base64; the version and
/// variant bits of the UUID guarantee the result matches
/// [`SLUG_ID_PATTERN`].
pub fn generate_slug_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

pub fn is_valid_slug_id(id: &str) -> bool {
    SLUG_ID_PATTERN.is_match(id)
}

pub fn is_valid_identifier(id: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(id)
}

pub fn is_valid_artifact_name(name: &str) -> bool {
    ARTIFACT_NAME_PATTERN.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_slugs_match_the_pattern() {
        for _ in 0..256 {
            let slug = generate_slug_id();
            assert_eq!(slug.len(), 22);
            assert!(is_valid_slug_id(&slug), "generated slug {slug} rejected");
        }
    }

    #[test]
    fn malformed_slugs_are_rejected() {
        assert!(!is_valid_slug_id(""));
        assert!(!is_valid_slug_id("too-short"));
        assert!(!is_valid_slug_id("0123456789abcdefghijkl")); // no forced bits
        assert!(!is_valid_slug_id("has/slash9QaC0123456789A"));
    }

    #[test]
    fn identifiers_cap_at_38_chars() {
        assert!(is_valid_identifier("aws-provisioner-v1"));
        assert!(is_valid_identifier("a"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"x".repeat(39)));
        assert!(!is_valid_identifier("no spaces"));
    }

    #[test]
    fn artifact_names_are_printable_ascii() {
        assert!(is_valid_artifact_name("public/build/target.tar.gz"));
        assert!(!is_valid_artifact_name("tab\there"));
        assert!(!is_valid_artifact_name(""));
    }
}
