//! UUID identifiers that replace integer surrogate keys.

use serde::Serialize;
use std::fmt;
use uuid::{Uuid, Variant};

/// A canonical hyphenated UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Parse a string, accepting only canonical UUID syntax.
    pub fn parse(candidate: &str) -> Option<Self> {
        is_valid_identifier(candidate).then(|| Identifier(candidate.to_ascii_lowercase()))
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Identifier(uuid.hyphenated().to_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `candidate` is a hyphenated RFC 4122 UUID (versions 1-5).
///
/// Hex digits may be either case; braced, URN and unhyphenated forms are
/// rejected.
pub fn is_valid_identifier(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != 36 || [8, 13, 18, 23].iter().any(|&i| bytes[i] != b'-') {
        return false;
    }
    match Uuid::try_parse(candidate) {
        Ok(uuid) => {
            uuid.get_variant() == Variant::RFC4122 && matches!(uuid.get_version_num(), 1..=5)
        }
        Err(_) => false,
    }
}

/// Source of fresh identifiers.
pub trait IdGenerator {
    /// Produce a new random identifier.
    fn new_identifier(&self) -> Identifier;

    /// Validate identifier syntax.
    fn is_valid_identifier(&self, candidate: &str) -> bool {
        is_valid_identifier(candidate)
    }
}

/// Random version 4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn new_identifier(&self) -> Identifier {
        Identifier::from(Uuid::new_v4())
    }
}

impl<G: IdGenerator + ?Sized> IdGenerator for &G {
    fn new_identifier(&self) -> Identifier {
        (**self).new_identifier()
    }

    fn is_valid_identifier(&self, candidate: &str) -> bool {
        (**self).is_valid_identifier(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_identifiers_are_valid_and_unique() {
        let generator = UuidV4Generator;
        let ids: HashSet<_> = (0..1000).map(|_| generator.new_identifier()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| generator.is_valid_identifier(id.as_str())));
    }

    #[test]
    fn test_accepts_canonical_forms() {
        assert!(is_valid_identifier("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_identifier("550E8400-E29B-41D4-A716-446655440000"));
    }

    #[test]
    fn test_rejects_non_canonical_forms() {
        for bad in [
            "",
            "42",
            "550e8400e29b41d4a716446655440000",
            "{550e8400-e29b-41d4-a716-446655440000}",
            "urn:uuid:550e8400-e29b-41d4-a716-446655440000",
            "550e8400-e29b-41d4-a716-44665544000g",
            "550e8400-e29b-01d4-a716-446655440000",
            "550e8400-e29b-41d4-c716-446655440000",
            "550e8400-e29b41d4--a716-446655440000",
        ] {
            assert!(!is_valid_identifier(bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_parse_normalizes_case() {
        let id = Identifier::parse("550E8400-E29B-41D4-A716-446655440000").unwrap();
        assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
        assert!(Identifier::parse("7").is_none());
    }
}
