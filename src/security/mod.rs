//! Security primitives: rate limiting and token digests.

pub mod rate_limit;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Digest compared against when a webhook id does not resolve, so missing
/// and present ids cost the same hash-and-compare. No real token digests to
/// the all-zero string.
pub const DUMMY_TOKEN_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Hex SHA-256 digest of a secret token, the only form the store keeps.
pub fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time comparison of a presented token against a stored digest.
pub fn token_matches(presented: &str, stored_digest: &str) -> bool {
    let presented_digest = token_digest(presented);
    presented_digest
        .as_bytes()
        .ct_eq(stored_digest.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_round_trip() {
        let token = "deadbeef".repeat(8);
        let digest = token_digest(&token);
        assert_eq!(digest.len(), 64);
        assert!(token_matches(&token, &digest));
        assert!(!token_matches("wrong", &digest));
    }

    #[test]
    fn dummy_digest_never_matches() {
        assert_eq!(DUMMY_TOKEN_DIGEST.len(), 64);
        for token in ["", "0", &"deadbeef".repeat(8)] {
            assert!(!token_matches(token, DUMMY_TOKEN_DIGEST));
        }
    }
}
