//! Client-side idempotency keys.

use rand::RngCore;

/// Mint a 128-bit random id as 32 lowercase hex characters.
///
/// Used for `clientOrderId`, `clientTransferId` and withdrawal ids. A key is
/// minted exactly once per state entry and persisted before the first
/// request that carries it, so retries of the same state replay the same
/// key and the venue deduplicates.
pub fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_uniqueness() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }
}
