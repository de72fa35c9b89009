//! Lock identity and stripe selection (§4.5).

use tkv_types::IndexId;

/// Identity of a single lockable resource: an `(indexId, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub index: IndexId,
    pub key: Vec<u8>,
}

impl LockKey {
    #[must_use]
    pub fn new(index: IndexId, key: impl Into<Vec<u8>>) -> Self {
        Self { index, key: key.into() }
    }

    /// 32-bit hash used both for stripe selection and bucket placement
    /// within a stripe (§4.5: "top bits of the 32-bit hash of
    /// `(indexId, key)`").
    #[must_use]
    pub fn hash32(&self) -> u32 {
        let mut buf = Vec::with_capacity(8 + self.key.len());
        buf.extend_from_slice(&self.index.get().to_le_bytes());
        buf.extend_from_slice(&self.key);
        xxhash_rust::xxh3::xxh3_64(&buf) as u32
    }
}

/// Smallest power of two `>= max(floor, n)`.
#[must_use]
pub fn next_pow2(n: usize, floor: usize) -> usize {
    n.max(floor).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_pow2_rounds_up() {
        assert_eq!(next_pow2(1, 16), 16);
        assert_eq!(next_pow2(17, 16), 32);
        assert_eq!(next_pow2(64, 16), 64);
    }

    #[test]
    fn hash_is_stable_for_equal_keys() {
        let a = LockKey::new(IndexId::new(1), vec![1, 2, 3]);
        let b = LockKey::new(IndexId::new(1), vec![1, 2, 3]);
        assert_eq!(a.hash32(), b.hash32());
    }
}
