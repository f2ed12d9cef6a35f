//! Deterministic, splittable random keys.
//!
//! A [`RandomKey`] names a position in an infinite binary tree rooted at
//! [`RandomKey::root`]. Splitting a key yields a child one level deeper and a
//! sibling at the same depth, so a long-lived thread of keys grows with the
//! number of splits along its own path and not with the total number of
//! splits performed.

use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{ser::SerializeTuple, Serialize, Serializer};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RandomKey {
    // Wider than any seed, so counting siblings from a seed never wraps.
    head: u128,
    tail: Option<Arc<RandomKey>>,
}

impl Default for RandomKey {
    fn default() -> Self {
        Self::root()
    }
}

impl RandomKey {
    pub fn root() -> Self {
        Self {
            head: 0,
            tail: None,
        }
    }

    /// A top-level key, the `seed`-th sibling of the root.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            head: u128::from(seed),
            tail: None,
        }
    }

    /// Split into `(deeper, incremented)`.
    ///
    /// Keep `incremented` for further use and consume `deeper` once:
    ///
    /// ```
    /// use lyro_rs::RandomKey;
    ///
    /// let mut key = RandomKey::root();
    /// let (fresh, rest) = key.split();
    /// key = rest;
    /// assert_ne!(fresh, key);
    /// ```
    pub fn split(&self) -> (RandomKey, RandomKey) {
        let deeper = RandomKey {
            head: 0,
            tail: Some(Arc::new(self.clone())),
        };
        let incremented = RandomKey {
            head: self.head + 1,
            tail: self.tail.clone(),
        };
        (deeper, incremented)
    }

    /// Number of ancestors between this key and the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.tail.as_deref();
        while let Some(parent) = current {
            depth += 1;
            current = parent.tail.as_deref();
        }
        depth
    }

    fn sha256(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        hasher.finalize().into()
    }

    /// The canonical textual form, nested `[tail, head]` pairs.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).expect("RandomKey serialization is infallible")
    }

    /// Consume this key as a fixed-width integer.
    ///
    /// Call this at most once per key. Reusing a key without splitting it
    /// first correlates draws that should be independent.
    pub fn digest(&self) -> u64 {
        let bytes = self.sha256();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(head)
    }

    /// Consume this key as a seeded random number generator.
    ///
    /// The same precondition as [`RandomKey::digest`] applies.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::from_seed(self.sha256())
    }
}

impl Serialize for RandomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.tail.as_deref())?;
        tuple.serialize_element(&self.head)?;
        tuple.end()
    }
}
