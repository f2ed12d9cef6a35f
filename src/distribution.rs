//! The distribution capability and a handful of plug-ins.
//!
//! The engine never looks inside a distribution. It only asks it for a value
//! given a [`RandomKey`] and for a structural description that identifies it
//! in cache keys.

use std::fmt::Debug;

use anyhow::{bail, ensure};
use rand::Rng;
use rand_distr::Distribution as _;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::random::RandomKey;

pub type Value = serde_json::Value;

/// Anything that can produce a value from a random key.
///
/// Implementations must be deterministic in `(self.describe(), key)` for the
/// caching interpreters to be sound.
pub trait Distribution: Debug + Send + Sync {
    fn sample(&self, key: &RandomKey) -> anyhow::Result<Value>;

    /// Structural description of the distribution, including a type tag.
    ///
    /// Two distributions with equal descriptions are treated as the same
    /// distribution by every cache.
    fn describe(&self) -> Value;
}

/// Canonical identity of a distribution, JSON with sorted object keys.
pub fn identity(distribution: &dyn Distribution) -> String {
    // serde_json's default map is ordered, so this is canonical.
    distribution.describe().to_string()
}

/// Stable 64 bit hash of a `(distribution, key)` pair.
pub fn cache_key(distribution: &dyn Distribution, key: &RandomKey) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(identity(distribution).as_bytes());
    hasher.update(b"\x00");
    hasher.update(key.canonical().as_bytes());
    let bytes = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(head)
}

/// Hash-based string distribution.
///
/// The output is the hex digest of the seed together with the key, so a
/// chain of `UniformHash` draws threads data through the program the way a
/// text generator would.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformHash {
    pub seed: String,
}

impl UniformHash {
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }
}

impl Distribution for UniformHash {
    fn sample(&self, key: &RandomKey) -> anyhow::Result<Value> {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(key.digest().to_le_bytes());
        let digest = hasher.finalize();
        let text: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Ok(Value::String(text))
    }

    fn describe(&self) -> Value {
        json!({ "type": "UniformHash", "seed": self.seed })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    pub mean: f64,
    pub std: f64,
}

impl Normal {
    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }
}

impl Distribution for Normal {
    fn sample(&self, key: &RandomKey) -> anyhow::Result<Value> {
        let normal = rand_distr::Normal::new(self.mean, self.std)?;
        let draw = normal.sample(&mut key.rng());
        Ok(json!(draw))
    }

    fn describe(&self) -> Value {
        json!({ "type": "Normal", "mean": self.mean, "std": self.std })
    }
}

/// Uniform choice among a fixed list of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    pub choices: Vec<Value>,
}

impl Categorical {
    pub fn new(choices: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }
}

impl Distribution for Categorical {
    fn sample(&self, key: &RandomKey) -> anyhow::Result<Value> {
        ensure!(!self.choices.is_empty(), "Categorical needs at least one choice");
        let idx = key.rng().random_range(0..self.choices.len());
        Ok(self.choices[idx].clone())
    }

    fn describe(&self) -> Value {
        json!({ "type": "Categorical", "choices": self.choices })
    }
}

/// A distribution whose every draw fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fallible {
    pub message: String,
}

impl Fallible {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Distribution for Fallible {
    fn sample(&self, _key: &RandomKey) -> anyhow::Result<Value> {
        bail!("{}", self.message)
    }

    fn describe(&self) -> Value {
        json!({ "type": "Fallible", "message": self.message })
    }
}
