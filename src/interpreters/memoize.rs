use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{
    distribution::{identity, Value},
    error::{Error, Result},
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
};

type Cache = HashMap<(String, RandomKey), Value>;

/// In-memory cache of draws keyed by `(distribution, key)`.
///
/// Entries are never evicted. Use [`Memoize::share`] to back several chains
/// with one cache, or [`super::PersistentMemoize`] to outlive the process.
#[derive(Default)]
pub struct Memoize {
    cache: Arc<Mutex<Cache>>,
}

impl Memoize {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new interpreter instance reading and writing the same cache.
    pub fn share(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("Poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Interpreter for Memoize {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        if site.observed.is_some() {
            return next.draw(site, key);
        }
        let Some(key) = key else {
            return Err(Error::MissingRandomKey {
                site: site.name.clone(),
            });
        };
        let entry = (identity(site.distribution.as_ref()), key);
        if let Some(value) = self.cache.lock().expect("Poisoned lock").get(&entry) {
            debug!(site = %site.name, "memoized draw");
            return Ok(value.clone());
        }
        // The lock is not held while delegating: two racing misses both
        // compute, and both store the same value.
        let value = next.draw(site, Some(entry.1.clone()))?;
        self.cache
            .lock()
            .expect("Poisoned lock")
            .entry(entry)
            .or_insert_with(|| value.clone());
        Ok(value)
    }
}
