use tracing::debug;

use crate::{
    distribution::{cache_key, Value},
    error::{Error, Result},
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
    store::KeyValueStore,
};

/// Like [`super::Memoize`], but backed by a [`KeyValueStore`].
///
/// Entries are keyed by a stable hash of the distribution's description and
/// the key's canonical form, and hold the value as JSON text.
pub struct PersistentMemoize<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> PersistentMemoize<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> Interpreter for PersistentMemoize<S> {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        if site.observed.is_some() {
            return next.draw(site, key);
        }
        let Some(key) = key else {
            return Err(Error::MissingRandomKey {
                site: site.name.clone(),
            });
        };
        let hash = cache_key(site.distribution.as_ref(), &key);
        if let Some(text) = self.store.get(hash)? {
            debug!(site = %site.name, hash, "persisted draw");
            return Ok(serde_json::from_str(&text)?);
        }
        let value = next.draw(site, Some(key))?;
        self.store
            .insert_if_absent(hash, serde_json::to_string(&value)?)?;
        Ok(value)
    }
}
