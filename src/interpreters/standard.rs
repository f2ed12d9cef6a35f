use std::{collections::HashSet, sync::Mutex};

use tracing::debug;

use crate::{
    distribution::Value,
    error::{Error, Result},
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
};

/// The terminal interpreter: asks the distribution for a value.
#[derive(Default)]
pub struct Standard {
    consumed: Option<Mutex<HashSet<RandomKey>>>,
}

impl Standard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember every key handed to a distribution and fail on reuse.
    ///
    /// This costs a clone and a hash per draw, so it is meant for debugging
    /// interpreter stacks rather than for production runs.
    pub fn detect_key_reuse(mut self) -> Self {
        self.consumed = Some(Mutex::new(HashSet::new()));
        self
    }
}

impl Interpreter for Standard {
    fn draw(&self, site: &Site, key: Option<RandomKey>, _next: Next<'_>) -> Result<Value> {
        if let Some(value) = &site.observed {
            return Ok(value.clone());
        }
        let Some(key) = key else {
            return Err(Error::MissingRandomKey {
                site: site.name.clone(),
            });
        };
        if let Some(consumed) = &self.consumed {
            let fresh = consumed
                .lock()
                .expect("Poisoned lock")
                .insert(key.clone());
            if !fresh {
                return Err(Error::KeyReused {
                    site: site.name.clone(),
                });
            }
        }
        debug!(site = %site.name, "sampling distribution");
        site.distribution
            .sample(&key)
            .map_err(|err| Error::Distribution {
                site: site.name.clone(),
                source: err.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        distribution::{Fallible, UniformHash},
        interpreter::Chain,
    };

    #[test]
    fn requires_a_key() {
        let chain = Chain::new(Arc::new(Standard::new()));
        let site = Site::new("x", Arc::new(UniformHash::new("foo")));
        assert!(matches!(
            chain.draw(&site, None),
            Err(Error::MissingRandomKey { .. })
        ));
        assert!(chain.draw(&site, Some(RandomKey::root())).is_ok());
    }

    #[test]
    fn observations_need_no_key() -> Result<()> {
        let chain = Chain::new(Arc::new(Standard::new()));
        let site = Site::observed("x", Arc::new(Fallible::new("never")), json!("seen"));
        assert_eq!(chain.draw(&site, None)?, json!("seen"));
        Ok(())
    }

    #[test]
    fn wraps_distribution_failures() {
        let chain = Chain::new(Arc::new(Standard::new()));
        let site = Site::new("x", Arc::new(Fallible::new("boom")));
        let err = chain.draw(&site, Some(RandomKey::root())).unwrap_err();
        let Error::Distribution { site, source } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(site, "x");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn detects_reuse() {
        let chain = Chain::new(Arc::new(Standard::new().detect_key_reuse()));
        let site = Site::new("x", Arc::new(UniformHash::new("foo")));
        assert!(chain.draw(&site, Some(RandomKey::root())).is_ok());
        assert!(matches!(
            chain.draw(&site, Some(RandomKey::root())),
            Err(Error::KeyReused { .. })
        ));
    }
}
