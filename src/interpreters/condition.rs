use std::collections::HashMap;

use tracing::debug;

use crate::{
    distribution::Value,
    error::Result,
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
};

/// Substitutes fixed values for named sites.
///
/// A conditioned draw never reaches the rest of the chain: the distribution
/// is not sampled and no random key is consumed. Observations made by the
/// program itself pass through untouched.
#[derive(Debug, Default, Clone)]
pub struct Condition {
    data: HashMap<String, Value>,
}

impl Condition {
    pub fn new(data: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Self {
            data: data
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }
}

impl Interpreter for Condition {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        if site.observed.is_some() {
            return next.draw(site, key);
        }
        match self.data.get(&site.name) {
            Some(value) => {
                debug!(site = %site.name, "conditioned draw");
                Ok(value.clone())
            }
            None => next.draw(site, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{distribution::Fallible, error::Error, interpreter::Chain, interpreters::Standard};

    #[test]
    fn short_circuits_known_sites() -> Result<()> {
        let chain = Chain::new(Arc::new(Standard::new()))
            .stack(Arc::new(Condition::new([("x", json!("X"))])))?;
        let dist = Arc::new(Fallible::new("must not be sampled"));
        assert_eq!(chain.draw(&Site::new("x", dist.clone()), None)?, json!("X"));
        assert!(matches!(
            chain.draw(&Site::new("y", dist), None),
            Err(Error::MissingRandomKey { .. })
        ));
        Ok(())
    }

    #[test]
    fn program_observations_pass_through() -> Result<()> {
        let chain = Chain::new(Arc::new(Standard::new()))
            .stack(Arc::new(Condition::new([("x", json!("X"))])))?;
        let site = Site::observed("x", Arc::new(Fallible::new("never")), json!("seen"));
        assert_eq!(chain.draw(&site, None)?, json!("seen"));
        Ok(())
    }
}
