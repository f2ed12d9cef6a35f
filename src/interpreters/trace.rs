use std::sync::Mutex;

use indexmap::{map::Entry, IndexMap};

use crate::{
    distribution::Value,
    error::{Error, Result},
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
    trace::{self, TraceMap, TraceNode},
};

/// Records every draw that passes through it.
///
/// Place it outermost to see every site a program visits, including sites
/// that only exist because of earlier draws.
#[derive(Default)]
pub struct Trace {
    nodes: Mutex<TraceMap>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> TraceMap {
        self.nodes.lock().expect("Poisoned lock").clone()
    }

    pub fn values(&self) -> IndexMap<String, Value> {
        trace::values(&self.nodes.lock().expect("Poisoned lock"))
    }

    pub fn take(&self) -> TraceMap {
        std::mem::take(&mut *self.nodes.lock().expect("Poisoned lock"))
    }
}

impl Interpreter for Trace {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        if self
            .nodes
            .lock()
            .expect("Poisoned lock")
            .contains_key(&site.name)
        {
            return Err(Error::DuplicateSite {
                site: site.name.clone(),
            });
        }
        let value = next.draw(site, key.clone())?;
        let mut nodes = self.nodes.lock().expect("Poisoned lock");
        match nodes.entry(site.name.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateSite {
                site: site.name.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(TraceNode {
                    name: site.name.clone(),
                    distribution: site.distribution.clone(),
                    key,
                    value: value.clone(),
                    observed: site.observed.is_some(),
                });
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use itertools::Itertools;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        distribution::UniformHash,
        interpreter::Chain,
        interpreters::{Standard, ThreadRandomKey},
    };

    #[test]
    fn records_in_visit_order() -> Result<()> {
        let trace = Arc::new(Trace::new());
        let chain = Chain::new(Arc::new(Standard::new()))
            .stack(Arc::new(ThreadRandomKey::new()))?
            .stack(trace.clone())?;
        let mut seed = "foo".to_string();
        for name in ["c", "a", "b"] {
            let value = chain.draw(&Site::new(name, Arc::new(UniformHash::new(&seed))), None)?;
            seed = value.as_str().unwrap_or_default().to_string();
        }
        let nodes = trace.nodes();
        assert_eq!(nodes.keys().collect_vec(), vec!["c", "a", "b"]);
        assert_eq!(nodes["b"].value, json!(seed));
        assert!(nodes.values().all(|node| node.key.is_none()));
        Ok(())
    }

    #[test]
    fn rejects_duplicate_sites() -> Result<()> {
        let trace = Arc::new(Trace::new());
        let chain = Chain::new(Arc::new(Standard::new()))
            .stack(Arc::new(ThreadRandomKey::new()))?
            .stack(trace.clone())?;
        let site = Site::new("x", Arc::new(UniformHash::new("foo")));
        let first = chain.draw(&site, None)?;
        assert!(matches!(
            chain.draw(&site, None),
            Err(Error::DuplicateSite { .. })
        ));
        assert_eq!(trace.values()["x"], first);
        assert_eq!(trace.take().len(), 1);
        assert!(trace.nodes().is_empty());
        Ok(())
    }
}
