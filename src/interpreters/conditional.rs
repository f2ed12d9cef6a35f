use crate::{
    distribution::{Distribution, Value},
    error::Result,
    interpreter::{Chain, Interpreter, Next, Site},
    random::RandomKey,
};

type Predicate = dyn Fn(&str, &dyn Distribution) -> bool + Send + Sync;

/// Routes matching draws to an alternate chain.
///
/// Matching draws bypass the rest of this chain entirely.
pub struct Conditional {
    predicate: Box<Predicate>,
    alternate: Chain,
}

impl Conditional {
    pub fn new<F>(predicate: F, alternate: Chain) -> Self
    where
        F: Fn(&str, &dyn Distribution) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            alternate,
        }
    }

    /// Route a single named site.
    pub fn site(name: impl Into<String>, alternate: Chain) -> Self {
        let name = name.into();
        Self::new(move |site, _| site == name, alternate)
    }
}

impl Interpreter for Conditional {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        if (self.predicate)(&site.name, site.distribution.as_ref()) {
            self.alternate.draw(site, key)
        } else {
            next.draw(site, key)
        }
    }
}
