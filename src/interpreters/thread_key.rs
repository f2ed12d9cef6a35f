use std::sync::Mutex;

use crate::{
    distribution::Value,
    error::Result,
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
};

/// Threads a running random key through successive draws.
///
/// Each draw that arrives without a key gets the deeper half of a split of
/// the held key, and the incremented half is kept for the next draw. A fresh
/// instance started from the same key therefore reproduces the same sequence
/// of downstream keys.
pub struct ThreadRandomKey {
    key: Mutex<RandomKey>,
    force: bool,
}

impl Default for ThreadRandomKey {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRandomKey {
    pub fn new() -> Self {
        Self::from_key(RandomKey::root())
    }

    pub fn from_key(key: RandomKey) -> Self {
        Self {
            key: Mutex::new(key),
            force: false,
        }
    }

    /// Replace incoming keys too, instead of only filling in missing ones.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The key the next draw will split.
    pub fn current(&self) -> RandomKey {
        self.key.lock().expect("Poisoned lock").clone()
    }

    fn next_key(&self) -> RandomKey {
        let mut held = self.key.lock().expect("Poisoned lock");
        let (fresh, rest) = held.split();
        *held = rest;
        fresh
    }
}

impl Interpreter for ThreadRandomKey {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        if site.observed.is_some() {
            return next.draw(site, key);
        }
        let key = match key {
            Some(key) if !self.force => key,
            _ => self.next_key(),
        };
        next.draw(site, Some(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{distribution::UniformHash, interpreter::Chain};

    #[derive(Default)]
    struct KeySpy(Mutex<Vec<Option<RandomKey>>>);

    impl Interpreter for KeySpy {
        fn draw(&self, _site: &Site, key: Option<RandomKey>, _next: Next<'_>) -> Result<Value> {
            self.0.lock().unwrap().push(key);
            Ok(json!(null))
        }
    }

    fn site(name: &str) -> Site {
        Site::new(name, Arc::new(UniformHash::new("foo")))
    }

    fn keys_for(threader: ThreadRandomKey, incoming: Option<RandomKey>) -> Vec<Option<RandomKey>> {
        let spy = Arc::new(KeySpy::default());
        let chain = Chain::new(spy.clone()).stack(Arc::new(threader)).unwrap();
        chain.draw(&site("a"), incoming.clone()).unwrap();
        chain.draw(&site("b"), incoming).unwrap();
        let keys = spy.0.lock().unwrap().clone();
        keys
    }

    #[test]
    fn distinct_and_reproducible() {
        let first = keys_for(ThreadRandomKey::new(), None);
        let second = keys_for(ThreadRandomKey::new(), None);
        assert_eq!(first, second);
        assert_ne!(first[0], first[1]);
        assert!(first.iter().all(Option::is_some));
    }

    #[test]
    fn keeps_incoming_unless_forced() {
        let incoming = Some(RandomKey::root());
        let kept = keys_for(ThreadRandomKey::new(), incoming.clone());
        assert_eq!(kept, vec![incoming.clone(), incoming.clone()]);

        let forced = keys_for(ThreadRandomKey::new().force(true), incoming.clone());
        assert_ne!(forced[0], incoming);
        assert_eq!(forced, keys_for(ThreadRandomKey::new(), None));
    }

    #[test]
    fn advances_held_key() {
        let threader = Arc::new(ThreadRandomKey::new());
        let (fresh, rest) = RandomKey::root().split();
        let spy = Arc::new(KeySpy::default());
        let chain = Chain::new(spy.clone()).stack(threader.clone()).unwrap();
        assert_eq!(threader.current(), RandomKey::root());
        chain.draw(&site("a"), None).unwrap();
        assert_eq!(threader.current(), rest);
        assert_eq!(spy.0.lock().unwrap()[0], Some(fresh));
    }
}
