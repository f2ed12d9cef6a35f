//! Effect interpretation.
//!
//! Every draw a program makes travels down a [`Chain`] of interpreters. Each
//! interpreter may answer the draw itself or hand it to the rest of the chain
//! through [`Next`], possibly with a different random key.

use std::sync::Arc;

use crate::{
    distribution::{Distribution, Value},
    error::{Error, Result},
    random::RandomKey,
};

/// A named request for a value.
#[derive(Debug, Clone)]
pub struct Site {
    pub name: String,
    pub distribution: Arc<dyn Distribution>,
    /// Set for observation draws, which resolve to this value and never
    /// consume randomness.
    pub observed: Option<Value>,
}

impl Site {
    pub fn new(name: impl Into<String>, distribution: Arc<dyn Distribution>) -> Self {
        Self {
            name: name.into(),
            distribution,
            observed: None,
        }
    }

    pub fn observed(
        name: impl Into<String>,
        distribution: Arc<dyn Distribution>,
        value: Value,
    ) -> Self {
        Self {
            name: name.into(),
            distribution,
            observed: Some(value),
        }
    }
}

/// A unit of effect interception.
pub trait Interpreter: Send + Sync {
    /// Resolve a draw, delegating to `next` if this interpreter does not
    /// answer it.
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value>;
}

struct Node {
    handler: Arc<dyn Interpreter>,
    next: Option<Arc<Node>>,
}

/// The part of a chain below the interpreter currently handling a draw.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    node: Option<&'a Node>,
}

impl<'a> Next<'a> {
    pub fn draw(self, site: &Site, key: Option<RandomKey>) -> Result<Value> {
        match self.node {
            Some(node) => node.handler.draw(
                site,
                key,
                Next {
                    node: node.next.as_deref(),
                },
            ),
            // Observations resolve even when nothing is left to delegate to.
            None => site.observed.clone().ok_or_else(|| Error::NoDelegate {
                site: site.name.clone(),
            }),
        }
    }
}

/// An immutable, singly-linked interpreter chain.
///
/// Chains are built innermost first:
///
/// ```
/// use std::sync::Arc;
/// use lyro_rs::{Chain, Memoize, Standard, ThreadRandomKey};
///
/// let chain = Chain::new(Arc::new(Standard::new()))
///     .stack(Arc::new(Memoize::new()))?
///     .stack(Arc::new(ThreadRandomKey::new()))?;
/// # Ok::<(), lyro_rs::Error>(())
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    head: Option<Arc<Node>>,
}

fn same_instance(a: &Arc<dyn Interpreter>, b: &Arc<dyn Interpreter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Chain {
    /// A chain holding only `terminal`.
    pub fn new<I: Interpreter + 'static>(terminal: Arc<I>) -> Self {
        Self {
            head: Some(Arc::new(Node {
                handler: terminal,
                next: None,
            })),
        }
    }

    /// A chain with nothing in it. Every draw except an observation fails
    /// with [`Error::NoDelegate`].
    pub fn empty() -> Self {
        Self { head: None }
    }

    /// Put `handler` on top of this chain, so that it delegates to it.
    ///
    /// Fails if the same instance is already linked in this chain.
    pub fn stack<I: Interpreter + 'static>(&self, handler: Arc<I>) -> Result<Self> {
        self.stack_dyn(handler)
    }

    pub fn stack_dyn(&self, handler: Arc<dyn Interpreter>) -> Result<Self> {
        if self.contains(&handler) {
            return Err(Error::AlreadyLinked);
        }
        Ok(Self {
            head: Some(Arc::new(Node {
                handler,
                next: self.head.clone(),
            })),
        })
    }

    pub(crate) fn contains(&self, handler: &Arc<dyn Interpreter>) -> bool {
        let mut current = self.head.as_deref();
        while let Some(node) = current {
            if same_instance(&node.handler, handler) {
                return true;
            }
            current = node.next.as_deref();
        }
        false
    }

    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut current = self.head.as_deref();
        while let Some(node) = current {
            len += 1;
            current = node.next.as_deref();
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Send a draw to the head of the chain.
    pub fn draw(&self, site: &Site, key: Option<RandomKey>) -> Result<Value> {
        Next {
            node: self.head.as_deref(),
        }
        .draw(site, key)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("len", &self.len()).finish()
    }
}
