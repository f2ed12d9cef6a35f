//! The execution context handed to probabilistic programs.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
};

use crate::{
    distribution::{Distribution, Value},
    error::{Error, Result},
    interpreter::{Chain, Interpreter, Site},
    interpreters::{Memoize, Standard, ThreadRandomKey},
};

/// Cooperative cancellation flag, optionally chained to a parent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    local: AtomicBool,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                local: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.local.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.local.load(Ordering::Acquire) {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(|parent| parent.is_cancelled())
    }
}

/// Interpreter instances currently installed by some [`Runtime::scope`],
/// by address.
fn active_scopes() -> &'static Mutex<HashSet<usize>> {
    static ACTIVE: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();
    ACTIVE.get_or_init(Default::default)
}

/// Marks an instance as scoped until dropped.
///
/// The guard holds the `Arc`, so the address cannot be reused while it is
/// registered.
struct ScopeGuard {
    handler: Arc<dyn Interpreter>,
}

impl ScopeGuard {
    fn enter(handler: Arc<dyn Interpreter>) -> Result<Self> {
        let fresh = active_scopes()
            .lock()
            .expect("Poisoned lock")
            .insert(Self::address(&handler));
        if !fresh {
            return Err(Error::Reentrant);
        }
        Ok(Self { handler })
    }

    fn address(handler: &Arc<dyn Interpreter>) -> usize {
        Arc::as_ptr(handler) as *const () as usize
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        // Never panic in drop, even on a poisoned registry.
        let mut active = match active_scopes().lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&Self::address(&self.handler));
    }
}

/// The interpreter chain a program draws through.
///
/// A runtime is passed explicitly to every program, so concurrent executions
/// on different threads never see each other's interpreters.
#[derive(Debug, Clone)]
pub struct Runtime {
    chain: Chain,
    cancel: CancelToken,
}

impl Default for Runtime {
    /// `Standard + Memoize + ThreadRandomKey`, starting from the root key.
    fn default() -> Self {
        let chain = Chain::new(Arc::new(Standard::new()))
            .stack(Arc::new(Memoize::new()))
            .and_then(|chain| chain.stack(Arc::new(ThreadRandomKey::new())))
            .expect("Fresh interpreters cannot already be linked");
        Self::new(chain)
    }
}

impl Runtime {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            cancel: CancelToken::new(),
        }
    }

    /// Draws fail with [`Error::Cancelled`] once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn draw<D: Distribution + 'static>(&self, name: &str, distribution: D) -> Result<Value> {
        self.draw_shared(name, Arc::new(distribution))
    }

    pub fn draw_shared(&self, name: &str, distribution: Arc<dyn Distribution>) -> Result<Value> {
        self.resolve(Site::new(name, distribution))
    }

    /// Record an observation; resolves to `value` without sampling.
    pub fn observe<D: Distribution + 'static>(
        &self,
        name: &str,
        distribution: D,
        value: Value,
    ) -> Result<Value> {
        self.resolve(Site::observed(name, Arc::new(distribution), value))
    }

    fn resolve(&self, site: Site) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.chain.draw(&site, None)
    }

    /// Run `f` with `handler` installed on top of the current chain.
    ///
    /// The previous chain is back in effect once `f` returns. An instance is
    /// in at most one scope at a time, across all runtimes and threads:
    /// installing one that is already in this chain or in any open scope
    /// fails with [`Error::Reentrant`].
    pub fn scope<I, T, F>(&self, handler: Arc<I>, f: F) -> Result<T>
    where
        I: Interpreter + 'static,
        F: FnOnce(&Runtime) -> Result<T>,
    {
        let handler: Arc<dyn Interpreter> = handler;
        if self.chain.contains(&handler) {
            return Err(Error::Reentrant);
        }
        let _guard = ScopeGuard::enter(handler.clone())?;
        let inner = Runtime {
            chain: self.chain.stack_dyn(handler)?,
            cancel: self.cancel.clone(),
        };
        f(&inner)
    }
}
