//! Composable effect interpreters for probabilistic programs, and a
//! concurrent Gibbs-style resampler built on them.
//!
//! A program draws named values through a [`Runtime`]. What a draw means is
//! decided by the [`Chain`] of interpreters the runtime carries: sampling
//! with a deterministic [`RandomKey`], caching, recording, conditioning,
//! replaying.
//!
//! ```
//! use lyro_rs::{Runtime, UniformHash};
//!
//! let rt = Runtime::default();
//! let a = rt.draw("a", UniformHash::new("seed")).unwrap();
//! let b = rt.draw("b", UniformHash::new("seed")).unwrap();
//! assert_ne!(a, b);
//! ```

pub(crate) mod distribution;
pub(crate) mod error;
pub(crate) mod interpreter;
pub mod interpreters;
pub(crate) mod posterior;
pub(crate) mod random;
pub(crate) mod runtime;
pub(crate) mod sampler;
pub(crate) mod schedule;
pub(crate) mod store;
pub(crate) mod trace;

pub use distribution::{
    cache_key, identity, Categorical, Distribution, Fallible, Normal, UniformHash, Value,
};
pub use error::{BoxError, Error, Result};
pub use interpreter::{Chain, Interpreter, Next, Site};
pub use interpreters::{
    Condition, Conditional, Memoize, PersistentMemoize, Replay, Standard, ThreadRandomKey, Trace,
};
pub use posterior::{LocalPosterior, PriorPosterior};
pub use random::RandomKey;
pub use runtime::{CancelToken, Runtime};
pub use sampler::{
    Gibbs, GibbsSettings, Program, SamplerState, Sampling, SamplingWaitResult,
};
pub use schedule::{Dependencies, DependencyGraph, Schedule};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use trace::{values as trace_values, TraceMap, TraceNode};
