mod condition;
mod conditional;
mod memoize;
mod persistent;
mod replay;
mod standard;
mod thread_key;
mod trace;

pub use condition::Condition;
pub use conditional::Conditional;
pub use memoize::Memoize;
pub use persistent::PersistentMemoize;
pub use replay::Replay;
pub use standard::Standard;
pub use thread_key::ThreadRandomKey;
pub use trace::Trace;
