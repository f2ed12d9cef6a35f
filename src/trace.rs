use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    distribution::{Distribution, Value},
    random::RandomKey,
};

/// One resolved draw.
#[derive(Debug, Clone)]
pub struct TraceNode {
    pub name: String,
    pub distribution: Arc<dyn Distribution>,
    /// The key the recording interpreter saw, if any was threaded to it.
    pub key: Option<RandomKey>,
    pub value: Value,
    /// Whether the program supplied the value as an observation.
    pub observed: bool,
}

/// Resolved draws by site name, in the order they were first visited.
pub type TraceMap = IndexMap<String, TraceNode>;

/// Strip a trace down to its values.
pub fn values(trace: &TraceMap) -> IndexMap<String, Value> {
    trace
        .iter()
        .map(|(name, node)| (name.clone(), node.value.clone()))
        .collect()
}
