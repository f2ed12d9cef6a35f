use indexmap::IndexMap;

use crate::{
    distribution::Value,
    error::{Error, Result},
    interpreter::{Interpreter, Next, Site},
    random::RandomKey,
    trace::{self, TraceMap},
};

/// Answers every draw from a recorded execution.
///
/// Observations keep the value the program supplies.
pub struct Replay {
    values: IndexMap<String, Value>,
}

impl Replay {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn from_trace(trace: &TraceMap) -> Self {
        Self::new(trace::values(trace))
    }
}

impl Interpreter for Replay {
    fn draw(&self, site: &Site, _key: Option<RandomKey>, _next: Next<'_>) -> Result<Value> {
        if let Some(value) = &site.observed {
            return Ok(value.clone());
        }
        self.values
            .get(&site.name)
            .cloned()
            .ok_or_else(|| Error::UnknownSite {
                site: site.name.clone(),
            })
    }
}
