//! Where a resampled site draws its new value from.

use std::sync::Arc;

use crate::{
    distribution::Distribution,
    error::{Error, Result},
    trace::TraceMap,
};

/// Computes the distribution a site is resampled from, given the current
/// shared trace.
///
/// This is the place to plug in model-specific inference. The scheduler only
/// guarantees that no dependent site changes while this runs.
pub trait LocalPosterior: Send + Sync {
    fn local_posterior(&self, site: &str, trace: &TraceMap) -> Result<Arc<dyn Distribution>>;
}

/// Resamples every site from its prior.
///
/// This ignores the observations entirely, so it is a scheduling baseline
/// and not a correct conditional.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorPosterior;

impl LocalPosterior for PriorPosterior {
    fn local_posterior(&self, site: &str, trace: &TraceMap) -> Result<Arc<dyn Distribution>> {
        trace
            .get(site)
            .map(|node| node.distribution.clone())
            .ok_or_else(|| Error::UnknownSite {
                site: site.to_string(),
            })
    }
}
