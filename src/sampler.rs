//! Concurrent Gibbs-style resampling.
//!
//! [`Gibbs`] runs a program once to discover its sites, then repeatedly
//! re-executes it to resample one latent site at a time. Units of work for
//! independent sites run concurrently on a thread pool; units for dependent
//! sites never overlap.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        mpsc::{channel, sync_channel, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{spawn, JoinHandle},
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use itertools::Itertools;
use rayon::{ScopeFifo, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::{
    distribution::{Distribution, Value},
    error::{Error, Result},
    interpreter::{Chain, Interpreter, Next, Site},
    interpreters::{Condition, Conditional, Standard, ThreadRandomKey, Trace},
    posterior::{LocalPosterior, PriorPosterior},
    random::RandomKey,
    runtime::{CancelToken, Runtime},
    schedule::{Dependencies, DependencyGraph, Schedule},
    trace::TraceMap,
};

/// A probabilistic program: draws through the runtime it is given.
///
/// Site names must be unique within one execution. The set of sites may
/// depend on earlier draws.
pub trait Program: Send + Sync {
    fn run(&self, rt: &Runtime) -> Result<()>;
}

impl<F> Program for F
where
    F: Fn(&Runtime) -> Result<()> + Send + Sync,
{
    fn run(&self, rt: &Runtime) -> Result<()> {
        self(rt)
    }
}

/// Settings for the Gibbs scheduler
#[derive(Debug, Clone)]
pub struct GibbsSettings {
    /// Threads running units of work. The controller uses one more.
    pub num_threads: usize,
    /// Seed of the key thread that every unit of work splits from.
    pub seed: u64,
    /// Which sites may not be resampled concurrently.
    pub dependencies: Dependencies,
    /// How long the controller waits for a unit to finish before it checks
    /// for cancellation again.
    pub poll_interval: Duration,
}

impl Default for GibbsSettings {
    fn default() -> Self {
        Self {
            num_threads: 4,
            seed: 0,
            dependencies: Dependencies::Complete,
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Uninitialized,
    Initialized,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Draws a routed site from a replacement distribution.
struct Substitute(Arc<dyn Distribution>);

impl Interpreter for Substitute {
    fn draw(&self, site: &Site, key: Option<RandomKey>, next: Next<'_>) -> Result<Value> {
        let site = Site {
            distribution: self.0.clone(),
            ..site.clone()
        };
        next.draw(&site, key)
    }
}

struct Unit {
    site: String,
    posterior: Arc<dyn Distribution>,
    condition: Condition,
    key: RandomKey,
    cancel: CancelToken,
}

struct WorkResult {
    site: String,
    outcome: Result<TraceMap>,
}

/// Re-execute the program with every site but one held fixed.
///
/// Returns the draws that were not held fixed: the resampled site and any
/// site the new value brought into existence.
fn resample<P: Program>(program: &P, base: &Chain, unit: Unit) -> Result<TraceMap> {
    let Unit {
        site,
        posterior,
        condition,
        key,
        cancel,
    } = unit;
    let (site_key, rest) = key.split();
    let (program_key, _) = rest.split();

    let fixed: HashSet<String> = condition.data().keys().cloned().collect();
    let alternate = base
        .stack(Arc::new(Substitute(posterior)))?
        .stack(Arc::new(ThreadRandomKey::from_key(site_key)))?;
    let trace = Arc::new(Trace::new());
    let chain = base
        .stack(Arc::new(ThreadRandomKey::from_key(program_key)))?
        .stack(Arc::new(Conditional::site(site, alternate)))?
        .stack(Arc::new(condition))?
        .stack(trace.clone())?;

    program.run(&Runtime::new(chain).with_cancel(cancel))?;

    let mut nodes = trace.take();
    nodes.retain(|name, _| !fixed.contains(name));
    Ok(nodes)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct Controller<'a, P: Program> {
    program: &'a P,
    base: &'a Chain,
    posterior: &'a dyn LocalPosterior,
    cancel: &'a CancelToken,
    poll_interval: Duration,
}

impl<'a, P: Program> Controller<'a, P> {
    fn run<'scope>(
        &self,
        scope: &ScopeFifo<'scope>,
        schedule: &mut Schedule,
        trace: &mut TraceMap,
        root: &mut RandomKey,
    ) -> Result<()>
    where
        'a: 'scope,
    {
        let (results_tx, results_rx) = channel();
        let mut tokens: HashMap<String, CancelToken> = HashMap::new();
        let mut failure: Option<Error> = None;
        let mut cancelled = false;

        loop {
            if failure.is_none() && !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                warn!(
                    in_flight = schedule.in_flight().len(),
                    "cancelling in-flight resampling"
                );
                schedule.drain();
            }

            if failure.is_none() && !cancelled {
                if let Err(err) =
                    self.start_work(scope, schedule, trace, root, &mut tokens, &results_tx)
                {
                    failure = Some(err);
                    Self::abort(schedule, &tokens);
                }
            }

            if schedule.in_flight().is_empty() {
                break;
            }

            match results_rx.recv_timeout(self.poll_interval) {
                Ok(WorkResult { site, outcome }) => {
                    tokens.remove(&site);
                    match outcome {
                        Ok(nodes) => {
                            debug!(site = %site, draws = nodes.len(), "resampled site");
                            for (name, node) in nodes {
                                if !node.observed {
                                    schedule.add_site(&name);
                                }
                                trace.insert(name, node);
                            }
                            schedule.finish(&site);
                        }
                        Err(err) if err.is_cancelled() => {
                            debug!(site = %site, "resampling cancelled");
                            schedule.abandon(&site);
                        }
                        Err(err) => {
                            error!(site = %site, error = %err, "resampling failed");
                            schedule.abandon(&site);
                            if failure.is_none() && !cancelled {
                                failure = Some(Error::SiteFailed {
                                    site,
                                    source: Box::new(err),
                                });
                                Self::abort(schedule, &tokens);
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // We hold a sender ourselves, so this never happens.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Every unit has reported back by now.
        schedule.cancel_all();
        match failure {
            Some(err) => Err(err),
            None if cancelled => Err(Error::Cancelled),
            None => Ok(()),
        }
    }

    fn abort(schedule: &mut Schedule, tokens: &HashMap<String, CancelToken>) {
        for token in tokens.values() {
            token.cancel();
        }
        schedule.drain();
    }

    fn start_work<'scope>(
        &self,
        scope: &ScopeFifo<'scope>,
        schedule: &mut Schedule,
        trace: &TraceMap,
        root: &mut RandomKey,
        tokens: &mut HashMap<String, CancelToken>,
        results: &Sender<WorkResult>,
    ) -> Result<()>
    where
        'a: 'scope,
    {
        while let Some(site) = schedule.find_work() {
            let posterior = self
                .posterior
                .local_posterior(&site, trace)
                .map_err(|err| {
                    error!(site = %site, error = %err, "local posterior failed");
                    Error::SiteFailed {
                        site: site.clone(),
                        source: Box::new(err),
                    }
                })?;
            let condition = Condition::new(
                trace
                    .iter()
                    .filter(|(name, _)| **name != site)
                    .map(|(name, node)| (name.clone(), node.value.clone())),
            );
            let (key, rest) = root.split();
            *root = rest;
            let cancel = self.cancel.child();

            schedule.start(&site);
            tokens.insert(site.clone(), cancel.clone());
            debug!(site = %site, pending = schedule.pending(), "starting resampling");

            let unit = Unit {
                site: site.clone(),
                posterior,
                condition,
                key,
                cancel,
            };
            let program = self.program;
            let base = self.base;
            let results = results.clone();
            scope.spawn_fifo(move |_| {
                // A unit that dies without reporting would stall the controller.
                let outcome = catch_unwind(AssertUnwindSafe(|| resample(program, base, unit)))
                    .unwrap_or_else(|payload| {
                        Err(Error::Panicked {
                            message: panic_message(payload.as_ref()),
                        })
                    });
                // The controller drains the channel until every unit reports.
                let _ = results.send(WorkResult { site, outcome });
            });
        }
        Ok(())
    }
}

/// Gibbs-style resampler over the latent sites of a program.
pub struct Gibbs<P: Program> {
    program: P,
    observed: IndexMap<String, Value>,
    settings: GibbsSettings,
    posterior: Arc<dyn LocalPosterior>,
    base: Chain,
    cancel: CancelToken,
    trace: TraceMap,
    counts: IndexMap<String, u64>,
    state: SamplerState,
}

impl<P: Program> Gibbs<P> {
    pub fn new(program: P, observed: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Self {
            program,
            observed: observed
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
            settings: GibbsSettings::default(),
            posterior: Arc::new(PriorPosterior),
            base: Chain::new(Arc::new(Standard::new())),
            cancel: CancelToken::new(),
            trace: TraceMap::new(),
            counts: IndexMap::new(),
            state: SamplerState::Uninitialized,
        }
    }

    pub fn with_settings(mut self, settings: GibbsSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_posterior<L: LocalPosterior + 'static>(mut self, posterior: L) -> Self {
        self.posterior = Arc::new(posterior);
        self
    }

    /// The chain below the scheduler's own interpreters. Defaults to
    /// [`Standard`]; stack a cache on it to avoid recomputing draws.
    pub fn with_base(mut self, base: Chain) -> Self {
        self.base = base;
        self
    }

    pub fn settings(&self) -> &GibbsSettings {
        &self.settings
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Cancels the running (or next) call to [`Gibbs::sample`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The shared trace of the last sampling call.
    pub fn trace(&self) -> &TraceMap {
        &self.trace
    }

    /// Completed resampling steps per latent site in the last call.
    pub fn counts(&self) -> &IndexMap<String, u64> {
        &self.counts
    }

    /// Run `num_steps` resampling steps and return the latent values.
    ///
    /// Either every latent site is returned or an error is; partial results
    /// are never handed out.
    pub fn sample(&mut self, num_steps: u64) -> Result<IndexMap<String, Value>> {
        let start = Instant::now();
        info!(num_steps, seed = self.settings.seed, "starting Gibbs sampling");
        let result = self.sample_inner(num_steps);
        match &result {
            Ok(latent) => {
                self.state = SamplerState::Completed;
                info!(latent = latent.len(), elapsed = ?start.elapsed(), "finished Gibbs sampling");
            }
            Err(err) if err.is_cancelled() => {
                self.state = SamplerState::Cancelled;
                warn!("Gibbs sampling was cancelled");
                // The next call starts with a live token.
                self.cancel = CancelToken::new();
            }
            Err(err) => {
                self.state = SamplerState::Failed;
                error!(error = %err, "Gibbs sampling failed");
            }
        }
        result
    }

    fn sample_inner(&mut self, num_steps: u64) -> Result<IndexMap<String, Value>> {
        let mut root = RandomKey::from_seed(self.settings.seed);
        let mut schedule = self.initialize(num_steps, &mut root)?;

        self.state = SamplerState::Running;
        let outcome = self.run_schedule(&mut schedule, &mut root);
        self.counts = schedule.counts().clone();
        outcome?;

        for (name, value) in &self.observed {
            match self.trace.get(name) {
                Some(node) if &node.value == value => {}
                _ => return Err(Error::ObservationOverwritten { site: name.clone() }),
            }
        }

        Ok(schedule
            .latent()
            .iter()
            .filter_map(|site| {
                self.trace
                    .get(site)
                    .map(|node| (site.clone(), node.value.clone()))
            })
            .collect())
    }

    /// Run the program once, conditioned on the observations, to discover
    /// the latent sites.
    fn initialize(&mut self, num_steps: u64, root: &mut RandomKey) -> Result<Schedule> {
        let (init_key, rest) = root.split();
        *root = rest;

        let trace = Arc::new(Trace::new());
        let chain = self
            .base
            .stack(Arc::new(ThreadRandomKey::from_key(init_key)))?
            .stack(Arc::new(Condition::new(self.observed.clone())))?
            .stack(trace.clone())?;
        self.program
            .run(&Runtime::new(chain).with_cancel(self.cancel.child()))?;

        let nodes = trace.take();
        if let Some(site) = self.observed.keys().find(|site| !nodes.contains_key(*site)) {
            return Err(Error::UnobservedSite { site: site.clone() });
        }
        let latent = nodes
            .values()
            .filter(|node| !node.observed && !self.observed.contains_key(&node.name))
            .map(|node| node.name.clone())
            .collect_vec();
        debug!(
            latent = latent.len(),
            observed = self.observed.len(),
            "initialized trace"
        );

        self.trace = nodes;
        self.counts = latent.iter().map(|site| (site.clone(), 0)).collect();
        self.state = SamplerState::Initialized;
        let graph = DependencyGraph::from(&self.settings.dependencies);
        Ok(Schedule::new(latent, graph, num_steps))
    }

    fn run_schedule(&mut self, schedule: &mut Schedule, root: &mut RandomKey) -> Result<()> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.num_threads.max(1) + 1) // One more thread because the controller also uses one
            .thread_name(|i| format!("lyro-worker-{}", i))
            .build()?;

        let controller = Controller {
            program: &self.program,
            base: &self.base,
            posterior: self.posterior.as_ref(),
            cancel: &self.cancel,
            poll_interval: self.settings.poll_interval,
        };
        let trace = &mut self.trace;
        pool.scope_fifo(move |scope| controller.run(scope, schedule, trace, root))
    }
}

impl<P: Program + 'static> Gibbs<P> {
    /// Run [`Gibbs::sample`] on a background thread.
    pub fn spawn(mut self, num_steps: u64) -> Sampling<P> {
        let cancel = self.cancel_token();
        let (finished_tx, finished_rx) = sync_channel(1);
        let thread = spawn(move || {
            let result = self.sample(num_steps);
            let _ = finished_tx.send(());
            (self, result)
        });
        Sampling {
            thread,
            finished: finished_rx,
            cancel,
        }
    }
}

type Finished<P> = (Gibbs<P>, Result<IndexMap<String, Value>>);

pub enum SamplingWaitResult<P: Program> {
    Done(Box<Gibbs<P>>, Result<IndexMap<String, Value>>),
    Timeout(Sampling<P>),
}

/// Handle to a sampling call running in the background.
pub struct Sampling<P: Program> {
    thread: JoinHandle<Finished<P>>,
    finished: Receiver<()>,
    cancel: CancelToken,
}

impl<P: Program> Sampling<P> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until sampling ends, handing back the sampler and its result.
    pub fn wait(self) -> Finished<P> {
        match self.thread.join() {
            Ok(finished) => finished,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Cancel and wait for every unit of work to wind down.
    pub fn abort(self) -> Finished<P> {
        self.cancel();
        self.wait()
    }

    pub fn wait_timeout(self, timeout: Duration) -> SamplingWaitResult<P> {
        match self.finished.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let (gibbs, result) = self.wait();
                SamplingWaitResult::Done(Box::new(gibbs), result)
            }
            Err(RecvTimeoutError::Timeout) => SamplingWaitResult::Timeout(self),
        }
    }
}
