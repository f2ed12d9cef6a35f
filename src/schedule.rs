//! Bookkeeping for the resampling scheduler.
//!
//! [`Schedule`] decides which site to resample next. It knows nothing about
//! threads: the controller in [`crate::sampler`] calls [`Schedule::start`]
//! when it launches a unit of work and [`Schedule::finish`] when one returns.

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
};

use indexmap::{IndexMap, IndexSet};

/// Which latent sites must not be resampled at the same time.
#[derive(Debug, Clone, Default)]
pub enum Dependencies {
    /// Every latent site depends on every other one. Resampling is serial.
    #[default]
    Complete,
    /// No two sites depend on each other.
    Independent,
    /// Markov blankets by site name. Edges are made symmetric.
    Explicit(HashMap<String, Vec<String>>),
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    complete: bool,
    edges: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn complete() -> Self {
        Self {
            complete: true,
            edges: HashMap::new(),
        }
    }

    pub fn independent() -> Self {
        Self {
            complete: false,
            edges: HashMap::new(),
        }
    }

    pub fn explicit<'a>(edges: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut graph = Self::independent();
        for (a, b) in edges {
            graph.link(a, b);
        }
        graph
    }

    fn link(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.edges
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string());
        self.edges
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string());
    }

    pub fn depends(&self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        self.complete || self.edges.get(a).is_some_and(|blanket| blanket.contains(b))
    }
}

impl From<&Dependencies> for DependencyGraph {
    fn from(deps: &Dependencies) -> Self {
        match deps {
            Dependencies::Complete => Self::complete(),
            Dependencies::Independent => Self::independent(),
            Dependencies::Explicit(blankets) => Self::explicit(blankets.iter().flat_map(
                |(site, blanket)| blanket.iter().map(move |other| (site.as_str(), other.as_str())),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    graph: DependencyGraph,
    /// Latent sites in discovery order. Later sites win ties.
    latent: IndexSet<String>,
    counts: IndexMap<String, u64>,
    in_flight: IndexSet<String>,
    pending: u64,
}

impl Schedule {
    pub fn new(latent: impl IntoIterator<Item = String>, graph: DependencyGraph, budget: u64) -> Self {
        let latent: IndexSet<String> = latent.into_iter().collect();
        let counts = latent.iter().map(|site| (site.clone(), 0)).collect();
        Self {
            graph,
            latent,
            counts,
            in_flight: IndexSet::new(),
            pending: budget,
        }
    }

    /// Register a site first seen after initialization.
    pub fn add_site(&mut self, site: &str) {
        if self.latent.insert(site.to_string()) {
            self.counts.insert(site.to_string(), 0);
        }
    }

    pub fn latent(&self) -> &IndexSet<String> {
        &self.latent
    }

    pub fn counts(&self) -> &IndexMap<String, u64> {
        &self.counts
    }

    pub fn in_flight(&self) -> &IndexSet<String> {
        &self.in_flight
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn is_done(&self) -> bool {
        self.pending == 0 && self.in_flight.is_empty()
    }

    fn is_feasible(&self, site: &str) -> bool {
        !self.in_flight.contains(site)
            && !self
                .in_flight
                .iter()
                .any(|running| self.graph.depends(site, running))
    }

    /// The next site to resample, if any is feasible.
    ///
    /// Among feasible sites the one with the fewest completed steps wins,
    /// ties going to the most recently discovered site.
    pub fn find_work(&self) -> Option<String> {
        if self.pending == 0 {
            return None;
        }
        self.latent
            .iter()
            .enumerate()
            .filter(|(_, site)| self.is_feasible(site))
            .min_by_key(|(order, site)| (self.counts[site.as_str()], Reverse(*order)))
            .map(|(_, site)| site.clone())
    }

    pub fn start(&mut self, site: &str) {
        debug_assert!(self.is_feasible(site), "site {site} is not feasible");
        self.pending = self.pending.saturating_sub(1);
        self.in_flight.insert(site.to_string());
        debug_assert!(!self.has_conflict());
    }

    /// Record a completed step.
    pub fn finish(&mut self, site: &str) {
        if self.in_flight.shift_remove(site) {
            *self.counts.entry(site.to_string()).or_default() += 1;
        }
    }

    /// Drop an in-flight site without counting a step.
    pub fn abandon(&mut self, site: &str) {
        self.in_flight.shift_remove(site);
    }

    /// Stop scheduling: no new work will be found.
    pub fn drain(&mut self) {
        self.pending = 0;
    }

    /// Forget all in-flight work and the remaining budget.
    pub fn cancel_all(&mut self) -> Vec<String> {
        self.pending = 0;
        self.in_flight.drain(..).collect()
    }

    fn has_conflict(&self) -> bool {
        self.in_flight.iter().enumerate().any(|(i, a)| {
            self.in_flight
                .iter()
                .skip(i + 1)
                .any(|b| self.graph.depends(a, b))
        })
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn sites(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    #[test]
    fn complete_graph_is_serial_and_fair() {
        let mut schedule = Schedule::new(sites(3), DependencyGraph::complete(), 7);
        let mut order = vec![];
        while let Some(site) = schedule.find_work() {
            schedule.start(&site);
            assert_eq!(schedule.find_work(), None);
            schedule.finish(&site);
            order.push(site);
        }
        assert_eq!(order, vec!["s2", "s1", "s0", "s2", "s1", "s0", "s2"]);
        assert!(schedule.is_done());
        assert_eq!(schedule.counts().values().copied().collect_vec(), vec![2, 2, 3]);
    }

    #[test]
    fn independent_sites_run_together() {
        let mut schedule = Schedule::new(sites(3), DependencyGraph::independent(), 10);
        while let Some(site) = schedule.find_work() {
            schedule.start(&site);
        }
        assert_eq!(schedule.in_flight().len(), 3);
        assert_eq!(schedule.pending(), 7);
    }

    #[test]
    fn explicit_edges_are_symmetric() {
        let mut blankets = HashMap::new();
        blankets.insert("a".to_string(), vec!["b".to_string()]);
        let graph = DependencyGraph::from(&Dependencies::Explicit(blankets));
        assert!(graph.depends("a", "b"));
        assert!(graph.depends("b", "a"));
        assert!(!graph.depends("a", "c"));
        assert!(!graph.depends("a", "a"));

        let latent = ["a", "b", "c"].map(String::from);
        let mut schedule = Schedule::new(latent, graph, 10);
        let first = schedule.find_work().unwrap();
        assert_eq!(first, "c");
        schedule.start(&first);
        let second = schedule.find_work().unwrap();
        assert_eq!(second, "b");
        schedule.start(&second);
        assert_eq!(schedule.find_work(), None);
        schedule.finish("b");
        assert_eq!(schedule.find_work().as_deref(), Some("a"));
    }

    #[test]
    fn budget_may_outlive_feasibility() {
        let mut schedule = Schedule::new(sites(2), DependencyGraph::complete(), 5);
        let site = schedule.find_work().unwrap();
        schedule.start(&site);
        assert_eq!(schedule.find_work(), None);
        assert_eq!(schedule.pending(), 4);
        assert!(!schedule.is_done());
    }

    #[test]
    fn new_sites_take_priority() {
        let mut schedule = Schedule::new(sites(2), DependencyGraph::complete(), 5);
        schedule.add_site("late");
        schedule.add_site("late");
        assert_eq!(schedule.latent().len(), 3);
        assert_eq!(schedule.find_work().as_deref(), Some("late"));
    }

    #[test]
    fn cancel_clears_everything() {
        let mut schedule = Schedule::new(sites(4), DependencyGraph::independent(), 10);
        while let Some(site) = schedule.find_work() {
            schedule.start(&site);
        }
        let cancelled = schedule.cancel_all();
        assert_eq!(cancelled.len(), 4);
        assert!(schedule.is_done());
        assert!(schedule.counts().values().all(|&count| count == 0));
    }

    fn graph_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (2usize..8).prop_flat_map(|n| {
            (
                Just(n),
                proptest::collection::vec((0..n, 0..n), 0..(n * n)),
            )
        })
    }

    proptest! {
        #[test]
        fn never_runs_dependent_sites_together(
            (n, edges) in graph_strategy(),
            budget in 0u64..40,
            choices in proptest::collection::vec(any::<(bool, usize)>(), 0..200),
        ) {
            let names = sites(n);
            let graph = DependencyGraph::explicit(
                edges.iter().map(|&(a, b)| (names[a].as_str(), names[b].as_str())),
            );
            let mut schedule = Schedule::new(names.clone(), graph, budget);
            let mut started = 0u64;

            for (start, pick) in choices {
                let in_flight = schedule.in_flight().iter().cloned().collect_vec();
                if start || in_flight.is_empty() {
                    if let Some(site) = schedule.find_work() {
                        schedule.start(&site);
                        started += 1;
                    }
                } else {
                    schedule.finish(&in_flight[pick % in_flight.len()]);
                }
                prop_assert!(!schedule.has_conflict());
            }

            // Drain what is left; the schedule must terminate.
            loop {
                while let Some(site) = schedule.find_work() {
                    schedule.start(&site);
                    started += 1;
                    prop_assert!(!schedule.has_conflict());
                }
                let Some(site) = schedule.in_flight().first().cloned() else {
                    break;
                };
                schedule.finish(&site);
            }
            prop_assert!(schedule.is_done());
            prop_assert_eq!(started, budget);
            prop_assert_eq!(schedule.counts().values().sum::<u64>(), budget);
        }

        #[test]
        fn complete_graph_keeps_counts_level(n in 1usize..6, budget in 0u64..30) {
            let mut schedule = Schedule::new(sites(n), DependencyGraph::complete(), budget);
            while let Some(site) = schedule.find_work() {
                schedule.start(&site);
                prop_assert_eq!(schedule.in_flight().len(), 1);
                schedule.finish(&site);
                let counts = schedule.counts().values().copied().collect_vec();
                let spread = counts.iter().max().unwrap() - counts.iter().min().unwrap();
                prop_assert!(spread <= 1);
            }
        }
    }
}
