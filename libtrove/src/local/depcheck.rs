//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Dependency checking of a job set against the installed troves

use crate::deps::{DependencySet, MergeType};
use crate::job::{Job, JobSet};
use crate::source::{Result, SourceError, TroveSource};
use crate::trove::{Trove, TroveTuple};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A surviving trove whose requirements the jobs break
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenErase {
    pub required_by: TroveTuple,
    pub deps: DependencySet,
    /// Removed troves that used to provide `deps`
    pub provided_by: Vec<TroveTuple>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepCheckResult {
    /// Requirements of newly installed troves nothing provides
    pub unsatisfied: Vec<(TroveTuple, DependencySet)>,
    pub broken_erasures: Vec<BrokenErase>,
    /// Jobs grouped into strongly connected components, in the order they
    /// can be applied
    pub ordering: Option<Vec<Vec<Job>>>,
}

impl DepCheckResult {
    pub fn is_clean(&self) -> bool {
        self.unsatisfied.is_empty() && self.broken_erasures.is_empty()
    }
}

/// Each requirement of `trove` as a set of its own
fn requirements(trove: &Trove) -> Vec<DependencySet> {
    trove
        .requires
        .iter()
        .map(|(class, dep)| DependencySet::single(class, dep.clone()))
        .collect()
}

fn provided<'a, I>(providers: I, req: &DependencySet) -> Vec<TroveTuple>
where
    I: IntoIterator<Item = &'a Trove>,
{
    providers
        .into_iter()
        .filter(|t| t.provides.satisfies(req))
        .map(Trove::tuple)
        .collect()
}

fn merge_into(set: &mut DependencySet, req: &DependencySet) {
    // requirements of one trove never conflict with each other
    let _ = set.union(req, MergeType::Override);
}

/// Check `jobs` against the `installed` troves; new troves are read from
/// `source`, falling back to the installed ones.
pub fn dep_check(
    installed: &BTreeMap<TroveTuple, &Trove>,
    jobs: &JobSet,
    source: &dyn TroveSource,
    find_ordering: bool,
) -> Result<DepCheckResult> {
    let removed = jobs.old_tuples();

    let mut added: BTreeMap<TroveTuple, Trove> = BTreeMap::new();
    for tuple in jobs.new_tuples() {
        let trove = match source.get_trove(&tuple) {
            Ok(trove) => trove,
            Err(SourceError::TroveNotFound(_)) => match installed.get(&tuple) {
                Some(trove) => (*trove).clone(),
                None => return Err(SourceError::TroveNotFound(tuple.to_string())),
            },
            Err(e) => return Err(e),
        };
        added.insert(tuple, trove);
    }

    let survivors: Vec<&Trove> = installed
        .iter()
        .filter(|(t, _)| !removed.contains(*t) && !added.contains_key(*t))
        .map(|(_, trove)| *trove)
        .collect();
    let post: Vec<&Trove> = survivors.iter().copied().chain(added.values()).collect();

    let mut result = DepCheckResult::default();

    for (tuple, trove) in &added {
        let mut missing = DependencySet::new();
        for req in requirements(trove) {
            if provided(post.iter().copied(), &req).is_empty() {
                merge_into(&mut missing, &req);
            }
        }
        if !missing.is_empty() {
            result.unsatisfied.push((tuple.clone(), missing));
        }
    }

    let removed_troves: Vec<&Trove> = installed
        .iter()
        .filter(|(t, _)| removed.contains(*t))
        .map(|(_, trove)| *trove)
        .collect();

    for trove in &survivors {
        let mut broken = DependencySet::new();
        let mut providers: BTreeSet<TroveTuple> = BTreeSet::new();
        for req in requirements(trove) {
            let before = provided(removed_troves.iter().copied(), &req);
            if before.is_empty() || !provided(post.iter().copied(), &req).is_empty() {
                continue;
            }
            merge_into(&mut broken, &req);
            providers.extend(before);
        }
        if !broken.is_empty() {
            result.broken_erasures.push(BrokenErase {
                required_by: trove.tuple(),
                deps: broken,
                provided_by: providers.into_iter().collect(),
            });
        }
    }

    debug!(
        "Dependency check of {} jobs: {} unsatisfied, {} broken",
        jobs.len(),
        result.unsatisfied.len(),
        result.broken_erasures.len()
    );

    if find_ordering {
        result.ordering = Some(order_jobs(installed, jobs, &added));
    }

    Ok(result)
}

/// Order jobs so providers are installed before their requirers, members
/// before their collections, and requirers erased before their providers.
fn order_jobs(
    installed: &BTreeMap<TroveTuple, &Trove>,
    jobs: &JobSet,
    added: &BTreeMap<TroveTuple, Trove>,
) -> Vec<Vec<Job>> {
    let jobs: Vec<&Job> = jobs.iter().collect();
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..jobs.len()).map(|i| graph.add_node(i)).collect();

    let new_trove = |job: &Job| job.new_tuple().and_then(|t| added.get(&t));
    let erased_trove = |job: &Job| {
        if job.is_erase() {
            job.old_tuple().and_then(|t| installed.get(&t).copied())
        } else {
            None
        }
    };

    for (a, job_a) in jobs.iter().enumerate() {
        for (b, job_b) in jobs.iter().enumerate() {
            if a == b {
                continue;
            }

            if let (Some(provider), Some(requirer)) = (new_trove(job_a), new_trove(job_b)) {
                let needed = requirements(requirer)
                    .iter()
                    .any(|req| provider.provides.satisfies(req));
                if needed || (requirer.is_collection() && requirer.has_trove(&provider.tuple())) {
                    graph.add_edge(nodes[a], nodes[b], ());
                }
            }

            if let (Some(requirer), Some(provider)) = (erased_trove(job_a), erased_trove(job_b)) {
                if requirements(requirer)
                    .iter()
                    .any(|req| provider.provides.satisfies(req))
                {
                    graph.add_edge(nodes[a], nodes[b], ());
                }
            }
        }
    }

    // components come out in reverse topological order
    let mut ordering: Vec<Vec<Job>> = tarjan_scc(&graph)
        .into_iter()
        .map(|component| {
            let mut group: Vec<Job> = component
                .into_iter()
                .map(|n| jobs[graph[n]].clone())
                .collect();
            group.sort();
            group
        })
        .collect();
    ordering.reverse();
    ordering
}
