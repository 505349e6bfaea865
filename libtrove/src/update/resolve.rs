//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Dependency resolution for a planned job set.
//!
//! Every pass checks the job set against the local database. Unmet
//! requirements are looked up on the install label path one label at a
//! time; whatever a label provides is merged into the job set and the
//! check starts over from the first label. Resolution stops when nothing
//! is missing, when the label path is exhausted, or when a pass reports
//! the same missing requirements as the one before it.

use super::conflict::buckets_compatible;
use super::search::PlannerSource;
use super::{PlanningContext, Result, UpdateJob};
use crate::deps::{DependencySet, Flavor, MergeType};
use crate::job::{Job, JobSet};
use crate::local::{BrokenErase, DepCheckResult, LocalDatabase};
use crate::repository::Repository;
use crate::source::{LayeredSource, TroveSource};
use crate::trove::TroveTuple;
use crate::versions::{Branch, Label};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, trace};

/// What one resolution pass decided
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing is missing
    Done,
    /// Nothing found on the current label; try the next one
    Advance,
    /// Jobs providing missing requirements
    Merge(JobSet),
    /// No further progress is possible
    Exhausted,
}

/// The state of a job set after resolution
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub unsatisfied: Vec<(TroveTuple, DependencySet)>,
    /// Troves that would satisfy a requirer if resolution were automatic
    pub needed: BTreeMap<TroveTuple, BTreeSet<TroveTuple>>,
    pub broken_erasures: Vec<BrokenErase>,
    pub ordering: Option<Vec<Vec<Job>>>,
}

impl Resolution {
    /// Unsatisfied requirements nothing on the label path provides
    pub fn unresolvable(&self) -> Vec<(TroveTuple, DependencySet)> {
        self.unsatisfied
            .iter()
            .filter(|(requirer, _)| !self.needed.contains_key(requirer))
            .cloned()
            .collect()
    }
}

pub(crate) struct Resolver<'a> {
    ctx: &'a PlanningContext,
    db: &'a dyn LocalDatabase,
    repos: &'a dyn Repository,
}

/// `a` beats `b`: better score, newer version, then the smaller flavor
fn better(a: (i32, &TroveTuple), b: (i32, &TroveTuple)) -> bool {
    let order = a
        .0
        .cmp(&b.0)
        .then_with(|| a.1.version.cmp(&b.1.version))
        .then_with(|| b.1.flavor.to_string().cmp(&a.1.flavor.to_string()));
    order == Ordering::Greater
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(ctx: &'a PlanningContext, db: &'a dyn LocalDatabase, repos: &'a dyn Repository) -> Self {
        Resolver { ctx, db, repos }
    }

    /// `flavor` leaning toward the flavor `name` is installed with, when
    /// every installed copy agrees on it
    fn affinity(&self, name: &str, flavor: &Flavor) -> Result<Flavor> {
        let installed = self.db.troves_by_name(name)?;
        let Some(first) = installed.first() else {
            return Ok(flavor.clone());
        };
        if installed.iter().any(|t| t.flavor != first.flavor) {
            return Ok(flavor.clone());
        }
        Ok(flavor
            .merged(&first.flavor, MergeType::Prefs)
            .unwrap_or_else(|_| flavor.clone()))
    }

    /// Pick one provider from `choices`. The first install flavor anything
    /// scores against decides.
    pub(crate) fn select(&self, choices: &[TroveTuple]) -> Result<Option<TroveTuple>> {
        for flavor in self.ctx.install_flavors() {
            let mut best: BTreeMap<(&str, &Branch), (i32, &TroveTuple)> = BTreeMap::new();
            for tuple in choices {
                let flavor = self.affinity(&tuple.name, &flavor)?;
                let Some(score) = flavor.score(&tuple.flavor) else {
                    continue;
                };
                let key = (tuple.name.as_str(), tuple.version.branch());
                match best.get(&key) {
                    Some(&current) if !better((score, tuple), current) => {}
                    _ => {
                        best.insert(key, (score, tuple));
                    }
                }
            }

            let winner = best.into_values().fold(None::<(i32, &TroveTuple)>, |acc, candidate| match acc {
                Some(current) if !better(candidate, current) => Some(current),
                _ => Some(candidate),
            });
            if let Some((_, tuple)) = winner {
                return Ok(Some(tuple.clone()));
            }
        }
        Ok(None)
    }

    /// Providers `label` offers for the unmet requirements, per requirer.
    /// Troves that are installed or already part of `jobs` are never
    /// suggested.
    pub(crate) fn suggest(
        &self,
        jobs: &JobSet,
        unsatisfied: &[(TroveTuple, DependencySet)],
        label: &Label,
    ) -> Result<BTreeMap<TroveTuple, BTreeSet<TroveTuple>>> {
        let dep_sets: Vec<DependencySet> = unsatisfied.iter().map(|(_, deps)| deps.clone()).collect();
        let found = self.repos.resolve_dependencies(label, &dep_sets)?;
        let planned = jobs.new_tuples();

        let mut suggestions: BTreeMap<TroveTuple, BTreeSet<TroveTuple>> = BTreeMap::new();
        for (requirer, deps) in unsatisfied {
            let Some(choices) = found.get(deps) else {
                continue;
            };
            for choice in choices {
                let Some(tuple) = self.select(choice)? else {
                    continue;
                };
                if planned.contains(&tuple) || self.db.has_trove(&tuple)? {
                    trace!("{} already present, not suggesting it", tuple);
                    continue;
                }
                suggestions.entry(requirer.clone()).or_default().insert(tuple);
            }
        }
        Ok(suggestions)
    }

    /// Check `jobs`. A replaced trove whose removal breaks something is
    /// kept when the replacement fits next to it; erasures are never undone.
    pub(crate) fn check(
        &self,
        uj: &UpdateJob,
        jobs: &mut JobSet,
        primary_erases: &BTreeSet<TroveTuple>,
    ) -> Result<DepCheckResult> {
        let repos = PlannerSource::Repository(self.repos);
        let source = LayeredSource::new(vec![&uj.trove_source as &dyn TroveSource, &repos]);

        loop {
            let result = self.db.dep_check(jobs, &source, true)?;
            if result.broken_erasures.is_empty() {
                return Ok(result);
            }

            let mut restored = false;
            for broken in &result.broken_erasures {
                for provider in &broken.provided_by {
                    if primary_erases.contains(provider) {
                        continue;
                    }
                    let Some(job) = jobs
                        .iter()
                        .find(|j| j.old_tuple().as_ref() == Some(provider))
                        .cloned()
                    else {
                        continue;
                    };

                    // plain erasures stay and get reported
                    let Some(new) = job.new_tuple() else {
                        continue;
                    };
                    let trove = source.get_trove(&new)?;
                    if buckets_compatible(self.db, &source, provider, &trove)? {
                        info!("Installing {} next to {}, {} requires it", new, provider, broken.required_by);
                        jobs.remove(&job);
                        jobs.insert(Job::install(&new));
                        restored = true;
                    }
                }
            }

            if !restored {
                return Ok(result);
            }
        }
    }

    /// Decide what to do after a check at label path `position`
    fn next_step(
        &self,
        jobs: &JobSet,
        check: &DepCheckResult,
        position: usize,
        seen: &[Vec<(TroveTuple, DependencySet)>],
        needed: &mut BTreeMap<TroveTuple, BTreeSet<TroveTuple>>,
    ) -> Result<Outcome> {
        if check.unsatisfied.is_empty() {
            return Ok(Outcome::Done);
        }
        if seen.contains(&check.unsatisfied) {
            debug!("Missing requirements did not change, giving up");
            return Ok(Outcome::Exhausted);
        }
        let Some(label) = self.ctx.install_label_path.get(position) else {
            return Ok(Outcome::Exhausted);
        };

        let suggestions = self.suggest(jobs, &check.unsatisfied, label)?;
        if suggestions.is_empty() {
            return Ok(Outcome::Advance);
        }
        if !self.ctx.auto_resolve {
            for (requirer, tuples) in suggestions {
                needed.entry(requirer).or_default().extend(tuples);
            }
            return Ok(Outcome::Advance);
        }

        Ok(Outcome::Merge(
            suggestions.values().flatten().map(Job::absolute).collect(),
        ))
    }

    /// Resolve the requirements of `jobs`, folding suggested troves in with
    /// `merge`
    pub(crate) fn resolve<F>(
        &self,
        uj: &mut UpdateJob,
        jobs: &mut JobSet,
        primary_erases: &BTreeSet<TroveTuple>,
        mut merge: F,
    ) -> Result<Resolution>
    where
        F: FnMut(&mut UpdateJob, JobSet) -> Result<JobSet>,
    {
        let mut position = 0;
        let mut seen: Vec<Vec<(TroveTuple, DependencySet)>> = Vec::new();
        let mut needed = BTreeMap::new();

        let mut pass = 0;
        loop {
            pass += 1;
            let check = self.check(uj, jobs, primary_erases)?;
            debug!(
                "Dependency pass {}: {} unsatisfied, {} broken erasures",
                pass,
                check.unsatisfied.len(),
                check.broken_erasures.len()
            );

            match self.next_step(jobs, &check, position, &seen, &mut needed)? {
                Outcome::Done | Outcome::Exhausted => {
                    return Ok(Resolution {
                        unsatisfied: check.unsatisfied,
                        needed,
                        broken_erasures: check.broken_erasures,
                        ordering: check.ordering,
                    });
                }
                Outcome::Advance => position += 1,
                Outcome::Merge(suggested) => {
                    info!("Resolving dependencies with {} troves", suggested.len());
                    seen.push(check.unsatisfied);
                    let merged = merge(uj, suggested)?;
                    jobs.extend(merged);
                    position = 0;
                }
            }
        }
    }
}
