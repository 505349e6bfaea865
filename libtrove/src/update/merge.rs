//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Expansion of primary jobs into the complete job set.
//!
//! Collections are merged against their local view so that members the
//! administrator removed stay removed and new members arrive only when
//! they install by default. Every member change becomes a job of its own
//! and is expanded in turn. Absolute jobs are then rooted against what is
//! installed and the erase jobs are handed to the erasure graph.

use super::conflict;
use super::erasure::find_erasures;
use super::redirect::RedirectMap;
use super::search::PlannerSource;
use super::{PlanningContext, Result, UpdateError, UpdateJob};
use crate::job::{Job, JobSet, PinMapping};
use crate::local::LocalDatabase;
use crate::source::{LayeredSource, SourceError, TroveSource};
use crate::trove::{is_collection_name, is_excluded, match_troves, Trove, TroveChange, TroveTuple};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, trace};

struct Queued {
    job: Job,
    /// Pins may be ignored for this job
    ignore_pin: bool,
    /// The old side is pinned
    pinned: bool,
    /// Some primary job above this one installed absolutely
    absolute_ancestry: bool,
}

pub(crate) struct Merger<'a> {
    ctx: &'a PlanningContext,
    db: &'a dyn LocalDatabase,
    redirects: &'a RedirectMap,
}

impl<'a> Merger<'a> {
    pub(crate) fn new(ctx: &'a PlanningContext, db: &'a dyn LocalDatabase, redirects: &'a RedirectMap) -> Self {
        Merger { ctx, db, redirects }
    }

    /// A new trove from the planning pass, or the installed copy
    fn trove(&self, uj: &UpdateJob, tuple: &TroveTuple) -> Result<Trove> {
        match uj.trove_source.get_trove(tuple) {
            Ok(trove) => Ok(trove),
            Err(SourceError::TroveNotFound(_)) => Ok(self.db.get_installed_trove(tuple, true)?),
            Err(e) => Err(e.into()),
        }
    }

    fn pinned(&self, tuples: &[TroveTuple]) -> Result<BTreeSet<TroveTuple>> {
        let flags = self.db.troves_are_pinned(tuples)?;
        Ok(tuples
            .iter()
            .zip(flags)
            .filter(|(_, pinned)| *pinned)
            .map(|(t, _)| t.clone())
            .collect())
    }

    /// True when `new` can be installed next to the installed `old`
    fn buckets_compatible(&self, uj: &UpdateJob, old: &TroveTuple, new: &Trove) -> Result<bool> {
        let local = PlannerSource::Local(self.db);
        let source = LayeredSource::new(vec![&uj.trove_source as &dyn TroveSource, &local]);
        Ok(conflict::buckets_compatible(self.db, &source, old, new)?)
    }

    /// True when `tuple` is there only because of a redirect whose sources
    /// are not installed
    fn orphaned_redirect_target(&self, tuple: &TroveTuple) -> bool {
        self.redirects
            .get(&Some(tuple.clone()))
            .is_some_and(|sources| sources.is_empty())
    }

    /// The starting point for a collection that is not installed yet: an
    /// empty old trove and a local view without the members that would not
    /// be installed
    fn new_base(&self, new: &Trove) -> Result<(Trove, Trove)> {
        let old = Trove::skeleton(&new.tuple());
        let mut local = new.clone();
        for member in new.iter_troves() {
            if !new.include_by_default(member)
                || is_excluded(&member.name, &self.ctx.exclude_troves)
                || self.orphaned_redirect_target(member)
            {
                local.del_trove(member);
            }
        }
        Ok((old, local))
    }

    /// Expand `primaries` into every job they imply
    pub(crate) fn merge(
        &self,
        uj: &mut UpdateJob,
        primaries: &JobSet,
        ineligible: &BTreeSet<TroveTuple>,
        recurse: bool,
        ignore_primary_pins: bool,
    ) -> Result<JobSet> {
        debug!("Merging {} primary jobs", primaries.len());
        let mut new_jobs = JobSet::new();
        let mut primary_erases: Vec<TroveTuple> = Vec::new();
        let mut to_outdate: Vec<TroveTuple> = Vec::new();

        for job in primaries {
            match (job.old_tuple(), job.new_tuple()) {
                (_, Some(new)) if job.is_absolute() => to_outdate.push(new),
                (Some(old), None) => primary_erases.push(old),
                _ => {}
            }
        }

        let redirected: BTreeSet<TroveTuple> = self.redirects.values().flatten().cloned().collect();
        let mut excluded = ineligible.clone();
        excluded.extend(redirected.iter().cloned());
        let outdated = self.db.outdated_troves(&to_outdate, &excluded)?;

        for tuple in &redirected {
            new_jobs.insert(Job::erase(tuple));
        }

        // primaries start out rooted; members inherit absoluteness instead
        let mut queue: Vec<Queued> = Vec::new();
        for job in primaries {
            let absolute_ancestry = job.is_absolute();
            let job = match job.new_tuple() {
                Some(new) if absolute_ancestry => match outdated.get(&new) {
                    Some(old) => job
                        .rooted(old.as_ref().map(TroveTuple::version_flavor))
                        .unwrap_or_else(|| job.clone()),
                    // installed already
                    None => Job::update(&new, &new),
                },
                _ => job.clone(),
            };
            queue.push(Queued {
                job,
                ignore_pin: ignore_primary_pins,
                pinned: false,
                absolute_ancestry,
            });
        }
        let olds: Vec<TroveTuple> = queue.iter().filter_map(|q| q.job.old_tuple()).collect();
        let pinned = self.pinned(&olds)?;
        for queued in &mut queue {
            queued.pinned = queued.job.old_tuple().is_some_and(|old| pinned.contains(&old));
        }

        let mut referenced: BTreeSet<TroveTuple> = BTreeSet::new();

        while let Some(Queued {
            job,
            ignore_pin,
            pinned,
            absolute_ancestry,
        }) = queue.pop()
        {
            let old = job.old_tuple();
            let new = job.new_tuple();

            // already installed; only its members may need work
            if old.is_some() && old == new {
                if let Some(tuple) = old.as_ref().filter(|_| recurse) {
                    let installed = self.db.get_installed_trove(tuple, false)?;
                    for member in installed.iter_troves() {
                        referenced.insert(member.clone());
                        queue.push(Queued {
                            job: Job::update(member, member),
                            ignore_pin,
                            pinned: false,
                            absolute_ancestry,
                        });
                    }
                }
                continue;
            }

            trace!("Merging {}", job);
            let new_pristine = match &new {
                Some(tuple) => Some(self.trove(uj, tuple)?),
                None => None,
            };

            // the trove as it will be installed, and the member changes
            // that takes
            let (new_trove, mut needed): (Option<Trove>, Vec<TroveChange>) = match (&old, new_pristine) {
                (None, None) => continue,
                (Some(old), None) => {
                    let local = self.db.get_installed_trove(old, false)?;
                    (None, Trove::skeleton(old).diff(Some(&local)))
                }
                (_, Some(pristine)) if !is_collection_name(job.name()) => (Some(pristine), Vec::new()),
                (None, Some(pristine)) => {
                    let (skeleton, local) = self.new_base(&pristine)?;
                    let merged = pristine.merge_collections(&local, &pristine, &self.ctx.exclude_troves);
                    let needed = merged.diff(Some(&skeleton));
                    uj.local_members
                        .insert(merged.tuple(), merged.iter_troves().cloned().collect());
                    (Some(merged), needed)
                }
                (Some(old), Some(pristine)) => {
                    let old_pristine = self.db.get_installed_trove(old, true)?;
                    let local = self.db.get_installed_trove(old, false)?;
                    let merged = old_pristine.merge_collections(&local, &pristine, &self.ctx.exclude_troves);
                    let needed = merged.diff(Some(&local));
                    uj.local_members
                        .insert(merged.tuple(), merged.iter_troves().cloned().collect());
                    (Some(merged), needed)
                }
            };

            match (&old, &new_trove) {
                (Some(old), None) if pinned && !ignore_pin => {
                    debug!("Not erasing pinned trove {}", old);
                    continue;
                }
                (Some(old), Some(trove)) if pinned => {
                    if self.buckets_compatible(uj, old, trove)? {
                        info!("Installing {} next to pinned {}", trove.tuple(), old);
                        new_jobs.insert(Job::install(&trove.tuple()));
                        needed = trove.diff(None);
                    } else if !ignore_pin {
                        let mapping = PinMapping {
                            name: job.name().to_string(),
                            pinned: old.version_flavor(),
                            needed: trove.tuple().version_flavor(),
                        };
                        info!("Keeping {}", mapping);
                        uj.pin_mappings.insert(mapping);
                        continue;
                    } else {
                        new_jobs.insert(job.clone());
                    }
                }
                _ => {
                    new_jobs.insert(job.clone());
                }
            }

            if !recurse {
                continue;
            }

            let mut already_installed: BTreeSet<TroveTuple> = BTreeSet::new();
            if let Some(trove) = &new_trove {
                let members: Vec<TroveTuple> = trove.iter_troves().cloned().collect();
                let present = self.db.has_troves(&members)?;
                for (member, present) in members.into_iter().zip(present) {
                    if present {
                        already_installed.insert(member.clone());
                    }
                    referenced.insert(member);
                }
            }

            // only a pinned trove passes ignored pins on to its members
            let ignore_pin = ignore_pin && pinned;
            let member_olds: Vec<TroveTuple> = needed.iter().filter_map(TroveChange::old_tuple).collect();
            let pinned_members = self.pinned(&member_olds)?;

            for change in needed {
                let old_member = change.old_tuple();
                let member_pinned = old_member.as_ref().is_some_and(|t| pinned_members.contains(t));

                match change.new_tuple() {
                    Some(new_member) if already_installed.contains(&new_member) => {
                        if let Some(old_member) = &old_member {
                            queue.push(Queued {
                                job: Job::erase(old_member),
                                ignore_pin,
                                pinned: member_pinned,
                                absolute_ancestry,
                            });
                        }
                        queue.push(Queued {
                            job: Job::update(&new_member, &new_member),
                            ignore_pin,
                            pinned: false,
                            absolute_ancestry,
                        });
                    }
                    new_member => {
                        let absolute = old_member.is_none() && absolute_ancestry;
                        let child = Job::from_sides(
                            &change.name,
                            change.old.clone(),
                            new_member.map(|t| t.version_flavor()),
                            absolute,
                        );
                        if let Some(child) = child {
                            queue.push(Queued {
                                job: child,
                                ignore_pin,
                                pinned: member_pinned,
                                absolute_ancestry,
                            });
                        }
                    }
                }
            }
        }

        self.remove_duplicate_erasures(&mut new_jobs)?;
        self.root_absolute_jobs(uj, &mut new_jobs, ineligible, &referenced, &redirected)?;
        remove_duplicate_additions(&mut new_jobs)?;

        let erasures = find_erasures(self.db, &primary_erases, &new_jobs, &referenced)?;
        new_jobs.retain(|job| !job.is_erase());
        new_jobs.extend(erasures);
        match_relative_updates(&mut new_jobs);

        debug!("Merge produced {} jobs", new_jobs.len());
        Ok(new_jobs)
    }

    /// Make sure no installed trove is replaced by more than one job
    fn remove_duplicate_erasures(&self, jobs: &mut JobSet) -> Result<()> {
        let mut by_old: BTreeMap<TroveTuple, Vec<Job>> = BTreeMap::new();
        for job in jobs.iter() {
            if let (Some(old), Some(_)) = (job.old_tuple(), job.new_side()) {
                by_old.entry(old).or_default().push(job.clone());
            }
        }

        let mut ineligible = BTreeSet::new();
        let mut new_items = Vec::new();
        for (old, claims) in by_old {
            if claims.len() == 1 {
                ineligible.insert(old);
                continue;
            }
            for job in claims {
                new_items.extend(job.new_tuple());
                jobs.remove(&job);
            }
        }
        if new_items.is_empty() {
            return Ok(());
        }

        debug!("Re-matching {} troves replacing the same trove", new_items.len());
        for (new, old) in self.db.outdated_troves(&new_items, &ineligible)? {
            if let Some(job) = Job::from_sides(
                &new.name,
                old.as_ref().map(TroveTuple::version_flavor),
                Some(new.version_flavor()),
                false,
            ) {
                jobs.insert(job);
            }
            if let Some(old) = old {
                jobs.remove(&Job::erase(&old));
            }
        }
        Ok(())
    }

    /// Turn the remaining absolute jobs into installs and updates of what
    /// is installed. Pinned troves are never replaced; the new trove goes
    /// next to a pinned one when their buckets allow it.
    fn root_absolute_jobs(
        &self,
        uj: &UpdateJob,
        jobs: &mut JobSet,
        ineligible: &BTreeSet<TroveTuple>,
        referenced: &BTreeSet<TroveTuple>,
        redirected: &BTreeSet<TroveTuple>,
    ) -> Result<()> {
        let absolute: Vec<TroveTuple> = jobs
            .iter()
            .filter(|j| j.is_absolute())
            .filter_map(Job::new_tuple)
            .collect();
        if absolute.is_empty() {
            return Ok(());
        }

        // troves another job erases or replaces cannot be claimed again
        let mut excluded: BTreeSet<TroveTuple> = jobs.iter().filter_map(Job::old_tuple).collect();
        excluded.extend(ineligible.iter().cloned());
        excluded.extend(referenced.iter().cloned());
        excluded.extend(redirected.iter().cloned());

        let outdated = self.db.outdated_troves(&absolute, &excluded)?;
        jobs.retain(|j| !j.is_absolute());

        let mut replaced: Vec<(TroveTuple, TroveTuple)> = Vec::new();
        for (new, old) in outdated {
            match old {
                None => {
                    jobs.insert(Job::install(&new));
                }
                Some(old) => replaced.push((new, old)),
            }
        }

        let olds: Vec<TroveTuple> = replaced.iter().map(|(_, old)| old.clone()).collect();
        let pinned = self.pinned(&olds)?;
        for (new, old) in replaced {
            if !pinned.contains(&old) {
                jobs.insert(Job::update(&old, &new));
                jobs.remove(&Job::erase(&old));
                continue;
            }

            let trove = self.trove(uj, &new)?;
            if self.buckets_compatible(uj, &old, &trove)? {
                info!("Installing {} next to pinned {}", new, old);
                jobs.insert(Job::install(&new));
            } else {
                info!("Not replacing pinned {} with {}", old, new);
            }
        }
        Ok(())
    }
}

/// The same trove added by several jobs keeps only the job that replaces
/// something
fn remove_duplicate_additions(jobs: &mut JobSet) -> Result<()> {
    let mut additions: BTreeMap<TroveTuple, Vec<Job>> = BTreeMap::new();
    for job in jobs.iter() {
        if let Some(new) = job.new_tuple() {
            additions.entry(new).or_default().push(job.clone());
        }
    }

    for (new, claims) in additions {
        if claims.len() < 2 {
            continue;
        }
        let (fresh, relative): (Vec<Job>, Vec<Job>) =
            claims.into_iter().partition(|j| j.old_side().is_none());
        if relative.len() > 1 {
            return Err(UpdateError::DuplicateAddition(new.to_string()));
        }
        if !relative.is_empty() {
            for job in &fresh {
                jobs.remove(job);
            }
        }
    }
    Ok(())
}

/// Pair plain installs with the erasures the graph settled on into updates
fn match_relative_updates(jobs: &mut JobSet) {
    let mut olds = BTreeSet::new();
    let mut news = BTreeSet::new();
    jobs.retain(|job| match (job.old_tuple(), job.new_tuple()) {
        (Some(_), Some(_)) => true,
        (Some(old), None) => {
            olds.insert(old);
            false
        }
        (None, Some(new)) => {
            news.insert(new);
            false
        }
        (None, None) => false,
    });

    for change in match_troves(&olds, &news) {
        if let Some(job) = Job::from_sides(&change.name, change.old, change.new, false) {
            jobs.insert(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::Flavor;
    use crate::versions::Version;

    fn tuple(name: &str, version: &str) -> TroveTuple {
        TroveTuple::new(
            name,
            Version::parse(&format!("/localhost@rpl:devel/{}", version)).unwrap(),
            Flavor::new(),
        )
    }

    #[test]
    fn test_match_relative_updates() {
        let mut jobs: JobSet = [
            Job::erase(&tuple("foo:lib", "1.0-1-1")),
            Job::install(&tuple("foo:lib", "2.0-1-1")),
            Job::install(&tuple("bar:lib", "1.0-1-1")),
        ]
        .into_iter()
        .collect();
        match_relative_updates(&mut jobs);

        let expected: JobSet = [
            Job::update(&tuple("foo:lib", "1.0-1-1"), &tuple("foo:lib", "2.0-1-1")),
            Job::install(&tuple("bar:lib", "1.0-1-1")),
        ]
        .into_iter()
        .collect();
        assert_eq!(jobs, expected);
    }

    #[test]
    fn test_duplicate_additions_prefer_updates() {
        let new = tuple("foo:lib", "2.0-1-1");
        let mut jobs: JobSet = [
            Job::install(&new),
            Job::update(&tuple("foo:lib", "1.0-1-1"), &new),
        ]
        .into_iter()
        .collect();
        remove_duplicate_additions(&mut jobs).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs.iter().all(|j| j.old_side().is_some()));

        let mut jobs: JobSet = [
            Job::update(&tuple("foo:lib", "1.0-1-1"), &new),
            Job::update(&tuple("foo:lib", "1.5-1-1"), &new),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            remove_duplicate_additions(&mut jobs),
            Err(UpdateError::DuplicateAddition(_))
        ));
    }
}
