//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::conflict::check_bucket_conflicts;
use super::item::{ChangeItem, UpdateItem};
use super::merge::Merger;
use super::redirect::process_redirects;
use super::resolve::{Resolution, Resolver};
use super::search::PlannerSource;
use super::split::split_jobs;
use super::{PlanningContext, Result, UpdateError, UpdateJob, UpdateOptions};
use crate::deps::{Flavor, MergeType};
use crate::job::{Job, JobSet};
use crate::local::LocalDatabase;
use crate::repository::Repository;
use crate::source::{ChangeSet, ChangeSetTroveSource, LayeredSource, SourceError, TroveSource, TroveSpec};
use crate::trove::TroveTuple;
use crate::versions::Label;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Turns requested changes into an [`UpdateJob`]
pub struct UpdatePlanner<'a> {
    ctx: &'a PlanningContext,
    db: &'a dyn LocalDatabase,
    repos: &'a dyn Repository,
}

impl<'a> UpdatePlanner<'a> {
    pub fn new(ctx: &'a PlanningContext, db: &'a dyn LocalDatabase, repos: &'a dyn Repository) -> Self {
        UpdatePlanner { ctx, db, repos }
    }

    /// Where requested troves are looked up
    fn search_source(&self, options: &UpdateOptions) -> Result<PlannerSource<'a>> {
        if !options.from_changesets.is_empty() {
            let mut source = ChangeSetTroveSource::new();
            for cs in &options.from_changesets {
                source.add_change_set(cs);
            }
            return Ok(PlannerSource::ChangeSets(source));
        }
        if options.sync {
            return Ok(PlannerSource::referenced(self.db, self.repos)?);
        }
        Ok(PlannerSource::Repository(self.repos))
    }

    /// Label path and flavors leaning toward what is installed of `name`.
    /// `None` when nothing of that name is installed.
    fn affinity(&self, name: &str) -> Result<Option<(Vec<Label>, Vec<Flavor>)>> {
        let installed = self.db.troves_by_name(name)?;
        let Some(first) = installed.first() else {
            return Ok(None);
        };

        let mut label_path: Vec<Label> = Vec::new();
        for tuple in &installed {
            let label = tuple.version.trailing_label();
            if !label_path.contains(label) {
                label_path.push(label.clone());
            }
        }
        for label in &self.ctx.install_label_path {
            if !label_path.contains(label) {
                label_path.push(label.clone());
            }
        }

        let flavors = if installed.iter().all(|t| t.flavor == first.flavor) {
            self.ctx
                .install_flavors()
                .into_iter()
                .map(|f| f.merged(&first.flavor, MergeType::Prefs).unwrap_or(f))
                .collect()
        } else {
            self.ctx.install_flavors()
        };
        Ok(Some((label_path, flavors)))
    }

    /// Find the new troves for `spec`
    fn find_new(
        &self,
        search: &PlannerSource,
        spec: &TroveSpec,
        use_affinity: bool,
    ) -> Result<Vec<TroveTuple>> {
        let specs = std::slice::from_ref(spec);
        if use_affinity {
            if let Some((label_path, flavors)) = self.affinity(&spec.name)? {
                match search.find_troves(&label_path, specs, &flavors) {
                    Ok(mut found) => return Ok(found.remove(spec).unwrap_or_default()),
                    Err(SourceError::TroveNotFound(_)) => {
                        debug!("Nothing near the installed {}, using the label path", spec.name)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        let mut found = search.find_troves(&self.ctx.install_label_path, specs, &self.ctx.install_flavors())?;
        Ok(found.remove(spec).unwrap_or_default())
    }

    fn find_installed(&self, spec: &TroveSpec) -> Result<Vec<TroveTuple>> {
        let mut found = self.db.find_troves(&[], std::slice::from_ref(spec), &[])?;
        Ok(found.remove(spec).unwrap_or_default())
    }

    /// Jobs for one requested change
    fn item_jobs(
        &self,
        search: &PlannerSource,
        item: &UpdateItem,
        options: &UpdateOptions,
    ) -> Result<JobSet> {
        let (need_old, need_new) = item.needs(options.update_by_default);
        let mut jobs = JobSet::new();

        let olds = if need_old {
            self.find_installed(&item.old.spec(&item.name))?
        } else {
            Vec::new()
        };

        if !need_new {
            if olds.len() > 2 {
                return Err(UpdateError::AmbiguousSpec(item.to_string()));
            }
            jobs.extend(olds.iter().map(Job::erase));
            return Ok(jobs);
        }
        if olds.len() > 1 {
            return Err(UpdateError::AmbiguousSpec(item.to_string()));
        }

        let use_affinity = item.absolute && !options.keep_existing && search.uses_affinity();
        let news = self.find_new(search, &item.new.spec(&item.name), use_affinity)?;
        if need_old && news.len() > 1 {
            return Err(UpdateError::AmbiguousSpec(item.to_string()));
        }

        for new in &news {
            let job = match olds.first() {
                Some(old) => Job::update(old, new),
                None if item.absolute => Job::absolute(new),
                None => Job::install(new),
            };
            jobs.insert(job);
        }
        Ok(jobs)
    }

    /// Primary jobs a changeset asks for
    fn change_set_jobs(cs: &ChangeSet, keep_existing: bool) -> JobSet {
        let jobs: JobSet = if cs.is_absolute() {
            cs.primary_jobs()
        } else {
            let primaries: BTreeSet<TroveTuple> = cs.primary_tuples().into_iter().collect();
            cs.jobs
                .iter()
                .filter(|j| j.new_tuple().map_or(true, |t| primaries.contains(&t)))
                .cloned()
                .collect()
        };
        if !keep_existing {
            return jobs;
        }
        jobs.into_iter()
            .map(|job| match job.new_tuple() {
                Some(new) if job.is_absolute() => Job::install(&new),
                _ => job,
            })
            .collect()
    }

    /// Load the new troves of `jobs`, follow redirects and expand the
    /// result into the complete job set
    #[allow(clippy::too_many_arguments)]
    fn merge_jobs(
        &self,
        uj: &mut UpdateJob,
        search: &PlannerSource,
        mut jobs: JobSet,
        walk: JobSet,
        ineligible: &BTreeSet<TroveTuple>,
        recurse: bool,
        ignore_primary_pins: bool,
    ) -> Result<(JobSet, JobSet)> {
        let repos = PlannerSource::Repository(self.repos);
        let load_source = LayeredSource::new(vec![search as &dyn TroveSource, &repos]);

        let missing: JobSet = jobs
            .iter()
            .filter(|j| j.new_tuple().is_some_and(|t| !uj.trove_source.contains(&t)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let cs = ChangeSet::from_jobs(&load_source, &missing, recurse)?;
            debug!("Loaded {} troves", cs.troves.len());
            uj.trove_source.add_change_set(&cs);
        }

        let redirects = process_redirects(
            self.ctx,
            self.db,
            &load_source,
            &mut uj.trove_source,
            &mut jobs,
            recurse,
        )?;

        let mut primaries = jobs.clone();
        primaries.extend(walk);
        let merged = Merger::new(self.ctx, self.db, &redirects).merge(
            uj,
            &primaries,
            ineligible,
            recurse,
            ignore_primary_pins,
        )?;
        Ok((jobs, merged))
    }

    /// Resolve `items` into the complete job set and record the primary
    /// jobs in `uj`
    pub fn update_change_set(
        &self,
        uj: &mut UpdateJob,
        items: &[ChangeItem],
        options: &UpdateOptions,
    ) -> Result<JobSet> {
        let search = self.search_source(options)?;

        let mut jobs = JobSet::new();
        let mut change_set_jobs = JobSet::new();
        for item in items {
            match item {
                ChangeItem::Trove(item) => jobs.extend(self.item_jobs(&search, item, options)?),
                ChangeItem::ChangeSet(cs) => {
                    uj.trove_source.add_change_set(cs);
                    uj.splittable = false;
                    change_set_jobs.extend(Self::change_set_jobs(cs, options.keep_existing));
                }
            }
        }

        // requested troves that are installed already only have their
        // members looked at
        let mut ineligible = BTreeSet::new();
        let mut walk = JobSet::new();
        let mut requested = JobSet::new();
        for job in jobs {
            match job.new_tuple() {
                Some(new) if job.old_side().is_none() && self.db.has_trove(&new)? => {
                    debug!("{} is already installed", new);
                    walk.insert(Job::update(&new, &new));
                    ineligible.insert(new);
                }
                _ => {
                    requested.insert(job);
                }
            }
        }
        for job in change_set_jobs {
            match job.new_tuple() {
                Some(new) if self.db.has_trove(&new)? => warn!("{} is already installed", new),
                _ => {
                    requested.insert(job);
                }
            }
        }

        if requested.is_empty() && walk.is_empty() {
            return Err(UpdateError::NoNewTroves);
        }

        info!("Planning {} requested changes", requested.len());
        let (primaries, merged) = self.merge_jobs(
            uj,
            &search,
            requested,
            walk,
            &ineligible,
            options.recurse,
            options.ignore_primary_pins,
        )?;
        if merged.is_empty() {
            return Err(UpdateError::NoNewTroves);
        }

        uj.primaries.extend(primaries);
        Ok(merged)
    }

    /// Plan `items` into batches ready to apply
    pub fn plan_update(&self, items: &[ChangeItem], options: &UpdateOptions) -> Result<UpdateJob> {
        let relative = items
            .iter()
            .any(|item| matches!(item, ChangeItem::ChangeSet(cs) if !cs.is_absolute()));
        if options.keep_existing && relative {
            return Err(UpdateError::RelativeWithKeepExisting);
        }

        let mut uj = UpdateJob::new();
        let mut jobs = self.update_change_set(&mut uj, items, options)?;

        let primary_erases: BTreeSet<TroveTuple> = uj
            .primaries
            .iter()
            .filter(|j| j.is_erase())
            .filter_map(Job::old_tuple)
            .collect();

        let resolver = Resolver::new(self.ctx, self.db, self.repos);
        let resolution = if options.resolve_deps {
            let search = PlannerSource::Repository(self.repos);
            resolver.resolve(&mut uj, &mut jobs, &primary_erases, |uj, suggested| {
                let (_, merged) =
                    self.merge_jobs(uj, &search, suggested, JobSet::new(), &BTreeSet::new(), false, false)?;
                Ok(merged)
            })?
        } else {
            let check = resolver.check(&uj, &mut jobs, &primary_erases)?;
            Resolution {
                ordering: check.ordering,
                ..Default::default()
            }
        };

        let unresolvable = resolution.unresolvable();
        if !unresolvable.is_empty() {
            return Err(UpdateError::DepResolutionFailure(unresolvable));
        }
        if !resolution.needed.is_empty() {
            return Err(UpdateError::NeededTrovesFailure(resolution.needed));
        }
        if !resolution.broken_erasures.is_empty() {
            return Err(UpdateError::EraseDepFailure(resolution.broken_erasures));
        }

        if options.check_bucket_conflicts && !options.sync {
            let repos = PlannerSource::Repository(self.repos);
            let local = PlannerSource::Local(self.db);
            let source = LayeredSource::new(vec![&uj.trove_source as &dyn TroveSource, &repos, &local]);
            let conflicts = check_bucket_conflicts(&source, &jobs)?;
            if !conflicts.is_empty() {
                return Err(UpdateError::InstallBucketConflicts(conflicts));
            }
        }

        let ordering = resolution
            .ordering
            .unwrap_or_else(|| jobs.iter().map(|j| vec![j.clone()]).collect());
        if options.split && uj.splittable {
            uj.batches = split_jobs(&ordering, self.ctx.update_threshold);
        } else {
            uj.batches = vec![ordering.into_iter().flatten().collect()];
        }

        info!(
            "Planned {} jobs in {} batches",
            uj.all_jobs().count(),
            uj.batches.len()
        );
        Ok(uj)
    }

    /// One update per installed trove that no installed collection
    /// references, along its installed branch and flavor
    pub fn full_update_item_list(&self) -> Result<Vec<UpdateItem>> {
        let mut seen = BTreeSet::new();
        let mut items = Vec::new();
        for tuple in self.db.unreferenced_troves()? {
            let branch = tuple.version.branch().to_string();
            if !seen.insert((tuple.name.clone(), branch.clone(), tuple.flavor.to_string())) {
                continue;
            }
            items.push(UpdateItem::update(&tuple.name, Some(&branch), Some(tuple.flavor.clone())));
        }
        debug!("{} troves to update", items.len());
        Ok(items)
    }
}
