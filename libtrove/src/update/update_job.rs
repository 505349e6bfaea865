//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::job::{Job, JobSet, PinMapping};
use crate::repository::Repository;
use crate::source::{ChangeSet, ChangeSetTroveSource, Result, SourceError, TroveSource};
use crate::trove::{Trove, TroveTuple};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The outcome of planning: ordered batches of jobs and everything needed
/// to turn them into changesets
#[derive(Debug, Clone, Default)]
pub struct UpdateJob {
    pub(crate) batches: Vec<JobSet>,
    pub(crate) primaries: JobSet,
    pub(crate) pin_mappings: BTreeSet<PinMapping>,
    pub(crate) trove_source: ChangeSetTroveSource,
    /// Local membership of collections merged during planning
    pub(crate) local_members: BTreeMap<TroveTuple, BTreeSet<TroveTuple>>,
    pub(crate) splittable: bool,
}

impl UpdateJob {
    pub fn new() -> Self {
        UpdateJob {
            splittable: true,
            ..Default::default()
        }
    }

    pub fn jobs(&self) -> &[JobSet] {
        &self.batches
    }

    pub fn add_batch(&mut self, batch: JobSet) {
        self.batches.push(batch);
    }

    /// Every job of every batch
    pub fn all_jobs(&self) -> impl Iterator<Item = &Job> {
        self.batches.iter().flat_map(|b| b.iter())
    }

    /// What was asked for explicitly
    pub fn primary_jobs(&self) -> &JobSet {
        &self.primaries
    }

    pub fn pin_mappings(&self) -> impl Iterator<Item = &PinMapping> {
        self.pin_mappings.iter()
    }

    pub fn trove_source(&self) -> &ChangeSetTroveSource {
        &self.trove_source
    }

    pub fn is_splittable(&self) -> bool {
        self.splittable
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(JobSet::is_empty)
    }

    /// The changeset applying `batch`. Troves come from the planning pass,
    /// falling back to `repos`.
    pub fn change_set(&self, batch: &JobSet, repos: &dyn Repository) -> Result<ChangeSet> {
        let mut troves: Vec<Trove> = Vec::new();
        let mut local_members = BTreeMap::new();
        for tuple in batch.new_tuples() {
            let trove = match self.trove_source.get_trove(&tuple) {
                Ok(trove) => trove,
                Err(SourceError::TroveNotFound(_)) => repos.get_trove(&tuple)?,
                Err(e) => return Err(e),
            };
            if let Some(members) = self.local_members.get(&tuple) {
                local_members.insert(tuple, members.clone());
            }
            troves.push(trove);
        }

        Ok(ChangeSet {
            jobs: batch.iter().cloned().collect(),
            troves,
            primaries: Vec::new(),
            local_members,
            pin_mappings: self.pin_mappings.iter().cloned().collect(),
        })
    }
}

impl fmt::Display for UpdateJob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, batch) in self.batches.iter().enumerate() {
            if self.batches.len() > 1 {
                writeln!(f, "Job {} of {}:", i + 1, self.batches.len())?;
            }
            for job in batch {
                writeln!(f, "    {}", job)?;
            }
        }
        for mapping in &self.pin_mappings {
            writeln!(f, "    {}", mapping)?;
        }
        Ok(())
    }
}
