//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{find_matching, Result, SourceError, TroveSource, TroveSpec};
use crate::deps::Flavor;
use crate::job::{Job, JobSet, PinMapping};
use crate::trove::{Trove, TroveTuple};
use crate::versions::Label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Troves travelling together, with the jobs that install them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub troves: Vec<Trove>,
    /// Troves the changeset was made for; when empty every trove not
    /// referenced by another trove in the changeset is primary
    #[serde(default)]
    pub primaries: Vec<TroveTuple>,
    /// Membership of the local view of collections installed by this
    /// changeset, when it differs from the shipped membership
    #[serde(skip)]
    pub local_members: BTreeMap<TroveTuple, BTreeSet<TroveTuple>>,
    #[serde(skip)]
    pub pin_mappings: Vec<PinMapping>,
}

impl ChangeSet {
    /// A changeset for `jobs` carrying the new troves read from `source`;
    /// `recurse` also carries the members of collections
    pub fn from_jobs<S: TroveSource + ?Sized>(source: &S, jobs: &JobSet, recurse: bool) -> Result<Self> {
        let mut troves: BTreeMap<TroveTuple, Trove> = BTreeMap::new();
        let mut queue: Vec<TroveTuple> = jobs.new_tuples().into_iter().collect();
        while let Some(tuple) = queue.pop() {
            if troves.contains_key(&tuple) {
                continue;
            }
            let trove = source.get_trove(&tuple)?;
            if recurse {
                queue.extend(trove.iter_troves().cloned());
            }
            troves.insert(tuple, trove);
        }

        Ok(ChangeSet {
            jobs: jobs.iter().cloned().collect(),
            troves: troves.into_values().collect(),
            ..Default::default()
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        let cs: ChangeSet = serde_json::from_slice(&data)?;
        debug!(
            "Loaded changeset {} with {} troves",
            path.as_ref().display(),
            cs.troves.len()
        );
        Ok(cs)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// True when every job installs without naming an old version
    pub fn is_absolute(&self) -> bool {
        self.jobs.iter().all(|j| j.old_side().is_none())
    }

    pub fn primary_tuples(&self) -> Vec<TroveTuple> {
        if !self.primaries.is_empty() {
            return self.primaries.clone();
        }
        let referenced: BTreeSet<&TroveTuple> =
            self.troves.iter().flat_map(|t| t.iter_troves()).collect();
        self.troves
            .iter()
            .map(Trove::tuple)
            .filter(|t| !referenced.contains(t))
            .collect()
    }

    /// Absolute install jobs for the primary troves
    pub fn primary_jobs(&self) -> JobSet {
        self.primary_tuples().iter().map(Job::absolute).collect()
    }

    pub fn get_trove(&self, tuple: &TroveTuple) -> Option<&Trove> {
        self.troves.iter().find(|t| t.name == tuple.name && &t.tuple() == tuple)
    }
}

/// Troves merged into the current planning pass. Merges are permanent.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetTroveSource {
    troves: BTreeMap<TroveTuple, Trove>,
}

impl ChangeSetTroveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_change_set(&mut self, cs: &ChangeSet) {
        for trove in &cs.troves {
            self.add_trove(trove.clone());
        }
    }

    pub fn add_trove(&mut self, trove: Trove) {
        self.troves.insert(trove.tuple(), trove);
    }

    pub fn contains(&self, tuple: &TroveTuple) -> bool {
        self.troves.contains_key(tuple)
    }

    pub fn len(&self) -> usize {
        self.troves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.troves.is_empty()
    }

    pub fn tuples(&self) -> impl Iterator<Item = &TroveTuple> {
        self.troves.keys()
    }
}

impl TroveSource for ChangeSetTroveSource {
    fn get_trove(&self, tuple: &TroveTuple) -> Result<Trove> {
        self.troves
            .get(tuple)
            .cloned()
            .ok_or_else(|| SourceError::TroveNotFound(tuple.to_string()))
    }

    fn has_trove(&self, tuple: &TroveTuple) -> Result<bool> {
        Ok(self.troves.contains_key(tuple))
    }

    fn find_troves(
        &self,
        label_path: &[Label],
        specs: &[TroveSpec],
        flavors: &[Flavor],
    ) -> Result<BTreeMap<TroveSpec, Vec<TroveTuple>>> {
        let mut results = BTreeMap::new();
        for spec in specs {
            let found = find_matching(self.troves.keys(), label_path, spec, flavors, true)?;
            if found.is_empty() {
                return Err(SourceError::TroveNotFound(spec.to_string()));
            }
            results.insert(spec.clone(), found);
        }
        Ok(results)
    }
}
