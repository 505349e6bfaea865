//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{dep_check, DepCheckResult, LocalDatabase};
use crate::deps::Flavor;
use crate::job::JobSet;
use crate::source::{find_matching, ChangeSet, Result, SourceError, TroveSource, TroveSpec};
use crate::trove::{match_troves, Trove, TroveTuple};
use crate::versions::Label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// An installed trove as shipped, with the members its local view still
/// references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledTrove {
    pub trove: Trove,
    #[serde(default)]
    pub local: BTreeSet<TroveTuple>,
}

impl InstalledTrove {
    /// A record referencing every member of `trove`
    pub fn new(trove: Trove) -> Self {
        let local = trove.iter_troves().cloned().collect();
        InstalledTrove { trove, local }
    }
}

/// Records touched by one commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitDelta {
    pub removed: BTreeSet<TroveTuple>,
    pub written: BTreeSet<TroveTuple>,
    pub unpinned: BTreeSet<TroveTuple>,
}

/// The installed troves and pins held in memory
#[derive(Debug, Clone, Default)]
pub struct InstalledSet {
    troves: BTreeMap<TroveTuple, InstalledTrove>,
    pins: BTreeSet<TroveTuple>,
}

impl InstalledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I, P>(records: I, pins: P) -> Self
    where
        I: IntoIterator<Item = InstalledTrove>,
        P: IntoIterator<Item = TroveTuple>,
    {
        InstalledSet {
            troves: records
                .into_iter()
                .map(|r| (r.trove.tuple(), r))
                .collect(),
            pins: pins.into_iter().collect(),
        }
    }

    /// Install `trove` referencing all of its members
    pub fn add_trove(&mut self, trove: Trove) {
        self.add_record(InstalledTrove::new(trove));
    }

    pub fn add_record(&mut self, record: InstalledTrove) {
        debug!("Added installed trove {}", record.trove.tuple());
        self.troves.insert(record.trove.tuple(), record);
    }

    pub fn remove_trove(&mut self, tuple: &TroveTuple) -> Option<InstalledTrove> {
        self.pins.remove(tuple);
        self.troves.remove(tuple)
    }

    pub fn record(&self, tuple: &TroveTuple) -> Option<&InstalledTrove> {
        self.troves.get(tuple)
    }

    pub fn records(&self) -> impl Iterator<Item = &InstalledTrove> {
        self.troves.values()
    }

    pub fn pins(&self) -> impl Iterator<Item = &TroveTuple> {
        self.pins.iter()
    }

    pub fn len(&self) -> usize {
        self.troves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.troves.is_empty()
    }

    pub fn set_pinned(&mut self, tuple: &TroveTuple, pin: bool) -> Result<()> {
        if !self.troves.contains_key(tuple) {
            return Err(SourceError::TroveNotFound(tuple.to_string()));
        }
        if pin {
            self.pins.insert(tuple.clone());
        } else {
            self.pins.remove(tuple);
        }
        Ok(())
    }

    fn local_view(&self, record: &InstalledTrove) -> Trove {
        let mut trove = record.trove.clone();
        trove.troves = record
            .local
            .iter()
            .filter(|t| self.troves.contains_key(*t))
            .map(|t| {
                let r = record.trove.troves.get(t).copied().unwrap_or_default();
                (t.clone(), r)
            })
            .collect();
        trove
    }

    /// Apply the jobs of `cs` and report which records changed.
    ///
    /// Old sides are removed first. Members of surviving collections that
    /// were updated are re-pointed to their replacement and erased members
    /// are dropped from the local views. New troves are then added,
    /// referencing the membership recorded for them in the changeset or,
    /// failing that, all of their members. Pin mappings finally point
    /// collections back at the pinned troves they could not replace.
    pub fn apply(&mut self, cs: &ChangeSet) -> Result<CommitDelta> {
        let mut delta = CommitDelta::default();
        let mut replaced: BTreeMap<TroveTuple, TroveTuple> = BTreeMap::new();
        let mut erased: BTreeSet<TroveTuple> = BTreeSet::new();

        for job in &cs.jobs {
            let Some(old) = job.old_tuple() else {
                continue;
            };
            if self.troves.remove(&old).is_none() {
                return Err(SourceError::TroveNotFound(old.to_string()));
            }
            if self.pins.remove(&old) {
                delta.unpinned.insert(old.clone());
            }
            info!("Removed installed trove {}", old);
            match job.new_tuple() {
                Some(new) => {
                    replaced.insert(old.clone(), new);
                }
                None => {
                    erased.insert(old.clone());
                }
            }
            delta.removed.insert(old);
        }

        for (tuple, record) in self.troves.iter_mut() {
            let mut changed = false;
            for (old, new) in &replaced {
                if record.local.remove(old) {
                    record.local.insert(new.clone());
                    changed = true;
                }
            }
            for old in &erased {
                changed |= record.local.remove(old);
            }
            if changed {
                delta.written.insert(tuple.clone());
            }
        }

        for job in &cs.jobs {
            let Some(new) = job.new_tuple() else {
                continue;
            };
            let trove = cs
                .get_trove(&new)
                .cloned()
                .ok_or_else(|| SourceError::TroveNotFound(new.to_string()))?;
            let local = cs
                .local_members
                .get(&new)
                .cloned()
                .unwrap_or_else(|| trove.iter_troves().cloned().collect());
            info!("Added installed trove {}", new);
            self.troves.insert(new.clone(), InstalledTrove { trove, local });
            delta.removed.remove(&new);
            delta.written.insert(new);
        }

        for mapping in &cs.pin_mappings {
            let pinned = mapping.pinned_tuple();
            let needed = mapping.needed_tuple();
            if !self.troves.contains_key(&pinned) {
                continue;
            }
            for (tuple, record) in self.troves.iter_mut() {
                if record.local.remove(&needed) {
                    record.local.insert(pinned.clone());
                    delta.written.insert(tuple.clone());
                }
            }
        }

        Ok(delta)
    }
}

impl TroveSource for InstalledSet {
    fn get_trove(&self, tuple: &TroveTuple) -> Result<Trove> {
        self.get_installed_trove(tuple, true)
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
            let found = find_matching(self.troves.keys(), label_path, spec, flavors, false)?;
            if found.is_empty() {
                return Err(SourceError::TroveNotFound(spec.to_string()));
            }
            results.insert(spec.clone(), found);
        }
        Ok(results)
    }
}

impl LocalDatabase for InstalledSet {
    fn get_installed_trove(&self, tuple: &TroveTuple, pristine: bool) -> Result<Trove> {
        let record = self
            .troves
            .get(tuple)
            .ok_or_else(|| SourceError::TroveNotFound(tuple.to_string()))?;
        if pristine {
            Ok(record.trove.clone())
        } else {
            Ok(self.local_view(record))
        }
    }

    fn troves_by_name(&self, name: &str) -> Result<Vec<TroveTuple>> {
        Ok(self
            .troves
            .keys()
            .filter(|t| t.name == name)
            .cloned()
            .collect())
    }

    fn all_troves(&self) -> Result<Vec<TroveTuple>> {
        Ok(self.troves.keys().cloned().collect())
    }

    fn outdated_troves(
        &self,
        new: &[TroveTuple],
        ineligible: &BTreeSet<TroveTuple>,
    ) -> Result<BTreeMap<TroveTuple, Option<TroveTuple>>> {
        let names: BTreeSet<&str> = new.iter().map(|t| t.name.as_str()).collect();
        let installed: BTreeSet<TroveTuple> = self
            .troves
            .keys()
            .filter(|t| names.contains(t.name.as_str()) && !ineligible.contains(*t))
            .cloned()
            .collect();
        let wanted: BTreeSet<TroveTuple> = new.iter().cloned().collect();

        let mut outdated = BTreeMap::new();
        for change in match_troves(&installed, &wanted) {
            if let Some(new) = change.new_tuple() {
                outdated.insert(new, change.old_tuple());
            }
        }
        Ok(outdated)
    }

    fn dep_check(
        &self,
        jobs: &JobSet,
        source: &dyn TroveSource,
        find_ordering: bool,
    ) -> Result<DepCheckResult> {
        let installed: BTreeMap<TroveTuple, &Trove> = self
            .troves
            .iter()
            .map(|(t, r)| (t.clone(), &r.trove))
            .collect();
        dep_check(&installed, jobs, source, find_ordering)
    }

    fn get_trove_containers(&self, tuples: &[TroveTuple]) -> Result<Vec<Vec<TroveTuple>>> {
        Ok(tuples
            .iter()
            .map(|member| {
                self.troves
                    .iter()
                    .filter(|(_, r)| r.trove.has_trove(member) || r.local.contains(member))
                    .map(|(t, _)| t.clone())
                    .collect()
            })
            .collect())
    }

    fn troves_are_pinned(&self, tuples: &[TroveTuple]) -> Result<Vec<bool>> {
        Ok(tuples.iter().map(|t| self.pins.contains(t)).collect())
    }

    fn pin_troves(&mut self, tuples: &[TroveTuple], pin: bool) -> Result<()> {
        for tuple in tuples {
            self.set_pinned(tuple, pin)?;
        }
        Ok(())
    }

    fn unreferenced_troves(&self) -> Result<Vec<TroveTuple>> {
        let referenced: BTreeSet<&TroveTuple> = self
            .troves
            .iter()
            .flat_map(|(t, r)| {
                r.trove
                    .iter_troves()
                    .chain(r.local.iter())
                    .filter(move |m| *m != t)
            })
            .collect();
        Ok(self
            .troves
            .keys()
            .filter(|t| !referenced.contains(t))
            .cloned()
            .collect())
    }

    fn commit(&mut self, cs: &ChangeSet) -> Result<()> {
        let mut next = self.clone();
        next.apply(cs)?;
        *self = next;
        Ok(())
    }
}
