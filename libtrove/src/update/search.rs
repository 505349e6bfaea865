//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::deps::Flavor;
use crate::local::LocalDatabase;
use crate::repository::Repository;
use crate::source::{find_matching, ChangeSetTroveSource, Result, SourceError, TroveSource, TroveSpec};
use crate::trove::{Trove, TroveTuple};
use crate::versions::Label;
use std::collections::{BTreeMap, BTreeSet};

/// The trove sources the planner reads from besides its in-pass cache
pub(crate) enum PlannerSource<'a> {
    Repository(&'a dyn Repository),
    Local(&'a dyn LocalDatabase),
    /// Only the troves of changesets handed in by the caller
    ChangeSets(ChangeSetTroveSource),
    /// Repository troves that installed collections reference
    Referenced {
        repos: &'a dyn Repository,
        referenced: BTreeSet<TroveTuple>,
    },
}

impl<'a> PlannerSource<'a> {
    /// Search source for a sync: the members of every installed collection
    pub(crate) fn referenced(db: &dyn LocalDatabase, repos: &'a dyn Repository) -> Result<Self> {
        let mut referenced = BTreeSet::new();
        for tuple in db.all_troves()? {
            let trove = db.get_installed_trove(&tuple, true)?;
            referenced.extend(trove.iter_troves().cloned());
        }
        Ok(PlannerSource::Referenced { repos, referenced })
    }

    /// Whether looking troves up here may lean toward what is installed
    pub(crate) fn uses_affinity(&self) -> bool {
        matches!(self, PlannerSource::Repository(_))
    }
}

impl TroveSource for PlannerSource<'_> {
    fn get_trove(&self, tuple: &TroveTuple) -> Result<Trove> {
        match self {
            PlannerSource::Repository(repos) => repos.get_trove(tuple),
            PlannerSource::Local(db) => db.get_installed_trove(tuple, true),
            PlannerSource::ChangeSets(source) => source.get_trove(tuple),
            PlannerSource::Referenced { repos, .. } => repos.get_trove(tuple),
        }
    }

    fn has_trove(&self, tuple: &TroveTuple) -> Result<bool> {
        match self {
            PlannerSource::Repository(repos) => repos.has_trove(tuple),
            PlannerSource::Local(db) => db.has_trove(tuple),
            PlannerSource::ChangeSets(source) => source.has_trove(tuple),
            PlannerSource::Referenced { repos, .. } => repos.has_trove(tuple),
        }
    }

    fn find_troves(
        &self,
        label_path: &[Label],
        specs: &[TroveSpec],
        flavors: &[Flavor],
    ) -> Result<BTreeMap<TroveSpec, Vec<TroveTuple>>> {
        match self {
            PlannerSource::Repository(repos) => repos.find_troves(label_path, specs, flavors),
            PlannerSource::Local(db) => db.find_troves(label_path, specs, flavors),
            PlannerSource::ChangeSets(source) => source.find_troves(label_path, specs, flavors),
            PlannerSource::Referenced { referenced, .. } => {
                let mut results = BTreeMap::new();
                for spec in specs {
                    // a referenced version is wanted wherever it lives
                    let found = find_matching(referenced, &[], spec, flavors, true)?;
                    if found.is_empty() {
                        return Err(SourceError::TroveNotFound(spec.to_string()));
                    }
                    results.insert(spec.clone(), found);
                }
                Ok(results)
            }
        }
    }
}
