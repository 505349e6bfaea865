//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! The local install database
//!
//! [`InstalledSet`] holds the installed troves in memory and implements the
//! queries the planner needs. [`InstalledDatabase`] persists the same state
//! in a redb file and commits one changeset per write transaction.

mod depcheck;
mod installed;
mod state;


pub use depcheck::{dep_check, BrokenErase, DepCheckResult};
pub use installed::{InstalledDatabase, InstalledError, PINS_TABLE, TROVES_TABLE};
pub use state::{CommitDelta, InstalledSet, InstalledTrove};

use crate::job::JobSet;
use crate::source::{ChangeSet, Result, TroveSource};
use crate::trove::{Trove, TroveTuple};
use std::collections::{BTreeMap, BTreeSet};

/// What the planner needs from the local database
pub trait LocalDatabase: TroveSource {
    /// The installed trove; `pristine` returns it as it was shipped,
    /// otherwise members that were removed or replaced locally are
    /// reflected
    fn get_installed_trove(&self, tuple: &TroveTuple, pristine: bool) -> Result<Trove>;

    fn troves_by_name(&self, name: &str) -> Result<Vec<TroveTuple>>;

    fn all_troves(&self) -> Result<Vec<TroveTuple>>;

    /// For each new tuple, the installed tuple it replaces (`Some`), or
    /// `None` for a fresh install. Tuples already installed get no entry.
    /// Installed tuples in `ineligible` are never replaced.
    fn outdated_troves(
        &self,
        new: &[TroveTuple],
        ineligible: &BTreeSet<TroveTuple>,
    ) -> Result<BTreeMap<TroveTuple, Option<TroveTuple>>>;

    fn dep_check(
        &self,
        jobs: &JobSet,
        source: &dyn TroveSource,
        find_ordering: bool,
    ) -> Result<DepCheckResult>;

    /// Installed collections referencing each tuple
    fn get_trove_containers(&self, tuples: &[TroveTuple]) -> Result<Vec<Vec<TroveTuple>>>;

    fn troves_are_pinned(&self, tuples: &[TroveTuple]) -> Result<Vec<bool>>;

    fn pin_troves(&mut self, tuples: &[TroveTuple], pin: bool) -> Result<()>;

    /// Installed troves no other installed collection references
    fn unreferenced_troves(&self) -> Result<Vec<TroveTuple>>;

    /// Apply the jobs of a changeset atomically
    fn commit(&mut self, cs: &ChangeSet) -> Result<()>;
}
