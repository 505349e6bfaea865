//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Update job planning
//!
//! [`UpdatePlanner`] takes requested changes and produces an [`UpdateJob`]:
//! requested troves are found, redirects are followed, collections are
//! expanded against their local view, absolute installs are rooted against
//! the installed troves, dependencies are resolved and the result is split
//! into batches. [`apply_update`] commits those batches in order.

mod apply;
mod conflict;
mod context;
mod erasure;
mod item;
mod merge;
mod planner;
mod redirect;
mod resolve;
mod search;
mod split;
mod update_job;

#[cfg(test)]
mod tests;

pub use apply::{apply_update, set_pins};
pub use conflict::{check_bucket_conflicts, BucketConflicts};
pub use context::{ConfigError, PlanningContext};
pub use erasure::{find_erasures, ErasureGraph, NodeState};
pub use item::{parse_change_items, ChangeItem, ItemAction, ItemSide, UpdateItem};
pub use planner::UpdatePlanner;
pub use redirect::RedirectMap;
pub use resolve::{Outcome, Resolution};
pub use split::split_jobs;
pub use update_job::UpdateJob;

use crate::deps::{DependencySet, DepsError};
use crate::local::BrokenErase;
use crate::source::{ChangeSet, SourceError};
use crate::trove::TroveTuple;
use miette::Diagnostic;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

fn list_missing(missing: &[(TroveTuple, DependencySet)]) -> String {
    missing
        .iter()
        .map(|(t, deps)| format!("\n    {} requires {}", t, deps))
        .collect()
}

fn list_needed(needed: &BTreeMap<TroveTuple, BTreeSet<TroveTuple>>) -> String {
    needed
        .iter()
        .map(|(t, by)| {
            let by: Vec<String> = by.iter().map(ToString::to_string).collect();
            format!("\n    {} needs {}", t, by.join(", "))
        })
        .collect()
}

fn list_broken(broken: &[BrokenErase]) -> String {
    broken
        .iter()
        .map(|b| format!("\n    {} requires {}", b.required_by, b.deps))
        .collect()
}

fn list_conflicts(conflicts: &BucketConflicts) -> String {
    conflicts
        .iter()
        .flat_map(|(name, pairs)| {
            pairs
                .iter()
                .map(move |(a, b)| format!("\n    {}={} and {}={}", name, a, name, b))
        })
        .collect()
}

#[derive(Debug, Error, Diagnostic)]
pub enum UpdateError {
    #[error("the following dependencies could not be resolved:{}", list_missing(.0))]
    #[diagnostic(
        code(trove::update_error::dep_resolution),
        help("Add a label providing them to installLabelPath or install the providers explicitly")
    )]
    DepResolutionFailure(Vec<(TroveTuple, DependencySet)>),

    #[error("additional troves are needed:{}", list_needed(.0))]
    #[diagnostic(
        code(trove::update_error::needed_troves),
        help("Enable autoResolve or add the troves to the update")
    )]
    NeededTrovesFailure(BTreeMap<TroveTuple, BTreeSet<TroveTuple>>),

    #[error("troves being erased are still required:{}", list_broken(.0))]
    #[diagnostic(
        code(trove::update_error::erase_deps),
        help("Erase the troves requiring them as well")
    )]
    EraseDepFailure(Vec<BrokenErase>),

    #[error("troves cannot be installed together:{}", list_conflicts(.0))]
    #[diagnostic(
        code(trove::update_error::bucket_conflicts),
        help("Request a single flavor of each trove")
    )]
    InstallBucketConflicts(BucketConflicts),

    #[error("no new troves were found")]
    #[diagnostic(
        code(trove::update_error::no_new_troves),
        help("The requested troves are already installed")
    )]
    NoNewTroves,

    #[error("a version was supplied for changeset {0}")]
    #[diagnostic(code(trove::update_error::version_supplied))]
    VersionSupplied(String),

    #[error("relative changesets cannot be installed next to existing troves")]
    #[diagnostic(
        code(trove::update_error::relative_keep_existing),
        help("Drop --keep-existing or use an absolute changeset")
    )]
    RelativeWithKeepExisting,

    #[error("{0} matches more troves than it can change")]
    #[diagnostic(
        code(trove::update_error::ambiguous_spec),
        help("Give a version or flavor to narrow it down")
    )]
    AmbiguousSpec(String),

    #[error("{0} would be added by more than one update")]
    #[diagnostic(code(trove::update_error::duplicate_addition))]
    DuplicateAddition(String),

    #[error("{0} is a redirect, which cannot be followed without recursion")]
    #[diagnostic(code(trove::update_error::redirect_without_recurse))]
    RedirectWithoutRecurse(String),

    #[error("batch {} failed after {} committed batches: {}", .batch + 1, .batch, .source)]
    #[diagnostic(
        code(trove::update_error::commit_failed),
        help("Batches before the failed one are installed; plan again to finish the update")
    )]
    CommitFailed {
        /// Index of the failed batch; every batch before it is committed
        batch: usize,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Deps(#[from] DepsError),
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// Switches for one planning call
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Install next to existing troves instead of replacing them
    pub keep_existing: bool,
    /// Plain specs update rather than erase
    pub update_by_default: bool,
    /// Expand collections into their members
    pub recurse: bool,
    pub resolve_deps: bool,
    pub split: bool,
    /// Bring installed collections back in line with what they reference
    pub sync: bool,
    pub check_bucket_conflicts: bool,
    pub ignore_primary_pins: bool,
    /// Look troves up in these changesets only
    pub from_changesets: Vec<ChangeSet>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            keep_existing: false,
            update_by_default: true,
            recurse: true,
            resolve_deps: true,
            split: true,
            sync: false,
            check_bucket_conflicts: true,
            ignore_primary_pins: false,
            from_changesets: Vec::new(),
        }
    }
}
