//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Repositories the planner searches for troves and dependency providers

mod memory;

pub use memory::MemoryRepository;

use crate::deps::DependencySet;
use crate::job::JobSet;
use crate::source::{ChangeSet, SourceError, TroveSource};
use crate::trove::TroveTuple;
use crate::versions::Label;
use miette::Diagnostic;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RepositoryError {
    #[error("failed to read repository {path}: {source}")]
    #[diagnostic(
        code(trove::repository_error::io),
        help("Check that the repository file exists and is readable")
    )]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid repository description {path}: {source}")]
    #[diagnostic(
        code(trove::repository_error::json),
        help("A repository is a JSON object with a list of troves")
    )]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// A trove source that can also suggest providers for dependencies
pub trait Repository: TroveSource {
    /// For each dependency set, the candidate providers of each of its
    /// dependencies found on `label`. Dependencies nothing provides get an
    /// empty candidate list.
    fn resolve_dependencies(
        &self,
        label: &Label,
        dep_sets: &[DependencySet],
    ) -> crate::source::Result<BTreeMap<DependencySet, Vec<Vec<TroveTuple>>>>;

    /// A changeset installing the new sides of `jobs`
    fn create_change_set(&self, jobs: &JobSet, recurse: bool) -> crate::source::Result<ChangeSet> {
        ChangeSet::from_jobs(self, jobs, recurse)
    }
}
