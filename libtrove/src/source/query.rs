//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Matching of trove specs against a list of known tuples, shared by every
//! trove source.

use super::{Result, TroveSpec};
use crate::deps::{Flavor, MergeType};
use crate::trove::TroveTuple;
use crate::versions::{Branch, Label, Version};
use std::collections::BTreeMap;
use tracing::trace;

/// What the version part of a trove spec asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionQuery {
    /// Newest version on the first label of the search path that has one
    Latest,
    Label(Label),
    Branch(Branch),
    Version(Version),
    /// A revision (`1.0-1-1`) or upstream version (`1.0`) searched along
    /// the label path
    Revision(String),
}

impl VersionQuery {
    pub fn parse(version: Option<&str>) -> Result<Self> {
        let Some(s) = version else {
            return Ok(VersionQuery::Latest);
        };

        if s.starts_with('/') {
            return match Version::parse(s) {
                Ok(v) => Ok(VersionQuery::Version(v)),
                Err(_) => Ok(VersionQuery::Branch(Branch::parse(s)?)),
            };
        }
        if s.contains('@') {
            return Ok(VersionQuery::Label(Label::parse(s)?));
        }
        Ok(VersionQuery::Revision(s.to_string()))
    }

    fn uses_label_path(&self) -> bool {
        matches!(self, VersionQuery::Latest | VersionQuery::Revision(_))
    }

    fn matches(&self, version: &Version) -> bool {
        match self {
            VersionQuery::Latest => true,
            VersionQuery::Label(label) => version.trailing_label() == label,
            VersionQuery::Branch(branch) => version.branch() == branch,
            VersionQuery::Version(v) => {
                version.branch() == v.branch() && version.trailing_revision() == v.trailing_revision()
            }
            VersionQuery::Revision(r) => {
                let revision = version.trailing_revision();
                revision.to_string() == *r || revision.upstream == *r
            }
        }
    }
}

/// Flavors to score candidates against: the spec's own flavor overrides
/// each configured flavor
fn effective_flavors(spec: &TroveSpec, flavors: &[Flavor]) -> Vec<Flavor> {
    match &spec.flavor {
        None => flavors.to_vec(),
        Some(requested) if flavors.is_empty() => vec![requested.clone()],
        Some(requested) => flavors
            .iter()
            .map(|f| {
                f.merged(requested, MergeType::Override)
                    .unwrap_or_else(|_| requested.clone())
            })
            .collect(),
    }
}

/// Find the tuples in `candidates` matching `spec`.
///
/// With `latest_only` the newest matching version wins and, when flavors
/// are scored, only its best scoring flavor is returned; otherwise every
/// match is returned.
pub fn find_matching<'a, I>(
    candidates: I,
    label_path: &[Label],
    spec: &TroveSpec,
    flavors: &[Flavor],
    latest_only: bool,
) -> Result<Vec<TroveTuple>>
where
    I: IntoIterator<Item = &'a TroveTuple>,
{
    let query = VersionQuery::parse(spec.version.as_deref())?;

    let named: Vec<&TroveTuple> = candidates
        .into_iter()
        .filter(|t| t.name == spec.name && query.matches(&t.version))
        .collect();

    let on_path: Vec<&TroveTuple> = if query.uses_label_path() && !label_path.is_empty() {
        label_path
            .iter()
            .map(|label| {
                named
                    .iter()
                    .copied()
                    .filter(|t| t.version.trailing_label() == label)
                    .collect::<Vec<_>>()
            })
            .find(|found| !found.is_empty())
            .unwrap_or_default()
    } else {
        named
    };

    let flavors = effective_flavors(spec, flavors);
    let mut scored: Vec<(&TroveTuple, i32)> = Vec::new();
    if flavors.is_empty() {
        scored = on_path.iter().map(|t| (*t, 0)).collect();
    } else {
        // the first flavor that matches anything wins
        for flavor in &flavors {
            scored = on_path
                .iter()
                .filter_map(|t| flavor.score(&t.flavor).map(|s| (*t, s)))
                .collect();
            if !scored.is_empty() {
                break;
            }
        }
    }

    trace!("{} candidates for {}", scored.len(), spec);

    if !latest_only {
        let mut all: Vec<TroveTuple> = scored.into_iter().map(|(t, _)| t.clone()).collect();
        all.sort();
        return Ok(all);
    }

    let Some(newest) = scored.iter().map(|(t, _)| &t.version).max().cloned() else {
        return Ok(Vec::new());
    };
    let newest: Vec<(&TroveTuple, i32)> =
        scored.into_iter().filter(|(t, _)| t.version == newest).collect();

    if flavors.is_empty() {
        let mut all: Vec<TroveTuple> = newest.into_iter().map(|(t, _)| t.clone()).collect();
        all.sort();
        return Ok(all);
    }

    // best score, then the lexicographically smallest flavor string
    let mut by_flavor: BTreeMap<String, (i32, &TroveTuple)> = BTreeMap::new();
    for (t, score) in newest {
        by_flavor.insert(t.flavor.to_string(), (score, t));
    }
    let best = by_flavor
        .values()
        .fold(None::<(i32, &TroveTuple)>, |best, &(score, t)| match best {
            Some((s, _)) if s >= score => best,
            _ => Some((score, t)),
        });

    Ok(best.map(|(_, t)| vec![t.clone()]).unwrap_or_default())
}
