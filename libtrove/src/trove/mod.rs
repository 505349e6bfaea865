//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Troves: components, collections and redirects
//!
//! A trove is identified by its (name, version, flavor) tuple. Components
//! own files, collections reference other troves and redirects name the
//! troves that should be installed in their place.

mod bucket;
mod diff;
#[cfg(test)]
mod tests;

pub use bucket::{install_bucket, InstallBucket};
pub use diff::match_troves;

use crate::deps::{DependencySet, Flavor};
use crate::versions::Version;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of a trove
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TroveTuple {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub flavor: Flavor,
}

impl TroveTuple {
    pub fn new(name: &str, version: Version, flavor: Flavor) -> Self {
        TroveTuple {
            name: name.to_string(),
            version,
            flavor,
        }
    }

    /// Stable key including the timestamp, used by the local database
    pub fn key(&self) -> String {
        format!("{}={}[{}]", self.name, self.version.freeze(), self.flavor)
    }

    pub fn version_flavor(&self) -> VersionFlavor {
        VersionFlavor {
            version: self.version.clone(),
            flavor: self.flavor.clone(),
        }
    }
}

impl fmt::Display for TroveTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}[{}]", self.name, self.version, self.flavor)
    }
}

/// One side of a job: a version and the flavor it was built with
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionFlavor {
    pub version: Version,
    #[serde(default)]
    pub flavor: Flavor,
}

impl VersionFlavor {
    pub fn new(version: Version, flavor: Flavor) -> Self {
        VersionFlavor { version, flavor }
    }

    pub fn tuple(&self, name: &str) -> TroveTuple {
        TroveTuple::new(name, self.version.clone(), self.flavor.clone())
    }
}

impl fmt::Display for VersionFlavor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[{}]", self.version, self.flavor)
    }
}

/// A change of one trove name between two member lists
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TroveChange {
    pub name: String,
    pub old: Option<VersionFlavor>,
    pub new: Option<VersionFlavor>,
}

impl TroveChange {
    pub fn old_tuple(&self) -> Option<TroveTuple> {
        self.old.as_ref().map(|vf| vf.tuple(&self.name))
    }

    pub fn new_tuple(&self) -> Option<TroveTuple> {
        self.new.as_ref().map(|vf| vf.tuple(&self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TroveKind {
    #[default]
    Component,
    Collection,
    Redirect,
}

/// How a collection references a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveRef {
    #[serde(default = "default_true")]
    pub by_default: bool,
    #[serde(default)]
    pub weak: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TroveRef {
    fn default() -> Self {
        TroveRef {
            by_default: true,
            weak: false,
        }
    }
}

/// Destination of a redirect. The version is a label, branch or version
/// string and, with the flavor, is resolved when the redirect is followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub flavor: Option<Flavor>,
}

/// Collection members in a JSON friendly shape
mod member_list {
    use super::{TroveRef, TroveTuple};
    use crate::deps::Flavor;
    use crate::versions::Version;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Member {
        name: String,
        version: Version,
        #[serde(default)]
        flavor: Flavor,
        #[serde(default = "super::default_true")]
        by_default: bool,
        #[serde(default)]
        weak: bool,
    }

    pub fn serialize<S: Serializer>(
        members: &BTreeMap<TroveTuple, TroveRef>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<Member> = members
            .iter()
            .map(|(t, r)| Member {
                name: t.name.clone(),
                version: t.version.clone(),
                flavor: t.flavor.clone(),
                by_default: r.by_default,
                weak: r.weak,
            })
            .collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<TroveTuple, TroveRef>, D::Error> {
        let list = Vec::<Member>::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|m| {
                (
                    TroveTuple::new(&m.name, m.version, m.flavor),
                    TroveRef {
                        by_default: m.by_default,
                        weak: m.weak,
                    },
                )
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trove {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub flavor: Flavor,
    #[serde(default)]
    pub kind: TroveKind,
    #[serde(default, with = "member_list")]
    pub troves: BTreeMap<TroveTuple, TroveRef>,
    #[serde(default)]
    pub redirects: Vec<RedirectTarget>,
    #[serde(default)]
    pub provides: DependencySet,
    #[serde(default)]
    pub requires: DependencySet,
    /// Paths owned by a component
    #[serde(default)]
    pub paths: BTreeSet<String>,
}

/// Collections are recognised by name: components carry a `:` and
/// filesets a `fileset-` prefix.
pub fn is_collection_name(name: &str) -> bool {
    !name.contains(':') && !name.starts_with("fileset-")
}

impl Trove {
    pub fn new(name: &str, version: Version, flavor: Flavor, kind: TroveKind) -> Self {
        Trove {
            name: name.to_string(),
            version,
            flavor,
            kind,
            troves: BTreeMap::new(),
            redirects: Vec::new(),
            provides: DependencySet::new(),
            requires: DependencySet::new(),
            paths: BTreeSet::new(),
        }
    }

    /// An empty collection with the identity of `tuple`
    pub fn skeleton(tuple: &TroveTuple) -> Self {
        Trove::new(
            &tuple.name,
            tuple.version.clone(),
            tuple.flavor.clone(),
            TroveKind::Collection,
        )
    }

    pub fn tuple(&self) -> TroveTuple {
        TroveTuple::new(&self.name, self.version.clone(), self.flavor.clone())
    }

    pub fn is_redirect(&self) -> bool {
        self.kind == TroveKind::Redirect
    }

    pub fn is_collection(&self) -> bool {
        self.kind == TroveKind::Collection
    }

    pub fn add_trove(&mut self, tuple: TroveTuple, by_default: bool, weak: bool) {
        self.troves.insert(tuple, TroveRef { by_default, weak });
    }

    pub fn del_trove(&mut self, tuple: &TroveTuple) -> Option<TroveRef> {
        self.troves.remove(tuple)
    }

    pub fn has_trove(&self, tuple: &TroveTuple) -> bool {
        self.troves.contains_key(tuple)
    }

    pub fn iter_troves(&self) -> impl Iterator<Item = &TroveTuple> {
        self.troves.keys()
    }

    pub fn include_by_default(&self, tuple: &TroveTuple) -> bool {
        self.troves.get(tuple).is_some_and(|r| r.by_default)
    }

    /// Member changes needed to turn `old` into this trove. `None` diffs
    /// against nothing, so every member is an install.
    pub fn diff(&self, old: Option<&Trove>) -> Vec<TroveChange> {
        let new_members: BTreeSet<TroveTuple> = self.troves.keys().cloned().collect();
        let old_members: BTreeSet<TroveTuple> = old
            .map(|t| t.troves.keys().cloned().collect())
            .unwrap_or_default();
        match_troves(&old_members, &new_members)
    }

    /// Layer the local customizations recorded in `local` on top of the
    /// membership change from `self` (the old pristine trove) to
    /// `new_pristine`. The result carries the identity of `new_pristine`.
    ///
    /// Members changed between the two pristine versions follow the change
    /// on the local side: an update of a locally present member (or of the
    /// member that locally replaced it) is applied, a removal removes it,
    /// and new or locally missing members are added only when they are
    /// installed by default and not excluded.
    pub fn merge_collections(&self, local: &Trove, new_pristine: &Trove, excludes: &[Regex]) -> Trove {
        let old_members: BTreeSet<TroveTuple> = self.troves.keys().cloned().collect();
        let new_members: BTreeSet<TroveTuple> = new_pristine.troves.keys().cloned().collect();
        let mut result = local.troves.clone();

        let wanted = |tuple: &TroveTuple| {
            new_pristine.include_by_default(tuple) && !is_excluded(&tuple.name, excludes)
        };

        for change in match_troves(&old_members, &new_members) {
            match (change.old_tuple(), change.new_tuple()) {
                (None, Some(new)) => {
                    if wanted(&new) {
                        let r = new_pristine.troves.get(&new).copied().unwrap_or_default();
                        result.insert(new, r);
                    }
                }
                (Some(old), None) => {
                    result.remove(&old);
                }
                (Some(old), Some(new)) => {
                    let r = new_pristine.troves.get(&new).copied().unwrap_or_default();
                    if result.remove(&old).is_some() {
                        result.insert(new, r);
                        continue;
                    }

                    let replaced = result
                        .keys()
                        .find(|t| t.name == new.name && !old_members.contains(*t))
                        .cloned();
                    match replaced {
                        Some(replaced) => {
                            result.remove(&replaced);
                            result.insert(new, r);
                        }
                        None if wanted(&new) => {
                            result.insert(new, r);
                        }
                        None => {}
                    }
                }
                (None, None) => {}
            }
        }

        let mut merged = new_pristine.clone();
        merged.troves = result;
        merged
    }
}

pub fn is_excluded(name: &str, excludes: &[Regex]) -> bool {
    excludes.iter().any(|re| re.is_match(name))
}
