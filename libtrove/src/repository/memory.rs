//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{Repository, RepositoryError, Result};
use crate::deps::{DependencySet, Flavor};
use crate::source::{find_matching, SourceError, TroveSource, TroveSpec};
use crate::trove::{Trove, TroveTuple};
use crate::versions::{Branch, Label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

#[derive(Serialize, Deserialize)]
struct RepositoryFile {
    #[serde(default)]
    troves: Vec<Trove>,
}

/// A repository held in memory, usually loaded from a JSON description
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    troves: BTreeMap<TroveTuple, Trove>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| RepositoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: RepositoryFile =
            serde_json::from_slice(&data).map_err(|source| RepositoryError::Json {
                path: path.display().to_string(),
                source,
            })?;

        let mut repo = MemoryRepository::new();
        for trove in file.troves {
            repo.add_trove(trove);
        }
        debug!("Loaded repository {} with {} troves", path.display(), repo.len());
        Ok(repo)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = RepositoryFile {
            troves: self.troves.values().cloned().collect(),
        };
        let data = serde_json::to_vec_pretty(&file).map_err(|source| RepositoryError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, data).map_err(|source| RepositoryError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn add_trove(&mut self, trove: Trove) {
        self.troves.insert(trove.tuple(), trove);
    }

    /// Take every trove of `other`; troves already present are replaced
    pub fn extend(&mut self, other: MemoryRepository) {
        self.troves.extend(other.troves);
    }

    pub fn len(&self) -> usize {
        self.troves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.troves.is_empty()
    }

    /// Newest provider per (name, branch, flavor) on `label`
    fn providers(&self, label: &Label, req: &DependencySet) -> Vec<TroveTuple> {
        let mut newest: BTreeMap<(&str, &Branch, &Flavor), &TroveTuple> = BTreeMap::new();
        for (tuple, trove) in &self.troves {
            if tuple.version.trailing_label() != label || !trove.provides.satisfies(req) {
                continue;
            }
            let key = (tuple.name.as_str(), tuple.version.branch(), &tuple.flavor);
            match newest.get(&key) {
                Some(have) if have.version >= tuple.version => {}
                _ => {
                    newest.insert(key, tuple);
                }
            }
        }
        newest.into_values().cloned().collect()
    }
}

impl TroveSource for MemoryRepository {
    fn get_trove(&self, tuple: &TroveTuple) -> crate::source::Result<Trove> {
        self.troves
            .get(tuple)
            .cloned()
            .ok_or_else(|| SourceError::TroveNotFound(tuple.to_string()))
    }

    fn has_trove(&self, tuple: &TroveTuple) -> crate::source::Result<bool> {
        Ok(self.troves.contains_key(tuple))
    }

    fn find_troves(
        &self,
        label_path: &[Label],
        specs: &[TroveSpec],
        flavors: &[Flavor],
    ) -> crate::source::Result<BTreeMap<TroveSpec, Vec<TroveTuple>>> {
        let mut results = BTreeMap::new();
        for spec in specs {
            let found = find_matching(self.troves.keys(), label_path, spec, flavors, true)?;
            if found.is_empty() {
                return Err(SourceError::TroveNotFound(spec.to_string()));
            }
            trace!("{} matched {:?}", spec, found);
            results.insert(spec.clone(), found);
        }
        Ok(results)
    }
}

impl Repository for MemoryRepository {
    fn resolve_dependencies(
        &self,
        label: &Label,
        dep_sets: &[DependencySet],
    ) -> crate::source::Result<BTreeMap<DependencySet, Vec<Vec<TroveTuple>>>> {
        let mut results = BTreeMap::new();
        for dep_set in dep_sets {
            let choices: Vec<Vec<TroveTuple>> = dep_set
                .iter()
                .map(|(class, dep)| {
                    self.providers(label, &DependencySet::single(class, dep.clone()))
                })
                .collect();
            results.insert(dep_set.clone(), choices);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobSet};
    use crate::trove::TroveKind;
    use crate::versions::Version;

    fn trove(name: &str, version: &str, provides: &str) -> Trove {
        let mut trove = Trove::new(
            name,
            Version::parse(version).unwrap(),
            Flavor::new(),
            TroveKind::Component,
        );
        trove.provides = DependencySet::parse(provides).unwrap();
        trove
    }

    #[test]
    fn test_resolve_dependencies_newest_on_label() {
        let mut repo = MemoryRepository::new();
        repo.add_trove(trove("libc:lib", "/a.com@rpl:devel/1:1.0-1-1", "soname: libc.so.6"));
        repo.add_trove(trove("libc:lib", "/a.com@rpl:devel/2:2.0-1-1", "soname: libc.so.6"));
        repo.add_trove(trove("libc:lib", "/b.com@rpl:devel/3:3.0-1-1", "soname: libc.so.6"));

        let label = Label::parse("a.com@rpl:devel").unwrap();
        let needed = DependencySet::parse("soname: libc.so.6 libm.so.6").unwrap();
        let resolved = repo.resolve_dependencies(&label, &[needed.clone()]).unwrap();

        let choices = &resolved[&needed];
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].len(), 1);
        assert_eq!(
            choices[0][0].version,
            Version::parse("/a.com@rpl:devel/2:2.0-1-1").unwrap()
        );
        assert!(choices[1].is_empty());
    }

    #[test]
    fn test_load_and_change_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.json");

        let mut repo = MemoryRepository::new();
        let lib = trove("foo:lib", "/a.com@rpl:devel/1:1.0-1-1", "");
        let mut foo = Trove::new(
            "foo",
            lib.version.clone(),
            Flavor::new(),
            TroveKind::Collection,
        );
        foo.add_trove(lib.tuple(), true, false);
        repo.add_trove(lib.clone());
        repo.add_trove(foo.clone());
        repo.save(&path).unwrap();

        let loaded = MemoryRepository::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);

        let jobs: JobSet = [Job::install(&foo.tuple())].into_iter().collect();
        let cs = loaded.create_change_set(&jobs, true).unwrap();
        assert_eq!(cs.troves.len(), 2);
        let cs = loaded.create_change_set(&jobs, false).unwrap();
        assert_eq!(cs.troves, vec![foo]);
    }
}
