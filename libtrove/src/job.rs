//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Jobs and job sets
//!
//! A job is one change to the set of installed troves. Absolute installs
//! have not been matched against the installed troves yet; planning turns
//! every one of them into an install or an update before the job set is
//! handed out.

use crate::trove::{TroveTuple, VersionFlavor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    Install {
        name: String,
        new: VersionFlavor,
    },
    Erase {
        name: String,
        old: VersionFlavor,
    },
    Update {
        name: String,
        old: VersionFlavor,
        new: VersionFlavor,
    },
    AbsoluteInstall {
        name: String,
        new: VersionFlavor,
    },
}

impl Job {
    pub fn install(tuple: &TroveTuple) -> Job {
        Job::Install {
            name: tuple.name.clone(),
            new: tuple.version_flavor(),
        }
    }

    pub fn absolute(tuple: &TroveTuple) -> Job {
        Job::AbsoluteInstall {
            name: tuple.name.clone(),
            new: tuple.version_flavor(),
        }
    }

    pub fn erase(tuple: &TroveTuple) -> Job {
        Job::Erase {
            name: tuple.name.clone(),
            old: tuple.version_flavor(),
        }
    }

    pub fn update(old: &TroveTuple, new: &TroveTuple) -> Job {
        Job::Update {
            name: new.name.clone(),
            old: old.version_flavor(),
            new: new.version_flavor(),
        }
    }

    /// Build a job from optional sides; `None` when both are missing. An
    /// absolute job cannot have an old side, so `absolute` only applies to
    /// installs.
    pub fn from_sides(
        name: &str,
        old: Option<VersionFlavor>,
        new: Option<VersionFlavor>,
        absolute: bool,
    ) -> Option<Job> {
        let name = name.to_string();
        match (old, new) {
            (None, None) => None,
            (Some(old), None) => Some(Job::Erase { name, old }),
            (None, Some(new)) if absolute => Some(Job::AbsoluteInstall { name, new }),
            (None, Some(new)) => Some(Job::Install { name, new }),
            (Some(old), Some(new)) => Some(Job::Update { name, old, new }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Job::Install { name, .. }
            | Job::Erase { name, .. }
            | Job::Update { name, .. }
            | Job::AbsoluteInstall { name, .. } => name,
        }
    }

    pub fn old_side(&self) -> Option<&VersionFlavor> {
        match self {
            Job::Erase { old, .. } | Job::Update { old, .. } => Some(old),
            _ => None,
        }
    }

    pub fn new_side(&self) -> Option<&VersionFlavor> {
        match self {
            Job::Install { new, .. } | Job::Update { new, .. } | Job::AbsoluteInstall { new, .. } => {
                Some(new)
            }
            Job::Erase { .. } => None,
        }
    }

    pub fn old_tuple(&self) -> Option<TroveTuple> {
        self.old_side().map(|vf| vf.tuple(self.name()))
    }

    pub fn new_tuple(&self) -> Option<TroveTuple> {
        self.new_side().map(|vf| vf.tuple(self.name()))
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, Job::AbsoluteInstall { .. })
    }

    pub fn is_erase(&self) -> bool {
        matches!(self, Job::Erase { .. })
    }

    /// Same change with the old side replaced; rooting an absolute install
    /// produces a relative job
    pub fn rooted(&self, old: Option<VersionFlavor>) -> Option<Job> {
        Job::from_sides(self.name(), old, self.new_side().cloned(), false)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Job::Install { name, new } => write!(f, "+{}={}", name, new),
            Job::AbsoluteInstall { name, new } => write!(f, "+{}={} (absolute)", name, new),
            Job::Erase { name, old } => write!(f, "-{}={}", name, old),
            Job::Update { name, old, new } => write!(f, "{}={}--{}", name, old, new),
        }
    }
}

/// A replacement a pin prevented: collections that now reference
/// `needed` keep referencing the `pinned` trove instead
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinMapping {
    pub name: String,
    pub pinned: VersionFlavor,
    pub needed: VersionFlavor,
}

impl PinMapping {
    pub fn pinned_tuple(&self) -> TroveTuple {
        self.pinned.tuple(&self.name)
    }

    pub fn needed_tuple(&self) -> TroveTuple {
        self.needed.tuple(&self.name)
    }
}

impl fmt::Display for PinMapping {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} pinned at {} (needed {})", self.name, self.pinned, self.needed)
    }
}

/// A set of jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSet {
    jobs: BTreeSet<Job>,
}

impl JobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) -> bool {
        self.jobs.insert(job)
    }

    pub fn remove(&mut self, job: &Job) -> bool {
        self.jobs.remove(job)
    }

    pub fn contains(&self, job: &Job) -> bool {
        self.jobs.contains(job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn retain<F: FnMut(&Job) -> bool>(&mut self, f: F) {
        self.jobs.retain(f)
    }

    /// Old sides of every job that removes or replaces an installed trove
    pub fn old_tuples(&self) -> BTreeSet<TroveTuple> {
        self.jobs.iter().filter_map(Job::old_tuple).collect()
    }

    pub fn new_tuples(&self) -> BTreeSet<TroveTuple> {
        self.jobs.iter().filter_map(Job::new_tuple).collect()
    }

    /// Installed troves claimed as the old side by more than one job
    pub fn duplicate_old_sides(&self) -> BTreeMap<TroveTuple, Vec<Job>> {
        let mut claims: BTreeMap<TroveTuple, Vec<Job>> = BTreeMap::new();
        for job in &self.jobs {
            if let Some(old) = job.old_tuple() {
                claims.entry(old).or_default().push(job.clone());
            }
        }
        claims.retain(|_, jobs| jobs.len() > 1);
        claims
    }
}

impl FromIterator<Job> for JobSet {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        JobSet {
            jobs: iter.into_iter().collect(),
        }
    }
}

impl Extend<Job> for JobSet {
    fn extend<I: IntoIterator<Item = Job>>(&mut self, iter: I) {
        self.jobs.extend(iter)
    }
}

impl IntoIterator for JobSet {
    type Item = Job;
    type IntoIter = std::collections::btree_set::IntoIter<Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.into_iter()
    }
}

impl<'a> IntoIterator for &'a JobSet {
    type Item = &'a Job;
    type IntoIter = std::collections::btree_set::Iter<'a, Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}

impl fmt::Display for JobSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for job in &self.jobs {
            writeln!(f, "{}", job)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::Flavor;
    use crate::versions::Version;

    fn t(name: &str, version: &str) -> TroveTuple {
        TroveTuple::new(name, Version::parse(version).unwrap(), Flavor::new())
    }

    #[test]
    fn test_from_sides() {
        let old = t("foo:runtime", "/a.com@rpl:devel/1.0-1-1");
        let new = t("foo:runtime", "/a.com@rpl:devel/2.0-1-1");

        assert_eq!(Job::from_sides("foo:runtime", None, None, false), None);
        assert!(Job::from_sides("foo:runtime", None, Some(new.version_flavor()), true)
            .unwrap()
            .is_absolute());
        assert!(Job::from_sides("foo:runtime", Some(old.version_flavor()), None, true)
            .unwrap()
            .is_erase());

        let update = Job::update(&old, &new);
        assert_eq!(update.old_tuple(), Some(old.clone()));
        assert_eq!(update.new_tuple(), Some(new.clone()));
        assert_eq!(
            update.to_string(),
            "foo:runtime=/a.com@rpl:devel/1.0-1-1[]--/a.com@rpl:devel/2.0-1-1[]"
        );

        let rooted = Job::absolute(&new).rooted(Some(old.version_flavor())).unwrap();
        assert_eq!(rooted, update);
    }

    #[test]
    fn test_duplicate_old_sides() {
        let old = t("foo:runtime", "/a.com@rpl:devel/1.0-1-1");
        let a = t("foo:runtime", "/a.com@rpl:devel/2.0-1-1");
        let b = t("foo:runtime", "/b.com@rpl:devel/2.0-1-1");

        let mut jobs = JobSet::new();
        jobs.insert(Job::update(&old, &a));
        assert!(jobs.duplicate_old_sides().is_empty());
        jobs.insert(Job::update(&old, &b));
        let dups = jobs.duplicate_old_sides();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[&old].len(), 2);
    }
}
