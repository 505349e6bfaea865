//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::job::JobSet;
use crate::local::LocalDatabase;
use crate::source::{Result, TroveSource};
use crate::trove::{install_bucket, InstallBucket, Trove, TroveTuple, VersionFlavor};
use crate::versions::Branch;
use std::collections::BTreeMap;
use tracing::debug;

/// Version pairs of one trove name that cannot be installed together
pub type BucketConflicts = BTreeMap<String, Vec<(VersionFlavor, VersionFlavor)>>;

fn bucket(source: &dyn TroveSource, trove: &Trove) -> Result<InstallBucket> {
    install_bucket(trove, |t| source.get_trove(t))
}

/// True when `new` can be installed next to the installed `old`. The old
/// side is judged by what is actually installed of it.
pub(crate) fn buckets_compatible(
    db: &dyn LocalDatabase,
    source: &dyn TroveSource,
    old: &TroveTuple,
    new: &Trove,
) -> Result<bool> {
    let local = db.get_installed_trove(old, false)?;
    let old_bucket = install_bucket(&local, |t| db.get_installed_trove(t, false))?;
    let new_bucket = bucket(source, new)?;
    Ok(old_bucket.compatible_with(&new_bucket))
}

/// Find troves installed more than once on the same branch whose buckets
/// overlap
pub fn check_bucket_conflicts(source: &dyn TroveSource, jobs: &JobSet) -> Result<BucketConflicts> {
    let mut groups: BTreeMap<(String, Branch), Vec<TroveTuple>> = BTreeMap::new();
    for tuple in jobs.iter().filter_map(|j| j.new_tuple()) {
        groups
            .entry((tuple.name.clone(), tuple.version.branch().clone()))
            .or_default()
            .push(tuple);
    }

    let mut conflicts = BucketConflicts::new();
    for ((name, branch), tuples) in groups {
        if tuples.len() < 2 {
            continue;
        }
        debug!("Checking {} flavors of {} on {}", tuples.len(), name, branch);

        let mut buckets = Vec::with_capacity(tuples.len());
        for tuple in &tuples {
            let trove = source.get_trove(tuple)?;
            buckets.push((tuple.version_flavor(), bucket(source, &trove)?));
        }

        for (i, (first, first_bucket)) in buckets.iter().enumerate() {
            for (second, second_bucket) in &buckets[i + 1..] {
                if !first_bucket.compatible_with(second_bucket) {
                    conflicts
                        .entry(name.clone())
                        .or_default()
                        .push((first.clone(), second.clone()));
                }
            }
        }
    }
    Ok(conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::Flavor;
    use crate::job::Job;
    use crate::source::ChangeSetTroveSource;
    use crate::trove::TroveKind;
    use crate::versions::Version;

    fn component(flavor: &str, paths: &[&str]) -> Trove {
        let mut trove = Trove::new(
            "foo:lib",
            Version::parse("/localhost@rpl:devel/1.0-1-1").unwrap(),
            Flavor::parse(flavor).unwrap(),
            TroveKind::Component,
        );
        trove.paths = paths.iter().map(|p| p.to_string()).collect();
        trove
    }

    #[test]
    fn test_overlapping_paths_conflict() {
        let a = component("is: x86", &["/usr/lib/libfoo.so"]);
        let b = component("is: x86_64", &["/usr/lib/libfoo.so"]);
        let mut source = ChangeSetTroveSource::new();
        source.add_trove(a.clone());
        source.add_trove(b.clone());

        let jobs: JobSet = [Job::install(&a.tuple()), Job::install(&b.tuple())]
            .into_iter()
            .collect();
        let conflicts = check_bucket_conflicts(&source, &jobs).unwrap();
        assert_eq!(conflicts.get("foo:lib").map(Vec::len), Some(1));
    }

    #[test]
    fn test_disjoint_paths_coexist() {
        let a = component("is: x86", &["/usr/lib/libfoo.so"]);
        let b = component("is: x86_64", &["/usr/lib64/libfoo.so"]);
        let mut source = ChangeSetTroveSource::new();
        source.add_trove(a.clone());
        source.add_trove(b.clone());

        let jobs: JobSet = [Job::install(&a.tuple()), Job::install(&b.tuple())]
            .into_iter()
            .collect();
        assert!(check_bucket_conflicts(&source, &jobs).unwrap().is_empty());
    }
}
