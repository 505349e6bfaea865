//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{Trove, TroveTuple};
use std::collections::BTreeSet;

/// The set of paths a trove claims on the file system. Two troves whose
/// buckets share a path cannot be installed side by side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallBucket(BTreeSet<String>);

impl InstallBucket {
    pub fn new<I: IntoIterator<Item = String>>(paths: I) -> Self {
        InstallBucket(paths.into_iter().collect())
    }

    pub fn compatible_with(&self, other: &InstallBucket) -> bool {
        self.0.is_disjoint(&other.0)
    }

    pub fn intersect(&self, other: &InstallBucket) -> InstallBucket {
        InstallBucket(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bucket of a trove. A component's bucket is its own paths; a
/// collection's bucket is the intersection of its members' buckets, with
/// members fetched through `get`.
pub fn install_bucket<F, E>(trove: &Trove, mut get: F) -> Result<InstallBucket, E>
where
    F: FnMut(&TroveTuple) -> Result<Trove, E>,
{
    if !trove.is_collection() {
        return Ok(InstallBucket::new(trove.paths.iter().cloned()));
    }

    let mut bucket: Option<InstallBucket> = None;
    for member in trove.iter_troves() {
        let member = get(member)?;
        let member_bucket = InstallBucket::new(member.paths.iter().cloned());
        bucket = Some(match bucket {
            None => member_bucket,
            Some(b) => b.intersect(&member_bucket),
        });
    }
    Ok(bucket.unwrap_or_default())
}
