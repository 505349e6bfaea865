//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use crate::job::{Job, JobSet};
use crate::trove::is_collection_name;
use tracing::debug;

fn installs_collection(job: &Job) -> bool {
    !job.is_erase() && is_collection_name(job.name())
}

/// Cut the dependency ordered job groups into batches.
///
/// A group is never split. A batch ends after a group installing a
/// collection, or once it holds `threshold` jobs; a threshold of zero puts
/// no limit on batch size.
pub fn split_jobs(ordering: &[Vec<Job>], threshold: usize) -> Vec<JobSet> {
    let mut batches = Vec::new();
    let mut current = JobSet::new();

    for group in ordering {
        current.extend(group.iter().cloned());
        let boundary = group.iter().any(installs_collection);
        if boundary || (threshold > 0 && current.len() >= threshold) {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    debug!("Split {} job groups into {} batches", ordering.len(), batches.len());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::Flavor;
    use crate::trove::TroveTuple;
    use crate::versions::Version;

    fn install(name: &str) -> Job {
        Job::install(&TroveTuple::new(
            name,
            Version::parse("/localhost@rpl:devel/1.0-1-1").unwrap(),
            Flavor::new(),
        ))
    }

    #[test]
    fn test_collections_close_batches() {
        let ordering = vec![
            vec![install("foo:runtime")],
            vec![install("foo:lib")],
            vec![install("foo")],
            vec![install("bar:runtime")],
        ];
        let batches = split_jobs(&ordering, 0);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert!(batches[0].contains(&install("foo")));
        assert!(batches[1].contains(&install("bar:runtime")));
    }

    #[test]
    fn test_threshold_keeps_groups_whole() {
        let ordering = vec![
            vec![install("a:lib"), install("b:lib"), install("c:lib")],
            vec![install("d:lib")],
            vec![install("e:lib")],
        ];
        let batches = split_jobs(&ordering, 2);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 2);
    }

    #[test]
    fn test_empty_ordering() {
        assert!(split_jobs(&[], 10).is_empty());
    }
}
