//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::{PlanningContext, Result, UpdateError};
use crate::job::{Job, JobSet};
use crate::local::LocalDatabase;
use crate::source::{ChangeSet, ChangeSetTroveSource, SourceError, TroveSource, TroveSpec};
use crate::trove::{RedirectTarget, TroveTuple};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// For each redirect target (`None` for redirects without targets), the
/// installed troves the redirects leading there replace
pub type RedirectMap = BTreeMap<Option<TroveTuple>, Vec<TroveTuple>>;

/// Find the best match for a redirect target
fn resolve_target(
    ctx: &PlanningContext,
    search: &dyn TroveSource,
    target: &RedirectTarget,
) -> Result<TroveTuple> {
    let spec = TroveSpec::new(&target.name, target.version.as_deref(), target.flavor.clone());
    let mut found = search.find_troves(&ctx.install_label_path, &[spec.clone()], &ctx.install_flavors())?;
    found
        .remove(&spec)
        .and_then(|tuples| tuples.into_iter().next())
        .ok_or_else(|| SourceError::TroveNotFound(spec.to_string()).into())
}

/// Merge `tuple` (and its members) into the in-pass cache
fn load(cache: &mut ChangeSetTroveSource, search: &dyn TroveSource, tuple: &TroveTuple) -> Result<()> {
    if cache.contains(tuple) {
        return Ok(());
    }
    let jobs: JobSet = [Job::install(tuple)].into_iter().collect();
    let cs = ChangeSet::from_jobs(search, &jobs, true)?;
    cache.add_change_set(&cs);
    Ok(())
}

/// Replace jobs installing redirects with jobs installing their targets.
///
/// A redirect is never installed. Targets named like the redirect (both
/// collections or both components) take its place as primary jobs and
/// are recorded in the returned map; other targets are only followed in
/// case they redirect again.
pub(crate) fn process_redirects(
    ctx: &PlanningContext,
    db: &dyn LocalDatabase,
    search: &dyn TroveSource,
    cache: &mut ChangeSetTroveSource,
    jobs: &mut JobSet,
    recurse: bool,
) -> Result<RedirectMap> {
    let mut redirects: RedirectMap = BTreeMap::new();
    let mut todo: Vec<Job> = jobs.iter().cloned().collect();
    let mut seen: BTreeSet<TroveTuple> = BTreeSet::new();

    while let Some(job) = todo.pop() {
        let Some(item) = job.new_tuple() else {
            continue;
        };
        if !seen.insert(item.clone()) {
            continue;
        }
        let trove = match cache.get_trove(&item) {
            Ok(trove) => trove,
            Err(_) => search.get_trove(&item)?,
        };
        if !trove.is_redirect() {
            continue;
        }
        if !recurse {
            return Err(UpdateError::RedirectWithoutRecurse(item.to_string()));
        }

        let is_primary = jobs.remove(&job);
        if trove.redirects.is_empty() {
            info!("Removing {}, which redirects to nothing", item);
            redirects.entry(None).or_default().push(item);
            continue;
        }

        let mut targets = Vec::new();
        for target in &trove.redirects {
            let tuple = resolve_target(ctx, search, target)?;
            load(cache, search, &tuple)?;
            debug!("{} redirects to {}", item, tuple);

            if target.name.contains(':') == item.name.contains(':') {
                redirects
                    .entry(Some(tuple.clone()))
                    .or_default()
                    .push(item.clone());
                targets.push(tuple);
            } else {
                todo.push(Job::absolute(&tuple));
            }
        }

        if is_primary {
            for target in targets {
                let job = Job::absolute(&target);
                jobs.insert(job.clone());
                todo.push(job);
            }
        }
    }

    // what counts is what the redirects replace locally
    for sources in redirects.values_mut() {
        let outdated = db.outdated_troves(sources, &BTreeSet::new())?;
        *sources = outdated.into_values().flatten().collect();
    }

    Ok(redirects)
}
