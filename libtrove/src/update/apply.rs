//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Committing a planned update to the local database.
//!
//! Batches are committed strictly in order. With more than one batch and
//! threading enabled, a producer thread builds the changesets of upcoming
//! batches while the current one commits; a bounded channel keeps it at
//! most a few batches ahead.

use super::{PlanningContext, Result, UpdateError, UpdateJob};
use crate::local::LocalDatabase;
use crate::repository::Repository;
use crate::source::{self, ChangeSet, TroveSpec};
use crate::trove::TroveTuple;
use std::sync::mpsc::sync_channel;
use std::thread;
use tracing::{debug, info};

/// Changesets built ahead of the committer
const PREFETCH_DEPTH: usize = 5;

fn commit_batch(
    ctx: &PlanningContext,
    db: &mut dyn LocalDatabase,
    index: usize,
    total: usize,
    cs: source::Result<ChangeSet>,
) -> Result<()> {
    let failed = |source| UpdateError::CommitFailed { batch: index, source };

    let cs = cs.map_err(failed)?;
    info!("Applying job {} of {} ({} changes)", index + 1, total, cs.jobs.len());
    db.commit(&cs).map_err(failed)?;

    let pinned: Vec<TroveTuple> = cs
        .jobs
        .iter()
        .filter_map(|job| job.new_tuple())
        .filter(|tuple| ctx.is_auto_pinned(&tuple.name))
        .collect();
    if !pinned.is_empty() {
        debug!("Pinning {} troves matching autoPinList", pinned.len());
        db.pin_troves(&pinned, true).map_err(failed)?;
    }
    Ok(())
}

/// Commit every batch of `uj`. A failed batch stops the update; the
/// batches before it stay committed.
pub fn apply_update(
    ctx: &PlanningContext,
    db: &mut dyn LocalDatabase,
    repos: &(dyn Repository + Sync),
    uj: &UpdateJob,
) -> Result<()> {
    let total = uj.batches.len();
    if total == 0 {
        return Ok(());
    }

    if total == 1 || !ctx.threaded {
        for (index, batch) in uj.batches.iter().enumerate() {
            commit_batch(ctx, db, index, total, uj.change_set(batch, repos))?;
        }
        return Ok(());
    }

    thread::scope(|scope| {
        let (tx, rx) = sync_channel::<source::Result<ChangeSet>>(PREFETCH_DEPTH);
        scope.spawn(move || {
            for batch in &uj.batches {
                // the committer hung up after a failure
                if tx.send(uj.change_set(batch, repos)).is_err() {
                    break;
                }
            }
        });

        for (index, cs) in rx.iter().enumerate() {
            commit_batch(ctx, db, index, total, cs)?;
        }
        Ok(())
    })
}

/// Pin or unpin the installed troves matching `specs`
pub fn set_pins(db: &mut dyn LocalDatabase, specs: &[TroveSpec], pin: bool) -> Result<Vec<TroveTuple>> {
    let found = db.find_troves(&[], specs, &[])?;
    let tuples: Vec<TroveTuple> = found.into_values().flatten().collect();
    db.pin_troves(&tuples, pin)?;
    info!("{} {} troves", if pin { "Pinned" } else { "Unpinned" }, tuples.len());
    Ok(tuples)
}
