//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::state::{CommitDelta, InstalledSet, InstalledTrove};
use super::{DepCheckResult, LocalDatabase};
use crate::deps::Flavor;
use crate::job::JobSet;
use crate::source::{ChangeSet, SourceError, TroveSource, TroveSpec};
use crate::trove::{Trove, TroveTuple};
use crate::versions::Label;
use miette::Diagnostic;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Installed troves
/// Key: tuple key including the version timestamp
/// Value: serialized InstalledTrove
pub const TROVES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("troves");

/// Pinned troves
/// Key: tuple key including the version timestamp
/// Value: serialized TroveTuple
pub const PINS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pins");

#[derive(Error, Debug, Diagnostic)]
pub enum InstalledError {
    #[error("IO error: {0}")]
    #[diagnostic(code(trove::installed_error::io))]
    IO(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(trove::installed_error::json))]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(trove::installed_error::database),
        help("Check that no other process holds the install database open")
    )]
    Database(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),
}

pub type Result<T> = std::result::Result<T, InstalledError>;

impl From<InstalledError> for SourceError {
    fn from(e: InstalledError) -> Self {
        match e {
            InstalledError::Source(e) => e,
            InstalledError::IO(e) => SourceError::Io(e),
            InstalledError::Json(e) => SourceError::Json(e),
            InstalledError::Database(msg) => SourceError::Database(msg),
        }
    }
}

/// The install database kept in a redb file. Reads are answered from the
/// copy loaded at open time; every commit is one write transaction.
pub struct InstalledDatabase {
    db_path: PathBuf,
    db: Database,
    state: InstalledSet,
}

impl InstalledDatabase {
    /// Open the database at `db_path`, creating it and its tables when
    /// missing
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let db = Database::create(&db_path)
            .map_err(|e| InstalledError::Database(format!("Failed to create database: {}", e)))?;

        let tx = db
            .begin_write()
            .map_err(|e| InstalledError::Database(format!("Failed to begin transaction: {}", e)))?;
        {
            tx.open_table(TROVES_TABLE).map_err(|e| {
                InstalledError::Database(format!("Failed to create troves table: {}", e))
            })?;
            tx.open_table(PINS_TABLE).map_err(|e| {
                InstalledError::Database(format!("Failed to create pins table: {}", e))
            })?;
        }
        tx.commit().map_err(|e| {
            InstalledError::Database(format!("Failed to commit transaction: {}", e))
        })?;

        let state = Self::load(&db)?;
        debug!(
            "Opened install database {} with {} troves",
            db_path.display(),
            state.len()
        );

        Ok(InstalledDatabase { db_path, db, state })
    }

    fn load(db: &Database) -> Result<InstalledSet> {
        let tx = db
            .begin_read()
            .map_err(|e| InstalledError::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut records = Vec::new();
        let table = tx.open_table(TROVES_TABLE).map_err(|e| {
            InstalledError::Database(format!("Failed to open troves table: {}", e))
        })?;
        for entry in table.iter().map_err(|e| {
            InstalledError::Database(format!("Failed to iterate troves table: {}", e))
        })? {
            let (_, value) = entry.map_err(|e| {
                InstalledError::Database(format!("Failed to get entry from troves table: {}", e))
            })?;
            records.push(serde_json::from_slice::<InstalledTrove>(value.value())?);
        }

        let mut pins = Vec::new();
        let table = tx.open_table(PINS_TABLE).map_err(|e| {
            InstalledError::Database(format!("Failed to open pins table: {}", e))
        })?;
        for entry in table.iter().map_err(|e| {
            InstalledError::Database(format!("Failed to iterate pins table: {}", e))
        })? {
            let (_, value) = entry.map_err(|e| {
                InstalledError::Database(format!("Failed to get entry from pins table: {}", e))
            })?;
            pins.push(serde_json::from_slice::<TroveTuple>(value.value())?);
        }

        Ok(InstalledSet::from_records(records, pins))
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn installed(&self) -> &InstalledSet {
        &self.state
    }

    /// Record `trove` as installed outside of any changeset
    pub fn add_trove(&mut self, trove: Trove) -> Result<()> {
        let mut next = self.state.clone();
        let tuple = trove.tuple();
        next.add_trove(trove);

        let delta = CommitDelta {
            written: BTreeSet::from([tuple]),
            ..Default::default()
        };
        self.write_delta(&next, &delta, &[])?;
        self.state = next;
        Ok(())
    }

    fn write_delta(
        &self,
        state: &InstalledSet,
        delta: &CommitDelta,
        pins: &[(TroveTuple, bool)],
    ) -> Result<()> {
        let tx = self
            .db
            .begin_write()
            .map_err(|e| InstalledError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Tables borrow the transaction; they must be dropped before commit
        {
            let mut troves = tx.open_table(TROVES_TABLE).map_err(|e| {
                InstalledError::Database(format!("Failed to open troves table: {}", e))
            })?;
            for tuple in &delta.removed {
                troves.remove(tuple.key().as_str()).map_err(|e| {
                    InstalledError::Database(format!("Failed to remove from troves table: {}", e))
                })?;
            }
            for tuple in &delta.written {
                let record = state
                    .record(tuple)
                    .ok_or_else(|| SourceError::TroveNotFound(tuple.to_string()))?;
                let bytes = serde_json::to_vec(record)?;
                troves
                    .insert(tuple.key().as_str(), bytes.as_slice())
                    .map_err(|e| {
                        InstalledError::Database(format!(
                            "Failed to insert into troves table: {}",
                            e
                        ))
                    })?;
            }

            let mut pin_table = tx.open_table(PINS_TABLE).map_err(|e| {
                InstalledError::Database(format!("Failed to open pins table: {}", e))
            })?;
            for tuple in &delta.unpinned {
                pin_table.remove(tuple.key().as_str()).map_err(|e| {
                    InstalledError::Database(format!("Failed to remove from pins table: {}", e))
                })?;
            }
            for (tuple, pin) in pins {
                if *pin {
                    let bytes = serde_json::to_vec(tuple)?;
                    pin_table
                        .insert(tuple.key().as_str(), bytes.as_slice())
                        .map_err(|e| {
                            InstalledError::Database(format!(
                                "Failed to insert into pins table: {}",
                                e
                            ))
                        })?;
                } else {
                    pin_table.remove(tuple.key().as_str()).map_err(|e| {
                        InstalledError::Database(format!(
                            "Failed to remove from pins table: {}",
                            e
                        ))
                    })?;
                }
            }
        }

        tx.commit().map_err(|e| {
            InstalledError::Database(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }
}

impl TroveSource for InstalledDatabase {
    fn get_trove(&self, tuple: &TroveTuple) -> crate::source::Result<Trove> {
        self.state.get_trove(tuple)
    }

    fn has_trove(&self, tuple: &TroveTuple) -> crate::source::Result<bool> {
        self.state.has_trove(tuple)
    }

    fn find_troves(
        &self,
        label_path: &[Label],
        specs: &[TroveSpec],
        flavors: &[Flavor],
    ) -> crate::source::Result<BTreeMap<TroveSpec, Vec<TroveTuple>>> {
        self.state.find_troves(label_path, specs, flavors)
    }
}

impl LocalDatabase for InstalledDatabase {
    fn get_installed_trove(&self, tuple: &TroveTuple, pristine: bool) -> crate::source::Result<Trove> {
        self.state.get_installed_trove(tuple, pristine)
    }

    fn troves_by_name(&self, name: &str) -> crate::source::Result<Vec<TroveTuple>> {
        self.state.troves_by_name(name)
    }

    fn all_troves(&self) -> crate::source::Result<Vec<TroveTuple>> {
        self.state.all_troves()
    }

    fn outdated_troves(
        &self,
        new: &[TroveTuple],
        ineligible: &BTreeSet<TroveTuple>,
    ) -> crate::source::Result<BTreeMap<TroveTuple, Option<TroveTuple>>> {
        self.state.outdated_troves(new, ineligible)
    }

    fn dep_check(
        &self,
        jobs: &JobSet,
        source: &dyn TroveSource,
        find_ordering: bool,
    ) -> crate::source::Result<DepCheckResult> {
        self.state.dep_check(jobs, source, find_ordering)
    }

    fn get_trove_containers(
        &self,
        tuples: &[TroveTuple],
    ) -> crate::source::Result<Vec<Vec<TroveTuple>>> {
        self.state.get_trove_containers(tuples)
    }

    fn troves_are_pinned(&self, tuples: &[TroveTuple]) -> crate::source::Result<Vec<bool>> {
        self.state.troves_are_pinned(tuples)
    }

    fn pin_troves(&mut self, tuples: &[TroveTuple], pin: bool) -> crate::source::Result<()> {
        let mut next = self.state.clone();
        next.pin_troves(tuples, pin)?;

        let pins: Vec<(TroveTuple, bool)> = tuples.iter().map(|t| (t.clone(), pin)).collect();
        self.write_delta(&next, &CommitDelta::default(), &pins)?;
        self.state = next;

        for tuple in tuples {
            info!("{} {}", if pin { "Pinned" } else { "Unpinned" }, tuple);
        }
        Ok(())
    }

    fn unreferenced_troves(&self) -> crate::source::Result<Vec<TroveTuple>> {
        self.state.unreferenced_troves()
    }

    fn commit(&mut self, cs: &ChangeSet) -> crate::source::Result<()> {
        let mut next = self.state.clone();
        let delta = next.apply(cs)?;
        self.write_delta(&next, &delta, &[])?;
        self.state = next;

        info!(
            "Committed {} jobs to {}: {} removed, {} written",
            cs.jobs.len(),
            self.db_path.display(),
            delta.removed.len(),
            delta.written.len()
        );
        Ok(())
    }
}
