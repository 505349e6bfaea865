//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Deciding which of the troves a job set could remove actually go.
//!
//! Every old side of a job becomes a node. Installed collections holding
//! an undecided node are pulled in as kept parents, and a kept node keeps
//! all of its children. What is left undecided, or was asked for, is
//! erased; nodes only there because an update replaces them never produce
//! an erase job of their own.

use crate::job::{Job, JobSet};
use crate::local::LocalDatabase;
use crate::source::Result;
use crate::trove::TroveTuple;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Erase,
    Keep,
    Unknown,
}

#[derive(Debug, Clone)]
struct Node {
    tuple: TroveTuple,
    state: NodeState,
    children: Vec<usize>,
    from_update: bool,
}

/// Containment graph of removal candidates
#[derive(Debug, Default)]
pub struct ErasureGraph {
    nodes: Vec<Node>,
    index: BTreeMap<TroveTuple, usize>,
}

impl ErasureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or settle the state of an undecided one
    pub fn add(&mut self, tuple: &TroveTuple, state: NodeState, from_update: bool) -> usize {
        if let Some(&id) = self.index.get(tuple) {
            let node = &mut self.nodes[id];
            if node.state == NodeState::Unknown {
                node.state = state;
                node.from_update = from_update;
            }
            return id;
        }

        let id = self.nodes.len();
        self.nodes.push(Node {
            tuple: tuple.clone(),
            state,
            children: Vec::new(),
            from_update,
        });
        self.index.insert(tuple.clone(), id);
        id
    }

    pub fn get(&self, tuple: &TroveTuple) -> Option<NodeState> {
        self.index.get(tuple).map(|&id| self.nodes[id].state)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn force(&mut self, tuple: &TroveTuple, state: NodeState) {
        if let Some(&id) = self.index.get(tuple) {
            self.nodes[id].state = state;
        }
    }

    /// Pull in the installed collections holding undecided nodes
    fn add_parents(&mut self, db: &dyn LocalDatabase) -> Result<()> {
        let mut need_parents: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.state == NodeState::Unknown)
            .map(|(id, _)| id)
            .collect();

        while !need_parents.is_empty() {
            let tuples: Vec<TroveTuple> =
                need_parents.iter().map(|&id| self.nodes[id].tuple.clone()).collect();
            let containers = db.get_trove_containers(&tuples)?;

            let mut next = Vec::new();
            for (&child, parents) in need_parents.iter().zip(containers) {
                for parent in parents {
                    match self.index.get(&parent) {
                        Some(&id) => self.nodes[id].children.push(child),
                        None => {
                            let id = self.add(&parent, NodeState::Keep, false);
                            self.nodes[id].children.push(child);
                            next.push(id);
                        }
                    }
                }
            }
            need_parents = next;
        }
        Ok(())
    }

    fn propagate_keep(&mut self) {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.state == NodeState::Keep)
            .map(|(id, _)| id)
            .collect();

        while let Some(id) = stack.pop() {
            if seen[id] {
                continue;
            }
            seen[id] = true;
            self.nodes[id].state = NodeState::Keep;
            stack.extend(self.nodes[id].children.iter().copied());
        }
    }

    /// Tuples that end up erased
    fn erased(&self) -> impl Iterator<Item = &TroveTuple> {
        self.nodes
            .iter()
            .filter(|n| n.state != NodeState::Keep && !n.from_update)
            .map(|n| &n.tuple)
    }
}

/// The erase jobs `jobs` implies. `primary_erases` were asked for and go
/// regardless of containment; troves in `referenced` are still needed by
/// something being installed.
pub fn find_erasures(
    db: &dyn LocalDatabase,
    primary_erases: &[TroveTuple],
    jobs: &JobSet,
    referenced: &BTreeSet<TroveTuple>,
) -> Result<JobSet> {
    let mut graph = ErasureGraph::new();
    for job in jobs {
        if let Some(old) = job.old_tuple() {
            graph.add(&old, NodeState::Unknown, job.new_side().is_some());
        }
    }

    for tuple in primary_erases {
        graph.force(tuple, NodeState::Erase);
    }

    graph.add_parents(db)?;

    for tuple in referenced {
        if graph.get(tuple) == Some(NodeState::Unknown) {
            graph.force(tuple, NodeState::Keep);
        }
    }

    graph.propagate_keep();

    let erasures: JobSet = graph.erased().map(Job::erase).collect();
    trace!("Erasure graph has {} nodes", graph.len());
    debug!("Found {} erasures", erasures.len());
    Ok(erasures)
}
