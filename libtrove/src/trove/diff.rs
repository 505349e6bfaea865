//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Pairing of old and new trove tuples.
//!
//! Tuples present on only one side are matched per name. Flavors are paired
//! first (same branch before anything else), versions are paired within a
//! flavor pair, and whatever remains is paired by version alone. Unpaired
//! old tuples become erasures and unpaired new tuples become installs.

use super::{TroveChange, TroveTuple};
use crate::deps::Flavor;
use crate::versions::{Branch, Version};
use std::collections::{BTreeMap, BTreeSet};

const NEG_INF: i32 = -99999;
const EMPTY_MATCH: i32 = 9999;

type ByFlavor = BTreeMap<Flavor, Vec<Version>>;

fn by_flavor<'a>(tuples: impl Iterator<Item = &'a TroveTuple>) -> ByFlavor {
    let mut map = ByFlavor::new();
    for t in tuples {
        map.entry(t.flavor.clone()).or_default().push(t.version.clone());
    }
    map
}

fn by_branch(tuples: &BTreeSet<TroveTuple>) -> BTreeMap<Branch, ByFlavor> {
    let mut map: BTreeMap<Branch, ByFlavor> = BTreeMap::new();
    for t in tuples {
        map.entry(t.version.branch().clone())
            .or_default()
            .entry(t.flavor.clone())
            .or_default()
            .push(t.version.clone());
    }
    map
}

/// Flavors ordered by their string form so ties resolve to the
/// lexicographically smallest flavor
fn sorted_flavors(map: &ByFlavor) -> Vec<&Flavor> {
    let mut flavors: Vec<&Flavor> = map.keys().collect();
    flavors.sort_by_cached_key(|f| f.to_string());
    flavors
}

fn pair_score(new: &Flavor, old: &Flavor) -> i32 {
    [Some(NEG_INF), new.score(old), old.score(new)]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(NEG_INF)
}

/// Pair old and new tuples of one name by version
fn version_match(
    old: &BTreeSet<TroveTuple>,
    new: &BTreeSet<TroveTuple>,
) -> Vec<(Option<TroveTuple>, Option<TroveTuple>)> {
    let mut old: BTreeSet<TroveTuple> = old.clone();
    let mut new: BTreeSet<TroveTuple> = new.clone();
    let mut matches = Vec::new();

    // same branch: the newest unmatched old version goes with each new one
    let candidates: Vec<(TroveTuple, Vec<TroveTuple>)> = new
        .iter()
        .map(|n| {
            let mut same: Vec<TroveTuple> = old
                .iter()
                .filter(|o| o.version.branch() == n.version.branch())
                .cloned()
                .collect();
            same.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| b.cmp(a)));
            (n.clone(), same)
        })
        .filter(|(_, same)| !same.is_empty())
        .collect();

    for (n, same) in candidates {
        if let Some(o) = same.into_iter().find(|o| old.contains(o)) {
            old.remove(&o);
            new.remove(&n);
            matches.push((Some(o), Some(n)));
        }
    }

    // across branches, closest lineage first
    let mut scored: Vec<(usize, TroveTuple, TroveTuple)> = Vec::new();
    for n in &new {
        for o in &old {
            let score = n.version.closeness(&o.version);
            if score > 0 {
                scored.push((score, o.clone(), n.clone()));
            }
        }
    }
    scored.sort();
    scored.reverse();
    for (_, o, n) in scored {
        if old.contains(&o) && new.contains(&n) {
            old.remove(&o);
            new.remove(&n);
            matches.push((Some(o), Some(n)));
        }
    }

    // the rest is zipped newest to newest
    let mut old_list: Vec<TroveTuple> = old.into_iter().collect();
    let mut new_list: Vec<TroveTuple> = new.into_iter().collect();
    old_list.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| b.cmp(a)));
    new_list.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| b.cmp(a)));

    let paired = old_list.len().min(new_list.len());
    for (o, n) in old_list.iter().zip(new_list.iter()) {
        matches.push((Some(o.clone()), Some(n.clone())));
    }
    for o in old_list.into_iter().skip(paired) {
        matches.push((Some(o), None));
    }
    for n in new_list.into_iter().skip(paired) {
        matches.push((None, Some(n)));
    }

    matches
}

fn change(name: &str, old: Option<&TroveTuple>, new: Option<&TroveTuple>) -> TroveChange {
    TroveChange {
        name: name.to_string(),
        old: old.map(TroveTuple::version_flavor),
        new: new.map(TroveTuple::version_flavor),
    }
}

/// Flavor pairs for one name, as (new flavor, old flavor)
fn pair_flavors(added: &BTreeSet<TroveTuple>, removed: &BTreeSet<TroveTuple>) -> Vec<(Flavor, Flavor)> {
    let added_by_branch = by_branch(added);
    let removed_by_branch = by_branch(removed);

    let mut search_order: Vec<(ByFlavor, ByFlavor)> = Vec::new();
    for (branch, added_flavors) in &added_by_branch {
        if let Some(removed_flavors) = removed_by_branch.get(branch) {
            search_order.push((added_flavors.clone(), removed_flavors.clone()));
        }
    }
    search_order.push((by_flavor(added.iter()), by_flavor(removed.iter())));

    let mut used: BTreeSet<Flavor> = BTreeSet::new();
    let mut pairs = Vec::new();

    for (added_flavors, removed_flavors) in &search_order {
        loop {
            let mut best: Option<(i32, &Flavor, &Flavor)> = None;

            for new_flavor in sorted_flavors(added_flavors) {
                if used.contains(new_flavor) {
                    continue;
                }
                // empty flavors do not score; they only pair with each other
                if new_flavor.is_empty() {
                    if removed_flavors.contains_key(new_flavor) {
                        best = Some((EMPTY_MATCH, new_flavor, new_flavor));
                        break;
                    }
                    continue;
                }
                for old_flavor in sorted_flavors(removed_flavors) {
                    if old_flavor.is_empty() || used.contains(old_flavor) {
                        continue;
                    }
                    let score = pair_score(new_flavor, old_flavor);
                    if best.map_or(true, |(s, _, _)| score > s) {
                        best = Some((score, new_flavor, old_flavor));
                    }
                }
            }

            match best {
                Some((score, new_flavor, old_flavor)) if score > NEG_INF => {
                    used.insert(new_flavor.clone());
                    used.insert(old_flavor.clone());
                    pairs.push((new_flavor.clone(), old_flavor.clone()));
                }
                _ => break,
            }
        }
    }

    pairs
}

/// Match `old` against `new` and report what changed. Tuples present on
/// both sides are unchanged and not reported.
pub fn match_troves(old: &BTreeSet<TroveTuple>, new: &BTreeSet<TroveTuple>) -> Vec<TroveChange> {
    let mut added: BTreeMap<&str, BTreeSet<TroveTuple>> = BTreeMap::new();
    let mut removed: BTreeMap<&str, BTreeSet<TroveTuple>> = BTreeMap::new();
    for t in new.difference(old) {
        added.entry(t.name.as_str()).or_default().insert(t.clone());
    }
    for t in old.difference(new) {
        removed.entry(t.name.as_str()).or_default().insert(t.clone());
    }

    let mut changes = Vec::new();

    for (name, mut new_set) in added {
        let Some(mut old_set) = removed.remove(name) else {
            changes.extend(new_set.iter().map(|n| change(name, None, Some(n))));
            continue;
        };

        for (new_flavor, old_flavor) in pair_flavors(&new_set, &old_set) {
            let olds: BTreeSet<TroveTuple> = old_set
                .iter()
                .filter(|t| t.flavor == old_flavor)
                .cloned()
                .collect();
            let news: BTreeSet<TroveTuple> = new_set
                .iter()
                .filter(|t| t.flavor == new_flavor)
                .cloned()
                .collect();

            for (o, n) in version_match(&olds, &news) {
                if let (Some(o), Some(n)) = (o, n) {
                    changes.push(change(name, Some(&o), Some(&n)));
                    old_set.remove(&o);
                    new_set.remove(&n);
                }
            }
        }

        for (o, n) in version_match(&old_set, &new_set) {
            changes.push(change(name, o.as_ref(), n.as_ref()));
        }
    }

    for (name, old_set) in removed {
        changes.extend(old_set.iter().map(|o| change(name, Some(o), None)));
    }

    changes.sort();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(name: &str, version: &str, flavor: &str) -> TroveTuple {
        TroveTuple::new(
            name,
            Version::parse(version).unwrap(),
            Flavor::parse(flavor).unwrap(),
        )
    }

    fn set(tuples: &[TroveTuple]) -> BTreeSet<TroveTuple> {
        tuples.iter().cloned().collect()
    }

    #[test]
    fn test_simple_update_and_install() {
        let old = set(&[tuple("foo:runtime", "/a.com@rpl:devel/1:1.0-1-1", "")]);
        let new = set(&[
            tuple("foo:runtime", "/a.com@rpl:devel/2:2.0-1-1", ""),
            tuple("foo:lib", "/a.com@rpl:devel/2:2.0-1-1", ""),
        ]);
        let changes = match_troves(&old, &new);
        assert_eq!(changes.len(), 2);

        let lib = changes.iter().find(|c| c.name == "foo:lib").unwrap();
        assert!(lib.old.is_none());
        let runtime = changes.iter().find(|c| c.name == "foo:runtime").unwrap();
        assert_eq!(runtime.old.as_ref().unwrap().version.to_string(), "/a.com@rpl:devel/1.0-1-1");
        assert_eq!(runtime.new.as_ref().unwrap().version.to_string(), "/a.com@rpl:devel/2.0-1-1");
    }

    #[test]
    fn test_unchanged_is_not_reported() {
        let both = set(&[tuple("foo:runtime", "/a.com@rpl:devel/1:1.0-1-1", "")]);
        assert!(match_troves(&both, &both).is_empty());
    }

    #[test]
    fn test_flavors_pair_by_score() {
        let old = set(&[
            tuple("foo:lib", "/a.com@rpl:devel/1:1.0-1-1", "is: x86"),
            tuple("foo:lib", "/a.com@rpl:devel/1:1.0-1-1", "is: x86_64"),
        ]);
        let new = set(&[
            tuple("foo:lib", "/a.com@rpl:devel/2:2.0-1-1", "is: x86"),
            tuple("foo:lib", "/a.com@rpl:devel/2:2.0-1-1", "is: x86_64"),
        ]);
        let changes = match_troves(&old, &new);
        assert_eq!(changes.len(), 2);
        for c in changes {
            assert_eq!(c.old.unwrap().flavor, c.new.unwrap().flavor);
        }
    }

    #[test]
    fn test_empty_flavor_only_pairs_with_empty() {
        let old = set(&[tuple("foo:lib", "/a.com@rpl:devel/1:1.0-1-1", "is: x86")]);
        let new = set(&[tuple("foo:lib", "/a.com@rpl:devel/2:2.0-1-1", "")]);
        // no flavor pair exists, so the leftovers are matched by version
        let changes = match_troves(&old, &new);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].old.is_some() && changes[0].new.is_some());
    }

    #[test]
    fn test_erase_when_removed() {
        let old = set(&[
            tuple("foo:runtime", "/a.com@rpl:devel/1:1.0-1-1", ""),
            tuple("foo:doc", "/a.com@rpl:devel/1:1.0-1-1", ""),
        ]);
        let new = set(&[tuple("foo:runtime", "/a.com@rpl:devel/1:1.0-1-1", "")]);
        let changes = match_troves(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "foo:doc");
        assert!(changes[0].new.is_none());
    }

    #[test]
    fn test_same_branch_preferred_over_other_branch() {
        let old = set(&[
            tuple("foo:runtime", "/a.com@rpl:devel/1:1.0-1-1", ""),
            tuple("foo:runtime", "/b.com@rpl:other/1:1.0-1-1", ""),
        ]);
        let new = set(&[tuple("foo:runtime", "/b.com@rpl:other/2:2.0-1-1", "")]);
        let changes = match_troves(&old, &new);
        let update = changes.iter().find(|c| c.new.is_some()).unwrap();
        assert_eq!(
            update.old.as_ref().unwrap().version.branch().to_string(),
            "/b.com@rpl:other"
        );
        let erase = changes.iter().find(|c| c.new.is_none()).unwrap();
        assert_eq!(
            erase.old.as_ref().unwrap().version.branch().to_string(),
            "/a.com@rpl:devel"
        );
    }
}
