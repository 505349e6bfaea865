//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::deps::Flavor;
use crate::job::{Job, JobSet};
use crate::local::{InstalledSet, LocalDatabase};
use crate::repository::MemoryRepository;
use crate::trove::{Trove, TroveKind, TroveTuple};
use crate::versions::Version;
use maplit::btreeset;

const V1: &str = "/localhost@rpl:devel/1.0-1-1";
const V2: &str = "/localhost@rpl:devel/2.0-1-1";

fn context() -> PlanningContext {
    PlanningContext::parse("[client]\ninstallLabelPath = localhost@rpl:devel\nautoResolve = true\n").unwrap()
}

fn component(name: &str, version: &str) -> Trove {
    Trove::new(name, Version::parse(version).unwrap(), Flavor::new(), TroveKind::Component)
}

fn collection(name: &str, version: &str, members: &[&Trove]) -> Trove {
    let mut trove = Trove::new(name, Version::parse(version).unwrap(), Flavor::new(), TroveKind::Collection);
    for member in members {
        trove.add_trove(member.tuple(), true, false);
    }
    trove
}

fn planned_jobs(uj: &UpdateJob) -> JobSet {
    uj.all_jobs().cloned().collect()
}

fn plan(
    db: &InstalledSet,
    repos: &MemoryRepository,
    args: &[&str],
    options: &UpdateOptions,
) -> Result<UpdateJob> {
    let ctx = context();
    let items = parse_change_items(args, options.keep_existing, options.update_by_default)?;
    UpdatePlanner::new(&ctx, db, repos).plan_update(&items, options)
}

/// foo and bar both hold shared:lib; foo also holds foo:runtime
fn shared_member_db() -> (InstalledSet, Vec<Trove>) {
    let runtime = component("foo:runtime", V1);
    let shared = component("shared:lib", V1);
    let foo = collection("foo", V1, &[&runtime, &shared]);
    let bar = collection("bar", V1, &[&shared]);

    let mut db = InstalledSet::new();
    for trove in [&runtime, &shared, &foo, &bar] {
        db.add_trove(trove.clone());
    }
    (db, vec![foo, runtime, shared, bar])
}

#[test]
fn test_erase_collection_keeps_shared_members() {
    let (db, troves) = shared_member_db();
    let repos = MemoryRepository::new();

    let uj = plan(&db, &repos, &["-foo"], &UpdateOptions::default()).unwrap();
    let expected: JobSet = [Job::erase(&troves[0].tuple()), Job::erase(&troves[1].tuple())]
        .into_iter()
        .collect();
    assert_eq!(planned_jobs(&uj), expected);
    assert_eq!(uj.primary_jobs().len(), 1);
}

#[test]
fn test_erase_skips_pinned_members() {
    let (mut db, troves) = shared_member_db();
    db.pin_troves(&[troves[1].tuple()], true).unwrap();
    let repos = MemoryRepository::new();

    let uj = plan(&db, &repos, &["-foo"], &UpdateOptions::default()).unwrap();
    let expected: JobSet = [Job::erase(&troves[0].tuple())].into_iter().collect();
    assert_eq!(planned_jobs(&uj), expected);
}

#[test]
fn test_keep_existing_installs_next_to_old() {
    let mut db = InstalledSet::new();
    db.add_trove(component("foo:runtime", V1));
    let mut repos = MemoryRepository::new();
    let new = component("foo:runtime", V2);
    repos.add_trove(new.clone());

    let options = UpdateOptions {
        keep_existing: true,
        ..Default::default()
    };
    let uj = plan(&db, &repos, &["foo:runtime=2.0-1-1"], &options).unwrap();
    let expected: JobSet = [Job::install(&new.tuple())].into_iter().collect();
    assert_eq!(planned_jobs(&uj), expected);
}

#[test]
fn test_relative_changeset_rejects_keep_existing() {
    let db = InstalledSet::new();
    let repos = MemoryRepository::new();
    let old = component("foo:runtime", V1);
    let new = component("foo:runtime", V2);
    let cs = ChangeSet {
        jobs: vec![Job::update(&old.tuple(), &new.tuple())],
        troves: vec![new],
        ..Default::default()
    };

    let ctx = context();
    let options = UpdateOptions {
        keep_existing: true,
        ..Default::default()
    };
    let err = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&[ChangeItem::ChangeSet(Box::new(cs))], &options)
        .unwrap_err();
    assert!(matches!(err, UpdateError::RelativeWithKeepExisting));
}

#[test]
fn test_full_update_item_list_names_top_level_troves() {
    let (mut db, _) = shared_member_db();
    db.add_trove(component("baz:runtime", V1));
    let repos = MemoryRepository::new();
    let ctx = context();

    let items = UpdatePlanner::new(&ctx, &db, &repos).full_update_item_list().unwrap();
    let names: std::collections::BTreeSet<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, btreeset! {"bar", "baz:runtime", "foo"});
    assert!(items.iter().all(|i| i.absolute));
}

#[test]
fn test_changeset_items_are_not_split() {
    let db = InstalledSet::new();
    let repos = MemoryRepository::new();
    let runtime = component("foo:runtime", V1);
    let foo = collection("foo", V1, &[&runtime]);
    let cs = ChangeSet {
        jobs: vec![Job::absolute(&foo.tuple()), Job::absolute(&runtime.tuple())],
        troves: vec![foo.clone(), runtime.clone()],
        ..Default::default()
    };

    let ctx = context();
    let uj = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&[ChangeItem::ChangeSet(Box::new(cs))], &UpdateOptions::default())
        .unwrap();
    assert!(!uj.is_splittable());
    assert_eq!(uj.jobs().len(), 1);
    let expected: JobSet = [Job::install(&foo.tuple()), Job::install(&runtime.tuple())]
        .into_iter()
        .collect();
    assert_eq!(planned_jobs(&uj), expected);
}

#[test]
fn test_missing_dependency_fails_planning() {
    let db = InstalledSet::new();
    let mut repos = MemoryRepository::new();
    let mut runtime = component("foo:runtime", V1);
    runtime.requires = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    repos.add_trove(runtime);

    let err = plan(&db, &repos, &["foo:runtime"], &UpdateOptions::default()).unwrap_err();
    match err {
        UpdateError::DepResolutionFailure(missing) => {
            assert_eq!(missing.len(), 1);
            assert_eq!(missing[0].0.name, "foo:runtime");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_dependency_resolved_from_label() {
    let db = InstalledSet::new();
    let mut repos = MemoryRepository::new();
    let mut runtime = component("foo:runtime", V1);
    runtime.requires = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    let mut lib = component("bar:lib", V1);
    lib.provides = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    repos.add_trove(runtime.clone());
    repos.add_trove(lib.clone());

    let uj = plan(&db, &repos, &["foo:runtime"], &UpdateOptions::default()).unwrap();
    let expected: JobSet = [Job::install(&runtime.tuple()), Job::install(&lib.tuple())]
        .into_iter()
        .collect();
    assert_eq!(planned_jobs(&uj), expected);
    // the dependency is not something that was asked for
    assert_eq!(uj.primary_jobs().len(), 1);
}

#[test]
fn test_needed_troves_without_auto_resolve() {
    let db = InstalledSet::new();
    let mut repos = MemoryRepository::new();
    let mut runtime = component("foo:runtime", V1);
    runtime.requires = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    let mut lib = component("bar:lib", V1);
    lib.provides = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    repos.add_trove(runtime.clone());
    repos.add_trove(lib.clone());

    let ctx = PlanningContext::parse(
        "[client]\ninstallLabelPath = localhost@rpl:devel\nautoResolve = false\n",
    )
    .unwrap();
    let items = parse_change_items(&["foo:runtime"], false, true).unwrap();
    let err = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&items, &UpdateOptions::default())
        .unwrap_err();
    match err {
        UpdateError::NeededTrovesFailure(needed) => {
            assert_eq!(needed.get(&runtime.tuple()), Some(&btreeset! {lib.tuple()}));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_broken_erase_is_reported() {
    let mut db = InstalledSet::new();
    let mut lib = component("bar:lib", V1);
    lib.provides = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    let mut runtime = component("foo:runtime", V1);
    runtime.requires = crate::deps::DependencySet::parse("trove: bar:lib").unwrap();
    db.add_trove(lib);
    db.add_trove(runtime.clone());
    let repos = MemoryRepository::new();

    let err = plan(&db, &repos, &["-bar:lib"], &UpdateOptions::default()).unwrap_err();
    match err {
        UpdateError::EraseDepFailure(broken) => {
            assert_eq!(broken.len(), 1);
            assert_eq!(broken[0].required_by, runtime.tuple());
        }
        other => panic!("unexpected error {:?}", other),
    }
}
