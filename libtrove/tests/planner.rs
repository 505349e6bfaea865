//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

extern crate libtrove;

use libtrove::deps::{DependencySet, Flavor};
use libtrove::local::{InstalledDatabase, InstalledSet, LocalDatabase};
use libtrove::repository::MemoryRepository;
use libtrove::source::{ChangeSet, TroveSource};
use libtrove::trove::{RedirectTarget, TroveKind};
use libtrove::versions::Version;
use libtrove::{
    apply_update, parse_change_items, ChangeItem, Job, JobSet, PlanningContext, Trove,
    UpdateError, UpdateJob, UpdateOptions, UpdatePlanner,
};
use tempfile::tempdir;

const V1: &str = "/localhost@rpl:devel/1.0-1-1";
const V2: &str = "/localhost@rpl:devel/2.0-1-1";

fn context() -> PlanningContext {
    PlanningContext::parse("[client]\ninstallLabelPath = localhost@rpl:devel\nautoResolve = true\n")
        .expect("Failed to parse configuration")
}

fn trove(name: &str, version: &str, kind: TroveKind) -> Trove {
    Trove::new(
        name,
        Version::parse(version).expect("Failed to parse version"),
        Flavor::new(),
        kind,
    )
}

fn component(name: &str, version: &str, paths: &[&str]) -> Trove {
    let mut trove = trove(name, version, TroveKind::Component);
    trove.paths = paths.iter().map(|p| p.to_string()).collect();
    trove
}

fn collection(name: &str, version: &str, members: &[&Trove]) -> Trove {
    let mut trove = trove(name, version, TroveKind::Collection);
    for member in members {
        trove.add_trove(member.tuple(), true, false);
    }
    trove
}

fn plan(
    db: &dyn LocalDatabase,
    repos: &MemoryRepository,
    args: &[&str],
    options: &UpdateOptions,
) -> Result<UpdateJob, UpdateError> {
    let ctx = context();
    let items = parse_change_items(args, options.keep_existing, options.update_by_default)?;
    UpdatePlanner::new(&ctx, db, repos).plan_update(&items, options)
}

fn planned(uj: &UpdateJob) -> JobSet {
    uj.all_jobs().cloned().collect()
}

#[test]
fn test_relative_update_of_installed_component() {
    let old = component("foo:runtime", V1, &["/usr/bin/foo"]);
    let new = component("foo:runtime", V2, &["/usr/bin/foo"]);
    let mut db = InstalledSet::new();
    db.add_trove(old.clone());
    let mut repos = MemoryRepository::new();
    repos.add_trove(old.clone());
    repos.add_trove(new.clone());

    let uj = plan(&db, &repos, &["foo:runtime=2.0-1-1"], &UpdateOptions::default())
        .expect("Failed to plan update");

    let expected: JobSet = [Job::update(&old.tuple(), &new.tuple())].into_iter().collect();
    assert_eq!(planned(&uj), expected);
    let job = uj.all_jobs().next().expect("Expected one job");
    assert!(!job.is_absolute());
    assert_eq!(job.old_tuple(), Some(old.tuple()));
}

#[test]
fn test_locally_removed_member_is_reinstalled() {
    let runtime1 = component("foo:runtime", V1, &["/usr/bin/foo"]);
    let lib1 = component("foo:lib", V1, &["/usr/lib/libfoo.so.1"]);
    let foo1 = collection("foo", V1, &[&runtime1, &lib1]);
    let runtime2 = component("foo:runtime", V2, &["/usr/bin/foo"]);
    let lib2 = component("foo:lib", V2, &["/usr/lib/libfoo.so.2"]);
    let foo2 = collection("foo", V2, &[&runtime2, &lib2]);

    // foo:lib was erased by the administrator after foo was installed
    let mut db = InstalledSet::new();
    db.add_trove(foo1.clone());
    db.add_trove(runtime1.clone());

    let mut repos = MemoryRepository::new();
    for trove in [&runtime2, &lib2, &foo2] {
        repos.add_trove(trove.clone());
    }

    let uj = plan(&db, &repos, &["foo=2.0-1-1"], &UpdateOptions::default())
        .expect("Failed to plan update");
    let expected: JobSet = [
        Job::update(&foo1.tuple(), &foo2.tuple()),
        Job::update(&runtime1.tuple(), &runtime2.tuple()),
        Job::install(&lib2.tuple()),
    ]
    .into_iter()
    .collect();
    assert_eq!(planned(&uj), expected);
}

#[test]
fn test_installed_trove_is_no_new_trove() {
    let runtime = component("foo:runtime", V1, &["/usr/bin/foo"]);
    let mut db = InstalledSet::new();
    db.add_trove(runtime.clone());
    let mut repos = MemoryRepository::new();
    repos.add_trove(runtime);

    let err = plan(&db, &repos, &["foo:runtime"], &UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, UpdateError::NoNewTroves));
}

#[test]
fn test_redirect_installs_only_its_target() {
    let mut redirect = trove("old:runtime", V1, TroveKind::Redirect);
    redirect.redirects.push(RedirectTarget {
        name: "new:runtime".to_string(),
        version: None,
        flavor: None,
    });
    let target = component("new:runtime", V1, &["/usr/bin/new"]);

    let db = InstalledSet::new();
    let mut repos = MemoryRepository::new();
    repos.add_trove(redirect);
    repos.add_trove(target.clone());

    let uj = plan(&db, &repos, &["old:runtime"], &UpdateOptions::default())
        .expect("Failed to plan update");
    let expected: JobSet = [Job::install(&target.tuple())].into_iter().collect();
    assert_eq!(planned(&uj), expected);
}

fn two_flavors(x86_paths: &[&str], x86_64_paths: &[&str]) -> ChangeItem {
    let mut x86 = component("foo:lib", V1, x86_paths);
    x86.flavor = Flavor::parse("is: x86").expect("Failed to parse flavor");
    let mut x86_64 = component("foo:lib", V1, x86_64_paths);
    x86_64.flavor = Flavor::parse("is: x86_64").expect("Failed to parse flavor");

    let cs = ChangeSet {
        jobs: vec![Job::absolute(&x86.tuple()), Job::absolute(&x86_64.tuple())],
        troves: vec![x86, x86_64],
        ..Default::default()
    };
    ChangeItem::ChangeSet(Box::new(cs))
}

#[test]
fn test_overlapping_flavors_conflict() {
    let db = InstalledSet::new();
    let repos = MemoryRepository::new();
    let ctx = context();
    let items = [two_flavors(&["/usr/lib/libfoo.so"], &["/usr/lib/libfoo.so"])];

    let err = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&items, &UpdateOptions::default())
        .unwrap_err();
    match err {
        UpdateError::InstallBucketConflicts(conflicts) => {
            assert_eq!(conflicts.get("foo:lib").map(Vec::len), Some(1));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_disjoint_flavors_install_together() {
    let db = InstalledSet::new();
    let repos = MemoryRepository::new();
    let ctx = context();
    let items = [two_flavors(&["/usr/lib/libfoo.so"], &["/usr/lib64/libfoo.so"])];

    let uj = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&items, &UpdateOptions::default())
        .expect("Failed to plan update");
    assert_eq!(uj.all_jobs().count(), 2);
}

#[test]
fn test_pinned_trove_is_kept() {
    let old = component("kernel:runtime", V1, &["/boot/vmlinuz-1"]);
    let new = component("kernel:runtime", V2, &["/boot/vmlinuz-2"]);
    let mut db = InstalledSet::new();
    db.add_trove(old.clone());
    db.pin_troves(&[old.tuple()], true).expect("Failed to pin");
    let mut repos = MemoryRepository::new();
    repos.add_trove(new.clone());

    let uj = plan(&db, &repos, &["kernel:runtime"], &UpdateOptions::default())
        .expect("Failed to plan update");
    let expected: JobSet = [Job::install(&new.tuple())].into_iter().collect();
    assert_eq!(planned(&uj), expected);
    assert!(uj.all_jobs().all(|j| j.old_tuple().is_none()));
}

#[test]
fn test_pinned_trove_blocks_conflicting_update() {
    let old = component("kernel:runtime", V1, &["/boot/vmlinuz"]);
    let new = component("kernel:runtime", V2, &["/boot/vmlinuz"]);
    let mut db = InstalledSet::new();
    db.add_trove(old.clone());
    db.pin_troves(&[old.tuple()], true).expect("Failed to pin");
    let mut repos = MemoryRepository::new();
    repos.add_trove(new);

    let err = plan(&db, &repos, &["kernel:runtime"], &UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, UpdateError::NoNewTroves));

    // erasing needs the pin lifted
    let err = plan(&db, &repos, &["-kernel:runtime"], &UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, UpdateError::NoNewTroves));
}

#[test]
fn test_unresolvable_chain_terminates() {
    let mut runtime = component("foo:runtime", V1, &["/usr/bin/foo"]);
    runtime.requires = DependencySet::parse("trove: bar:lib").expect("Failed to parse deps");
    let mut lib = component("bar:lib", V1, &["/usr/lib/libbar.so"]);
    lib.provides = DependencySet::parse("trove: bar:lib").expect("Failed to parse deps");
    lib.requires = DependencySet::parse("trove: baz:lib").expect("Failed to parse deps");

    let db = InstalledSet::new();
    let mut repos = MemoryRepository::new();
    repos.add_trove(runtime);
    repos.add_trove(lib);

    let err = plan(&db, &repos, &["foo:runtime"], &UpdateOptions::default()).unwrap_err();
    match err {
        UpdateError::DepResolutionFailure(missing) => {
            assert!(missing.iter().any(|(t, _)| t.name == "bar:lib"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_provider_blocked_by_pin_gives_up() {
    let mut runtime = component("foo:runtime", V1, &["/usr/bin/foo"]);
    runtime.requires = DependencySet::parse("trove: p:new").expect("Failed to parse deps");
    let pinned = component("p:lib", V1, &["/usr/lib/libp.so"]);
    let mut provider = component("p:lib", V2, &["/usr/lib/libp.so"]);
    provider.provides = DependencySet::parse("trove: p:new").expect("Failed to parse deps");

    let mut db = InstalledSet::new();
    db.add_trove(pinned.clone());
    db.pin_troves(&[pinned.tuple()], true).expect("Failed to pin");
    let mut repos = MemoryRepository::new();
    repos.add_trove(runtime.clone());
    repos.add_trove(provider);

    // p:lib 2.0 is suggested on every pass but never fits next to the pin
    let err = plan(&db, &repos, &["foo:runtime"], &UpdateOptions::default()).unwrap_err();
    match err {
        UpdateError::DepResolutionFailure(missing) => {
            assert_eq!(missing.len(), 1);
            assert_eq!(missing[0].0, runtime.tuple());
            assert_eq!(missing[0].1, runtime.requires);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_erased_collection_keeps_shared_member() {
    let lib1 = component("foo:lib", V1, &["/usr/lib/libfoo.so.1"]);
    let lib2 = component("foo:lib", V2, &["/usr/lib/libfoo.so.2"]);
    let a = collection("a", V1, &[&lib1]);
    let b = collection("b", V1, &[&lib1]);
    let n = collection("n", V1, &[&lib2]);

    let mut db = InstalledSet::new();
    for trove in [&a, &b, &lib1] {
        db.add_trove(trove.clone());
    }
    let mut repos = MemoryRepository::new();
    repos.add_trove(lib2.clone());
    repos.add_trove(n.clone());

    // b still holds foo:lib 1.0, so the newer one goes next to it
    let uj = plan(&db, &repos, &["-a", "n"], &UpdateOptions::default())
        .expect("Failed to plan update");
    let expected: JobSet = [
        Job::erase(&a.tuple()),
        Job::install(&n.tuple()),
        Job::install(&lib2.tuple()),
    ]
    .into_iter()
    .collect();
    assert_eq!(planned(&uj), expected);

    // with b gone as well the old member is replaced
    let uj = plan(&db, &repos, &["-a", "-b", "n"], &UpdateOptions::default())
        .expect("Failed to plan update");
    let expected: JobSet = [
        Job::erase(&a.tuple()),
        Job::erase(&b.tuple()),
        Job::install(&n.tuple()),
        Job::update(&lib1.tuple(), &lib2.tuple()),
    ]
    .into_iter()
    .collect();
    assert_eq!(planned(&uj), expected);
}

#[test]
fn test_member_erase_breaking_dependency_fails() {
    let mut lib = component("foo:lib", V1, &["/usr/lib/libfoo.so"]);
    lib.provides = DependencySet::parse("trove: foo:lib").expect("Failed to parse deps");
    let mut user = component("bar:runtime", V1, &["/usr/bin/bar"]);
    user.requires = DependencySet::parse("trove: foo:lib").expect("Failed to parse deps");
    let a = collection("a", V1, &[&lib]);

    let mut db = InstalledSet::new();
    for trove in [&a, &lib, &user] {
        db.add_trove(trove.clone());
    }
    let repos = MemoryRepository::new();

    let err = plan(&db, &repos, &["-a"], &UpdateOptions::default()).unwrap_err();
    match err {
        UpdateError::EraseDepFailure(broken) => {
            assert_eq!(broken.len(), 1);
            assert_eq!(broken[0].required_by, user.tuple());
            assert_eq!(broken[0].provided_by, vec![lib.tuple()]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_apply_then_replan() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut db = InstalledDatabase::open(dir.path().join("troves.redb"))
        .expect("Failed to open database");

    let runtime = component("foo:runtime", V1, &["/usr/bin/foo"]);
    let foo = collection("foo", V1, &[&runtime]);
    let mut repos = MemoryRepository::new();
    repos.add_trove(runtime.clone());
    repos.add_trove(foo.clone());

    let ctx = context();
    let items = parse_change_items(&["foo"], false, true).expect("Failed to parse items");
    let uj = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&items, &UpdateOptions::default())
        .expect("Failed to plan update");
    apply_update(&ctx, &mut db, &repos, &uj).expect("Failed to apply update");

    assert!(db.has_trove(&foo.tuple()).expect("Failed to query"));
    assert!(db.has_trove(&runtime.tuple()).expect("Failed to query"));

    let err = UpdatePlanner::new(&ctx, &db, &repos)
        .plan_update(&items, &UpdateOptions::default())
        .unwrap_err();
    assert!(matches!(err, UpdateError::NoNewTroves));
}
