use super::*;
use crate::versions::Version;

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn t(name: &str, version: &str) -> TroveTuple {
    TroveTuple::new(name, v(version), Flavor::new())
}

fn collection(name: &str, version: &str, members: &[(TroveTuple, bool)]) -> Trove {
    let mut trove = Trove::new(name, v(version), Flavor::new(), TroveKind::Collection);
    for (member, by_default) in members {
        trove.add_trove(member.clone(), *by_default, false);
    }
    trove
}

const V1: &str = "/a.com@rpl:devel/1:1.0-1-1";
const V2: &str = "/a.com@rpl:devel/2:2.0-1-1";
const V15: &str = "/a.com@rpl:devel/3:1.5-1-1";

#[test]
fn test_collection_name() {
    assert!(is_collection_name("group-base"));
    assert!(is_collection_name("foo"));
    assert!(!is_collection_name("foo:runtime"));
    assert!(!is_collection_name("fileset-etc"));
}

#[test]
fn test_merge_readds_locally_removed_default_member() {
    let old = collection("foo", V1, &[(t("foo:runtime", V1), true), (t("foo:lib", V1), true)]);
    let mut local = old.clone();
    local.del_trove(&t("foo:lib", V1));
    let new = collection("foo", V2, &[(t("foo:runtime", V2), true), (t("foo:lib", V2), true)]);

    let merged = old.merge_collections(&local, &new, &[]);
    assert_eq!(merged.version, v(V2));
    assert!(merged.has_trove(&t("foo:runtime", V2)));
    assert!(merged.has_trove(&t("foo:lib", V2)));

    let changes = merged.diff(Some(&local));
    assert_eq!(changes.len(), 2);
    let lib = changes.iter().find(|c| c.name == "foo:lib").unwrap();
    assert!(lib.old.is_none());
    assert_eq!(lib.new.as_ref().unwrap().version, v(V2));
}

#[test]
fn test_merge_keeps_unchanged_local_removal() {
    let old = collection("foo", V1, &[(t("foo:runtime", V1), true), (t("foo:doc", V1), true)]);
    let mut local = old.clone();
    local.del_trove(&t("foo:doc", V1));
    let new = collection("foo", V2, &[(t("foo:runtime", V2), true), (t("foo:doc", V1), true)]);

    let merged = old.merge_collections(&local, &new, &[]);
    assert!(!merged.has_trove(&t("foo:doc", V1)));
}

#[test]
fn test_merge_follows_local_replacement() {
    let old = collection("foo", V1, &[(t("foo:runtime", V1), true)]);
    let local = collection("foo", V1, &[(t("foo:runtime", V15), true)]);
    let new = collection("foo", V2, &[(t("foo:runtime", V2), true)]);

    let merged = old.merge_collections(&local, &new, &[]);
    assert_eq!(merged.iter_troves().count(), 1);

    let changes = merged.diff(Some(&local));
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].old.as_ref().unwrap().version, v(V15));
    assert_eq!(changes[0].new.as_ref().unwrap().version, v(V2));
}

#[test]
fn test_merge_skips_new_optional_and_excluded_members() {
    let old = collection("foo", V1, &[(t("foo:runtime", V1), true)]);
    let new = collection(
        "foo",
        V2,
        &[
            (t("foo:runtime", V2), true),
            (t("foo:debuginfo", V2), false),
            (t("foo:doc", V2), true),
        ],
    );
    let excludes = vec![Regex::new(":doc$").unwrap()];

    let merged = old.merge_collections(&old, &new, &excludes);
    assert!(merged.has_trove(&t("foo:runtime", V2)));
    assert!(!merged.has_trove(&t("foo:debuginfo", V2)));
    assert!(!merged.has_trove(&t("foo:doc", V2)));
}

#[test]
fn test_collection_bucket_is_member_intersection() {
    let mut a = Trove::new("foo:runtime", v(V1), Flavor::new(), TroveKind::Component);
    a.paths.insert("/usr/bin/foo".to_string());
    a.paths.insert("/etc/foo.conf".to_string());
    let mut b = Trove::new("foo:lib", v(V1), Flavor::new(), TroveKind::Component);
    b.paths.insert("/etc/foo.conf".to_string());

    let group = collection("foo", V1, &[(a.tuple(), true), (b.tuple(), true)]);
    let members = [a.clone(), b.clone()];
    let bucket = install_bucket(&group, |tuple| {
        members
            .iter()
            .find(|m| &m.tuple() == tuple)
            .cloned()
            .ok_or("missing")
    })
    .unwrap();
    assert_eq!(bucket, InstallBucket::new(["/etc/foo.conf".to_string()]));

    let a_bucket = install_bucket(&a, |_| Err("unused")).unwrap();
    let b_bucket = install_bucket(&b, |_| Err("unused")).unwrap();
    assert!(!a_bucket.compatible_with(&b_bucket));
    assert!(InstallBucket::default().compatible_with(&a_bucket));
}

#[test]
fn test_trove_json() {
    let json = r#"{
        "name": "foo",
        "version": "/a.com@rpl:devel/1:1.0-1-1",
        "kind": "collection",
        "troves": [
            {"name": "foo:runtime", "version": "/a.com@rpl:devel/1:1.0-1-1"},
            {"name": "foo:debuginfo", "version": "/a.com@rpl:devel/1:1.0-1-1", "by_default": false}
        ],
        "requires": "trove: bar:runtime"
    }"#;
    let trove: Trove = serde_json::from_str(json).unwrap();
    assert!(trove.is_collection());
    assert!(trove.include_by_default(&t("foo:runtime", V1)));
    assert!(!trove.include_by_default(&t("foo:debuginfo", V1)));
    assert_eq!(trove.requires.to_string(), "trove: bar:runtime");
}
