use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use imagepkg_core::Fmri;

use crate::{AccessMode, Catalog, CatalogError, LegacyCatalog, ATTRS_FILE, ENTRIES_FILE};

fn test_meta_root(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "imagepkg-catalog-tests-{tag}-{}-{nanos}",
        std::process::id()
    ))
}

fn fmri(text: &str) -> Fmri {
    Fmri::parse(text).expect("must parse")
}

#[test]
fn open_missing_catalog_is_empty() {
    let root = test_meta_root("empty");
    let catalog = Catalog::open(&root, AccessMode::ReadOnly).expect("must open");
    assert_eq!(catalog.package_version_count(), 0);
    assert!(catalog.last_modified().is_none());
    assert_eq!(catalog.tuples().count(), 0);
}

#[test]
fn save_and_reload_round_trip() {
    let root = test_meta_root("round-trip");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog
        .add(fmri("pkg://test1/foo@1.1-0.86:20080426T173208Z"))
        .expect("must add");
    catalog.add(fmri("pkg://test2/bar@2.0")).expect("must add");
    catalog.save().expect("must save");

    let reloaded = Catalog::open(&root, AccessMode::ReadOnly).expect("must reload");
    assert_eq!(reloaded.package_version_count(), 3);
    assert!(reloaded.last_modified().is_some());
    assert!(reloaded.contains(&fmri("pkg://test2/bar@2.0")));

    let stems: Vec<&str> = reloaded.tuples().map(|(_, stem, _)| stem).collect();
    assert_eq!(stems, vec!["bar", "foo", "foo"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn tuples_are_restartable() {
    let root = test_meta_root("restartable");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog.add(fmri("pkg://test1/bar@1.0")).expect("must add");

    let first: Vec<String> = catalog.tuples().map(|(_, s, _)| s.to_string()).collect();
    let second: Vec<String> = catalog.tuples().map(|(_, s, _)| s.to_string()).collect();
    assert_eq!(first, second);
    assert_eq!(first, vec!["bar", "foo"]);
}

#[test]
fn newest_and_publishers_for_respect_ordering() {
    let root = test_meta_root("newest");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog
        .add(fmri("pkg://test1/foo@1.1-0.86"))
        .expect("must add");
    catalog.add(fmri("pkg://test2/foo@0.9")).expect("must add");
    catalog.add(fmri("pkg://test2/bar@1.0")).expect("must add");

    let newest = catalog.newest("foo", None).expect("must find");
    assert_eq!(newest.to_string(), "pkg://test1/foo@1.1-0.86");
    let newest = catalog.newest("foo", Some("test2")).expect("must find");
    assert_eq!(newest.to_string(), "pkg://test2/foo@0.9");
    assert!(catalog.newest("baz", None).is_none());

    assert_eq!(catalog.publishers_for("foo"), vec!["test1", "test2"]);
    assert_eq!(catalog.publishers_for("bar"), vec!["test2"]);
    assert!(catalog.publishers_for("baz").is_empty());
}

#[test]
fn save_refuses_read_only_mode() {
    let root = test_meta_root("read-only");
    let mut catalog = Catalog::open(&root, AccessMode::ReadOnly).expect("must open");
    let err = catalog.save().expect_err("must refuse read-only save");
    assert!(matches!(err, CatalogError::ReadOnly { .. }));
    assert!(!root.join(ATTRS_FILE).exists());
}

#[test]
fn add_rejects_unqualified_and_unversioned_entries() {
    let root = test_meta_root("reject-add");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");

    let err = catalog.add(fmri("foo@1.0")).expect_err("must reject");
    assert!(matches!(err, CatalogError::Unqualified { .. }));

    let err = catalog
        .add(fmri("pkg://test1/foo"))
        .expect_err("must reject");
    assert!(matches!(err, CatalogError::MissingVersion { .. }));
}

#[test]
fn unparsable_attrs_is_corrupt() {
    let root = test_meta_root("corrupt-attrs");
    fs::create_dir_all(&root).expect("must create meta root");
    fs::write(root.join(ATTRS_FILE), "InvalidCatalogFile").expect("must write attrs");
    fs::write(root.join(ENTRIES_FILE), "").expect("must write catalog");

    let err = Catalog::open(&root, AccessMode::ReadOnly).expect_err("must reject");
    assert!(matches!(err, CatalogError::Corrupt { .. }));
    assert!(err.to_string().contains("unparsable attrs"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn count_mismatch_is_corrupt() {
    let root = test_meta_root("corrupt-count");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog.add(fmri("pkg://test1/bar@1.0")).expect("must add");
    catalog.save().expect("must save");

    fs::write(root.join(ENTRIES_FILE), "V pkg://test1/foo@1.0\n").expect("must truncate");

    let err = Catalog::open(&root, AccessMode::ReadOnly).expect_err("must reject");
    assert!(matches!(err, CatalogError::Corrupt { .. }));
    assert!(err.to_string().contains("attrs claim 2 packages"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unparsable_entry_line_is_corrupt() {
    let root = test_meta_root("corrupt-entry");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog.save().expect("must save");

    fs::write(root.join(ENTRIES_FILE), "V not a package\n").expect("must corrupt");

    let err = Catalog::open(&root, AccessMode::ReadOnly).expect_err("must reject");
    assert!(matches!(err, CatalogError::Corrupt { .. }));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn save_keeps_last_modified_non_decreasing() {
    let root = test_meta_root("monotonic");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog.save().expect("must save");
    let first = catalog.last_modified().expect("stamped");

    catalog.add(fmri("pkg://test1/foo@1.1")).expect("must add");
    catalog.save().expect("must save");
    let second = catalog.last_modified().expect("stamped");
    assert!(second >= first);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn interrupted_style_writes_leave_prior_generation_readable() {
    let root = test_meta_root("prior-gen");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog.save().expect("must save");

    // A stranded temporary next to the live pair must not affect readers.
    fs::write(root.join(".catalog.tmp-9999"), "V pkg://test1/zzz@9.9\n")
        .expect("must write stranded temp");

    let reloaded = Catalog::open(&root, AccessMode::ReadOnly).expect("must reload");
    assert_eq!(reloaded.package_version_count(), 1);
    assert!(reloaded.contains(&fmri("pkg://test1/foo@1.0")));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn destroy_removes_meta_root() {
    let root = test_meta_root("destroy");
    let mut catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must open");
    catalog.add(fmri("pkg://test1/foo@1.0")).expect("must add");
    catalog.save().expect("must save");
    assert!(root.exists());

    let catalog = Catalog::open(&root, AccessMode::ReadWrite).expect("must reopen");
    catalog.destroy().expect("must destroy");
    assert!(!root.exists());
}

#[test]
fn legacy_catalog_loads_flat_pair() {
    let root = test_meta_root("legacy-load");
    fs::create_dir_all(&root).expect("must create dir");
    fs::write(
        root.join("attrs"),
        "S Last-Modified: 2008-04-26T17:32:08.000000\nS prefix: CRSV\nS npkgs: 2\n",
    )
    .expect("must write attrs");
    fs::write(
        root.join("catalog"),
        "V pkg:/SUNWdvdrw@5.21.4.10.8,5.11-0.86:20080426T173208Z\nV pkg:/foo@0.0\n",
    )
    .expect("must write catalog");

    let legacy = LegacyCatalog::load(&root).expect("must load");
    assert_eq!(legacy.last_modified, "2008-04-26T17:32:08.000000");
    assert_eq!(legacy.entries.len(), 2);
    assert_eq!(legacy.entries[0].stem, "SUNWdvdrw");
    assert!(legacy.entries.iter().all(|fmri| !fmri.is_qualified()));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn legacy_catalog_rejects_count_mismatch_and_bad_lines() {
    let root = test_meta_root("legacy-corrupt");
    fs::create_dir_all(&root).expect("must create dir");
    fs::write(
        root.join("attrs"),
        "S Last-Modified: 2008-04-26T17:32:08.000000\nS npkgs: 3\n",
    )
    .expect("must write attrs");
    fs::write(root.join("catalog"), "V pkg:/foo@0.0\n").expect("must write catalog");

    let err = LegacyCatalog::load(&root).expect_err("must reject count mismatch");
    assert!(matches!(err, CatalogError::Corrupt { .. }));

    fs::write(root.join("attrs"), "garbage\n").expect("must rewrite attrs");
    let err = LegacyCatalog::load(&root).expect_err("must reject bad attrs");
    assert!(err.to_string().contains("unrecognized attrs line"));

    let _ = fs::remove_dir_all(&root);
}
