use crate::{Fmri, Version};

#[test]
fn parse_qualified_fmri() {
    let fmri = Fmri::parse("pkg://test1/quux@1.0,5.11-0.86:20080426T173208Z").expect("must parse");
    assert_eq!(fmri.publisher.as_deref(), Some("test1"));
    assert_eq!(fmri.stem, "quux");
    let version = fmri.version.as_ref().expect("version present");
    assert_eq!(version.release.segments(), &[1, 0]);
    assert_eq!(
        version.build.as_ref().expect("build present").segments(),
        &[5, 11]
    );
    assert_eq!(
        version.branch.as_ref().expect("branch present").segments(),
        &[0, 86]
    );
    assert_eq!(version.timestamp.as_deref(), Some("20080426T173208Z"));
}

#[test]
fn parse_unqualified_forms() {
    let fmri = Fmri::parse("pkg:/SUNWdvdrw@5.21.4.10.8,5.11-0.86:20080426T173208Z")
        .expect("must parse");
    assert!(fmri.publisher.is_none());
    assert_eq!(fmri.stem, "SUNWdvdrw");

    let fmri = Fmri::parse("foo@0.0").expect("must parse");
    assert!(fmri.publisher.is_none());
    assert_eq!(fmri.version.as_ref().expect("version").release.segments(), &[0, 0]);

    let fmri = Fmri::parse("foo").expect("must parse");
    assert!(fmri.version.is_none());
}

#[test]
fn parse_rejects_malformed_input() {
    for bad in [
        "",
        "pkg://",
        "pkg://test1",
        "pkg://test1/",
        "@1.0",
        "foo@",
        "foo@1.a",
        "foo@1.0:",
        "foo bar@1.0",
        "http://example.com/foo",
    ] {
        let err = Fmri::parse(bad).expect_err("must reject");
        assert!(err.to_string().contains("malformed FMRI"), "{bad}: {err}");
    }
}

#[test]
fn display_round_trips() {
    for text in [
        "pkg://test1/quux@1.0,5.11-0.86:20080426T173208Z",
        "pkg:/corge@1.0",
        "pkg:/web/server@2.4.1-0.133",
    ] {
        let fmri = Fmri::parse(text).expect("must parse");
        assert_eq!(fmri.to_string(), text);
    }
}

#[test]
fn version_ordering_is_numeric_per_segment() {
    let older = Version::parse("0.9").expect("must parse");
    let newer = Version::parse("0.10").expect("must parse");
    assert!(older < newer);

    let shorter = Version::parse("1.0").expect("must parse");
    let longer = Version::parse("1.0.1").expect("must parse");
    assert!(shorter < longer);

    let early = Version::parse("1.0:20080426T173208Z").expect("must parse");
    let late = Version::parse("1.0:20090101T000000Z").expect("must parse");
    assert!(early < late);
}

#[test]
fn fmri_ordering_by_stem_version_publisher() {
    let a = Fmri::parse("pkg://test1/bar@1.0").expect("must parse");
    let b = Fmri::parse("pkg://test1/foo@1.0").expect("must parse");
    let c = Fmri::parse("pkg://test1/foo@2.0").expect("must parse");
    let d = Fmri::parse("pkg://test2/foo@2.0").expect("must parse");
    let mut sorted = vec![d.clone(), c.clone(), b.clone(), a.clone()];
    sorted.sort();
    assert_eq!(sorted, vec![a, b, c, d]);
}

#[test]
fn dir_path_encodes_version_separators() {
    let fmri = Fmri::parse("pkg://test1/quux@1.0,5.11-0.86:20080426T173208Z").expect("must parse");
    assert_eq!(fmri.dir_path(), "quux/1.0%2C5.11-0.86%3A20080426T173208Z");
}

#[test]
fn link_path_is_a_single_component_and_round_trips() {
    let fmri = Fmri::parse("pkg:/web/server@2.4.1-0.133").expect("must parse");
    let link = fmri.link_path();
    assert!(!link.contains('/'), "link path must be one component: {link}");
    assert!(!link.contains(':'));

    let decoded = Fmri::from_link_path(&link).expect("must decode");
    assert_eq!(decoded.stem, "web/server");
    assert_eq!(decoded.version, fmri.version);
}
