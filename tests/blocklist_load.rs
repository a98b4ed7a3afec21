//! Loading blocklists from a filters directory.

use std::fs;
use std::path::Path;

use dns_filter::DomainName;
use dns_filter::filter::{Blocklist, LoadError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn name(s: &str) -> DomainName {
    DomainName::parse(s).unwrap()
}

fn write(dir: &Path, file: &str, content: &str) {
    fs::write(dir.join(file), content).unwrap();
}

#[test]
fn loads_only_matching_suffix() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ads.blacklist", "ads.example.com\n");
    write(dir.path(), "trackers.domains.blacklist", "tracker.net\n");
    write(dir.path(), "notes.txt", "example.org\n");
    write(dir.path(), "ads.blacklist.bak", "backup.example\n");

    let blocklist = Blocklist::load(dir.path(), ".blacklist").unwrap();

    assert_eq!(blocklist.len(), 2);
    assert!(blocklist.is_blocked(&name("ads.example.com")));
    assert!(blocklist.is_blocked(&name("cdn.tracker.net")));
    assert!(!blocklist.is_blocked(&name("example.org")));
    assert!(!blocklist.is_blocked(&name("backup.example")));
}

#[test]
fn trims_lines_and_skips_blanks() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.blacklist",
        "  Ads.Example.com  \n\n\t\nTRACKER.net.\r\nbad entry here\n",
    );

    let blocklist = Blocklist::load(dir.path(), ".blacklist").unwrap();

    assert_eq!(blocklist.len(), 2);
    assert!(blocklist.is_blocked(&name("ads.example.com")));
    assert!(blocklist.is_blocked(&name("tracker.net")));
}

#[test]
fn merges_duplicate_entries_across_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "one.blacklist", "ads.example.com\nshared.net\n");
    write(dir.path(), "two.blacklist", "shared.net\n");

    let blocklist = Blocklist::load(dir.path(), ".blacklist").unwrap();

    assert_eq!(blocklist.len(), 2);
}

#[test]
fn ignores_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("nested.blacklist")).unwrap();
    write(
        &dir.path().join("nested.blacklist"),
        "inner.blacklist",
        "inner.example\n",
    );

    let blocklist = Blocklist::load(dir.path(), ".blacklist").unwrap();

    assert!(blocklist.is_empty());
}

#[test]
fn missing_directory_is_empty_policy() {
    let dir = tempfile::tempdir().unwrap();

    let blocklist = Blocklist::load(&dir.path().join("absent"), ".blacklist").unwrap();

    assert!(blocklist.is_empty());
    assert!(!blocklist.disable_doh());
}

#[test]
fn empty_directory_is_empty_policy() {
    let dir = tempfile::tempdir().unwrap();

    let blocklist = Blocklist::load(dir.path(), ".blacklist").unwrap();

    assert!(!blocklist.disable_doh());
}

#[test]
fn unreadable_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.blacklist"), [0xff, 0xfe, b'\n']).unwrap();

    let err = Blocklist::load(dir.path(), ".blacklist").unwrap_err();

    match err {
        LoadError::ReadFile { path, .. } => assert!(path.ends_with("broken.blacklist")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn path_that_is_a_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("plain");
    fs::write(&file, "x").unwrap();

    assert!(matches!(
        Blocklist::load(&file, ".blacklist"),
        Err(LoadError::ReadDir { .. })
    ));
}

#[test]
fn allowlist_files_override_blocklist() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "ads.blacklist", "example.com\n");
    write(dir.path(), "keep.whitelist", "login.example.com\n");

    let blocklist = Blocklist::load_with_allowlist(dir.path(), ".blacklist", ".whitelist").unwrap();

    assert!(blocklist.is_blocked(&name("ads.example.com")));
    assert!(!blocklist.is_blocked(&name("login.example.com")));
    assert!(!blocklist.is_blocked(&name("sso.login.example.com")));
    assert_eq!(blocklist.allowlist_len(), 1);
}

#[test]
fn loading_twice_answers_identically() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.blacklist", "ads.example.com\ntracker.net\nzip\n");

    let first = Blocklist::load(dir.path(), ".blacklist").unwrap();
    let second = Blocklist::load(dir.path(), ".blacklist").unwrap();

    for query in [
        "ads.example.com",
        "x.ads.example.com",
        "example.com",
        "tracker.net",
        "a.b.zip",
        "org",
    ] {
        assert_eq!(
            first.is_blocked(&name(query)),
            second.is_blocked(&name(query)),
            "{query}"
        );
    }
    assert_eq!(first.disable_doh(), second.disable_doh());
}

/// Reference answer: some suffix formed by dropping leading labels is listed.
fn listed_suffix(listed: &[String], query: &str) -> bool {
    let labels: Vec<&str> = query.split('.').collect();
    (0..labels.len()).any(|start| listed.iter().any(|l| *l == labels[start..].join(".")))
}

fn random_name(rng: &mut StdRng) -> String {
    const LABELS: &[&str] = &["a", "b", "ads", "cdn", "example", "com", "net"];
    let count = rng.random_range(1..=4);
    (0..count)
        .map(|_| LABELS[rng.random_range(0..LABELS.len())])
        .collect::<Vec<_>>()
        .join(".")
}

#[test]
fn suffix_match_agrees_with_reference() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let listed: Vec<String> = (0..rng.random_range(1..6))
            .map(|_| random_name(&mut rng))
            .collect();
        let blocklist = Blocklist::from_domains(listed.iter().map(|d| name(d)));

        for _ in 0..40 {
            let query = random_name(&mut rng);
            assert_eq!(
                blocklist.is_blocked(&name(&query)),
                listed_suffix(&listed, &query),
                "query {query} against {listed:?}"
            );
        }
    }
}
