//! Blocklist of filtered domains.
//!
//! Loads every list file from a directory once at startup and provides
//! lock-free lookup for blocked domains.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::domain::DomainName;

/// Error raised while reading blocklist files.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The directory exists but could not be listed.
    #[error("cannot read filters directory {path:?}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A list file could not be opened or read.
    #[error("cannot read list file {path:?}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A set of blocked domains for efficient lookup.
///
/// Immutable once loaded; share it behind an `Arc` across connections.
#[derive(Debug, Default)]
pub struct Blocklist {
    blocked: FxHashSet<String>,
    allowed: FxHashSet<String>,
}

impl Blocklist {
    /// Load every regular file in `dir` whose name ends with `suffix`.
    ///
    /// A missing directory yields an empty blocklist.
    pub fn load(dir: &Path, suffix: &str) -> Result<Self, LoadError> {
        Ok(Self {
            blocked: load_lists(dir, suffix)?,
            allowed: FxHashSet::default(),
        })
    }

    /// Like [`Blocklist::load`], also reading files ending with
    /// `allow_suffix` into an allowlist that overrides the blocklist.
    pub fn load_with_allowlist(
        dir: &Path,
        suffix: &str,
        allow_suffix: &str,
    ) -> Result<Self, LoadError> {
        Ok(Self {
            blocked: load_lists(dir, suffix)?,
            allowed: load_lists(dir, allow_suffix)?,
        })
    }

    /// Build a blocklist from domains already in memory.
    pub fn from_domains<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = DomainName>,
    {
        Self {
            blocked: domains.into_iter().map(|d| d.as_str().to_owned()).collect(),
            allowed: FxHashSet::default(),
        }
    }

    /// Add allowlist entries to a blocklist built in memory.
    pub fn with_allowed<I>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = DomainName>,
    {
        self.allowed
            .extend(domains.into_iter().map(|d| d.as_str().to_owned()));
        self
    }

    /// Check if a domain should be blocked.
    ///
    /// Performs exact match and subdomain matching (e.g., blocks
    /// "ads.example.com" if "example.com" is in the blocklist). A name
    /// covered by the allowlist is never blocked.
    pub fn is_blocked(&self, domain: &DomainName) -> bool {
        if self.blocked.is_empty() {
            return false;
        }
        if !self.allowed.is_empty() && domain.suffixes().any(|s| self.allowed.contains(s)) {
            return false;
        }
        domain.suffixes().any(|s| self.blocked.contains(s))
    }

    /// True iff at least one domain is blocked, which switches on
    /// DoH suppression for every client.
    pub fn disable_doh(&self) -> bool {
        !self.blocked.is_empty()
    }

    /// Returns the number of domains in the blocklist.
    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    /// Returns the number of domains in the allowlist.
    pub fn allowlist_len(&self) -> usize {
        self.allowed.len()
    }
}

/// Read all `suffix` files in `dir` into one set.
fn load_lists(dir: &Path, suffix: &str) -> Result<FxHashSet<String>, LoadError> {
    let mut domains = FxHashSet::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(dir = %dir.display(), "filters directory missing, no policy configured");
            return Ok(domains);
        }
        Err(source) => {
            return Err(LoadError::ReadDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    for entry in entries {
        let entry = entry.map_err(|source| LoadError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(suffix));
        if !matches {
            continue;
        }

        // Follows symlinks; directories and sockets are skipped.
        let is_file = fs::metadata(&path)
            .map_err(|source| LoadError::ReadFile {
                path: path.clone(),
                source,
            })?
            .is_file();
        if !is_file {
            continue;
        }

        let before = domains.len();
        read_list_file(&path, &mut domains)?;
        debug!(
            file = %path.display(),
            added = domains.len() - before,
            "loaded list file"
        );
    }

    Ok(domains)
}

fn read_list_file(path: &Path, domains: &mut FxHashSet<String>) -> Result<(), LoadError> {
    let read_err = |source| LoadError::ReadFile {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(read_err)?;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(read_err)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match DomainName::parse(line) {
            Ok(domain) => {
                domains.insert(domain.as_str().to_owned());
            }
            Err(e) => {
                warn!(file = %path.display(), line = index + 1, "skipping entry: {}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> DomainName {
        DomainName::parse(s).unwrap()
    }

    fn blocklist(domains: &[&str]) -> Blocklist {
        Blocklist::from_domains(domains.iter().map(|d| name(d)))
    }

    #[test]
    fn is_blocked_exact_match() {
        let blocklist = blocklist(&["doubleclick.com"]);

        assert!(blocklist.is_blocked(&name("doubleclick.com")));
    }

    #[test]
    fn is_blocked_subdomain_match() {
        let blocklist = blocklist(&["doubleclick.com"]);

        assert!(blocklist.is_blocked(&name("ads.doubleclick.com")));
        assert!(blocklist.is_blocked(&name("tracker.ads.doubleclick.com")));
    }

    #[test]
    fn is_blocked_does_not_match_substrings() {
        let blocklist = blocklist(&["ads.example.com"]);

        assert!(!blocklist.is_blocked(&name("badads.example.com")));
        assert!(!blocklist.is_blocked(&name("example.com")));
        assert!(!blocklist.is_blocked(&name("ads.example.com.evil.org")));
    }

    #[test]
    fn is_blocked_case_insensitive() {
        let blocklist = blocklist(&["doubleclick.com"]);

        assert!(blocklist.is_blocked(&name("DOUBLECLICK.COM")));
        assert!(blocklist.is_blocked(&name("ADS.doubleclick.com")));
    }

    #[test]
    fn is_blocked_listed_single_label() {
        let blocklist = blocklist(&["zip"]);

        assert!(blocklist.is_blocked(&name("zip")));
        assert!(blocklist.is_blocked(&name("files.example.zip")));
        assert!(!blocklist.is_blocked(&name("example.com")));
    }

    #[test]
    fn is_blocked_returns_false_for_safe_domains() {
        let blocklist = blocklist(&["doubleclick.com"]);

        assert!(!blocklist.is_blocked(&name("google.com")));
        assert!(!blocklist.is_blocked(&name("github.com")));
        assert!(!blocklist.is_blocked(&name("com")));
    }

    #[test]
    fn allowlist_overrides_blocklist() {
        let blocklist =
            blocklist(&["example.com"]).with_allowed([name("safe.example.com")]);

        assert!(blocklist.is_blocked(&name("ads.example.com")));
        assert!(!blocklist.is_blocked(&name("safe.example.com")));
        assert!(!blocklist.is_blocked(&name("cdn.safe.example.com")));
        assert_eq!(blocklist.allowlist_len(), 1);
    }

    #[test]
    fn disable_doh_tracks_emptiness() {
        assert!(!Blocklist::default().disable_doh());
        assert!(blocklist(&["example.com"]).disable_doh());
    }

    #[test]
    fn allowlist_alone_does_not_disable_doh() {
        let blocklist = Blocklist::default().with_allowed([name("example.com")]);

        assert!(!blocklist.disable_doh());
        assert!(blocklist.is_empty());
    }
}
