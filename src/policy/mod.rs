//! Resolver-side policy.
//!
//! Turns the server's raw answer for a query name into what the resolver
//! should do with it. When any blocklist is active, DoH discovery is
//! suppressed so clients fall back to plain DNS where filtering applies:
//!
//! 1. Canary domains get NXDOMAIN (signals "DoH unavailable" to the OS).
//! 2. Unblocked DoH provider hostnames get an empty NOERROR answer.
//! 3. Blocked names get the sinkhole address.
//!
//! Steps 1 and 2 only apply while `disable_doh` is set.

mod evaluator;

pub use evaluator::PolicyEvaluator;

use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use rustc_hash::FxHashSet;

use crate::client::Lookup;
use crate::domain::DomainName;

/// Names operating systems query to detect whether DoH is being blocked.
pub const CANARY_DOMAINS: &[&str] = &["use-application-dns.net"];

/// TTL of synthesized sinkhole answers, in seconds.
pub const SINKHOLE_TTL: u32 = 10;

/// Embedded list of public DoH resolver hostnames, loaded at compile time.
const DOH_PROVIDERS_LIST: &str = include_str!("doh_providers.txt");

static DOH_PROVIDERS: LazyLock<FxHashSet<&'static str>> = LazyLock::new(|| {
    DOH_PROVIDERS_LIST
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
});

const QTYPE_A: u16 = 1;
const QTYPE_AAAA: u16 = 28;
const QTYPE_ANY: u16 = 255;

/// DNS response codes the resolver is told to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    NoError = 0,
    NxDomain = 3,
}

/// What the resolver should do with one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Resolve normally.
    Allow,
    /// Finish immediately with NOERROR and no records.
    ForceNoError,
    /// Answer with the sinkhole address.
    Intercept(IpAddr),
    /// Finish immediately with NXDOMAIN.
    Deny,
}

impl Decision {
    /// Response code for decisions that finish the query, `None` for
    /// [`Decision::Allow`].
    pub fn rcode(&self) -> Option<Rcode> {
        match self {
            Decision::Allow => None,
            Decision::ForceNoError | Decision::Intercept(_) => Some(Rcode::NoError),
            Decision::Deny => Some(Rcode::NxDomain),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("ALLOW"),
            Decision::ForceNoError => f.write_str("NOERROR"),
            Decision::Intercept(addr) => write!(f, "INTERCEPT {}", addr),
            Decision::Deny => f.write_str("NXDOMAIN"),
        }
    }
}

pub fn is_canary(name: &DomainName) -> bool {
    CANARY_DOMAINS.iter().any(|canary| *canary == name.as_str())
}

pub fn is_doh_provider(name: &DomainName) -> bool {
    DOH_PROVIDERS.contains(name.as_str())
}

/// Number of embedded DoH provider hostnames.
pub fn doh_provider_count() -> usize {
    DOH_PROVIDERS.len()
}

/// Combine the server's answer for `name` with the static tables.
pub fn decide(name: &DomainName, lookup: Lookup, sinkhole: IpAddr) -> Decision {
    if lookup.disable_doh {
        if is_canary(name) {
            return Decision::Deny;
        }
        if is_doh_provider(name) && !lookup.blocked {
            return Decision::ForceNoError;
        }
    }

    if lookup.blocked {
        Decision::Intercept(sinkhole)
    } else {
        Decision::Allow
    }
}

/// Render the intercept answer for `qname` in presentation format.
///
/// Only queries whose type matches the sinkhole's address family get a
/// record; for everything else the resolver returns NOERROR with an empty
/// answer section.
pub fn sinkhole_record(qname: &str, qtype: u16, sinkhole: IpAddr) -> Option<String> {
    let rr_type = match (qtype, sinkhole) {
        (QTYPE_A | QTYPE_ANY, IpAddr::V4(_)) => "A",
        (QTYPE_AAAA | QTYPE_ANY, IpAddr::V6(_)) => "AAAA",
        _ => return None,
    };

    Some(format!("{} {} IN {} {}", qname, SINKHOLE_TTL, rr_type, sinkhole))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const SINKHOLE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn name(s: &str) -> DomainName {
        DomainName::parse(s).unwrap()
    }

    fn lookup(blocked: bool, disable_doh: bool) -> Lookup {
        Lookup {
            blocked,
            disable_doh,
        }
    }

    #[test]
    fn canary_is_denied_while_doh_disabled() {
        let canary = name("use-application-dns.net");

        assert_eq!(decide(&canary, lookup(false, true), SINKHOLE), Decision::Deny);
        assert_eq!(decide(&canary, lookup(true, true), SINKHOLE), Decision::Deny);
    }

    #[test]
    fn canary_passes_without_active_policy() {
        let canary = name("use-application-dns.net");

        assert_eq!(decide(&canary, lookup(false, false), SINKHOLE), Decision::Allow);
    }

    #[test]
    fn unblocked_doh_provider_gets_empty_answer() {
        let provider = name("mozilla.cloudflare-dns.com");

        assert_eq!(
            decide(&provider, lookup(false, true), SINKHOLE),
            Decision::ForceNoError
        );
    }

    #[test]
    fn blocked_doh_provider_is_intercepted() {
        let provider = name("dns.google");

        assert_eq!(
            decide(&provider, lookup(true, true), SINKHOLE),
            Decision::Intercept(SINKHOLE)
        );
    }

    #[test]
    fn doh_provider_without_active_policy_passes() {
        let provider = name("dns.google");

        assert_eq!(decide(&provider, lookup(false, false), SINKHOLE), Decision::Allow);
    }

    #[test]
    fn doh_provider_match_is_exact() {
        assert!(is_doh_provider(&name("dns.google")));
        assert!(!is_doh_provider(&name("www.dns.google")));
        assert!(!is_doh_provider(&name("google")));
    }

    #[test]
    fn blocked_name_is_intercepted() {
        assert_eq!(
            decide(&name("ads.example.com"), lookup(true, true), SINKHOLE),
            Decision::Intercept(SINKHOLE)
        );
        assert_eq!(
            decide(&name("example.com"), lookup(false, true), SINKHOLE),
            Decision::Allow
        );
    }

    #[test]
    fn embedded_provider_list_skips_comments() {
        assert!(doh_provider_count() > 10);
        assert!(!DOH_PROVIDERS.iter().any(|p| p.starts_with('#')));
    }

    #[test]
    fn rcode_per_decision() {
        assert_eq!(Decision::Allow.rcode(), None);
        assert_eq!(Decision::ForceNoError.rcode(), Some(Rcode::NoError));
        assert_eq!(Decision::Intercept(SINKHOLE).rcode(), Some(Rcode::NoError));
        assert_eq!(Decision::Deny.rcode(), Some(Rcode::NxDomain));
    }

    #[test]
    fn sinkhole_record_for_matching_family() {
        assert_eq!(
            sinkhole_record("ads.example.com.", QTYPE_A, SINKHOLE).as_deref(),
            Some("ads.example.com. 10 IN A 10.0.0.1")
        );
        assert_eq!(
            sinkhole_record("ads.example.com.", QTYPE_ANY, SINKHOLE).as_deref(),
            Some("ads.example.com. 10 IN A 10.0.0.1")
        );
        assert_eq!(
            sinkhole_record("ads.example.com.", QTYPE_AAAA, IpAddr::V6(Ipv6Addr::LOCALHOST))
                .as_deref(),
            Some("ads.example.com. 10 IN AAAA ::1")
        );
    }

    #[test]
    fn sinkhole_record_skips_other_types() {
        assert_eq!(sinkhole_record("ads.example.com.", QTYPE_AAAA, SINKHOLE), None);
        assert_eq!(sinkhole_record("ads.example.com.", 16, SINKHOLE), None);
    }
}
