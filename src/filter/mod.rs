//! Domain filtering module.
//!
//! Owns the blocklist loaded from the filters directory and answers the
//! per-request questions the server is asked.

mod blocklist;

pub use blocklist::{Blocklist, LoadError};

use crate::protocol::{Request, Response};

/// Answer one decoded request against the blocklist.
pub fn handle_request(blocklist: &Blocklist, request: &Request) -> Response {
    match request {
        Request::Lookup { domain } => Response::Lookup {
            blocked: blocklist.is_blocked(domain),
            disable_doh: blocklist.disable_doh(),
        },
        Request::Probe => Response::Probe {
            disable_doh: blocklist.disable_doh(),
        },
    }
}
