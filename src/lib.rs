//! dns-filter - Blocklist policy daemon for a filtering DNS resolver.
//!
//! The daemon ([`server`]) owns the blocklist and answers lookups over a
//! Unix socket. The resolver embeds a [`policy::PolicyEvaluator`], which
//! asks the daemon about each query name and turns the answer into a
//! [`policy::Decision`].

pub mod client;
pub mod config;
pub mod control;
pub mod domain;
pub mod error;
pub mod filter;
pub mod logging;
pub mod monitor;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod stats;
mod sys;

pub use domain::DomainName;
pub use error::{Error, Result};
