//! Incident sender.
//!
//! Polls a security incident platform on a fixed schedule, enriches every new
//! incident with its description (or its complete record), optionally filters
//! the batch against a named reference list and hands the result to the
//! [`notify`] channels.
//!
//! # Cycle
//!
//! 1. Resolve the cursor from the savepoint ([`savepoint`]).
//! 2. Obtain or refresh the access token ([`auth`]).
//! 3. Query open incidents created since the cursor ([`api`]).
//! 4. Apply the allow/deny filter ([`filter`]).
//! 5. Enrich each incident. Any failure aborts the cycle before dispatch.
//! 6. Deliver to every enabled channel and store the new savepoint ([`cycle`]).

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
pub mod config;
pub mod cycle;
pub mod error;
pub mod filter;
pub mod logging;
pub mod savepoint;
pub mod scheduler;

pub use config::{Cli, Config, SinkConfig};
pub use cycle::{Collector, CycleReport, CycleSettings};
pub use error::{Error, Result};
