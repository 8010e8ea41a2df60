// OpenFlowLab: OpenFlow Counter-Prediction Testbed written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! The common interface of the two counter sources (switch dump CLI and controller stats), and
//! the error taxonomy of rule queries.

use thiserror::Error;

use crate::net::NetError;
use crate::retry::Transient;
use crate::rule::{ParseError, Rule};

/// A source that can answer "give me the current state of exactly this rule". Implemented by the
/// switch-side source ([`crate::dpctl::Dpctl`]) and by the controller-side source
/// ([`crate::controller::StatsClient`]).
#[async_trait::async_trait]
pub trait RuleSource {
    /// Re-query the entry matching `rule`'s query form. The returned rule is equal to `rule`
    /// under rule identity, with fresh counters.
    async fn get(&self, rule: &Rule) -> Result<Rule, QueryError>;
}

/// Error of a single rule query against either source.
///
/// Transient kinds (zero or too many matches, identity races, transport hiccups) are absorbed by
/// [`crate::retry::RetryPolicy`] up to the configured bound; the rest indicate a collaborator
/// contract violation and propagate immediately.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed source data. Not retryable.
    #[error("{0}")]
    Parse(#[from] ParseError),
    /// The switch returned zero matching entries.
    #[error("No flow entry matches the requested rule")]
    NotFound,
    /// The controller's response contained zero entries.
    #[error("The controller returned no result for the requested rule")]
    NoResult,
    /// More than one entry matched where exactly one was expected.
    #[error("Expected exactly one matching flow entry, got {0}")]
    Ambiguous(usize),
    /// Two sources (or a source and the request) disagree on *which* rule is being discussed.
    /// Expected under a race between counter sampling and a table update; persisting past the
    /// retry bound it is a hard failure.
    #[error("Rule identity mismatch: requested ({requested}), returned ({returned})")]
    IdentityMismatch {
        requested: Box<Rule>,
        returned: Box<Rule>,
    },
    /// The stats request returned a non-success transport status.
    #[error("Stats request failed with status {0}")]
    RequestFailed(u16),
    /// The controller's response is not valid HTTP/JSON of the documented shape.
    #[error("Malformed stats response: {0}")]
    MalformedResponse(String),
    /// The controller answered for a different datapath than requested.
    #[error("Stats response is for datapath {returned}, requested {requested}")]
    WrongDatapath { requested: u64, returned: u64 },
    /// The requested rule lives in the reserved (default/miss) table, which the engine does not
    /// track.
    #[error("Rule in reserved table {0} cannot be queried through the engine")]
    ReservedTable(u8),
    /// The rule names a switch this testbed does not manage.
    #[error("Unknown switch with dpid {0}")]
    UnknownSwitch(u64),
    /// Error while talking to the emulated network.
    #[error("{0}")]
    Net(#[from] NetError),
    /// I/O error of the stats transport.
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

impl Transient for QueryError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            QueryError::NotFound
                | QueryError::NoResult
                | QueryError::Ambiguous(_)
                | QueryError::IdentityMismatch { .. }
                | QueryError::RequestFailed(_)
                | QueryError::Net(_)
                | QueryError::Io(_)
        )
    }
}
