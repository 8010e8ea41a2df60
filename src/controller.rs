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

//! Controller-side counter source, querying predicted counters through the controller's
//! flow-stats REST interface.
//!
//! The interface is a single endpoint, `POST /stats/flow/<dpid>` with a flow-stats request as
//! JSON body, answered by `{"<dpid>": [<entry>, ...]}`. One fresh connection is opened per
//! request (`Connection: close`), which keeps the exchange a plain write-then-read-to-EOF.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::CONFIG;
use crate::query::{QueryError, RuleSource};
use crate::rule::Rule;

/// Client for the controller's flow-stats REST interface.
pub struct StatsClient {
    host: String,
    port: u16,
}

impl StatsClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Client pointing at the configured controller REST interface.
    pub fn from_config() -> Self {
        Self::new(CONFIG.controller.rest_host.clone(), CONFIG.controller.rest_port)
    }

    /// Issue one flow-stats request and return the raw response body.
    async fn request(&self, path: &str, body: &str) -> Result<String, QueryError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let request = format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {body}",
            self.host,
            self.port,
            body.len(),
        );
        log::trace!("[controller] POST {path} {body}");
        stream.write_all(request.as_bytes()).await?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;
        let response = String::from_utf8(raw)
            .map_err(|e| QueryError::MalformedResponse(e.to_string()))?;

        // assumes Content-Length framing (what the controller's WSGI server sends with
        // `Connection: close`); chunked transfer encoding is not decoded
        let (head, payload) = response
            .split_once("\r\n\r\n")
            .ok_or_else(|| QueryError::MalformedResponse("missing header terminator".into()))?;
        let status: u16 = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| QueryError::MalformedResponse("missing status line".into()))?;
        if status != 200 {
            return Err(QueryError::RequestFailed(status));
        }
        Ok(payload.to_string())
    }
}

#[async_trait::async_trait]
impl RuleSource for StatsClient {
    async fn get(&self, rule: &Rule) -> Result<Rule, QueryError> {
        let body = serde_json::to_string(&rule.to_stats_request())
            .map_err(|e| QueryError::MalformedResponse(e.to_string()))?;
        let payload = self
            .request(&format!("/stats/flow/{}", rule.dpid), &body)
            .await?;
        if payload.trim().is_empty() {
            return Err(QueryError::NoResult);
        }

        let mut entries = parse_stats_response(rule.dpid, &payload)?;
        if entries.is_empty() {
            return Err(QueryError::NoResult);
        }
        if entries.len() > 1 {
            return Err(QueryError::Ambiguous(entries.len()));
        }
        let found = entries.remove(0);
        if &found != rule {
            return Err(QueryError::IdentityMismatch {
                requested: Box::new(rule.clone()),
                returned: Box::new(found),
            });
        }
        Ok(found)
    }
}

/// Parse a flow-stats response body, `{"<dpid>": [<entry>, ...]}`, into the contained rules.
pub(crate) fn parse_stats_response(dpid: u64, payload: &str) -> Result<Vec<Rule>, QueryError> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| QueryError::MalformedResponse(e.to_string()))?;
    let object = value
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| {
            QueryError::MalformedResponse("expected an object with exactly one datapath".into())
        })?;
    let (key, entries) = object
        .iter()
        .next()
        .ok_or_else(|| QueryError::MalformedResponse("empty response object".into()))?;

    let returned: u64 = key
        .parse()
        .map_err(|_| QueryError::MalformedResponse(format!("non-numeric datapath key {key:?}")))?;
    if returned != dpid {
        return Err(QueryError::WrongDatapath {
            requested: dpid,
            returned,
        });
    }

    entries
        .as_array()
        .ok_or_else(|| QueryError::MalformedResponse("datapath entries are not an array".into()))?
        .iter()
        .map(|record| Rule::from_stats_record(dpid, record).map_err(QueryError::from))
        .collect()
}
