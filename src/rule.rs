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

//! Canonical representation of a single forwarding-table entry, regardless of whether it was
//! parsed from the switch dump CLI or from the controller's flow-stats interface.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EtherType used by link discovery (LLDP). Entries matching it are controller plumbing, not
/// forwarding rules, and are filtered before parsing.
pub const LLDP_ETHERTYPE: &str = "0x88cc";

lazy_static! {
    static ref COOKIE_RE: Regex = Regex::new(r"cookie=(?:0x)?([0-9a-fA-F]+)").unwrap();
    static ref TABLE_RE: Regex = Regex::new(r"table=(\d+)").unwrap();
    static ref N_PACKETS_RE: Regex = Regex::new(r"n_packets=(\d+)").unwrap();
    static ref N_BYTES_RE: Regex = Regex::new(r"n_bytes=(\d+)").unwrap();
    static ref PRIORITY_RE: Regex = Regex::new(r"priority=(\d+)").unwrap();
    static ref ACTIONS_RE: Regex = Regex::new(r"actions=(\S+)").unwrap();
    static ref MATCH_RE: Regex = Regex::new(r"priority=\d+,(\S+)").unwrap();
    static ref FIELD_RE: Regex = Regex::new(r#"(\w+)=("[^"]*"|[^,]+)"#).unwrap();
    static ref IFACE_PORT_RE: Regex = Regex::new(r"-eth(\d+)$").unwrap();
}

/// A single value of a match field. Values that look like integers (decimal or `0x`-prefixed hex)
/// are canonicalized to [`MatchValue::Int`] so that text- and record-parsed rules compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchValue {
    Int(i64),
    Str(String),
}

impl MatchValue {
    /// Canonicalize a textual field value.
    fn from_text(s: &str) -> Self {
        if let Ok(x) = s.parse::<i64>() {
            MatchValue::Int(x)
        } else if let Some(hex) = s.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
                .map(MatchValue::Int)
                .unwrap_or_else(|_| MatchValue::Str(s.to_string()))
        } else {
            MatchValue::Str(s.to_string())
        }
    }
}

impl fmt::Display for MatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchValue::Int(x) => x.fmt(f),
            MatchValue::Str(s) => s.fmt(f),
        }
    }
}

/// The match of a rule, mapping field names to values. Insertion order is irrelevant for
/// equality, hence the sorted map.
pub type MatchFields = BTreeMap<String, MatchValue>;

/// One OpenFlow forwarding rule with its counters.
///
/// The identity of a rule is the tuple `(dpid, cookie, table_id, priority, fields)`; equality is
/// defined on the identity only. The counters and the actions are *excluded*, since they are
/// expected to differ in value (or be absent) across sources and across time.
///
/// A rule is constructed fresh on every query, either [`Rule::from_dump_line`] (switch dump CLI)
/// or [`Rule::from_stats_record`] (controller flow-stats entry). Both constructors must yield
/// equal rules for the same table entry; this is the contract every parser change must preserve.
#[derive(Debug, Clone)]
pub struct Rule {
    /// OpenFlow datapath ID of the switch holding this entry.
    pub dpid: u64,
    /// Opaque tag set by whoever installed the rule.
    pub cookie: u64,
    /// Table index, in the switch's own numbering.
    pub table_id: u8,
    /// Matching priority.
    pub priority: u16,
    /// Match fields, with `in_port` normalized to an integer.
    pub fields: MatchFields,
    /// Number of packets that hit this entry.
    pub packet_count: u64,
    /// Number of bytes that hit this entry.
    pub byte_count: u64,
    /// Textual action list. Not part of the identity.
    pub actions: String,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.dpid == other.dpid
            && self.cookie == other.cookie
            && self.table_id == other.table_id
            && self.priority == other.priority
            && self.fields == other.fields
    }
}

impl Eq for Rule {}

impl Rule {
    /// Parse a rule from one line of `ovs-ofctl dump-flows` output, e.g.:
    ///
    /// ```text
    /// cookie=0x5, duration=7.2s, table=1, n_packets=10, n_bytes=840, priority=1,in_port="s1-eth1" actions=output:2
    /// ```
    ///
    /// The caller must filter out link-discovery entries and non-flow header lines first (see
    /// [`is_flow_line`]).
    pub fn from_dump_line(dpid: u64, line: &str) -> Result<Self, ParseError> {
        let cookie_str = capture(&COOKIE_RE, line, "cookie")?;
        let cookie = u64::from_str_radix(cookie_str, 16)
            .map_err(|_| ParseError::InvalidInt("cookie", cookie_str.to_string()))?;
        let table_id = parse_int(&TABLE_RE, line, "table")?;
        let packet_count = parse_int(&N_PACKETS_RE, line, "n_packets")?;
        let byte_count = parse_int(&N_BYTES_RE, line, "n_bytes")?;
        let priority = parse_int(&PRIORITY_RE, line, "priority")?;
        let actions = ACTIONS_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let mut fields = MatchFields::new();
        if let Some(match_str) = MATCH_RE.captures(line).and_then(|c| c.get(1)) {
            for caps in FIELD_RE.captures_iter(match_str.as_str()) {
                let key = caps[1].to_string();
                let value = caps[2].trim_matches('"');
                fields.insert(key, MatchValue::from_text(value));
            }
        }
        normalize_in_port(&mut fields)?;

        Ok(Self {
            dpid,
            cookie,
            table_id,
            packet_count,
            byte_count,
            priority,
            fields,
            actions,
        })
    }

    /// Build a rule from a single flow-stats entry of the controller's REST response.
    pub fn from_stats_record(dpid: u64, record: &serde_json::Value) -> Result<Self, ParseError> {
        let entry: FlowStatsEntry = serde_json::from_value(record.clone())
            .map_err(|e| ParseError::MalformedRecord(e.to_string()))?;
        let mut fields = entry.fields;
        normalize_in_port(&mut fields)?;
        Ok(Self {
            dpid,
            cookie: entry.cookie,
            table_id: entry.table_id,
            priority: entry.priority,
            packet_count: entry.packet_count,
            byte_count: entry.byte_count,
            fields,
            actions: entry.actions.iter().join(","),
        })
    }

    /// The counters of this rule.
    pub fn counter(&self) -> CounterSample {
        CounterSample {
            packet_count: self.packet_count,
            byte_count: self.byte_count,
        }
    }

    /// The reduced request form used to ask the controller for this exact entry. The cookie mask
    /// is zero (match-any), since the engine may not track cookie masks precisely.
    pub fn to_stats_request(&self) -> FlowStatsRequest {
        FlowStatsRequest {
            cookie: self.cookie,
            cookie_mask: 0,
            table_id: self.table_id,
            priority: self.priority,
            fields: self.fields.clone(),
            flags: 0,
        }
    }

    /// The match string used to ask the switch dump CLI for this exact entry. The CLI cannot
    /// filter by priority, so callers must filter the returned entries client-side.
    pub fn to_dump_match(&self) -> String {
        let mut parts = vec![format!("cookie=0x{:x}/-1", self.cookie), format!("table={}", self.table_id)];
        parts.extend(self.fields.iter().map(|(k, v)| format!("{k}={v}")));
        parts.join(",")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dpid={}, cookie=0x{:x}, table={}, n_packets={}, n_bytes={}, priority={},{}",
            self.dpid,
            self.cookie,
            self.table_id,
            self.packet_count,
            self.byte_count,
            self.priority,
            self.fields.iter().map(|(k, v)| format!("{k}={v}")).join(",")
        )
    }
}

/// Returns `true` if `line` is an actual flow entry: non-empty, not a link-discovery (LLDP)
/// entry, and not a `NXST_FLOW`/`OFPST_FLOW` transaction header.
pub fn is_flow_line(line: &str) -> bool {
    !line.trim().is_empty() && !line.contains(LLDP_ETHERTYPE) && !line.contains("xid")
}

/// Replace an interface-name `in_port` (e.g. `s1-eth2`) by its trailing integer.
fn normalize_in_port(fields: &mut MatchFields) -> Result<(), ParseError> {
    let port = if let Some(MatchValue::Str(port_str)) = fields.get("in_port") {
        Some(
            IFACE_PORT_RE
                .captures(port_str)
                .and_then(|c| c[1].parse::<i64>().ok())
                .ok_or_else(|| ParseError::InvalidPort(port_str.clone()))?,
        )
    } else {
        None
    };
    if let Some(port) = port {
        fields.insert("in_port".to_string(), MatchValue::Int(port));
    }
    Ok(())
}

fn capture<'a>(re: &Regex, line: &'a str, name: &'static str) -> Result<&'a str, ParseError> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ParseError::MissingField(name, line.to_string()))
}

fn parse_int<T: std::str::FromStr>(
    re: &Regex,
    line: &str,
    name: &'static str,
) -> Result<T, ParseError> {
    let s = capture(re, line, name)?;
    s.parse()
        .map_err(|_| ParseError::InvalidInt(name, s.to_string()))
}

/// Flow-stats entry as returned by the controller's REST interface.
#[derive(Debug, Clone, Deserialize)]
struct FlowStatsEntry {
    cookie: u64,
    table_id: u8,
    priority: u16,
    packet_count: u64,
    byte_count: u64,
    #[serde(rename = "match")]
    fields: MatchFields,
    #[serde(default)]
    actions: Vec<String>,
}

/// Flow-stats request body for `POST /stats/flow/<dpid>`.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStatsRequest {
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    pub priority: u16,
    #[serde(rename = "match")]
    pub fields: MatchFields,
    pub flags: u16,
}

/// A single counter snapshot of one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSample {
    pub packet_count: u64,
    pub byte_count: u64,
}

/// The atomic unit of measurement: the counters of one rule as held by the switch (`real`) and
/// as reported through the controller by the prediction engine (`predicted`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterPair {
    pub real: CounterSample,
    pub predicted: CounterSample,
}

/// Error when parsing a flow entry from either source. Never retried: a malformed entry means a
/// collaborator violated its contract.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A required field could not be extracted from the dump line.
    #[error("Missing field `{0}` in flow entry: {1}")]
    MissingField(&'static str, String),
    /// A field was present but not a valid integer.
    #[error("Invalid integer in field `{0}`: {1}")]
    InvalidInt(&'static str, String),
    /// An `in_port` value that is neither an integer nor an interface name.
    #[error("Invalid port format: {0}")]
    InvalidPort(String),
    /// The controller's flow-stats record is missing required fields.
    #[error("Malformed flow-stats record: {0}")]
    MalformedRecord(String),
}
