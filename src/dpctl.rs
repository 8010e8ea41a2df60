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

//! Switch-side counter source, reading ground-truth counters straight from the switches' flow
//! tables via the flow-dump CLI.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::net::SwitchHandle;
use crate::query::{QueryError, RuleSource};
use crate::rule::{is_flow_line, Rule};

lazy_static! {
    static ref FLOW_COUNT_RE: Regex = Regex::new(r"flow_count=(\d+)").unwrap();
}

/// Driver for the flow-dump CLI of all managed switches, addressed by datapath ID.
pub struct Dpctl {
    switches: BTreeMap<u64, Arc<dyn SwitchHandle>>,
}

impl Dpctl {
    pub fn new(switches: Vec<Arc<dyn SwitchHandle>>) -> Self {
        Self {
            switches: switches.into_iter().map(|s| (s.dpid(), s)).collect(),
        }
    }

    /// Number of managed switches.
    pub fn switch_num(&self) -> usize {
        self.switches.len()
    }

    /// Datapath IDs of all managed switches, in ascending order.
    pub fn dpids(&self) -> impl Iterator<Item = u64> + '_ {
        self.switches.keys().copied()
    }

    fn switch(&self, dpid: u64) -> Result<&Arc<dyn SwitchHandle>, QueryError> {
        self.switches
            .get(&dpid)
            .ok_or(QueryError::UnknownSwitch(dpid))
    }

    /// Dump all flow entries of one switch, skipping link-discovery entries and transaction
    /// headers.
    pub async fn dump(&self, dpid: u64) -> Result<Vec<Rule>, QueryError> {
        let out = self.switch(dpid)?.dpctl("dump-flows", &[]).await?;
        parse_dump(dpid, &out)
    }

    /// Dump the flow entries of all managed switches.
    pub async fn dump_all(&self) -> Result<Vec<Rule>, QueryError> {
        let mut rules = Vec::new();
        for dpid in self.switches.keys().copied().collect::<Vec<_>>() {
            rules.extend(self.dump(dpid).await?);
        }
        Ok(rules)
    }

    /// Total number of flow entries across all managed switches. With `count_table_zero =
    /// false`, entries in the reserved table 0 are subtracted.
    pub async fn rule_count(&self, count_table_zero: bool) -> Result<usize, QueryError> {
        let mut total = 0;
        for dpid in self.switches.keys().copied().collect::<Vec<_>>() {
            total += self.rule_count_on(dpid, count_table_zero).await?;
        }
        Ok(total)
    }

    /// Number of flow entries on one switch, taken from the switch's aggregate statistics (so
    /// the count is exact even when individual entries are unparsable). With `count_table_zero
    /// = false`, entries in the reserved table 0 are subtracted.
    pub async fn rule_count_on(&self, dpid: u64, count_table_zero: bool) -> Result<usize, QueryError> {
        let sw = self.switch(dpid)?;
        let out = sw.dpctl("dump-aggregate", &[]).await?;
        let total: usize = FLOW_COUNT_RE
            .captures(&out)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| QueryError::MalformedResponse(out.trim().to_string()))?;
        if count_table_zero {
            return Ok(total);
        }
        let table_zero = self
            .dump(dpid)
            .await?
            .into_iter()
            .filter(|r| r.table_id == 0)
            .count();
        Ok(total.saturating_sub(table_zero))
    }
}

#[async_trait::async_trait]
impl RuleSource for Dpctl {
    /// Re-query a single entry by its match. The CLI cannot filter on the priority, so entries
    /// of other priorities are dropped client-side before checking uniqueness.
    async fn get(&self, rule: &Rule) -> Result<Rule, QueryError> {
        let sw = self.switch(rule.dpid)?;
        let filter = rule.to_dump_match();
        let out = sw.dpctl("dump-flows", &[filter.as_str()]).await?;
        let mut matches = parse_dump(rule.dpid, &out)?;
        matches.retain(|r| r.priority == rule.priority);

        if matches.is_empty() {
            return Err(QueryError::NotFound);
        }
        if matches.len() > 1 {
            return Err(QueryError::Ambiguous(matches.len()));
        }
        let found = matches.remove(0);
        if &found != rule {
            return Err(QueryError::IdentityMismatch {
                requested: Box::new(rule.clone()),
                returned: Box::new(found),
            });
        }
        Ok(found)
    }
}

fn parse_dump(dpid: u64, out: &str) -> Result<Vec<Rule>, QueryError> {
    out.lines()
        .filter(|l| is_flow_line(l))
        .map(|l| Rule::from_dump_line(dpid, l).map_err(QueryError::from))
        .collect()
}
