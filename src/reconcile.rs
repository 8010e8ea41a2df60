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

//! Pairing of real and predicted counters for one rule.
//!
//! The two sources do not speak the same table numbering: the prediction engine sits between
//! controller and switches and shifts every table down by [`ENGINE_TABLE_OFFSET`], keeping the
//! reserved table 0 for itself. The reconciler translates between the two numberings and bounds
//! the time skew of the real counter by sandwiching the predicted read between two switch reads.

use crate::query::{QueryError, RuleSource};
use crate::rule::{CounterPair, CounterSample, Rule};

/// Number of tables the prediction engine reserves at the front of the pipeline. A rule the
/// switch holds in table `t` is known to the controller as table `t - ENGINE_TABLE_OFFSET`.
pub const ENGINE_TABLE_OFFSET: u8 = 1;

/// Reconciles one rule's counters across the switch-side and the controller-side source.
pub struct Reconciler<'a> {
    switch: &'a dyn RuleSource,
    controller: &'a dyn RuleSource,
}

impl<'a> Reconciler<'a> {
    pub fn new(switch: &'a dyn RuleSource, controller: &'a dyn RuleSource) -> Self {
        Self { switch, controller }
    }

    /// Take one measurement of `rule`: the switch's own counters (`real`) and the engine's
    /// prediction as reported by the controller (`predicted`).
    ///
    /// The switch is read before and after the controller; both reads must return the identical
    /// rule, and `real` is the per-counter midpoint of the two reads (rounded down). A mismatch
    /// between the reads means a table update raced the measurement, and the whole measurement
    /// is retried by the caller.
    pub async fn get_counter(&self, rule: &Rule) -> Result<CounterPair, QueryError> {
        let shifted_table = rule
            .table_id
            .checked_sub(ENGINE_TABLE_OFFSET)
            .ok_or(QueryError::ReservedTable(rule.table_id))?;

        let before = self.switch.get(rule).await?;

        let mut query = rule.clone();
        query.table_id = shifted_table;
        let mut predicted = self.controller.get(&query).await?;
        predicted.table_id += ENGINE_TABLE_OFFSET;

        let after = self.switch.get(&before).await?;
        if before != after || before != predicted {
            return Err(QueryError::IdentityMismatch {
                requested: Box::new(before),
                returned: Box::new(predicted),
            });
        }

        Ok(CounterPair {
            real: midpoint(before.counter(), after.counter()),
            predicted: predicted.counter(),
        })
    }
}

/// Per-counter midpoint of two snapshots, rounded down. Widened so that near-saturated
/// counters cannot overflow.
fn midpoint(a: CounterSample, b: CounterSample) -> CounterSample {
    CounterSample {
        packet_count: ((a.packet_count as u128 + b.packet_count as u128) / 2) as u64,
        byte_count: ((a.byte_count as u128 + b.byte_count as u128) / 2) as u64,
    }
}
