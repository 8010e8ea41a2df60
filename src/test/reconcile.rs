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

use std::collections::VecDeque;
use std::sync::Mutex;

use maplit::btreemap;
use pretty_assertions::assert_eq;

use crate::query::{QueryError, RuleSource};
use crate::reconcile::{Reconciler, ENGINE_TABLE_OFFSET};
use crate::retry::Transient;
use crate::rule::{MatchValue, Rule};

fn rule(table_id: u8, packets: u64, bytes: u64) -> Rule {
    Rule {
        dpid: 1,
        cookie: 5,
        table_id,
        priority: 1,
        fields: btreemap! {"in_port".to_string() => MatchValue::Int(1)},
        packet_count: packets,
        byte_count: bytes,
        actions: "output:2".to_string(),
    }
}

/// A source answering from a canned queue and recording every query it saw.
#[derive(Default)]
struct Mock {
    responses: Mutex<VecDeque<Result<Rule, QueryError>>>,
    seen: Mutex<Vec<Rule>>,
}

impl Mock {
    fn answering(responses: Vec<Result<Rule, QueryError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen_tables(&self) -> Vec<u8> {
        self.seen.lock().unwrap().iter().map(|r| r.table_id).collect()
    }
}

#[async_trait::async_trait]
impl RuleSource for Mock {
    async fn get(&self, rule: &Rule) -> Result<Rule, QueryError> {
        self.seen.lock().unwrap().push(rule.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected query")
    }
}

#[tokio::test]
async fn counters_are_averaged_with_floor() {
    let switch = Mock::answering(vec![Ok(rule(1, 10, 100)), Ok(rule(1, 13, 101))]);
    let controller = Mock::answering(vec![Ok(rule(0, 7, 70))]);
    let pair = Reconciler::new(&switch, &controller)
        .get_counter(&rule(1, 0, 0))
        .await
        .unwrap();

    assert_eq!(pair.real.packet_count, 11);
    assert_eq!(pair.real.byte_count, 100);
    assert_eq!(pair.predicted.packet_count, 7);
    assert_eq!(pair.predicted.byte_count, 70);
}

#[tokio::test]
async fn near_saturated_counters_do_not_overflow() {
    let switch = Mock::answering(vec![
        Ok(rule(1, u64::MAX - 1, u64::MAX)),
        Ok(rule(1, u64::MAX, u64::MAX)),
    ]);
    let controller = Mock::answering(vec![Ok(rule(0, 7, 70))]);
    let pair = Reconciler::new(&switch, &controller)
        .get_counter(&rule(1, 0, 0))
        .await
        .unwrap();

    assert_eq!(pair.real.packet_count, u64::MAX - 1);
    assert_eq!(pair.real.byte_count, u64::MAX);
}

#[tokio::test]
async fn controller_is_queried_in_shifted_table() {
    let switch = Mock::answering(vec![Ok(rule(3, 1, 1)), Ok(rule(3, 1, 1))]);
    let controller = Mock::answering(vec![Ok(rule(3 - ENGINE_TABLE_OFFSET, 1, 1))]);
    Reconciler::new(&switch, &controller)
        .get_counter(&rule(3, 0, 0))
        .await
        .unwrap();

    assert_eq!(switch.seen_tables(), vec![3, 3]);
    assert_eq!(controller.seen_tables(), vec![3 - ENGINE_TABLE_OFFSET]);
}

#[tokio::test]
async fn reserved_table_is_rejected() {
    let switch = Mock::default();
    let controller = Mock::default();
    let result = Reconciler::new(&switch, &controller)
        .get_counter(&rule(0, 0, 0))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, QueryError::ReservedTable(0)));
    assert!(!err.is_transient());
    assert!(switch.seen_tables().is_empty());
    assert!(controller.seen_tables().is_empty());
}

#[tokio::test]
async fn racing_table_update_is_transient() {
    let mut moved = rule(1, 20, 200);
    moved.cookie = 6;
    let switch = Mock::answering(vec![Ok(rule(1, 10, 100)), Ok(moved)]);
    let controller = Mock::answering(vec![Ok(rule(0, 7, 70))]);
    let err = Reconciler::new(&switch, &controller)
        .get_counter(&rule(1, 0, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::IdentityMismatch { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn prediction_for_a_different_rule_is_a_mismatch() {
    let mut other = rule(0, 7, 70);
    other.priority = 2;
    let switch = Mock::answering(vec![Ok(rule(1, 10, 100)), Ok(rule(1, 10, 100))]);
    let controller = Mock::answering(vec![Ok(other)]);
    let err = Reconciler::new(&switch, &controller)
        .get_counter(&rule(1, 0, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::IdentityMismatch { .. }));
}

#[tokio::test]
async fn source_errors_propagate() {
    let switch = Mock::answering(vec![Err(QueryError::NotFound)]);
    let controller = Mock::default();
    let err = Reconciler::new(&switch, &controller)
        .get_counter(&rule(1, 0, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::NotFound));
    assert!(controller.seen_tables().is_empty());
}
