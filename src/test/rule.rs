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

use maplit::btreemap;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::rule::{is_flow_line, MatchValue, ParseError, Rule};

const DUMP_LINE: &str = " cookie=0x5, duration=7.266s, table=1, n_packets=10, n_bytes=840, idle_age=3, priority=1,in_port=\"s1-eth1\",dl_dst=00:00:00:00:00:02 actions=output:\"s1-eth2\"";

fn stats_record(packets: u64, bytes: u64) -> serde_json::Value {
    json!({
        "cookie": 5,
        "table_id": 1,
        "priority": 1,
        "packet_count": packets,
        "byte_count": bytes,
        "duration_sec": 7,
        "match": {"in_port": 1, "dl_dst": "00:00:00:00:00:02"},
        "actions": ["OUTPUT:2"],
    })
}

#[test]
fn parse_dump_line() {
    let rule = Rule::from_dump_line(1, DUMP_LINE).unwrap();
    assert_eq!(rule.dpid, 1);
    assert_eq!(rule.cookie, 5);
    assert_eq!(rule.table_id, 1);
    assert_eq!(rule.priority, 1);
    assert_eq!(rule.packet_count, 10);
    assert_eq!(rule.byte_count, 840);
    assert_eq!(rule.actions, "output:\"s1-eth2\"");
    assert_eq!(
        rule.fields,
        btreemap! {
            "in_port".to_string() => MatchValue::Int(1),
            "dl_dst".to_string() => MatchValue::Str("00:00:00:00:00:02".to_string()),
        }
    );
}

#[test]
fn parse_stats_record() {
    let rule = Rule::from_stats_record(1, &stats_record(12, 1000)).unwrap();
    assert_eq!(rule.dpid, 1);
    assert_eq!(rule.cookie, 5);
    assert_eq!(rule.table_id, 1);
    assert_eq!(rule.priority, 1);
    assert_eq!(rule.packet_count, 12);
    assert_eq!(rule.byte_count, 1000);
    assert_eq!(rule.fields["in_port"], MatchValue::Int(1));
}

#[test]
fn both_parsers_agree_on_identity() {
    let from_text = Rule::from_dump_line(1, DUMP_LINE).unwrap();
    let from_record = Rule::from_stats_record(1, &stats_record(12, 1000)).unwrap();
    // counters differ, identity does not
    assert_ne!(from_text.packet_count, from_record.packet_count);
    assert_eq!(from_text, from_record);
}

#[test]
fn identity_excludes_counters_and_actions() {
    let a = Rule::from_dump_line(1, DUMP_LINE).unwrap();
    let mut b = a.clone();
    b.packet_count += 100;
    b.byte_count += 100;
    b.actions = "drop".to_string();
    assert_eq!(a, b);
}

#[test]
fn identity_includes_table_and_dpid() {
    let a = Rule::from_dump_line(1, DUMP_LINE).unwrap();
    let mut b = a.clone();
    b.table_id += 1;
    assert_ne!(a, b);
    let mut c = a.clone();
    c.dpid = 2;
    assert_ne!(a, c);
}

#[test]
fn hex_cookie_without_prefix() {
    let line = DUMP_LINE.replace("cookie=0x5", "cookie=ff");
    let rule = Rule::from_dump_line(1, &line).unwrap();
    assert_eq!(rule.cookie, 0xff);
}

#[test]
fn hex_match_values_are_canonicalized() {
    let line = DUMP_LINE.replace("dl_dst=00:00:00:00:00:02", "dl_vlan=0x10");
    let rule = Rule::from_dump_line(1, &line).unwrap();
    assert_eq!(rule.fields["dl_vlan"], MatchValue::Int(16));
}

#[test]
fn rule_without_match_fields() {
    let line = " cookie=0x0, duration=9.2s, table=0, n_packets=3, n_bytes=180, priority=0 actions=CONTROLLER:65535";
    let rule = Rule::from_dump_line(1, line).unwrap();
    assert_eq!(rule.priority, 0);
    assert!(rule.fields.is_empty());
}

#[test]
fn missing_cookie_is_an_error() {
    let line = " duration=7.266s, table=1, n_packets=10, n_bytes=840, priority=1 actions=drop";
    assert!(matches!(
        Rule::from_dump_line(1, line),
        Err(ParseError::MissingField("cookie", _))
    ));
}

#[test]
fn invalid_port_is_an_error() {
    let line = DUMP_LINE.replace("in_port=\"s1-eth1\"", "in_port=\"bogus\"");
    assert!(matches!(
        Rule::from_dump_line(1, &line),
        Err(ParseError::InvalidPort(_))
    ));
}

#[test]
fn incomplete_stats_record_is_an_error() {
    let record = json!({"cookie": 5, "table_id": 1});
    assert!(matches!(
        Rule::from_stats_record(1, &record),
        Err(ParseError::MalformedRecord(_))
    ));
}

#[test]
fn dump_match_string() {
    let rule = Rule::from_dump_line(1, DUMP_LINE).unwrap();
    assert_eq!(
        rule.to_dump_match(),
        "cookie=0x5/-1,table=1,dl_dst=00:00:00:00:00:02,in_port=1"
    );
}

#[test]
fn stats_request_body() {
    let rule = Rule::from_dump_line(1, DUMP_LINE).unwrap();
    assert_eq!(
        serde_json::to_value(rule.to_stats_request()).unwrap(),
        json!({
            "cookie": 5,
            "cookie_mask": 0,
            "table_id": 1,
            "priority": 1,
            "match": {"in_port": 1, "dl_dst": "00:00:00:00:00:02"},
            "flags": 0,
        })
    );
}

#[test]
fn flow_line_filter() {
    assert!(is_flow_line(DUMP_LINE));
    assert!(!is_flow_line(""));
    assert!(!is_flow_line("   "));
    assert!(!is_flow_line("NXST_FLOW reply (xid=0x4):"));
    assert!(!is_flow_line(
        " cookie=0x0, table=0, n_packets=5, n_bytes=300, priority=65535,dl_dst=01:80:c2:00:00:0e,dl_type=0x88cc actions=CONTROLLER:65535"
    ));
}
