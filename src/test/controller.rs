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
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::controller::{parse_stats_response, StatsClient};
use crate::query::{QueryError, RuleSource};
use crate::rule::{MatchValue, Rule};

fn payload(dpid: u64, entries: serde_json::Value) -> String {
    json!({ (dpid.to_string()): entries }).to_string()
}

fn entry(packets: u64) -> serde_json::Value {
    json!({
        "cookie": 5,
        "table_id": 0,
        "priority": 1,
        "packet_count": packets,
        "byte_count": 84 * packets,
        "match": {"in_port": 1},
        "actions": ["OUTPUT:2"],
    })
}

fn wanted() -> Rule {
    Rule {
        dpid: 1,
        cookie: 5,
        table_id: 0,
        priority: 1,
        fields: btreemap! {"in_port".to_string() => MatchValue::Int(1)},
        packet_count: 0,
        byte_count: 0,
        actions: String::new(),
    }
}

#[test]
fn parse_single_entry() {
    let rules = parse_stats_response(1, &payload(1, json!([entry(10)]))).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0], wanted());
    assert_eq!(rules[0].packet_count, 10);
}

#[test]
fn parse_empty_entry_list() {
    let rules = parse_stats_response(1, &payload(1, json!([]))).unwrap();
    assert!(rules.is_empty());
}

#[test]
fn response_for_another_datapath_is_rejected() {
    let err = parse_stats_response(1, &payload(2, json!([entry(10)]))).unwrap_err();
    assert!(matches!(
        err,
        QueryError::WrongDatapath {
            requested: 1,
            returned: 2
        }
    ));
}

#[test]
fn malformed_responses_are_rejected() {
    for payload in [
        "not json",
        "[]",
        "{}",
        r#"{"1": [], "2": []}"#,
        r#"{"one": []}"#,
        r#"{"1": 42}"#,
    ] {
        assert!(matches!(
            parse_stats_response(1, payload),
            Err(QueryError::MalformedResponse(_))
        ));
    }
}

/// Serve exactly one canned HTTP response on an ephemeral local port.
async fn one_shot_server(status_line: &str, body: String) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = sock.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(request.starts_with("POST /stats/flow/1 HTTP/1.1\r\n"));
        sock.write_all(response.as_bytes()).await.unwrap();
        sock.shutdown().await.unwrap();
    });
    port
}

#[tokio::test]
async fn get_over_http() {
    let port = one_shot_server("200 OK", payload(1, json!([entry(10)]))).await;
    let client = StatsClient::new("127.0.0.1", port);
    let got = client.get(&wanted()).await.unwrap();
    assert_eq!(got, wanted());
    assert_eq!(got.packet_count, 10);
}

#[tokio::test]
async fn http_error_status_fails_the_request() {
    let port = one_shot_server("500 Internal Server Error", String::new()).await;
    let client = StatsClient::new("127.0.0.1", port);
    let err = client.get(&wanted()).await.unwrap_err();
    assert!(matches!(err, QueryError::RequestFailed(500)));
}

#[tokio::test]
async fn empty_result_is_no_result() {
    let port = one_shot_server("200 OK", payload(1, json!([]))).await;
    let client = StatsClient::new("127.0.0.1", port);
    let err = client.get(&wanted()).await.unwrap_err();
    assert!(matches!(err, QueryError::NoResult));
}

#[tokio::test]
async fn multiple_results_are_ambiguous() {
    let port = one_shot_server("200 OK", payload(1, json!([entry(10), entry(11)]))).await;
    let client = StatsClient::new("127.0.0.1", port);
    let err = client.get(&wanted()).await.unwrap_err();
    assert!(matches!(err, QueryError::Ambiguous(2)));
}
