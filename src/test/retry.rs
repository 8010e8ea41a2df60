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

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use crate::retry::{RetryPolicy, Transient};

#[derive(Debug, PartialEq, Eq)]
struct Failure {
    transient: bool,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failure (transient: {})", self.transient)
    }
}

impl Transient for Failure {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

#[tokio::test]
async fn success_needs_one_attempt() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, Failure> = RetryPolicy::new(5)
        .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, Failure> = RetryPolicy::new(3)
        .run(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Failure { transient: true })
            } else {
                Ok(42)
            }
        })
        .await;
    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn attempts_are_bounded() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, Failure> = RetryPolicy::new(2)
        .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Failure { transient: true })
        })
        .await;
    assert_eq!(result, Err(Failure { transient: true }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_transient_failures_are_not_retried() {
    let calls = AtomicUsize::new(0);
    let result: Result<u64, Failure> = RetryPolicy::new(5)
        .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Failure { transient: false })
        })
        .await;
    assert_eq!(result, Err(Failure { transient: false }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic]
fn zero_tries_is_rejected() {
    let _ = RetryPolicy::new(0);
}
