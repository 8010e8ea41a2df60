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

//! Bounded re-execution of fallible operations on transient failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Failure kinds that may resolve on their own (e.g., a counter snapshot racing a controller
/// update). Only errors reporting themselves as transient are retried; everything else
/// propagates immediately.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Bounded retry of an async operation.
///
/// An operation is invoked at most `tries` times in total. Between two attempts, the policy
/// sleeps for the base delay plus a uniformly random jitter, so that parallel drivers do not
/// re-query the same switch in lockstep. On exhaustion, the last failure is returned unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    tries: usize,
    delay: Duration,
    jitter: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with the given maximum number of invocations (at least 1), no delay and
    /// no jitter.
    pub fn new(tries: usize) -> Self {
        assert!(tries >= 1, "a retry policy must allow at least one attempt");
        Self {
            tries,
            delay: Duration::ZERO,
            jitter: None,
        }
    }

    /// Set the base delay between two attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a random jitter window to the inter-attempt delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Maximum number of invocations.
    pub fn tries(&self) -> usize {
        self.tries
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the attempt bound is
    /// reached.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(x) => return Ok(x),
                Err(e) if e.is_transient() && attempt < self.tries => {
                    log::debug!("Attempt {attempt}/{} failed: {e}", self.tries);
                    let wait = self.delay + self.sample_jitter();
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn sample_jitter(&self) -> Duration {
        match self.jitter {
            Some(j) if !j.is_zero() => {
                Duration::from_nanos(rand::thread_rng().gen_range(0..j.as_nanos() as u64))
            }
            _ => Duration::ZERO,
        }
    }
}
