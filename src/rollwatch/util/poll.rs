/*
 * Copyright (C) 2024 The Rollwatch Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Bounded retry loop shared by every wait in rollwatch.
//!
//! A probe is awaited repeatedly until it reports [`Probe::Ready`], fails, or
//! the policy's timeout elapses. Nothing is spawned: the loop lives inside the
//! returned future, so dropping that future cancels polling outright.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Interval, jitter and overall bound for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub jitter: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_JITTER: Duration = Duration::from_millis(250);

    pub fn new(interval: Duration, jitter: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            jitter,
            timeout,
        }
    }

    /// Same cadence, different bound.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let max = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=max);
        self.interval + Duration::from_millis(extra)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_INTERVAL,
            Self::DEFAULT_JITTER,
            Duration::from_secs(300),
        )
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T, S> {
    Ready(T),
    Pending(S),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError<S, E> {
    /// The bound elapsed. `last` is the most recent pending observation, if
    /// any probe completed at all.
    Timeout {
        last: Option<S>,
        attempts: u32,
        elapsed: Duration,
    },
    /// A probe failed; polling stops at the first failure.
    Probe(E),
}

impl<S, E: fmt::Display> fmt::Display for PollError<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Timeout {
                attempts, elapsed, ..
            } => write!(
                f,
                "timed out after {} ({} attempts)",
                humantime::format_duration(*elapsed),
                attempts
            ),
            PollError::Probe(error) => write!(f, "probe failed: {error}"),
        }
    }
}

/// Awaits `probe` until it is ready or `policy.timeout` elapses.
///
/// The first probe runs immediately. A probe still in flight when the bound
/// is reached is dropped and counts as a timeout.
pub async fn poll_until<T, S, E, F, Fut>(
    policy: &PollPolicy,
    mut probe: F,
) -> Result<T, PollError<S, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T, S>, E>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts = 0u32;
    let mut last = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() && attempts > 0 {
            break;
        }
        attempts += 1;
        match time::timeout(remaining, probe()).await {
            Ok(Ok(Probe::Ready(value))) => return Ok(value),
            Ok(Ok(Probe::Pending(state))) => last = Some(state),
            Ok(Err(error)) => return Err(PollError::Probe(error)),
            Err(_) => break,
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        time::sleep(policy.next_delay().min(remaining)).await;
    }

    Err(PollError::Timeout {
        last,
        attempts,
        elapsed: started.elapsed(),
    })
}
