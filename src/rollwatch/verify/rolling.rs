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

//! Roll detection.
//!
//! A roll of a replica group is complete when every pod recorded in the old
//! snapshot has been replaced (its name is gone or carries a new marker), the
//! group is back to exactly the expected number of pods, and every pod
//! reports ready without terminating. Zero pods and transient overlap both
//! count as in progress.

use super::error::VerificationError;
use super::selector::ReplicaGroupSelector;
use super::snapshot::PodSnapshot;
use crate::rollwatch::api::Platform;
use crate::rollwatch::k8s::pod::Pod;
use crate::rollwatch::logger::{log_debug, log_info};
use crate::rollwatch::util::poll::{poll_until, PollError, PollPolicy, Probe};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

const COMPONENT: &str = "rolling";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollState {
    NotStarted,
    InProgress,
    Complete,
}

impl RollState {
    pub fn as_str(self) -> &'static str {
        match self {
            RollState::NotStarted => "NOT_STARTED",
            RollState::InProgress => "IN_PROGRESS",
            RollState::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for RollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compares `old` with `current` for a group expected to hold `expected` pods.
pub fn detect(old: &PodSnapshot, current: &PodSnapshot, expected: usize) -> RollState {
    let changed = old.changed_in(current);
    if changed == 0 {
        RollState::NotStarted
    } else if changed == old.len() && current.len() == expected {
        RollState::Complete
    } else {
        RollState::InProgress
    }
}

/// What one poll of a group saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RollObservation {
    pub state: RollState,
    pub changed: usize,
    pub observed: usize,
    pub ready: usize,
    pub terminating: usize,
}

impl RollObservation {
    fn settled(&self) -> bool {
        self.state == RollState::Complete && self.ready == self.observed && self.terminating == 0
    }
}

impl fmt::Display for RollObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {} replaced, {} pods observed, {} ready, {} terminating",
            self.state, self.changed, self.observed, self.ready, self.terminating
        )
    }
}

/// Result of a completed roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollReport {
    pub snapshot: PodSnapshot,
    /// Distinct states in the order they were first seen.
    pub transitions: Vec<RollState>,
    pub polls: u32,
}

impl RollReport {
    /// True when the states seen never moved backwards.
    pub fn is_monotonic(&self) -> bool {
        self.transitions.windows(2).all(|pair| pair[0] < pair[1])
    }
}

fn ready_counts(pods: &[Pod]) -> (usize, usize) {
    let terminating = pods.iter().filter(|pod| pod.is_terminating()).count();
    let ready = pods
        .iter()
        .filter(|pod| pod.is_ready() && !pod.is_terminating())
        .count();
    (ready, terminating)
}

/// Polls replica groups until they have rolled or become ready.
pub struct RollingUpdateDetector<'a, P> {
    platform: &'a P,
    policy: PollPolicy,
}

impl<'a, P: Platform> RollingUpdateDetector<'a, P> {
    pub fn new(platform: &'a P, policy: PollPolicy) -> Self {
        Self { platform, policy }
    }

    /// Lists the group once and compares it against `old`.
    pub async fn observe(
        &self,
        selector: &ReplicaGroupSelector,
        old: &PodSnapshot,
        expected: usize,
    ) -> Result<(RollObservation, PodSnapshot), VerificationError> {
        let pods = self
            .platform
            .list_pods(selector.namespace(), selector.labels())
            .await?;
        let current = PodSnapshot::from_pods(selector.namespace(), &pods)?;
        let (ready, terminating) = ready_counts(&pods);
        let observation = RollObservation {
            state: detect(old, &current, expected),
            changed: old.changed_in(&current),
            observed: current.len(),
            ready,
            terminating,
        };
        Ok((observation, current))
    }

    /// Waits until every pod in `old` has been replaced and the group is
    /// back to `expected` ready pods.
    pub async fn wait_until_rolled(
        &self,
        selector: &ReplicaGroupSelector,
        expected: usize,
        old: &PodSnapshot,
        timeout: Duration,
    ) -> Result<RollReport, VerificationError> {
        let group = selector.to_string();
        let expected_str = expected.to_string();
        log_info(
            COMPONENT,
            "Waiting for replica group to roll",
            &[("group", group.as_str()), ("replicas", expected_str.as_str())],
        );

        let transitions: Mutex<Vec<RollState>> = Mutex::new(Vec::new());
        let polls: Mutex<u32> = Mutex::new(0);
        let policy = self.policy.with_timeout(timeout);
        let (transitions_ref, polls_ref, group_ref) = (&transitions, &polls, &group);

        let result = poll_until(&policy, move || async move {
            let (observation, current) = self.observe(selector, old, expected).await?;
            if let Ok(mut count) = polls_ref.lock() {
                *count += 1;
            }
            if let Ok(mut seen) = transitions_ref.lock() {
                if seen.last() != Some(&observation.state) {
                    seen.push(observation.state);
                    log_info(
                        COMPONENT,
                        "Roll state changed",
                        &[("group", group_ref.as_str()), ("state", observation.state.as_str())],
                    );
                }
            }
            if observation.settled() {
                return Ok(Probe::Ready(current));
            }
            if observation.state == RollState::Complete {
                let detail = observation.to_string();
                log_debug(
                    COMPONENT,
                    "Pods replaced but not yet ready",
                    &[("group", group_ref.as_str()), ("observation", detail.as_str())],
                );
            }
            Ok::<_, VerificationError>(Probe::Pending(observation))
        })
        .await;

        match result {
            Ok(snapshot) => {
                let transitions = transitions.into_inner().unwrap_or_default();
                let polls = polls.into_inner().unwrap_or_default();
                log_info(COMPONENT, "Replica group rolled", &[("group", group.as_str())]);
                Ok(RollReport {
                    snapshot,
                    transitions,
                    polls,
                })
            }
            Err(PollError::Probe(err)) => Err(err),
            Err(PollError::Timeout { last, elapsed, .. }) => Err(VerificationError::RollTimeout {
                selector: selector.clone(),
                last_observed: last,
                waited: elapsed,
            }),
        }
    }

    /// Waits until the group holds exactly `expected` non-terminating pods
    /// and all of them are ready. Markers are not compared.
    pub async fn wait_for_component_and_pods_ready(
        &self,
        selector: &ReplicaGroupSelector,
        expected: usize,
        timeout: Duration,
    ) -> Result<PodSnapshot, VerificationError> {
        let group = selector.to_string();
        log_info(
            COMPONENT,
            "Waiting for replica group readiness",
            &[("group", group.as_str())],
        );
        let policy = self.policy.with_timeout(timeout);
        let result = poll_until(&policy, move || async move {
            let pods = self
                .platform
                .list_pods(selector.namespace(), selector.labels())
                .await?;
            let active: Vec<&Pod> = pods.iter().filter(|pod| !pod.is_terminating()).collect();
            let ready = active.iter().filter(|pod| pod.is_ready()).count();
            if active.len() == expected && ready == expected {
                let snapshot = PodSnapshot::from_pods(selector.namespace(), active)?;
                return Ok(Probe::Ready(snapshot));
            }
            Ok::<_, VerificationError>(Probe::Pending((ready, pods.len())))
        })
        .await;

        match result {
            Ok(snapshot) => {
                log_info(COMPONENT, "Replica group ready", &[("group", group.as_str())]);
                Ok(snapshot)
            }
            Err(PollError::Probe(err)) => Err(err),
            Err(PollError::Timeout { last, elapsed, .. }) => {
                let (ready, observed) = last.unwrap_or((0, 0));
                Err(VerificationError::ReadinessTimeout {
                    selector: selector.clone(),
                    ready,
                    observed,
                    expected,
                    waited: elapsed,
                })
            }
        }
    }
}
