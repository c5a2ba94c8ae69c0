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

use super::error::VerificationError;
use super::templates::ClientTemplate;
use crate::rollwatch::api::{Platform, PlatformError};
use crate::rollwatch::k8s::job::JobPhase;
use crate::rollwatch::logger::{log_info, log_warn};
use crate::rollwatch::util::poll::{poll_until, PollError, PollPolicy, Probe};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

const COMPONENT: &str = "workload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadRole {
    Producer,
    Consumer,
}

impl fmt::Display for WorkloadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadRole::Producer => f.write_str("producer"),
            WorkloadRole::Consumer => f.write_str("consumer"),
        }
    }
}

/// One client job. Created, observed running, observed terminal, then
/// discarded; an identity is never started twice by the same tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadJob {
    pub role: WorkloadRole,
    pub identity: String,
    pub topic: String,
    pub message_count: u64,
    pub namespace: String,
    pub bootstrap: String,
    pub delay: Duration,
}

impl WorkloadJob {
    /// Producer and consumer sharing one topic and message count.
    pub fn pair(
        producer: &str,
        consumer: &str,
        namespace: &str,
        topic: &str,
        bootstrap: &str,
        message_count: u64,
        delay: Duration,
    ) -> (WorkloadJob, WorkloadJob) {
        let producer = WorkloadJob {
            role: WorkloadRole::Producer,
            identity: producer.to_string(),
            topic: topic.to_string(),
            message_count,
            namespace: namespace.to_string(),
            bootstrap: bootstrap.to_string(),
            delay,
        };
        let consumer = WorkloadJob {
            role: WorkloadRole::Consumer,
            identity: consumer.to_string(),
            ..producer.clone()
        };
        (producer, consumer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadResult {
    pub identity: String,
    pub role: WorkloadRole,
    pub messages: u64,
    pub phase: JobPhase,
}

/// Default bound for a client sending or receiving `count` messages with
/// `delay` between them: one second of slack per message plus two minutes.
pub fn client_timeout(count: u64, delay: Duration) -> Duration {
    let per_message = delay + Duration::from_secs(1);
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    per_message
        .saturating_mul(count)
        .saturating_add(Duration::from_secs(120))
}

type JobKey = (String, String);

fn key(namespace: &str, identity: &str) -> JobKey {
    (namespace.to_string(), identity.to_string())
}

/// Submits client jobs and tracks them to completion.
pub struct WorkloadCompletionTracker<'a, P, C> {
    platform: &'a P,
    clients: &'a C,
    policy: PollPolicy,
    active: BTreeMap<JobKey, WorkloadJob>,
    retired: BTreeSet<JobKey>,
}

impl<'a, P: Platform, C: ClientTemplate> WorkloadCompletionTracker<'a, P, C> {
    pub fn new(platform: &'a P, clients: &'a C, policy: PollPolicy) -> Self {
        Self {
            platform,
            clients,
            policy,
            active: BTreeMap::new(),
            retired: BTreeSet::new(),
        }
    }

    pub async fn start_producer(&mut self, job: WorkloadJob) -> Result<(), VerificationError> {
        self.start(WorkloadRole::Producer, job).await
    }

    pub async fn start_consumer(&mut self, job: WorkloadJob) -> Result<(), VerificationError> {
        self.start(WorkloadRole::Consumer, job).await
    }

    async fn start(&mut self, role: WorkloadRole, job: WorkloadJob) -> Result<(), VerificationError> {
        if job.role != role {
            return Err(VerificationError::WorkloadRoleMismatch {
                identity: job.identity,
                expected: role,
                actual: job.role,
            });
        }
        let job_key = key(&job.namespace, &job.identity);
        if self.active.contains_key(&job_key) || self.retired.contains(&job_key) {
            return Err(VerificationError::WorkloadReused {
                identity: job.identity,
            });
        }
        self.platform.create_job(&self.clients.job(&job)).await?;
        let count = job.message_count.to_string();
        let role_name = role.to_string();
        log_info(
            COMPONENT,
            "Started client workload",
            &[
                ("namespace", job.namespace.as_str()),
                ("job", job.identity.as_str()),
                ("role", role_name.as_str()),
                ("messages", count.as_str()),
            ],
        );
        self.active.insert(job_key, job);
        Ok(())
    }

    /// Identities of jobs started and not yet discarded.
    pub fn active(&self) -> impl Iterator<Item = &WorkloadJob> {
        self.active.values()
    }

    /// Waits until the job exists and has begun executing. A job that has
    /// already succeeded also counts as started.
    pub async fn wait_running(
        &self,
        identity: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<JobPhase, VerificationError> {
        let policy = self.policy.with_timeout(timeout);
        let result = poll_until(&policy, move || async move {
            match self.platform.get_job_phase(namespace, identity).await? {
                Some(phase @ (JobPhase::Running | JobPhase::Succeeded)) => Ok(Probe::Ready(phase)),
                Some(JobPhase::Failed) => Err(VerificationError::JobNotRunning {
                    identity: identity.to_string(),
                    namespace: namespace.to_string(),
                    phase: Some(JobPhase::Failed),
                }),
                phase => Ok(Probe::Pending(phase)),
            }
        })
        .await;

        match result {
            Ok(phase) => {
                log_info(
                    COMPONENT,
                    "Client workload is running",
                    &[("namespace", namespace), ("job", identity)],
                );
                Ok(phase)
            }
            Err(PollError::Probe(err)) => Err(err),
            Err(PollError::Timeout { last, .. }) => Err(VerificationError::JobNotRunning {
                identity: identity.to_string(),
                namespace: namespace.to_string(),
                phase: last.flatten(),
            }),
        }
    }

    /// Waits for the job to terminate and checks that its logs report
    /// exactly `expected_count` processed messages.
    pub async fn wait_success(
        &self,
        identity: &str,
        namespace: &str,
        expected_count: u64,
        timeout: Duration,
    ) -> Result<WorkloadResult, VerificationError> {
        let role = self
            .active
            .get(&key(namespace, identity))
            .map(|job| job.role)
            .ok_or_else(|| {
                PlatformError::Invalid(format!(
                    "workload {namespace}/{identity} was not started by this tracker"
                ))
            })?;
        let policy = self.policy.with_timeout(timeout);
        let result = poll_until(&policy, move || async move {
            let Some(job) = self.platform.get_job(namespace, identity).await? else {
                return Ok(Probe::Pending(None));
            };
            match job.phase() {
                JobPhase::Failed => Err(VerificationError::WorkloadFailed {
                    identity: identity.to_string(),
                    namespace: namespace.to_string(),
                    phase: JobPhase::Failed,
                    failed_pods: job.failed_pods(),
                }),
                JobPhase::Succeeded => {
                    let observed = self.count(role, namespace, identity).await?;
                    if observed == expected_count {
                        Ok(Probe::Ready(WorkloadResult {
                            identity: identity.to_string(),
                            role,
                            messages: observed,
                            phase: JobPhase::Succeeded,
                        }))
                    } else {
                        Err(VerificationError::WorkloadIncomplete {
                            identity: identity.to_string(),
                            namespace: namespace.to_string(),
                            expected: expected_count,
                            observed: Some(observed),
                            phase: Some(JobPhase::Succeeded),
                        })
                    }
                }
                phase => Ok(Probe::Pending(Some(phase))),
            }
        })
        .await;

        match result {
            Ok(done) => {
                let messages = done.messages.to_string();
                log_info(
                    COMPONENT,
                    "Client workload finished",
                    &[
                        ("namespace", namespace),
                        ("job", identity),
                        ("messages", messages.as_str()),
                    ],
                );
                Ok(done)
            }
            Err(PollError::Probe(err)) => Err(err),
            Err(PollError::Timeout { last, .. }) => {
                let observed = self.count(role, namespace, identity).await.ok();
                Err(VerificationError::WorkloadIncomplete {
                    identity: identity.to_string(),
                    namespace: namespace.to_string(),
                    expected: expected_count,
                    observed,
                    phase: last.flatten(),
                })
            }
        }
    }

    async fn count(
        &self,
        role: WorkloadRole,
        namespace: &str,
        identity: &str,
    ) -> Result<u64, VerificationError> {
        let logs = self.platform.job_logs(namespace, identity).await?;
        Ok(self.clients.count_messages(role, &logs))
    }

    /// Deletes the job and retires its identity.
    pub async fn discard(&mut self, identity: &str, namespace: &str) -> Result<bool, VerificationError> {
        let job_key = key(namespace, identity);
        self.active.remove(&job_key);
        self.retired.insert(job_key);
        Ok(self.platform.delete_job(namespace, identity).await?)
    }

    /// Discards every active job, continuing past failures. Returns the
    /// first failure, if any.
    pub async fn discard_all(&mut self) -> Result<usize, VerificationError> {
        let keys: Vec<JobKey> = self.active.keys().cloned().collect();
        let mut deleted = 0;
        let mut first_error = None;
        for (namespace, identity) in keys {
            match self.discard(&identity, &namespace).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    let error = err.to_string();
                    log_warn(
                        COMPONENT,
                        "Failed to delete client workload",
                        &[
                            ("namespace", namespace.as_str()),
                            ("job", identity.as_str()),
                            ("error", error.as_str()),
                        ],
                    );
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_timeout_scales_with_count_and_delay() {
        assert_eq!(
            client_timeout(300, Duration::from_millis(500)),
            Duration::from_secs(450 + 120)
        );
        assert_eq!(client_timeout(0, Duration::ZERO), Duration::from_secs(120));
    }

    #[test]
    fn pair_shares_topic_and_count() {
        let (producer, consumer) = WorkloadJob::pair(
            "producer-test-1",
            "consumer-test-1",
            "infra",
            "my-topic",
            "c-kafka-bootstrap:9092",
            300,
            Duration::from_millis(500),
        );
        assert_eq!(producer.role, WorkloadRole::Producer);
        assert_eq!(consumer.role, WorkloadRole::Consumer);
        assert_eq!(consumer.identity, "consumer-test-1");
        assert_eq!(consumer.topic, producer.topic);
        assert_eq!(consumer.message_count, 300);
    }
}
