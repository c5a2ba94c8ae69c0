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

use super::rolling::RollObservation;
use super::selector::ReplicaGroupSelector;
use super::workload::WorkloadRole;
use crate::rollwatch::api::PlatformError;
use crate::rollwatch::k8s::job::JobPhase;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Failures surfaced by the verification engine. Every variant carries the
/// context observed when it was raised.
#[derive(Debug)]
pub enum VerificationError {
    /// The selector matched no pods at capture time.
    EmptySelection { selector: ReplicaGroupSelector },
    RollTimeout {
        selector: ReplicaGroupSelector,
        last_observed: Option<RollObservation>,
        waited: Duration,
    },
    ReadinessTimeout {
        selector: ReplicaGroupSelector,
        ready: usize,
        observed: usize,
        expected: usize,
        waited: Duration,
    },
    /// A snapshotted pod was gone or already replaced when annotated.
    StalePodReference { namespace: String, pod: String },
    AlreadyInstalled { namespace: String },
    ComponentNotReady {
        component: String,
        namespace: String,
        detail: String,
        waited: Duration,
    },
    JobNotRunning {
        identity: String,
        namespace: String,
        phase: Option<JobPhase>,
    },
    /// The client job terminated in failure.
    WorkloadFailed {
        identity: String,
        namespace: String,
        phase: JobPhase,
        failed_pods: i32,
    },
    /// The client job did not process the expected number of messages.
    WorkloadIncomplete {
        identity: String,
        namespace: String,
        expected: u64,
        observed: Option<u64>,
        phase: Option<JobPhase>,
    },
    /// A workload identity was started twice by the same tracker.
    WorkloadReused { identity: String },
    /// A job was handed to the start operation of the other role.
    WorkloadRoleMismatch {
        identity: String,
        expected: WorkloadRole,
        actual: WorkloadRole,
    },
    CheckFailed { check: String, detail: String },
    Platform(PlatformError),
}

impl VerificationError {
    /// Stable short name, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::EmptySelection { .. } => "EmptySelection",
            VerificationError::RollTimeout { .. } => "RollTimeout",
            VerificationError::ReadinessTimeout { .. } => "ReadinessTimeout",
            VerificationError::StalePodReference { .. } => "StalePodReference",
            VerificationError::AlreadyInstalled { .. } => "AlreadyInstalled",
            VerificationError::ComponentNotReady { .. } => "ComponentNotReady",
            VerificationError::JobNotRunning { .. } => "JobNotRunning",
            VerificationError::WorkloadFailed { .. } => "WorkloadFailed",
            VerificationError::WorkloadIncomplete { .. } => "WorkloadIncomplete",
            VerificationError::WorkloadReused { .. } => "WorkloadReused",
            VerificationError::WorkloadRoleMismatch { .. } => "WorkloadRoleMismatch",
            VerificationError::CheckFailed { .. } => "CheckFailed",
            VerificationError::Platform(_) => "Platform",
        }
    }

    /// Whether the failure points at the product under test rather than at
    /// the test infrastructure.
    pub fn is_product_defect(&self) -> bool {
        matches!(
            self,
            VerificationError::RollTimeout { .. }
                | VerificationError::WorkloadIncomplete { .. }
                | VerificationError::CheckFailed { .. }
        )
    }
}

fn phase_or_unknown(phase: &Option<JobPhase>) -> &'static str {
    phase.map(JobPhase::as_str).unwrap_or("Unknown")
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::EmptySelection { selector } => {
                write!(f, "selector {selector} matched no pods")
            }
            VerificationError::RollTimeout {
                selector,
                last_observed,
                waited,
            } => {
                write!(
                    f,
                    "{selector} did not finish rolling within {}",
                    humantime::format_duration(*waited)
                )?;
                match last_observed {
                    Some(observation) => write!(f, " (last observed: {observation})"),
                    None => f.write_str(" (never observed)"),
                }
            }
            VerificationError::ReadinessTimeout {
                selector,
                ready,
                observed,
                expected,
                waited,
            } => write!(
                f,
                "{selector} not ready within {}: {ready} ready of {observed} observed, expected {expected}",
                humantime::format_duration(*waited)
            ),
            VerificationError::StalePodReference { namespace, pod } => write!(
                f,
                "pod {namespace}/{pod} no longer matches the snapshot it was taken from"
            ),
            VerificationError::AlreadyInstalled { namespace } => write!(
                f,
                "an operator installation is already live in namespace {namespace}"
            ),
            VerificationError::ComponentNotReady {
                component,
                namespace,
                detail,
                waited,
            } => write!(
                f,
                "{namespace}/{component} not ready within {}: {detail}",
                humantime::format_duration(*waited)
            ),
            VerificationError::JobNotRunning {
                identity,
                namespace,
                phase,
            } => write!(
                f,
                "job {namespace}/{identity} is not running (phase {})",
                phase_or_unknown(phase)
            ),
            VerificationError::WorkloadFailed {
                identity,
                namespace,
                phase,
                failed_pods,
            } => write!(
                f,
                "workload {namespace}/{identity} failed (phase {phase}, failed pods {failed_pods})"
            ),
            VerificationError::WorkloadIncomplete {
                identity,
                namespace,
                expected,
                observed,
                phase,
            } => {
                write!(
                    f,
                    "workload {namespace}/{identity} expected {expected} messages, observed "
                )?;
                match observed {
                    Some(count) => write!(f, "{count}")?,
                    None => f.write_str("none")?,
                }
                write!(f, " (phase {})", phase_or_unknown(phase))
            }
            VerificationError::WorkloadReused { identity } => {
                write!(f, "workload identity {identity} was already used")
            }
            VerificationError::WorkloadRoleMismatch {
                identity,
                expected,
                actual,
            } => write!(f, "workload {identity} is a {actual}, not a {expected}"),
            VerificationError::CheckFailed { check, detail } => {
                write!(f, "check {check} failed: {detail}")
            }
            VerificationError::Platform(err) => write!(f, "platform error: {err}"),
        }
    }
}

impl Error for VerificationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            VerificationError::Platform(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PlatformError> for VerificationError {
    fn from(err: PlatformError) -> Self {
        VerificationError::Platform(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_and_failed_workloads_are_distinguished() {
        let incomplete = VerificationError::WorkloadIncomplete {
            identity: "producer-test-1".to_string(),
            namespace: "infra".to_string(),
            expected: 300,
            observed: Some(287),
            phase: Some(JobPhase::Succeeded),
        };
        let failed = VerificationError::WorkloadFailed {
            identity: "producer-test-1".to_string(),
            namespace: "infra".to_string(),
            phase: JobPhase::Failed,
            failed_pods: 1,
        };
        assert!(incomplete.is_product_defect());
        assert!(!failed.is_product_defect());
        assert_eq!(incomplete.kind(), "WorkloadIncomplete");
        assert_eq!(
            incomplete.to_string(),
            "workload infra/producer-test-1 expected 300 messages, observed 287 (phase Succeeded)"
        );
    }

    #[test]
    fn role_mismatch_is_a_caller_error() {
        let err = VerificationError::WorkloadRoleMismatch {
            identity: "p".to_string(),
            expected: WorkloadRole::Consumer,
            actual: WorkloadRole::Producer,
        };
        assert!(!err.is_product_defect());
        assert_eq!(err.kind(), "WorkloadRoleMismatch");
        assert_eq!(err.to_string(), "workload p is a producer, not a consumer");
    }

    #[test]
    fn platform_errors_keep_their_source() {
        let err = VerificationError::from(PlatformError::not_found("Pod", "c-kafka-0"));
        assert_eq!(err.kind(), "Platform");
        assert!(err.source().is_some());
    }
}
