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

use super::pod::{ObjectMeta, PodTemplateSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Condition describing Job lifecycle state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
}

/// Batch Job resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default = "Job::default_api_version")]
    pub api_version: String,
    #[serde(default = "Job::default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl Job {
    pub fn new(metadata: ObjectMeta, spec: JobSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    fn default_api_version() -> String {
        "batch/v1".to_string()
    }

    fn default_kind() -> String {
        "Job".to_string()
    }

    /// Collapses the Job status into a single execution phase.
    pub fn phase(&self) -> JobPhase {
        let Some(status) = self.status.as_ref() else {
            return JobPhase::Pending;
        };
        let condition = |kind: &str| {
            status
                .conditions
                .iter()
                .any(|c| c.condition_type == kind && c.status == "True")
        };
        if condition("Failed") {
            JobPhase::Failed
        } else if condition("Complete") || condition("SuccessCriteriaMet") {
            JobPhase::Succeeded
        } else if status.active.unwrap_or(0) > 0 {
            JobPhase::Running
        } else if status.succeeded.unwrap_or(0) > 0 && status.failed.unwrap_or(0) == 0 {
            JobPhase::Succeeded
        } else {
            JobPhase::Pending
        }
    }

    pub fn failed_pods(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|status| status.failed)
            .unwrap_or(0)
    }
}

/// Execution phase of a Job as observed by rollwatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobPhase::Pending => "Pending",
            JobPhase::Running => "Running",
            JobPhase::Succeeded => "Succeeded",
            JobPhase::Failed => "Failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }
}

impl Display for JobPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(status: JobStatus) -> Job {
        let mut job = Job::new(ObjectMeta::named("producer", "ns"), JobSpec::default());
        job.status = Some(status);
        job
    }

    fn condition(kind: &str) -> JobCondition {
        JobCondition {
            condition_type: kind.to_string(),
            status: "True".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn phase_prefers_terminal_conditions() {
        let job = Job::new(ObjectMeta::named("producer", "ns"), JobSpec::default());
        assert_eq!(job.phase(), JobPhase::Pending);

        let running = job_with(JobStatus {
            active: Some(1),
            ..Default::default()
        });
        assert_eq!(running.phase(), JobPhase::Running);

        let failed = job_with(JobStatus {
            active: Some(1),
            failed: Some(2),
            conditions: vec![condition("Failed")],
            ..Default::default()
        });
        assert_eq!(failed.phase(), JobPhase::Failed);
        assert_eq!(failed.failed_pods(), 2);

        let complete = job_with(JobStatus {
            succeeded: Some(1),
            conditions: vec![condition("Complete")],
            ..Default::default()
        });
        assert_eq!(complete.phase(), JobPhase::Succeeded);
        assert!(complete.phase().is_terminal());
    }
}
