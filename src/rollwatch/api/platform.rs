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

use crate::rollwatch::k8s::deployment::Deployment;
use crate::rollwatch::k8s::job::{Job, JobPhase};
use crate::rollwatch::k8s::pod::Pod;
use crate::rollwatch::k8s::selector::LabelSelector;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug)]
pub enum PlatformError {
    NotFound { kind: &'static str, name: String },
    Http { status: u16, message: String },
    Transport(reqwest::Error),
    Decode(serde_json::Error),
    Invalid(String),
    Config(String),
    /// A created resource did not report `Ready=True` in time.
    NotReady {
        resource: String,
        state: String,
        waited: Duration,
    },
}

impl PlatformError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        PlatformError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
            || matches!(self, PlatformError::Http { status: 404, .. })
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::NotFound { kind, name } => write!(f, "{kind} '{name}' not found"),
            PlatformError::Http { status, message } => {
                write!(f, "{} (status {})", message, status)
            }
            PlatformError::Transport(err) => write!(f, "transport error: {err}"),
            PlatformError::Decode(err) => write!(f, "failed to decode response: {err}"),
            PlatformError::Invalid(message) => write!(f, "invalid object: {message}"),
            PlatformError::Config(message) => write!(f, "client configuration: {message}"),
            PlatformError::NotReady {
                resource,
                state,
                waited,
            } => write!(
                f,
                "{resource} not ready after {} (last state: {state})",
                humantime::format_duration(*waited)
            ),
        }
    }
}

impl Error for PlatformError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PlatformError::Transport(err) => Some(err),
            PlatformError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Transport(err)
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Decode(err)
    }
}

/// Orchestration platform operations used by the verification engine. Each
/// call follows the platform's own read-after-write semantics.
///
/// Lookups of single objects return `Ok(None)` for absent objects; deletes
/// return whether anything was deleted.
pub trait Platform: Send + Sync {
    fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> impl Future<Output = Result<Vec<Pod>, PlatformError>> + Send;

    fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Pod>, PlatformError>> + Send;

    fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<bool, PlatformError>> + Send;

    /// Merges `annotations` into the pod's metadata. Fails with
    /// [`PlatformError::NotFound`] when the pod does not exist.
    fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Pod, PlatformError>> + Send;

    fn get_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Job>, PlatformError>> + Send;

    fn get_job_phase(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<JobPhase>, PlatformError>> + Send {
        async move { Ok(self.get_job(namespace, name).await?.map(|job| job.phase())) }
    }

    fn create_job(&self, job: &Job) -> impl Future<Output = Result<Job, PlatformError>> + Send;

    fn delete_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<bool, PlatformError>> + Send;

    /// Concatenated logs of the pods the job created.
    fn job_logs(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<String, PlatformError>> + Send;

    /// Creates the deployment, or replaces it when it already exists.
    fn apply_deployment(
        &self,
        deployment: &Deployment,
    ) -> impl Future<Output = Result<Deployment, PlatformError>> + Send;

    fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Deployment>, PlatformError>> + Send;

    fn delete_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<bool, PlatformError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_404_counts_as_not_found() {
        let err = PlatformError::Http {
            status: 404,
            message: "pods \"x\" not found".to_string(),
        };
        assert!(err.is_not_found());
        assert!(PlatformError::not_found("Pod", "x").is_not_found());
        assert!(!PlatformError::Invalid("x".to_string()).is_not_found());
        assert_eq!(
            PlatformError::not_found("Pod", "c-kafka-0").to_string(),
            "Pod 'c-kafka-0' not found"
        );
    }
}
