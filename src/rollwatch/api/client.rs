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

use super::platform::{Platform, PlatformError};
use super::resources::{reports_ready, Manifest, ResourceManager};
use crate::rollwatch::config::Config;
use crate::rollwatch::k8s::deployment::Deployment;
use crate::rollwatch::k8s::job::Job;
use crate::rollwatch::k8s::pod::{Pod, PodList};
use crate::rollwatch::k8s::selector::LabelSelector;
use crate::rollwatch::logger::{log_debug, log_info, log_warn};
use crate::rollwatch::util::poll::{poll_until, PollError, PollPolicy, Probe};
use reqwest::header::CONTENT_TYPE;
use reqwest::tls::Certificate;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

const COMPONENT: &str = "cluster-client";
const RETRY_ATTEMPTS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MERGE_PATCH: &str = "application/merge-patch+json";
const APPLY_PATCH: &str = "application/apply-patch+yaml";
const FIELD_MANAGER: &str = "rollwatch";

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_reqwest(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn next_backoff(current: Duration) -> Duration {
    current
        .checked_mul(2)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// Body of a Kubernetes `Status` failure response.
#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    message: String,
}

/// Any list response; only the number of items is read.
#[derive(Deserialize)]
struct ItemList {
    #[serde(default)]
    items: Vec<Value>,
}

/// Reads an optional credential file; a missing file means "not configured".
fn read_optional(path: &std::path::Path) -> Result<Option<Vec<u8>>, PlatformError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PlatformError::Config(format!(
            "failed to read '{}': {}",
            path.display(),
            err
        ))),
    }
}

/// Kubernetes API client implementing [`Platform`] and [`ResourceManager`].
pub struct ClusterClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    policy: PollPolicy,
    created: Mutex<Vec<Manifest>>,
}

impl ClusterClient {
    /// Builds a client from `ROLLWATCH_API_SERVER`, `ROLLWATCH_TOKEN_FILE` and
    /// `ROLLWATCH_CA_FILE`. Absent token or CA files are skipped.
    pub fn from_config() -> Result<Self, PlatformError> {
        let server = Config::ApiServer.get();
        let token = read_optional(&Config::TokenFile.get_path())?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|token| !token.is_empty());
        let ca = read_optional(&Config::CaFile.get_path())?;
        let policy = Config::poll_policy().map_err(|err| PlatformError::Config(err.to_string()))?;
        Ok(Self::new(&server, token, ca.as_deref())?.with_poll_policy(policy))
    }

    pub fn new(
        server: &str,
        token: Option<String>,
        ca_pem: Option<&[u8]>,
    ) -> Result<Self, PlatformError> {
        let base_url = Url::parse(server)
            .map_err(|err| PlatformError::Config(format!("invalid API server '{server}': {err}")))?;
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(pem) = ca_pem {
            let certificate = Certificate::from_pem(pem)
                .map_err(|err| PlatformError::Config(format!("invalid CA bundle: {err}")))?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|err| PlatformError::Config(format!("failed to construct HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url,
            token,
            policy: PollPolicy::default(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn with_poll_policy(self, policy: PollPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn url_from_segments<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, PlatformError> {
        let mut url = self.base_url.clone();
        {
            let mut parts = url.path_segments_mut().map_err(|_| {
                PlatformError::Config("API server URL cannot be a base for paths".to_string())
            })?;
            parts.clear();
            for segment in segments {
                let segment = segment.as_ref();
                if !segment.is_empty() {
                    parts.push(segment);
                }
            }
        }
        Ok(url)
    }

    fn pod_segments<'a>(namespace: &'a str, name: &'a str) -> [&'a str; 6] {
        ["api", "v1", "namespaces", namespace, "pods", name]
    }

    fn job_segments<'a>(namespace: &'a str, name: &'a str) -> [&'a str; 7] {
        ["apis", "batch", "v1", "namespaces", namespace, "jobs", name]
    }

    fn deployment_segments<'a>(namespace: &'a str, name: &'a str) -> [&'a str; 7] {
        ["apis", "apps", "v1", "namespaces", namespace, "deployments", name]
    }

    fn apply_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends the request built by `build`, retrying throttling, server errors
    /// and connection failures with capped exponential backoff.
    async fn execute<F>(&self, build: F) -> Result<Response, PlatformError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.apply_auth(build()).send().await {
                Ok(response)
                    if should_retry_status(response.status()) && attempt < RETRY_ATTEMPTS =>
                {
                    log_debug(
                        COMPONENT,
                        "Retrying request after server error",
                        &[
                            ("url", response.url().as_str()),
                            ("status", response.status().as_str()),
                        ],
                    );
                }
                Ok(response) => return Ok(response),
                Err(err) if is_retryable_reqwest(&err) && attempt < RETRY_ATTEMPTS => {
                    let error = err.to_string();
                    log_debug(
                        COMPONENT,
                        "Retrying request after transport error",
                        &[("error", error.as_str())],
                    );
                }
                Err(err) => return Err(err.into()),
            }
            sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    }

    async fn error_from(response: Response) -> PlatformError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StatusBody>(&text)
            .ok()
            .map(|body| body.message)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    text
                }
            });
        PlatformError::Http {
            status: status.as_u16(),
            message,
        }
    }

    async fn handle_json<T>(response: Response) -> Result<T, PlatformError>
    where
        T: DeserializeOwned,
    {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_optional<T>(&self, url: Url) -> Result<Option<T>, PlatformError>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(|| self.client.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::handle_json(response).await.map(Some)
    }

    async fn delete_optional(&self, url: Url) -> Result<bool, PlatformError> {
        let response = self
            .execute(|| {
                self.client
                    .delete(url.clone())
                    .query(&[("propagationPolicy", "Background")])
            })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Server-side apply of a full object document.
    async fn server_side_apply<T>(&self, url: Url, body: &Value) -> Result<T, PlatformError>
    where
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let response = self
            .execute(|| {
                self.client
                    .patch(url.clone())
                    .query(&[("fieldManager", FIELD_MANAGER), ("force", "true")])
                    .header(CONTENT_TYPE, APPLY_PATCH)
                    .body(payload.clone())
            })
            .await?;
        Self::handle_json(response).await
    }

    async fn wait_resource_ready(
        &self,
        manifest: &Manifest,
        timeout: Duration,
    ) -> Result<(), PlatformError> {
        let url = self.url_from_segments(manifest.object_segments()?.as_slice())?;
        let policy = self.policy.with_timeout(timeout);
        let url = &url;
        let result = poll_until(&policy, move || async move {
            let current: Option<Value> = self.get_optional(url.clone()).await?;
            Ok::<_, PlatformError>(match current {
                Some(value) if reports_ready(&value) => Probe::Ready(()),
                Some(_) => Probe::Pending("not ready"),
                None => Probe::Pending("absent"),
            })
        })
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(PollError::Probe(err)) => Err(err),
            Err(PollError::Timeout { last, elapsed, .. }) => Err(PlatformError::NotReady {
                resource: manifest.describe(),
                state: last.unwrap_or("unobserved").to_string(),
                waited: elapsed,
            }),
        }
    }
}

impl Platform for ClusterClient {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, PlatformError> {
        let url = self.url_from_segments(&["api", "v1", "namespaces", namespace, "pods"])?;
        let query = selector.to_query();
        let response = self
            .execute(|| {
                self.client
                    .get(url.clone())
                    .query(&[("labelSelector", query.as_str())])
            })
            .await?;
        let list: PodList = Self::handle_json(response).await?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, PlatformError> {
        let url = self.url_from_segments(&Self::pod_segments(namespace, name))?;
        self.get_optional(url).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let url = self.url_from_segments(&Self::pod_segments(namespace, name))?;
        self.delete_optional(url).await
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Pod, PlatformError> {
        let url = self.url_from_segments(&Self::pod_segments(namespace, name))?;
        let payload = serde_json::to_vec(&json!({"metadata": {"annotations": annotations}}))?;
        let response = self
            .execute(|| {
                self.client
                    .patch(url.clone())
                    .header(CONTENT_TYPE, MERGE_PATCH)
                    .body(payload.clone())
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PlatformError::not_found("Pod", name));
        }
        Self::handle_json(response).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, PlatformError> {
        let url = self.url_from_segments(&Self::job_segments(namespace, name))?;
        self.get_optional(url).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job, PlatformError> {
        let namespace = job
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| PlatformError::Invalid("job namespace is required".to_string()))?;
        let url = self.url_from_segments(&Self::job_segments(namespace, ""))?;
        let response = self
            .execute(|| self.client.post(url.clone()).json(job))
            .await?;
        let created: Job = Self::handle_json(response).await?;
        log_info(
            COMPONENT,
            "Created job",
            &[("namespace", namespace), ("job", created.metadata.name_or_unknown())],
        );
        Ok(created)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let url = self.url_from_segments(&Self::job_segments(namespace, name))?;
        self.delete_optional(url).await
    }

    async fn job_logs(&self, namespace: &str, name: &str) -> Result<String, PlatformError> {
        let selector = LabelSelector::from_pairs([("job-name", name)]);
        let mut pods = self.list_pods(namespace, &selector).await?;
        pods.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
        });
        let mut logs = String::new();
        for pod in &pods {
            let mut segments = Self::pod_segments(namespace, pod.name()).to_vec();
            segments.push("log");
            let url = self.url_from_segments(segments.as_slice())?;
            let response = self.execute(|| self.client.get(url.clone())).await?;
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            if !response.status().is_success() {
                return Err(Self::error_from(response).await);
            }
            logs.push_str(&response.text().await?);
            if !logs.ends_with('\n') {
                logs.push('\n');
            }
        }
        Ok(logs)
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, PlatformError> {
        let namespace = deployment.metadata.namespace.as_deref().ok_or_else(|| {
            PlatformError::Invalid("deployment namespace is required".to_string())
        })?;
        let url = self.url_from_segments(&Self::deployment_segments(namespace, deployment.name()))?;
        let mut body = serde_json::to_value(deployment)?;
        if let Some(object) = body.as_object_mut() {
            object.remove("status");
        }
        self.server_side_apply(url, &body).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        let url = self.url_from_segments(&Self::deployment_segments(namespace, name))?;
        self.get_optional(url).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let url = self.url_from_segments(&Self::deployment_segments(namespace, name))?;
        self.delete_optional(url).await
    }
}

impl ResourceManager for ClusterClient {
    async fn create(&self, manifest: &Manifest, timeout: Duration) -> Result<(), PlatformError> {
        let url = self.url_from_segments(manifest.object_segments()?.as_slice())?;
        let _: Value = self.server_side_apply(url, manifest.value()).await?;
        if let Ok(mut created) = self.created.lock() {
            created.push(manifest.clone());
        }
        let resource = manifest.describe();
        log_info(COMPONENT, "Created resource", &[("resource", resource.as_str())]);
        if manifest.awaits_ready() {
            self.wait_resource_ready(manifest, timeout).await?;
            log_info(COMPONENT, "Resource is ready", &[("resource", resource.as_str())]);
        }
        Ok(())
    }

    async fn wait_ready(&self, manifest: &Manifest, timeout: Duration) -> Result<(), PlatformError> {
        self.wait_resource_ready(manifest, timeout).await
    }

    async fn count_matching(
        &self,
        sample: &Manifest,
        selector: &LabelSelector,
    ) -> Result<usize, PlatformError> {
        let url = self.url_from_segments(sample.collection_segments()?.as_slice())?;
        let query = selector.to_query();
        let response = self
            .execute(|| {
                self.client
                    .get(url.clone())
                    .query(&[("labelSelector", query.as_str())])
            })
            .await?;
        let list: ItemList = Self::handle_json(response).await?;
        Ok(list.items.len())
    }

    async fn cleanup(&self) -> Result<usize, PlatformError> {
        let created: Vec<Manifest> = match self.created.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let mut deleted = 0;
        let mut first_error = None;
        for manifest in created.iter().rev() {
            let resource = manifest.describe();
            let result = match manifest.object_segments() {
                Ok(segments) => match self.url_from_segments(segments.as_slice()) {
                    Ok(url) => self.delete_optional(url).await,
                    Err(err) => Err(err),
                },
                Err(err) => Err(err),
            };
            match result {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    let error = err.to_string();
                    log_warn(
                        COMPONENT,
                        "Failed to delete resource",
                        &[("resource", resource.as_str()), ("error", error.as_str())],
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
