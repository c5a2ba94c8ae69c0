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

//! In-memory cluster used by unit and integration tests.
//!
//! [`FakeCluster`] implements [`Platform`] and [`ResourceManager`] and plays
//! the part of the reconciler: replica groups registered through a `Kafka`
//! manifest (or [`FakeCluster::add_group`]) are kept at their replica count,
//! deleted pods come back under a new UID, and pods annotated for a manual
//! roll are replaced one at a time. Created resources report ready unless
//! held back by name. Time advances one tick per `list_pods`
//! call; jobs advance one step per `get_job` call.

use crate::rollwatch::api::{Manifest, Platform, PlatformError, ResourceManager};
use crate::rollwatch::k8s::deployment::{Deployment, DeploymentStatus};
use crate::rollwatch::k8s::job::{Job, JobCondition, JobStatus};
use crate::rollwatch::k8s::pod::{
    ContainerPort, ContainerSpec, ObjectMeta, Pod, PodCondition, PodSpec, PodStatus,
};
use crate::rollwatch::k8s::selector::LabelSelector;
use crate::rollwatch::verify::features::{
    FeatureGateExpression, CONTROL_PLANE_LISTENER, FEATURE_GATES_ENV,
};
use crate::rollwatch::verify::selector::{ReplicaGroupSelector, ReplicaRole};
use crate::rollwatch::verify::templates::{control_plane_port, ExampleClients, PLAIN_PORT};
use crate::rollwatch::verify::MANUAL_ROLL_ANNOTATION;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Ticks a deleted pod stays visible as terminating.
const TERMINATING_TICKS: u32 = 1;
/// Ticks a new pod spends unready.
const STARTING_TICKS: u32 = 2;
/// `get_job` calls a job reports as running before it terminates.
const JOB_RUN_POLLS: u32 = 3;

/// Builds a running pod carrying `labels` with one container.
pub fn make_pod(namespace: &str, name: &str, uid: &str, labels: &LabelSelector, ready: bool) -> Pod {
    let mut pod = Pod::new(
        ObjectMeta {
            uid: Some(uid.to_string()),
            labels: labels.match_labels.clone(),
            ..ObjectMeta::named(name, namespace)
        },
        PodSpec {
            containers: vec![ContainerSpec {
                name: "main".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    set_ready(&mut pod, ready);
    pod
}

fn set_ready(pod: &mut Pod, ready: bool) {
    pod.status = Some(PodStatus {
        phase: Some(if ready { "Running" } else { "Pending" }.to_string()),
        conditions: vec![PodCondition::ready(ready)],
        ..Default::default()
    });
}

/// How a client job created in the fake terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Processes the requested `MESSAGE_COUNT`.
    Succeed,
    /// Succeeds after processing this many messages.
    SucceedWith(u64),
    Fail,
    /// Never leaves `Pending`.
    Stuck,
    /// Runs forever.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Starting(u32),
    Terminating(u32),
}

struct SimPod {
    pod: Pod,
    lifecycle: Lifecycle,
}

#[derive(Clone)]
struct SimGroup {
    selector: ReplicaGroupSelector,
    replicas: usize,
}

impl SimGroup {
    fn pod_names(&self) -> Vec<String> {
        let prefix = self.selector.component_name();
        (0..self.replicas).map(|i| format!("{prefix}-{i}")).collect()
    }
}

struct SimJob {
    job: Job,
    polls: u32,
    outcome: JobOutcome,
}

struct PodScript {
    namespace: String,
    selector: LabelSelector,
    frames: VecDeque<Vec<Pod>>,
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct FakeState {
    pods: BTreeMap<Key, SimPod>,
    groups: Vec<SimGroup>,
    scripts: Vec<PodScript>,
    deployments: BTreeMap<Key, Deployment>,
    deployments_unready: bool,
    jobs: BTreeMap<Key, SimJob>,
    outcomes: BTreeMap<String, JobOutcome>,
    created: Vec<Manifest>,
    unready: BTreeSet<String>,
    dropped: BTreeSet<String>,
    patches: Vec<Key>,
    deleted_pods: Vec<Key>,
    next_uid: u64,
}

impl FakeState {
    fn uid(&mut self, prefix: &str) -> String {
        self.next_uid += 1;
        format!("{prefix}-{:04}", self.next_uid)
    }

    fn reconciling(&self) -> bool {
        !self.deployments.is_empty()
    }

    fn control_plane_listener(&self) -> bool {
        self.deployments
            .values()
            .filter_map(|deployment| deployment.spec.template.spec.containers.first())
            .filter_map(|container| container.env_value(FEATURE_GATES_ENV))
            .filter_map(|gates| FeatureGateExpression::parse(gates).ok())
            .all(|gates| gates.is_enabled(CONTROL_PLANE_LISTENER, true))
    }

    fn tick(&mut self) {
        let mut gone = Vec::new();
        for (pod_key, sim) in self.pods.iter_mut() {
            match sim.lifecycle {
                Lifecycle::Running => {}
                Lifecycle::Terminating(n) if n <= 1 => gone.push(pod_key.clone()),
                Lifecycle::Terminating(n) => sim.lifecycle = Lifecycle::Terminating(n - 1),
                Lifecycle::Starting(n) if n <= 1 => {
                    sim.lifecycle = Lifecycle::Running;
                    set_ready(&mut sim.pod, true);
                }
                Lifecycle::Starting(n) => sim.lifecycle = Lifecycle::Starting(n - 1),
            }
        }
        for pod_key in gone {
            self.pods.remove(&pod_key);
        }
        if !self.reconciling() {
            return;
        }
        for group in self.groups.clone() {
            self.reconcile(&group);
        }
    }

    fn reconcile(&mut self, group: &SimGroup) {
        let namespace = group.selector.namespace().to_string();
        let names = group.pod_names();
        for name in &names {
            if !self.pods.contains_key(&key(&namespace, name)) {
                self.spawn(group, name);
            }
        }

        let settled = names.iter().all(|name| {
            self.pods
                .get(&key(&namespace, name))
                .is_some_and(|sim| sim.lifecycle == Lifecycle::Running)
        });
        if !settled {
            return;
        }
        let next = names.iter().find(|name| {
            self.pods
                .get(&key(&namespace, name))
                .is_some_and(|sim| sim.pod.annotation(MANUAL_ROLL_ANNOTATION) == Some("true"))
        });
        if let Some(name) = next.cloned() {
            self.terminate(&key(&namespace, &name));
        }
    }

    fn spawn(&mut self, group: &SimGroup, name: &str) {
        let uid = self.uid(name);
        let mut pod = make_pod(
            group.selector.namespace(),
            name,
            &uid,
            group.selector.labels(),
            false,
        );
        let ports = match group.selector.role() {
            ReplicaRole::Broker => {
                let mut ports = vec![ContainerPort::tcp(PLAIN_PORT, "tcp-clients")];
                if self.control_plane_listener() {
                    ports.push(control_plane_port());
                }
                ports
            }
            ReplicaRole::Coordinator => vec![ContainerPort::tcp(2181, "tcp-clients")],
        };
        pod.spec.containers = vec![ContainerSpec {
            name: group.selector.role().component().to_string(),
            ports,
            ..Default::default()
        }];
        pod.metadata.creation_timestamp = Some(Utc::now().to_rfc3339());
        self.pods.insert(
            key(group.selector.namespace(), name),
            SimPod {
                pod,
                lifecycle: Lifecycle::Starting(STARTING_TICKS),
            },
        );
    }

    fn terminate(&mut self, pod_key: &Key) -> bool {
        let Some(sim) = self.pods.get_mut(pod_key) else {
            return false;
        };
        if !matches!(sim.lifecycle, Lifecycle::Terminating(_)) {
            sim.lifecycle = Lifecycle::Terminating(TERMINATING_TICKS);
            sim.pod.metadata.deletion_timestamp = Some(Utc::now().to_rfc3339());
        }
        true
    }

    fn remove_matching(&mut self, namespace: &str, selector: &LabelSelector) {
        if selector.match_labels.is_empty() {
            return;
        }
        self.pods.retain(|(ns, _), sim| {
            ns != namespace || !selector.matches(&sim.pod.metadata.labels)
        });
    }

    fn register(&mut self, manifest: &Manifest) -> Result<(), PlatformError> {
        if manifest.kind()? != "Kafka" {
            return Ok(());
        }
        let namespace = manifest.namespace()?.to_string();
        let cluster = manifest.name()?.to_string();
        let value = manifest.value();
        for (role, pointer) in [
            (ReplicaRole::Coordinator, "/spec/zookeeper/replicas"),
            (ReplicaRole::Broker, "/spec/kafka/replicas"),
        ] {
            let replicas = value.pointer(pointer).and_then(|v| v.as_u64()).unwrap_or(0);
            if replicas > 0 {
                self.groups.push(SimGroup {
                    selector: ReplicaGroupSelector::new(&namespace, &cluster, role),
                    replicas: replicas as usize,
                });
            }
        }
        Ok(())
    }

    fn unregister(&mut self, manifest: &Manifest) {
        let (Ok(namespace), Ok(cluster)) = (manifest.namespace(), manifest.name()) else {
            return;
        };
        let (namespace, cluster) = (namespace.to_string(), cluster.to_string());
        let removed: Vec<SimGroup> = self
            .groups
            .iter()
            .filter(|group| {
                group.selector.namespace() == namespace && group.selector.cluster() == cluster
            })
            .cloned()
            .collect();
        self.groups.retain(|group| {
            group.selector.namespace() != namespace || group.selector.cluster() != cluster
        });
        for group in removed {
            self.remove_matching(&namespace, group.selector.labels());
        }
    }
}

fn manifest_labels(manifest: &Manifest) -> BTreeMap<String, String> {
    manifest
        .value()
        .pointer("/metadata/labels")
        .and_then(|labels| labels.as_object())
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn same_collection(a: &Manifest, b: &Manifest) -> bool {
    a.kind().ok() == b.kind().ok()
        && a.namespace().ok() == b.namespace().ok()
        && a.group_version().ok() == b.group_version().ok()
}

fn job_status(outcome: JobOutcome, polls: u32) -> JobStatus {
    let condition = |kind: &str| JobCondition {
        condition_type: kind.to_string(),
        status: "True".to_string(),
        ..Default::default()
    };
    match outcome {
        JobOutcome::Stuck => JobStatus::default(),
        JobOutcome::Hang => JobStatus {
            active: Some(1),
            ..Default::default()
        },
        _ if polls <= JOB_RUN_POLLS => JobStatus {
            active: Some(1),
            ..Default::default()
        },
        JobOutcome::Fail => JobStatus {
            failed: Some(1),
            conditions: vec![condition("Failed")],
            ..Default::default()
        },
        JobOutcome::Succeed | JobOutcome::SucceedWith(_) => JobStatus {
            succeeded: Some(1),
            conditions: vec![condition("Complete")],
            ..Default::default()
        },
    }
}

/// Log lines as the example clients print them, one per processed message.
fn client_logs(job: &Job, processed: u64) -> String {
    let container = job.spec.template.spec.containers.first();
    let marker = match container.and_then(|c| c.env_value("CLIENT_TYPE")) {
        Some("KafkaProducer") => ExampleClients::PRODUCER_MARKER,
        _ => ExampleClients::CONSUMER_MARKER,
    };
    (0..processed)
        .map(|i| format!("INFO {marker}: Hello-world - {i}\n"))
        .collect()
}

fn requested_messages(job: &Job) -> u64 {
    job.spec
        .template
        .spec
        .containers
        .first()
        .and_then(|container| container.env_value("MESSAGE_COUNT"))
        .and_then(|count| count.parse().ok())
        .unwrap_or(0)
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a pod. Pods outside any group never change on their own.
    pub fn insert_pod(&self, pod: Pod) {
        let pod_key = key(
            pod.metadata.namespace.as_deref().unwrap_or_default(),
            pod.name(),
        );
        self.lock().pods.insert(
            pod_key,
            SimPod {
                pod,
                lifecycle: Lifecycle::Running,
            },
        );
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.remove(&key(namespace, name)).map(|sim| sim.pod)
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&key(namespace, name)).map(|sim| sim.pod.clone())
    }

    /// Keeps `replicas` pods of the group alive while an operator deployment
    /// exists, as a reconciled cluster would.
    pub fn add_group(&self, selector: &ReplicaGroupSelector, replicas: usize) {
        self.lock().groups.push(SimGroup {
            selector: selector.clone(),
            replicas,
        });
    }

    /// Answers `list_pods` for exactly this namespace and selector with the
    /// given frames in order; the last frame repeats.
    pub fn script_pods(&self, namespace: &str, selector: &LabelSelector, frames: Vec<Vec<Pod>>) {
        self.lock().scripts.push(PodScript {
            namespace: namespace.to_string(),
            selector: selector.clone(),
            frames: frames.into(),
        });
    }

    /// Outcome for the next job created with `name`.
    pub fn set_job_outcome(&self, name: &str, outcome: JobOutcome) {
        self.lock().outcomes.insert(name.to_string(), outcome);
    }

    /// When false, applied deployments never report ready replicas.
    pub fn set_deployments_ready(&self, ready: bool) {
        self.lock().deployments_unready = !ready;
    }

    /// Pods that received an annotation patch, in order.
    pub fn annotation_patches(&self) -> Vec<(String, String)> {
        self.lock().patches.clone()
    }

    /// Pods deleted through the platform API, in order.
    pub fn deleted_pods(&self) -> Vec<(String, String)> {
        self.lock().deleted_pods.clone()
    }

    /// Resources created through the resource manager and not yet cleaned up.
    pub fn created(&self) -> Vec<String> {
        self.lock().created.iter().map(Manifest::describe).collect()
    }

    pub fn has_job(&self, namespace: &str, name: &str) -> bool {
        self.lock().jobs.contains_key(&key(namespace, name))
    }

    /// Resources named `name` are accepted but never report ready.
    pub fn hold_readiness(&self, name: &str) {
        self.lock().unready.insert(name.to_string());
    }

    /// Resources named `name` are accepted but never show up in listings,
    /// as if the reconciler deleted them right away.
    pub fn drop_resource(&self, name: &str) {
        self.lock().dropped.insert(name.to_string());
    }

    fn is_ready(&self, manifest: &Manifest) -> bool {
        let state = self.lock();
        let Ok(name) = manifest.name() else {
            return false;
        };
        !state.unready.contains(name)
            && !state.dropped.contains(name)
            && state.created.iter().any(|created| created == manifest)
    }
}

impl Platform for FakeCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, PlatformError> {
        let mut state = self.lock();
        state.tick();
        if let Some(script) = state
            .scripts
            .iter_mut()
            .find(|script| script.namespace == namespace && &script.selector == selector)
        {
            let frame = if script.frames.len() > 1 {
                script.frames.pop_front()
            } else {
                script.frames.front().cloned()
            };
            return Ok(frame.unwrap_or_default());
        }
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), sim)| ns == namespace && selector.matches(&sim.pod.metadata.labels))
            .map(|(_, sim)| sim.pod.clone())
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, PlatformError> {
        Ok(self.pod(namespace, name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let mut state = self.lock();
        let pod_key = key(namespace, name);
        let deleted = state.terminate(&pod_key);
        if deleted {
            state.deleted_pods.push(pod_key);
        }
        Ok(deleted)
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Pod, PlatformError> {
        let mut state = self.lock();
        let pod_key = key(namespace, name);
        let sim = state
            .pods
            .get_mut(&pod_key)
            .ok_or_else(|| PlatformError::not_found("Pod", name))?;
        sim.pod
            .metadata
            .annotations
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        let pod = sim.pod.clone();
        state.patches.push(pod_key);
        Ok(pod)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, PlatformError> {
        let mut state = self.lock();
        let Some(sim) = state.jobs.get_mut(&key(namespace, name)) else {
            return Ok(None);
        };
        sim.polls += 1;
        sim.job.status = Some(job_status(sim.outcome, sim.polls));
        Ok(Some(sim.job.clone()))
    }

    async fn create_job(&self, job: &Job) -> Result<Job, PlatformError> {
        let mut state = self.lock();
        let name = job.metadata.name_or_unknown().to_string();
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let job_key = key(&namespace, &name);
        if state.jobs.contains_key(&job_key) {
            return Err(PlatformError::Http {
                status: 409,
                message: format!("jobs.batch \"{name}\" already exists"),
            });
        }
        let outcome = state.outcomes.remove(&name).unwrap_or(JobOutcome::Succeed);
        let mut created = job.clone();
        created.metadata.uid = Some(state.uid(&name));
        created.status = None;
        state.jobs.insert(
            job_key,
            SimJob {
                job: created.clone(),
                polls: 0,
                outcome,
            },
        );
        Ok(created)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        Ok(self.lock().jobs.remove(&key(namespace, name)).is_some())
    }

    async fn job_logs(&self, namespace: &str, name: &str) -> Result<String, PlatformError> {
        let state = self.lock();
        let sim = state
            .jobs
            .get(&key(namespace, name))
            .ok_or_else(|| PlatformError::not_found("Job", name))?;
        let requested = requested_messages(&sim.job);
        let processed = match sim.outcome {
            JobOutcome::Stuck => 0,
            JobOutcome::Succeed if sim.polls > JOB_RUN_POLLS => requested,
            JobOutcome::SucceedWith(count) if sim.polls > JOB_RUN_POLLS => count,
            _ => requested.min(u64::from(sim.polls)),
        };
        Ok(client_logs(&sim.job, processed))
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment, PlatformError> {
        let mut state = self.lock();
        let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
        let name = deployment.name().to_string();
        let deployment_key = key(&namespace, &name);
        let generation = state
            .deployments
            .get(&deployment_key)
            .and_then(|existing| existing.metadata.generation)
            .unwrap_or(0)
            + 1;

        let mut applied = deployment.clone();
        applied.metadata.generation = Some(generation);
        if applied.metadata.uid.is_none() {
            applied.metadata.uid = Some(state.uid(&name));
        }
        let replicas = applied.spec.replicas;
        let ready = if state.deployments_unready { 0 } else { replicas };
        applied.status = Some(DeploymentStatus {
            observed_generation: Some(generation),
            replicas: Some(replicas),
            updated_replicas: Some(replicas),
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
        });

        state.remove_matching(&namespace, &applied.spec.selector);
        for _ in 0..replicas {
            let pod_name = state.uid(&name);
            let labels = LabelSelector {
                match_labels: applied.spec.template.metadata.labels.clone(),
            };
            let uid = state.uid(&pod_name);
            let pod = make_pod(&namespace, &pod_name, &uid, &labels, ready > 0);
            state.pods.insert(
                key(&namespace, &pod_name),
                SimPod {
                    pod,
                    lifecycle: Lifecycle::Running,
                },
            );
        }
        state.deployments.insert(deployment_key, applied.clone());
        Ok(applied)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, PlatformError> {
        Ok(self.lock().deployments.get(&key(namespace, name)).cloned())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let mut state = self.lock();
        let Some(deployment) = state.deployments.remove(&key(namespace, name)) else {
            return Ok(false);
        };
        state.remove_matching(namespace, &deployment.spec.selector);
        Ok(true)
    }
}

impl ResourceManager for FakeCluster {
    async fn create(&self, manifest: &Manifest, timeout: Duration) -> Result<(), PlatformError> {
        {
            let mut state = self.lock();
            state.register(manifest)?;
            state.created.push(manifest.clone());
        }
        if manifest.awaits_ready() {
            self.wait_ready(manifest, timeout).await?;
        }
        Ok(())
    }

    async fn wait_ready(&self, manifest: &Manifest, timeout: Duration) -> Result<(), PlatformError> {
        if self.is_ready(manifest) {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(PlatformError::NotReady {
            resource: manifest.describe(),
            state: "not ready".to_string(),
            waited: timeout,
        })
    }

    async fn count_matching(
        &self,
        sample: &Manifest,
        selector: &LabelSelector,
    ) -> Result<usize, PlatformError> {
        let state = self.lock();
        Ok(state
            .created
            .iter()
            .filter(|manifest| same_collection(manifest, sample))
            .filter(|manifest| {
                manifest
                    .name()
                    .is_ok_and(|name| !state.dropped.contains(name))
            })
            .filter(|manifest| selector.matches(&manifest_labels(manifest)))
            .count())
    }

    async fn cleanup(&self) -> Result<usize, PlatformError> {
        let mut state = self.lock();
        let created = std::mem::take(&mut state.created);
        for manifest in created.iter().rev() {
            state.unregister(manifest);
        }
        Ok(created.len())
    }
}
