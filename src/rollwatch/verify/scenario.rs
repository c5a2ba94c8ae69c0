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

use super::annotate::ManualRollAnnotator;
use super::error::VerificationError;
use super::features::{
    FeatureGateError, FeatureGateExpression, CONTROL_PLANE_LISTENER, USE_STRIMZI_POD_SETS,
};
use super::install::{InstallationConfig, InstallationLifecycleManager, WatchedNamespaces};
use super::rolling::{RollState, RollingUpdateDetector};
use super::selector::{ReplicaGroupSelector, ReplicaRole, CLUSTER_LABEL};
use super::snapshot::PodSnapshotStore;
use super::templates::{
    control_plane_port, generated_name, plain_bootstrap_address, ClientTemplate,
    ClusterTopology, OperatorTemplate, TopicSpec, TopologyTemplates,
};
use super::workload::{client_timeout, WorkloadCompletionTracker, WorkloadJob, WorkloadResult};
use crate::rollwatch::api::{Manifest, Platform, PlatformError, ResourceManager};
use crate::rollwatch::config::Timeouts;
use crate::rollwatch::k8s::pod::Pod;
use crate::rollwatch::k8s::selector::LabelSelector;
use crate::rollwatch::logger::{log_debug, log_error, log_info, log_warn};
use crate::rollwatch::observability::tracing::with_span;
use crate::rollwatch::util::poll::{poll_until, PollError, PollPolicy, Probe};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

const COMPONENT: &str = "scenario";

/// Assertions made once the workloads are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// The first broker pod exposes the control-plane port exactly when the
    /// `ControlPlaneListener` gate is enabled.
    ControlPlanePort,
}

impl Check {
    pub fn name(self) -> &'static str {
        match self {
            Check::ControlPlanePort => "control-plane-port",
        }
    }
}

/// Disruptions applied in order while the workloads run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disruption {
    /// Delete the first pod of the group, then wait for it to heal.
    DeletePod(ReplicaRole),
    /// Annotate every pod of the group, then wait for the roll.
    ManualRoll(ReplicaRole),
}

impl fmt::Display for Disruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disruption::DeletePod(role) => write!(f, "delete-pod({role})"),
            Disruption::ManualRoll(role) => write!(f, "manual-roll({role})"),
        }
    }
}

/// Topics created in bulk instead of running client traffic. Topics are
/// created without waiting, every `sample_every`-th one is then checked for
/// readiness, and finally the cluster must list at least `count` topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLoad {
    pub prefix: String,
    pub count: usize,
    pub sample_every: usize,
    pub partitions: usize,
    pub replicas: usize,
}

impl TopicLoad {
    pub fn topic_name(&self, index: usize) -> String {
        format!("{}{index}", self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSpec {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub feature_gates: FeatureGateExpression,
    pub brokers: usize,
    pub coordinators: usize,
    pub message_count: u64,
    pub delay: Duration,
    pub producer: String,
    pub consumer: String,
    pub topic: String,
    pub checks: Vec<Check>,
    pub disruptions: Vec<Disruption>,
    pub ephemeral: bool,
    /// When set, the scenario creates topics in bulk and runs no clients.
    pub topic_load: Option<TopicLoad>,
}

impl ScenarioSpec {
    pub const NAMES: [&'static str; 3] =
        ["control-plane-listener", "pod-sets", "topic-scalability"];

    fn base(name: &str, namespace: &str, cluster: &str, gates: FeatureGateExpression) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            feature_gates: gates,
            brokers: 3,
            coordinators: 3,
            message_count: 300,
            delay: Duration::from_millis(500),
            producer: generated_name("producer-test"),
            consumer: generated_name("consumer-test"),
            topic: generated_name("my-topic"),
            checks: Vec::new(),
            disruptions: Vec::new(),
            ephemeral: false,
            topic_load: None,
        }
    }

    /// Operator with the control-plane listener disabled: no control-plane
    /// port on brokers, clients survive a broker deletion and a broker roll.
    pub fn control_plane_listener(
        namespace: &str,
        cluster: &str,
    ) -> Result<Self, FeatureGateError> {
        let gates = FeatureGateExpression::default().disable(CONTROL_PLANE_LISTENER)?;
        Ok(Self {
            checks: vec![Check::ControlPlanePort],
            disruptions: vec![
                Disruption::DeletePod(ReplicaRole::Broker),
                Disruption::ManualRoll(ReplicaRole::Broker),
            ],
            ..Self::base("control-plane-listener", namespace, cluster, gates)
        })
    }

    /// Operator managing pods through pod sets: both groups heal from a
    /// deletion and roll on request while 600 messages flow.
    pub fn pod_sets(namespace: &str, cluster: &str) -> Result<Self, FeatureGateError> {
        let gates = FeatureGateExpression::default().enable(USE_STRIMZI_POD_SETS)?;
        Ok(Self {
            message_count: 600,
            disruptions: vec![
                Disruption::DeletePod(ReplicaRole::Coordinator),
                Disruption::DeletePod(ReplicaRole::Broker),
                Disruption::ManualRoll(ReplicaRole::Coordinator),
                Disruption::ManualRoll(ReplicaRole::Broker),
            ],
            ..Self::base("pod-sets", namespace, cluster, gates)
        })
    }

    /// Default operator, ephemeral cluster of three brokers and one
    /// coordinator, 1000 topics created at once.
    pub fn topic_scalability(namespace: &str, cluster: &str) -> Self {
        Self {
            brokers: 3,
            coordinators: 1,
            message_count: 0,
            ephemeral: true,
            topic_load: Some(TopicLoad {
                prefix: "topic-example".to_string(),
                count: 1000,
                sample_every: 50,
                partitions: 3,
                replicas: 1,
            }),
            ..Self::base(
                "topic-scalability",
                namespace,
                cluster,
                FeatureGateExpression::default(),
            )
        }
    }

    /// Resolves a built-in scenario. `Ok(None)` means the name is unknown.
    pub fn by_name(
        name: &str,
        namespace: &str,
        cluster: &str,
    ) -> Result<Option<Self>, FeatureGateError> {
        Ok(match name {
            "control-plane-listener" => Some(Self::control_plane_listener(namespace, cluster)?),
            "pod-sets" => Some(Self::pod_sets(namespace, cluster)?),
            "topic-scalability" => Some(Self::topic_scalability(namespace, cluster)),
            _ => None,
        })
    }

    pub fn replicas(&self, role: ReplicaRole) -> usize {
        match role {
            ReplicaRole::Broker => self.brokers,
            ReplicaRole::Coordinator => self.coordinators,
        }
    }

    pub fn selector(&self, role: ReplicaRole) -> ReplicaGroupSelector {
        ReplicaGroupSelector::new(&self.namespace, &self.cluster, role)
    }
}

/// One roll observed during a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollRecord {
    pub group: String,
    pub transitions: Vec<RollState>,
    pub polls: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub namespace: String,
    pub feature_gates: String,
    pub checks: Vec<String>,
    pub disruptions: Vec<String>,
    pub rolls: Vec<RollRecord>,
    pub workloads: Vec<WorkloadResult>,
    /// Topics created by a bulk topic load.
    pub topics: usize,
    pub duration_ms: u64,
}

impl ScenarioReport {
    fn new(spec: &ScenarioSpec) -> Self {
        Self {
            scenario: spec.name.clone(),
            namespace: spec.namespace.clone(),
            feature_gates: spec.feature_gates.to_string(),
            checks: Vec::new(),
            disruptions: Vec::new(),
            rolls: Vec::new(),
            workloads: Vec::new(),
            topics: 0,
            duration_ms: 0,
        }
    }
}

/// Drives scenarios against one cluster. Scenarios run sequentially; the
/// installation handle is passed in so it is never shared implicitly.
pub struct Verifier<'a, P, R, T, C> {
    platform: &'a P,
    resources: &'a R,
    templates: &'a T,
    clients: &'a C,
    policy: PollPolicy,
    timeouts: Timeouts,
}

impl<'a, P, R, T, C> Verifier<'a, P, R, T, C>
where
    P: Platform,
    R: ResourceManager,
    T: TopologyTemplates + OperatorTemplate,
    C: ClientTemplate,
{
    pub fn new(
        platform: &'a P,
        resources: &'a R,
        templates: &'a T,
        clients: &'a C,
        policy: PollPolicy,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            platform,
            resources,
            templates,
            clients,
            policy,
            timeouts,
        }
    }

    /// Runs `spec` to completion. The first failing step aborts the run;
    /// cleanup is attempted either way and its failures are only logged.
    pub async fn run(
        &self,
        installation: &mut InstallationLifecycleManager<'_, P, T>,
        spec: &ScenarioSpec,
    ) -> Result<ScenarioReport, VerificationError> {
        with_span(&spec.name, "scenario", async move {
            let started = Instant::now();
            log_info(
                COMPONENT,
                "Starting scenario",
                &[("namespace", spec.namespace.as_str())],
            );
            let mut tracker = WorkloadCompletionTracker::new(self.platform, self.clients, self.policy);
            let mut report = ScenarioReport::new(spec);
            let outcome = self.execute(installation, &mut tracker, spec, &mut report).await;
            self.cleanup(installation, &mut tracker).await;

            report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match outcome {
                Ok(()) => {
                    log_info(COMPONENT, "Scenario passed", &[]);
                    Ok(report)
                }
                Err(err) => {
                    let error = err.to_string();
                    let metadata = [("kind", err.kind()), ("error", error.as_str())];
                    if err.is_product_defect() {
                        log_error(COMPONENT, "Scenario failed", &metadata);
                    } else {
                        log_warn(COMPONENT, "Scenario failed", &metadata);
                    }
                    Err(err)
                }
            }
        })
        .await
    }

    async fn execute(
        &self,
        installation: &mut InstallationLifecycleManager<'_, P, T>,
        tracker: &mut WorkloadCompletionTracker<'a, P, C>,
        spec: &ScenarioSpec,
        report: &mut ScenarioReport,
    ) -> Result<(), VerificationError> {
        let config = InstallationConfig::new(&spec.namespace)
            .watching(WatchedNamespaces::All)
            .with_feature_gates(spec.feature_gates.clone());
        with_span(&spec.name, "install", async {
            installation.uninstall().await?;
            installation.install(config).await
        })
        .await?;

        with_span(&spec.name, "deploy", self.deploy(spec)).await?;

        if let Some(load) = &spec.topic_load {
            report.topics =
                with_span(&spec.name, "topic-load", self.load_topics(spec, load)).await?;
            return Ok(());
        }

        let bootstrap = plain_bootstrap_address(&spec.cluster);
        let (producer, consumer) = WorkloadJob::pair(
            &spec.producer,
            &spec.consumer,
            &spec.namespace,
            &spec.topic,
            &bootstrap,
            spec.message_count,
            spec.delay,
        );
        tracker.start_producer(producer).await?;
        tracker.start_consumer(consumer).await?;
        tracker
            .wait_running(&spec.consumer, &spec.namespace, self.timeouts.job_running)
            .await?;

        for check in &spec.checks {
            with_span(&spec.name, check.name(), self.check(spec, *check)).await?;
            report.checks.push(check.name().to_string());
        }

        for disruption in &spec.disruptions {
            let step = disruption.to_string();
            with_span(&spec.name, step.clone(), self.disrupt(spec, *disruption, report)).await?;
            report.disruptions.push(step);
        }

        let bound = client_timeout(spec.message_count, spec.delay);
        for identity in [&spec.producer, &spec.consumer] {
            let result = tracker
                .wait_success(identity, &spec.namespace, spec.message_count, bound)
                .await?;
            report.workloads.push(result);
        }
        Ok(())
    }

    async fn deploy(&self, spec: &ScenarioSpec) -> Result<(), VerificationError> {
        let topology = ClusterTopology {
            namespace: spec.namespace.clone(),
            cluster: spec.cluster.clone(),
            brokers: spec.brokers,
            coordinators: spec.coordinators,
            ephemeral: spec.ephemeral,
        };
        self.resources
            .create(&self.templates.cluster(&topology)?, self.timeouts.resource_readiness)
            .await?;

        let detector = RollingUpdateDetector::new(self.platform, self.policy);
        for role in [ReplicaRole::Coordinator, ReplicaRole::Broker] {
            let replicas = spec.replicas(role);
            if replicas > 0 {
                detector
                    .wait_for_component_and_pods_ready(
                        &spec.selector(role),
                        replicas,
                        self.timeouts.pod_readiness,
                    )
                    .await?;
            }
        }

        if spec.topic_load.is_some() {
            return Ok(());
        }
        let topic = TopicSpec {
            namespace: spec.namespace.clone(),
            cluster: spec.cluster.clone(),
            name: spec.topic.clone(),
            partitions: spec.brokers,
            replicas: spec.brokers,
        };
        self.resources
            .create(&self.templates.topic(&topic)?, self.timeouts.resource_readiness)
            .await?;
        Ok(())
    }

    /// Creates every topic of `load` without waiting, checks readiness on a
    /// sample, then waits for the cluster to list them all. Returns the
    /// number of topics created.
    async fn load_topics(
        &self,
        spec: &ScenarioSpec,
        load: &TopicLoad,
    ) -> Result<usize, VerificationError> {
        let count = load.count.to_string();
        log_info(
            COMPONENT,
            "Creating topics",
            &[("count", count.as_str()), ("prefix", load.prefix.as_str())],
        );
        let mut manifests = Vec::with_capacity(load.count);
        for index in 0..load.count {
            let topic = TopicSpec {
                namespace: spec.namespace.clone(),
                cluster: spec.cluster.clone(),
                name: load.topic_name(index),
                partitions: load.partitions,
                replicas: load.replicas,
            };
            let manifest = self.templates.topic(&topic)?.await_ready(false);
            self.resources
                .create(&manifest, self.timeouts.resource_readiness)
                .await?;
            manifests.push(manifest);
        }

        for manifest in manifests.iter().step_by(load.sample_every.max(1)) {
            let resource = manifest.describe();
            log_debug(COMPONENT, "Checking topic readiness", &[("resource", resource.as_str())]);
            match self
                .resources
                .wait_ready(manifest, self.timeouts.resource_readiness)
                .await
            {
                Ok(()) => {}
                Err(err @ PlatformError::NotReady { .. }) => {
                    return Err(VerificationError::CheckFailed {
                        check: "topic-ready".to_string(),
                        detail: err.to_string(),
                    })
                }
                Err(err) => return Err(err.into()),
            }
        }

        match manifests.first() {
            Some(sample) => self.wait_topic_count(spec, sample, load.count).await?,
            None => return Ok(0),
        }
        log_info(COMPONENT, "All topics listed", &[("count", count.as_str())]);
        Ok(manifests.len())
    }

    /// Waits until the cluster lists at least `expected` topics. Topics the
    /// operator mirrors for internal use carry the same cluster label, so the
    /// count may exceed `expected`.
    async fn wait_topic_count(
        &self,
        spec: &ScenarioSpec,
        sample: &Manifest,
        expected: usize,
    ) -> Result<(), VerificationError> {
        let selector = LabelSelector::from_pairs([(CLUSTER_LABEL, spec.cluster.as_str())]);
        let policy = self.policy.with_timeout(self.timeouts.resource_readiness);
        let resources = self.resources;
        let selector = &selector;
        let result = poll_until(&policy, move || async move {
            let observed = resources.count_matching(sample, selector).await?;
            Ok::<_, PlatformError>(if observed >= expected {
                Probe::Ready(())
            } else {
                Probe::Pending(observed)
            })
        })
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(PollError::Probe(err)) => Err(err.into()),
            Err(PollError::Timeout { last, elapsed, .. }) => Err(VerificationError::CheckFailed {
                check: "topic-count".to_string(),
                detail: format!(
                    "{} of {expected} topics listed after {}",
                    last.unwrap_or(0),
                    humantime::format_duration(elapsed)
                ),
            }),
        }
    }

    async fn check(&self, spec: &ScenarioSpec, check: Check) -> Result<(), VerificationError> {
        match check {
            Check::ControlPlanePort => {
                let pod = self.first_pod(&spec.selector(ReplicaRole::Broker)).await?;
                let expected = spec.feature_gates.is_enabled(CONTROL_PLANE_LISTENER, true);
                let present = pod.first_container_exposes(&control_plane_port());
                let state = if present { "present" } else { "absent" };
                log_info(
                    COMPONENT,
                    "Checked control-plane port",
                    &[("pod", pod.name()), ("port", state)],
                );
                if present != expected {
                    let wanted = if expected { "present" } else { "absent" };
                    return Err(VerificationError::CheckFailed {
                        check: check.name().to_string(),
                        detail: format!(
                            "port 9090/tcp-ctrlplane is {state} on pod {}, expected {wanted}",
                            pod.name()
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    async fn disrupt(
        &self,
        spec: &ScenarioSpec,
        disruption: Disruption,
        report: &mut ScenarioReport,
    ) -> Result<(), VerificationError> {
        let detector = RollingUpdateDetector::new(self.platform, self.policy);
        match disruption {
            Disruption::DeletePod(role) => {
                let selector = spec.selector(role);
                let replicas = spec.replicas(role);
                let pod = self.first_pod(&selector).await?;
                log_info(
                    COMPONENT,
                    "Deleting pod",
                    &[("namespace", selector.namespace()), ("pod", pod.name())],
                );
                if !self.platform.delete_pod(selector.namespace(), pod.name()).await? {
                    return Err(VerificationError::StalePodReference {
                        namespace: selector.namespace().to_string(),
                        pod: pod.name().to_string(),
                    });
                }
                detector
                    .wait_for_component_and_pods_ready(&selector, replicas, self.timeouts.pod_readiness)
                    .await?;
            }
            Disruption::ManualRoll(role) => {
                let selector = spec.selector(role);
                let replicas = spec.replicas(role);
                let snapshot = PodSnapshotStore::new(self.platform).capture(&selector).await?;
                let old = ManualRollAnnotator::new(self.platform)
                    .trigger_with_resnapshot(&selector, snapshot)
                    .await?;
                let rolled = detector
                    .wait_until_rolled(&selector, replicas, &old, self.timeouts.roll(replicas))
                    .await?;
                if !rolled.is_monotonic() || rolled.transitions.last() != Some(&RollState::Complete) {
                    let seen: Vec<&str> = rolled.transitions.iter().map(|s| s.as_str()).collect();
                    return Err(VerificationError::CheckFailed {
                        check: "roll-progression".to_string(),
                        detail: format!("{selector} went through {}", seen.join(" -> ")),
                    });
                }
                report.rolls.push(RollRecord {
                    group: selector.to_string(),
                    transitions: rolled.transitions,
                    polls: rolled.polls,
                });
            }
        }
        Ok(())
    }

    async fn first_pod(&self, selector: &ReplicaGroupSelector) -> Result<Pod, VerificationError> {
        let mut pods: Vec<Pod> = self
            .platform
            .list_pods(selector.namespace(), selector.labels())
            .await?
            .into_iter()
            .filter(|pod| !pod.is_terminating())
            .collect();
        pods.sort_by(|a, b| a.name().cmp(b.name()));
        pods.into_iter()
            .next()
            .ok_or_else(|| VerificationError::EmptySelection {
                selector: selector.clone(),
            })
    }

    async fn cleanup(
        &self,
        installation: &mut InstallationLifecycleManager<'_, P, T>,
        tracker: &mut WorkloadCompletionTracker<'a, P, C>,
    ) {
        if let Err(err) = tracker.discard_all().await {
            let error = err.to_string();
            log_warn(COMPONENT, "Workload cleanup failed", &[("error", error.as_str())]);
        }
        match self.resources.cleanup().await {
            Ok(deleted) => {
                let deleted = deleted.to_string();
                log_info(COMPONENT, "Deleted scenario resources", &[("count", deleted.as_str())]);
            }
            Err(err) => {
                let error = err.to_string();
                log_warn(COMPONENT, "Resource cleanup failed", &[("error", error.as_str())]);
            }
        }
        if let Err(err) = installation.uninstall().await {
            let error = err.to_string();
            log_warn(COMPONENT, "Operator uninstall failed", &[("error", error.as_str())]);
        }
    }
}
