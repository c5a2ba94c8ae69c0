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

//! Resource builders consumed by the engine. The engine only supplies
//! logical parameters (names, replica counts, message counts) and receives
//! opaque resources back; the defaults here emit operator custom resources,
//! the operator Deployment and the operator project's example clients.

use super::workload::{WorkloadJob, WorkloadRole};
use crate::rollwatch::api::{Manifest, PlatformError};
use crate::rollwatch::config::Config;
use crate::rollwatch::k8s::deployment::{Deployment, DeploymentSpec};
use crate::rollwatch::k8s::job::{Job, JobSpec};
use crate::rollwatch::k8s::pod::{
    ContainerEnvVar, ContainerPort, ContainerSpec, ObjectMeta, PodSpec, PodTemplateSpec,
};
use crate::rollwatch::k8s::selector::LabelSelector;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const OPERATOR_NAME: &str = "strimzi-cluster-operator";
pub const KAFKA_API_VERSION: &str = "kafka.strimzi.io/v1beta2";
pub const PLAIN_PORT: u16 = 9092;
pub const CONTROL_PLANE_PORT: u16 = 9090;
pub const CONTROL_PLANE_PORT_NAME: &str = "tcp-ctrlplane";

pub fn control_plane_port() -> ContainerPort {
    ContainerPort::tcp(CONTROL_PLANE_PORT, CONTROL_PLANE_PORT_NAME)
}

pub fn plain_bootstrap_address(cluster: &str) -> String {
    format!("{cluster}-kafka-bootstrap:{PLAIN_PORT}")
}

/// `<prefix>-<random digits>`, for resources that must not collide with
/// leftovers of earlier runs.
pub fn generated_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..i32::MAX as u32);
    format!("{prefix}-{suffix}")
}

/// Builds the operator Deployment an installation applies.
pub trait OperatorTemplate: Send + Sync {
    fn operator_deployment(&self, namespace: &str) -> Deployment;

    /// Name of the container whose environment carries operator settings.
    fn operator_container(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    pub namespace: String,
    pub cluster: String,
    pub brokers: usize,
    pub coordinators: usize,
    /// Ephemeral storage instead of persistent claims.
    pub ephemeral: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub namespace: String,
    pub cluster: String,
    pub name: String,
    pub partitions: usize,
    pub replicas: usize,
}

/// Builds the clustered service and its topics.
pub trait TopologyTemplates: Send + Sync {
    fn cluster(&self, topology: &ClusterTopology) -> Result<Manifest, PlatformError>;
    fn topic(&self, topic: &TopicSpec) -> Result<Manifest, PlatformError>;
}

/// Builds client jobs and reads their progress back from logs.
pub trait ClientTemplate: Send + Sync {
    fn job(&self, workload: &WorkloadJob) -> Job;
    fn count_messages(&self, role: WorkloadRole, logs: &str) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrimziTemplates {
    operator_image: String,
}

impl StrimziTemplates {
    pub fn new(operator_image: impl Into<String>) -> Self {
        Self {
            operator_image: operator_image.into(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(Config::OperatorImage.get())
    }

    fn operator_labels() -> BTreeMap<String, String> {
        [("name", OPERATOR_NAME), ("strimzi.io/kind", "cluster-operator")]
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }
}

fn field_ref(name: &str, path: &str) -> ContainerEnvVar {
    ContainerEnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(json!({"fieldRef": {"fieldPath": path}})),
    }
}

fn http_probe(path: &str) -> Value {
    json!({
        "httpGet": {"path": path, "port": "http"},
        "initialDelaySeconds": 10,
        "periodSeconds": 30
    })
}

impl OperatorTemplate for StrimziTemplates {
    fn operator_deployment(&self, namespace: &str) -> Deployment {
        let labels = Self::operator_labels();
        let mut container_extra = Map::new();
        container_extra.insert("livenessProbe".to_string(), http_probe("/healthy"));
        container_extra.insert("readinessProbe".to_string(), http_probe("/ready"));

        let container = ContainerSpec {
            name: OPERATOR_NAME.to_string(),
            image: Some(self.operator_image.clone()),
            args: vec!["/opt/strimzi/bin/cluster_operator_run.sh".to_string()],
            env: vec![
                field_ref("STRIMZI_NAMESPACE", "metadata.namespace"),
                ContainerEnvVar::new("STRIMZI_FULL_RECONCILIATION_INTERVAL_MS", "120000"),
                ContainerEnvVar::new("STRIMZI_OPERATION_TIMEOUT_MS", "300000"),
                field_ref("STRIMZI_OPERATOR_NAMESPACE", "metadata.namespace"),
                ContainerEnvVar::new("STRIMZI_FEATURE_GATES", ""),
            ],
            ports: vec![ContainerPort::tcp(8080, "http")],
            extra: container_extra,
            ..Default::default()
        };

        let metadata = ObjectMeta {
            labels: labels.clone(),
            ..ObjectMeta::named(OPERATOR_NAME, namespace)
        };
        Deployment::new(
            metadata,
            DeploymentSpec {
                replicas: 1,
                selector: LabelSelector {
                    match_labels: labels.clone(),
                },
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels,
                        ..Default::default()
                    },
                    spec: PodSpec {
                        containers: vec![container],
                        service_account_name: Some(OPERATOR_NAME.to_string()),
                        ..Default::default()
                    },
                },
                extra: Map::new(),
            },
        )
    }

    fn operator_container(&self) -> &str {
        OPERATOR_NAME
    }
}

impl TopologyTemplates for StrimziTemplates {
    /// Cluster with plain and TLS listeners on persistent or ephemeral
    /// storage.
    fn cluster(&self, topology: &ClusterTopology) -> Result<Manifest, PlatformError> {
        let replication = topology.brokers.clamp(1, 3);
        let min_isr = replication.saturating_sub(1).max(1);
        let (kafka_storage, zookeeper_storage) = if topology.ephemeral {
            (json!({"type": "ephemeral"}), json!({"type": "ephemeral"}))
        } else {
            (
                json!({
                    "type": "jbod",
                    "volumes": [{
                        "id": 0,
                        "type": "persistent-claim",
                        "size": "1Gi",
                        "deleteClaim": true
                    }]
                }),
                json!({"type": "persistent-claim", "size": "1Gi", "deleteClaim": true}),
            )
        };
        Manifest::new(json!({
            "apiVersion": KAFKA_API_VERSION,
            "kind": "Kafka",
            "metadata": {"name": topology.cluster, "namespace": topology.namespace},
            "spec": {
                "kafka": {
                    "replicas": topology.brokers,
                    "listeners": [
                        {"name": "plain", "port": PLAIN_PORT, "type": "internal", "tls": false},
                        {"name": "tls", "port": 9093, "type": "internal", "tls": true}
                    ],
                    "config": {
                        "offsets.topic.replication.factor": replication,
                        "transaction.state.log.replication.factor": replication,
                        "transaction.state.log.min.isr": min_isr,
                        "default.replication.factor": replication,
                        "min.insync.replicas": min_isr
                    },
                    "storage": kafka_storage
                },
                "zookeeper": {
                    "replicas": topology.coordinators,
                    "storage": zookeeper_storage
                },
                "entityOperator": {"topicOperator": {}, "userOperator": {}}
            }
        }))
    }

    fn topic(&self, topic: &TopicSpec) -> Result<Manifest, PlatformError> {
        let min_isr = topic.replicas.saturating_sub(1).max(1);
        Manifest::new(json!({
            "apiVersion": KAFKA_API_VERSION,
            "kind": "KafkaTopic",
            "metadata": {
                "name": topic.name,
                "namespace": topic.namespace,
                "labels": {"strimzi.io/cluster": topic.cluster}
            },
            "spec": {
                "partitions": topic.partitions,
                "replicas": topic.replicas,
                "config": {"min.insync.replicas": min_isr}
            }
        }))
    }
}

/// The operator project's test clients: one image, role picked through
/// `CLIENT_TYPE`, one log line per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleClients {
    image: String,
    producer_marker: String,
    consumer_marker: String,
}

impl ExampleClients {
    pub const PRODUCER_MARKER: &'static str = "Sent message";
    pub const CONSUMER_MARKER: &'static str = "Received message";

    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            producer_marker: Self::PRODUCER_MARKER.to_string(),
            consumer_marker: Self::CONSUMER_MARKER.to_string(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(Config::ClientImage.get())
    }

    /// Overrides the log lines counted as one processed message.
    pub fn with_markers(self, producer: &str, consumer: &str) -> Self {
        Self {
            producer_marker: producer.to_string(),
            consumer_marker: consumer.to_string(),
            ..self
        }
    }

    fn marker(&self, role: WorkloadRole) -> &str {
        match role {
            WorkloadRole::Producer => &self.producer_marker,
            WorkloadRole::Consumer => &self.consumer_marker,
        }
    }
}

impl ClientTemplate for ExampleClients {
    fn job(&self, workload: &WorkloadJob) -> Job {
        let mut env = vec![
            ContainerEnvVar::new("BOOTSTRAP_SERVERS", &workload.bootstrap),
            ContainerEnvVar::new("TOPIC", &workload.topic),
            ContainerEnvVar::new("DELAY_MS", workload.delay.as_millis().to_string()),
            ContainerEnvVar::new("LOG_LEVEL", "DEBUG"),
            ContainerEnvVar::new("MESSAGE_COUNT", workload.message_count.to_string()),
        ];
        match workload.role {
            WorkloadRole::Producer => {
                env.push(ContainerEnvVar::new("CLIENT_TYPE", "KafkaProducer"));
                env.push(ContainerEnvVar::new("PRODUCER_ACKS", "all"));
            }
            WorkloadRole::Consumer => {
                env.push(ContainerEnvVar::new("CLIENT_TYPE", "KafkaConsumer"));
                env.push(ContainerEnvVar::new(
                    "GROUP_ID",
                    format!("{}-group", workload.identity),
                ));
            }
        }

        let labels: BTreeMap<String, String> = [
            ("app".to_string(), workload.identity.clone()),
            ("user-test-app".to_string(), "kafka-clients".to_string()),
        ]
        .into_iter()
        .collect();

        Job::new(
            ObjectMeta {
                labels: labels.clone(),
                ..ObjectMeta::named(&workload.identity, &workload.namespace)
            },
            JobSpec {
                backoff_limit: Some(0),
                active_deadline_seconds: None,
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels,
                        ..Default::default()
                    },
                    spec: PodSpec {
                        containers: vec![ContainerSpec {
                            name: workload.identity.clone(),
                            image: Some(self.image.clone()),
                            env,
                            ..Default::default()
                        }],
                        restart_policy: Some("Never".to_string()),
                        ..Default::default()
                    },
                },
                extra: Map::new(),
            },
        )
    }

    fn count_messages(&self, role: WorkloadRole, logs: &str) -> u64 {
        let marker = self.marker(role);
        logs.lines().filter(|line| line.contains(marker)).count() as u64
    }
}
