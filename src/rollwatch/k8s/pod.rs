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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Kubernetes object metadata restricted to the fields rollwatch reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn name_or_unknown(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }
}

/// Metadata included with list responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// Container specification. Fields rollwatch does not inspect are kept in
/// `extra` so a template survives a read-modify-write unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<ContainerEnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerSpec {
    /// Sets `name` to `value`, replacing an existing entry in place or
    /// appending a new one.
    pub fn set_env(&mut self, name: &str, value: &str) {
        match self.env.iter_mut().find(|var| var.name == name) {
            Some(existing) => {
                existing.value = Some(value.to_string());
                existing.value_from = None;
            }
            None => self.env.push(ContainerEnvVar::new(name, value)),
        }
    }

    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|var| var.name == name)
            .and_then(|var| var.value.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEnvVar {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Value>,
}

impl ContainerEnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }
}

/// Container port declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ContainerPort {
    pub fn tcp(container_port: u16, name: &str) -> Self {
        Self {
            container_port,
            name: Some(name.to_string()),
            protocol: Some("TCP".to_string()),
        }
    }

    /// Port equality as Kubernetes defaults it: a missing protocol means TCP.
    pub fn same_port(&self, other: &ContainerPort) -> bool {
        let protocol = |port: &ContainerPort| port.protocol.clone().unwrap_or_else(|| "TCP".into());
        self.container_port == other.container_port
            && self.name == other.name
            && protocol(self) == protocol(other)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Template describing the pods owned by a workload resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default = "Pod::default_api_version")]
    pub api_version: String,
    #[serde(default = "Pod::default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

impl Pod {
    pub fn new(metadata: ObjectMeta, spec: PodSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    fn default_api_version() -> String {
        "v1".to_string()
    }

    fn default_kind() -> String {
        "Pod".to_string()
    }

    pub fn name(&self) -> &str {
        self.metadata.name_or_unknown()
    }

    /// A pod is ready when its `Ready` condition reports `True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|status| {
                status
                    .conditions
                    .iter()
                    .find(|condition| condition.condition_type == "Ready")
            })
            .map(|condition| condition.status == "True")
            .unwrap_or(false)
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|status| status.phase.as_deref())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Whether the first container declares `port`.
    pub fn first_container_exposes(&self, port: &ContainerPort) -> bool {
        self.spec
            .containers
            .first()
            .map(|container| container.ports.iter().any(|p| p.same_port(port)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PodCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub ready: bool,
    #[serde(rename = "containerID", skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PodCondition {
    pub fn ready(ready: bool) -> Self {
        Self {
            condition_type: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_items_without_kind_deserialize() {
        let list: PodList = serde_json::from_value(json!({
            "metadata": {"resourceVersion": "42"},
            "items": [{
                "metadata": {
                    "name": "my-cluster-kafka-0",
                    "uid": "a1",
                    "labels": {"strimzi.io/cluster": "my-cluster"}
                },
                "spec": {
                    "containers": [{
                        "name": "kafka",
                        "ports": [{"containerPort": 9090, "name": "tcp-ctrlplane", "protocol": "TCP"}],
                        "resources": {"limits": {"memory": "1Gi"}}
                    }],
                    "terminationGracePeriodSeconds": 30
                },
                "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
            }]
        }))
        .expect("pod list");

        let pod = &list.items[0];
        assert_eq!(pod.kind, "Pod");
        assert_eq!(pod.metadata.uid.as_deref(), Some("a1"));
        assert!(pod.is_ready());
        assert!(pod.first_container_exposes(&ContainerPort::tcp(9090, "tcp-ctrlplane")));
        assert!(pod.spec.extra.contains_key("terminationGracePeriodSeconds"));
        assert!(pod.spec.containers[0].extra.contains_key("resources"));
    }

    #[test]
    fn set_env_replaces_in_place() {
        let mut container = ContainerSpec {
            name: "operator".to_string(),
            env: vec![
                ContainerEnvVar::new("A", "1"),
                ContainerEnvVar::new("STRIMZI_FEATURE_GATES", ""),
                ContainerEnvVar::new("B", "2"),
            ],
            ..Default::default()
        };
        container.set_env("STRIMZI_FEATURE_GATES", "+UseStrimziPodSets");
        container.set_env("C", "3");

        let names: Vec<&str> = container.env.iter().map(|var| var.name.as_str()).collect();
        assert_eq!(names, vec!["A", "STRIMZI_FEATURE_GATES", "B", "C"]);
        assert_eq!(
            container.env_value("STRIMZI_FEATURE_GATES"),
            Some("+UseStrimziPodSets")
        );
    }

    #[test]
    fn terminating_pod_is_not_counted_ready_by_callers() {
        let mut pod = Pod::new(ObjectMeta::named("p", "ns"), PodSpec::default());
        pod.status = Some(PodStatus {
            conditions: vec![PodCondition::ready(true)],
            ..Default::default()
        });
        pod.metadata.deletion_timestamp = Some("2024-01-01T00:00:00Z".to_string());
        assert!(pod.is_ready());
        assert!(pod.is_terminating());
    }
}
