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

use super::pod::{ContainerSpec, ObjectMeta, PodTemplateSpec};
use super::selector::LabelSelector;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default = "DeploymentSpec::default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeploymentSpec {
    fn default_replicas() -> i32 {
        1
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    #[serde(default = "Deployment::default_api_version")]
    pub api_version: String,
    #[serde(default = "Deployment::default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl Deployment {
    pub fn new(metadata: ObjectMeta, spec: DeploymentSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    fn default_api_version() -> String {
        "apps/v1".to_string()
    }

    fn default_kind() -> String {
        "Deployment".to_string()
    }

    pub fn name(&self) -> &str {
        self.metadata.name_or_unknown()
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerSpec> {
        self.spec
            .template
            .spec
            .containers
            .iter_mut()
            .find(|container| container.name == name)
    }

    /// True once the controller observed the latest generation and every
    /// desired replica is updated and ready.
    pub fn is_rolled_out(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        let desired = self.spec.replicas;
        let generation_seen = match (self.metadata.generation, status.observed_generation) {
            (Some(generation), Some(observed)) => observed >= generation,
            (None, _) => true,
            (Some(_), None) => false,
        };
        generation_seen
            && status.updated_replicas.unwrap_or(0) >= desired
            && status.ready_replicas.unwrap_or(0) >= desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollout_requires_observed_generation_and_ready_replicas() {
        let mut deployment = Deployment::new(
            ObjectMeta {
                generation: Some(2),
                ..ObjectMeta::named("strimzi-cluster-operator", "infra")
            },
            DeploymentSpec {
                replicas: 1,
                ..Default::default()
            },
        );
        assert!(!deployment.is_rolled_out());

        deployment.status = Some(DeploymentStatus {
            observed_generation: Some(1),
            updated_replicas: Some(1),
            ready_replicas: Some(1),
            ..Default::default()
        });
        assert!(!deployment.is_rolled_out());

        deployment.status.as_mut().unwrap().observed_generation = Some(2);
        assert!(deployment.is_rolled_out());
    }
}
