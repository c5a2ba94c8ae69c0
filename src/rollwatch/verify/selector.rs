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

use crate::rollwatch::k8s::selector::LabelSelector;
use serde::Serialize;
use std::fmt;

pub const CLUSTER_LABEL: &str = "strimzi.io/cluster";
pub const KIND_LABEL: &str = "strimzi.io/kind";
pub const NAME_LABEL: &str = "strimzi.io/name";

/// Logical role of a replica group inside one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    Broker,
    Coordinator,
}

impl ReplicaRole {
    /// Component suffix the operator uses in resource names.
    pub fn component(self) -> &'static str {
        match self {
            ReplicaRole::Broker => "kafka",
            ReplicaRole::Coordinator => "zookeeper",
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaRole::Broker => f.write_str("broker"),
            ReplicaRole::Coordinator => f.write_str("coordinator"),
        }
    }
}

/// Identifies the pods of one role of one named cluster in one namespace.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaGroupSelector {
    namespace: String,
    cluster: String,
    role: ReplicaRole,
    labels: LabelSelector,
}

impl ReplicaGroupSelector {
    pub fn new(namespace: &str, cluster: &str, role: ReplicaRole) -> Self {
        let component_name = format!("{cluster}-{}", role.component());
        let labels = LabelSelector::from_pairs([
            (CLUSTER_LABEL, cluster),
            (KIND_LABEL, "Kafka"),
            (NAME_LABEL, component_name.as_str()),
        ]);
        Self {
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            role,
            labels,
        }
    }

    pub fn kafka(namespace: &str, cluster: &str) -> Self {
        Self::new(namespace, cluster, ReplicaRole::Broker)
    }

    pub fn zookeeper(namespace: &str, cluster: &str) -> Self {
        Self::new(namespace, cluster, ReplicaRole::Coordinator)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn role(&self) -> ReplicaRole {
        self.role
    }

    pub fn labels(&self) -> &LabelSelector {
        &self.labels
    }

    /// Name shared by the group's controller and its pods' name prefix.
    pub fn component_name(&self) -> String {
        format!("{}-{}", self.cluster, self.role.component())
    }
}

impl fmt::Display for ReplicaGroupSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.component_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_follow_operator_labels() {
        let brokers = ReplicaGroupSelector::kafka("infra", "my-cluster");
        assert_eq!(
            brokers.labels().to_query(),
            "strimzi.io/cluster=my-cluster,strimzi.io/kind=Kafka,strimzi.io/name=my-cluster-kafka"
        );
        assert_eq!(brokers.to_string(), "infra/my-cluster-kafka");

        let coordinators = ReplicaGroupSelector::zookeeper("infra", "my-cluster");
        assert_eq!(coordinators.component_name(), "my-cluster-zookeeper");
        assert_eq!(coordinators.role().to_string(), "coordinator");
        assert_ne!(brokers, coordinators);
    }
}
