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

use super::error::VerificationError;
use super::selector::ReplicaGroupSelector;
use crate::rollwatch::api::{Platform, PlatformError};
use crate::rollwatch::k8s::pod::Pod;
use crate::rollwatch::logger::log_debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque token that changes whenever the pod occupying a name is replaced.
/// Backed by the pod UID, which the platform never reuses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RestartMarker(String);

impl RestartMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RestartMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time mapping of pod name to restart marker for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PodSnapshot {
    namespace: String,
    pods: BTreeMap<String, RestartMarker>,
}

impl PodSnapshot {
    /// Builds a snapshot from a pod listing. Every pod must carry a name and
    /// a UID, and no name may appear twice.
    pub fn from_pods<'a>(
        namespace: &str,
        pods: impl IntoIterator<Item = &'a Pod>,
    ) -> Result<Self, PlatformError> {
        let mut entries = BTreeMap::new();
        for pod in pods {
            let name = pod
                .metadata
                .name
                .as_deref()
                .ok_or_else(|| PlatformError::Invalid("listed pod has no name".to_string()))?;
            let uid = pod
                .metadata
                .uid
                .as_deref()
                .filter(|uid| !uid.is_empty())
                .ok_or_else(|| PlatformError::Invalid(format!("pod {name} has no uid")))?;
            if entries
                .insert(name.to_string(), RestartMarker::new(uid))
                .is_some()
            {
                return Err(PlatformError::Invalid(format!(
                    "pod {name} listed more than once"
                )));
            }
        }
        Ok(Self {
            namespace: namespace.to_string(),
            pods: entries,
        })
    }

    /// Builds a snapshot from literal `(name, marker)` pairs.
    pub fn from_markers<N, M>(namespace: &str, markers: impl IntoIterator<Item = (N, M)>) -> Self
    where
        N: Into<String>,
        M: Into<String>,
    {
        Self {
            namespace: namespace.to_string(),
            pods: markers
                .into_iter()
                .map(|(name, marker)| (name.into(), RestartMarker::new(marker)))
                .collect(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pods.keys().map(String::as_str)
    }

    pub fn marker(&self, name: &str) -> Option<&RestartMarker> {
        self.pods.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RestartMarker)> {
        self.pods.iter().map(|(name, marker)| (name.as_str(), marker))
    }

    /// Number of entries of `self` whose marker differs in `current`. A name
    /// missing from `current` counts as changed.
    pub fn changed_in(&self, current: &PodSnapshot) -> usize {
        self.pods
            .iter()
            .filter(|(name, marker)| current.pods.get(name.as_str()) != Some(*marker))
            .count()
    }
}

/// Captures snapshots of replica groups.
pub struct PodSnapshotStore<'a, P> {
    platform: &'a P,
}

impl<'a, P: Platform> PodSnapshotStore<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Lists the pods selected by `selector` and records their markers.
    /// Fails with [`VerificationError::EmptySelection`] when nothing matches.
    pub async fn capture(
        &self,
        selector: &ReplicaGroupSelector,
    ) -> Result<PodSnapshot, VerificationError> {
        let pods = self
            .platform
            .list_pods(selector.namespace(), selector.labels())
            .await?;
        if pods.is_empty() {
            return Err(VerificationError::EmptySelection {
                selector: selector.clone(),
            });
        }
        let snapshot = PodSnapshot::from_pods(selector.namespace(), &pods)?;
        let size = snapshot.len().to_string();
        let group = selector.to_string();
        log_debug(
            "snapshot",
            "Captured pod snapshot",
            &[("group", group.as_str()), ("pods", size.as_str())],
        );
        Ok(snapshot)
    }
}
