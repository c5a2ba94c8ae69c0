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
use super::snapshot::{PodSnapshot, PodSnapshotStore};
use crate::rollwatch::api::Platform;
use crate::rollwatch::logger::{log_debug, log_info, log_warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// Pod annotation the operator watches to schedule a manual rolling update.
pub const MANUAL_ROLL_ANNOTATION: &str = "strimzi.io/manual-rolling-update";

const COMPONENT: &str = "annotate";

/// Pods touched by one manual-roll request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationOutcome {
    pub annotated: Vec<String>,
    pub already_annotated: Vec<String>,
}

/// Requests manual rolling updates by annotating pods. Performs no polling;
/// callers wait on the roll separately.
pub struct ManualRollAnnotator<'a, P> {
    platform: &'a P,
}

impl<'a, P: Platform> ManualRollAnnotator<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Annotates every pod named in `snapshot`.
    ///
    /// A pod that is gone, or whose name is now held by a different pod than
    /// the one snapshotted, fails with
    /// [`VerificationError::StalePodReference`]. Pods that already carry the
    /// annotation are left untouched.
    pub async fn trigger_manual_roll(
        &self,
        snapshot: &PodSnapshot,
    ) -> Result<AnnotationOutcome, VerificationError> {
        let namespace = snapshot.namespace();
        let mut outcome = AnnotationOutcome::default();
        let mut annotations = BTreeMap::new();
        annotations.insert(MANUAL_ROLL_ANNOTATION.to_string(), "true".to_string());

        for (name, marker) in snapshot.iter() {
            let stale = || VerificationError::StalePodReference {
                namespace: namespace.to_string(),
                pod: name.to_string(),
            };
            let pod = self.platform.get_pod(namespace, name).await?.ok_or_else(stale)?;
            if pod.metadata.uid.as_deref() != Some(marker.as_str()) {
                return Err(stale());
            }
            if pod.annotation(MANUAL_ROLL_ANNOTATION) == Some("true") {
                log_debug(
                    COMPONENT,
                    "Pod already annotated for manual roll",
                    &[("namespace", namespace), ("pod", name)],
                );
                outcome.already_annotated.push(name.to_string());
                continue;
            }
            match self
                .platform
                .patch_pod_annotations(namespace, name, &annotations)
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_not_found() => return Err(stale()),
                Err(err) => return Err(err.into()),
            }
            log_info(
                COMPONENT,
                "Annotated pod for manual roll",
                &[("namespace", namespace), ("pod", name)],
            );
            outcome.annotated.push(name.to_string());
        }
        Ok(outcome)
    }

    /// Annotates the pods of `snapshot`. On a stale reference the group is
    /// captured again and annotated once more; a second stale reference is
    /// returned to the caller. Returns the snapshot that was annotated.
    pub async fn trigger_with_resnapshot(
        &self,
        selector: &ReplicaGroupSelector,
        snapshot: PodSnapshot,
    ) -> Result<PodSnapshot, VerificationError> {
        match self.trigger_manual_roll(&snapshot).await {
            Ok(_) => Ok(snapshot),
            Err(VerificationError::StalePodReference { pod, .. }) => {
                let group = selector.to_string();
                log_warn(
                    COMPONENT,
                    "Snapshot went stale before annotation, capturing again",
                    &[("group", group.as_str()), ("pod", pod.as_str())],
                );
                let fresh = PodSnapshotStore::new(self.platform).capture(selector).await?;
                self.trigger_manual_roll(&fresh).await?;
                Ok(fresh)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollwatch::test_support::{make_pod, FakeCluster};
    use crate::rollwatch::verify::selector::ReplicaGroupSelector;
    use crate::rollwatch::verify::snapshot::PodSnapshotStore;

    fn seeded() -> (FakeCluster, ReplicaGroupSelector) {
        let selector = ReplicaGroupSelector::kafka("infra", "c");
        let fake = FakeCluster::new();
        for (name, uid) in [("c-kafka-0", "u0"), ("c-kafka-1", "u1")] {
            fake.insert_pod(make_pod("infra", name, uid, selector.labels(), true));
        }
        (fake, selector)
    }

    #[tokio::test]
    async fn annotating_twice_is_idempotent() {
        let (fake, selector) = seeded();
        let snapshot = PodSnapshotStore::new(&fake).capture(&selector).await.unwrap();
        let annotator = ManualRollAnnotator::new(&fake);

        let first = annotator.trigger_manual_roll(&snapshot).await.unwrap();
        assert_eq!(first.annotated, vec!["c-kafka-0", "c-kafka-1"]);

        let second = annotator.trigger_manual_roll(&snapshot).await.unwrap();
        assert!(second.annotated.is_empty());
        assert_eq!(second.already_annotated, vec!["c-kafka-0", "c-kafka-1"]);
        assert_eq!(fake.annotation_patches().len(), 2);

        let pod = fake.pod("infra", "c-kafka-1").expect("pod present");
        assert_eq!(pod.annotation(MANUAL_ROLL_ANNOTATION), Some("true"));
    }

    #[tokio::test]
    async fn missing_pod_is_a_stale_reference() {
        let (fake, selector) = seeded();
        let snapshot = PodSnapshotStore::new(&fake).capture(&selector).await.unwrap();
        fake.remove_pod("infra", "c-kafka-1");

        let err = ManualRollAnnotator::new(&fake)
            .trigger_manual_roll(&snapshot)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::StalePodReference { ref pod, .. } if pod == "c-kafka-1"
        ));
    }

    #[tokio::test]
    async fn replaced_pod_with_same_name_is_a_stale_reference() {
        let (fake, selector) = seeded();
        let snapshot = PodSnapshotStore::new(&fake).capture(&selector).await.unwrap();
        fake.insert_pod(make_pod("infra", "c-kafka-0", "u9", selector.labels(), true));

        let err = ManualRollAnnotator::new(&fake)
            .trigger_manual_roll(&snapshot)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::StalePodReference { ref pod, .. } if pod == "c-kafka-0"
        ));
        assert!(fake.annotation_patches().is_empty());
    }
}
