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

use super::{policy, start_reconciler, CLUSTER, NAMESPACE};
use rollwatch::rollwatch::api::Platform;
use rollwatch::rollwatch::k8s::pod::Pod;
use rollwatch::rollwatch::test_support::{make_pod, FakeCluster};
use rollwatch::rollwatch::verify::{
    ManualRollAnnotator, PodSnapshot, PodSnapshotStore, ReplicaGroupSelector, RollState,
    RollingUpdateDetector, VerificationError,
};
use std::time::Duration;

fn brokers() -> ReplicaGroupSelector {
    ReplicaGroupSelector::kafka(NAMESPACE, CLUSTER)
}

fn broker_pods(uids: &[&str], ready: bool) -> Vec<Pod> {
    let selector = brokers();
    uids.iter()
        .enumerate()
        .map(|(ordinal, uid)| {
            let name = format!("{CLUSTER}-kafka-{ordinal}");
            make_pod(NAMESPACE, &name, uid, selector.labels(), ready)
        })
        .collect()
}

fn old_snapshot() -> PodSnapshot {
    PodSnapshot::from_markers(
        NAMESPACE,
        [
            ("my-cluster-kafka-0", "old-0"),
            ("my-cluster-kafka-1", "old-1"),
            ("my-cluster-kafka-2", "old-2"),
        ],
    )
}

async fn reconciled_group(fake: &FakeCluster, replicas: usize) -> PodSnapshot {
    fake.add_group(&brokers(), replicas);
    start_reconciler(fake).await;
    RollingUpdateDetector::new(fake, policy())
        .wait_for_component_and_pods_ready(&brokers(), replicas, Duration::from_secs(60))
        .await
        .expect("group becomes ready")
}

#[tokio::test(start_paused = true)]
async fn scenario_manual_roll_replaces_every_pod_once() {
    let fake = FakeCluster::new();
    let before = reconciled_group(&fake, 3).await;
    assert_eq!(before.len(), 3);

    let outcome = ManualRollAnnotator::new(&fake)
        .trigger_manual_roll(&before)
        .await
        .expect("annotate");
    assert_eq!(outcome.annotated.len(), 3);

    let report = RollingUpdateDetector::new(&fake, policy())
        .wait_until_rolled(&brokers(), 3, &before, Duration::from_secs(300))
        .await
        .expect("roll completes");

    assert_eq!(
        report.transitions,
        vec![RollState::NotStarted, RollState::InProgress, RollState::Complete]
    );
    assert!(report.is_monotonic());
    assert_eq!(report.snapshot.len(), 3);
    assert_eq!(before.changed_in(&report.snapshot), 3);
    for name in before.names() {
        let pod = fake.pod(NAMESPACE, name).expect("replacement exists");
        assert!(pod.is_ready());
        assert_eq!(pod.annotation("strimzi.io/manual-rolling-update"), None);
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_overlap_is_not_complete_until_count_settles() {
    let fake = FakeCluster::new();
    fake.script_pods(
        NAMESPACE,
        brokers().labels(),
        vec![
            broker_pods(&["new-0", "new-1", "new-2", "new-3"], true),
            broker_pods(&["new-0", "new-1", "new-2"], false),
            broker_pods(&["new-0", "new-1", "new-2"], true),
        ],
    );

    let report = RollingUpdateDetector::new(&fake, policy())
        .wait_until_rolled(&brokers(), 3, &old_snapshot(), Duration::from_secs(60))
        .await
        .expect("roll completes once the overlap is gone");

    assert_eq!(
        report.transitions,
        vec![RollState::InProgress, RollState::Complete]
    );
    assert_eq!(report.polls, 3);
    assert_eq!(report.snapshot.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn scenario_zero_pods_counts_as_in_progress() {
    let fake = FakeCluster::new();
    fake.script_pods(
        NAMESPACE,
        brokers().labels(),
        vec![Vec::new(), broker_pods(&["new-0", "new-1", "new-2"], true)],
    );

    let report = RollingUpdateDetector::new(&fake, policy())
        .wait_until_rolled(&brokers(), 3, &old_snapshot(), Duration::from_secs(60))
        .await
        .expect("scale down and up is a valid roll");
    assert_eq!(
        report.transitions,
        vec![RollState::InProgress, RollState::Complete]
    );
}

#[tokio::test(start_paused = true)]
async fn scenario_unchanged_group_times_out() {
    let fake = FakeCluster::new();
    for pod in broker_pods(&["u0", "u1", "u2"], true) {
        fake.insert_pod(pod);
    }
    let old = PodSnapshotStore::new(&fake).capture(&brokers()).await.unwrap();

    let err = RollingUpdateDetector::new(&fake, policy())
        .wait_until_rolled(&brokers(), 3, &old, Duration::from_secs(30))
        .await
        .expect_err("nothing ever rolls");

    match err {
        VerificationError::RollTimeout {
            selector,
            last_observed,
            waited,
        } => {
            assert_eq!(selector, brokers());
            let last = last_observed.expect("observed at least once");
            assert_eq!(last.state, RollState::NotStarted);
            assert_eq!(last.observed, 3);
            assert!(waited >= Duration::from_secs(30));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_deleted_pod_heals_without_touching_the_rest() {
    let fake = FakeCluster::new();
    let before = reconciled_group(&fake, 3).await;

    assert!(fake.delete_pod(NAMESPACE, "my-cluster-kafka-1").await.unwrap());
    let after = RollingUpdateDetector::new(&fake, policy())
        .wait_for_component_and_pods_ready(&brokers(), 3, Duration::from_secs(60))
        .await
        .expect("group heals");

    assert_eq!(before.changed_in(&after), 1);
    assert_ne!(
        before.marker("my-cluster-kafka-1"),
        after.marker("my-cluster-kafka-1")
    );
    assert_eq!(
        before.marker("my-cluster-kafka-0"),
        after.marker("my-cluster-kafka-0")
    );
}

#[tokio::test(start_paused = true)]
async fn scenario_readiness_timeout_reports_counts() {
    let fake = FakeCluster::new();
    for pod in broker_pods(&["u0", "u1"], true) {
        fake.insert_pod(pod);
    }

    let err = RollingUpdateDetector::new(&fake, policy())
        .wait_for_component_and_pods_ready(&brokers(), 3, Duration::from_secs(20))
        .await
        .expect_err("only two pods exist");
    match err {
        VerificationError::ReadinessTimeout {
            ready,
            observed,
            expected,
            ..
        } => assert_eq!((ready, observed, expected), (2, 2, 3)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_stale_snapshot_is_captured_again_once() {
    let fake = FakeCluster::new();
    for pod in broker_pods(&["u0", "u1", "u2"], true) {
        fake.insert_pod(pod);
    }
    let snapshot = PodSnapshotStore::new(&fake).capture(&brokers()).await.unwrap();
    fake.insert_pod(broker_pods(&["u9"], true).remove(0));

    let annotated = ManualRollAnnotator::new(&fake)
        .trigger_with_resnapshot(&brokers(), snapshot)
        .await
        .expect("second attempt succeeds");

    assert_eq!(
        annotated.marker("my-cluster-kafka-0").map(|m| m.as_str()),
        Some("u9")
    );
    assert_eq!(fake.annotation_patches().len(), 3);
}
