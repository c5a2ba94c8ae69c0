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

use super::{clients, policy, NAMESPACE};
use rollwatch::rollwatch::k8s::job::JobPhase;
use rollwatch::rollwatch::test_support::{FakeCluster, JobOutcome};
use rollwatch::rollwatch::verify::{
    VerificationError, WorkloadCompletionTracker, WorkloadJob, WorkloadRole,
};
use std::time::Duration;

fn jobs(count: u64) -> (WorkloadJob, WorkloadJob) {
    WorkloadJob::pair(
        "producer-test-1",
        "consumer-test-1",
        NAMESPACE,
        "my-topic",
        "my-cluster-kafka-bootstrap:9092",
        count,
        Duration::from_millis(500),
    )
}

#[tokio::test(start_paused = true)]
async fn scenario_producer_and_consumer_deliver_every_message() {
    let fake = FakeCluster::new();
    let clients = clients();
    let mut tracker = WorkloadCompletionTracker::new(&fake, &clients, policy());
    let (producer, consumer) = jobs(300);
    tracker.start_producer(producer).await.unwrap();
    tracker.start_consumer(consumer).await.unwrap();

    let phase = tracker
        .wait_running("consumer-test-1", NAMESPACE, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(phase, JobPhase::Running);

    for identity in ["producer-test-1", "consumer-test-1"] {
        let result = tracker
            .wait_success(identity, NAMESPACE, 300, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(result.messages, 300);
        assert_eq!(result.phase, JobPhase::Succeeded);
    }
    assert_eq!(tracker.active().count(), 2);
    assert_eq!(tracker.discard_all().await.unwrap(), 2);
    assert!(!fake.has_job(NAMESPACE, "producer-test-1"));
}

#[tokio::test(start_paused = true)]
async fn scenario_identities_are_never_reused() {
    let fake = FakeCluster::new();
    let clients = clients();
    let mut tracker = WorkloadCompletionTracker::new(&fake, &clients, policy());
    let (producer, _) = jobs(10);
    tracker.start_producer(producer.clone()).await.unwrap();

    let err = tracker.start_producer(producer.clone()).await.unwrap_err();
    assert!(matches!(err, VerificationError::WorkloadReused { .. }));

    assert!(tracker.discard("producer-test-1", NAMESPACE).await.unwrap());
    let err = tracker.start_producer(producer).await.unwrap_err();
    assert!(matches!(err, VerificationError::WorkloadReused { .. }));
}

#[tokio::test(start_paused = true)]
async fn scenario_role_mismatch_is_a_caller_error() {
    let fake = FakeCluster::new();
    let clients = clients();
    let mut tracker = WorkloadCompletionTracker::new(&fake, &clients, policy());
    let (producer, consumer) = jobs(10);
    assert_eq!(consumer.role, WorkloadRole::Consumer);

    let err = tracker.start_producer(consumer).await.unwrap_err();
    match &err {
        VerificationError::WorkloadRoleMismatch {
            identity,
            expected,
            actual,
        } => {
            assert_eq!(identity, "consumer-test-1");
            assert_eq!(*expected, WorkloadRole::Producer);
            assert_eq!(*actual, WorkloadRole::Consumer);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_product_defect());
    assert!(!fake.has_job(NAMESPACE, "consumer-test-1"));

    let err = tracker.start_consumer(producer).await.unwrap_err();
    assert_eq!(err.kind(), "WorkloadRoleMismatch");
    assert!(!err.is_product_defect());
    assert!(!fake.has_job(NAMESPACE, "producer-test-1"));
}

#[tokio::test(start_paused = true)]
async fn scenario_job_that_never_starts() {
    let fake = FakeCluster::new();
    let clients = clients();
    fake.set_job_outcome("consumer-test-1", JobOutcome::Stuck);
    let mut tracker = WorkloadCompletionTracker::new(&fake, &clients, policy());
    let (_, consumer) = jobs(10);
    tracker.start_consumer(consumer).await.unwrap();

    let err = tracker
        .wait_running("consumer-test-1", NAMESPACE, Duration::from_secs(20))
        .await
        .unwrap_err();
    match err {
        VerificationError::JobNotRunning { identity, phase, .. } => {
            assert_eq!(identity, "consumer-test-1");
            assert_eq!(phase, Some(JobPhase::Pending));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_hanging_job_reports_last_count() {
    let fake = FakeCluster::new();
    let clients = clients();
    fake.set_job_outcome("producer-test-1", JobOutcome::Hang);
    let mut tracker = WorkloadCompletionTracker::new(&fake, &clients, policy());
    let (producer, _) = jobs(300);
    tracker.start_producer(producer).await.unwrap();

    let err = tracker
        .wait_success("producer-test-1", NAMESPACE, 300, Duration::from_secs(10))
        .await
        .unwrap_err();
    match err {
        VerificationError::WorkloadIncomplete {
            expected,
            observed,
            phase,
            ..
        } => {
            assert_eq!(expected, 300);
            assert!(matches!(observed, Some(count) if count < 300));
            assert_eq!(phase, Some(JobPhase::Running));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_unknown_identity_cannot_be_awaited() {
    let fake = FakeCluster::new();
    let clients = clients();
    let tracker = WorkloadCompletionTracker::new(&fake, &clients, policy());
    let err = tracker
        .wait_success("producer-test-9", NAMESPACE, 1, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, VerificationError::Platform(_)));
}
